use std::path;
use std::process;

use clap::ArgEnum;
use env_logger;
use log;

use extmerge::{MergeStrategy, SortEngineBuilder};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let batch_capacity: usize = arg_parser.value_of_t_or_exit("batch_capacity");
    let strategy: Strategy = arg_parser.value_of_t_or_exit("strategy");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let input = arg_parser.value_of("input").expect("value is required");

    if arg_parser.is_present("generate") {
        let line_count: usize = arg_parser.value_of_t_or_exit("generate");
        let max_line_len: usize = arg_parser.value_of_t_or_exit("line_len");
        if let Err(err) = extmerge::fixture::generate(
            path::Path::new(input),
            line_count,
            max_line_len,
            false,
        ) {
            log::error!("input generation error: {}", err);
            process::exit(1);
        }
    }

    let mut engine_builder = SortEngineBuilder::new()
        .with_batch_capacity(batch_capacity)
        .with_strategy(strategy.into());

    if let Some(threads) = threads {
        engine_builder = engine_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        engine_builder = engine_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(output) = arg_parser.value_of("output") {
        engine_builder = engine_builder.with_output_path(path::Path::new(output));
    }

    let engine = match engine_builder.build() {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("engine initialization error: {}", err);
            process::exit(1);
        }
    };

    match engine.sort(path::Path::new(input)) {
        Ok(sorted) => println!("{}", sorted.display()),
        Err(err) => {
            log::error!("sorting error: {}", err);
            process::exit(1);
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Strategy {
    Pairwise,
    Kway,
}

impl Strategy {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Strategy::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Strategy as clap::ArgEnum>::from_str(s, false)
    }
}

impl From<Strategy> for MergeStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Pairwise => MergeStrategy::Pairwise,
            Strategy::Kway => MergeStrategy::KWay,
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("extmerge")
        .about("external merge sort for line-delimited text files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file (default: input name prefixed with sorted_)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("batch_capacity")
                .short('c')
                .long("batch-capacity")
                .help("maximum number of lines per in-memory batch")
                .takes_value(true)
                .default_value("100000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("batch capacity format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("strategy")
                .short('s')
                .long("strategy")
                .help("merge scheduling strategy")
                .takes_value(true)
                .default_value("pairwise")
                .possible_values(Strategy::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel merging")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("base directory for the transient working directory")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("generate")
                .short('g')
                .long("generate")
                .help("generate the input file with the given number of random lines first")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("line_len")
                .long("line-len")
                .help("maximum line length for generated input")
                .takes_value(true)
                .default_value("50"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
