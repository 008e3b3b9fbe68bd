mod generate;
mod simulate;
mod topology;

use {
    crate::{
        config::{Config, LogLevel},
        logger::Logger,
        utils::errorfmt::ErrorFmt,
    },
    ::log::Level,
    clap::{Args, Parser, Subcommand, ValueEnum},
    clap_complete::Shell,
    std::{
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// A multi-client display configuration control plane.
#[derive(Parser, Debug)]
#[command(version)]
struct Dpyctl {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// The log level.
    ///
    /// Overrides the log level of the configuration file. The default is `info`.
    #[arg(value_enum, long, global = true)]
    pub log_level: Option<CliLogLevel>,
    /// Log into a file in the data directory instead of stderr.
    #[arg(long, global = true)]
    pub log_file: bool,
}

impl GlobalArgs {
    fn install_logger(&self) -> Arc<Logger> {
        let level = self.log_level.map(Level::from).unwrap_or(Level::Info);
        match self.log_file {
            true => Logger::install_file(level),
            false => Logger::install_stderr(level),
        }
    }

    /// Loads the configuration and applies its log level unless one was given on the
    /// command line.
    fn load_config(&self, logger: &Logger, path: &Path) -> Config {
        let config = match Config::load(path) {
            Ok(c) => c,
            Err(e) => fatal!("Could not load {}: {}", path.display(), ErrorFmt(e)),
        };
        if self.log_level.is_none()
            && let Some(level) = config.log_level
        {
            logger.set_level(level.into());
        }
        if let Some(path) = logger.path() {
            log::info!("Logging to {}", path.display());
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the displays, connectors and heads of every GPU of a configuration.
    Topology(TopologyArgs),
    /// Light up every connected display of a configuration and run vertical blanks.
    Simulate(SimulateArgs),
    /// Generate shell completion scripts for dpyctl.
    GenerateCompletion(GenerateArgs),
}

#[derive(Args, Debug)]
pub struct TopologyArgs {
    /// The configuration file describing the GPUs.
    pub config: PathBuf,
    /// Also print the mode pool of every display.
    #[arg(long, short)]
    pub modes: bool,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// The configuration file describing the GPUs.
    pub config: PathBuf,
    /// The number of vertical blanks to run.
    #[arg(long, short, default_value_t = 60)]
    pub frames: u64,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,
}

#[derive(ValueEnum, Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum CliLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<CliLogLevel> for Level {
    fn from(value: CliLogLevel) -> Self {
        let level = match value {
            CliLogLevel::Trace => LogLevel::Trace,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Error => LogLevel::Error,
        };
        level.into()
    }
}

pub fn main() {
    let cli = Dpyctl::parse();
    match cli.command {
        Cmd::Topology(a) => topology::main(cli.global, a),
        Cmd::Simulate(a) => simulate::main(cli.global, a),
        Cmd::GenerateCompletion(g) => generate::main(g),
    }
}
