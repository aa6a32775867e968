use std::fmt::{Display, Formatter};

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::runtime::ConfigErrors;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::Config;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}";

#[derive(Debug)]
pub enum LoggingError {
    File(String),
    Config(ConfigErrors),
    SetLogger(log::SetLoggerError),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::File(e) => write!(f, "failed to load log configuration: {}", e),
            LoggingError::Config(e) => write!(f, "invalid log configuration: {}", e),
            LoggingError::SetLogger(e) => write!(f, "logger already initialized: {}", e),
        }
    }
}

pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

pub fn console_config(level: LevelFilter) -> Result<log4rs::Config, ConfigErrors> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
}

/// Initializes log4rs from `log_config` when set, otherwise logs to stdout at `log_level`.
pub fn init(config: &Config) -> Result<(), LoggingError> {
    if let Some(path) = &config.log_config {
        return log4rs::init_file(path, Default::default()).map_err(|e| LoggingError::File(e.to_string()));
    }
    let log_config = console_config(parse_level(&config.log_level)).map_err(LoggingError::Config)?;
    log4rs::init_config(log_config).map_err(LoggingError::SetLogger)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
    }

    #[test]
    fn test_console_config() {
        let config = console_config(LevelFilter::Trace).unwrap();
        assert_eq!(config.root().level(), LevelFilter::Trace);
        assert_eq!(config.appenders().len(), 1);
    }
}
