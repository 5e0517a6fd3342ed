use log::SetLoggerError;
use simplelog::*;

/// Install a terminal logger, fails if a logger was already set.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_once() {
        let _ = init(LevelFilter::Debug);
        assert!(init(LevelFilter::Info).is_err());
        log::debug!("logger installed");
    }
}
