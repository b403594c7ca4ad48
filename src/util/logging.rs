use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. `-v` enables DEBUG, `-vv` TRACE, `-q` errors only.
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = level_for(verbose, quiet);

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("chunkdump={}", level).parse().unwrap())
        .add_directive(format!("chunkload={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn level_for(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(level_for(2, true), Level::ERROR);
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0, false), Level::INFO);
        assert_eq!(level_for(1, false), Level::DEBUG);
        assert_eq!(level_for(5, false), Level::TRACE);
    }
}
