use log::LevelFilter;

/// Routes `log` records to stderr; stdout belongs to the tool protocol.
///
/// The dispatch itself passes everything; the active level is the global
/// `log` maximum so it can be adjusted once settings are loaded.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Trace)
        .level_for("async_imap", LevelFilter::Warn)
        .level_for("lettre", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;
    set_level(level);
    Ok(())
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Each `-v` on the command line raises the configured level one step.
pub fn effective_level(configured: LevelFilter, verbosity: u8) -> LevelFilter {
    let levels = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    let current = levels
        .iter()
        .position(|level| *level == configured)
        .unwrap_or(3);
    levels[(current + usize::from(verbosity)).min(levels.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level_and_saturates() {
        assert_eq!(effective_level(LevelFilter::Info, 0), LevelFilter::Info);
        assert_eq!(effective_level(LevelFilter::Info, 1), LevelFilter::Debug);
        assert_eq!(effective_level(LevelFilter::Warn, 9), LevelFilter::Trace);
    }

    #[test]
    fn level_can_change_after_init() {
        init(LevelFilter::Warn).unwrap();
        assert_eq!(log::max_level(), LevelFilter::Warn);
        assert!(log::log_enabled!(log::Level::Error));
        assert!(!log::log_enabled!(log::Level::Info));

        set_level(LevelFilter::Debug);
        assert_eq!(log::max_level(), LevelFilter::Debug);
        assert!(log::log_enabled!(log::Level::Debug));
    }
}
