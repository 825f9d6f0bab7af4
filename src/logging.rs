use log::LevelFilter;

/// Routes `log` records to stderr as `timestamp [LEVEL] target: message`.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // async-imap is chatty at debug level
        .level_for("async_imap", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
}
