// src/utils/mod.rs
use log::info;
use std::str::FromStr;

/// Parses a level name, falling back to `Info` for anything unrecognised.
pub fn parse_level(level: Option<&str>) -> log::LevelFilter {
    level
        .and_then(|l| log::LevelFilter::from_str(l.trim()).ok())
        .unwrap_or(log::LevelFilter::Info)
}

pub fn setup_logging(level: Option<&str>) -> Result<(), fern::InitError> {
    let level = parse_level(level);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("solana_rbpf", log::LevelFilter::Warn)
        .level_for("solana_runtime::message_processor", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    info!("Logging initialized at {}.", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level(Some("debug")), log::LevelFilter::Debug);
        assert_eq!(parse_level(Some(" WARN ")), log::LevelFilter::Warn);
        assert_eq!(parse_level(Some("loud")), log::LevelFilter::Info);
        assert_eq!(parse_level(None), log::LevelFilter::Info);
    }
}
