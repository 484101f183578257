use anyhow::{Context, Result};
use chrono::Local;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// `<log_dir>/<timestamp>+<command>.log`
pub fn log_file_path(log_dir: &Path, command: &str) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    log_dir.join(format!("{timestamp}+{command}.log"))
}

/// Terminal logging on stderr, plus a file logger when `log_dir` is given.
/// Returns the log file path, if any.
pub fn init(verbose: bool, log_dir: Option<&Path>, command: &str) -> Result<Option<PathBuf>> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    let log_path = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let path = log_file_path(dir, command);
            let file = File::create(&path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
            Some(path)
        }
        None => None,
    };

    CombinedLogger::init(loggers).context("Failed to initialise logging")?;
    if let Some(path) = &log_path {
        log::info!("Logging to {}", path.display());
    }
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_names_command() {
        let path = log_file_path(Path::new("logs"), "leaderboard");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(path.starts_with("logs"));
        assert!(name.ends_with("+leaderboard.log"));
        assert_eq!(name.len(), "20250101-000000+leaderboard.log".len());
    }
}
