//! Log setup: `env_logger` writing every record to stderr and to a daily
//! rolling file in the temp directory, so `nmea-proxy log` can show what
//! a background proxy has been doing.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use env_logger::{Builder, Target};
use log::LevelFilter;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::Tee;

pub const LOG_FILE_PREFIX: &str = "nmea_converter_proxy";
pub const LOG_FILE_SUFFIX: &str = "log";

/// Today's file plus one previous day
pub const MAX_LOG_FILES: usize = 2;

/// Directory holding the rolling log files
pub fn log_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Daily `nmea_converter_proxy.YYYY-MM-DD.log` files in `dir`, older ones
/// pruned by the appender.
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
}

/// Install the global logger.
///
/// `RUST_LOG` still overrides `level` per module. Returns the log
/// directory, or `None` if only stderr could be used.
pub fn init(level: LevelFilter, dir: Option<&Path>) -> Option<PathBuf> {
    let mut builder = Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} :: {} :: {} :: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        });

    let appender = dir.map(file_appender);
    let opened = match appender {
        Some(Ok(appender)) => {
            builder.target(Target::Pipe(Box::new(Tee::new(io::stderr(), appender))));
            dir.map(Path::to_path_buf)
        }
        _ => {
            builder.target(Target::Stderr);
            None
        }
    };
    builder.init();

    if let (Some(dir), None) = (dir, &opened) {
        log::warn!("Cannot write log files in {}, logging to stderr only", dir.display());
    }
    opened
}

/// Most recent log file in `dir`, if any.
///
/// Date stamped names sort chronologically, so the greatest name wins.
pub fn latest_log_file(dir: &Path) -> Option<PathBuf> {
    let prefix = format!("{}.", LOG_FILE_PREFIX);
    let suffix = format!(".{}", LOG_FILE_SUFFIX);
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(&suffix)
        })
        .map(|entry| entry.path())
        .max()
}

/// Last `count` lines of a log file.
pub fn tail_log(path: &Path, count: usize) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

/// Print the end of the latest log file in `dir` to `out`.
///
/// Fails with `NotFound` when `dir` holds no log file at all.
pub fn print_log_tail<W: Write>(dir: &Path, count: usize, out: &mut W) -> io::Result<PathBuf> {
    let path = latest_log_file(dir)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no log file"))?;
    let lines = tail_log(&path, count)?;

    writeln!(out, "Last lines of log:\n")?;
    if lines.is_empty() {
        writeln!(out, "Log is empty")?;
    }
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    writeln!(out, "\nRead the full log at {}", path.display())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appender_writes_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_log_file(dir.path()), None);

        let mut appender = file_appender(dir.path()).unwrap();
        appender.write_all(b"first\nsecond\n").unwrap();
        appender.flush().unwrap();

        let path = latest_log_file(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("nmea_converter_proxy."), "{}", name);
        assert!(name.ends_with(".log"), "{}", name);
        assert_eq!(tail_log(&path, 10).unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_latest_log_file_picks_newest_day() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nmea_converter_proxy.2026-01-01.log"), "old\n").unwrap();
        fs::write(dir.path().join("nmea_converter_proxy.2026-01-02.log"), "new\n").unwrap();
        fs::write(dir.path().join("other.2026-01-03.log"), "x\n").unwrap();
        fs::write(dir.path().join("nmea_converter_proxy.toml"), "x\n").unwrap();

        assert_eq!(
            latest_log_file(dir.path()),
            Some(dir.path().join("nmea_converter_proxy.2026-01-02.log"))
        );
    }

    #[test]
    fn test_print_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        let err = print_log_tail(dir.path(), 10, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(out.is_empty());

        let path = dir.path().join("nmea_converter_proxy.2026-01-02.log");
        fs::write(&path, "").unwrap();
        assert_eq!(print_log_tail(dir.path(), 10, &mut out).unwrap(), path);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Last lines of log:\n\nLog is empty\n"));
        assert!(text.ends_with(&format!("Read the full log at {}\n", path.display())));
    }

    #[test]
    fn test_tail_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let contents: String = (1..=15).map(|i| format!("line {}\n", i)).collect();
        fs::write(&path, contents).unwrap();

        let tail = tail_log(&path, 10).unwrap();
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0], "line 6");
        assert_eq!(tail[9], "line 15");

        fs::write(&path, "only\n").unwrap();
        assert_eq!(tail_log(&path, 10).unwrap(), vec!["only".to_string()]);

        assert!(tail_log(&dir.path().join("missing.log"), 10).is_err());
    }
}
