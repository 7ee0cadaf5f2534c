use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

/// Default location of the log file, under the user's cache directory
pub fn default_log_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dft-interpreter")
        .join("dft-interpreter.log")
}

/// Where logs go. The interactive session logs to a file by default so log
/// lines do not mix into the conversation.
pub fn log_destination(log_file: Option<Option<PathBuf>>, interactive: bool) -> Option<PathBuf> {
    match log_file {
        Some(path) => Some(path.unwrap_or_else(default_log_file)),
        None if interactive => Some(default_log_file()),
        None => None,
    }
}

fn filter_for(verbose_level: u8) -> &'static str {
    match verbose_level {
        0 => "warn,dft_interpreter=info",
        1 => "info,dft_interpreter=debug",
        _ => "debug,dft_interpreter=trace",
    }
}

/// Log to stderr, or to `log_file` so the terminal stays clean for the conversation
pub fn setup_logging(verbose_level: u8, log_file: Option<PathBuf>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new(filter_for(verbose_level))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    let file = log_file.and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!(
                    "Warning: Could not open log file {}: {}, logging to stderr",
                    path.display(),
                    e
                );
                None
            }
        }
    });

    match file {
        Some(file) => subscriber
            .with_ansi(false)
            .with_writer(move || -> Box<dyn io::Write + Send> {
                match file.try_clone() {
                    Ok(file) => Box::new(file),
                    Err(_) => Box::new(io::stderr()),
                }
            })
            .init(),
        None => subscriber.with_writer(io::stderr).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(filter_for(0), "warn,dft_interpreter=info");
        assert_eq!(filter_for(1), "info,dft_interpreter=debug");
        assert_eq!(filter_for(2), "debug,dft_interpreter=trace");
        assert_eq!(filter_for(7), "debug,dft_interpreter=trace");
    }

    #[test]
    fn test_interactive_session_logs_to_file() {
        assert_eq!(log_destination(None, true), Some(default_log_file()));
        assert_eq!(log_destination(None, false), None);
        assert_eq!(log_destination(Some(None), false), Some(default_log_file()));
        assert_eq!(
            log_destination(Some(Some(PathBuf::from("/tmp/x.log"))), true),
            Some(PathBuf::from("/tmp/x.log"))
        );
    }

    #[test]
    fn test_default_log_file_location() {
        let path = default_log_file();
        assert!(path.ends_with("dft-interpreter/dft-interpreter.log"));
    }
}
