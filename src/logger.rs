use chrono::Local;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keep only printable ASCII and whitespace.
pub fn filter_printable_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_graphic() || c.is_ascii_whitespace())
        .collect()
}

/// Escape control characters and non-ASCII so client text cannot forge log lines.
pub fn safe_log_string(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => result.push_str("\\0"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            '\x01'..='\x08' | '\x0b' | '\x0c' | '\x0e'..='\x1f' | '\x7f' => {
                result.push_str(&format!("\\x{:02x}", c as u32));
            }
            _ if c.is_ascii_graphic() || c == ' ' || c == '\t' => result.push(c),
            _ => result.push_str(&format!("\\u{{{:x}}}", c as u32)),
        }
    }
    result
}

/// Timestamped log lines to stdout and, optionally, an append-only file.
///
/// Clones share the same file handle.
#[derive(Clone)]
pub struct Logger {
    writer: Option<Arc<Mutex<BufWriter<File>>>>,
    verbose: bool,
}

impl Logger {
    pub fn new(log_file: Option<PathBuf>, verbose: bool) -> anyhow::Result<Self> {
        let writer = if let Some(path) = log_file {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let file = OpenOptions::new().create(true).append(true).open(path)?;

            Some(Arc::new(Mutex::new(BufWriter::new(file))))
        } else {
            None
        };

        Ok(Self { writer, verbose })
    }

    /// Console only.
    pub fn stdout(verbose: bool) -> Self {
        Self {
            writer: None,
            verbose,
        }
    }

    pub async fn log(&self, origin: impl Display, message: &str) {
        let log_line = format!(
            "{} {} {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            origin,
            filter_printable_chars(message)
        );

        print!("{}", log_line);

        if let Some(writer) = &self.writer {
            let mut writer = writer.lock().await;
            let _ = writer.write_all(log_line.as_bytes());
            let _ = writer.flush();
        }
    }

    /// Protocol trace, emitted only in verbose mode. `details` usually comes
    /// from the client and is escaped.
    pub async fn log_verbose(&self, origin: impl Display, title: &str, details: &str) {
        if !self.verbose {
            return;
        }
        let message = format!("{}: {}", title, safe_log_string(details));
        self.log(origin, &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_printable_chars() {
        assert_eq!(filter_printable_chars("ok\x07 line\x1b[2J"), "ok line[2J");
        assert_eq!(filter_printable_chars("tab\there"), "tab\there");
    }

    #[test]
    fn test_safe_log_string() {
        assert_eq!(safe_log_string("RCPT TO:<a@b>\r\n"), "RCPT TO:<a@b>\\r\\n");
        assert_eq!(safe_log_string("nul\0bell\x07"), "nul\\0bell\\x07");
        assert_eq!(safe_log_string("é"), "\\u{e9}");
    }

    #[tokio::test]
    async fn test_log_file_is_appended() {
        let dir = std::env::temp_dir().join(format!("lmtpd-logger-{}", std::process::id()));
        let path = dir.join("server.log");
        let _ = std::fs::remove_file(&path);

        let logger = Logger::new(Some(path.clone()), true).unwrap();
        logger.log("127.0.0.1:2424", "first").await;
        logger.clone().log_verbose("127.0.0.1:2424", ">>", "LHLO x\r").await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("127.0.0.1:2424 first"));
        assert!(lines[1].ends_with(">>: LHLO x\\r"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_verbose_is_gated() {
        let dir = std::env::temp_dir().join(format!("lmtpd-quiet-{}", std::process::id()));
        let path = dir.join("server.log");
        let logger = Logger::new(Some(path.clone()), false).unwrap();
        logger.log_verbose("peer", "trace", "hidden").await;
        logger.log("peer", "shown").await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("hidden"));
        assert!(contents.contains("shown"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
