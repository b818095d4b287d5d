use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Local;

use crate::deliver::Deliver;
use crate::logger::filter_printable_chars;

pub const ACCEPTED: &str = "250 message accepted for delivery";
pub const SAVE_FAILED: &str = "451 Error saving message";

/// Writes every delivered message to its own `.eml` file.
///
/// Without a directory the message is only reported and then dropped.
pub struct Spool {
    data_dir: Option<PathBuf>,
    counter: AtomicUsize,
}

impl Spool {
    pub fn new(data_dir: Option<PathBuf>) -> io::Result<Self> {
        if let Some(dir) = &data_dir {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        Ok(Self {
            data_dir,
            counter: AtomicUsize::new(0),
        })
    }

    fn save(&self, dir: &Path, mail_from: &str, mail_to: &str, message: &str) -> io::Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let filename = format!("{}_{}.eml", Local::now().format("%Y%m%d_%H%M%S"), n);
        let path = dir.join(filename);

        let mut content = String::with_capacity(message.len() + 128);
        content.push_str(&format!("X-Lmtpd-Date: {}\r\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
        content.push_str(&format!("X-Lmtpd-MailFrom: {}\r\n", mail_from));
        content.push_str(&format!("X-Lmtpd-RcptTo: {}\r\n", mail_to));
        content.push_str("\r\n");
        content.push_str(message);

        fs::write(&path, content)?;
        Ok(path)
    }
}

impl Deliver for Spool {
    fn deliver(&self, mail_from: &str, mail_to: &str, message: &str) -> String {
        let summary = filter_printable_chars(&format!(
            "{} -> {} ({} bytes)",
            mail_from,
            mail_to,
            message.len()
        ));

        let dir = match &self.data_dir {
            Some(dir) => dir,
            None => {
                println!("[INFO] Delivered {}", summary);
                return ACCEPTED.to_owned();
            }
        };

        match self.save(dir, mail_from, mail_to, message) {
            Ok(path) => {
                println!("[INFO] Delivered {} to {:?}", summary, path);
                ACCEPTED.to_owned()
            }
            Err(e) => {
                eprintln!("[ERROR] Failed to save message {}: {}", summary, e);
                SAVE_FAILED.to_owned()
            }
        }
    }
}
