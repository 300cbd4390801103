//! The plain-text `processing_log.txt` kept next to the results.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveTime};

/// Append-only run log. Each line is `[HH:MM:SS] message`.
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line stamped with the local time. Write errors are traced
    /// and otherwise ignored; the run log never stops a run.
    pub fn append(&self, message: &str) {
        let line = format_line(Local::now().time(), message);
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "run log write failed");
        }
    }
}

fn format_line(time: NaiveTime, message: &str) -> String {
    format!("[{}] {message}\n", time.format("%H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_clock_time() {
        let time = NaiveTime::from_hms_opt(9, 5, 7).unwrap();
        assert_eq!(
            format_line(time, "Found 3 PDF files"),
            "[09:05:07] Found 3 PDF files\n"
        );
    }

    #[test]
    fn appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("processing_log.txt");

        RunLog::open(&path).unwrap().append("first run");
        let log = RunLog::open(&path).unwrap();
        log.append("second run");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first run"));
        assert!(lines[1].starts_with('['));
        assert!(lines[1].ends_with("] second run"));
    }
}
