#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::utils::config::LogFormat;
use crate::utils::errors::Errors;
use crate::utils::listener_utils::{ensure_parent_dir, timestamp_str};

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Recorded when the peer address can't be determined.
pub const UNKNOWN_CLIENT: &str = "UNKNOWN";

// ***************************************************************************
//                            AccessLogEntry Struct
// ***************************************************************************
/** One record per handled connection.  The JSON form carries the timestamp,
 * the client IP and the status code detected in the response; the request
 * text only appears in the plain-text form.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    pub client_ip: String,
    #[serde(rename = "HTTP_code")]
    pub http_code: String,
    #[serde(skip)]
    pub request: String,
}

impl AccessLogEntry {
    pub fn new(timestamp: String, client_ip: String, http_code: String, request: String) -> Self {
        Self { timestamp, client_ip, http_code, request }
    }

    /** Build an entry stamped with the current time in the given zone. */
    pub fn now(tz: &Tz, client_ip: &str, http_code: &str, request: &str) -> Self {
        Self::new(timestamp_str(tz), client_ip.to_string(), http_code.to_string(), request.to_string())
    }

    /** Encode the entry as a single newline-terminated line. */
    pub fn to_line(&self, format: LogFormat) -> Result<String, Errors> {
        let mut line = match format {
            LogFormat::Json => serde_json::to_string(self)?,
            LogFormat::Text => format!("{} - IP: {} - Request: {}",
                                       self.timestamp, self.client_ip, single_line(self.request.trim())),
        };
        line.push('\n');
        Ok(line)
    }
}

// ***************************************************************************
//                              AccessLog Struct
// ***************************************************************************
/** Append-only sink shared by every connection handler.  The file is opened
 * in append mode for each record through tokio::fs, so the writes run on the
 * blocking pool instead of a runtime worker.  The async mutex keeps
 * concurrent handlers from interleaving their lines.
 */
#[derive(Debug)]
pub struct AccessLog {
    path: PathBuf,
    format: LogFormat,
    lock: Mutex<()>,
}

impl AccessLog {
    /** Create the sink, making the log file's directory if it's missing. */
    pub fn create(path: &Path, format: LogFormat) -> Result<Self, Errors> {
        ensure_parent_dir(path)?;
        Ok(Self { path: path.to_path_buf(), format, lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    /** Append exactly one line for the entry. */
    pub async fn append(&self, entry: &AccessLogEntry) -> Result<(), Errors> {
        let line = entry.to_line(self.format)?;

        let _guard = self.lock.lock().await;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Log entry: {}", line.trim_end());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// single_line:
// ---------------------------------------------------------------------------
// Escape line breaks so a multi-line request stays on one log line.
fn single_line(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    fn sample() -> AccessLogEntry {
        AccessLogEntry::new("2024-06-24 04:32:27".to_string(), "127.0.0.1".to_string(),
                            "200".to_string(), "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string())
    }

    #[test]
    fn json_line_schema() {
        let line = sample().to_line(LogFormat::Json).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["timestamp"], "2024-06-24 04:32:27");
        assert_eq!(obj["client_ip"], "127.0.0.1");
        assert_eq!(obj["HTTP_code"], "200");
    }

    #[test]
    fn text_line_is_single_line() {
        let line = sample().to_line(LogFormat::Text).unwrap();
        assert_eq!(line, "2024-06-24 04:32:27 - IP: 127.0.0.1 - Request: GET / HTTP/1.1\\r\\nHost: localhost\n");
    }

    #[test]
    fn json_line_decodes_back() {
        let line = sample().to_line(LogFormat::Json).unwrap();
        let entry: AccessLogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(entry.client_ip, "127.0.0.1");
        assert_eq!(entry.http_code, "200");
        assert!(entry.request.is_empty());
    }

    #[tokio::test]
    async fn append_creates_directory_and_appends() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("logs").join("server.log");
        let log = AccessLog::create(&path, LogFormat::Json).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());

        log.append(&sample()).await.unwrap();
        log.append(&sample()).await.unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
    }

    #[tokio::test]
    async fn append_recreates_removed_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("logs");
        let path = dir.join("server.log");
        let log = AccessLog::create(&path, LogFormat::Text).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        log.append(&sample()).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_keep_lines_whole() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("server.log");
        let log = Arc::new(AccessLog::create(&path, LogFormat::Json).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..40 {
            let log = Arc::clone(&log);
            tasks.spawn(async move {
                let entry = AccessLogEntry::new("2024-06-24 04:32:27".to_string(), format!("10.0.0.{}", i),
                                                "200".to_string(), String::new());
                log.append(&entry).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 40);
        let mut ips: Vec<String> = contents.lines()
            .map(|l| serde_json::from_str::<AccessLogEntry>(l).unwrap().client_ip)
            .collect();
        ips.sort();
        ips.dedup();
        assert_eq!(ips.len(), 40);
    }

    #[test]
    fn now_uses_log_timestamp_format() {
        let entry = AccessLogEntry::now(&Tz::CET, UNKNOWN_CLIENT, "", "");
        assert_eq!(entry.timestamp.len(), 19);
        assert_eq!(entry.client_ip, "UNKNOWN");
    }
}
