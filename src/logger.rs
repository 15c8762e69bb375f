use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::result_code::ResultCode;

pub trait OperationLogger: Send + Sync {
    fn request_sent(&self, _host_port: &str, _message_id: i32, _request: &str) {}
    fn result_received(&self, _host_port: &str, _message_id: i32, _code: ResultCode, _entries: usize, _references: usize) {}
    fn referral_followed(&self, _from: &str, _url: &str, _depth: u32) {}
    fn connection_closed(&self, _host_port: &str, _reason: &str) {}
}

pub struct NoopLogger;
impl OperationLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .with_context(|| format!("failed to open operation log {}", path.as_ref().display()))?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl OperationLogger for TextLogger {
    fn request_sent(&self, host_port: &str, message_id: i32, request: &str) {
        self.line(&format!("REQUEST conn={host_port} msgID={message_id} {request}"));
    }
    fn result_received(&self, host_port: &str, message_id: i32, code: ResultCode, entries: usize, references: usize) {
        self.line(&format!(
            "RESULT conn={} msgID={} resultCode={} entries={} references={}",
            host_port,
            message_id,
            code.int_value(),
            entries,
            references
        ));
    }
    fn referral_followed(&self, from: &str, url: &str, depth: u32) {
        self.line(&format!("REFERRAL from={from} url={url} depth={depth}"));
    }
    fn connection_closed(&self, host_port: &str, reason: &str) {
        self.line(&format!("DISCONNECT conn={host_port} reason={reason}"));
    }
}
