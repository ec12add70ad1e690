use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    ReverseLookup,
    SubdomainLookup,
    CmsCheck,
    VulnScan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: u64,
    pub action: LogAction,
    pub query: String,
    pub results: Value,
    pub client_key: String,
    pub user_agent: String,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub cached: bool,
}

/// Size-bounded in-memory log of served lookups. Oldest entries fall off the front.
pub struct ResultLogger {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl ResultLogger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn log(&self, entry: LogEntry) {
        tracing::info!(
            action = ?entry.action,
            query = %entry.query,
            client_key = %entry.client_key,
            processing_time_ms = entry.processing_time_ms,
            cached = entry.cached,
            "recon request served"
        );
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Most recent first.
    pub fn get_logs(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().rev().cloned().collect()
    }

    pub fn get_logs_by_action(&self, action: LogAction) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Append every retained entry, oldest first, as JSON lines.
    pub fn export_jsonl(&self, path: &Path) -> anyhow::Result<usize> {
        let snapshot: Vec<LogEntry> = self.entries.lock().iter().cloned().collect();
        let mut f = OpenOptions::new().append(true).create(true).open(path)?;
        for it in &snapshot {
            let line = serde_json::to_string(it)?;
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
        }
        Ok(snapshot.len())
    }
}

impl Default for ResultLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(action: LogAction, query: &str) -> LogEntry {
        LogEntry {
            timestamp: 0,
            action,
            query: query.to_string(),
            results: json!({"ok": true}),
            client_key: "127.0.0.1".into(),
            user_agent: "test".into(),
            processing_time_ms: 1,
            cached: false,
        }
    }

    #[test]
    fn newest_first_and_bounded() {
        let logger = ResultLogger::new(2);
        logger.log(entry(LogAction::CmsCheck, "a.com"));
        logger.log(entry(LogAction::CmsCheck, "b.com"));
        logger.log(entry(LogAction::ReverseLookup, "c.com"));

        let queries: Vec<_> = logger.get_logs().into_iter().map(|e| e.query).collect();
        assert_eq!(queries, vec!["c.com", "b.com"]);
    }

    #[test]
    fn filter_by_action() {
        let logger = ResultLogger::default();
        logger.log(entry(LogAction::CmsCheck, "a.com"));
        logger.log(entry(LogAction::SubdomainLookup, "b.com"));
        logger.log(entry(LogAction::CmsCheck, "c.com"));

        let cms = logger.get_logs_by_action(LogAction::CmsCheck);
        assert_eq!(cms.len(), 2);
        assert_eq!(cms[0].query, "c.com");
        assert_eq!(logger.len(), 3);
    }

    #[test]
    fn serializes_snake_case_actions() {
        let v = serde_json::to_value(entry(LogAction::SubdomainLookup, "x")).unwrap();
        assert_eq!(v["action"], "subdomain_lookup");
        assert_eq!(v["clientKey"], "127.0.0.1");
        assert_eq!(v["processingTimeMs"], 1);
    }

    #[test]
    fn export_writes_one_line_per_entry() {
        let logger = ResultLogger::default();
        logger.log(entry(LogAction::CmsCheck, "a.com"));
        logger.log(entry(LogAction::VulnScan, "b.com"));

        let path = std::env::temp_dir().join(format!("recon_guard_log_{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        assert_eq!(logger.export_jsonl(&path).unwrap(), 2);

        let data = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<LogEntry> = data.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0].query, "a.com");
        assert_eq!(lines[1].action, LogAction::VulnScan);
        let _ = std::fs::remove_file(&path);
    }
}
