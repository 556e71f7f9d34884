// Structured Event Log - append-only JSONL records for post-run analysis.
// Never raises to the caller: I/O problems degrade to tracing warnings.

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventLog {
    /// Opens (or creates) the log in append mode. A log that cannot be
    /// opened still works: records go to tracing only.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match open_append(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "event log unavailable, using tracing only");
                None
            }
        };
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. `fields` should be a JSON object; null and
    /// empty-string values are dropped.
    pub fn event(&self, level: EventLevel, stage: &str, message: &str, fields: Value) {
        let mut row = Map::new();
        row.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        row.insert("level".to_string(), serde_json::to_value(level).unwrap_or(Value::Null));
        row.insert("stage".to_string(), Value::String(stage.to_string()));
        row.insert("message".to_string(), Value::String(message.to_string()));

        if let Value::Object(extra) = fields {
            for (key, value) in extra {
                let empty = match &value {
                    Value::Null => true,
                    Value::String(s) => s.is_empty(),
                    _ => false,
                };
                if !empty && !row.contains_key(&key) {
                    row.insert(key, value);
                }
            }
        }

        mirror_to_tracing(level, stage, message);

        let line = match serde_json::to_string(&row) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize event record");
                return;
            }
        };

        // Synchronous append: callers never await a log line, and one short
        // write per record stays under the mutex.
        let mut guard = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(file) = guard.as_mut() {
            // one write_all per record keeps lines whole
            if let Err(e) = file.write_all(format!("{line}\n").as_bytes()) {
                warn!(path = %self.path.display(), error = %e, "failed to append event record");
            }
        }
    }

    pub fn info(&self, stage: &str, message: &str, fields: Value) {
        self.event(EventLevel::Info, stage, message, fields);
    }

    pub fn warning(&self, stage: &str, message: &str, fields: Value) {
        self.event(EventLevel::Warning, stage, message, fields);
    }

    pub fn error(&self, stage: &str, message: &str, fields: Value) {
        self.event(EventLevel::Error, stage, message, fields);
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn mirror_to_tracing(level: EventLevel, stage: &str, message: &str) {
    match level {
        EventLevel::Info => info!(stage, "{message}"),
        EventLevel::Warning => warn!(stage, "{message}"),
        EventLevel::Error => error!(stage, "{message}"),
    }
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Collapses whitespace and caps the text at `max_len` characters
pub fn compact_text(value: &str, max_len: usize) -> String {
    let text = WHITESPACE.replace_all(value, " ");
    let text = text.trim();
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len).collect();
        format!("{cut}...")
    }
}

/// Masks an identifier for logs: `alice@example.com` -> `al***e@example.com`
pub fn mask_resource(id: &str) -> String {
    let Some((local, domain)) = id.split_once('@') else {
        let visible: String = id.chars().take(4).collect();
        return if id.chars().count() > 4 {
            format!("{visible}***")
        } else {
            visible
        };
    };
    let chars: Vec<char> = local.chars().collect();
    if chars.len() <= 2 {
        let first: String = chars.iter().take(1).collect();
        return format!("{first}*@{domain}");
    }
    let head: String = chars[..2].iter().collect();
    let tail = chars[chars.len() - 1];
    format!("{head}***{tail}@{domain}")
}

static URL_USERINFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://[^/@\s]+@").expect("static regex"));

/// Hides credentials embedded in a proxy URL
pub fn mask_proxy(url: &str) -> String {
    URL_USERINFO.replace(url, "://***@").into_owned()
}
