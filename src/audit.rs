use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::model::Ms;

/// Key fragments whose values never reach the audit file.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "credit_card",
    "card_number",
    "cvv",
    "recovery_code",
];

pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: String,
    pub action: &'static str,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub subject_type: &'static str,
    pub subject_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl AuditEntry {
    pub fn new(now: Ms, action: &'static str, subject_type: &'static str, subject_id: String) -> Self {
        Self {
            at: chrono::DateTime::from_timestamp_millis(now)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
            action,
            user_id: None,
            ip: None,
            user_agent: None,
            subject_type,
            subject_id,
            before: None,
            after: None,
        }
    }

    pub fn user(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn client(mut self, ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        self.ip = ip.map(mask_ip);
        self.user_agent = user_agent.map(|ua| ua.chars().take(255).collect());
        self
    }

    pub fn before(mut self, value: Value) -> Self {
        self.before = Some(value);
        self
    }

    pub fn after(mut self, value: Value) -> Self {
        self.after = Some(value);
        self
    }
}

/// Append-only JSON-lines audit trail. Entries are never rewritten.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: a failed write is logged and counted, never returned.
    pub fn record(&self, mut entry: AuditEntry) {
        if let Some(v) = entry.before.as_mut() {
            redact(v);
        }
        if let Some(v) = entry.after.as_mut() {
            redact(v);
        }
        if let Err(e) = self.write_line(&entry) {
            metrics::counter!(crate::observability::AUDIT_FAILURES_TOTAL).increment(1);
            warn!("audit log write failed for {}: {e}", entry.action);
        }
    }

    fn write_line(&self, entry: &AuditEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry).map_err(io::Error::other)?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("audit log mutex poisoned"))?;
        file.write_all(&line)?;
        file.flush()
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Replace scalar values under sensitive keys, recursing into nested data.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                match v {
                    Value::Object(_) | Value::Array(_) => redact(v),
                    _ if is_sensitive(key) => *v = Value::String(REDACTED.into()),
                    _ => {}
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Keep enough of an address for coarse geography. Loopback is left intact.
pub fn mask_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) if v4.is_loopback() => v4.to_string(),
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            format!("{a}.{b}.xxx.xxx")
        }
        IpAddr::V6(v6) if v6.is_loopback() => v6.to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => mask_ip(IpAddr::V4(v4)),
            None => {
                let s = v6.segments();
                format!(
                    "{:x}:{:x}:{:x}:{:x}:xxxx:xxxx:xxxx:xxxx",
                    s[0], s[1], s[2], s[3]
                )
            }
        },
    }
}
