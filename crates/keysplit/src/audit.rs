use eyre::Context as _;
use serde_json::{Map, Value};
use std::{fs::OpenOptions, io::Write as _, path::PathBuf};

// Every audit line carries the same keys; unknown values are null.
const REQUIRED_KEYS: [&str; 7] = [
    "ts",
    "op",
    "user_id",
    "address",
    "network",
    "result",
    "error_code",
];

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    if !obj.contains_key("ts") {
        obj.insert("ts".to_owned(), Value::String(utc_now_iso()));
    }
    for k in REQUIRED_KEYS {
        if !obj.contains_key(k) {
            obj.insert(k.to_owned(), Value::Null);
        }
    }

    Value::Object(obj)
}

/// Append-only JSONL trail of provisioning and reveal attempts.
///
/// Entries never carry share material or secrets.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, entry: &Value) -> eyre::Result<()> {
        let entry = normalize_entry(entry.clone());
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let mut f = {
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .mode(crate::fsutil::MODE_FILE_PRIVATE)
                    .open(&self.path)
                    .context("open audit log")?
            }
            #[cfg(not(unix))]
            {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .context("open audit log")?
            }
        };
        writeln!(f, "{entry}").context("write audit log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_missing_keys() {
        let v = normalize_entry(serde_json::json!({ "op": "reveal" }));
        for k in REQUIRED_KEYS {
            assert!(v.get(k).is_some(), "missing {k}");
        }
        assert_eq!(v.get("error_code"), Some(&Value::Null));
        assert!(v.get("ts").and_then(Value::as_str).is_some());

        let wrapped = normalize_entry(Value::String("x".to_owned()));
        assert_eq!(wrapped.get("raw"), Some(&Value::String("x".to_owned())));
    }

    #[test]
    fn append_writes_one_line_per_entry() -> eyre::Result<()> {
        let td = tempfile::tempdir().context("create tempdir")?;
        let log = AuditLog::new(td.path().join("data").join("audit.jsonl"));
        log.append(&serde_json::json!({ "op": "provision", "result": "ok" }))?;
        log.append(&serde_json::json!({ "op": "reveal", "result": "failed" }))?;

        let body = std::fs::read_to_string(td.path().join("data").join("audit.jsonl"))
            .context("read audit log")?;
        let lines: Vec<Value> = body
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .context("parse audit lines")?;
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines.get(1).and_then(|v| v.get("op")).and_then(Value::as_str),
            Some("reveal")
        );
        Ok(())
    }
}
