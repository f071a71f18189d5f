//! Tool-call fingerprint guard. Flags a model calling the same tool with the
//! same (volatile-key-stripped) arguments over and over without making
//! progress.

use serde_json::Value;
use sha2::{Digest, Sha256};

const REPEAT_THRESHOLD: usize = 5;

/// Outcome of observing one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintVerdict {
    Ok,
    /// First breach of the repeat threshold: warn, then keep going.
    Warn,
    /// Second breach after a warning: abort the step loop.
    Abort,
}

fn is_volatile_key(key: &str) -> bool {
    matches!(key, "requestId" | "timestamp" | "toolCallId") || key.ends_with("Id") || key.ends_with("At")
}

fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if is_volatile_key(k) {
                    continue;
                }
                out.insert(k.clone(), strip_volatile(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(strip_volatile).collect()),
        other => other.clone(),
    }
}

/// Renders a `Value` with object keys in sorted order, so equivalent
/// arguments with different field order hash identically.
fn canonical_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys.iter().map(|k| format!("{:?}:{}", k, canonical_string(&map[*k]))).collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(arr) => {
            let parts: Vec<String> = arr.iter().map(canonical_string).collect();
            format!("[{}]", parts.join(","))
        }
        Value::String(s) => format!("{s:?}"),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

fn fingerprint(tool_name: &str, arguments: &Value) -> String {
    let cleaned = strip_volatile(arguments);
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_string(&cleaned).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One instance per in-flight step loop. Tracks the last tool-call
/// fingerprint and how many times in a row it's repeated.
pub struct FingerprintGuard {
    last_fingerprint: Option<String>,
    repeat_count: usize,
    warned: bool,
}

impl FingerprintGuard {
    pub fn new() -> Self {
        Self { last_fingerprint: None, repeat_count: 0, warned: false }
    }

    /// Observe one tool call. Never called mid-execution of a tool — only
    /// once the call's name and arguments are known, before dispatch.
    pub fn observe(&mut self, tool_name: &str, arguments: &Value) -> FingerprintVerdict {
        let fp = fingerprint(tool_name, arguments);

        if self.last_fingerprint.as_deref() == Some(fp.as_str()) {
            self.repeat_count += 1;
        } else {
            self.last_fingerprint = Some(fp);
            self.repeat_count = 0;
            self.warned = false;
        }

        if self.repeat_count >= REPEAT_THRESHOLD {
            if !self.warned {
                self.warned = true;
                self.repeat_count = 0;
                FingerprintVerdict::Warn
            } else {
                FingerprintVerdict::Abort
            }
        } else {
            FingerprintVerdict::Ok
        }
    }
}

impl Default for FingerprintGuard {
    fn default() -> Self {
        Self::new()
    }
}
