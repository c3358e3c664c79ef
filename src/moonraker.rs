//! The slice of the Moonraker client the AMS backends depend on.
//!
//! Transport is the host's concern. Backends only need to send G-code
//! scripts and to read fields out of `notify_status_update` payloads, which
//! arrive as `{"params": [{ <object>: {...}, ... }, <eventtime>]}`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use crate::error::AppError;

/// Sends G-code scripts to Klipper (`printer.gcode.script`).
pub trait GcodeSender: Send + Sync {
    fn send_gcode(&self, script: &str) -> Result<(), AppError>;
}

/// A sender that records scripts instead of sending them.
///
/// Used by mock mode and tests.
#[derive(Default)]
pub struct RecordingGcodeSender {
    inner: Mutex<Recorded>,
}

#[derive(Default)]
struct Recorded {
    scripts: Vec<String>,
    fail: bool,
}

impl RecordingGcodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following `send_gcode` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail = fail;
    }

    /// Scripts received so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn last_script(&self) -> Option<String> {
        self.lock().scripts.last().cloned()
    }
}

impl GcodeSender for RecordingGcodeSender {
    fn send_gcode(&self, script: &str) -> Result<(), AppError> {
        let mut inner = self.lock();
        if inner.fail {
            return Err(AppError::Io("klippy not connected".to_string()));
        }
        inner.scripts.push(script.to_string());
        Ok(())
    }
}

// ── Notification helpers ─────────────────────────────────────────────────────

/// The status object of a `notify_status_update` notification.
///
/// Accepts either the full notification (`params[0]`) or a bare status
/// object as returned by `printer.objects.query`.
pub fn status_object(notification: &Value) -> Option<&Map<String, Value>> {
    match notification.get("params") {
        Some(Value::Array(params)) => params.first().and_then(Value::as_object),
        _ => notification.as_object(),
    }
}

/// `status[key]` as an object, if present and an object.
pub fn object_field<'a>(status: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    status.get(key).and_then(Value::as_object)
}

/// An integer field. `null`, missing and non-numeric values are `None`.
pub fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i32> {
    obj.get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
}

pub fn float_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

pub fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

pub fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Parse a tool designator such as `"T3"` or `"t3"`.
pub fn parse_tool_name(name: &str) -> Option<i32> {
    let digits = name.trim().strip_prefix(['T', 't'])?;
    digits.parse().ok().filter(|t: &i32| *t >= 0)
}

/// Detect a tool change in a G-code response or command line (`T2`,
/// `MMU_CHANGE_TOOL TOOL=2`, `CHANGE_TOOL ... TOOL=2`).
pub fn detect_tool_change(line: &str) -> Option<i32> {
    let line = line.trim();
    if let Some(tool) = parse_tool_name(line) {
        return Some(tool);
    }
    if !line.to_ascii_uppercase().contains("CHANGE_TOOL") {
        return None;
    }
    line.split_whitespace().find_map(|word| {
        let (key, value) = word.split_once('=')?;
        if key.eq_ignore_ascii_case("TOOL") {
            value.parse().ok()
        } else {
            None
        }
    })
}
