//! The host config document (`helixconfig.json`).
//!
//! # Load
//! A missing file yields an empty object. An unreadable or malformed file
//! also yields an empty object, with a warning: read errors never stop the
//! application from starting.
//!
//! # Save
//! 1. Serialize the whole document as pretty JSON.
//! 2. Write it to `<target>.tmp` in the same directory (same filesystem).
//! 3. Atomically rename the temp file over the target.
//! On any failure the temp file is deleted and the original is left intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;

/// File name of the config document inside the config directory.
const CONFIG_FILE_NAME: &str = "helixconfig.json";

/// Default location: `<config_dir>/helixscreen/helixconfig.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_default()
        .join("helixscreen")
        .join(CONFIG_FILE_NAME)
}

/// Mutable JSON document addressed by JSON-pointer paths.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    /// Backing file; `None` for in-memory stores (saves are no-ops).
    path: Option<PathBuf>,
    doc: Value,
}

impl ConfigStore {
    /// Load the document at `path`, degrading to an empty object on error.
    pub fn load(path: &Path) -> Self {
        let doc = match read_document(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tracing::info!("config {} not found, starting empty", path.display());
                Value::Object(Map::new())
            }
            Err(e) => {
                tracing::warn!("config {} unusable, starting empty: {e}", path.display());
                Value::Object(Map::new())
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            doc,
        }
    }

    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// An in-memory store seeded with `doc`. Non-object roots are replaced by
    /// an empty object.
    pub fn from_value(doc: Value) -> Self {
        let doc = if doc.is_object() {
            doc
        } else {
            Value::Object(Map::new())
        };
        Self { path: None, doc }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The whole document.
    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// Value at `pointer` (e.g. `"/input/scroll_throw"`), if present.
    pub fn get(&self, pointer: &str) -> Option<&Value> {
        self.doc.pointer(pointer)
    }

    pub fn exists(&self, pointer: &str) -> bool {
        self.get(pointer).is_some()
    }

    /// Deserialize the value at `pointer`, or `default` when it is missing or
    /// has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, pointer: &str, default: T) -> T {
        match self.get(pointer) {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or(default),
            None => default,
        }
    }

    /// Integer at `pointer`, or `default` when missing or not an integer.
    pub fn get_i64(&self, pointer: &str, default: i64) -> i64 {
        self.get(pointer).and_then(Value::as_i64).unwrap_or(default)
    }

    /// Boolean at `pointer`, or `default` when missing or not a boolean.
    pub fn get_bool(&self, pointer: &str, default: bool) -> bool {
        self.get(pointer).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Store `value` at `pointer`, creating intermediate objects.
    ///
    /// Intermediate values that are not objects are replaced. The empty
    /// pointer replaces the whole document (only when `value` is an object).
    pub fn set(&mut self, pointer: &str, value: Value) {
        let tokens = pointer_tokens(pointer);
        let Some((last, parents)) = tokens.split_last() else {
            if value.is_object() {
                self.doc = value;
            }
            return;
        };

        let mut node = &mut self.doc;
        for token in parents {
            node = object_mut(node)
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        object_mut(node).insert(last.clone(), value);
    }

    /// Remove the value at `pointer`. Returns the removed value, if any.
    pub fn remove(&mut self, pointer: &str) -> Option<Value> {
        let tokens = pointer_tokens(pointer);
        let (last, parents) = tokens.split_last()?;
        let mut node = &mut self.doc;
        for token in parents {
            node = node.as_object_mut()?.get_mut(token)?;
        }
        node.as_object_mut()?.remove(last)
    }

    /// Persist the document with a temp-file + rename.
    pub fn save(&self) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    AppError::ConfigSave(format!("cannot create config directory: {e}"))
                })?;
            }
        }

        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

        if let Err(e) = write_document(&self.doc, &tmp_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            AppError::ConfigSave(format!("rename to final path failed: {e}"))
        })
    }
}

/// Read and parse `path`. `Ok(None)` when the file does not exist.
fn read_document(path: &Path) -> Result<Option<Value>, AppError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AppError::ConfigLoad(format!("cannot read config: {e}"))),
    };

    let doc: Value = serde_json::from_str(&text)
        .map_err(|e| AppError::ConfigLoad(format!("cannot parse config: {e}")))?;
    if !doc.is_object() {
        return Err(AppError::ConfigLoad("config root is not an object".to_string()));
    }
    Ok(Some(doc))
}

/// Write `doc` to `path` (the temp file location) and flush it to disk.
fn write_document(doc: &Value, path: &Path) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| AppError::ConfigSave(format!("cannot serialize config: {e}")))?;

    let mut file = std::fs::File::create(path)
        .map_err(|e| AppError::ConfigSave(format!("cannot create temp file: {e}")))?;
    file.write_all(json.as_bytes())
        .map_err(|e| AppError::ConfigSave(format!("cannot write config: {e}")))?;
    file.sync_all()
        .map_err(|e| AppError::ConfigSave(format!("cannot flush config: {e}")))?;
    Ok(())
}

/// Split a JSON pointer into unescaped reference tokens.
fn pointer_tokens(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Coerce `node` into an object and return its map.
fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    match node {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            object_mut(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_loads_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load(&dir.path().join("helixconfig.json"));
        assert_eq!(store.document(), &json!({}));
    }

    #[test]
    fn malformed_file_degrades_to_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("helixconfig.json");
        std::fs::write(&path, "{ not json").expect("write");

        let store = ConfigStore::load(&path);
        assert_eq!(store.document(), &json!({}));
    }

    #[test]
    fn non_object_root_degrades_to_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("helixconfig.json");
        std::fs::write(&path, "[1, 2, 3]").expect("write");

        let store = ConfigStore::load(&path);
        assert_eq!(store.document(), &json!({}));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut store = ConfigStore::in_memory();
        store.set("/input/scroll_throw", json!(40));
        assert_eq!(store.get_i64("/input/scroll_throw", 25), 40);
        assert_eq!(store.document(), &json!({ "input": { "scroll_throw": 40 } }));
    }

    #[test]
    fn set_replaces_non_object_intermediate() {
        let mut store = ConfigStore::from_value(json!({ "input": 3 }));
        store.set("/input/scroll_limit", json!(12));
        assert_eq!(store.get_i64("/input/scroll_limit", 10), 12);
    }

    #[test]
    fn pointer_tokens_are_unescaped() {
        let mut store = ConfigStore::in_memory();
        store.set("/material_overrides/PLA~1PHA", json!({ "bed_temp": 55 }));
        assert!(store.document()["material_overrides"]["PLA/PHA"].is_object());
        assert!(store.exists("/material_overrides/PLA~1PHA/bed_temp"));
    }

    #[test]
    fn typed_getters_fall_back_to_default() {
        let store = ConfigStore::from_value(json!({ "touch_calibrated": "yes", "n": 1.5 }));
        assert!(!store.get_bool("/touch_calibrated", false));
        assert_eq!(store.get_i64("/n", 7), 7);
        assert_eq!(store.get_i64("/absent", 3), 3);
    }

    #[test]
    fn get_or_deserializes_or_falls_back() {
        let store = ConfigStore::from_value(json!({ "theme": "dark", "n": "x" }));
        assert_eq!(store.get_or("/theme", String::from("light")), "dark");
        assert_eq!(store.get_or("/n", 4u32), 4);
        assert_eq!(store.get_or("/missing", 1.5f64), 1.5);
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut store = ConfigStore::from_value(json!({ "a": { "b": 1 } }));
        assert_eq!(store.remove("/a/b"), Some(json!(1)));
        assert_eq!(store.remove("/a/b"), None);
        assert_eq!(store.remove("/x/y"), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("helixconfig.json");

        let mut store = ConfigStore::load(&path);
        store.set("/touch_calibrated", json!(true));
        store.set("/input/jitter_threshold", json!(8));
        store.save().expect("save should succeed");

        let reloaded = ConfigStore::load(&path);
        assert!(reloaded.get_bool("/touch_calibrated", false));
        assert_eq!(reloaded.get_i64("/input/jitter_threshold", 5), 8);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("helixconfig.json");

        let store = ConfigStore::load(&path);
        store.save().expect("save should succeed");

        assert!(path.exists());
        assert!(!dir.path().join("helixconfig.json.tmp").exists());
    }

    #[test]
    fn in_memory_save_is_a_no_op() {
        let store = ConfigStore::in_memory();
        assert!(store.path().is_none());
        store.save().expect("in-memory save should succeed");
    }
}
