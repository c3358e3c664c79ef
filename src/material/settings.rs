//! Sparse per-material temperature overrides.
//!
//! Stored under `/material_overrides` in the config document as
//! `{ "<name>": { "nozzle_min"?: int, "nozzle_max"?: int, "bed_temp"?: int } }`.
//! Only fields present on an override are written. Keys are case-sensitive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ConfigStore;

/// JSON pointer of the override map in the config document.
pub const OVERRIDES_POINTER: &str = "/material_overrides";

/// User override for one material; `None` means "use the database default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nozzle_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nozzle_max: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed_temp: Option<i32>,
}

impl MaterialOverride {
    pub fn is_empty(&self) -> bool {
        self.nozzle_min.is_none() && self.nozzle_max.is_none() && self.bed_temp.is_none()
    }

    /// Build from a JSON object, keeping only integer fields that fit `i32`.
    fn from_json(values: &Map<String, Value>) -> Self {
        let int = |key: &str| {
            values
                .get(key)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
        };
        Self {
            nozzle_min: int("nozzle_min"),
            nozzle_max: int("nozzle_max"),
            bed_temp: int("bed_temp"),
        }
    }
}

/// The override store. Owned by the application context.
#[derive(Debug, Clone, Default)]
pub struct MaterialSettings {
    overrides: HashMap<String, MaterialOverride>,
    initialized: bool,
}

impl MaterialSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `config`. Calling it again is a no-op.
    pub fn init(&mut self, config: &ConfigStore) {
        if self.initialized {
            return;
        }
        self.load_from_config(config);
        self.initialized = true;
        tracing::info!("material settings initialized with {} override(s)", self.overrides.len());
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn get(&self, name: &str) -> Option<&MaterialOverride> {
        self.overrides.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.overrides.contains_key(name)
    }

    /// Insert or replace the override for `name` and persist.
    pub fn set(&mut self, name: &str, ovr: MaterialOverride, config: &mut ConfigStore) {
        self.overrides.insert(name.to_string(), ovr);
        self.save_to_config(config);
        tracing::info!("set material override for '{name}'");
    }

    /// Remove the override for `name`; persists only if one existed.
    pub fn clear(&mut self, name: &str, config: &mut ConfigStore) {
        if self.overrides.remove(name).is_some() {
            self.save_to_config(config);
            tracing::info!("cleared material override for '{name}'");
        }
    }

    /// Read-only view of every override.
    pub fn all(&self) -> &HashMap<String, MaterialOverride> {
        &self.overrides
    }

    fn load_from_config(&mut self, config: &ConfigStore) {
        let Some(value) = config.get(OVERRIDES_POINTER) else {
            return;
        };
        let Some(entries) = value.as_object() else {
            tracing::warn!("{OVERRIDES_POINTER} is not an object, ignoring");
            return;
        };

        for (name, values) in entries {
            match values.as_object() {
                Some(obj) => {
                    self.overrides
                        .insert(name.clone(), MaterialOverride::from_json(obj));
                }
                None => tracing::warn!("material override '{name}' is not an object, skipping"),
            }
        }
    }

    /// Write the whole map back. Failures are logged; memory state is kept.
    fn save_to_config(&self, config: &mut ConfigStore) {
        let map: Map<String, Value> = self
            .overrides
            .iter()
            .map(|(name, ovr)| {
                let entry = serde_json::to_value(ovr).unwrap_or_else(|_| Value::Object(Map::new()));
                (name.clone(), entry)
            })
            .collect();
        config.set(OVERRIDES_POINTER, Value::Object(map));

        if let Err(e) = config.save() {
            tracing::warn!("failed to save material overrides: {e}");
        }
    }
}
