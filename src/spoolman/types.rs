//! Spool database (Spoolman) records, errors and the collaborator trait.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Spoolman spool or filament id. `0` means "not linked".
pub type SpoolId = i32;

/// Errors reported by a [`SpoolDatabase`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpoolmanError {
    #[error("spool {0} not found")]
    NotFound(SpoolId),

    #[error("spoolman returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("spoolman request failed: {0}")]
    Transport(String),

    #[error("unexpected spoolman response: {0}")]
    Parse(String),
}

/// The subset of a Spoolman spool the engine uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpoolInfo {
    pub id: SpoolId,
    pub filament_id: SpoolId,
    pub vendor: String,
    pub material: String,
    /// `RRGGBB`, no `#`.
    pub color_hex: String,
    pub remaining_weight_g: f64,
    pub initial_weight_g: f64,
}

// ── Spoolman REST shapes ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawVendor {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct RawFilament {
    id: SpoolId,
    #[serde(default)]
    vendor: Option<RawVendor>,
    #[serde(default)]
    material: Option<String>,
    #[serde(default)]
    color_hex: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Deserialize)]
struct RawSpool {
    id: SpoolId,
    filament: RawFilament,
    #[serde(default)]
    remaining_weight: Option<f64>,
    #[serde(default)]
    initial_weight: Option<f64>,
}

impl SpoolInfo {
    /// Parse a `GET /api/v1/spool/<id>` response body.
    ///
    /// `initial_weight` falls back to the filament's nominal weight.
    pub fn from_spoolman_json(value: &Value) -> Result<Self, SpoolmanError> {
        let raw = RawSpool::deserialize(value).map_err(|e| SpoolmanError::Parse(e.to_string()))?;
        Ok(Self {
            id: raw.id,
            filament_id: raw.filament.id,
            vendor: raw.filament.vendor.map(|v| v.name).unwrap_or_default(),
            material: raw.filament.material.unwrap_or_default(),
            color_hex: raw
                .filament
                .color_hex
                .map(|c| c.trim_start_matches('#').to_ascii_uppercase())
                .unwrap_or_default(),
            remaining_weight_g: raw.remaining_weight.unwrap_or(0.0),
            initial_weight_g: raw
                .initial_weight
                .or(raw.filament.weight)
                .unwrap_or(0.0),
        })
    }

    /// Packed 24-bit colour, if `color_hex` is valid.
    pub fn color_rgb(&self) -> Option<u32> {
        hex_to_rgb(&self.color_hex)
    }
}

/// Body of a `PATCH /api/v1/filament/<id>` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilamentPatch {
    pub material: String,
    pub color_hex: String,
}

/// Completion callback; may be invoked on any thread.
pub type SpoolCallback<T> = Box<dyn FnOnce(Result<T, SpoolmanError>) + Send + 'static>;

/// The external spool inventory service.
///
/// Implementations perform the request asynchronously and invoke the
/// callback exactly once. Callers marshal results onto the UI thread
/// themselves.
pub trait SpoolDatabase: Send + Sync {
    fn get_spool(&self, id: SpoolId, done: SpoolCallback<SpoolInfo>);

    fn patch_spool_weight(&self, id: SpoolId, remaining_g: f64, done: SpoolCallback<()>);

    fn patch_filament(&self, filament_id: SpoolId, patch: FilamentPatch, done: SpoolCallback<()>);
}

/// 24-bit RGB as uppercase `RRGGBB` (bits above 24 are ignored).
pub fn rgb_to_hex(rgb: u32) -> String {
    format!("{:06X}", rgb & 0x00FF_FFFF)
}

/// Parse `RRGGBB` or `#RRGGBB` (either case).
pub fn hex_to_rgb(hex: &str) -> Option<u32> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
