//! Built-in read-only filament material table.
//!
//! [`find_material`] resolves a name case-insensitively and applies any user
//! override stored in [`MaterialSettings`]; [`database_defaults`] returns the
//! untouched entry.

use serde::Serialize;

use super::settings::{MaterialOverride, MaterialSettings};

/// One material preset.
///
/// Temperatures are in °C. `compat_group` groups materials that can share a
/// nozzle without purging issues (e.g. PLA and PLA-CF).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaterialInfo {
    pub name: &'static str,
    pub category: &'static str,
    pub nozzle_min: i32,
    pub nozzle_max: i32,
    pub bed_temp: i32,
    pub dry_temp: i32,
    pub density_g_cm3: f32,
    pub compat_group: &'static str,
}

impl MaterialInfo {
    /// Midpoint of the nozzle range, used as the default print temperature.
    pub fn nozzle_recommended(&self) -> i32 {
        (self.nozzle_min + self.nozzle_max) / 2
    }

    /// Copy with the fields present in `ovr` replaced.
    pub fn with_override(mut self, ovr: &MaterialOverride) -> Self {
        if let Some(v) = ovr.nozzle_min {
            self.nozzle_min = v;
        }
        if let Some(v) = ovr.nozzle_max {
            self.nozzle_max = v;
        }
        if let Some(v) = ovr.bed_temp {
            self.bed_temp = v;
        }
        self
    }
}

const fn material(
    name: &'static str,
    category: &'static str,
    nozzle: (i32, i32),
    bed_temp: i32,
    dry_temp: i32,
    density_g_cm3: f32,
    compat_group: &'static str,
) -> MaterialInfo {
    MaterialInfo {
        name,
        category,
        nozzle_min: nozzle.0,
        nozzle_max: nozzle.1,
        bed_temp,
        dry_temp,
        density_g_cm3,
        compat_group,
    }
}

/// The material table, in display order.
pub static MATERIALS: &[MaterialInfo] = &[
    material("PLA", "Standard", (190, 220), 60, 45, 1.24, "PLA"),
    material("PETG", "Standard", (230, 260), 80, 65, 1.27, "PETG"),
    material("ABS", "Engineering", (240, 270), 100, 80, 1.04, "ABS_ASA"),
    material("ASA", "Engineering", (240, 270), 100, 80, 1.07, "ABS_ASA"),
    material("TPU", "Flexible", (210, 240), 50, 50, 1.21, "TPU"),
    material("PA", "Engineering", (250, 290), 80, 80, 1.14, "PA"),
    material("PC", "Engineering", (260, 300), 110, 80, 1.20, "PC"),
    material("PVA", "Support", (185, 215), 60, 45, 1.23, "PVA"),
    material("HIPS", "Support", (230, 250), 100, 65, 1.04, "HIPS"),
    material("PLA-CF", "Composite", (200, 230), 60, 45, 1.29, "PLA"),
    material("PETG-CF", "Composite", (240, 270), 80, 65, 1.30, "PETG"),
    material("PA-CF", "Composite", (260, 300), 80, 80, 1.20, "PA"),
];

/// Unmodified database entry for `name` (case-insensitive).
pub fn database_defaults(name: &str) -> Option<MaterialInfo> {
    let name = name.trim();
    MATERIALS
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .copied()
}

/// Database entry for `name` with the user's override applied.
///
/// The override is looked up under the canonical database name.
pub fn find_material(name: &str, settings: &MaterialSettings) -> Option<MaterialInfo> {
    let info = database_defaults(name)?;
    Some(match settings.get(info.name) {
        Some(ovr) => info.with_override(ovr),
        None => info,
    })
}

/// All canonical material names.
pub fn material_names() -> impl Iterator<Item = &'static str> {
    MATERIALS.iter().map(|m| m.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;

    #[test]
    fn lookup_is_case_insensitive() {
        let pla = database_defaults("pla").expect("PLA in table");
        assert_eq!(pla.name, "PLA");
        assert_eq!(database_defaults(" PETG-cf ").map(|m| m.name), Some("PETG-CF"));
        assert!(database_defaults("unobtainium").is_none());
    }

    #[test]
    fn table_defaults_are_sane() {
        for m in MATERIALS {
            assert!(m.nozzle_min < m.nozzle_max, "{}", m.name);
            assert!(m.bed_temp > 0, "{}", m.name);
        }
        let petg = database_defaults("PETG").expect("PETG");
        assert_eq!((petg.nozzle_min, petg.nozzle_max, petg.bed_temp), (230, 260, 80));
    }

    #[test]
    fn find_material_without_override_returns_defaults() {
        let settings = MaterialSettings::new();
        let pla = find_material("PLA", &settings).expect("PLA");
        assert_eq!((pla.nozzle_min, pla.nozzle_max, pla.bed_temp), (190, 220, 60));
        assert_eq!(pla.nozzle_recommended(), 205);
    }

    #[test]
    fn find_material_applies_bed_override_only() {
        let mut config = ConfigStore::in_memory();
        let mut settings = MaterialSettings::new();
        settings.set(
            "PLA",
            MaterialOverride {
                bed_temp: Some(55),
                ..Default::default()
            },
            &mut config,
        );

        let pla = find_material("pla", &settings).expect("PLA");
        assert_eq!(pla.nozzle_min, 190);
        assert_eq!(pla.nozzle_max, 220);
        assert_eq!(pla.bed_temp, 55);
        assert_eq!(pla.category, "Standard");
        assert_eq!(pla.dry_temp, 45);
        assert_eq!(pla.compat_group, "PLA");
    }

    #[test]
    fn find_material_applies_nozzle_override() {
        let mut config = ConfigStore::in_memory();
        let mut settings = MaterialSettings::new();
        settings.set(
            "PLA",
            MaterialOverride {
                nozzle_min: Some(195),
                nozzle_max: Some(215),
                bed_temp: None,
            },
            &mut config,
        );

        let pla = find_material("PLA", &settings).expect("PLA");
        assert_eq!((pla.nozzle_min, pla.nozzle_max, pla.bed_temp), (195, 215, 60));

        settings.clear("PLA", &mut config);
        let pla = find_material("PLA", &settings).expect("PLA");
        assert_eq!((pla.nozzle_min, pla.nozzle_max), (190, 220));
    }

    #[test]
    fn override_keys_are_case_sensitive() {
        let mut config = ConfigStore::in_memory();
        let mut settings = MaterialSettings::new();
        settings.set(
            "pla",
            MaterialOverride {
                bed_temp: Some(40),
                ..Default::default()
            },
            &mut config,
        );
        assert_eq!(find_material("PLA", &settings).map(|m| m.bed_temp), Some(60));
    }
}
