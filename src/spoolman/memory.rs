//! In-process spool database for mock mode and tests.
//!
//! Callbacks run synchronously on the calling thread. PATCH requests are
//! recorded and applied to the stored spools; failures can be injected per
//! request kind.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::{
    FilamentPatch, SpoolCallback, SpoolDatabase, SpoolId, SpoolInfo, SpoolmanError,
};

#[derive(Default)]
struct Inner {
    spools: BTreeMap<SpoolId, SpoolInfo>,
    weight_patches: Vec<(SpoolId, f64)>,
    filament_patches: Vec<(SpoolId, FilamentPatch)>,
    get_requests: Vec<SpoolId>,
    fail_weight: bool,
    fail_filament: bool,
}

#[derive(Default)]
pub struct MemorySpoolDatabase {
    inner: Mutex<Inner>,
}

impl MemorySpoolDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database seeded with a few spools (ids 1..=4, filaments 101..=104).
    pub fn with_demo_spools() -> Self {
        let db = Self::new();
        let demo = [
            (1, "Polymaker", "PLA", "E53935", 820.0),
            (2, "Prusament", "PETG", "1E88E5", 455.0),
            (3, "eSun", "ABS", "FDD835", 990.0),
            (4, "Sunlu", "TPU", "43A047", 120.0),
        ];
        for (id, vendor, material, color, remaining) in demo {
            db.insert_spool(SpoolInfo {
                id,
                filament_id: 100 + id,
                vendor: vendor.to_string(),
                material: material.to_string(),
                color_hex: color.to_string(),
                remaining_weight_g: remaining,
                initial_weight_g: 1000.0,
            });
        }
        db
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_spool(&self, spool: SpoolInfo) {
        self.lock().spools.insert(spool.id, spool);
    }

    pub fn spool(&self, id: SpoolId) -> Option<SpoolInfo> {
        self.lock().spools.get(&id).cloned()
    }

    pub fn fail_weight_patches(&self, fail: bool) {
        self.lock().fail_weight = fail;
    }

    pub fn fail_filament_patches(&self, fail: bool) {
        self.lock().fail_filament = fail;
    }

    /// Every weight PATCH received, in order.
    pub fn weight_patches(&self) -> Vec<(SpoolId, f64)> {
        self.lock().weight_patches.clone()
    }

    /// Every filament PATCH received, in order.
    pub fn filament_patches(&self) -> Vec<(SpoolId, FilamentPatch)> {
        self.lock().filament_patches.clone()
    }

    /// Ids requested through `get_spool`, in order.
    pub fn get_requests(&self) -> Vec<SpoolId> {
        self.lock().get_requests.clone()
    }
}

impl SpoolDatabase for MemorySpoolDatabase {
    fn get_spool(&self, id: SpoolId, done: SpoolCallback<SpoolInfo>) {
        let result = {
            let mut inner = self.lock();
            inner.get_requests.push(id);
            inner.spools.get(&id).cloned().ok_or(SpoolmanError::NotFound(id))
        };
        done(result);
    }

    fn patch_spool_weight(&self, id: SpoolId, remaining_g: f64, done: SpoolCallback<()>) {
        let result = {
            let mut inner = self.lock();
            inner.weight_patches.push((id, remaining_g));
            if inner.fail_weight {
                Err(SpoolmanError::Http {
                    status: 500,
                    message: "injected weight failure".to_string(),
                })
            } else {
                match inner.spools.get_mut(&id) {
                    Some(spool) => {
                        spool.remaining_weight_g = remaining_g;
                        Ok(())
                    }
                    None => Err(SpoolmanError::NotFound(id)),
                }
            }
        };
        done(result);
    }

    fn patch_filament(&self, filament_id: SpoolId, patch: FilamentPatch, done: SpoolCallback<()>) {
        let result = {
            let mut inner = self.lock();
            inner.filament_patches.push((filament_id, patch.clone()));
            if inner.fail_filament {
                Err(SpoolmanError::Http {
                    status: 500,
                    message: "injected filament failure".to_string(),
                })
            } else {
                for spool in inner.spools.values_mut() {
                    if spool.filament_id == filament_id {
                        spool.material = patch.material.clone();
                        spool.color_hex = patch.color_hex.clone();
                    }
                }
                Ok(())
            }
        };
        done(result);
    }
}
