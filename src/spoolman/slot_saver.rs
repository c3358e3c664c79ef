//! Persist slot edits back to Spoolman.
//!
//! Filament-level edits (brand, material, colour) PATCH the filament record;
//! spool-level edits (remaining weight) PATCH the spool. When both changed
//! the filament goes first and the weight only follows on success.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::types::{rgb_to_hex, FilamentPatch, SpoolDatabase, SpoolId, SpoolmanError};
use crate::ams::SlotInfo;
use crate::error::AppError;
use crate::state::AppContext;
use crate::ui_queue::UiHandle;

/// Weight changes at or below this many grams are noise.
pub const WEIGHT_THRESHOLD_G: f64 = 0.1;

/// What an edit touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub filament_level: bool,
    pub spool_level: bool,
}

impl ChangeSet {
    pub fn any(&self) -> bool {
        self.filament_level || self.spool_level
    }
}

pub fn detect_changes(original: &SlotInfo, edited: &SlotInfo) -> ChangeSet {
    ChangeSet {
        filament_level: original.brand != edited.brand
            || original.material != edited.material
            || original.color_rgb != edited.color_rgb,
        spool_level: (edited.remaining_weight_g - original.remaining_weight_g).abs()
            > WEIGHT_THRESHOLD_G,
    }
}

type Finish = Box<dyn FnOnce(Result<(), AppError>) + Send + 'static>;

pub struct SpoolmanSlotSaver {
    db: Arc<dyn SpoolDatabase>,
    ui: UiHandle,
}

impl SpoolmanSlotSaver {
    pub fn new(db: Arc<dyn SpoolDatabase>, ui: UiHandle) -> Self {
        Self { db, ui }
    }

    /// Save `edited` over `original`. `done` always runs on the UI thread,
    /// exactly once.
    pub fn save<F>(&self, original: &SlotInfo, edited: &SlotInfo, done: F)
    where
        F: FnOnce(&mut AppContext, Result<(), AppError>) + Send + 'static,
    {
        let ui = self.ui.clone();
        let finish: Finish = Box::new(move |result| {
            if let Err(e) = ui.post(move |ctx| done(ctx, result)) {
                warn!(error = %e, "dropping slot save completion");
            }
        });

        let changes = detect_changes(original, edited);
        if edited.spoolman_id == 0 || !changes.any() {
            debug!(gate = edited.gate_index, "nothing to save to Spoolman");
            finish(Ok(()));
            return;
        }

        let spool_id = edited.spoolman_id;
        let weight = changes.spool_level.then_some(edited.remaining_weight_g);

        if !changes.filament_level {
            patch_weight(&self.db, spool_id, edited.remaining_weight_g, finish);
            return;
        }

        let filament_id = edited.spoolman_filament_id;
        if filament_id == 0 {
            error!(spool = spool_id, "cannot update filament: slot has no filament id");
            finish(Err(AppError::Spoolman(format!(
                "spool {spool_id} has no filament id"
            ))));
            return;
        }

        let patch = FilamentPatch {
            material: edited.material.clone(),
            color_hex: rgb_to_hex(edited.color_rgb),
        };
        let db = Arc::clone(&self.db);
        self.db.patch_filament(
            filament_id,
            patch,
            Box::new(move |result: Result<(), SpoolmanError>| match result {
                Err(e) => {
                    error!(filament = filament_id, error = %e, "Spoolman filament update failed");
                    finish(Err(e.into()));
                }
                Ok(()) => {
                    info!(filament = filament_id, "Spoolman filament updated");
                    match weight {
                        Some(grams) => patch_weight(&db, spool_id, grams, finish),
                        None => finish(Ok(())),
                    }
                }
            }),
        );
    }
}

fn patch_weight(db: &Arc<dyn SpoolDatabase>, spool_id: SpoolId, grams: f64, finish: Finish) {
    db.patch_spool_weight(
        spool_id,
        grams,
        Box::new(move |result: Result<(), SpoolmanError>| match result {
            Ok(()) => {
                info!(spool = spool_id, grams, "Spoolman spool weight updated");
                finish(Ok(()));
            }
            Err(e) => {
                error!(spool = spool_id, error = %e, "Spoolman spool weight update failed");
                finish(Err(e.into()));
            }
        }),
    );
}
