//! Application context owned by the UI thread.
//!
//! [`AppContext`] is the service container every UI task receives. It owns
//! the config document, the runtime snapshot, material overrides, the AMS
//! engine and the optional Spoolman connection. Nothing in it is shared
//! across threads; other threads reach it only through the [`UiHandle`].

use std::sync::Arc;

use tracing::info;

use crate::ams::backend::{Backend, MockBackend};
use crate::ams::AmsState;
use crate::config::{ConfigStore, InputSettings, RuntimeConfig};
use crate::error::AppError;
use crate::geometry::GeometryBudgetManager;
use crate::material::{find_material, MaterialInfo, MaterialOverride, MaterialSettings};
use crate::spoolman::{SpoolDatabase, SpoolmanSlotSaver};
use crate::ui_queue::UiHandle;

pub struct AppContext {
    /// Sender for the queue this context is drained from.
    pub ui: UiHandle,
    pub config: ConfigStore,
    pub runtime: RuntimeConfig,
    pub materials: MaterialSettings,
    pub ams: AmsState,
    /// `None` until a Spoolman connection is configured.
    pub spoolman: Option<Arc<dyn SpoolDatabase>>,
    pub budget: GeometryBudgetManager,
}

impl AppContext {
    /// Wire up the services. Material overrides are loaded from `config`.
    pub fn new(ui: UiHandle, config: ConfigStore, runtime: RuntimeConfig) -> Self {
        let mut materials = MaterialSettings::new();
        materials.init(&config);
        Self {
            ui,
            config,
            runtime,
            materials,
            ams: AmsState::new(),
            spoolman: None,
            budget: GeometryBudgetManager::new(),
        }
    }

    /// A context with an unsaved, empty config and default runtime settings.
    pub fn in_memory(ui: UiHandle) -> Self {
        Self::new(ui, ConfigStore::in_memory(), RuntimeConfig::default())
    }

    pub fn input_settings(&self) -> InputSettings {
        InputSettings::from_config(&self.config, &self.runtime)
    }

    /// Attach a simulated AMS with `gates` gates and publish its state.
    pub fn attach_mock_ams(&mut self, gates: usize) {
        info!(gates, "attaching mock AMS backend");
        let ui = self.ui.clone();
        self.ams
            .set_backend(Some(Backend::Mock(MockBackend::new(gates))), &ui);
    }

    /// Detach whatever backend is attached and stop Spoolman polling.
    pub fn detach_ams(&mut self) {
        while self.ams.is_spoolman_polling() {
            self.ams.stop_spoolman_polling();
        }
        let ui = self.ui.clone();
        self.ams.set_backend(None, &ui);
    }

    /// Connect a spool database and start refreshing slot weights from it.
    pub fn enable_spoolman(&mut self, db: Arc<dyn SpoolDatabase>) {
        let ui = self.ui.clone();
        self.ams.start_spoolman_polling(Arc::clone(&db), &ui);
        self.spoolman = Some(db);
    }

    /// A saver for slot edits, if Spoolman is connected.
    pub fn slot_saver(&self) -> Option<SpoolmanSlotSaver> {
        self.spoolman
            .as_ref()
            .map(|db| SpoolmanSlotSaver::new(Arc::clone(db), self.ui.clone()))
    }

    /// Look up a material with the user's overrides applied.
    pub fn material(&self, name: &str) -> Option<MaterialInfo> {
        find_material(name, &self.materials)
    }

    /// Store an override and persist the config document.
    pub fn set_material_override(
        &mut self,
        name: &str,
        ovr: MaterialOverride,
    ) -> Result<(), AppError> {
        self.materials.set(name, ovr, &mut self.config);
        self.config.save()
    }

    /// Remove an override and persist the config document.
    pub fn clear_material_override(&mut self, name: &str) -> Result<(), AppError> {
        self.materials.clear(name, &mut self.config);
        self.config.save()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config.path())
            .field("runtime", &self.runtime)
            .field("ams_available", &self.ams.is_available())
            .field("spoolman", &self.spoolman.is_some())
            .finish()
    }
}
