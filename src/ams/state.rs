//! The AMS state engine.
//!
//! Owns the attached backend and publishes its state through subjects.
//! Everything here runs on the UI thread; backend events and Spoolman
//! replies reach it through the UI queue.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{Backend, BackendError, BackendEvent, EventSink};
use super::types::{
    AmsAction, AmsSystemInfo, AmsType, GateStatus, PathSegment, PathTopology, SlotInfo,
    DEFAULT_GATE_COLOR, GATE_BYPASS, MAX_GATES,
};
use crate::error::AppError;
use crate::spoolman::{SpoolDatabase, SpoolInfo, SpoolmanError};
use crate::subject::{IntSubject, StringSubject};
use crate::ui_queue::UiHandle;

/// How often slot weights are refreshed from Spoolman while polling.
pub const SPOOLMAN_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct AmsState {
    backend: Option<Backend>,

    ams_type: IntSubject,
    action: IntSubject,
    action_detail: StringSubject,
    current_gate: IntSubject,
    current_tool: IntSubject,
    filament_loaded: IntSubject,
    bypass_active: IntSubject,
    gate_count: IntSubject,
    gates_version: IntSubject,

    path_topology: IntSubject,
    path_active_gate: IntSubject,
    path_filament_segment: IntSubject,
    path_error_segment: IntSubject,
    path_anim_progress: IntSubject,

    toolchange_visible: IntSubject,
    toolchange_text: StringSubject,

    gate_colors: Vec<IntSubject>,
    gate_statuses: Vec<IntSubject>,

    spoolman_poll_refs: u32,
    spoolman_poll_task: Option<JoinHandle<()>>,
}

fn color_subject_value(rgb: u32) -> i32 {
    (rgb & 0x00FF_FFFF) as i32
}

impl AmsState {
    pub fn new() -> Self {
        let default_color = color_subject_value(DEFAULT_GATE_COLOR);
        let gate_colors = (0..MAX_GATES)
            .map(|i| IntSubject::new(format!("ams_gate_{i}_color"), default_color))
            .collect();
        let gate_statuses = (0..MAX_GATES)
            .map(|i| IntSubject::new(format!("ams_gate_{i}_status"), GateStatus::Unknown as i32))
            .collect();

        Self {
            backend: None,
            ams_type: IntSubject::new("ams_type", 0),
            action: IntSubject::new("ams_action", AmsAction::Idle as i32),
            action_detail: StringSubject::new("ams_action_detail", String::new()),
            current_gate: IntSubject::new("ams_current_gate", -1),
            current_tool: IntSubject::new("ams_current_tool", -1),
            filament_loaded: IntSubject::new("ams_filament_loaded", 0),
            bypass_active: IntSubject::new("ams_bypass_active", 0),
            gate_count: IntSubject::new("ams_gate_count", 0),
            gates_version: IntSubject::new("ams_gates_version", 0),
            path_topology: IntSubject::new("ams_path_topology", PathTopology::Hub as i32),
            path_active_gate: IntSubject::new("ams_path_active_gate", -1),
            path_filament_segment: IntSubject::new("ams_path_filament_segment", 0),
            path_error_segment: IntSubject::new("ams_path_error_segment", 0),
            path_anim_progress: IntSubject::new("ams_path_anim_progress", 0),
            toolchange_visible: IntSubject::new("ams_toolchange_visible", 0),
            toolchange_text: StringSubject::new("ams_toolchange_text", String::new()),
            gate_colors,
            gate_statuses,
            spoolman_poll_refs: 0,
            spoolman_poll_task: None,
        }
    }

    // ── Backend ownership ────────────────────────────────────────────────────

    /// Replace the backend. The old one is stopped; the new one gets an
    /// event sink that posts onto `ui` and is started. Subjects are resynced
    /// either way, so detaching resets them to defaults.
    pub fn set_backend(&mut self, backend: Option<Backend>, ui: &UiHandle) {
        if let Some(mut old) = self.backend.take() {
            old.set_event_sink(None);
            old.stop();
            info!(kind = old.ams_type().as_str(), "AMS backend detached");
        }

        if let Some(mut backend) = backend {
            backend.set_event_sink(Some(ui_event_sink(ui.clone())));
            if let Err(e) = backend.start() {
                warn!(error = %e, "AMS backend failed to start");
            }
            info!(kind = backend.ams_type().as_str(), "AMS backend attached");
            self.backend = Some(backend);
        }

        self.sync_from_backend();
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut Backend> {
        self.backend.as_mut()
    }

    /// Run an operation on the attached backend.
    pub fn with_backend<T>(
        &mut self,
        op: impl FnOnce(&mut Backend) -> Result<T, BackendError>,
    ) -> Result<T, AppError> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| AppError::Backend("no AMS backend attached".to_string()))?;
        op(backend).map_err(AppError::from)
    }

    /// A backend is attached and reports a real system type.
    pub fn is_available(&self) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|b| b.ams_type() != AmsType::None)
    }

    /// Forward a Moonraker status notification to the backend.
    pub fn handle_status_update(&mut self, status: &Value) -> bool {
        match self.backend.as_mut() {
            Some(backend) => backend.handle_status_update(status),
            None => false,
        }
    }

    /// Forward one line of G-code console output to the backend.
    ///
    /// A recognised tool change is reported back as `ToolChanged`, which
    /// reaches the subjects on the next queue drain.
    pub fn handle_gcode_response(&mut self, line: &str) -> bool {
        match self.backend.as_mut() {
            Some(backend) => backend.handle_gcode_response(line),
            None => false,
        }
    }

    // ── Synchronisation ──────────────────────────────────────────────────────

    /// Re-snapshot the backend into every subject and bump `gates_version`.
    pub fn sync_from_backend(&self) {
        let (info, topology, segment, error_segment) = match &self.backend {
            Some(b) => (
                b.system_info(),
                b.topology(),
                b.filament_segment(),
                b.infer_error_segment(),
            ),
            None => (
                AmsSystemInfo::default(),
                PathTopology::Hub,
                PathSegment::None,
                PathSegment::None,
            ),
        };

        self.ams_type.set(info.ams_type as i32);
        self.action.set(info.action as i32);
        let detail = if info.operation_detail.is_empty() {
            info.action.as_str().to_string()
        } else {
            info.operation_detail.clone()
        };
        self.action_detail.set(detail);
        self.current_gate.set(info.current_gate);
        self.current_tool.set(info.current_tool);
        self.filament_loaded.set_bool(info.filament_loaded);
        self.bypass_active.set_bool(info.current_gate == GATE_BYPASS);
        self.gate_count.set(info.total_gates);

        self.path_topology.set(topology as i32);
        self.path_active_gate.set(info.current_gate);
        self.path_filament_segment.set(segment as i32);
        self.path_error_segment.set(error_segment as i32);

        self.sync_toolchange(&info);

        let synced = usize::try_from(info.total_gates).unwrap_or(0).min(MAX_GATES);
        for (i, gate) in info.gates.iter().take(synced).enumerate() {
            self.gate_colors[i].set(color_subject_value(gate.color_rgb));
            self.gate_statuses[i].set(gate.status as i32);
        }
        for i in synced.min(info.gates.len())..MAX_GATES {
            self.gate_colors[i].set(color_subject_value(DEFAULT_GATE_COLOR));
            self.gate_statuses[i].set(GateStatus::Unknown as i32);
        }

        let version = self.gates_version.bump();
        debug!(
            gates = info.total_gates,
            action = info.action.as_str(),
            version,
            "AMS state synced"
        );
    }

    fn sync_toolchange(&self, info: &AmsSystemInfo) {
        let total = info.number_of_toolchanges;
        if total > 0 {
            let current = info.current_toolchange.max(-1) + 1;
            self.toolchange_visible.set(1);
            self.toolchange_text.set(format!("{current} / {total}"));
        } else {
            self.toolchange_visible.set(0);
            self.toolchange_text.set(String::new());
        }
    }

    /// Re-read one gate and bump `gates_version`. Out-of-range gates are
    /// ignored.
    pub fn update_gate(&self, gate_index: i32) {
        let Some(backend) = &self.backend else {
            return;
        };
        let index = match usize::try_from(gate_index) {
            Ok(i) if i < MAX_GATES => i,
            _ => {
                debug!(gate_index, "ignoring gate update outside subject range");
                return;
            }
        };
        let gate = backend.gate_info(gate_index);
        if !gate.is_valid() {
            debug!(gate_index, "ignoring gate update for unknown gate");
            return;
        }
        self.gate_colors[index].set(color_subject_value(gate.color_rgb));
        self.gate_statuses[index].set(gate.status as i32);
        self.gates_version.bump();
    }

    /// Dispatch a backend event (UI thread).
    pub fn handle_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::GateChanged(index) => self.update_gate(index),
            BackendEvent::StateChanged
            | BackendEvent::LoadComplete
            | BackendEvent::UnloadComplete
            | BackendEvent::ToolChanged => self.sync_from_backend(),
            BackendEvent::Error(message) => {
                warn!(%message, "AMS error");
                self.sync_from_backend();
            }
            BackendEvent::AttentionRequired(message) => {
                warn!(%message, "AMS needs attention");
                self.sync_from_backend();
            }
        }
    }

    // ── Host-side setters and predicates ─────────────────────────────────────

    /// Override the published action (hosts and tests).
    pub fn set_action(&self, action: AmsAction) {
        self.action.set(action as i32);
    }

    pub fn current_action(&self) -> AmsAction {
        AmsAction::from_i32(self.action.get()).unwrap_or_default()
    }

    /// Filament is physically moving (Loading, Unloading or Selecting).
    ///
    /// Stationary phases such as heating, cutting or an error return
    /// `false` so sensor alerts raised during them are still shown.
    pub fn is_filament_operation_active(&self) -> bool {
        matches!(
            self.current_action(),
            AmsAction::Loading | AmsAction::Unloading | AmsAction::Selecting
        )
    }

    // ── Spoolman weights ─────────────────────────────────────────────────────

    /// Distinct Spoolman ids referenced by the current slots.
    pub fn linked_spool_ids(&self) -> BTreeSet<i32> {
        let Some(backend) = &self.backend else {
            return BTreeSet::new();
        };
        let total = backend.system_info().total_gates;
        (0..total)
            .map(|g| backend.slot_info(g).spoolman_id)
            .filter(|id| *id > 0)
            .collect()
    }

    /// Ask Spoolman for every linked spool; replies are applied on the UI
    /// thread through `ui`.
    pub fn refresh_spoolman_weights(&self, db: &Arc<dyn SpoolDatabase>, ui: &UiHandle) {
        let ids = self.linked_spool_ids();
        if ids.is_empty() {
            debug!("no Spoolman-linked slots to refresh");
            return;
        }
        debug!(count = ids.len(), "refreshing Spoolman weights");
        for id in ids {
            let ui = ui.clone();
            db.get_spool(
                id,
                Box::new(move |result: Result<SpoolInfo, SpoolmanError>| match result {
                    Ok(spool) => {
                        let posted = ui.post(move |ctx| {
                            ctx.ams.apply_spool_weights(
                                spool.id,
                                spool.remaining_weight_g,
                                spool.initial_weight_g,
                            );
                        });
                        if let Err(e) = posted {
                            warn!(error = %e, spool = id, "dropping Spoolman weight update");
                        }
                    }
                    Err(SpoolmanError::NotFound(_)) => debug!(spool = id, "spool not in Spoolman"),
                    Err(e) => warn!(error = %e, spool = id, "Spoolman weight refresh failed"),
                }),
            );
        }
    }

    /// Store weights on every slot linked to `spool_id`. Identical values
    /// are not written. Returns `true` if any slot changed.
    pub fn apply_spool_weights(&mut self, spool_id: i32, remaining_g: f64, total_g: f64) -> bool {
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        let total_gates = backend.system_info().total_gates;
        let mut changed = false;
        for gate in 0..total_gates {
            if backend.slot_info(gate).spoolman_id == spool_id {
                changed |= backend.update_slot_weights(gate, remaining_g, total_g);
            }
        }
        if changed {
            self.gates_version.bump();
        }
        changed
    }

    /// Reference-counted start of periodic weight refresh.
    ///
    /// The first caller triggers an immediate refresh and, when a Tokio
    /// runtime is available, a timer every [`SPOOLMAN_POLL_INTERVAL`].
    pub fn start_spoolman_polling(&mut self, db: Arc<dyn SpoolDatabase>, ui: &UiHandle) {
        self.spoolman_poll_refs += 1;
        if self.spoolman_poll_refs > 1 {
            debug!(refs = self.spoolman_poll_refs, "Spoolman polling already running");
            return;
        }
        info!("starting Spoolman weight polling");
        self.refresh_spoolman_weights(&db, ui);

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no async runtime; Spoolman weights refresh only on demand");
                return;
            }
        };
        let ui = ui.clone();
        self.spoolman_poll_task = Some(handle.spawn(async move {
            let start = tokio::time::Instant::now() + SPOOLMAN_POLL_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, SPOOLMAN_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let db = Arc::clone(&db);
                let posted = ui.post(move |ctx| {
                    let ui = ctx.ui.clone();
                    ctx.ams.refresh_spoolman_weights(&db, &ui);
                });
                if posted.is_err() {
                    break;
                }
            }
        }));
    }

    /// Release one polling reference; the timer stops at zero. Extra calls
    /// are ignored.
    pub fn stop_spoolman_polling(&mut self) {
        if self.spoolman_poll_refs == 0 {
            debug!("Spoolman polling not running");
            return;
        }
        self.spoolman_poll_refs -= 1;
        if self.spoolman_poll_refs == 0 {
            if let Some(task) = self.spoolman_poll_task.take() {
                task.abort();
            }
            info!("stopped Spoolman weight polling");
        }
    }

    pub fn is_spoolman_polling(&self) -> bool {
        self.spoolman_poll_refs > 0
    }

    pub fn spoolman_poll_refs(&self) -> u32 {
        self.spoolman_poll_refs
    }

    /// Editable view of a gate, for the slot editor.
    pub fn slot_info(&self, gate: i32) -> Option<SlotInfo> {
        let slot = self.backend.as_ref()?.slot_info(gate);
        (slot.gate_index >= 0).then_some(slot)
    }

    // ── Subject accessors ────────────────────────────────────────────────────

    pub fn ams_type(&self) -> &IntSubject {
        &self.ams_type
    }

    pub fn action(&self) -> &IntSubject {
        &self.action
    }

    pub fn action_detail(&self) -> &StringSubject {
        &self.action_detail
    }

    pub fn current_gate(&self) -> &IntSubject {
        &self.current_gate
    }

    pub fn current_tool(&self) -> &IntSubject {
        &self.current_tool
    }

    pub fn filament_loaded(&self) -> &IntSubject {
        &self.filament_loaded
    }

    pub fn bypass_active(&self) -> &IntSubject {
        &self.bypass_active
    }

    pub fn gate_count(&self) -> &IntSubject {
        &self.gate_count
    }

    pub fn gates_version(&self) -> &IntSubject {
        &self.gates_version
    }

    pub fn path_topology(&self) -> &IntSubject {
        &self.path_topology
    }

    pub fn path_active_gate(&self) -> &IntSubject {
        &self.path_active_gate
    }

    pub fn path_filament_segment(&self) -> &IntSubject {
        &self.path_filament_segment
    }

    pub fn path_error_segment(&self) -> &IntSubject {
        &self.path_error_segment
    }

    /// Owned by the path animation; never written by a resync.
    pub fn path_anim_progress(&self) -> &IntSubject {
        &self.path_anim_progress
    }

    pub fn toolchange_visible(&self) -> &IntSubject {
        &self.toolchange_visible
    }

    pub fn toolchange_text(&self) -> &StringSubject {
        &self.toolchange_text
    }

    pub fn gate_color(&self, index: usize) -> Option<&IntSubject> {
        self.gate_colors.get(index)
    }

    pub fn gate_status(&self, index: usize) -> Option<&IntSubject> {
        self.gate_statuses.get(index)
    }
}

impl Default for AmsState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AmsState {
    fn drop(&mut self) {
        if let Some(task) = self.spoolman_poll_task.take() {
            task.abort();
        }
    }
}

/// Sink that posts every event onto the UI queue. A closed queue drops the
/// event; the next full resync restores state.
fn ui_event_sink(ui: UiHandle) -> EventSink {
    Arc::new(move |event: BackendEvent| {
        let kind = format!("{event:?}");
        if let Err(e) = ui.post(move |ctx| ctx.ams.handle_event(event)) {
            warn!(error = %e, event = %kind, "dropping AMS backend event");
        }
    })
}
