//! End-to-end behaviour of the AMS engine through the public API: backend
//! events travel through the UI queue into subjects, status notifications
//! are parsed per firmware, and the step-progress and runout policies.

use std::sync::Arc;

use helix_core::ams::backend::{AfcBackend, HappyHareBackend, MockBackend};
use helix_core::ams::{
    detect_step_operation, AmsAction, AmsBackend, Backend, GateStatus, SlotInfo,
    StepOperationResult, StepOperationType, DEFAULT_GATE_COLOR, GATE_BYPASS, MAX_GATES,
};
use helix_core::moonraker::RecordingGcodeSender;
use helix_core::state::AppContext;
use helix_core::ui_queue::UiQueue;
use serde_json::{json, Value};

fn context() -> (UiQueue, AppContext) {
    let queue = UiQueue::new();
    let ctx = AppContext::in_memory(queue.handle());
    (queue, ctx)
}

fn attach(ctx: &mut AppContext, backend: Backend) {
    let ui = ctx.ui.clone();
    ctx.ams.set_backend(Some(backend), &ui);
}

fn notification(object: &str, body: Value) -> Value {
    json!({ "method": "notify_status_update", "params": [{ object: body }, 12.5] })
}

// ── Step-progress flow ───────────────────────────────────────────────────────

#[test]
fn fresh_load_recreates_load_fresh() {
    let result = detect_step_operation(
        AmsAction::Loading,
        AmsAction::Idle,
        StepOperationType::LoadFresh,
        true,
        false,
    );
    assert_eq!(
        result,
        StepOperationResult {
            should_recreate: true,
            op_type: StepOperationType::LoadFresh,
            jump_to_step: -1,
        }
    );
}

#[test]
fn heating_with_filament_loaded_starts_swap() {
    let result = detect_step_operation(
        AmsAction::Heating,
        AmsAction::Idle,
        StepOperationType::LoadFresh,
        true,
        true,
    );
    assert!(result.should_recreate);
    assert_eq!(result.op_type, StepOperationType::LoadSwap);
    assert_eq!(result.jump_to_step, -1);
}

#[test]
fn explicit_unload_recreates_unload() {
    let result = detect_step_operation(
        AmsAction::Unloading,
        AmsAction::Heating,
        StepOperationType::LoadFresh,
        true,
        true,
    );
    assert!(result.should_recreate);
    assert_eq!(result.op_type, StepOperationType::Unload);
    assert_eq!(result.jump_to_step, -1);
}

#[test]
fn unloading_from_idle_counts_as_the_start_of_a_flow() {
    let swap = detect_step_operation(
        AmsAction::Unloading,
        AmsAction::Idle,
        StepOperationType::LoadFresh,
        true,
        true,
    );
    assert_eq!(swap.op_type, StepOperationType::LoadSwap);

    let fresh = detect_step_operation(
        AmsAction::Unloading,
        AmsAction::Idle,
        StepOperationType::LoadFresh,
        true,
        false,
    );
    assert_eq!(fresh.op_type, StepOperationType::LoadFresh);
    assert!(fresh.should_recreate);
}

#[test]
fn unloading_during_a_swap_is_not_downgraded() {
    for prev in [AmsAction::Heating, AmsAction::Purging, AmsAction::Selecting] {
        let result = detect_step_operation(
            AmsAction::Unloading,
            prev,
            StepOperationType::LoadSwap,
            true,
            true,
        );
        assert_eq!(result, StepOperationResult::NO_CHANGE, "{prev:?}");
    }
}

#[test]
fn unload_followed_by_load_upgrades_to_swap() {
    let result = detect_step_operation(
        AmsAction::Loading,
        AmsAction::Unloading,
        StepOperationType::Unload,
        true,
        false,
    );
    assert_eq!(
        result,
        StepOperationResult {
            should_recreate: true,
            op_type: StepOperationType::LoadSwap,
            jump_to_step: 2,
        }
    );
}

#[test]
fn ui_initiated_operations_never_recreate() {
    let ops = [
        StepOperationType::LoadFresh,
        StepOperationType::LoadSwap,
        StepOperationType::Unload,
    ];
    for action in AmsAction::ALL {
        for prev in AmsAction::ALL {
            for op in ops {
                for loaded in [false, true] {
                    let result = detect_step_operation(action, prev, op, false, loaded);
                    assert!(
                        !result.should_recreate,
                        "{action:?} after {prev:?} ({op:?}, loaded={loaded})"
                    );
                }
            }
        }
    }
}

// ── Firmware status parsing ──────────────────────────────────────────────────

#[test]
fn afc_toolchange_progress_reaches_subjects() {
    let (mut queue, mut ctx) = context();
    let sender = Arc::new(RecordingGcodeSender::new());
    let afc = AfcBackend::with_lanes(sender, ["lane1", "lane2", "lane3", "lane4"]);
    attach(&mut ctx, Backend::Afc(afc));

    ctx.ams.handle_status_update(&notification(
        "AFC",
        json!({"current_toolchange": 2, "number_of_toolchanges": 5}),
    ));
    queue.drain(&mut ctx);

    let info = ctx.ams.backend().expect("backend").system_info();
    assert_eq!(info.current_toolchange, 2);
    assert_eq!(info.number_of_toolchanges, 5);
    assert_eq!(ctx.ams.toolchange_visible().get(), 1);
    assert_eq!(ctx.ams.toolchange_text().get(), "3 / 5");
}

#[test]
fn afc_without_toolchange_fields_keeps_defaults() {
    let (mut queue, mut ctx) = context();
    let sender = Arc::new(RecordingGcodeSender::new());
    attach(&mut ctx, Backend::Afc(AfcBackend::with_lanes(sender, ["lane1"])));

    ctx.ams
        .handle_status_update(&notification("AFC", json!({"current_state": "Idle"})));
    queue.drain(&mut ctx);

    let info = ctx.ams.backend().expect("backend").system_info();
    assert_eq!(info.current_toolchange, -1);
    assert_eq!(info.number_of_toolchanges, 0);
    assert_eq!(ctx.ams.toolchange_visible().get(), 0);
}

#[test]
fn happy_hare_toolchange_count_is_zero_based() {
    let (mut queue, mut ctx) = context();
    let sender = Arc::new(RecordingGcodeSender::new());
    attach(
        &mut ctx,
        Backend::HappyHare(HappyHareBackend::with_gates(sender, 4)),
    );

    ctx.ams.handle_status_update(&notification(
        "mmu",
        json!({"num_toolchanges": 3, "slicer_tool_map": {"total_toolchanges": 8}}),
    ));
    queue.drain(&mut ctx);
    let info = ctx.ams.backend().expect("backend").system_info();
    assert_eq!(info.current_toolchange, 2);
    assert_eq!(info.number_of_toolchanges, 8);

    ctx.ams
        .handle_status_update(&notification("mmu", json!({"num_toolchanges": 0})));
    queue.drain(&mut ctx);
    let info = ctx.ams.backend().expect("backend").system_info();
    assert_eq!(info.current_toolchange, -1);
}

// ── Event flow through the UI queue ──────────────────────────────────────────

#[test]
fn backend_events_update_subjects_only_after_drain() {
    let (mut queue, mut ctx) = context();
    attach(&mut ctx, Backend::Mock(MockBackend::new(4)));
    queue.drain(&mut ctx);
    let version = ctx.ams.gates_version().get();

    ctx.ams
        .with_backend(|b| b.load_filament(2))
        .expect("load gate 2");
    assert_eq!(ctx.ams.current_gate().get(), -1);

    assert!(queue.drain(&mut ctx) >= 1);
    assert_eq!(ctx.ams.current_gate().get(), 2);
    assert_eq!(ctx.ams.current_tool().get(), 2);
    assert_eq!(ctx.ams.filament_loaded().get(), 1);
    assert_eq!(ctx.ams.gates_version().get(), version + 1);
}

#[test]
fn gate_change_updates_one_gate() {
    let (mut queue, mut ctx) = context();
    attach(&mut ctx, Backend::Mock(MockBackend::new(4)));
    queue.drain(&mut ctx);
    let version = ctx.ams.gates_version().get();

    let mock = ctx
        .ams
        .backend_mut()
        .and_then(Backend::as_mock_mut)
        .expect("mock backend");
    mock.set_slot_info(
        1,
        SlotInfo {
            color_rgb: 0x123456,
            status: GateStatus::Empty,
            ..SlotInfo::empty(1)
        },
    );
    queue.drain(&mut ctx);

    let color = ctx.ams.gate_color(1).expect("gate 1 colour");
    let status = ctx.ams.gate_status(1).expect("gate 1 status");
    assert_eq!(color.get(), 0x123456);
    assert_eq!(status.get(), GateStatus::Empty as i32);
    assert_eq!(ctx.ams.gates_version().get(), version + 1);
}

#[test]
fn console_tool_change_reaches_subjects_after_drain() {
    let (mut queue, mut ctx) = context();
    attach(&mut ctx, Backend::Mock(MockBackend::new(4)));
    queue.drain(&mut ctx);
    let version = ctx.ams.gates_version().get();

    assert!(ctx.ams.handle_gcode_response("T3"));
    assert_eq!(ctx.ams.current_tool().get(), -1);

    assert_eq!(queue.drain(&mut ctx), 1);
    assert_eq!(ctx.ams.current_tool().get(), 3);
    assert_eq!(ctx.ams.current_gate().get(), 3);
    assert_eq!(ctx.ams.gates_version().get(), version + 1);

    assert!(!ctx.ams.handle_gcode_response("T3"));
    assert!(!ctx.ams.handle_gcode_response("G1 X10 Y10"));
    assert_eq!(queue.drain(&mut ctx), 0);
}

#[test]
fn console_output_without_backend_is_ignored() {
    let (_queue, mut ctx) = context();
    assert!(!ctx.ams.handle_gcode_response("MMU_CHANGE_TOOL TOOL=1"));
}

#[test]
fn operations_without_backend_fail() {
    let (_queue, mut ctx) = context();
    assert!(ctx.ams.with_backend(|b| b.unload_filament()).is_err());
}

#[test]
fn full_resync_bumps_version_once_and_mirrors_gates() {
    for gates in [1usize, 4, 16, 20] {
        let (mut queue, mut ctx) = context();
        attach(&mut ctx, Backend::Mock(MockBackend::new(gates)));
        queue.drain(&mut ctx);

        let before = ctx.ams.gates_version().get();
        ctx.ams.sync_from_backend();
        assert_eq!(ctx.ams.gates_version().get(), before + 1);

        let info = ctx.ams.backend().expect("backend").system_info();
        for i in 0..MAX_GATES {
            let color = ctx.ams.gate_color(i).expect("colour subject").get();
            let status = ctx.ams.gate_status(i).expect("status subject").get();
            if i < gates {
                assert_eq!(color, (info.gates[i].color_rgb & 0x00FF_FFFF) as i32);
                assert_eq!(status, info.gates[i].status as i32);
            } else {
                assert_eq!(color, DEFAULT_GATE_COLOR as i32);
                assert_eq!(status, GateStatus::Unknown as i32);
            }
        }
    }
}

#[test]
fn filament_operation_active_only_while_moving() {
    let (_queue, ctx) = context();
    for action in AmsAction::ALL {
        ctx.ams.set_action(action);
        let moving = matches!(
            action,
            AmsAction::Loading | AmsAction::Unloading | AmsAction::Selecting
        );
        assert_eq!(ctx.ams.is_filament_operation_active(), moving, "{action:?}");
    }
}

// ── Runout modal policy ──────────────────────────────────────────────────────

#[test]
fn wizard_suppresses_runout_modal_regardless_of_ams() {
    let (mut queue, mut ctx) = context();
    ctx.runtime.wizard_active = true;
    assert!(!ctx.runtime.should_show_runout_modal(&ctx.ams));

    let mut mock = MockBackend::new(4);
    mock.enable_bypass_now();
    attach(&mut ctx, Backend::Mock(mock));
    queue.drain(&mut ctx);
    assert_eq!(ctx.ams.current_gate().get(), GATE_BYPASS);
    assert!(!ctx.runtime.should_show_runout_modal(&ctx.ams));
}

#[test]
fn runout_modal_depends_on_ams_presence() {
    let (mut queue, mut ctx) = context();
    assert!(ctx.runtime.should_show_runout_modal(&ctx.ams));

    attach(&mut ctx, Backend::Mock(MockBackend::new(4)));
    queue.drain(&mut ctx);
    assert_eq!(ctx.ams.bypass_active().get(), 0);
    assert!(!ctx.runtime.should_show_runout_modal(&ctx.ams));
}
