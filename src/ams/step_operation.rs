//! Which step-progress flow to show for an AMS operation.
//!
//! Pure function of the action transition; the panel calls it on every
//! action change and recreates its stepper when told to.

use super::types::AmsAction;

/// Flow shown by the step-progress widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepOperationType {
    /// Loading into an empty toolhead.
    #[default]
    LoadFresh,
    /// Unload the current filament, then load the new one.
    LoadSwap,
    Unload,
}

/// Answer of [`detect_step_operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOperationResult {
    pub should_recreate: bool,
    pub op_type: StepOperationType,
    /// Step to jump to after recreating, or `-1`.
    pub jump_to_step: i32,
}

impl StepOperationResult {
    pub const NO_CHANGE: Self = Self {
        should_recreate: false,
        op_type: StepOperationType::LoadFresh,
        jump_to_step: -1,
    };

    const fn recreate(op_type: StepOperationType, jump_to_step: i32) -> Self {
        Self {
            should_recreate: true,
            op_type,
            jump_to_step,
        }
    }
}

impl Default for StepOperationResult {
    fn default() -> Self {
        Self::NO_CHANGE
    }
}

/// Actions that mean filament work is under way.
fn is_active(action: AmsAction) -> bool {
    matches!(
        action,
        AmsAction::Heating
            | AmsAction::Cutting
            | AmsAction::FormingTip
            | AmsAction::Unloading
            | AmsAction::Loading
    )
}

/// Decide whether an externally started operation needs a new stepper.
///
/// Rules, first match wins:
/// 1. Idle → active: start a flow. `Loading` first means a fresh load;
///    otherwise a swap if filament is loaded, else a fresh load.
/// 2. `Unloading` not following a cut or tip-forming, outside a swap:
///    explicit unload.
/// 3. `Loading` while showing an unload: the unload was the first half of a
///    swap; upgrade and skip heat and cut/tip (step 2).
///
/// Operations started from our own UI (`is_external == false`) never
/// trigger a change.
pub fn detect_step_operation(
    action: AmsAction,
    prev_action: AmsAction,
    current_op: StepOperationType,
    is_external: bool,
    filament_loaded: bool,
) -> StepOperationResult {
    if !is_external {
        return StepOperationResult::NO_CHANGE;
    }

    if is_active(action) && prev_action == AmsAction::Idle {
        let op_type = if action == AmsAction::Loading {
            StepOperationType::LoadFresh
        } else if filament_loaded {
            StepOperationType::LoadSwap
        } else {
            StepOperationType::LoadFresh
        };
        return StepOperationResult::recreate(op_type, -1);
    }

    if action == AmsAction::Unloading
        && !matches!(prev_action, AmsAction::Cutting | AmsAction::FormingTip)
        && current_op != StepOperationType::LoadSwap
    {
        return StepOperationResult::recreate(StepOperationType::Unload, -1);
    }

    if action == AmsAction::Loading && current_op == StepOperationType::Unload {
        return StepOperationResult::recreate(StepOperationType::LoadSwap, 2);
    }

    StepOperationResult::NO_CHANGE
}
