//! Process-wide runtime settings taken once at startup.
//!
//! Environment variables are read exactly once, in [`RuntimeConfig::from_env`];
//! everything downstream consults the snapshot. Tests build a snapshot from
//! an explicit variable list with [`RuntimeConfig::from_vars`].

use std::str::FromStr;

use crate::ams::AmsState;
use crate::cli::Cli;

/// Forces the filament-runout modal regardless of AMS state.
pub const ENV_FORCE_RUNOUT_MODAL: &str = "HELIX_FORCE_RUNOUT_MODAL";
/// Enables observer-trace logging for subjects.
pub const ENV_DEBUG_SUBJECTS: &str = "HELIX_DEBUG_SUBJECTS";
/// Overrides the configured touch jitter threshold (pixels).
pub const ENV_TOUCH_JITTER: &str = "HELIX_TOUCH_JITTER";
/// Forces the display backend.
pub const ENV_DISPLAY_BACKEND: &str = "HELIX_DISPLAY_BACKEND";
/// Overrides the touch input device path.
pub const ENV_TOUCH_DEVICE: &str = "HELIX_TOUCH_DEVICE";

/// Display output backend selected by `HELIX_DISPLAY_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayBackend {
    Drm,
    Fbdev,
    Sdl,
}

impl FromStr for DisplayBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drm" => Ok(Self::Drm),
            "fbdev" | "fb" => Ok(Self::Fbdev),
            "sdl" => Ok(Self::Sdl),
            other => Err(format!("unknown display backend '{other}'")),
        }
    }
}

/// Test-mode switches from the command line.
///
/// `--test` mocks every printer-facing collaborator; each `--real-*` flag
/// re-enables one real collaborator and is only valid together with
/// `--test`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestModeFlags {
    pub test: bool,
    pub real_wifi: bool,
    pub real_ethernet: bool,
    pub real_moonraker: bool,
    pub real_files: bool,
}

impl From<&Cli> for TestModeFlags {
    fn from(cli: &Cli) -> Self {
        Self {
            test: cli.test,
            real_wifi: cli.real_wifi,
            real_ethernet: cli.real_ethernet,
            real_moonraker: cli.real_moonraker,
            real_files: cli.real_files,
        }
    }
}

/// Runtime settings snapshot.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub debug_subjects: bool,
    pub force_runout_modal: bool,
    /// `HELIX_TOUCH_JITTER`, if set and numeric (unclamped).
    pub touch_jitter: Option<i64>,
    pub display_backend: Option<DisplayBackend>,
    pub touch_device: Option<String>,
    pub test_mode: TestModeFlags,
    /// Set by the host while the first-run setup wizard is on screen.
    pub wizard_active: bool,
}

impl RuntimeConfig {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a snapshot from explicit `(name, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                ENV_DEBUG_SUBJECTS => cfg.debug_subjects = true,
                ENV_FORCE_RUNOUT_MODAL => cfg.force_runout_modal = true,
                ENV_TOUCH_JITTER => match value.trim().parse::<i64>() {
                    Ok(px) => cfg.touch_jitter = Some(px),
                    Err(_) => {
                        tracing::warn!("ignoring {ENV_TOUCH_JITTER}={value:?}: not an integer")
                    }
                },
                ENV_DISPLAY_BACKEND => match value.parse::<DisplayBackend>() {
                    Ok(backend) => cfg.display_backend = Some(backend),
                    Err(e) => tracing::warn!("ignoring {ENV_DISPLAY_BACKEND}: {e}"),
                },
                ENV_TOUCH_DEVICE if !value.is_empty() => {
                    cfg.touch_device = Some(value.to_string());
                }
                _ => {}
            }
        }
        cfg
    }

    /// Attach command-line test flags.
    pub fn with_test_mode(mut self, flags: TestModeFlags) -> Self {
        self.test_mode = flags;
        self
    }

    /// The AMS backend is simulated in test mode unless Moonraker is real.
    pub fn should_mock_ams(&self) -> bool {
        self.test_mode.test && !self.test_mode.real_moonraker
    }

    /// Decide whether a filament-runout modal should be shown.
    ///
    /// Suppressed while the setup wizard runs, while an AMS manages the
    /// filament (not in bypass), and while the AMS reports filament moving
    /// past the sensors. `HELIX_FORCE_RUNOUT_MODAL` overrides everything.
    pub fn should_show_runout_modal(&self, ams: &AmsState) -> bool {
        if self.force_runout_modal {
            return true;
        }

        if self.wizard_active {
            tracing::debug!("suppressing runout modal: wizard active");
            return false;
        }

        if ams.is_available() {
            if ams.bypass_active().get() == 0 {
                tracing::debug!("suppressing runout modal: AMS managing filament");
                return false;
            }
            tracing::debug!("AMS bypass active, runout modal allowed");
        }

        if ams.is_filament_operation_active() {
            tracing::debug!("suppressing runout modal: filament operation in progress");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ams::backend::{Backend, MockBackend};
    use crate::ams::AmsAction;
    use crate::state::AppContext;
    use crate::ui_queue::UiQueue;

    fn vars(pairs: &[(&str, &str)]) -> RuntimeConfig {
        RuntimeConfig::from_vars(pairs.iter().copied())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = vars(&[]);
        assert!(!cfg.debug_subjects);
        assert!(!cfg.force_runout_modal);
        assert_eq!(cfg.touch_jitter, None);
        assert_eq!(cfg.display_backend, None);
        assert_eq!(cfg.touch_device, None);
    }

    #[test]
    fn presence_flags_ignore_value() {
        let cfg = vars(&[(ENV_DEBUG_SUBJECTS, ""), (ENV_FORCE_RUNOUT_MODAL, "0")]);
        assert!(cfg.debug_subjects);
        assert!(cfg.force_runout_modal);
    }

    #[test]
    fn display_backend_aliases_parse() {
        assert_eq!(
            vars(&[(ENV_DISPLAY_BACKEND, "fb")]).display_backend,
            Some(DisplayBackend::Fbdev)
        );
        assert_eq!(
            vars(&[(ENV_DISPLAY_BACKEND, "DRM")]).display_backend,
            Some(DisplayBackend::Drm)
        );
        assert_eq!(
            vars(&[(ENV_DISPLAY_BACKEND, "sdl")]).display_backend,
            Some(DisplayBackend::Sdl)
        );
        assert_eq!(vars(&[(ENV_DISPLAY_BACKEND, "wayland")]).display_backend, None);
    }

    #[test]
    fn touch_overrides_are_captured() {
        let cfg = vars(&[(ENV_TOUCH_JITTER, " 12 "), (ENV_TOUCH_DEVICE, "/dev/input/event2")]);
        assert_eq!(cfg.touch_jitter, Some(12));
        assert_eq!(cfg.touch_device.as_deref(), Some("/dev/input/event2"));
        assert_eq!(vars(&[(ENV_TOUCH_JITTER, "lots")]).touch_jitter, None);
    }

    #[test]
    fn mock_ams_only_in_test_mode_without_real_moonraker() {
        let base = vars(&[]);
        assert!(!base.should_mock_ams());

        let test = base.clone().with_test_mode(TestModeFlags {
            test: true,
            ..Default::default()
        });
        assert!(test.should_mock_ams());

        let real = base.with_test_mode(TestModeFlags {
            test: true,
            real_moonraker: true,
            ..Default::default()
        });
        assert!(!real.should_mock_ams());
    }

    // ── runout modal policy ──────────────────────────────────────────────────

    #[test]
    fn runout_modal_shown_without_ams() {
        let queue = UiQueue::new();
        let ctx = AppContext::in_memory(queue.handle());
        assert!(ctx.runtime.should_show_runout_modal(&ctx.ams));
    }

    #[test]
    fn runout_modal_suppressed_during_wizard() {
        let queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        ctx.runtime.wizard_active = true;
        assert!(!ctx.runtime.should_show_runout_modal(&ctx.ams));
    }

    #[test]
    fn runout_modal_suppressed_when_ams_manages_filament() {
        let queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        let ui = ctx.ui.clone();
        ctx.ams.set_backend(Some(Backend::Mock(MockBackend::new(4))), &ui);
        ctx.ams.sync_from_backend();

        assert_eq!(ctx.ams.bypass_active().get(), 0);
        assert!(!ctx.runtime.should_show_runout_modal(&ctx.ams));
    }

    #[test]
    fn runout_modal_shown_when_ams_in_bypass() {
        let queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        let ui = ctx.ui.clone();
        let mut mock = MockBackend::new(4);
        mock.enable_bypass_now();
        ctx.ams.set_backend(Some(Backend::Mock(mock)), &ui);
        ctx.ams.sync_from_backend();

        assert_eq!(ctx.ams.bypass_active().get(), 1);
        assert!(ctx.runtime.should_show_runout_modal(&ctx.ams));
    }

    #[test]
    fn runout_modal_suppressed_during_filament_movement() {
        let queue = UiQueue::new();
        let ctx = AppContext::in_memory(queue.handle());
        ctx.ams.set_action(AmsAction::Loading);
        assert!(!ctx.runtime.should_show_runout_modal(&ctx.ams));
    }

    #[test]
    fn forced_runout_modal_overrides_wizard() {
        let queue = UiQueue::new();
        let mut ctx = AppContext::in_memory(queue.handle());
        ctx.runtime = vars(&[(ENV_FORCE_RUNOUT_MODAL, "1")]);
        ctx.runtime.wizard_active = true;
        assert!(ctx.runtime.should_show_runout_modal(&ctx.ams));
    }
}
