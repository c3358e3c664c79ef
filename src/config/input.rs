//! Touch input tuning read from the config document.

use super::document::ConfigStore;
use super::runtime::RuntimeConfig;

pub const DEFAULT_SCROLL_THROW: i64 = 25;
pub const DEFAULT_SCROLL_LIMIT: i64 = 10;
pub const DEFAULT_JITTER_THRESHOLD: i64 = 5;
/// Upper bound for the jitter threshold, in pixels.
pub const MAX_JITTER_THRESHOLD: i64 = 200;

/// Resolved input settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSettings {
    pub scroll_throw: i64,
    pub scroll_limit: i64,
    /// Pixels of movement ignored before a touch counts as a drag.
    pub jitter_threshold: i64,
    pub touch_calibrated: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            scroll_throw: DEFAULT_SCROLL_THROW,
            scroll_limit: DEFAULT_SCROLL_LIMIT,
            jitter_threshold: DEFAULT_JITTER_THRESHOLD,
            touch_calibrated: false,
        }
    }
}

impl InputSettings {
    /// Read `/input/*` and `/touch_calibrated`; `HELIX_TOUCH_JITTER` wins
    /// over the stored jitter threshold.
    pub fn from_config(config: &ConfigStore, runtime: &RuntimeConfig) -> Self {
        let stored = config.get_i64("/input/jitter_threshold", DEFAULT_JITTER_THRESHOLD);
        let jitter = match runtime.touch_jitter {
            Some(px) => {
                tracing::info!("touch jitter threshold overridden by environment: {px}px");
                px
            }
            None => stored,
        };

        Self {
            scroll_throw: config.get_i64("/input/scroll_throw", DEFAULT_SCROLL_THROW),
            scroll_limit: config.get_i64("/input/scroll_limit", DEFAULT_SCROLL_LIMIT),
            jitter_threshold: jitter.clamp(0, MAX_JITTER_THRESHOLD),
            touch_calibrated: config.get_bool("/touch_calibrated", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_gives_defaults() {
        let settings =
            InputSettings::from_config(&ConfigStore::in_memory(), &RuntimeConfig::default());
        assert_eq!(settings, InputSettings::default());
        assert_eq!(settings.scroll_throw, 25);
        assert_eq!(settings.scroll_limit, 10);
        assert_eq!(settings.jitter_threshold, 5);
    }

    #[test]
    fn stored_values_are_used() {
        let config = ConfigStore::from_value(json!({
            "input": { "scroll_throw": 40, "scroll_limit": 3, "jitter_threshold": 9 },
            "touch_calibrated": true
        }));
        let settings = InputSettings::from_config(&config, &RuntimeConfig::default());
        assert_eq!(settings.scroll_throw, 40);
        assert_eq!(settings.scroll_limit, 3);
        assert_eq!(settings.jitter_threshold, 9);
        assert!(settings.touch_calibrated);
    }

    #[test]
    fn jitter_is_clamped() {
        let config = ConfigStore::from_value(json!({ "input": { "jitter_threshold": 500 } }));
        let settings = InputSettings::from_config(&config, &RuntimeConfig::default());
        assert_eq!(settings.jitter_threshold, 200);

        let config = ConfigStore::from_value(json!({ "input": { "jitter_threshold": -4 } }));
        let settings = InputSettings::from_config(&config, &RuntimeConfig::default());
        assert_eq!(settings.jitter_threshold, 0);
    }

    #[test]
    fn environment_overrides_stored_jitter() {
        let config = ConfigStore::from_value(json!({ "input": { "jitter_threshold": 9 } }));
        let runtime = RuntimeConfig::from_vars([("HELIX_TOUCH_JITTER", "1000")]);
        let settings = InputSettings::from_config(&config, &runtime);
        assert_eq!(settings.jitter_threshold, 200);
    }
}
