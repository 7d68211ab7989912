//! Configuration of the freeform display service.
//!
//! The config is a KDL document. Every section and every field is optional; anything left out
//! takes its default value.
//!
//! ```kdl
//! display {
//!     added-delay-ms 500
//!     default-presentation-deadline-ns 1666666
//!     unique-id-prefix "freeform:"
//! }
//!
//! windows {
//!     policy "single-slot"
//! }
//!
//! readiness {
//!     max-attempts 30
//!     retry-interval-ms 1000
//! }
//!
//! control {
//!     privileged-uid 1000
//! }
//! ```

#[macro_use]
extern crate tracing;

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use miette::{Context, IntoDiagnostic};

pub const DEFAULT_ADDED_DELAY_MS: u64 = 500;
pub const DEFAULT_PRESENTATION_DEADLINE_NS: i64 = 1_666_666;
pub const DEFAULT_UNIQUE_ID_PREFIX: &str = "freeform:";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub display: DisplayConfig,
    #[knuffel(child, default)]
    pub windows: WindowsConfig,
    #[knuffel(child, default)]
    pub readiness: ReadinessConfig,
    #[knuffel(child, default)]
    pub control: ControlConfig,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    /// Delay before telling a new display's owner its logical id.
    ///
    /// The logical display layer needs a moment to pick up a freshly added device.
    #[knuffel(child, unwrap(argument), default = DEFAULT_ADDED_DELAY_MS)]
    pub added_delay_ms: u64,
    /// Presentation deadline used for displays created on behalf of a user.
    #[knuffel(child, unwrap(argument), default = DEFAULT_PRESENTATION_DEADLINE_NS)]
    pub default_presentation_deadline_ns: i64,
    #[knuffel(child, unwrap(argument), default = DEFAULT_UNIQUE_ID_PREFIX.to_owned())]
    pub unique_id_prefix: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            added_delay_ms: DEFAULT_ADDED_DELAY_MS,
            default_presentation_deadline_ns: DEFAULT_PRESENTATION_DEADLINE_NS,
            unique_id_prefix: DEFAULT_UNIQUE_ID_PREFIX.to_owned(),
        }
    }
}

impl DisplayConfig {
    pub fn added_delay(&self) -> Duration {
        Duration::from_millis(self.added_delay_ms)
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct WindowsConfig {
    #[knuffel(child, unwrap(argument), default)]
    pub policy: WindowPolicy,
}

/// How many freeform windows may exist at once.
#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// At most one window overall; opening a window closes any other.
    #[default]
    SingleSlot,
    /// At most one window per application; opening a window replaces the same app's window.
    PerKey,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct ReadinessConfig {
    #[knuffel(child, unwrap(argument), default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[knuffel(child, unwrap(argument), default = DEFAULT_RETRY_INTERVAL_MS)]
    pub retry_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
        }
    }
}

impl ReadinessConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct ControlConfig {
    /// Uid allowed to use the control plane. Defaults to the uid of the service itself.
    #[knuffel(child, unwrap(argument))]
    pub privileged_uid: Option<u32>,
    /// Path of the control socket. Defaults to a per-process socket in the runtime dir.
    #[knuffel(child, unwrap(argument))]
    pub socket_path: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let _span = tracy_client::span!("Config::load");
        Self::load_internal(path).context("error loading config")
    }

    fn load_internal(path: &Path) -> miette::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let filename = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("config.kdl");
        let config = Self::parse(filename, &contents).context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        let _span = tracy_client::span!("Config::parse");
        knuffel::parse(filename, text)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;
    use pretty_assertions::assert_eq;

    use super::*;

    #[track_caller]
    fn do_parse(text: &str) -> Config {
        Config::parse("test.kdl", text)
            .map_err(miette::Report::new)
            .unwrap()
    }

    #[test]
    fn empty_config_is_default() {
        assert_eq!(do_parse(""), Config::default());
    }

    #[test]
    fn default_values() {
        assert_debug_snapshot!(Config::default(), @r#"
        Config {
            display: DisplayConfig {
                added_delay_ms: 500,
                default_presentation_deadline_ns: 1666666,
                unique_id_prefix: "freeform:",
            },
            windows: WindowsConfig {
                policy: SingleSlot,
            },
            readiness: ReadinessConfig {
                max_attempts: 30,
                retry_interval_ms: 1000,
            },
            control: ControlConfig {
                privileged_uid: None,
                socket_path: None,
            },
        }
        "#);
    }

    #[test]
    fn parse_full() {
        let parsed = do_parse(
            r#"
            display {
                added-delay-ms 250
                default-presentation-deadline-ns 8000000
                unique-id-prefix "test-freeform:"
            }

            windows {
                policy "per-key"
            }

            readiness {
                max-attempts 5
                retry-interval-ms 20
            }

            control {
                privileged-uid 1000
                socket-path "/run/freeform.sock"
            }
            "#,
        );

        assert_eq!(
            parsed,
            Config {
                display: DisplayConfig {
                    added_delay_ms: 250,
                    default_presentation_deadline_ns: 8_000_000,
                    unique_id_prefix: String::from("test-freeform:"),
                },
                windows: WindowsConfig {
                    policy: WindowPolicy::PerKey,
                },
                readiness: ReadinessConfig {
                    max_attempts: 5,
                    retry_interval_ms: 20,
                },
                control: ControlConfig {
                    privileged_uid: Some(1000),
                    socket_path: Some(String::from("/run/freeform.sock")),
                },
            }
        );
        assert_eq!(parsed.display.added_delay(), Duration::from_millis(250));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let parsed = do_parse(
            r#"
            readiness {
                max-attempts 3
            }
            "#,
        );

        assert_eq!(parsed.readiness.max_attempts, 3);
        assert_eq!(parsed.readiness.retry_interval_ms, DEFAULT_RETRY_INTERVAL_MS);
        assert_eq!(parsed.display, DisplayConfig::default());
    }

    #[test]
    fn unknown_policy_is_an_error() {
        let result = Config::parse(
            "test.kdl",
            r#"
            windows {
                policy "many"
            }
            "#,
        );
        assert!(result.is_err());
    }
}
