//! Engine configuration.
//!
//! Configuration is read once when the engine is created, either built in
//! code or taken from the environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `MEMHOOK_ENABLE_EVENTS` | master switch for event dispatch | `yes` |
//! | `MEMHOOK_EVENTS` | comma separated events that may be hooked | all |
//! | `MEMHOOK_RECURSION_GUARD` | skip native handlers on same-thread re-entry | `yes` |

use memhook_core::{ConfigError, EventKind, EventType, MemHookError};

/// Environment variable holding the master switch.
pub const ENV_ENABLE_EVENTS: &str = "MEMHOOK_ENABLE_EVENTS";
/// Environment variable holding the list of hookable events.
pub const ENV_EVENTS: &str = "MEMHOOK_EVENTS";
/// Environment variable controlling the recursion guard.
pub const ENV_RECURSION_GUARD: &str = "MEMHOOK_RECURSION_GUARD";

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    enable_events: bool,
    events: EventType,
    recursion_guard: bool,
}

impl Config {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder();
        if let Some(value) = lookup(ENV_ENABLE_EVENTS) {
            builder = builder.enable_events(parse_bool(ENV_ENABLE_EVENTS, &value)?);
        }
        if let Some(value) = lookup(ENV_EVENTS) {
            builder = builder.events(parse_events(ENV_EVENTS, &value)?);
        }
        if let Some(value) = lookup(ENV_RECURSION_GUARD) {
            builder = builder.recursion_guard(parse_bool(ENV_RECURSION_GUARD, &value)?);
        }
        Ok(builder.build())
    }

    /// Whether events are dispatched at all.
    pub fn enable_events(&self) -> bool {
        self.enable_events
    }

    /// Events that may be hooked.
    pub fn events(&self) -> EventType {
        self.events
    }

    /// Whether the recursion guard is active.
    pub fn recursion_guard(&self) -> bool {
        self.recursion_guard
    }

    /// Whether events of `kind` are dispatched through the engine.
    ///
    /// A native kind is also dispatched when only an aggregate event it can
    /// produce is enabled, so `VM_MAPPED` alone still observes `mmap()`.
    #[inline]
    pub fn is_enabled(&self, kind: EventKind) -> bool {
        self.enable_events && self.events.intersects(kind.bit() | kind.aggregates())
    }

    /// Check that every event in `events` may be hooked.
    pub fn check(&self, events: EventType) -> Result<(), MemHookError> {
        if !self.enable_events {
            return Err(MemHookError::Unsupported(events));
        }
        let disabled = events.difference(self.events);
        if !disabled.is_empty() {
            return Err(MemHookError::Unsupported(disabled));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_events: true,
            events: EventType::all(),
            recursion_guard: true,
        }
    }
}

/// Builder for [`Config`].
///
/// # Example
/// ```
/// use memhook_std::config::Config;
/// use memhook_std::memhook_core::EventType;
///
/// let config = Config::builder()
///     .events(EventType::MMAP | EventType::VM_MAPPED)
///     .recursion_guard(false)
///     .build();
/// assert!(!config.recursion_guard());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the master switch.
    pub fn enable_events(mut self, enable: bool) -> Self {
        self.config.enable_events = enable;
        self
    }

    /// Restrict the events that may be hooked.
    pub fn events(mut self, events: EventType) -> Self {
        self.config.events = events;
        self
    }

    /// Turn the recursion guard on or off.
    pub fn recursion_guard(mut self, enable: bool) -> Self {
        self.config.recursion_guard = enable;
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Ok(true),
        "0" | "n" | "no" | "off" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_owned(),
        }),
    }
}

fn parse_events(var: &'static str, value: &str) -> Result<EventType, ConfigError> {
    let mut events = EventType::empty();
    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if name.eq_ignore_ascii_case("all") {
            events |= EventType::all();
            continue;
        }
        events |= EventType::parse_name(name).ok_or_else(|| ConfigError::UnknownEvent {
            var,
            name: name.to_owned(),
        })?;
    }
    Ok(events)
}
