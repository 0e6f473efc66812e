use std::str::FromStr;
use std::time::Duration;

use crate::errors::RelayError;
use crate::options::{GenerationConfig, Pacing};

pub const FAILOVER_BACKOFF_MS_ENV: &str = "CHAT_RELAY_FAILOVER_BACKOFF_MS";
pub const PACING_MS_ENV: &str = "CHAT_RELAY_PACING_MS";
pub const PACING_CHARS_ENV: &str = "CHAT_RELAY_PACING_CHARS";
pub const TEMPERATURE_ENV: &str = "CHAT_RELAY_TEMPERATURE";
pub const MAX_OUTPUT_TOKENS_ENV: &str = "CHAT_RELAY_MAX_OUTPUT_TOKENS";
pub const SYSTEM_INSTRUCTION_ENV: &str = "CHAT_RELAY_SYSTEM_INSTRUCTION";
pub const STREAM_BUFFER_ENV: &str = "CHAT_RELAY_STREAM_BUFFER";

/// Relay-wide settings shared by every session.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Pause between two credential attempts after a retryable failure.
    pub failover_backoff: Duration,
    /// Release pacing for complete (non-streamed) upstream payloads.
    pub pacing: Pacing,
    /// Default generation budget for turns.
    pub generation: GenerationConfig,
    /// Persona override. The directive instructions are always appended.
    pub system_instruction: Option<String>,
    /// Outbound event channel capacity per session.
    pub stream_buffer_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            failover_backoff: Duration::from_millis(300),
            pacing: Pacing::default(),
            generation: GenerationConfig::default(),
            system_instruction: None,
            stream_buffer_capacity: 128,
        }
    }
}

impl RelayConfig {
    /// Reads overrides from `CHAT_RELAY_*` variables on top of the defaults.
    ///
    /// Unset or blank variables keep the default; unparseable ones are a
    /// config error rather than being ignored.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RelayError> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, FAILOVER_BACKOFF_MS_ENV)? {
            config.failover_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, PACING_MS_ENV)? {
            config.pacing.interval = Duration::from_millis(ms);
        }
        if let Some(chars) = parse_var::<usize>(&lookup, PACING_CHARS_ENV)? {
            if chars == 0 {
                return Err(invalid(PACING_CHARS_ENV, "must be at least 1"));
            }
            config.pacing.chars_per_fragment = chars;
        }
        if let Some(temperature) = parse_var::<f32>(&lookup, TEMPERATURE_ENV)? {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(invalid(TEMPERATURE_ENV, "must be between 0 and 2"));
            }
            config.generation.temperature = temperature;
        }
        if let Some(tokens) = parse_var::<u32>(&lookup, MAX_OUTPUT_TOKENS_ENV)? {
            if tokens == 0 {
                return Err(invalid(MAX_OUTPUT_TOKENS_ENV, "must be at least 1"));
            }
            config.generation.max_output_tokens = tokens;
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, STREAM_BUFFER_ENV)? {
            if capacity == 0 {
                return Err(invalid(STREAM_BUFFER_ENV, "must be at least 1"));
            }
            config.stream_buffer_capacity = capacity;
        }
        config.system_instruction = lookup(SYSTEM_INSTRUCTION_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(config)
    }

    pub fn failover_backoff(mut self, backoff: Duration) -> Self {
        self.failover_backoff = backoff;
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn system_instruction(mut self, persona: impl Into<String>) -> Self {
        self.system_instruction = Some(persona.into());
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), RelayError> {
        if self.stream_buffer_capacity == 0 {
            return Err(RelayError::Config(
                "stream_buffer_capacity must be at least 1".into(),
            ));
        }
        if self.generation.max_output_tokens == 0 {
            return Err(RelayError::Config(
                "max_output_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Reads a boolean variable; unset means `None`, garbage is a config error.
pub(crate) fn parse_bool_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<bool>, RelayError> {
    match lookup(key) {
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_bool_env(&raw)
            .map(Some)
            .ok_or_else(|| invalid(key, &format!("`{}` is not a boolean", raw.trim()))),
        None => Ok(None),
    }
}

pub(crate) fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RelayError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|err| invalid(key, &format!("`{raw}`: {err}")))
}

pub(crate) fn invalid(key: &str, detail: &str) -> RelayError {
    RelayError::Config(format!("invalid {key}: {detail}"))
}
