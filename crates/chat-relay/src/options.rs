use std::time::Duration;

/// Bounded generation budget sent with every upstream call.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    /// Token ceiling for the reply.
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 1000,
        }
    }
}

impl GenerationConfig {
    /// Small budget used for conversation titles.
    pub const fn title() -> Self {
        Self {
            temperature: 0.5,
            max_output_tokens: 20,
        }
    }
}

/// How a complete upstream payload is segmented and released to emulate
/// real-time generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Pacing {
    /// Delay between consecutive fragments. Zero releases them back to back.
    pub interval: Duration,
    /// Characters per fragment (at least one).
    pub chars_per_fragment: usize,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
            chars_per_fragment: 1,
        }
    }
}

impl Pacing {
    /// Releases every fragment without waiting.
    pub const fn immediate(chars_per_fragment: usize) -> Self {
        Self {
            interval: Duration::ZERO,
            chars_per_fragment,
        }
    }

    pub(crate) fn fragment_len(&self) -> usize {
        self.chars_per_fragment.max(1)
    }
}
