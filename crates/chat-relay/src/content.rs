use serde::{Deserialize, Serialize};

use crate::options::GenerationConfig;

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Binary attachment sent alongside a turn (for example an uploaded photo).
///
/// Serialized with base64 data so turns can round-trip through JSON history
/// files.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type such as `image/png`.
    pub media_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(media_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("media_type", &self.media_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

/// One turn of conversation context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            attachment: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Everything the upstream needs for one generation call.
///
/// Built once per user-visible send and shared, unchanged, by every failover
/// attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    /// Ordered context, oldest first, ending with the new user turn.
    pub turns: Vec<Turn>,
    pub system_instruction: Option<String>,
    pub generation: GenerationConfig,
}

impl UpstreamRequest {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            system_instruction: None,
            generation: GenerationConfig::default(),
        }
    }

    pub fn system_instruction(mut self, text: impl Into<String>) -> Self {
        self.system_instruction = Some(text.into());
        self
    }

    pub fn generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }
}

/// Number of prompts a well-formed directive carries.
pub const DIRECTIVE_PROMPT_COUNT: usize = 4;

/// Discriminant of a structured directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    ImageGeneration,
}

/// Parsed "generate N images" directive.
///
/// Wire shape: `{"type":"image_generation","prompts":[...4 strings...]}`.
/// Deserialization rejects duplicate `type` keys, unknown discriminants and
/// any prompt count other than [`DIRECTIVE_PROMPT_COUNT`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDirective")]
pub struct Directive {
    #[serde(rename = "type")]
    pub kind: DirectiveKind,
    pub prompts: Vec<String>,
}

#[derive(Deserialize)]
struct RawDirective {
    #[serde(rename = "type")]
    kind: DirectiveKind,
    prompts: Vec<String>,
}

impl TryFrom<RawDirective> for Directive {
    type Error = String;

    fn try_from(raw: RawDirective) -> Result<Self, Self::Error> {
        if raw.prompts.len() != DIRECTIVE_PROMPT_COUNT {
            return Err(format!(
                "expected exactly {DIRECTIVE_PROMPT_COUNT} prompts, found {}",
                raw.prompts.len()
            ));
        }
        Ok(Directive {
            kind: raw.kind,
            prompts: raw.prompts,
        })
    }
}

/// Fully classified result of a completed session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    /// Plain narrative reply, exactly as accumulated.
    Text { text: String },
    /// Structured image-generation directive.
    Directive { directive: Directive },
}

impl Completion {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Directive { .. } => None,
        }
    }

    pub fn as_directive(&self) -> Option<&Directive> {
        match self {
            Self::Directive { directive } => Some(directive),
            Self::Text { .. } => None,
        }
    }
}
