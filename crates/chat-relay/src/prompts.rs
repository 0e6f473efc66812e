//! Fixed prompt text sent upstream.

/// Persona used when no override is configured.
pub const DEFAULT_PERSONA: &str = "You are a capable, friendly assistant. \
Give clear, well-structured answers and keep track of everything said earlier \
in the conversation.";

/// Appended to every system instruction so the reply is either prose or one
/// raw directive object.
pub const DIRECTIVE_INSTRUCTIONS: &str = r#"IMAGE GENERATION:
When the user asks you to generate, create, draw, make or produce images, pictures, photos or any other visual content, reply with a single JSON object holding exactly 4 image prompts, in this format:

{
  "type": "image_generation",
  "prompts": [
    "detailed prompt 1",
    "detailed prompt 2",
    "detailed prompt 3",
    "detailed prompt 4"
  ]
}

Make the 4 prompts diverse and specific: describe subject, artistic style, lighting, composition and notable visual details.

For image requests reply ONLY with the raw JSON object. Do not wrap it in a code block or backticks and do not add any other text.

IMAGE UNDERSTANDING:
When the user sends an image, study it carefully and refer to concrete elements such as objects, colors and visible text in your answer."#;

/// Title used when the upstream gives nothing usable.
pub const DEFAULT_TITLE: &str = "New Conversation";

const MAX_TITLE_CHARS: usize = 80;

/// Persona (or the default) followed by the directive instructions.
pub fn compose_system_instruction(persona: Option<&str>) -> String {
    let persona = persona
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PERSONA);
    format!("{persona}\n\n{DIRECTIVE_INSTRUCTIONS}")
}

/// Single-turn prompt asking for a short conversation title.
pub fn title_prompt(first_message: &str) -> String {
    format!(
        "Generate a brief, descriptive title (max 5 words) for a conversation that starts \
         with the following message. Respond only with the title, no quotes or extra text: \
         \"{}\"",
        first_message.trim()
    )
}

/// Normalizes an upstream title reply: first line, surrounding quotes and
/// whitespace removed, capped in length. Falls back to [`DEFAULT_TITLE`].
pub fn clean_title(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let title = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*') || c.is_whitespace())
        .trim_end_matches('.');
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    title.chars().take(MAX_TITLE_CHARS).collect()
}
