use std::path::PathBuf;

use clap::Parser;

/// Send one chat turn through the relay and print wire events as NDJSON.
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Stream a chat turn through a pool of upstream credentials", long_about = None)]
#[command(version)]
pub struct Cli {
    /// The user message. May be empty when an attachment is given.
    #[arg(default_value = "")]
    pub message: String,

    /// Conversation id used to tag log lines
    #[arg(long)]
    pub conversation: Option<String>,

    /// JSON file holding prior turns (`[{"role":"user","text":"..."}, ...]`)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Image file to attach to the message
    #[arg(long)]
    pub attachment: Option<PathBuf>,

    /// MIME type of the attachment (guessed from the extension if omitted)
    #[arg(long, requires = "attachment")]
    pub media_type: Option<String>,

    /// Persona override for this turn
    #[arg(long)]
    pub system: Option<String>,

    /// Also generate a conversation title (printed to stderr)
    #[arg(long)]
    pub title: bool,

    /// Print the credential status summary to stderr when done
    #[arg(long)]
    pub status: bool,
}

pub fn guess_media_type(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_message_and_flags() {
        let cli = Cli::parse_from(["chat-relay", "hello", "--conversation", "c1", "--title"]);
        assert_eq!(cli.message, "hello");
        assert_eq!(cli.conversation.as_deref(), Some("c1"));
        assert!(cli.title);
        assert!(cli.attachment.is_none());
    }

    #[test]
    fn media_type_requires_attachment() {
        let result = Cli::try_parse_from(["chat-relay", "hi", "--media-type", "image/png"]);
        assert!(result.is_err());
    }

    #[test]
    fn guesses_common_image_types() {
        assert_eq!(guess_media_type("a/b.JPG".as_ref()), Some("image/jpeg"));
        assert_eq!(guess_media_type("x.webp".as_ref()), Some("image/webp"));
        assert_eq!(guess_media_type("notes.txt".as_ref()), None);
    }
}
