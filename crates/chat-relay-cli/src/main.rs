//! Send one chat turn through the relay and stream its wire events to stdout.

mod cli;

use std::io::Write as _;
use std::process::ExitCode;

use anyhow::Context as _;
use chat_relay::observability::init_observability;
use chat_relay::prelude::*;
use chat_relay::{CredentialStatusBoard, RelayFailure};
use clap::Parser as _;
use tokio::sync::broadcast;
use tracing::warn;

use crate::cli::{Cli, guess_media_type};

const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    load_env();
    init_observability();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load .env from the current dir, if any.
fn load_env() {
    let _ = dotenvy::dotenv();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let relay = Relay::from_env().context("failed to configure relay")?;
    let mut board = CredentialStatusBoard::new(relay.credential_count());
    let mut credential_events = relay.subscribe_credentials();

    if cli.title {
        let title = relay.conversation_title(&cli.message).await;
        eprintln!("title: {title}");
    }

    let mut turn = relay.turn().user_text(cli.message.clone());
    if let Some(id) = &cli.conversation {
        turn = turn.conversation_id(id.clone());
    }
    if let Some(path) = &cli.history {
        turn = turn.history(read_history(path)?);
    }
    if let Some(path) = &cli.attachment {
        let media_type = match cli.media_type.as_deref().or_else(|| guess_media_type(path)) {
            Some(media_type) => media_type.to_string(),
            None => anyhow::bail!(
                "cannot guess media type of {}; pass --media-type",
                path.display()
            ),
        };
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        turn = turn.attachment(Attachment::new(media_type, data));
    }
    if let Some(persona) = &cli.system {
        turn = turn.system_instruction(persona.clone());
    }

    let mut stream = turn.start_stream().await?;
    let abort = stream.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let mut stdout = std::io::stdout().lock();
    while let Some(event) = stream.next_event().await {
        stdout.write_all(event.to_ndjson().as_bytes())?;
        stdout.flush()?;
        drain_credential_events(&mut credential_events, &mut board);
    }
    drop(stdout);

    let result = stream.finish().await;
    drain_credential_events(&mut credential_events, &mut board);
    if cli.status {
        eprintln!("{board}");
    }

    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(RelayError::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        // Already reported on stdout as an `error` event.
        Err(RelayError::Failed(RelayFailure::PoolExhausted { attempts })) => {
            eprintln!("all {} credentials failed", attempts.len());
            ExitCode::FAILURE
        }
        Err(RelayError::Failed(_)) => ExitCode::FAILURE,
        Err(err) => return Err(err.into()),
    })
}

fn read_history(path: &std::path::Path) -> anyhow::Result<Vec<Turn>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid history file {}", path.display()))
}

fn drain_credential_events(
    events: &mut broadcast::Receiver<CredentialEvent>,
    board: &mut CredentialStatusBoard,
) {
    loop {
        match events.try_recv() {
            Ok(event) => board.apply(&event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "credential status events lagged");
            }
            Err(_) => break,
        }
    }
}
