use chat_relay::observability::init_observability;
use chat_relay::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RelayError> {
    init_observability();
    let relay = Relay::from_env()?;

    let mut stream = relay
        .turn()
        .history([
            Turn::user("I'm planning a trip to the coast."),
            Turn::assistant("Sounds lovely! Where are you headed?"),
        ])
        .user_text("Generate some images of a lighthouse at dusk.")
        .start_stream()
        .await?;

    while let Some(event) = stream.next_event().await {
        match event {
            WireEvent::UserEcho { text, .. } => println!("> {text}"),
            WireEvent::TextDelta { text, .. } => print!("{text}"),
            WireEvent::DirectiveReady { directive, .. } => {
                println!();
                for (i, prompt) in directive.prompts.iter().enumerate() {
                    println!("image {}: {prompt}", i + 1);
                }
            }
            WireEvent::Complete { .. } => println!(),
            WireEvent::Error { kind, message } => eprintln!("session error ({kind:?}): {message}"),
        }
    }

    let _ = stream.finish().await?;
    Ok(())
}
