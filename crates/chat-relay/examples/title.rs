use chat_relay::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), RelayError> {
    let relay = Relay::from_env()?;
    let title = relay
        .conversation_title("How do I keep sourdough starter alive while travelling?")
        .await;
    println!("{title}");
    Ok(())
}
