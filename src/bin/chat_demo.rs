use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use yildly_chat::presentation::BubbleKind;
use yildly_chat::{
    ConversationFeed, Identity, MemoryStore, MessageStore, Responder, SendOutcome, StoreOptions,
    CONVERSATION_WINDOW,
};

/// Runs one send/reply round trip against an in-process store.
#[derive(Parser)]
#[command(name = "chat-demo")]
struct Cli {
    /// Identity id to sign in as
    #[arg(long, default_value = "U1")]
    uid: String,

    /// Message to send
    #[arg(long, default_value = "hi")]
    text: String,

    /// Store confirmation latency in milliseconds
    #[arg(long, default_value = "25")]
    confirm_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let store = Arc::new(MemoryStore::new(StoreOptions {
        confirm_delay: Duration::from_millis(cli.confirm_delay_ms),
        ..StoreOptions::default()
    }));
    let responder = Responder::new(store.clone() as Arc<dyn MessageStore>, Duration::from_secs(5));
    let identity = Identity::new(cli.uid.clone(), cli.uid.clone());

    let sent = match responder.send(Some(&identity), &cli.text).await? {
        SendOutcome::Sent(sent) => sent,
        SendOutcome::SignedOut => bail!("send was ignored"),
    };
    info!("Sent {}", sent.handle.id);

    let reply = sent.reply.wait().await.context("No reply arrived")?;
    info!("Reply {}", reply.id);

    let mut feed = ConversationFeed::open(store.as_ref(), &identity.uid, CONVERSATION_WINDOW).await?;
    let conversation = feed.next().await.unwrap_or_default();

    for msg in conversation {
        println!(
            "[{}] {}",
            BubbleKind::classify(&msg, &identity).css_class(),
            msg.text
        );
    }

    Ok(())
}
