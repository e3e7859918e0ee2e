//! Message transports: console, in-process interface, and chat platforms.

pub mod chat;
pub mod console;
pub mod correlation;
pub mod discord;
pub mod interface;
pub mod telegram;

use tokio::sync::watch;

pub use chat::{ChatPlatform, ChatTransport, IncomingMessage};
pub use console::ConsoleTransport;
pub use correlation::CorrelationTable;
pub use discord::{DiscordPlatform, DiscordTransport};
pub use interface::{InterfaceReply, InterfaceTransport};
pub use telegram::{TelegramPlatform, TelegramTransport};

/// Resolves once the stop flag is set. The watch guard is dropped before this
/// returns, so the future can sit in a `select!` next to arms that await.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|flag| *flag).await;
}
