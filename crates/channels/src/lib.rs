//! lookout-channels — alert delivery to third-party services.
//!
//! Channel handlers consume alert records from the alert exchange, format
//! them per channel and forward them. Individual channel failures never
//! block the other channels; a worker heartbeat follows each fully
//! successful dispatch.

pub mod console;
pub mod telegram;
pub mod traits;
pub mod webhook;
pub mod worker;

pub use console::ConsoleChannel;
pub use telegram::TelegramChannel;
pub use traits::{ChannelError, ChannelHandler};
pub use webhook::WebhookChannel;
pub use worker::AlertsHandlerWorker;
