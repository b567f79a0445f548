pub mod traits;
pub mod types;
pub mod webhook;

pub use traits::AiResponder;
pub use types::{HistoryEntry, ReplyRequest, ResponderError, FALLBACK_REPLY};
pub use webhook::WebhookResponder;
