pub mod conversation;
pub mod message;
pub mod user;

pub use conversation::{Conversation, ConversationPatch, DEFAULT_TITLE};
pub use message::{Message, NewMessage, Role};
pub use user::{Session, User};
