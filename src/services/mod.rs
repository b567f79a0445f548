pub mod accounts;
pub mod auth;
pub mod chat;
pub mod conversation;
pub mod database;
pub mod events;
pub mod gotrue;
pub mod remote;
pub mod rest;

pub use accounts::AccountService;
pub use auth::{AuthError, AuthEvent, AuthProvider, MemoryAuth};
pub use chat::{ChatError, ChatService};
pub use database::SqliteStore;
pub use events::{EventHub, Subscription};
pub use gotrue::GoTrueAuth;
pub use remote::{RemoteStore, StoreError};
pub use rest::RestStore;
