pub mod models;
pub mod store;
pub mod assembler;
pub mod responder;
pub mod identity;
pub mod session;
pub mod presentation;
pub mod chat_server;
pub mod live;
pub mod app_config;

pub use models::{Identity, Message, MessageRole, NewMessage};
pub use store::{MemoryStore, MessageStore, StoreOptions};
pub use assembler::{assemble, ConversationFeed, CONVERSATION_WINDOW};
pub use responder::{Responder, SendOutcome, CANNED_REPLIES};
pub use chat_server::{app, AppState};
