pub mod chat;

pub use chat::{ChatRepository, MemoryChatRepository};
