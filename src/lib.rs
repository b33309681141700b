pub mod backend;
pub mod checker;
pub mod config;
pub mod error;
pub mod models;
pub mod openrouter;
pub mod relay;
pub mod render;
pub mod session;
pub mod sse;
pub mod state;
pub mod storage;
pub mod stream;

// Re-export main types for convenience
pub use backend::{Backend, RelayClient};
pub use config::{ApiKeySource, Config};
pub use error::ChatError;
pub use openrouter::{OpenRouterClient, UpstreamSettings};
pub use render::{BubbleState, MessageBubble};
pub use session::{SessionStore, MAX_CONTEXT_MESSAGES};
pub use state::{ChatMessage, ChatRole, Session};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use stream::{pump, StreamState, TokenSink, WriterSink};
