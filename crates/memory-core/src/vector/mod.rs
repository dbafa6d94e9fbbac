pub mod breaker;
pub mod embedding;
pub mod http_embedding;
pub mod math;
pub mod memory_store;
pub mod outbox;
pub mod sqlite_store;
pub mod store;

pub use breaker::CircuitBreaker;
pub use embedding::{EmbeddingProvider, NullEmbeddingProvider};
pub use http_embedding::HttpEmbeddingProvider;
pub use memory_store::InMemoryVectorStore;
pub use outbox::Outbox;
pub use sqlite_store::SqliteSharedVectorStore;
pub use store::VectorStore;
