pub mod memory;
pub mod opensearch;
pub mod qdrant;

pub use memory::MemoryIndex;
pub use opensearch::OpenSearchStore;
pub use qdrant::QdrantStore;
