pub mod memory;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use memory::InMemoryVectorIndex;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorIndex;
