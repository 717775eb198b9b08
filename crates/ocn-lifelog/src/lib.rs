//! Lifelog Ingest Pipeline (spec §4.5): a bounded job queue, a worker
//! pool that dedups near-identical frames and runs the vision analyzer,
//! on-disk asset storage with capacity eviction, and the vector-index
//! backends used for later semantic retrieval.

pub mod assets;
pub mod dhash;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod vector;

pub use assets::ImageAssetStore;
pub use metrics::{IngestMetrics, IngestMetricsSnapshot};
pub use pipeline::{IngestOutcome, LifelogPipeline, LifelogPipelineConfig};
pub use queue::{IngestJob, OverflowPolicy};
pub use vector::InMemoryVectorIndex;
