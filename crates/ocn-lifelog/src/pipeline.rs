//! The ingest pipeline's worker pool (spec §4.5 steps 1-5), grounded on
//! the original project's `VisionLifelogPipeline`: N workers pull jobs
//! off the bounded queue, dedup against a per-session hash window,
//! persist the image/context rows, index the context for retrieval,
//! and append a `image_ingested` lifelog event.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use ocn_domain::interfaces::{DurableStore, VectorIndex, VisionAnalyzer};
use ocn_domain::model::{LifelogContextRow, LifelogEventRow, LifelogImageRow};
use ocn_domain::Result;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::assets::ImageAssetStore;
use crate::dhash::{compute_dhash, hamming_distance};
use crate::metrics::{IngestMetrics, IngestMetricsSnapshot};
use crate::queue::{IngestJob, IngestQueue, OverflowPolicy};

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub image_id: String,
    pub image_uri: String,
    pub dedup: bool,
    pub context: Option<LifelogContextRow>,
}

#[derive(Debug, Clone)]
pub struct LifelogPipelineConfig {
    pub worker_count: usize,
    pub queue_max_size: usize,
    pub overflow_policy: OverflowPolicy,
    pub dedup_max_distance: u32,
    pub dedup_window: usize,
}

impl Default for LifelogPipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_max_size: 64,
            overflow_policy: OverflowPolicy::Reject,
            dedup_max_distance: 4,
            dedup_window: 8,
        }
    }
}

struct DedupWindows {
    window: usize,
    by_session: HashMap<String, VecDeque<u64>>,
}

impl DedupWindows {
    fn check_and_record(&mut self, session_id: &str, hash: u64, max_distance: u32) -> bool {
        let hashes = self.by_session.entry(session_id.to_string()).or_default();
        let is_dup = hashes.iter().any(|h| hamming_distance(*h, hash) <= max_distance);
        hashes.push_back(hash);
        if hashes.len() > self.window {
            hashes.pop_front();
        }
        is_dup
    }
}

pub struct LifelogPipeline {
    queue: Arc<IngestQueue>,
    metrics: Arc<IngestMetrics>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LifelogPipeline {
    pub fn spawn(
        config: LifelogPipelineConfig,
        store: Arc<dyn DurableStore>,
        analyzer: Arc<dyn VisionAnalyzer>,
        vector_index: Arc<dyn VectorIndex>,
        assets: Arc<ImageAssetStore>,
    ) -> Arc<Self> {
        let metrics = Arc::new(IngestMetrics::new(config.queue_max_size));
        let queue = IngestQueue::new(config.queue_max_size, config.overflow_policy.clone(), metrics.clone());
        let dedup = Arc::new(Mutex::new(DedupWindows { window: config.dedup_window, by_session: HashMap::new() }));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let queue = queue.clone();
            let metrics = metrics.clone();
            let store = store.clone();
            let analyzer = analyzer.clone();
            let vector_index = vector_index.clone();
            let assets = assets.clone();
            let dedup = dedup.clone();
            let max_distance = config.dedup_max_distance;
            workers.push(tokio::spawn(async move {
                loop {
                    let job = queue.dequeue().await;
                    metrics.in_flight.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    let started = Instant::now();
                    let result = process_job(&job, &store, &analyzer, &vector_index, &assets, &dedup, max_distance).await;
                    metrics.in_flight.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                    match &result {
                        Ok(_) => metrics.record_processed(started.elapsed()),
                        Err(e) => {
                            metrics.record_failed();
                            tracing::warn!(worker_id, error = %e, "lifelog ingest job failed");
                        }
                    }
                    let _ = job.reply.send(result);
                }
            }));
        }

        Arc::new(Self { queue, metrics, workers: Mutex::new(workers) })
    }

    pub async fn ingest(
        &self,
        session_id: String,
        image_bytes: Vec<u8>,
        question: Option<String>,
        mime: String,
        metadata: serde_json::Value,
        ts_ms: i64,
    ) -> Result<IngestOutcome> {
        let (reply, rx) = oneshot::channel();
        self.queue.enqueue(IngestJob { session_id, image_bytes, question, mime, metadata, ts_ms, reply }).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ocn_domain::Error::Internal("ingest worker dropped without replying".into())),
        }
    }

    pub fn metrics(&self) -> IngestMetricsSnapshot {
        self.metrics.snapshot(self.queue.depth())
    }

    pub fn shutdown(&self) {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_job(
    job: &IngestJob,
    store: &Arc<dyn DurableStore>,
    analyzer: &Arc<dyn VisionAnalyzer>,
    vector_index: &Arc<dyn VectorIndex>,
    assets: &Arc<ImageAssetStore>,
    dedup: &Arc<Mutex<DedupWindows>>,
    max_distance: u32,
) -> Result<IngestOutcome> {
    let hash = compute_dhash(&job.image_bytes)?;
    let is_dedup = dedup.lock().check_and_record(&job.session_id, hash, max_distance);

    let (image_id, image_uri) = assets.store(&job.image_bytes, &job.mime)?;
    if let Some(evicted_uri) = assets.evict_oldest_if_over_capacity() {
        tracing::debug!(evicted_uri, "evicted oldest lifelog image asset to respect max_files");
    }

    store
        .record_lifelog_image(&LifelogImageRow {
            image_id: image_id.clone(),
            session_id: job.session_id.clone(),
            image_uri: image_uri.clone(),
            dhash: hash,
            is_dedup,
            ts_ms: job.ts_ms,
        })
        .await?;

    let context = if is_dedup {
        None
    } else {
        let mut context = analyzer.analyze(&job.image_bytes, job.question.as_deref()).await?;
        context.image_id = image_id.clone();
        store.record_lifelog_context(&context).await?;

        let metadata = serde_json::json!({
            "session_id": job.session_id,
            "image_id": image_id,
            "risk_level": context.risk_level,
        });
        let embedding = crate::vector::memory::bag_of_chars_embedding(&context.semantic_summary, 64);
        vector_index.upsert(&image_id, embedding, metadata).await?;
        Some(context)
    };

    let risk_level = context.as_ref().map(|c| c.risk_level);
    store
        .record_lifelog_event(&LifelogEventRow {
            session_id: job.session_id.clone(),
            event_type: "image_ingested".to_string(),
            ts_ms: job.ts_ms,
            payload: serde_json::json!({
                "image_id": image_id,
                "image_uri": image_uri,
                "dedup": is_dedup,
                "structured_context": context,
            }),
            risk_level,
            confidence: None,
        })
        .await?;

    Ok(IngestOutcome { image_id, image_uri, dedup: is_dedup, context })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::memory::InMemoryVectorIndex;
    use async_trait::async_trait;
    use ocn_domain::model::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        images: StdMutex<Vec<LifelogImageRow>>,
        contexts: StdMutex<Vec<LifelogContextRow>>,
        events: StdMutex<Vec<LifelogEventRow>>,
    }

    #[async_trait]
    impl DurableStore for FakeStore {
        async fn upsert_session(&self, _row: &DeviceSessionRow) -> Result<()> {
            Ok(())
        }
        async fn get_session(&self, _d: &str, _s: &str) -> Result<Option<DeviceSessionRow>> {
            Ok(None)
        }
        async fn close_session(&self, _d: &str, _s: &str, _r: &str, _n: i64) -> Result<()> {
            Ok(())
        }
        async fn upsert_binding(&self, _row: &DeviceBindingRow) -> Result<()> {
            Ok(())
        }
        async fn get_binding(&self, _device_id: &str) -> Result<Option<DeviceBindingRow>> {
            Ok(None)
        }
        async fn record_operation(&self, _row: &DeviceOperationRow) -> Result<()> {
            Ok(())
        }
        async fn update_operation(&self, _row: &DeviceOperationRow) -> Result<()> {
            Ok(())
        }
        async fn get_operation(&self, _operation_id: &str) -> Result<Option<DeviceOperationRow>> {
            Ok(None)
        }
        async fn upsert_task(&self, _row: &DigitalTaskRow) -> Result<()> {
            Ok(())
        }
        async fn get_task(&self, _task_id: &str) -> Result<Option<DigitalTaskRow>> {
            Ok(None)
        }
        async fn list_incomplete_tasks(&self) -> Result<Vec<DigitalTaskRow>> {
            Ok(vec![])
        }
        async fn record_lifelog_image(&self, row: &LifelogImageRow) -> Result<()> {
            self.images.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn record_lifelog_context(&self, row: &LifelogContextRow) -> Result<()> {
            self.contexts.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn record_lifelog_event(&self, row: &LifelogEventRow) -> Result<()> {
            self.events.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn record_telemetry(&self, _row: &TelemetrySampleRow) -> Result<()> {
            Ok(())
        }
        async fn record_observability_sample(&self, _row: &ObservabilitySampleRow) -> Result<()> {
            Ok(())
        }
        async fn enqueue_push(&self, _row: &PushQueueRow) -> Result<()> {
            Ok(())
        }
        async fn mark_push_delivered(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn list_pending_pushes(&self, _device_id: &str) -> Result<Vec<PushQueueRow>> {
            Ok(vec![])
        }
        async fn insert_thought_trace(&self, _row: &ocn_domain::trace::ThoughtTraceRow) -> Result<()> {
            Ok(())
        }
        async fn list_thought_traces(&self, _session_id: &str, _limit: usize) -> Result<Vec<ocn_domain::trace::ThoughtTraceRow>> {
            Ok(vec![])
        }
        async fn backup_to(&self, _dest_path: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FakeAnalyzer {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl VisionAnalyzer for FakeAnalyzer {
        async fn analyze(&self, _image_bytes: &[u8], hint: Option<&str>) -> Result<LifelogContextRow> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(LifelogContextRow {
                image_id: String::new(),
                semantic_title: "desk".into(),
                semantic_summary: format!("a desk scene for {}", hint.unwrap_or("default")),
                objects: vec!["desk".into()],
                ocr: vec![],
                risk_hints: vec![],
                actionable_summary: "continue".into(),
                risk_level: RiskLevel::P3,
                risk_score: 0.1,
            })
        }
    }

    fn solid_png(value: u8) -> Vec<u8> {
        let img = image::GrayImage::from_pixel(16, 16, image::Luma([value]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img).write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn ingest_persists_image_and_context_and_indexes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::default());
        let analyzer = Arc::new(FakeAnalyzer { calls: Default::default() });
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let assets = Arc::new(ImageAssetStore::new(dir.path(), 100).unwrap());
        let pipeline = LifelogPipeline::spawn(LifelogPipelineConfig::default(), store.clone(), analyzer.clone(), vector_index, assets);

        let outcome = pipeline
            .ingest("sess-1".into(), solid_png(10), Some("what is this".into()), "image/png".into(), serde_json::Value::Null, 1000)
            .await
            .unwrap();

        assert!(!outcome.dedup);
        assert!(outcome.context.is_some());
        assert_eq!(store.images.lock().unwrap().len(), 1);
        assert_eq!(store.contexts.lock().unwrap().len(), 1);
        assert_eq!(store.events.lock().unwrap()[0].event_type, "image_ingested");
        assert_eq!(analyzer.calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn repeated_near_identical_frames_are_deduped_and_skip_the_analyzer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FakeStore::default());
        let analyzer = Arc::new(FakeAnalyzer { calls: Default::default() });
        let vector_index = Arc::new(InMemoryVectorIndex::new());
        let assets = Arc::new(ImageAssetStore::new(dir.path(), 100).unwrap());
        let pipeline = LifelogPipeline::spawn(LifelogPipelineConfig::default(), store.clone(), analyzer.clone(), vector_index, assets);

        let frame = solid_png(200);
        let first = pipeline.ingest("sess-2".into(), frame.clone(), None, "image/png".into(), serde_json::Value::Null, 1000).await.unwrap();
        let second = pipeline.ingest("sess-2".into(), frame, None, "image/png".into(), serde_json::Value::Null, 1001).await.unwrap();

        assert!(!first.dedup);
        assert!(second.dedup);
        assert_eq!(analyzer.calls.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(store.events.lock().unwrap().len(), 2);
    }
}
