//! `VisionAnalyzer` composition-root stand-in.
//!
//! Vision inference is an out-of-scope external collaborator (spec §1
//! Non-goals), but `LifelogPipeline::spawn` requires a concrete
//! analyzer for every ingested frame. This records the frame without
//! attaching interpreted content, so ingest still produces an image row
//! and a retrievable (if caption-less) context row rather than failing
//! the whole pipeline when no real analyzer is configured.

use async_trait::async_trait;
use ocn_domain::interfaces::VisionAnalyzer;
use ocn_domain::model::{LifelogContextRow, RiskLevel};
use ocn_domain::Result;

pub struct NullVisionAnalyzer;

#[async_trait]
impl VisionAnalyzer for NullVisionAnalyzer {
    async fn analyze(&self, _image_bytes: &[u8], hint: Option<&str>) -> Result<LifelogContextRow> {
        Ok(LifelogContextRow {
            image_id: String::new(),
            semantic_title: hint.map(|h| h.to_string()).unwrap_or_default(),
            semantic_summary: String::new(),
            objects: vec![],
            ocr: vec![],
            risk_hints: vec![],
            actionable_summary: String::new(),
            risk_level: RiskLevel::P3,
            risk_score: 0.0,
        })
    }
}
