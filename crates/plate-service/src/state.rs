use crate::error::PipelineError;
use crate::pipeline::PlatePipeline;
use anyhow::anyhow;
use common::plates::PlateResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telemetry::metrics::PLATE_MODELS_READY;
use tracing::info;

#[derive(Clone)]
pub struct PlateServiceState {
    inner: Arc<PlateServiceStateInner>,
}

struct PlateServiceStateInner {
    node_id: String,
    pipeline: PlatePipeline,
    ready: AtomicBool,
}

impl PlateServiceState {
    /// State around a pipeline whose models are already loaded
    pub fn new(node_id: String, pipeline: PlatePipeline) -> Self {
        PLATE_MODELS_READY.set(1);
        Self {
            inner: Arc::new(PlateServiceStateInner {
                node_id,
                pipeline,
                ready: AtomicBool::new(true),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn pipeline(&self) -> &PlatePipeline {
        &self.inner.pipeline
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Run one upload through the pipeline on the blocking pool
    pub async fn process_upload(
        &self,
        bytes: Vec<u8>,
        declared_mime: String,
    ) -> Result<PlateResult, PipelineError> {
        let state = self.clone();
        tokio::task::spawn_blocking(move || state.pipeline().process(&bytes, &declared_mime))
            .await
            .map_err(|e| PipelineError::Internal(anyhow!("Pipeline task failed: {}", e)))?
    }

    /// Stop reporting ready; in-flight requests still complete
    pub fn shutdown(&self) {
        info!(node_id = %self.node_id(), "plate service shutting down");
        self.inner.ready.store(false, Ordering::SeqCst);
        PLATE_MODELS_READY.set(0);
    }
}
