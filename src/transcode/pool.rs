//! Bounded worker pool for CPU-bound transcodes.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

use super::engine::{TranscodedImage, Transcoder};
use super::spec::TransformSpec;
use crate::error::PipelineError;

/// Runs transcodes on the blocking thread pool, at most `workers` at a time.
#[derive(Clone)]
pub struct TranscodePool {
    engine: Arc<dyn Transcoder>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl TranscodePool {
    pub fn new(engine: Arc<dyn Transcoder>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn engine(&self) -> &Arc<dyn Transcoder> {
        &self.engine
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Transcode once a worker slot is free.
    pub async fn run(
        &self,
        source: Bytes,
        source_mime: String,
        spec: TransformSpec,
    ) -> Result<TranscodedImage, PipelineError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Internal("transcode pool closed".to_string()))?;

        let engine = Arc::clone(&self.engine);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.transcode(&source, &source_mime, &spec)
        });

        match handle.await {
            Ok(result) => result.map_err(PipelineError::from),
            Err(e) => Err(PipelineError::Internal(format!("transcode worker failed: {}", e))),
        }
    }
}
