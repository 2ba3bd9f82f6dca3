//! Pipeline orchestrator.
//!
//! Ties the access policy, asset store, derivative cache and transcode pool
//! together. [`Pipeline`] offers typed operations for the HTTP layer and a
//! transport-neutral [`Pipeline::handle`] taking a [`PipelineRequest`].
//! Each request records a [`StageTrace`] that is logged when it finishes.

mod request;
mod service;
mod stage;

pub use request::{Method, PipelineRequest, PipelineResponse};
pub use service::{Fetched, Pipeline, MAX_BATCH_IDS};
pub use stage::{Stage, StageTrace};
