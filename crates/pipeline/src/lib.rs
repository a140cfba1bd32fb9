//! # MCDA Pipeline
//!
//! Request-level orchestration of the suitability pipeline:
//!
//! - [`staging`]: per-request local directories with an explicit slot table
//! - [`stages`]: buffer, rasterize, mask and overlay over files on disk
//! - [`commit`]: two-phase upload of a request's artifacts
//! - [`manifest`]: the artifact handoff between upload and overlay
//! - [`service`]: [`McdaPipeline`], fanning out the three role
//!   sub-pipelines and joining them before responding

pub mod commit;
pub mod config;
pub mod error;
pub mod manifest;
pub mod roles;
pub mod service;
pub mod stages;
pub mod staging;
pub mod transactions;

pub use commit::ArtifactTransaction;
pub use config::PipelineConfig;
pub use error::{PipelineError, Result, Stage};
pub use manifest::{OverlayResponse, UploadManifest, UploadResponse};
pub use roles::{LayerRole, StagingSlot};
pub use service::{McdaPipeline, OverlayRequest, OverlayWeights, UploadBundle, UploadedFile};
pub use staging::{RequestStaging, StagingArea};
pub use transactions::{JsonLinesTransactionLog, TracingTransactionLog, TransactionLog, TransactionRecord};
