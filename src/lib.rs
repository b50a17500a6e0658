//! Async client for provider-hosted AI media generation.
//!
//! A request flows through three stages: a mode-specific strategy
//! validates it and builds the submission payload (uploading any source
//! asset first), the submitter exchanges it for a provider job id, and
//! completion tracking races push events against adaptive fallback
//! polling until the reconciler applies exactly one terminal outcome
//! per job.
//!
//! [`GenerationClient`] ties the stages together; the underlying pieces
//! stay public for callers that need only one of them.

pub mod artifact;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod poll;
pub mod reconcile;
pub mod request;
pub mod strategy;
pub mod submit;
pub mod upload;

pub use artifact::{ArtifactState, ArtifactStatus};
pub use client::{GenerationClient, TrackOptions, TrackScope};
pub use config::{PollConfig, ProviderConfig};
pub use error::RiptideError;
pub use request::{GenerationMode, GenerationRequest, GenerationSettings, SourceAsset};
pub use submit::SubmissionResult;
