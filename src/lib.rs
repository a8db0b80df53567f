//! Client-side feature evaluations: caching, request coalescing and signed delivery.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that fetches feature evaluations from a remote
//! evaluation service for an `entity` (a user or session) and an optional evaluation
//! [`Context`]. Evaluations are requested in bulk with [`Client::request_evaluations`] and read
//! with [`Client::get_evaluations`].
//!
//! Evaluations are cached for as long as requests target the same entity and context. Concurrent
//! readers waiting for features that are not cached yet share a single in-flight fetch, and a fetch
//! made for a superseded entity or context is discarded when it completes.
//!
//! Requests are signed with AWS Signature Version 4 when [`Credentials`] are configured and sent
//! unsigned otherwise. Telemetry batches can be delivered with [`EventsClient`], either over a
//! request/response channel or over a best-effort channel with presigned requests.
//!
//! An [`AttributeRecorder`] may be provided to publish every evaluation read as a session
//! attribute.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Transport errors are surfaced verbatim and never retried or cached. Session storage errors are
//! the only errors swallowed internally: the cache falls back to memory only.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages,
//! with target `feature_evaluations`. Consider integrating a `log`-compatible logger
//! implementation for better visibility into cache and transport operations.
//!
//! # Examples
//!
//! A runnable example lives in the `demos/simple` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod attribute_recorder;
mod cache;
mod client;
mod config;
mod error;
mod evaluation_client;
mod events_client;
mod serializer;
mod storage;
pub mod transport;
mod types;

pub use attribute_recorder::{AttributeRecorder, UserDetails, NIL_UUID};
pub use cache::{EvaluationCache, EvaluationCacheConfig};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result, TransportError, ValidationError};
pub use evaluation_client::{EvaluationClient, EvaluationDispatch, EVALUATION_SERVICE};
pub use events_client::{AppMonitorDetails, EventsClient, PutRumEventsRequest, RumEvent, EVENTS_SERVICE};
pub use serializer::{content_hash, serialize, timestamp_seconds};
pub use storage::{MemoryStorage, NoopStorage, SessionStorage, StorageError};
pub use transport::{Credentials, HttpHandler, HttpRequest, HttpResponse};
pub use types::{
    BatchEvaluateFeatureRequest, BatchEvaluateFeatureResult, Context, EvaluationRequest,
    EvaluationResult, EvaluationResults, EvaluationValue, FeatureEvaluationRequest,
    FeatureEvaluationResult,
};
