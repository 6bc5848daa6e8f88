#![deny(missing_docs)]

//! Core library for the versepipe document indexing pipeline.

/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction, cache, and batching service.
pub mod embedding;
/// File-backed index backends.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline run counters.
pub mod metrics;
/// Collection model, stages, and orchestrator.
pub mod pipeline;
/// Artifact store and collection registry.
pub mod store;
