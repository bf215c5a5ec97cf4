//! Shared application state.
//!
//! The composition root in `main.rs` assembles every long-lived client
//! once and hands them out through this bundle; there is no process-wide
//! mutable state beyond it.

use std::sync::Arc;

use sqlx::PgPool;

use origin_core::crypto::{EncryptionProvider, KeyStore};

use crate::blob::BlobStore;
use crate::broker::TaskBroker;
use crate::cache::Cache;
use crate::config::Config;
use crate::inference::InferenceService;
use crate::metrics::Metrics;

/// Everything a request handler or worker needs.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration.
    pub config: Arc<Config>,

    /// Postgres pool.
    pub db: PgPool,

    /// Shared cache (rate limiting, broker status).
    pub cache: Cache,

    /// Evidence artifact store.
    pub blob: Arc<BlobStore>,

    /// Task broker for evidence generation.
    pub broker: TaskBroker,

    /// Certificate signer.
    pub signer: Arc<dyn KeyStore>,

    /// Webhook secret encryption.
    pub encryption: Arc<dyn EncryptionProvider>,

    /// Risk signal scorer.
    pub inference: Arc<InferenceService>,

    /// Prometheus registry and instruments.
    pub metrics: Arc<Metrics>,

    /// Outbound HTTP client for webhook delivery.
    pub http: reqwest::Client,
}
