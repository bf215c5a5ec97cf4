//! ORIGIN upload-governance service.
//!
//! Synchronous path: HTTP → auth → scope → rate-limit → IP →
//! ingest pipeline (features → inference → policy → ledger →
//! certificate) → response. Asynchronous paths: the evidence workers
//! consuming the task broker and the durable webhook dispatcher. The
//! composition root in `main.rs` wires every dependency into
//! [`state::AppState`].

pub mod auth;
pub mod blob;
pub mod broker;
pub mod cache;
pub mod certificate;
pub mod config;
pub mod correlation;
pub mod crypto_kms;
pub mod error;
pub mod evidence;
pub mod features;
pub mod identity;
pub mod inference;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod storage;
pub mod webhooks;
