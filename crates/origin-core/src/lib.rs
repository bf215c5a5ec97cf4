//! Core domain library for the ORIGIN upload-governance platform.
//!
//! This crate holds the pure, I/O-light building blocks shared by the API
//! server and its workers:
//!
//! - [`canonical`]: deterministic JSON encoding used as the sole pre-image
//!   for ledger event hashes and certificate signatures
//! - [`crypto`]: SHA-256 hash-chain primitives, the PS256 signer
//!   abstraction with JWKS export, and the secret encryption provider
//! - [`policy`]: the deterministic decision engine
//! - [`webhook`]: outbound webhook signing and receiver-side verification
//! - [`task`]: the evidence-task state machines and deterministic task
//!   identity
//! - [`apikey`]: API-key generation and the prefix + HMAC-digest lookup
//!   scheme
//!
//! Everything here is deterministic given its inputs; the server crate owns
//! databases, caches, blob stores, and clocks.

pub mod apikey;
pub mod canonical;
pub mod crypto;
pub mod policy;
pub mod task;
pub mod webhook;
