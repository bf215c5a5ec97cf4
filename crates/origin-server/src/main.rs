//! origin-server - upload governance API and workers.
//!
//! The composition root: configuration, database, cache, blob store,
//! signer, and encryption provider are constructed here exactly once and
//! passed down as an explicit [`AppState`]. Startup is fail-fast: a
//! production process with a local signer or encryption provider, an
//! unreachable KMS key, or a missing encryption salt exits before binding
//! the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use origin_core::crypto::{EncryptionProvider, KeyStore, LocalEncryption, LocalKeyStore};

use origin_server::blob::BlobStore;
use origin_server::broker::TaskBroker;
use origin_server::cache::Cache;
use origin_server::config::{Config, EncryptionProviderKind, SigningProvider};
use origin_server::crypto_kms::{KmsEncryption, KmsKeyStore};
use origin_server::inference::InferenceService;
use origin_server::metrics::Metrics;
use origin_server::state::AppState;
use origin_server::{evidence, ledger, routes, storage, webhooks};

/// ORIGIN upload-governance service.
#[derive(Parser, Debug)]
#[command(name = "origin-server")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the API server and background workers (default).
    Serve,

    /// Verify a tenant's ledger hash chain and exit non-zero on damage.
    VerifyLedger {
        /// Tenant whose chain to walk.
        #[arg(long)]
        tenant_id: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => runtime.block_on(serve()),
        Command::VerifyLedger { tenant_id } => runtime.block_on(verify_ledger(tenant_id)),
    }
}

async fn serve() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    info!(environment = config.environment.as_str(), "starting origin-server");

    let db = storage::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    storage::MIGRATOR
        .run(&db)
        .await
        .context("applying migrations")?;

    let cache = Cache::connect(&config.cache_url)
        .await
        .context("connecting to cache")?;
    let broker = TaskBroker::new(cache.connection());

    let blob = Arc::new(
        BlobStore::from_config(&config.blob, &config.blob_bucket)
            .context("constructing blob store")?,
    );

    let needs_kms = config.signing_provider == SigningProvider::AwsKms
        || config.webhook_encryption_provider == EncryptionProviderKind::AwsKms;
    let kms_client = if needs_kms {
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Some(aws_sdk_kms::Client::new(&aws))
    } else {
        None
    };

    let signer: Arc<dyn KeyStore> = match config.signing_provider {
        SigningProvider::Local => {
            // Config validation already confined this to development.
            let store = LocalKeyStore::load_or_generate(&config.signing_key_path)
                .context("loading local signing key")?;
            info!(key_id = store.active_key_id(), "local signer ready");
            Arc::new(store)
        }
        SigningProvider::AwsKms => {
            let key_id = config
                .signing_key_id
                .clone()
                .context("SIGNING_KEY_ID required for aws_kms")?;
            let store = KmsKeyStore::load(
                kms_client.clone().context("KMS client unavailable")?,
                key_id,
            )
            .await
            .context("connecting to KMS signing key")?;
            info!(key_id = store.active_key_id(), "KMS signer ready");
            Arc::new(store)
        }
    };

    let encryption: Arc<dyn EncryptionProvider> = match config.webhook_encryption_provider {
        EncryptionProviderKind::Local => {
            let salt = config
                .local_encryption_salt
                .as_ref()
                .context("LOCAL_ENCRYPTION_SALT required for local encryption")?;
            let salt_bytes = decode_salt(salt.expose_secret());
            Arc::new(
                LocalEncryption::new(config.server_secret.expose_secret(), &salt_bytes)
                    .context("deriving local encryption key")?,
            )
        }
        EncryptionProviderKind::AwsKms => {
            let key_id = config
                .webhook_encryption_key_id
                .clone()
                .context("WEBHOOK_ENCRYPTION_KEY_ID required for aws_kms")?;
            Arc::new(
                KmsEncryption::load(kms_client.context("KMS client unavailable")?, key_id)
                    .await
                    .context("connecting to KMS encryption key")?,
            )
        }
    };

    let inference = Arc::new(InferenceService::new(config.ml_model_path.as_deref()));
    let metrics = Arc::new(Metrics::new());
    let http = reqwest::Client::builder()
        .timeout(config.webhook_timeout)
        .build()
        .context("building HTTP client")?;

    let state = AppState {
        config: Arc::new(config),
        db,
        cache,
        blob,
        broker,
        signer,
        encryption,
        inference,
        metrics,
        http,
    };

    let shutdown = CancellationToken::new();

    let mut workers = Vec::new();
    for _ in 0..state.config.evidence_workers {
        workers.push(tokio::spawn(evidence::worker::run(
            state.clone(),
            shutdown.clone(),
        )));
    }
    workers.push(tokio::spawn(webhooks::dispatcher::run(
        state.clone(),
        shutdown.clone(),
    )));

    let bind_addr = state.config.bind_addr;
    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(addr = %bind_addr, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        server_shutdown.cancel();
    })
    .await
    .context("server error")?;

    info!("draining background workers");
    shutdown.cancel();
    for worker in workers {
        if let Err(err) = worker.await {
            warn!(error = %err, "worker join failed");
        }
    }

    Ok(())
}

async fn verify_ledger(tenant_id: i64) -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    let db = storage::connect(&config.database_url)
        .await
        .context("connecting to database")?;

    let verification = ledger::verify_chain(&db, tenant_id)
        .await
        .context("walking ledger chain")?;

    println!("{}", serde_json::to_string_pretty(&verification)?);
    if !verification.ok {
        bail!(
            "ledger verification failed for tenant {tenant_id}: {}",
            verification.error.unwrap_or_default()
        );
    }
    info!(
        tenant_id,
        events_checked = verification.events_checked,
        "ledger chain intact"
    );
    Ok(())
}

/// Salts may be supplied base64-encoded or as raw text.
fn decode_salt(raw: &str) -> Vec<u8> {
    BASE64
        .decode(raw)
        .unwrap_or_else(|_| raw.as_bytes().to_vec())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = sigint.recv() => info!("SIGINT received"),
    }
}
