//! n-kudo control plane entry point.
//!
//! Bootstraps the database pool, the control plane's own CA material, and
//! the mTLS-terminating HTTP server, then starts the offline sweeper as a
//! background worker alongside it. Both are cancelled on graceful shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use nkudo_core::pki::CaMaterial;
use nkudo_server::config::ServerConfig;
use nkudo_server::mtls::MtlsAcceptor;
use nkudo_server::state::AppState;
use nkudo_server::{hardening, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Hardening runs before logging is initialized, so we use eprintln.
    apply_hardening();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(bind_addr = %config.bind_addr, "n-kudo control plane starting");

    let pool = nkudo_storage::pool::connect(&config.database_url, 10)
        .await
        .context("failed to connect to database")?;

    let ca = Arc::new(load_or_generate_ca(&config).context("failed to bootstrap CA material")?);

    let instance_id = uuid::Uuid::new_v4().to_string();
    let state = Arc::new(AppState {
        pool,
        ca: Arc::clone(&ca),
        config: config.clone(),
        instance_id: instance_id.clone(),
    });

    let sweeper_shutdown = tokio::sync::Notify::new();
    let sweeper_shutdown = Arc::new(sweeper_shutdown);
    let sweeper_handle = {
        let state = Arc::clone(&state);
        let shutdown = Arc::clone(&sweeper_shutdown);
        tokio::spawn(async move { sweeper_worker(state, shutdown).await })
    };

    let verifier_shutdown = Arc::new(tokio::sync::Notify::new());
    let verifier_handle = {
        let state = Arc::clone(&state);
        let shutdown = Arc::clone(&verifier_shutdown);
        tokio::spawn(async move { audit_verifier_worker(state, shutdown).await })
    };

    let app = routes::router().with_state(Arc::clone(&state));

    let tls_config = ca
        .server_tls_config()
        .context("failed to build server TLS configuration")?;
    let acceptor = MtlsAcceptor::new(Arc::new(tls_config));

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping server");
        shutdown_handle.shutdown();
    });

    info!(addr = %config.bind_addr, "n-kudo control plane listening");

    axum_server::bind(config.bind_addr)
        .acceptor(acceptor)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("server error")?;

    sweeper_shutdown.notify_waiters();
    verifier_shutdown.notify_waiters();
    nkudo_core::sweeper::release_leadership(&state.pool, &instance_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to release sweeper leadership on shutdown: {e}"))?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), sweeper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), verifier_handle).await;

    info!("n-kudo control plane stopped");
    Ok(())
}

/// Load CA material from `pki_dir`, generating and persisting a fresh root
/// on first boot.
fn load_or_generate_ca(config: &ServerConfig) -> anyhow::Result<CaMaterial> {
    let pki_dir = PathBuf::from(&config.pki_dir);
    let cert_path = pki_dir.join("ca.crt");
    let key_path = pki_dir.join("ca.key");

    if cert_path.exists() && key_path.exists() {
        info!(pki_dir = %config.pki_dir, "loading existing CA material");
        let cert_pem = std::fs::read_to_string(&cert_path)
            .with_context(|| format!("failed to read {}", cert_path.display()))?;
        let key_pem = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read {}", key_path.display()))?;
        return CaMaterial::load(&cert_pem, &key_pem)
            .map_err(|e| anyhow::anyhow!("failed to load CA material: {e}"));
    }

    info!(
        pki_dir = %config.pki_dir,
        common_name = %config.ca_common_name,
        "no CA material found, generating a fresh root"
    );
    std::fs::create_dir_all(&pki_dir)
        .with_context(|| format!("failed to create {}", pki_dir.display()))?;

    let (ca, private_key_pem) = CaMaterial::generate_root(&config.ca_common_name, config.ca_ttl_days)
        .map_err(|e| anyhow::anyhow!("failed to generate root CA: {e}"))?;

    std::fs::write(&cert_path, &ca.certificate_pem)
        .with_context(|| format!("failed to write {}", cert_path.display()))?;
    write_private_key(&key_path, &private_key_pem)
        .with_context(|| format!("failed to write {}", key_path.display()))?;

    Ok(ca)
}

#[cfg(unix)]
fn write_private_key(path: &Path, pem: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, pem)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, pem: &str) -> std::io::Result<()> {
    std::fs::write(path, pem)
}

/// Background worker that races for sweeper leadership and, while holding
/// it, runs one sweep per `sweep_interval_secs` (§4.5).
async fn sweeper_worker(state: Arc<AppState>, shutdown: Arc<tokio::sync::Notify>) {
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.sweep_interval_secs));
    info!(interval_secs = state.config.sweep_interval_secs, "sweeper worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = chrono::Utc::now();
                match nkudo_core::sweeper::run_if_leader(&state.pool, &state.instance_id, now).await {
                    Ok(Some(report)) => {
                        if report.degraded > 0 || report.offlined > 0 || report.leases_cleared > 0 {
                            info!(
                                degraded = report.degraded,
                                offlined = report.offlined,
                                leases_cleared = report.leases_cleared,
                                "sweep complete"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "sweep failed"),
                }
            }
            () = shutdown.notified() => {
                info!("sweeper worker shutting down");
                return;
            }
        }
    }
}

/// Background worker that periodically walks the audit chain and flips
/// `chain_valid` on any row whose recomputed hash no longer matches (§4.7).
/// Unlike the sweeper this runs on every instance — verification is
/// read-mostly and idempotent, so there is no need to elect a single leader.
async fn audit_verifier_worker(state: Arc<AppState>, shutdown: Arc<tokio::sync::Notify>) {
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.audit_verify_interval_secs));
    info!(
        interval_secs = state.config.audit_verify_interval_secs,
        "audit verifier worker started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match nkudo_core::audit::verify_chain(&state.pool).await {
                    Ok(report) => {
                        if let Some(sequence) = report.first_mismatch_sequence {
                            // Out-of-band alert hook: the verifier has already persisted
                            // chain_valid = false for the tainted rows, this is purely
                            // for operator visibility.
                            tracing::error!(
                                sequence,
                                events_checked = report.events_checked,
                                "audit chain integrity violation detected"
                            );
                        } else {
                            tracing::debug!(events_checked = report.events_checked, "audit chain verified clean");
                        }
                    }
                    Err(e) => warn!(error = %e, "audit chain verification failed"),
                }
            }
            () = shutdown.notified() => {
                info!("audit verifier worker shutting down");
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Apply production hardening before logging is initialized.
#[allow(clippy::print_stderr)]
fn apply_hardening() {
    if let Err(e) = hardening::disable_core_dumps() {
        eprintln!("WARNING: failed to disable core dumps: {e}");
    }
    if let Err(e) = hardening::lock_memory() {
        eprintln!("WARNING: failed to lock memory: {e}");
    }
}
