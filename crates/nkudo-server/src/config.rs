//! Server configuration for the n-kudo control plane.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `NKUDO_*` environment variables.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTPS listener to.
    pub bind_addr: SocketAddr,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Directory holding the control plane's own CA and server TLS material.
    pub pki_dir: String,
    /// Common name for a freshly generated root CA, if none exists on disk yet.
    pub ca_common_name: String,
    /// Root CA validity window, in days, used only when generating a fresh root.
    pub ca_ttl_days: i64,
    /// Default client-certificate validity window in days (clamped to 90 by the PKI engine).
    pub client_cert_ttl_days: i64,
    /// Base heartbeat interval handed to agents, in seconds.
    pub heartbeat_interval_secs: u32,
    /// How often the offline sweeper runs, in seconds.
    pub sweep_interval_secs: u64,
    /// How often the audit-chain verifier walks the table, in seconds.
    pub audit_verify_interval_secs: u64,
    /// Opaque bearer token required on the admin/operator surface
    /// (`/tenants/*`, `/sites/*/plans`, `GET /sites/*/executions`, ...).
    pub control_token: String,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (Railway convention, binds to `0.0.0.0`)
    /// - `NKUDO_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8443`)
    /// - `DATABASE_URL` — PostgreSQL connection string (default: `postgres://localhost/nkudo`)
    /// - `NKUDO_LOG_LEVEL` — log filter (default: `info`)
    /// - `NKUDO_PKI_DIR` — directory for CA/server TLS material (default: `./pki`)
    /// - `NKUDO_CA_COMMON_NAME` — CN for a freshly generated root CA (default: `n-kudo control plane`)
    /// - `NKUDO_CA_TTL_DAYS` — root CA validity in days (default: `3650`)
    /// - `NKUDO_CLIENT_CERT_TTL_DAYS` — default client cert validity in days (default: `90`)
    /// - `NKUDO_HEARTBEAT_INTERVAL` — seconds between agent heartbeats (default: `30`)
    /// - `NKUDO_SWEEP_INTERVAL` — seconds between sweeper passes (default: `30`)
    /// - `NKUDO_AUDIT_VERIFY_INTERVAL` — seconds between audit-chain verifier passes (default: `300`)
    /// - `NKUDO_CONTROL_TOKEN` — bearer token for the admin/operator surface (required in production)
    #[must_use]
    pub fn from_env() -> Self {
        // Priority: NKUDO_BIND_ADDR > PORT (Railway) > default 127.0.0.1:8443
        let bind_addr = if let Ok(addr) = std::env::var("NKUDO_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8443)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8443);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8443))
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/nkudo".to_owned());

        let log_level = std::env::var("NKUDO_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let pki_dir = std::env::var("NKUDO_PKI_DIR").unwrap_or_else(|_| "./pki".to_owned());

        let ca_common_name = std::env::var("NKUDO_CA_COMMON_NAME")
            .unwrap_or_else(|_| "n-kudo control plane".to_owned());

        let ca_ttl_days = std::env::var("NKUDO_CA_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3650);

        let client_cert_ttl_days = std::env::var("NKUDO_CLIENT_CERT_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90);

        let heartbeat_interval_secs = std::env::var("NKUDO_HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let sweep_interval_secs = std::env::var("NKUDO_SWEEP_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let audit_verify_interval_secs = std::env::var("NKUDO_AUDIT_VERIFY_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let control_token = std::env::var("NKUDO_CONTROL_TOKEN").unwrap_or_else(|_| {
            tracing::warn!(
                "NKUDO_CONTROL_TOKEN not set — generating an ephemeral token for this process only"
            );
            nkudo_core::admin::generate_secret()
        });

        Self {
            bind_addr,
            database_url,
            log_level,
            pki_dir,
            ca_common_name,
            ca_ttl_days,
            client_cert_ttl_days,
            heartbeat_interval_secs,
            sweep_interval_secs,
            audit_verify_interval_secs,
            control_token,
        }
    }
}
