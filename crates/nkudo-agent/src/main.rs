//! n-kudo edge agent — enrollment, certificate renewal, heartbeat
//! dispatch, and idempotent plan execution for a single host (§4.6, §6).
//!
//! A standalone binary: no dependency on any other crate in this
//! workspace, talking to the control plane exclusively over its HTTP API.

mod client;
mod config;
mod dispatcher;
mod error;
mod executor;
mod facts;
mod identity;
mod pki;
mod store;
mod vms;
mod wire;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use config::AgentConfig;
use error::{AgentError, Result};
use executor::StubProvider;
use identity::Identity;
use store::ActionStore;

#[derive(Parser)]
#[command(name = "nkudo-agent", version, about = "n-kudo edge agent")]
struct Cli {
    /// Force JSON log output (also via NKUDO_LOG_FORMAT=json).
    #[arg(long, global = true, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First-time enrollment against a control plane (§4.2).
    Enroll {
        #[arg(long)]
        control_plane: String,
        #[arg(long, env = "NKUDO_ENROLL_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        token_file: Option<PathBuf>,
        /// PEM file pinning the control plane's CA for the bootstrap
        /// connection. Without it, the first connection trusts whatever
        /// certificate the server presents (TOFU).
        #[arg(long)]
        ca_cert: Option<PathBuf>,
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
        /// Hostname to enroll as; defaults to the local system hostname.
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Run the dispatcher loop: heartbeat, lease, execute, report (§4.6).
    Run {
        #[arg(long)]
        control_plane: String,
        #[arg(long)]
        heartbeat_interval: Option<u32>,
        /// Run exactly one iteration, then exit (also used by `verify-heartbeat`).
        #[arg(long, default_value = "false")]
        once: bool,
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
        #[arg(long, default_value = "./runtime")]
        runtime_dir: PathBuf,
    },
    /// Print the host-facts payload the dispatcher would send, without
    /// contacting the control plane.
    Hostfacts,
    /// Apply a plan read from a local JSON file directly to the executor,
    /// bypassing the heartbeat/lease round-trip (operator debugging).
    Apply {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
    },
    /// Run a single heartbeat cycle and report whether it succeeded.
    VerifyHeartbeat {
        #[arg(long)]
        control_plane: String,
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
        #[arg(long, default_value = "./runtime")]
        runtime_dir: PathBuf,
    },
    /// Print locally known identity and certificate status.
    Status {
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
    },
    /// Validate local on-disk state (cert expiry, CA trust, directory
    /// permissions) without contacting the control plane.
    Check {
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
    },
    /// Decommission this agent (§4.2).
    Unenroll {
        #[arg(long)]
        control_plane: String,
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
    },
    /// Rotate this agent's client certificate (§4.2).
    Renew {
        #[arg(long)]
        control_plane: String,
        #[arg(long, default_value = "false")]
        rotate_refresh_token: bool,
        #[arg(long, default_value = "./state")]
        state_dir: PathBuf,
        #[arg(long, default_value = "./pki")]
        pki_dir: PathBuf,
    },
    /// Print the agent build version.
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            e.exit_code()
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let use_json = json || std::env::var("NKUDO_LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Enroll {
            control_plane,
            token,
            token_file,
            ca_cert,
            state_dir,
            pki_dir,
            hostname,
        } => cmd_enroll(control_plane, token, token_file, ca_cert, state_dir, pki_dir, hostname).await,
        Commands::Run {
            control_plane,
            heartbeat_interval,
            once,
            state_dir,
            pki_dir,
            runtime_dir,
        } => {
            let config = AgentConfig {
                control_plane,
                state_dir,
                pki_dir,
                runtime_dir,
                heartbeat_interval_secs: heartbeat_interval,
                once,
            };
            cmd_run(config).await
        }
        Commands::Hostfacts => cmd_hostfacts(),
        Commands::Apply { file, state_dir } => cmd_apply(file, state_dir).await,
        Commands::VerifyHeartbeat {
            control_plane,
            state_dir,
            pki_dir,
            runtime_dir,
        } => {
            let config = AgentConfig {
                control_plane,
                state_dir,
                pki_dir,
                runtime_dir,
                heartbeat_interval_secs: None,
                once: true,
            };
            cmd_verify_heartbeat(config).await
        }
        Commands::Status { state_dir, pki_dir } => cmd_status(state_dir, pki_dir),
        Commands::Check { state_dir, pki_dir } => cmd_check(state_dir, pki_dir),
        Commands::Unenroll {
            control_plane,
            state_dir,
            pki_dir,
        } => cmd_unenroll(control_plane, state_dir, pki_dir).await,
        Commands::Renew {
            control_plane,
            rotate_refresh_token,
            state_dir,
            pki_dir,
        } => cmd_renew(control_plane, rotate_refresh_token, state_dir, pki_dir).await,
        Commands::Version => cmd_version(),
    }
}

fn empty_config(state_dir: PathBuf, pki_dir: PathBuf) -> AgentConfig {
    AgentConfig {
        control_plane: String::new(),
        state_dir,
        pki_dir,
        runtime_dir: PathBuf::new(),
        heartbeat_interval_secs: None,
        once: false,
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_enroll(
    control_plane: String,
    token: Option<String>,
    token_file: Option<PathBuf>,
    ca_cert: Option<PathBuf>,
    state_dir: PathBuf,
    pki_dir: PathBuf,
    hostname: Option<String>,
) -> Result<()> {
    let token = resolve_token(token, token_file)?;
    let hostname = match hostname {
        Some(h) => h,
        None => facts::hostname()?,
    };

    let ca_cert_pem = match &ca_cert {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };

    let (csr_pem, private_key_pem) = pki::generate_csr(&hostname)?;
    let client = client::Client::bootstrap(&control_plane, ca_cert_pem.as_deref())?;

    let response = client
        .enroll(&wire::EnrollRequestBody {
            token,
            csr_pem,
            hostname: hostname.clone(),
            host_facts: facts::collect(),
            agent_version: env!("CARGO_PKG_VERSION").to_owned(),
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            host_fingerprint: Some(facts::fingerprint()),
            labels: None,
            nonce: Some(Uuid::new_v4().to_string()),
        })
        .await
        .map_err(|e| match e {
            AgentError::Runtime(msg) => AgentError::EnrollmentRejected(msg),
            other => other,
        })?;

    pki::save_material(&pki_dir, &private_key_pem, &response.certificate_pem, &response.ca_chain_pem)?;

    let identity = Identity {
        tenant_id: response.tenant_id,
        site_id: response.site_id,
        host_id: response.host_id,
        agent_id: response.agent_id,
        refresh_token: response.refresh_token,
    };
    let config = empty_config(state_dir, pki_dir);
    identity.save(&config.identity_path())?;

    tracing::info!(
        agent_id = %identity.agent_id,
        tenant_id = %identity.tenant_id,
        site_id = %identity.site_id,
        heartbeat_interval_seconds = response.heartbeat_interval_seconds,
        "enrollment complete"
    );
    Ok(())
}

fn resolve_token(token: Option<String>, token_file: Option<PathBuf>) -> Result<String> {
    if let Some(t) = token {
        return Ok(t);
    }
    if let Some(path) = token_file {
        return Ok(std::fs::read_to_string(path)?.trim().to_owned());
    }
    Err(AgentError::Config(
        "no enrollment token: pass --token, --token-file, or set NKUDO_ENROLL_TOKEN".to_owned(),
    ))
}

async fn load_authenticated_client(config: &AgentConfig) -> Result<(client::Client, Identity)> {
    let identity = Identity::load(&config.identity_path())?;
    let ca_cert_pem = std::fs::read_to_string(config.ca_cert_path())
        .map_err(|e| AgentError::Config(format!("missing CA certificate: {e}")))?;
    let client_cert_pem = std::fs::read_to_string(config.client_cert_path())
        .map_err(|e| AgentError::Config(format!("missing client certificate: {e}")))?;
    let client_key_pem = std::fs::read_to_string(config.client_key_path())
        .map_err(|e| AgentError::Config(format!("missing client key: {e}")))?;

    if pki::is_expired(&config.client_cert_path(), Utc::now())? {
        return Err(AgentError::CertInvalid(
            "local client certificate has expired, run `renew`".to_owned(),
        ));
    }

    let client =
        client::Client::with_identity(&config.control_plane, &ca_cert_pem, &client_cert_pem, &client_key_pem)?;
    Ok((client, identity))
}

async fn cmd_run(config: AgentConfig) -> Result<()> {
    let (client, identity) = load_authenticated_client(&config).await?;
    let store = ActionStore::open(config.actions_db_path()).await?;
    let provider = StubProvider;

    if config.once {
        dispatcher::run_once(&config, &client, &identity, &store, &provider, false).await?;
        return Ok(());
    }

    let shutdown = tokio::sync::Notify::new();
    let shutdown_signal = async {
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
            () = ctrl_c => {}
            () = terminate => {}
        }
    };

    tokio::select! {
        result = dispatcher::run_forever(&config, &client, &identity, &store, &provider, &shutdown) => result,
        () = shutdown_signal => {
            tracing::info!("shutdown signal received");
            shutdown.notify_waiters();
            Ok(())
        }
    }
}

async fn cmd_verify_heartbeat(config: AgentConfig) -> Result<()> {
    let (client, identity) = load_authenticated_client(&config).await?;
    let store = ActionStore::open(config.actions_db_path()).await?;
    let provider = StubProvider;

    let next = dispatcher::run_once(&config, &client, &identity, &store, &provider, false).await?;
    tracing::info!(next_heartbeat_seconds = next, "heartbeat verified");
    Ok(())
}

fn cmd_hostfacts() -> Result<()> {
    let facts = facts::collect();
    let hostname = facts::hostname().unwrap_or_default();
    let fingerprint = facts::fingerprint();
    tracing::info!(
        hostname = %hostname,
        host_fingerprint = %fingerprint,
        cpu_cores_total = facts.cpu_cores_total,
        memory_bytes_total = facts.memory_bytes_total,
        storage_bytes_total = facts.storage_bytes_total,
        kvm_available = facts.kvm_available,
        hypervisor_available = facts.hypervisor_available,
        "host facts collected"
    );
    Ok(())
}

async fn cmd_apply(file: PathBuf, state_dir: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)?;
    let actions: Vec<wire::PlanActionWire> = serde_json::from_str(&raw)?;

    let store = ActionStore::open(state_dir.join("actions.db")).await?;
    let provider = StubProvider;
    let host_id = Uuid::nil();

    let (executed, _) = executor::execute_plan(&store, &provider, host_id, &actions).await;
    for outcome in &executed {
        if outcome.ok {
            tracing::info!(operation_id = %outcome.operation_id, "action applied");
        } else {
            tracing::error!(
                operation_id = %outcome.operation_id,
                error = ?outcome.error_message,
                "action failed"
            );
        }
    }

    if executed.iter().any(|a| !a.ok) {
        return Err(AgentError::Runtime("one or more actions failed".to_owned()));
    }
    Ok(())
}

fn cmd_status(state_dir: PathBuf, pki_dir: PathBuf) -> Result<()> {
    let config = empty_config(state_dir, pki_dir);
    let identity = Identity::load(&config.identity_path())?;
    let expiry = pki::certificate_expiry(&config.client_cert_path()).ok();

    tracing::info!(
        tenant_id = %identity.tenant_id,
        site_id = %identity.site_id,
        host_id = %identity.host_id,
        agent_id = %identity.agent_id,
        certificate_expires_at = ?expiry,
        "agent status"
    );
    Ok(())
}

fn cmd_check(state_dir: PathBuf, pki_dir: PathBuf) -> Result<()> {
    let config = empty_config(state_dir, pki_dir);
    let mut problems = Vec::new();

    if Identity::load(&config.identity_path()).is_err() {
        problems.push("identity.json missing or unreadable".to_owned());
    }
    if !config.ca_cert_path().exists() {
        problems.push("ca.crt missing".to_owned());
    }
    match pki::is_expired(&config.client_cert_path(), Utc::now()) {
        Ok(true) => problems.push("client certificate is expired".to_owned()),
        Ok(false) => {}
        Err(e) => problems.push(format!("client certificate unreadable: {e}")),
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(config.client_key_path()) {
            if meta.permissions().mode() & 0o077 != 0 {
                problems.push("client.key permissions are more permissive than 0600".to_owned());
            }
        }
    }

    if problems.is_empty() {
        tracing::info!("check passed: local agent state is healthy");
        Ok(())
    } else {
        for problem in &problems {
            tracing::error!(problem = %problem, "check failed");
        }
        Err(AgentError::Runtime(format!("{} problem(s) found in local state", problems.len())))
    }
}

async fn cmd_unenroll(control_plane: String, state_dir: PathBuf, pki_dir: PathBuf) -> Result<()> {
    let config = AgentConfig {
        control_plane,
        ..empty_config(state_dir, pki_dir)
    };
    let (client, identity) = load_authenticated_client(&config).await?;

    client
        .unenroll(&wire::UnenrollRequestBody {
            tenant_id: identity.tenant_id,
            agent_id: identity.agent_id,
        })
        .await?;

    tracing::info!(agent_id = %identity.agent_id, "unenrolled");
    Ok(())
}

async fn cmd_renew(
    control_plane: String,
    rotate_refresh_token: bool,
    state_dir: PathBuf,
    pki_dir: PathBuf,
) -> Result<()> {
    let config = AgentConfig {
        control_plane,
        ..empty_config(state_dir, pki_dir.clone())
    };
    let (client, mut identity) = load_authenticated_client(&config).await?;
    let hostname = facts::hostname()?;
    let (csr_pem, private_key_pem) = pki::generate_csr(&hostname)?;

    let response = client
        .renew(&wire::RenewRequestBody {
            tenant_id: identity.tenant_id,
            agent_id: identity.agent_id,
            csr_pem,
            refresh_token: identity.refresh_token.clone(),
            rotate_refresh_token,
        })
        .await
        .map_err(|e| match e {
            AgentError::Runtime(msg) => AgentError::CertInvalid(msg),
            other => other,
        })?;

    let ca_chain_pem = std::fs::read_to_string(config.ca_cert_path())?;
    pki::save_material(&pki_dir, &private_key_pem, &response.certificate_pem, &ca_chain_pem)?;

    if let Some(new_refresh_token) = response.refresh_token {
        identity.refresh_token = new_refresh_token;
        identity.save(&config.identity_path())?;
    }

    tracing::info!(serial = %response.serial, "certificate renewed");
    Ok(())
}

fn cmd_version() -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nkudo-agent");
    Ok(())
}
