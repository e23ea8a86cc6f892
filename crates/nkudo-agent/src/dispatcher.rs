//! Dispatcher loop (§4.6, §5): heartbeat, lease, execute, report, sleep.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::client::Client;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::executor::{self, Provider};
use crate::identity::Identity;
use crate::store::ActionStore;
use crate::wire::{
    HeartbeatRequestBody, LogEntryWire, LogSeverity, ReportResultsRequestBody,
};
use crate::{facts, vms};

/// Run exactly one heartbeat-and-execute cycle, returning the interval the
/// caller should sleep before the next one.
pub async fn run_once(
    config: &AgentConfig,
    client: &Client,
    identity: &Identity,
    store: &ActionStore,
    provider: &dyn Provider,
    shutting_down: bool,
) -> Result<u32> {
    let host_facts = facts::collect();
    let local_vms = vms::load(&config.vms_path())?;

    let request = HeartbeatRequestBody {
        tenant_id: identity.tenant_id,
        site_id: identity.site_id,
        host_id: identity.host_id,
        agent_id: identity.agent_id,
        sent_at: Utc::now(),
        host_facts,
        // The overlay-mesh client is an out-of-scope external collaborator
        // (§1) — only its status-query interface is named, so there is
        // nothing to populate here without a mesh implementation.
        mesh_status: None,
        vms: local_vms,
        shutdown: shutting_down,
    };

    let response = client.heartbeat(&request).await?;
    tracing::info!(
        pending_plans = response.pending_plans.len(),
        next_heartbeat_seconds = response.next_heartbeat_seconds,
        site_connectivity = ?response.site_connectivity,
        "heartbeat acknowledged"
    );

    for plan in response.pending_plans {
        tracing::info!(plan_id = %plan.id, actions = plan.actions.len(), "executing leased plan");

        let (executed, reports) =
            executor::execute_plan(store, provider, identity.host_id, &plan.actions).await;

        let mut log_entries = Vec::with_capacity(executed.len());
        for (action, outcome) in plan.actions.iter().zip(executed.iter()) {
            let severity = if outcome.ok { LogSeverity::Info } else { LogSeverity::Error };
            let message = outcome.error_message.clone().unwrap_or_else(|| {
                format!("action {} completed successfully", outcome.operation_id)
            });
            log_entries.push(LogEntryWire {
                execution_id: action.execution_id,
                sequence: 0,
                severity,
                message,
                emitted_at: Utc::now(),
            });
        }

        if !reports.is_empty() {
            client
                .report_results(&ReportResultsRequestBody {
                    tenant_id: identity.tenant_id,
                    plan_id: plan.id,
                    agent_id: identity.agent_id,
                    results: reports,
                })
                .await?;
        }

        if !log_entries.is_empty() {
            ship_logs_best_effort(client, identity.tenant_id, identity.agent_id, log_entries).await;
        }
    }

    Ok(response.next_heartbeat_seconds)
}

/// Log shipping never blocks the dispatcher (§7): failures are logged
/// locally and dropped.
async fn ship_logs_best_effort(client: &Client, tenant_id: Uuid, agent_id: Uuid, entries: Vec<LogEntryWire>) {
    let body = crate::wire::IngestLogsRequestBody { tenant_id, agent_id, entries };
    if let Err(e) = client.send_logs(&body).await {
        tracing::warn!(error = %e, "failed to ship execution logs, dropping");
    }
}

/// Run the dispatcher loop until `shutdown` fires. `--once` callers should
/// use [`run_once`] directly instead.
pub async fn run_forever(
    config: &AgentConfig,
    client: &Client,
    identity: &Identity,
    store: &ActionStore,
    provider: &dyn Provider,
    shutdown: &tokio::sync::Notify,
) -> Result<()> {
    loop {
        let next_interval = match run_once(config, client, identity, store, provider, false).await {
            Ok(secs) => secs,
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat cycle failed, backing off");
                config.heartbeat_interval_secs.unwrap_or(30)
            }
        };

        let sleep_for = config
            .heartbeat_interval_secs
            .unwrap_or(next_interval)
            .max(1);

        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(u64::from(sleep_for))) => {}
            () = shutdown.notified() => {
                tracing::info!("shutdown requested, sending final heartbeat");
                let _ = run_once(config, client, identity, store, provider, true).await;
                return Ok(());
            }
        }
    }
}
