//! Idempotent action executor (§4.6).
//!
//! For each action of a leased plan: check the durable cache first, then
//! dispatch to the provider, then record the outcome before moving on.
//! Execution stops at the first failed action — the remaining actions of
//! that plan are reported as skipped, and no compensating rollback is
//! attempted (§4.6, §9: that is the operator's job via a new plan).

use chrono::Utc;
use uuid::Uuid;

use crate::store::{ActionResult, ActionStore};
use crate::wire::{ActionResultWire, OperationType, PlanActionWire};

/// The microVM hypervisor is an out-of-scope external collaborator (§1):
/// this trait is the seam the executor dispatches through, and
/// [`StubProvider`] is the only implementation carried in this repository.
/// A real deployment supplies its own.
pub trait Provider: Send + Sync {
    /// # Errors
    ///
    /// Returns a human-readable failure reason; the executor turns this
    /// into `ActionResult{ ok: false, error_code: Some("ACTION_FAILED") }`.
    fn create(&self, action: &PlanActionWire) -> Result<(), String>;
    fn start(&self, action: &PlanActionWire) -> Result<(), String>;
    fn stop(&self, action: &PlanActionWire) -> Result<(), String>;
    fn delete(&self, action: &PlanActionWire) -> Result<(), String>;

    fn dispatch(&self, action: &PlanActionWire) -> Result<(), String> {
        match action.operation_type {
            OperationType::Create => self.create(action),
            OperationType::Start => self.start(action),
            OperationType::Stop => self.stop(action),
            OperationType::Delete => self.delete(action),
        }
    }
}

/// No-op provider: every action reports success. Stands in for the real
/// hypervisor driver, which is out of scope (§1).
pub struct StubProvider;

impl Provider for StubProvider {
    fn create(&self, _action: &PlanActionWire) -> Result<(), String> {
        Ok(())
    }

    fn start(&self, _action: &PlanActionWire) -> Result<(), String> {
        Ok(())
    }

    fn stop(&self, _action: &PlanActionWire) -> Result<(), String> {
        Ok(())
    }

    fn delete(&self, _action: &PlanActionWire) -> Result<(), String> {
        Ok(())
    }
}

/// One action's execution outcome, reported back to the control plane
/// (§4.3's `PlanResult`).
pub struct ExecutedAction {
    pub operation_id: String,
    pub ok: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Execute `actions` in order against `provider`, consulting and updating
/// `store` for each one. Stops at the first failure and returns only the
/// actions actually attempted.
pub async fn execute_plan(
    store: &ActionStore,
    provider: &dyn Provider,
    host_id: Uuid,
    actions: &[PlanActionWire],
) -> (Vec<ExecutedAction>, Vec<ActionResultWire>) {
    let mut executed = Vec::with_capacity(actions.len());
    let mut reports = Vec::with_capacity(actions.len());

    for action in actions {
        if let Some(cached) = store.get(&action.operation_id).await {
            tracing::debug!(operation_id = %action.operation_id, "action already executed, replaying cached result");
            let ok = cached.ok;
            executed.push(ExecutedAction {
                operation_id: cached.operation_id.clone(),
                ok,
                error_code: cached.error_code.clone(),
                error_message: cached.message.clone(),
            });
            reports.push(to_wire(&cached, host_id));
            if !ok {
                break;
            }
            continue;
        }

        let started_at = Utc::now();
        let outcome = provider.dispatch(action);
        let finished_at = Utc::now();
        let ok = outcome.is_ok();
        let error_message = outcome.err();
        let error_code = error_message.as_ref().map(|_| "ACTION_FAILED".to_owned());

        let result = ActionResult {
            operation_id: action.operation_id.clone(),
            ok,
            error_code: error_code.clone(),
            message: error_message.clone(),
            started_at,
            finished_at,
        };

        if let Err(e) = store.record(result.clone()).await {
            tracing::error!(operation_id = %action.operation_id, error = %e, "failed to persist action result");
        }

        executed.push(ExecutedAction {
            operation_id: action.operation_id.clone(),
            ok,
            error_code,
            error_message,
        });
        reports.push(to_wire(&result, host_id));

        if !ok {
            break;
        }
    }

    (executed, reports)
}

fn to_wire(result: &ActionResult, host_id: Uuid) -> ActionResultWire {
    ActionResultWire {
        operation_id: result.operation_id.clone(),
        ok: result.ok,
        error_code: result.error_code.clone(),
        error_message: result.message.clone(),
        started_at: result.started_at,
        finished_at: result.finished_at,
        host_id: Some(host_id),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct FailingProvider;

    impl Provider for FailingProvider {
        fn create(&self, _action: &PlanActionWire) -> Result<(), String> {
            Err("provider unavailable".to_owned())
        }
        fn start(&self, _action: &PlanActionWire) -> Result<(), String> {
            Ok(())
        }
        fn stop(&self, _action: &PlanActionWire) -> Result<(), String> {
            Ok(())
        }
        fn delete(&self, _action: &PlanActionWire) -> Result<(), String> {
            Ok(())
        }
    }

    fn action(operation_id: &str, op: OperationType) -> PlanActionWire {
        PlanActionWire {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            operation_id: operation_id.to_owned(),
            operation_type: op,
            vm_id: None,
            payload: serde_json::json!({}),
            sort_order: 0,
            execution_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ActionStore::open(dir.path().join("actions.db")).await.expect("open");
        let actions = vec![
            action("op-1", OperationType::Create),
            action("op-2", OperationType::Start),
        ];

        let (executed, reports) =
            execute_plan(&store, &FailingProvider, Uuid::new_v4(), &actions).await;

        assert_eq!(executed.len(), 1);
        assert!(!executed[0].ok);
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn replays_cached_result_without_recalling_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ActionStore::open(dir.path().join("actions.db")).await.expect("open");
        let actions = vec![action("op-1", OperationType::Create)];

        let (first, _) = execute_plan(&store, &StubProvider, Uuid::new_v4(), &actions).await;
        assert!(first[0].ok);

        // Re-execute the same plan against a fresh store handle over the
        // same file, simulating redelivery after a crash.
        let reopened = ActionStore::open(dir.path().join("actions.db")).await.expect("reopen");
        let (second, _) = execute_plan(&reopened, &StubProvider, Uuid::new_v4(), &actions).await;
        assert!(second[0].ok);
    }
}
