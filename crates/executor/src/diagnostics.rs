use fusiongate_planner::{NodeId, OperationPlan, ServerError};

/// Hooks observing the lifecycle of an operation. Every hook defaults to a no-op.
pub trait ExecutionDiagnostics: Send + Sync {
    fn execute_operation(&self, _operation_name: Option<&str>) {}

    fn plan_completed(&self, _plan: &OperationPlan, _cached: bool) {}

    fn node_dispatched(&self, _node: NodeId, _schema: &str) {}

    fn node_completed(&self, _node: NodeId, _errors: &[ServerError]) {}
}

pub struct NoopDiagnostics;

impl ExecutionDiagnostics for NoopDiagnostics {}
