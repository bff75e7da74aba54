use super::config::WorkerConfig;
use crate::services::containers::pool::PoolManager;
use crate::services::invocation::{ExecutionDispatcher, ExecutionResult};
use crate::services::registration::{FunctionNotFoundError, RegistrationService};
use crate::services::telemetry::TelemetrySink;
use anyhow::Result;
use hearth_library::transaction::TransactionId;
use hearth_library::types::Technology;
use std::sync::Arc;
use tracing::info;

/// The assembled worker: everything the API surface needs to serve requests.
pub struct HearthWorker {
    pub config: WorkerConfig,
    pub dispatcher: Arc<ExecutionDispatcher>,
    pub registration: Arc<RegistrationService>,
    pub telemetry: Arc<TelemetrySink>,
    pub pools: Arc<PoolManager>,
}

impl HearthWorker {
    /// The single execution operation exposed to the API layer:
    /// look the function up, then dispatch it.
    /// Registry misses propagate unchanged as [FunctionNotFoundError].
    pub async fn execute(
        &self,
        function_id: u32,
        technology: Technology,
        tid: &TransactionId,
    ) -> Result<ExecutionResult> {
        let function = match self.registration.get_function(function_id) {
            Some(f) => f,
            None => return Err(FunctionNotFoundError::boxed(function_id)),
        };
        info!(tid=tid, function_id=function_id, function_name=%function.name, technology=%technology, "Dispatching invocation");
        self.dispatcher.execute(&function, technology, tid).await
    }
}
