use crate::transaction::TransactionId;
use std::sync::Arc;
use tokio::runtime::Runtime;

pub type TokioRuntime = Arc<Runtime>;

fn missing_or_zero_default(opt: &Option<u32>, default: u32) -> u32 {
    match opt {
        Some(0) | None => default,
        Some(i) => *i,
    }
}

pub fn build_tokio_runtime(
    tokio_event_interval: &Option<u32>,
    tokio_queue_interval: &Option<u32>,
    _tid: &TransactionId,
) -> anyhow::Result<TokioRuntime> {
    let event = missing_or_zero_default(tokio_event_interval, 61);
    let queue = missing_or_zero_default(tokio_queue_interval, 31);

    match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .event_interval(event)
        .global_queue_interval(queue)
        .build()
    {
        Ok(rt) => Ok(Arc::new(rt)),
        Err(e) => {
            anyhow::bail!(format!("Tokio thread runtime for main failed to start because: {}", e));
        },
    }
}
