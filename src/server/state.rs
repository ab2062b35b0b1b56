use crate::config::BrokerConfig;
use crate::metrics::Metrics;
use crate::scheduler::Queue;
use crate::store::Store;
use std::sync::Arc;

/// Shared broker state, cheaply cloneable — handed to every Front Door
/// connection. The queue is thread-safe, so many connections can enqueue
/// concurrently against the one scheduler worker.
#[derive(Clone)]
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    pub metrics: Metrics,
    pub queue: Arc<Queue>,
    pub store: Arc<dyn Store>,
}

impl BrokerState {
    pub fn new(config: Arc<BrokerConfig>, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            metrics: Metrics::install(),
            queue: Queue::new(),
            store,
        }
    }
}
