//! Dispatch algorithm: collect matching subscriptions for an event, order them, and run
//! each handler under its own concurrency gate and timeout.
//!
//! Grounded on `core::event_bus::EventBus`'s reducer-dispatch loop (collect candidates,
//! iterate, log failures without aborting the batch) generalized per spec §4.1: handlers
//! run concurrently rather than sequentially, each gated by a semaphore bounding how many
//! invocations of that one handler may be in flight, and each subject to a per-dispatch
//! timeout so one slow handler cannot stall the whole event.

use crate::subscription::{Subscription, SubscriptionRegistry};
use platform_core::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Outcome of dispatching one event to one matched subscription.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The subscription id that was invoked.
    pub subscription_id: String,
    /// `Ok(())` on success, `Err(reason)` on handler failure or timeout.
    pub result: Result<(), String>,
}

/// Per-handler concurrency and timeout configuration for [`dispatch`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum concurrent invocations of a single handler.
    pub max_concurrency_per_handler: usize,
    /// Maximum time a single handler invocation may run before it is treated as failed.
    pub handler_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency_per_handler: 10,
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatch `event` to every subscription in `registry` whose topic and filter match,
/// highest priority first, each handler gated by its own semaphore slot (allocated
/// per-call rather than cached per-subscription, trading a small per-dispatch allocation
/// for not needing to size the gate ahead of subscription count) and timeout.
///
/// Handler failures are collected into the returned outcomes rather than short-circuiting
/// the batch — one failing handler must not prevent delivery to the others.
pub async fn dispatch(
    registry: &SubscriptionRegistry,
    event: &Event,
    config: &DispatchConfig,
) -> Vec<DispatchOutcome> {
    let topic = event.topic();
    let mut candidates: Vec<Arc<Subscription>> = registry
        .candidates_for(&topic)
        .into_iter()
        .filter(|sub| sub.filter.matches(event))
        .collect();

    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    let gate = Arc::new(Semaphore::new(config.max_concurrency_per_handler));
    let futures = candidates.into_iter().map(|sub| {
        let gate = gate.clone();
        let timeout = config.handler_timeout;
        async move {
            // The semaphore is never closed; it's owned by this call and never drops early.
            #[allow(clippy::expect_used)]
            let _permit = gate.acquire().await.expect("dispatch semaphore closed");
            let result = match tokio::time::timeout(timeout, sub.handler.handle(event)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        topic = %sub.topic,
                        error = %e,
                        "handler failed"
                    );
                    metrics::counter!("eventbus.handler.failed", "topic" => sub.topic.clone())
                        .increment(1);
                    Err(e.reason)
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        topic = %sub.topic,
                        timeout_ms = timeout.as_millis() as u64,
                        "handler timed out"
                    );
                    metrics::counter!("eventbus.handler.timeout", "topic" => sub.topic.clone())
                        .increment(1);
                    Err("handler timed out".to_string())
                }
            };
            DispatchOutcome {
                subscription_id: sub.id.clone(),
                result,
            }
        }
    });

    futures::future::join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::EventFilter;
    use crate::handler::{DirectHandler, Handler};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn dispatches_in_priority_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (priority, label) in [(1, "low"), (10, "high"), (5, "mid")] {
            let order = order.clone();
            let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(label);
                    Ok(())
                }
            }));
            registry.subscribe("order.placed", EventFilter::any(), handler, priority, None);
        }

        let event = Event::new("order.placed", json!({}));
        let outcomes = dispatch(&registry, &event, &DispatchConfig::default()).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }

    #[tokio::test]
    async fn filter_mismatch_excludes_handler() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        registry.subscribe(
            "order.placed",
            EventFilter::for_event_type("order.cancelled"),
            handler,
            0,
            None,
        );

        let event = Event::new("order.placed", json!({}));
        let outcomes = dispatch(&registry, &event, &DispatchConfig::default()).await;
        assert!(outcomes.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_handler_times_out_without_blocking_others() {
        let registry = SubscriptionRegistry::new();
        let slow: Arc<dyn Handler> = Arc::new(DirectHandler::new(|_: &Event| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }));
        registry.subscribe("order.placed", EventFilter::any(), slow, 0, None);

        let config = DispatchConfig {
            max_concurrency_per_handler: 10,
            handler_timeout: Duration::from_millis(10),
        };
        let event = Event::new("order.placed", json!({}));
        let outcomes = dispatch(&registry, &event, &config).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
    }
}
