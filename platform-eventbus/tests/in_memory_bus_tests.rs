//! End-to-end dispatch/filtering/ordering tests against the in-memory bus, exercising the
//! same `filter -> dispatch -> handler` path the Kafka-backed bus uses without requiring a
//! running broker.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code uses expect/unwrap for clear failure messages

use platform_core::{Event, EventMetadata, Priority};
use platform_eventbus::{DirectHandler, EventFilter, Handler, InMemoryEventBus};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn higher_priority_subscriptions_run_before_lower_priority_ones() {
    let bus = InMemoryEventBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (priority, label) in [(0, "first"), (100, "second"), (50, "third")] {
        let order = order.clone();
        let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(label);
                Ok(())
            }
        }));
        bus.subscribe("payment.captured", EventFilter::any(), handler, priority);
    }

    bus.publish(Event::new("payment.captured", json!({}))).await;

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec!["second", "third", "first"]);
}

#[tokio::test]
async fn tenant_filter_excludes_events_from_other_tenants() {
    let bus = InMemoryEventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let mut filter = EventFilter::any();
    filter.tenant_ids = vec!["tenant-a".to_string()];
    bus.subscribe("invoice.created", filter, handler, 0);

    let wrong_tenant = Event::new("invoice.created", json!({}))
        .with_metadata(EventMetadata::new().with_tenant_id("tenant-b"));
    bus.publish(wrong_tenant).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let right_tenant = Event::new("invoice.created", json!({}))
        .with_metadata(EventMetadata::new().with_tenant_id("tenant-a"));
    bus.publish(right_tenant).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wildcard_subscription_receives_every_topic() {
    let bus = InMemoryEventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));
    bus.subscribe("*", EventFilter::any(), handler, 0);

    bus.publish(Event::new("order.placed", json!({}))).await;
    bus.publish(Event::new("order.shipped", json!({}))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn priority_min_filter_drops_lower_priority_events() {
    let bus = InMemoryEventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let mut filter = EventFilter::any();
    filter.priority_min = Some(Priority::Critical);
    bus.subscribe("alert.raised", filter, handler, 0);

    bus.publish(Event::new("alert.raised", json!({}))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let critical = Event::new("alert.raised", json!({}))
        .with_metadata(EventMetadata::new().with_priority(Priority::Critical));
    bus.publish(critical).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsubscribe_stops_further_delivery() {
    let bus = InMemoryEventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let handler: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));
    let subscription_id = bus.subscribe("order.placed", EventFilter::any(), handler, 0);

    bus.publish(Event::new("order.placed", json!({}))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    bus.unsubscribe(&subscription_id).expect("subscription exists");
    bus.publish(Event::new("order.placed", json!({}))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_handler_does_not_prevent_delivery_to_others() {
    let bus = InMemoryEventBus::new();
    let failing: Arc<dyn Handler> = Arc::new(DirectHandler::new(|_: &Event| async {
        Err(platform_eventbus::HandlerError::new("boom"))
    }));
    bus.subscribe("order.placed", EventFilter::any(), failing, 10);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let succeeding: Arc<dyn Handler> = Arc::new(DirectHandler::new(move |_: &Event| {
        let calls = calls2.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));
    bus.subscribe("order.placed", EventFilter::any(), succeeding, 0);

    let outcomes = bus.publish(Event::new("order.placed", json!({}))).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcomes.iter().any(|o| o.result.is_err()));
    assert!(outcomes.iter().any(|o| o.result.is_ok()));
}

// Timeout coverage (a slow handler is reported as failed without blocking other
// handlers) lives in `dispatch::tests` inside the crate, alongside `DispatchConfig`.
