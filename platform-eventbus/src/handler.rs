//! Event handlers: the dispatch target a subscription invokes when its filter matches.
//!
//! Grounded on `core::event_bus::EventBus`'s dyn-compatible method convention: handlers
//! are invoked through a trait object, so `handle` returns a boxed future rather than
//! being declared `async fn`. Spec §9 calls for three handler shapes sharing one dispatch
//! path (direct callback, plugin-routed, workflow-step-routed) — modeled here as an enum
//! over `Arc<dyn Handler>` implementors rather than three unrelated traits, so
//! `dispatch.rs` can treat every subscription uniformly.

use platform_core::Event;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result of a single handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Error raised by a handler's `handle` call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("handler failed: {reason}")]
pub struct HandlerError {
    /// Human-readable failure reason, surfaced in logs and (for workflow steps) persisted
    /// on the owning `WorkflowStepExecution`.
    pub reason: String,
}

impl HandlerError {
    /// Build a [`HandlerError`] from any displayable cause.
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// A unit of work invoked when a subscription's filter matches an event.
///
/// Dyn-compatible so subscriptions can hold `Arc<dyn Handler>` regardless of the
/// concrete closure or workflow-step type behind them.
pub trait Handler: Send + Sync {
    /// Invoke the handler against `event`.
    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;
}

/// A handler backed by a plain async closure — the common case for service code
/// subscribing directly to events.
pub struct DirectHandler<F> {
    func: F,
}

impl<F, Fut> DirectHandler<F>
where
    F: Fn(&Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    /// Wrap `func` as a [`Handler`].
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Handler for DirectHandler<F>
where
    F: Fn(&Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        Box::pin((self.func)(event))
    }
}

/// A handler that forwards matching events to a named plugin's event sink, identified
/// only by `plugin_id` at this layer; the actual plugin registry lives above
/// `platform-eventbus` (it has no notion of what a "plugin" is beyond a routing target).
pub struct PluginHandler {
    plugin_id: String,
    sink: Arc<dyn Handler>,
}

impl PluginHandler {
    /// Route matching events to `sink`, tagged with `plugin_id` for unsubscribe-by-plugin.
    #[must_use]
    pub fn new(plugin_id: impl Into<String>, sink: Arc<dyn Handler>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            sink,
        }
    }

    /// The plugin this handler forwards to.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }
}

impl Handler for PluginHandler {
    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        self.sink.handle(event)
    }
}

/// A handler that advances a workflow step when its event arrives, identified by the
/// `(workflow_instance_id, step_id)` pair it resumes.
pub struct WorkflowStepHandler {
    workflow_instance_id: String,
    step_id: String,
    resume: Arc<dyn Handler>,
}

impl WorkflowStepHandler {
    /// Resume `step_id` of `workflow_instance_id` via `resume` on a matching event.
    #[must_use]
    pub fn new(
        workflow_instance_id: impl Into<String>,
        step_id: impl Into<String>,
        resume: Arc<dyn Handler>,
    ) -> Self {
        Self {
            workflow_instance_id: workflow_instance_id.into(),
            step_id: step_id.into(),
            resume,
        }
    }

    /// The workflow instance this handler resumes.
    #[must_use]
    pub fn workflow_instance_id(&self) -> &str {
        &self.workflow_instance_id
    }

    /// The step within that instance this handler resumes.
    #[must_use]
    pub fn step_id(&self) -> &str {
        &self.step_id
    }
}

impl Handler for WorkflowStepHandler {
    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        self.resume.handle(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn direct_handler_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handler = DirectHandler::new(move |_event: &Event| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event = Event::new("test.event", json!({}));
        handler.handle(&event).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plugin_handler_forwards_and_tags_plugin_id() {
        let inner: Arc<dyn Handler> = Arc::new(DirectHandler::new(|_: &Event| async { Ok(()) }));
        let handler = PluginHandler::new("billing-plugin", inner);
        assert_eq!(handler.plugin_id(), "billing-plugin");

        let event = Event::new("test.event", json!({}));
        handler.handle(&event).await.unwrap();
    }

    #[tokio::test]
    async fn workflow_step_handler_exposes_identity() {
        let inner: Arc<dyn Handler> = Arc::new(DirectHandler::new(|_: &Event| async { Ok(()) }));
        let handler = WorkflowStepHandler::new("wf-1", "step-2", inner);
        assert_eq!(handler.workflow_instance_id(), "wf-1");
        assert_eq!(handler.step_id(), "step-2");
    }
}
