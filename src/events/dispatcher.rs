use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::Result;
use crate::models::NormalizedPaymentEvent;

use super::context::EventContext;

/// Handler priority constants. Higher values execute first.
pub mod priority {
    pub const HIGHEST: i32 = 100;
    pub const HIGH: i32 = 75;
    pub const NORMAL: i32 = 50;
    pub const LOW: i32 = 25;
    pub const LOWEST: i32 = 0;
}

/// A dispatched domain event. The name selects handlers
/// ("payment.captured", "payment.failed"); the payload is the normalized
/// provider event.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: &'static str,
    pub payment: NormalizedPaymentEvent,
}

impl Event {
    pub fn from_payment(payment: NormalizedPaymentEvent) -> Self {
        Self {
            name: payment.event_type.event_name(),
            payment,
        }
    }
}

/// Outcome of one dispatch, combined across handlers.
#[derive(Debug, Clone)]
pub struct EventResult {
    pub success: bool,
    pub data: Value,
    pub errors: Vec<String>,
    /// When true, handlers after the one that set it were not invoked.
    pub stop_propagation: bool,
    /// Whether a failed dispatch may be retried by redelivering the event.
    pub retryable: bool,
}

impl EventResult {
    pub fn success_with(data: Value) -> Self {
        Self {
            success: true,
            data,
            errors: Vec::new(),
            stop_propagation: false,
            retryable: false,
        }
    }

    /// Successful result that also halts further handler invocation, for
    /// handlers claiming exclusive ownership of an event.
    pub fn success_and_stop(data: Value) -> Self {
        Self {
            stop_propagation: true,
            ..Self::success_with(data)
        }
    }

    pub fn error(msg: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            data: Value::Null,
            errors: vec![msg.into()],
            stop_propagation: false,
            retryable,
        }
    }

    pub fn no_handler() -> Self {
        Self::error("no handler registered for event", false)
    }

    /// Fold per-handler results into one. Success requires every handler to
    /// have succeeded; the data of the last successful handler wins; errors
    /// accumulate; a failure is retryable if any contributing error was.
    fn combine(results: Vec<EventResult>) -> Self {
        if results.is_empty() {
            return Self::no_handler();
        }
        let mut combined = EventResult {
            success: true,
            data: Value::Null,
            errors: Vec::new(),
            stop_propagation: false,
            retryable: false,
        };
        for r in results {
            if r.success {
                if !r.data.is_null() {
                    combined.data = r.data;
                }
            } else {
                combined.success = false;
                combined.retryable = combined.retryable || r.retryable;
            }
            combined.errors.extend(r.errors);
            combined.stop_propagation = combined.stop_propagation || r.stop_propagation;
        }
        combined
    }
}

/// Event handler contract. Implementations are plain structs registered
/// with a priority; there is no inheritance hierarchy.
pub trait EventHandler: Send + Sync {
    /// Event name this handler subscribes to.
    fn event_name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        priority::NORMAL
    }

    /// Pre-filter called before `handle`, for conditional handling based on
    /// event data.
    fn can_handle(&self, _event: &Event) -> bool {
        true
    }

    fn handle(&self, event: &Event, ctx: &EventContext) -> Result<EventResult>;
}

/// Priority-ordered handler registry.
///
/// Handlers for an event run highest-priority first. An error from one
/// handler is isolated: it is logged, folded into the combined result, and
/// the remaining handlers still run, unless a prior handler stopped
/// propagation.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<&'static str, Vec<(i32, Arc<dyn EventHandler>)>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        let name = handler.event_name();
        let priority = handler.priority();
        let mut handlers = self.handlers.write().unwrap();
        let entry = handlers.entry(name).or_default();
        // Insert keeping descending priority; equal priorities keep
        // registration order.
        let pos = entry
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(entry.len());
        entry.insert(pos, (priority, handler));
    }

    pub fn has_handlers(&self, event_name: &str) -> bool {
        self.handlers
            .read()
            .unwrap()
            .get(event_name)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Dispatch with a fresh request-scoped context.
    pub fn dispatch(&self, event: &Event) -> EventResult {
        self.dispatch_with_context(event, &EventContext::new())
    }

    pub fn dispatch_with_context(&self, event: &Event, ctx: &EventContext) -> EventResult {
        let handlers = {
            let map = self.handlers.read().unwrap();
            match map.get(event.name) {
                Some(list) => list.clone(),
                None => return EventResult::no_handler(),
            }
        };

        let mut results: Vec<EventResult> = Vec::new();

        for (_, handler) in handlers {
            if !handler.can_handle(event) {
                continue;
            }
            match handler.handle(event, ctx) {
                Ok(result) => {
                    let stop = result.stop_propagation;
                    results.push(result);
                    if stop {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        event_id = %event.payment.event_id,
                        event = event.name,
                        "handler failed: {}",
                        e
                    );
                    let retryable = e.is_retryable();
                    results.push(EventResult::error(e.to_string(), retryable));
                }
            }
        }

        EventResult::combine(results)
    }
}
