//! Priority-ordered hook bus
//!
//! `EventBus` is the only way plugins observe and mutate data flowing
//! between pipeline stages. One instance is built per process run and shared
//! by reference with every component that fires or subscribes.
//!
//! Handlers of one `fire` call run sequentially in ascending priority,
//! ties broken by registration order. Each handler sees the mutations made
//! by the handlers before it. The first handler error stops dispatch and is
//! returned to the caller.

use crate::error::{AuditError, Result};
use crate::events::HookPayload;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Priority given to handlers registered without one (lower runs first)
pub const DEFAULT_PRIORITY: i32 = 100;

/// Value a handler hands back to the firing code
pub type HookReturn = Option<serde_json::Value>;

/// Handle for unregistering a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Hook handler trait
///
/// `bus` is the dispatching bus, so a handler can fire nested hooks.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(
        &self,
        bus: &EventBus,
        event: &str,
        payload: &mut HookPayload,
    ) -> Result<HookReturn>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> HookHandler for FnHandler<F>
where
    F: Fn(&str, &mut HookPayload) -> Result<HookReturn> + Send + Sync,
{
    async fn handle(
        &self,
        _bus: &EventBus,
        event: &str,
        payload: &mut HookPayload,
    ) -> Result<HookReturn> {
        (self.0)(event, payload)
    }
}

struct Registration {
    id: HandlerId,
    pattern: String,
    priority: i32,
    handler: Arc<dyn HookHandler>,
}

/// Result of a `fire` call
#[derive(Debug, Clone, Default)]
pub struct FireOutcome {
    /// Return value of each handler, in execution order
    pub rets: Vec<HookReturn>,
}

impl FireOutcome {
    /// Number of handlers that ran
    pub fn handled(&self) -> usize {
        self.rets.len()
    }

    /// First non-null value returned by any handler
    pub fn first_value(&self) -> Option<&serde_json::Value> {
        self.rets.iter().flatten().find(|v| !v.is_null())
    }
}

/// Priority-ordered async hook dispatcher
pub struct EventBus {
    /// Registrations in registration order
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventBus")
            .field("handlers_count", &count)
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for a hook name or pattern
    ///
    /// A `*` segment in `pattern` matches any single segment, so
    /// `command/*/action/end` receives `command/audit/action/end`.
    pub fn on(
        &self,
        pattern: &str,
        handler: Arc<dyn HookHandler>,
        priority: Option<i32>,
    ) -> Result<HandlerId> {
        validate_name(pattern)?;

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let priority = priority.unwrap_or(DEFAULT_PRIORITY);

        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                pattern: pattern.to_string(),
                priority,
                handler,
            });

        tracing::debug!(pattern = %pattern, priority, "Hook handler registered");
        Ok(id)
    }

    /// Register a synchronous closure as a handler
    pub fn on_fn<F>(&self, pattern: &str, priority: Option<i32>, f: F) -> Result<HandlerId>
    where
        F: Fn(&str, &mut HookPayload) -> Result<HookReturn> + Send + Sync + 'static,
    {
        self.on(pattern, Arc::new(FnHandler(f)), priority)
    }

    /// Remove a handler; returns false if it was not registered
    pub fn off(&self, id: HandlerId) -> bool {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Number of handlers that would run for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.matching(event).len()
    }

    /// Handlers matching `event`, sorted by priority then registration order
    fn matching(&self, event: &str) -> Vec<Arc<dyn HookHandler>> {
        let registrations = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut matching: Vec<(i32, Arc<dyn HookHandler>)> = registrations
            .iter()
            .filter(|r| pattern_matches(&r.pattern, event))
            .map(|r| (r.priority, r.handler.clone()))
            .collect();

        // stable sort keeps registration order among equal priorities
        matching.sort_by_key(|(priority, _)| *priority);
        matching.into_iter().map(|(_, h)| h).collect()
    }

    /// Fire `event`, running every matching handler in order
    ///
    /// The handler list is snapshotted before dispatch, so handlers may
    /// register, unregister or fire nested hooks without deadlocking.
    pub async fn fire(&self, event: &str, payload: &mut HookPayload) -> Result<FireOutcome> {
        validate_name(event)?;
        if event.split('/').any(|segment| segment == "*") {
            return Err(AuditError::InvalidEvent(event.to_string()));
        }

        let handlers = self.matching(event);
        let mut outcome = FireOutcome {
            rets: Vec::with_capacity(handlers.len()),
        };

        tracing::debug!(
            event = %event,
            handlers = handlers.len(),
            payload = payload.variant(),
            "Firing hook"
        );

        for handler in handlers {
            match handler.handle(self, event, payload).await {
                Ok(ret) => outcome.rets.push(ret),
                Err(e) => {
                    tracing::warn!(event = %event, error = %e, "Hook handler failed");
                    return Err(match e {
                        AuditError::Hook { .. } => e,
                        other => AuditError::hook(event, other.to_string()),
                    });
                }
            }
        }

        Ok(outcome)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.split('/').any(str::is_empty) {
        return Err(AuditError::InvalidEvent(name.to_string()));
    }
    Ok(())
}

fn pattern_matches(pattern: &str, event: &str) -> bool {
    if pattern == event {
        return true;
    }

    let mut pattern_segments = pattern.split('/');
    let mut event_segments = event.split('/');
    loop {
        match (pattern_segments.next(), event_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(e)) if p == "*" || p == e => continue,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CommentEvent, GetEvent};
    use std::sync::atomic::AtomicUsize;

    fn comment(text: &str) -> HookPayload {
        HookPayload::Comment(CommentEvent {
            comment: text.to_string(),
        })
    }

    fn comment_text(payload: &HookPayload) -> &str {
        match payload {
            HookPayload::Comment(e) => &e.comment,
            _ => panic!("expected comment payload"),
        }
    }

    fn append(payload: &mut HookPayload, text: &str) {
        if let HookPayload::Comment(e) = payload {
            e.comment.push_str(text);
        }
    }

    #[tokio::test]
    async fn test_fire_runs_by_ascending_priority() {
        let bus = EventBus::new();
        for priority in [30, 10, 20] {
            bus.on_fn("vcs/comment/start", Some(priority), move |_, payload| {
                let seen = comment_text(payload).to_string();
                // each handler observes every lower-priority mutation
                let expected: String = [10, 20, 30]
                    .iter()
                    .filter(|p| **p < priority)
                    .map(|p| format!("[{}]", p))
                    .collect();
                assert_eq!(seen, expected);
                append(payload, &format!("[{}]", priority));
                Ok(None)
            })
            .unwrap();
        }

        let mut payload = comment("");
        let outcome = bus.fire("vcs/comment/start", &mut payload).await.unwrap();
        assert_eq!(outcome.handled(), 3);
        assert_eq!(comment_text(&payload), "[10][20][30]");
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let bus = EventBus::new();
        for tag in ["a", "b", "c"] {
            bus.on_fn("vcs/comment/start", None, move |_, payload| {
                append(payload, tag);
                Ok(None)
            })
            .unwrap();
        }
        bus.on_fn("vcs/comment/start", Some(DEFAULT_PRIORITY - 1), |_, payload| {
            append(payload, "first");
            Ok(None)
        })
        .unwrap();

        let mut payload = comment("");
        bus.fire("vcs/comment/start", &mut payload).await.unwrap();
        assert_eq!(comment_text(&payload), "firstabc");
    }

    #[tokio::test]
    async fn test_rets_in_execution_order() {
        let bus = EventBus::new();
        bus.on_fn("plugin/last-value/report/get", Some(2), |_, _| {
            Ok(Some(serde_json::json!({"report": "second"})))
        })
        .unwrap();
        bus.on_fn("plugin/last-value/report/get", Some(1), |_, _| Ok(None))
            .unwrap();

        let mut payload = HookPayload::Get(GetEvent {
            command: "audit".to_string(),
        });
        let outcome = bus
            .fire("plugin/last-value/report/get", &mut payload)
            .await
            .unwrap();

        assert_eq!(outcome.rets.len(), 2);
        assert!(outcome.rets[0].is_none());
        assert_eq!(outcome.first_value().unwrap()["report"], "second");
    }

    #[tokio::test]
    async fn test_handler_failure_stops_dispatch() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        bus.on_fn("vcs/comment/start", Some(1), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .unwrap();
        bus.on_fn("vcs/comment/start", Some(2), |_, _| {
            Err(AuditError::Config("plugin misconfigured".to_string()))
        })
        .unwrap();
        let counter = ran.clone();
        bus.on_fn("vcs/comment/start", Some(3), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .unwrap();

        let err = bus
            .fire("vcs/comment/start", &mut comment(""))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Hook { ref event, .. } if event == "vcs/comment/start"));
        assert!(err.to_string().contains("plugin misconfigured"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wildcard_patterns() {
        let bus = EventBus::new();
        bus.on_fn("command/*/action/end", None, |event, payload| {
            append(payload, event);
            Ok(None)
        })
        .unwrap();

        assert_eq!(bus.handler_count("command/audit/action/end"), 1);
        assert_eq!(bus.handler_count("command/size/action/end"), 1);
        assert_eq!(bus.handler_count("command/audit/action/start"), 0);
        assert_eq!(bus.handler_count("command/audit/action/end/extra"), 0);

        let mut payload = comment("");
        bus.fire("command/size/action/end", &mut payload).await.unwrap();
        assert_eq!(comment_text(&payload), "command/size/action/end");
    }

    #[tokio::test]
    async fn test_off_unregisters() {
        let bus = EventBus::new();
        let id = bus
            .on_fn("vcs/comment/end", None, |_, _| Ok(None))
            .unwrap();
        assert_eq!(bus.handler_count("vcs/comment/end"), 1);
        assert!(bus.off(id));
        assert!(!bus.off(id));

        let outcome = bus.fire("vcs/comment/end", &mut comment("")).await.unwrap();
        assert_eq!(outcome.handled(), 0);
        assert!(outcome.first_value().is_none());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let bus = EventBus::new();
        assert!(bus.on_fn("", None, |_, _| Ok(None)).is_err());
        assert!(bus.on_fn("output//report/end", None, |_, _| Ok(None)).is_err());

        let result = tokio_test::block_on(bus.fire("command/*/action/end", &mut comment("")));
        assert!(matches!(result, Err(AuditError::InvalidEvent(_))));
    }

    struct Relay;

    #[async_trait]
    impl HookHandler for Relay {
        async fn handle(
            &self,
            bus: &EventBus,
            _event: &str,
            payload: &mut HookPayload,
        ) -> Result<HookReturn> {
            let mut nested = HookPayload::Get(GetEvent {
                command: "audit".to_string(),
            });
            let outcome = bus.fire("plugin/last-value/report/get", &mut nested).await?;
            let value = outcome
                .first_value()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            append(payload, &value);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_handler_can_fire_nested_hooks() {
        let bus = EventBus::new();
        bus.on("vcs/comment/start", Arc::new(Relay), None).unwrap();
        bus.on_fn("plugin/last-value/report/get", None, |_, _| {
            Ok(Some(serde_json::json!("archived")))
        })
        .unwrap();

        let mut payload = comment("got:");
        bus.fire("vcs/comment/start", &mut payload).await.unwrap();
        assert_eq!(comment_text(&payload), "got:archived");
    }
}
