//! Session manager — the public façade over the store, contexts, scopes,
//! and event bus.
//!
//! All tree and stack mutation goes through this type, serialized behind one
//! coarse lock (contention is low: mutations are cheap and rare relative to
//! round execution). Events are collected under the lock and emitted after
//! it is released, so no lock is held across listener invocations.

use std::sync::Arc;

use arbor_core::events::{ArborEvent, BaseEvent, TerminateMode};
use arbor_core::ids::SessionId;
use arbor_core::session::{SessionNode, SessionStatus, SubagentSessionConfig};
use arbor_logging::Logger;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::bus::EventBus;
use crate::context::{SessionContext, TASK_PROMPT_KEY};
use crate::errors::SessionError;
use crate::store::SessionStore;

/// Inputs to [`SessionManager::create_session`].
#[derive(Clone, Debug)]
pub struct CreateSessionOptions {
    /// Human label for the session.
    pub name: String,
    /// Subagent definition driving the session, if any.
    pub subagent_name: Option<String>,
    /// Parent session; `None` creates a root.
    pub parent_id: Option<SessionId>,
    /// Immutable session configuration.
    pub config: SubagentSessionConfig,
    /// Initial prompt, pre-set into the context under `task_prompt`.
    pub task_prompt: Option<String>,
}

/// Non-owning view of a bound scope.
///
/// The scope is owned by its creator; the manager only routes messages and
/// termination signals through this trait object.
pub trait SessionScopeHandle: Send + Sync {
    /// Queue a user message for processing.
    fn enqueue_user_message(&self, text: &str);

    /// Cancel the in-flight round, if any. The session stays alive.
    fn cancel_current_message(&self);

    /// Terminate the scope's run loop, if one is active.
    fn terminate(&self, mode: TerminateMode) {
        let _ = mode;
    }
}

/// The single public façade of the session runtime.
pub struct SessionManager {
    store: Mutex<SessionStore>,
    contexts: DashMap<SessionId, Arc<SessionContext>>,
    scopes: DashMap<SessionId, Arc<dyn SessionScopeHandle>>,
    bus: EventBus,
    logger: Arc<Logger>,
}

impl SessionManager {
    /// Create a manager emitting on `bus` and logging through `logger`.
    #[must_use]
    pub fn new(bus: EventBus, logger: Arc<Logger>) -> Self {
        Self {
            store: Mutex::new(SessionStore::new()),
            contexts: DashMap::new(),
            scopes: DashMap::new(),
            bus,
            logger,
        }
    }

    /// The event bus this manager emits on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The injected structured logger.
    #[must_use]
    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create a session, link it into the tree, build its context, and emit
    /// `session_started` (plus `session_switched` when auto-switching).
    #[instrument(skip(self, options), fields(name = %options.name))]
    pub fn create_session(
        &self,
        options: CreateSessionOptions,
    ) -> Result<SessionId, SessionError> {
        let mut events = Vec::new();
        let id = {
            let mut store = self.store.lock();

            let depth = match &options.parent_id {
                Some(parent) => {
                    if !store.contains(parent) {
                        return Err(SessionError::ParentNotFound(parent.clone()));
                    }
                    store.depth(parent)? + 1
                }
                None => 0,
            };
            if depth >= options.config.max_depth {
                return Err(SessionError::MaxDepthExceeded {
                    depth,
                    max_depth: options.config.max_depth,
                });
            }

            let mut id = SessionId::for_name(&options.name);
            while store.contains(&id) {
                id = SessionId::for_name(&options.name);
            }

            let node = SessionNode::new(
                id.clone(),
                options.name.clone(),
                options.subagent_name.clone(),
                depth,
                options.parent_id.clone(),
                options.config.clone(),
            );
            store.add_node(node.clone())?;
            store.link_child(options.parent_id.as_ref(), &id)?;

            let context = match (&options.parent_id, options.config.inherit_context) {
                (Some(parent), true) => match self.contexts.get(parent) {
                    Some(parent_ctx) => SessionContext::inherit_from(&parent_ctx),
                    None => SessionContext::new(),
                },
                _ => SessionContext::new(),
            };
            if let Some(prompt) = &options.task_prompt {
                context.set(TASK_PROMPT_KEY, Value::String(prompt.clone()));
            }
            let _ = self.contexts.insert(id.clone(), Arc::new(context));

            events.push(ArborEvent::SessionStarted {
                base: BaseEvent::now(id.as_str()),
                node,
            });

            if options.config.auto_switch {
                let from = store.active().map(|s| s.as_str().to_owned());
                store.push(&id)?;
                events.push(ArborEvent::SessionSwitched {
                    base: BaseEvent::now(id.as_str()),
                    from,
                });
            }
            id
        };

        for event in &events {
            let _ = self.bus.emit(event);
        }
        self.logger.info(
            "session created",
            Some(json!({"sessionId": id.as_str(), "name": options.name})),
            None,
        );
        debug!(session_id = %id, "session created");
        Ok(id)
    }

    /// Push `id` onto the active stack and emit `session_switched`.
    pub fn switch_active_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let from = {
            let mut store = self.store.lock();
            let from = store.active().map(|s| s.as_str().to_owned());
            store.push(id)?;
            from
        };
        let _ = self.bus.emit(&ArborEvent::SessionSwitched {
            base: BaseEvent::now(id.as_str()),
            from,
        });
        Ok(())
    }

    /// Pop the active session. Emits `session_switched` to the new top when
    /// one remains; popping an empty stack is a silent no-op.
    pub fn back_to_parent(&self) -> Option<SessionId> {
        let (popped, new_top) = {
            let mut store = self.store.lock();
            let popped = store.pop()?;
            (popped, store.active().cloned())
        };
        if let Some(top) = &new_top {
            let _ = self.bus.emit(&ArborEvent::SessionSwitched {
                base: BaseEvent::now(top.as_str()),
                from: Some(popped.as_str().to_owned()),
            });
        }
        new_top
    }

    /// Pause an active session.
    pub fn pause(&self, id: &SessionId) -> Result<(), SessionError> {
        self.transition(id, SessionStatus::Active, SessionStatus::Paused)?;
        let _ = self.bus.emit(&ArborEvent::SessionPaused {
            base: BaseEvent::now(id.as_str()),
        });
        Ok(())
    }

    /// Resume a paused session.
    pub fn resume(&self, id: &SessionId) -> Result<(), SessionError> {
        self.transition(id, SessionStatus::Paused, SessionStatus::Active)?;
        let _ = self.bus.emit(&ArborEvent::SessionResumed {
            base: BaseEvent::now(id.as_str()),
        });
        Ok(())
    }

    /// Move a session to the `completed` terminal state, popping the stack
    /// if it is the active session.
    pub fn complete(
        &self,
        id: &SessionId,
        result: Option<Value>,
        reason: Option<String>,
    ) -> Result<(), SessionError> {
        self.finish(
            id,
            SessionStatus::Completed,
            ArborEvent::SessionCompleted {
                base: BaseEvent::now(id.as_str()),
                result,
                terminate_reason: reason,
            },
            TerminateMode::Normal,
        )
    }

    /// Move a session to the `aborted` terminal state, popping the stack if
    /// it is the active session and terminating any bound scope.
    pub fn abort(&self, id: &SessionId, reason: Option<String>) -> Result<(), SessionError> {
        self.finish(
            id,
            SessionStatus::Aborted,
            ArborEvent::SessionAborted {
                base: BaseEvent::now(id.as_str()),
                reason,
            },
            TerminateMode::Cancelled,
        )
    }

    fn finish(
        &self,
        id: &SessionId,
        status: SessionStatus,
        event: ArborEvent,
        terminate_mode: TerminateMode,
    ) -> Result<(), SessionError> {
        let switched = {
            let mut store = self.store.lock();
            let node = store
                .get_node(id)
                .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
            if node.status.is_terminal() {
                return Err(SessionError::InvalidStatus {
                    id: id.clone(),
                    from: node.status,
                    to: status,
                });
            }
            store.set_status(id, status)?;

            if store.active() == Some(id) {
                let _ = store.pop();
                store.active().cloned()
            } else {
                None
            }
        };

        let _ = self.bus.emit(&event);
        if let Some(top) = switched {
            let _ = self.bus.emit(&ArborEvent::SessionSwitched {
                base: BaseEvent::now(top.as_str()),
                from: Some(id.as_str().to_owned()),
            });
        }
        // Clone out of the map so no shard lock is held across the call.
        let scope = self.scopes.get(id).map(|e| Arc::clone(e.value()));
        if let Some(scope) = scope {
            scope.terminate(terminate_mode);
        }
        self.logger.info(
            "session finished",
            Some(json!({"sessionId": id.as_str(), "status": status.to_string()})),
            None,
        );
        Ok(())
    }

    fn transition(
        &self,
        id: &SessionId,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<(), SessionError> {
        let mut store = self.store.lock();
        let node = store
            .get_node(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        if node.status != expected {
            return Err(SessionError::InvalidStatus {
                id: id.clone(),
                from: node.status,
                to: next,
            });
        }
        store.set_status(id, next)
    }

    // ── Messaging and scopes ─────────────────────────────────────────

    /// Route a user message to a session. A bound scope queues it (and
    /// emits `user_message_to_session` itself); otherwise the event alone
    /// is emitted.
    pub fn send_user_message(&self, id: &SessionId, text: &str) -> Result<(), SessionError> {
        if !self.store.lock().contains(id) {
            return Err(SessionError::SessionNotFound(id.clone()));
        }
        let scope = self.scopes.get(id).map(|e| Arc::clone(e.value()));
        if let Some(scope) = scope {
            scope.enqueue_user_message(text);
        } else {
            let _ = self.bus.emit(&ArborEvent::UserMessageToSession {
                base: BaseEvent::now(id.as_str()),
                text: text.to_owned(),
            });
        }
        Ok(())
    }

    /// Register the scope driving `id`. Rebinding replaces the previous
    /// scope; the old one is not signaled.
    pub fn bind_scope(
        &self,
        id: &SessionId,
        scope: Arc<dyn SessionScopeHandle>,
    ) -> Result<(), SessionError> {
        if !self.store.lock().contains(id) {
            return Err(SessionError::SessionNotFound(id.clone()));
        }
        if self.scopes.insert(id.clone(), scope).is_some() {
            warn!(session_id = %id, "scope rebound, replacing previous scope");
            self.logger.warn(
                "scope rebound",
                Some(json!({"sessionId": id.as_str()})),
                None,
            );
        }
        Ok(())
    }

    /// Cancel the active session's in-flight round, if its scope supports
    /// cancellation. No-op otherwise.
    pub fn cancel_current_message(&self) {
        let Some(active) = self.store.lock().active().cloned() else {
            debug!("cancel requested with no active session");
            return;
        };
        let scope = self.scopes.get(&active).map(|e| Arc::clone(e.value()));
        match scope {
            Some(scope) => scope.cancel_current_message(),
            None => debug!(session_id = %active, "cancel requested but no scope bound"),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The active session id, if any.
    #[must_use]
    pub fn active_session_id(&self) -> Option<SessionId> {
        self.store.lock().active().cloned()
    }

    /// Snapshot of a node.
    pub fn session_node(&self, id: &SessionId) -> Result<SessionNode, SessionError> {
        self.store
            .lock()
            .get_node(id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))
    }

    /// All nodes, ordered by creation time.
    #[must_use]
    pub fn tree(&self) -> Vec<SessionNode> {
        self.store.lock().tree()
    }

    /// Names from root to `id`.
    #[must_use]
    pub fn breadcrumb(&self, id: &SessionId) -> Vec<String> {
        self.store.lock().breadcrumb(id)
    }

    /// The root session above `id` (or `id` itself).
    #[must_use]
    pub fn session_root(&self, id: &SessionId) -> Option<SessionId> {
        self.store.lock().root_of(id)
    }

    /// Depth of `id`.
    pub fn depth(&self, id: &SessionId) -> Result<u32, SessionError> {
        self.store.lock().depth(id)
    }

    /// Whether `id` exists.
    #[must_use]
    pub fn has_session(&self, id: &SessionId) -> bool {
        self.store.lock().contains(id)
    }

    /// Number of sessions ever created (nodes live for the process).
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.store.lock().len()
    }

    /// Height of the active stack.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.store.lock().stack_depth()
    }

    /// The context owned by `id`.
    pub fn session_context(&self, id: &SessionId) -> Result<Arc<SessionContext>, SessionError> {
        self.contexts
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::ContextNotFound(id.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
