//! Interactive subagent scope — drives one session's conversation.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `stream_processor` | Consumes the chat stream, emits chunk events |
//! | `tool_executor` | Dispatches collected function calls, emits results |
//!
//! ## Data flow
//!
//! `enqueue_user_message` → FIFO queue → single-flight processor →
//! chat stream → `stream_processor` → `tool_executor` → loop
//!
//! One message is in flight per session at any instant; distinct sessions'
//! scopes run independently. Round cancellation
//! ([`SubagentScope::cancel_current_message`]) and session termination (the
//! external signal, `abort`, or hard limits) use separate tokens: the round
//! token is a child of the session token, so ending the session also ends
//! the in-flight round.

pub mod stream_processor;
pub mod tool_executor;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arbor_core::chat::{ChatClient, ChatClientFactory, ChatStreamOptions, MessagePart};
use arbor_core::events::{ArborEvent, BaseEvent, TerminateMode, TokenStats};
use arbor_core::ids::SessionId;
use arbor_core::tools::{ToolRegistry, DELEGATION_TOOL_NAME};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::context::{MAX_TIME_MINUTES_KEY, MAX_TURNS_KEY, TASK_PROMPT_KEY};
use crate::manager::{SessionManager, SessionScopeHandle};
use crate::scope::stream_processor::process_stream;
use crate::scope::tool_executor::dispatch_calls;

/// Static configuration of one scope.
#[derive(Clone, Debug, Default)]
pub struct ScopeConfig {
    /// Whether the delegation tool stays in the declaration list.
    pub allow_nested_tasks: bool,
    /// When set, only these registry tools are offered to the model.
    pub tool_whitelist: Option<Vec<String>>,
    /// Extra declarations appended unconditionally (host-inline tools).
    pub inline_tools: Vec<arbor_core::tools::FunctionDeclaration>,
}

/// Inputs to [`SubagentScope::run_interactive`].
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Session this scope drives.
    pub session_id: SessionId,
    /// Caller-owned cancellation; chained into the session token.
    pub external_signal: Option<CancellationToken>,
}

/// State that exists only while `run_interactive` is live.
struct RunState {
    session_id: SessionId,
    root_id: SessionId,
    chat: Arc<dyn ChatClient>,
    session_cancel: CancellationToken,
    started: Instant,
    max_turns: Option<u32>,
    max_time: Option<Duration>,
}

/// Per-session interactive execution scope.
///
/// Public surface: [`run_interactive`](Self::run_interactive),
/// [`enqueue_user_message`](Self::enqueue_user_message),
/// [`cancel_current_message`](Self::cancel_current_message).
pub struct SubagentScope {
    manager: Arc<SessionManager>,
    chat_factory: Arc<dyn ChatClientFactory>,
    tools: Arc<ToolRegistry>,
    config: ScopeConfig,
    bus: EventBus,

    me: RwLock<Weak<SubagentScope>>,
    run: RwLock<Option<Arc<RunState>>>,
    queue: Mutex<VecDeque<String>>,
    processing: AtomicBool,
    in_flight: AtomicBool,
    round: AtomicU32,
    round_cancel: Mutex<CancellationToken>,
    stats: Mutex<TokenStats>,
    terminate_mode: Mutex<TerminateMode>,
}

impl SubagentScope {
    /// Create a scope. The scope is inert until
    /// [`run_interactive`](Self::run_interactive) binds it to its session.
    #[must_use]
    pub fn new(
        manager: Arc<SessionManager>,
        chat_factory: Arc<dyn ChatClientFactory>,
        tools: Arc<ToolRegistry>,
        config: ScopeConfig,
    ) -> Arc<Self> {
        let bus = manager.bus().clone();
        let scope = Arc::new(Self {
            manager,
            chat_factory,
            tools,
            config,
            bus,
            me: RwLock::new(Weak::new()),
            run: RwLock::new(None),
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            round: AtomicU32::new(0),
            round_cancel: Mutex::new(CancellationToken::new()),
            stats: Mutex::new(TokenStats::default()),
            terminate_mode: Mutex::new(TerminateMode::Cancelled),
        });
        *scope.me.write() = Arc::downgrade(&scope);
        scope
    }

    /// Accumulated token usage.
    #[must_use]
    pub fn stats(&self) -> TokenStats {
        *self.stats.lock()
    }

    /// Run the session's conversation until cancellation or a hard limit.
    ///
    /// Constructs the chat client from `initial_context`, binds this scope,
    /// emits `subagent_start`, auto-enqueues the context's `task_prompt`,
    /// then parks until the session token fires. `subagent_finish` is
    /// emitted on every exit path.
    pub async fn run_interactive(
        &self,
        initial_context: Value,
        options: RunOptions,
    ) -> TerminateMode {
        let session_id = options.session_id.clone();

        let chat = match self.chat_factory.create(&initial_context).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "chat construction failed");
                return self.finish_early(&session_id, TerminateMode::Error, &e.to_string());
            }
        };

        let context = self.manager.session_context(&session_id).ok();
        let max_turns = context
            .as_deref()
            .and_then(|c| c.get(MAX_TURNS_KEY))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        let max_time = context
            .as_deref()
            .and_then(|c| c.get(MAX_TIME_MINUTES_KEY))
            .and_then(|v| v.as_f64())
            .map(|minutes| Duration::from_secs_f64(minutes * 60.0));

        let session_cancel = options
            .external_signal
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let root_id = self
            .manager
            .session_root(&session_id)
            .unwrap_or_else(|| session_id.clone());

        *self.run.write() = Some(Arc::new(RunState {
            session_id: session_id.clone(),
            root_id,
            chat,
            session_cancel: session_cancel.clone(),
            started: Instant::now(),
            max_turns,
            max_time,
        }));

        // The weak self-reference is set at construction; upgrading cannot
        // fail while a caller still holds the scope.
        let handle = self.me.read().upgrade();
        let bound = match handle {
            Some(me) => self.manager.bind_scope(&session_id, me),
            None => Err(crate::errors::SessionError::SessionNotFound(
                session_id.clone(),
            )),
        };
        if let Err(e) = bound {
            warn!(session_id = %session_id, error = %e, "scope bind failed");
            *self.run.write() = None;
            return self.finish_early(&session_id, TerminateMode::Error, &e.to_string());
        }

        let subagent_name = self
            .manager
            .session_node(&session_id)
            .ok()
            .and_then(|n| n.subagent_name);
        let _ = self.bus.emit(&ArborEvent::SubagentStart {
            base: BaseEvent::now(session_id.as_str()),
            subagent_name,
        });

        if let Some(Value::String(prompt)) =
            context.as_deref().and_then(|c| c.get(TASK_PROMPT_KEY))
        {
            self.enqueue_user_message(&prompt);
        }

        session_cancel.cancelled().await;

        *self.run.write() = None;
        let mode = *self.terminate_mode.lock();
        let _ = self.bus.emit(&ArborEvent::SubagentFinish {
            base: BaseEvent::now(session_id.as_str()),
            stats: self.stats(),
            terminate_mode: mode,
        });
        debug!(session_id = %session_id, mode = %mode, "scope finished");
        mode
    }

    fn finish_early(
        &self,
        session_id: &SessionId,
        mode: TerminateMode,
        message: &str,
    ) -> TerminateMode {
        *self.terminate_mode.lock() = mode;
        let _ = self.bus.emit(&ArborEvent::SubagentError {
            base: BaseEvent::now(session_id.as_str()),
            message: message.to_owned(),
        });
        let _ = self.bus.emit(&ArborEvent::SubagentFinish {
            base: BaseEvent::now(session_id.as_str()),
            stats: self.stats(),
            terminate_mode: mode,
        });
        mode
    }

    /// Queue a user message and wake the processor. Strictly FIFO within
    /// the session.
    pub fn enqueue_user_message(&self, text: &str) {
        self.queue.lock().push_back(text.to_owned());
        if let Some(run) = self.run.read().as_ref() {
            let _ = self.bus.emit(&ArborEvent::UserMessageToSession {
                base: BaseEvent::now(run.session_id.as_str()),
                text: text.to_owned(),
            });
        }
        self.try_start_processor();
    }

    /// Cancel the in-flight round only. The session stays alive and keeps
    /// draining its queue. No-op (no events) when nothing is in flight.
    pub fn cancel_current_message(&self) {
        if !self.in_flight.load(Ordering::Acquire) {
            debug!("cancel requested with no round in flight");
            return;
        }
        self.round_cancel.lock().cancel();
    }

    fn try_start_processor(&self) {
        let Some(me) = self.me.read().upgrade() else {
            return;
        };
        if me.run.read().is_none() {
            return;
        }
        if me
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let _ = tokio::spawn(async move { me.process_loop().await });
    }

    /// Single-flight queue drain. Observes cancellation and hard limits at
    /// the top of every iteration.
    async fn process_loop(self: Arc<Self>) {
        loop {
            loop {
                let Some(run) = self.run.read().clone() else {
                    break;
                };
                if run.session_cancel.is_cancelled() {
                    break;
                }
                if let Some(max) = run.max_turns {
                    if self.round.load(Ordering::Acquire) >= max {
                        self.stop_session(&run, TerminateMode::MaxTurns);
                        break;
                    }
                }
                if let Some(max) = run.max_time {
                    if run.started.elapsed() >= max {
                        self.stop_session(&run, TerminateMode::MaxTime);
                        break;
                    }
                }
                let Some(message) = self.queue.lock().pop_front() else {
                    break;
                };
                self.run_round(&run, &message).await;
            }

            self.processing.store(false, Ordering::Release);
            // Re-check: a message may have been enqueued after the drain
            // but before the flag cleared.
            let has_work = !self.queue.lock().is_empty()
                && self
                    .run
                    .read()
                    .as_ref()
                    .is_some_and(|r| !r.session_cancel.is_cancelled());
            if !has_work
                || self
                    .processing
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                return;
            }
        }
    }

    fn stop_session(&self, run: &RunState, mode: TerminateMode) {
        debug!(session_id = %run.session_id, mode = %mode, "hard limit reached");
        *self.terminate_mode.lock() = mode;
        run.session_cancel.cancel();
    }

    async fn run_round(&self, run: &RunState, message: &str) {
        let round = self.round.fetch_add(1, Ordering::AcqRel) + 1;
        let round_cancel = run.session_cancel.child_token();
        *self.round_cancel.lock() = round_cancel.clone();

        let session_id = run.session_id.as_str();
        let prompt_id = format!("{}#{}#{round}", run.root_id, run.session_id);
        let _ = self.bus.emit(&ArborEvent::RoundStart {
            base: BaseEvent::now(session_id),
            round,
            prompt_id: prompt_id.clone(),
        });

        let mut declarations = self.tools.declarations();
        if !self.config.allow_nested_tasks {
            declarations.retain(|d| d.name != DELEGATION_TOOL_NAME);
        }
        if let Some(allowed) = &self.config.tool_whitelist {
            declarations.retain(|d| allowed.contains(&d.name));
        }
        declarations.extend(self.config.inline_tools.iter().cloned());

        let stream_options = ChatStreamOptions {
            tools: declarations,
            cancel: Some(round_cancel.clone()),
        };

        self.in_flight.store(true, Ordering::Release);
        let outcome = match run
            .chat
            .send_message_stream(
                vec![MessagePart::text(message)],
                &stream_options,
                &prompt_id,
            )
            .await
        {
            Ok(stream) => process_stream(stream, session_id, &self.bus, &round_cancel).await,
            Err(e) => Err(e),
        };
        self.in_flight.store(false, Ordering::Release);

        match outcome {
            Err(e) => {
                warn!(session_id, round, error = %e, "round failed");
                self.manager.logger().warn(
                    "round failed",
                    Some(json!({"sessionId": session_id, "round": round})),
                    Some(json!({"error": e.to_string(), "category": e.category()})),
                );
                let _ = self.bus.emit(&ArborEvent::SubagentError {
                    base: BaseEvent::now(session_id),
                    message: e.to_string(),
                });
            }
            Ok(result) => {
                {
                    let mut stats = self.stats.lock();
                    stats.rounds += 1;
                    if let Some(usage) = &result.usage {
                        stats.input_tokens += usage.prompt_token_count;
                        stats.output_tokens += usage.candidates_token_count;
                        stats.total_tokens += usage.total_token_count;
                    }
                }

                if result.interrupted {
                    debug!(session_id, round, "round interrupted");
                } else {
                    if !result.function_calls.is_empty() {
                        dispatch_calls(
                            &result.function_calls,
                            &self.tools,
                            session_id,
                            &prompt_id,
                            &self.bus,
                            &round_cancel,
                        )
                        .await;
                    }
                    let trimmed = result.text.trim();
                    if !trimmed.is_empty() {
                        let _ = self.bus.emit(&ArborEvent::SubagentMessageToUser {
                            base: BaseEvent::now(session_id),
                            text_chunk: None,
                            final_text: Some(trimmed.to_owned()),
                        });
                    }
                }
            }
        }

        let _ = self.bus.emit(&ArborEvent::RoundEnd {
            base: BaseEvent::now(session_id),
            round,
        });
    }
}

impl SessionScopeHandle for SubagentScope {
    fn enqueue_user_message(&self, text: &str) {
        SubagentScope::enqueue_user_message(self, text);
    }

    fn cancel_current_message(&self) {
        SubagentScope::cancel_current_message(self);
    }

    fn terminate(&self, mode: TerminateMode) {
        if let Some(run) = self.run.read().as_ref() {
            *self.terminate_mode.lock() = mode;
            run.session_cancel.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::chat::{
        ChatError, ChatEvent, ChatEventStream, ChatResult, GenerateChunk, UsageMetadata,
    };
    use arbor_core::session::SubagentSessionConfig;
    use arbor_logging::{LogLevel, Logger, LoggerOptions};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;

    use crate::manager::CreateSessionOptions;

    /// Chat client that replays scripted per-round event lists.
    struct ScriptedClient {
        rounds: Mutex<VecDeque<Vec<ChatEvent>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(rounds: Vec<Vec<ChatEvent>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn text_round(text: &str) -> Vec<ChatEvent> {
            vec![ChatEvent::Chunk(GenerateChunk::from_text(text))]
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn send_message_stream(
            &self,
            parts: Vec<MessagePart>,
            _options: &ChatStreamOptions,
            prompt_id: &str,
        ) -> ChatResult<ChatEventStream> {
            self.prompts.lock().push(format!(
                "{prompt_id}:{}",
                parts.first().map(|p| p.text.as_str()).unwrap_or_default()
            ));
            let events = self.rounds.lock().pop_front().unwrap_or_default();
            Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
        }
    }

    struct FixedFactory(Arc<ScriptedClient>);

    #[async_trait]
    impl ChatClientFactory for FixedFactory {
        async fn create(&self, _initial: &Value) -> ChatResult<Arc<dyn ChatClient>> {
            Ok(self.0.clone())
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl ChatClientFactory for FailingFactory {
        async fn create(&self, _initial: &Value) -> ChatResult<Arc<dyn ChatClient>> {
            Err(ChatError::Construction {
                message: "no credentials in context".into(),
            })
        }
    }

    struct Harness {
        manager: Arc<SessionManager>,
        events: Arc<Mutex<Vec<ArborEvent>>>,
        _sub: crate::bus::Subscription,
        _dir: tempfile::TempDir,
    }

    fn make_harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(Logger::new(LoggerOptions {
            level: Some(LogLevel::Error),
            log_dir: dir.path().to_path_buf(),
            ..LoggerOptions::default()
        }));
        let bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = bus.subscribe(move |e| sink.lock().push(e.clone()));
        Harness {
            manager: Arc::new(SessionManager::new(bus, logger)),
            events,
            _sub: sub,
            _dir: dir,
        }
    }

    fn interactive_session(h: &Harness, task_prompt: Option<&str>) -> SessionId {
        h.manager
            .create_session(CreateSessionOptions {
                name: "worker".into(),
                subagent_name: Some("researcher".into()),
                parent_id: None,
                config: SubagentSessionConfig {
                    interactive: true,
                    max_depth: 3,
                    auto_switch: true,
                    inherit_context: false,
                    allow_user_interaction: true,
                },
                task_prompt: task_prompt.map(String::from),
            })
            .unwrap()
    }

    fn scope_with(
        h: &Harness,
        client: Arc<ScriptedClient>,
        tools: ToolRegistry,
    ) -> Arc<SubagentScope> {
        SubagentScope::new(
            h.manager.clone(),
            Arc::new(FixedFactory(client)),
            Arc::new(tools),
            ScopeConfig::default(),
        )
    }

    async fn wait_for<F: Fn(&[ArborEvent]) -> bool>(
        events: &Arc<Mutex<Vec<ArborEvent>>>,
        predicate: F,
    ) {
        for _ in 0..400 {
            if predicate(&events.lock()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached; events: {:?}", events.lock().len());
    }

    fn count(events: &[ArborEvent], event_type: &str) -> usize {
        events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    #[tokio::test]
    async fn construction_failure_finishes_with_error() {
        let h = make_harness();
        let id = interactive_session(&h, None);
        let scope = SubagentScope::new(
            h.manager.clone(),
            Arc::new(FailingFactory),
            Arc::new(ToolRegistry::new()),
            ScopeConfig::default(),
        );

        let mode = scope
            .run_interactive(
                json!({}),
                RunOptions {
                    session_id: id,
                    external_signal: None,
                },
            )
            .await;

        assert_eq!(mode, TerminateMode::Error);
        let events = h.events.lock();
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert!(types.contains(&"subagent_error"));
        assert_eq!(*types.last().unwrap(), "subagent_finish");
    }

    #[tokio::test]
    async fn task_prompt_drives_first_round() {
        let h = make_harness();
        let id = interactive_session(&h, Some("summarize the design"));
        let client = ScriptedClient::new(vec![ScriptedClient::text_round("summary done")]);
        let scope = scope_with(&h, client.clone(), ToolRegistry::new());

        let external = CancellationToken::new();
        let run = {
            let scope = scope.clone();
            let id = id.clone();
            let external = external.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({"model": "scripted-model"}),
                        RunOptions {
                            session_id: id,
                            external_signal: Some(external),
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "round_end") >= 1).await;
        external.cancel();
        let mode = run.await.unwrap();
        assert_eq!(mode, TerminateMode::Cancelled);

        let prompts = client.prompts.lock().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with(":summarize the design"));
        // prompt_id = <root>#<session>#<round> — root == session here.
        assert!(prompts[0].starts_with(&format!("{id}#{id}#1")));

        let events = h.events.lock();
        let finals: Vec<&ArborEvent> = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ArborEvent::SubagentMessageToUser {
                        final_text: Some(_),
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(finals.len(), 1);
    }

    // Strict FIFO: one round in flight, each final precedes the next round.
    #[tokio::test]
    async fn interactive_message_ordering() {
        let h = make_harness();
        let id = interactive_session(&h, None);
        let client = ScriptedClient::new(vec![
            ScriptedClient::text_round("reply one"),
            ScriptedClient::text_round("reply two"),
            ScriptedClient::text_round("reply three"),
        ]);
        let scope = scope_with(&h, client.clone(), ToolRegistry::new());

        let external = CancellationToken::new();
        let run = {
            let scope = scope.clone();
            let id = id.clone();
            let external = external.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: Some(external),
                        },
                    )
                    .await
            })
        };

        // Wait for the scope to bind, then enqueue back-to-back.
        wait_for(&h.events, |e| count(e, "subagent_start") == 1).await;
        h.manager.send_user_message(&id, "m1").unwrap();
        h.manager.send_user_message(&id, "m2").unwrap();
        h.manager.send_user_message(&id, "m3").unwrap();

        wait_for(&h.events, |e| count(e, "round_end") >= 3).await;
        external.cancel();
        let _ = run.await.unwrap();

        // Client saw the messages in FIFO order with increasing rounds.
        let prompts = client.prompts.lock().clone();
        assert_eq!(
            prompts,
            vec![
                format!("{id}#{id}#1:m1"),
                format!("{id}#{id}#2:m2"),
                format!("{id}#{id}#3:m3"),
            ]
        );

        // Round events are properly bracketed and never overlap.
        let events = h.events.lock();
        let mut open_round: Option<u32> = None;
        let mut last_final_round = 0;
        for event in events.iter() {
            match event {
                ArborEvent::RoundStart { round, .. } => {
                    assert!(open_round.is_none(), "round {round} opened while another open");
                    assert_eq!(*round, last_final_round + 1, "rounds in FIFO order");
                    open_round = Some(*round);
                }
                ArborEvent::SubagentMessageToUser {
                    final_text: Some(_),
                    ..
                } => {
                    assert!(open_round.is_some(), "final text outside a round");
                }
                ArborEvent::RoundEnd { round, .. } => {
                    assert_eq!(open_round, Some(*round));
                    open_round = None;
                    last_final_round = *round;
                }
                _ => {}
            }
        }
        assert_eq!(last_final_round, 3);
    }

    #[tokio::test]
    async fn round_events_match_contract_order() {
        let h = make_harness();
        let id = interactive_session(&h, Some("go"));
        let client = ScriptedClient::new(vec![vec![
            ChatEvent::Chunk(GenerateChunk::from_text("part one ")),
            ChatEvent::Chunk(GenerateChunk::from_text("part two")),
        ]]);
        let scope = scope_with(&h, client, ToolRegistry::new());

        let external = CancellationToken::new();
        let run = {
            let scope = scope.clone();
            let id = id.clone();
            let external = external.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: Some(external),
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "round_end") >= 1).await;
        external.cancel();
        let _ = run.await.unwrap();

        let events = h.events.lock();
        let round_events: Vec<&str> = events
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type(),
                    "round_start"
                        | "stream_text"
                        | "subagent_message_to_user"
                        | "round_end"
                )
            })
            .map(|e| match e {
                ArborEvent::SubagentMessageToUser {
                    final_text: Some(_),
                    ..
                } => "final",
                ArborEvent::SubagentMessageToUser {
                    text_chunk: Some(_),
                    ..
                } => "chunk",
                other => other.event_type(),
            })
            .collect();
        assert_eq!(
            round_events,
            vec![
                "round_start",
                "stream_text",
                "chunk",
                "stream_text",
                "chunk",
                "final",
                "round_end",
            ]
        );
        // Final text is the trimmed concatenation of the chunks.
        let final_text = events
            .iter()
            .find_map(|e| match e {
                ArborEvent::SubagentMessageToUser {
                    final_text: Some(t),
                    ..
                } => Some(t.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(final_text, "part one part two");
    }

    #[tokio::test]
    async fn tool_calls_are_dispatched_mid_round() {
        use arbor_core::tools::{
            FunctionCall, FunctionDeclaration, SessionTool, ToolError, ToolInvocation,
            ToolOutput,
        };

        struct PingTool;
        #[async_trait]
        impl SessionTool for PingTool {
            fn name(&self) -> &str {
                "ping"
            }
            fn declaration(&self) -> FunctionDeclaration {
                FunctionDeclaration {
                    name: "ping".into(),
                    description: "Ping".into(),
                    parameters: json!({"type": "object"}),
                }
            }
            async fn execute(
                &self,
                _arguments: serde_json::Map<String, Value>,
                _ctx: ToolInvocation,
            ) -> Result<ToolOutput, ToolError> {
                Ok(ToolOutput::text("pong"))
            }
        }

        let h = make_harness();
        let id = interactive_session(&h, Some("use the tool"));

        let mut chunk = GenerateChunk::from_text("calling ping");
        chunk.function_calls.push(FunctionCall {
            id: Some("c1".into()),
            name: "ping".into(),
            arguments: serde_json::Map::new(),
        });
        chunk.usage_metadata = Some(UsageMetadata {
            prompt_token_count: 12,
            candidates_token_count: 3,
            total_token_count: 15,
        });
        let client = ScriptedClient::new(vec![vec![ChatEvent::Chunk(chunk)]]);

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(PingTool));
        let scope = scope_with(&h, client, tools);

        let external = CancellationToken::new();
        let run = {
            let scope = scope.clone();
            let id = id.clone();
            let external = external.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: Some(external),
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "round_end") >= 1).await;
        external.cancel();
        let _ = run.await.unwrap();

        let events = h.events.lock();
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        let call_pos = types.iter().position(|t| *t == "tool_call").unwrap();
        let result_pos = types.iter().position(|t| *t == "tool_result").unwrap();
        let end_pos = types.iter().position(|t| *t == "round_end").unwrap();
        assert!(call_pos < result_pos && result_pos < end_pos);

        assert_eq!(scope.stats().rounds, 1);
        assert_eq!(scope.stats().input_tokens, 12);
        assert_eq!(scope.stats().total_tokens, 15);
    }

    #[tokio::test]
    async fn chat_error_ends_round_session_stays_alive() {
        struct FlakyClient {
            calls: AtomicU32,
        }
        #[async_trait]
        impl ChatClient for FlakyClient {
            fn model(&self) -> &str {
                "flaky"
            }
            async fn send_message_stream(
                &self,
                _parts: Vec<MessagePart>,
                _options: &ChatStreamOptions,
                _prompt_id: &str,
            ) -> ChatResult<ChatEventStream> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ChatError::Api {
                        status: 503,
                        message: "overloaded".into(),
                        retryable: true,
                    })
                } else {
                    Ok(futures::stream::iter(vec![Ok(ChatEvent::Chunk(
                        GenerateChunk::from_text("recovered"),
                    ))])
                    .boxed())
                }
            }
        }
        struct FlakyFactory;
        #[async_trait]
        impl ChatClientFactory for FlakyFactory {
            async fn create(&self, _initial: &Value) -> ChatResult<Arc<dyn ChatClient>> {
                Ok(Arc::new(FlakyClient {
                    calls: AtomicU32::new(0),
                }))
            }
        }

        let h = make_harness();
        let id = interactive_session(&h, None);
        let scope = SubagentScope::new(
            h.manager.clone(),
            Arc::new(FlakyFactory),
            Arc::new(ToolRegistry::new()),
            ScopeConfig::default(),
        );

        let external = CancellationToken::new();
        let run = {
            let scope = scope.clone();
            let id = id.clone();
            let external = external.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: Some(external),
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "subagent_start") == 1).await;
        h.manager.send_user_message(&id, "first").unwrap();
        wait_for(&h.events, |e| count(e, "round_end") >= 1).await;
        // Round 1 failed, but the session still accepts messages.
        h.manager.send_user_message(&id, "second").unwrap();
        wait_for(&h.events, |e| count(e, "round_end") >= 2).await;
        external.cancel();
        let _ = run.await.unwrap();

        let events = h.events.lock();
        assert_eq!(count(&events, "subagent_error"), 1);
        let finals = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ArborEvent::SubagentMessageToUser {
                        final_text: Some(_),
                        ..
                    }
                )
            })
            .count();
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn external_cancel_skips_queued_messages() {
        let h = make_harness();
        let id = interactive_session(&h, None);
        let client = ScriptedClient::new(vec![
            ScriptedClient::text_round("one"),
            ScriptedClient::text_round("two"),
        ]);
        let scope = scope_with(&h, client.clone(), ToolRegistry::new());

        let external = CancellationToken::new();
        let run = {
            let scope = scope.clone();
            let id = id.clone();
            let external = external.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: Some(external),
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "subagent_start") == 1).await;
        external.cancel();
        let mode = run.await.unwrap();
        assert_eq!(mode, TerminateMode::Cancelled);

        // Messages sent after cancellation are not processed.
        scope.enqueue_user_message("never processed");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(client.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn cancel_current_message_without_round_is_noop() {
        let h = make_harness();
        let _id = interactive_session(&h, None);
        let client = ScriptedClient::new(vec![]);
        let scope = scope_with(&h, client, ToolRegistry::new());

        let before = h.events.lock().len();
        scope.cancel_current_message();
        assert_eq!(h.events.lock().len(), before);
    }

    #[tokio::test]
    async fn max_turns_limit_terminates_scope() {
        let h = make_harness();
        let id = interactive_session(&h, None);
        h.manager
            .session_context(&id)
            .unwrap()
            .set(MAX_TURNS_KEY, json!(1));

        let client = ScriptedClient::new(vec![
            ScriptedClient::text_round("only round"),
            ScriptedClient::text_round("never reached"),
        ]);
        let scope = scope_with(&h, client.clone(), ToolRegistry::new());

        let run = {
            let scope = scope.clone();
            let id = id.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: None,
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "subagent_start") == 1).await;
        h.manager.send_user_message(&id, "m1").unwrap();
        wait_for(&h.events, |e| count(e, "round_end") >= 1).await;
        h.manager.send_user_message(&id, "m2").unwrap();

        let mode = run.await.unwrap();
        assert_eq!(mode, TerminateMode::MaxTurns);
        assert_eq!(client.prompts.lock().len(), 1);
    }

    #[tokio::test]
    async fn manager_abort_terminates_run() {
        let h = make_harness();
        let id = interactive_session(&h, None);
        let client = ScriptedClient::new(vec![]);
        let scope = scope_with(&h, client, ToolRegistry::new());

        let run = {
            let scope = scope.clone();
            let id = id.clone();
            tokio::spawn(async move {
                scope
                    .run_interactive(
                        json!({}),
                        RunOptions {
                            session_id: id,
                            external_signal: None,
                        },
                    )
                    .await
            })
        };

        wait_for(&h.events, |e| count(e, "subagent_start") == 1).await;
        h.manager.abort(&id, Some("operator stop".into())).unwrap();

        let mode = run.await.unwrap();
        assert_eq!(mode, TerminateMode::Cancelled);

        let events = h.events.lock();
        assert_eq!(count(&events, "session_aborted"), 1);
        assert_eq!(count(&events, "subagent_finish"), 1);
    }
}
