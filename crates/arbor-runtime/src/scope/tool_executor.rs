//! Tool executor — dispatches function calls collected from a round.
//!
//! Shared by interactive and non-interactive runners: every call emits
//! `tool_call`, then either executes (with an advisory
//! `tool_waiting_approval` first when the tool asks for it) or reports an
//! unknown-tool failure. Dispatch failures become `success = false` results;
//! the conversation continues.

use arbor_core::events::{ArborEvent, BaseEvent};
use arbor_core::tools::{FunctionCall, ToolInvocation, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::EventBus;

/// Dispatch collected calls in order. Cancellation is observed before each
/// call; already-dispatched results stand.
pub async fn dispatch_calls(
    calls: &[FunctionCall],
    registry: &ToolRegistry,
    session_id: &str,
    prompt_id: &str,
    bus: &EventBus,
    cancel: &CancellationToken,
) {
    for call in calls {
        if cancel.is_cancelled() {
            debug!(session_id, tool = %call.name, "tool dispatch skipped: cancelled");
            break;
        }

        let _ = bus.emit(&ArborEvent::ToolCall {
            base: BaseEvent::now(session_id),
            call: call.clone(),
        });

        let Some(tool) = registry.get(&call.name) else {
            let _ = bus.emit(&ArborEvent::ToolResult {
                base: BaseEvent::now(session_id),
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: false,
                output: None,
                error: Some(format!("Unknown tool: {}", call.name)),
            });
            continue;
        };

        if tool.requires_approval() {
            let _ = bus.emit(&ArborEvent::ToolWaitingApproval {
                base: BaseEvent::now(session_id),
                call_id: call.id.clone(),
                name: call.name.clone(),
            });
        }

        let invocation = ToolInvocation {
            session_id: session_id.to_owned(),
            prompt_id: prompt_id.to_owned(),
            cancel: cancel.clone(),
        };
        let result = tool.execute(call.arguments.clone(), invocation).await;

        let event = match result {
            Ok(output) => ArborEvent::ToolResult {
                base: BaseEvent::now(session_id),
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: true,
                output: Some(output.content),
                error: None,
            },
            Err(e) => ArborEvent::ToolResult {
                base: BaseEvent::now(session_id),
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: false,
                output: None,
                error: Some(e.to_string()),
            },
        };
        let _ = bus.emit(&event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
