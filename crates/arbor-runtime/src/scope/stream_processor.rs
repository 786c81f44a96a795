//! Stream processor — consumes a `ChatEventStream`, accumulates round text
//! and function calls, and surfaces chunks as events.

use arbor_core::chat::{ChatError, ChatEvent, ChatEventStream, UsageMetadata};
use arbor_core::events::{ArborEvent, BaseEvent};
use arbor_core::tools::FunctionCall;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;

/// Accumulated result of one round's stream.
#[derive(Debug, Default)]
pub struct RoundStreamOutcome {
    /// Concatenated text of every part, arrival order.
    pub text: String,
    /// Function calls collected across chunks.
    pub function_calls: Vec<FunctionCall>,
    /// Last usage metadata seen.
    pub usage: Option<UsageMetadata>,
    /// Whether cancellation ended the stream early.
    pub interrupted: bool,
}

/// Consume a chat stream, emitting `stream_text` and chunked
/// `subagent_message_to_user` events in arrival order.
///
/// Cancellation is observed at every stream event boundary; an interrupted
/// round keeps the text accumulated so far but is flagged so the caller
/// skips tool dispatch and the final-text event.
pub async fn process_stream(
    mut stream: ChatEventStream,
    session_id: &str,
    bus: &EventBus,
    cancel: &CancellationToken,
) -> Result<RoundStreamOutcome, ChatError> {
    let mut outcome = RoundStreamOutcome {
        text: String::with_capacity(4096),
        ..RoundStreamOutcome::default()
    };

    loop {
        // biased: prefer cancellation when both it and a stream event are ready
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                outcome.interrupted = true;
                return Ok(outcome);
            }
            event = stream.next() => event,
        };

        match event {
            None => break,
            Some(Err(ChatError::Cancelled)) => {
                outcome.interrupted = true;
                return Ok(outcome);
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(ChatEvent::Retry { .. })) => {
                // The client retries internally; nothing to surface per-round.
            }
            Some(Ok(ChatEvent::Chunk(chunk))) => {
                outcome
                    .function_calls
                    .extend(chunk.function_calls.iter().cloned());
                for text in chunk.text_parts() {
                    outcome.text.push_str(text);
                    let _ = bus.emit(&ArborEvent::StreamText {
                        base: BaseEvent::now(session_id),
                        text: text.to_owned(),
                    });
                    let _ = bus.emit(&ArborEvent::SubagentMessageToUser {
                        base: BaseEvent::now(session_id),
                        text_chunk: Some(text.to_owned()),
                        final_text: None,
                    });
                }
                if let Some(usage) = chunk.usage_metadata {
                    outcome.usage = Some(usage);
                }
            }
        }
    }

    Ok(outcome)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
