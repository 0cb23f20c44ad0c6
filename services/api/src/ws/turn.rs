//! The per-session turn manager.
//!
//! A turn is one full conversational exchange: the start signal, one
//! lip-sync-ready audio envelope per sentence of the response, and the end
//! signal. Each session has at most one active turn; starting a new one
//! first cancels whatever is running (barge-in), and cancellation always
//! still emits the end signal so the front end is never left hanging.

use crate::{
    audio::{self, AudioClip, AudioPayload, PitchProfile},
    registry::{OutboundSender, SessionRegistry},
    state::SessionContext,
    ws::protocol::ServerMessage,
};
use rand::{SeedableRng, rngs::StdRng};
use stagecast_core::{engine::TtsAudio, output::DisplayText, segment};
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

/// Handle to a running turn, stored in the session context. Dropping the
/// handle does not cancel the turn; cancellation always goes through
/// [`cancel_turn`] or a replacing [`begin_turn`].
pub struct ActiveTurn {
    cancel: oneshot::Sender<()>,
    pub(crate) handle: JoinHandle<()>,
}

/// What triggers a turn.
pub enum TurnInput {
    /// Speak this text verbatim: no agent call, no memory involvement.
    Spoken(String),
    /// Run a full conversational turn for this user text.
    Conversation { user_text: String },
}

/// Starts a turn for one session, cancelling any active turn first.
///
/// The active-turn slot is held locked across the swap so two concurrent
/// triggers can never interleave their signals on the transport.
pub async fn begin_turn(
    registry: &SessionRegistry,
    session_id: Uuid,
    context: Arc<SessionContext>,
    transport: OutboundSender,
    input: TurnInput,
    slice_length_ms: u32,
) {
    registry.mark_active(session_id);

    let mut slot = context.active_turn.lock().await;
    if let Some(previous) = slot.take() {
        let _ = previous.cancel.send(());
        let _ = previous.handle.await;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let span = info_span!("turn", %session_id);
    let handle = tokio::spawn(
        run_turn(context.clone(), transport, input, slice_length_ms, cancel_rx).instrument(span),
    );
    *slot = Some(ActiveTurn {
        cancel: cancel_tx,
        handle,
    });
}

/// Cancels the session's active turn, if any, and waits for it to wind down.
/// The cancelled turn still emits its end signal before terminating.
pub async fn cancel_turn(context: &SessionContext) {
    let previous = context.active_turn.lock().await.take();
    if let Some(turn) = previous {
        let _ = turn.cancel.send(());
        let _ = turn.handle.await;
    }
}

/// The turn task. Resolves the response text, emits the start signal, runs
/// per-utterance synthesis, and emits the end signal exactly once on every
/// path.
async fn run_turn(
    context: Arc<SessionContext>,
    transport: OutboundSender,
    input: TurnInput,
    slice_length_ms: u32,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let response_text = match input {
        TurnInput::Spoken(text) => text,
        TurnInput::Conversation { user_text } => {
            let system_prompt = context.current_system_prompt();
            let chat = context
                .agent
                .chat(&system_prompt, &context.history_uid, &user_text);
            tokio::select! {
                // Barge-in before the response exists: the turn never
                // started, so no start/end signals are owed.
                _ = &mut cancel_rx => return,
                result = chat => match result {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = ?e, "Agent chat failed");
                        deliver(
                            &transport,
                            ServerMessage::Error {
                                message: format!("Agent failed: {e}"),
                            },
                        );
                        return;
                    }
                },
            }
        }
    };

    let utterances = segment::split_sentences(&response_text);

    if !deliver(
        &transport,
        ServerMessage::FullText {
            text: response_text,
        },
    ) {
        return;
    }
    if !deliver(&transport, ServerMessage::SynthesisStart) {
        return;
    }

    // Synthesis runs concurrently across utterances, but delivery is strictly
    // in source order: handles are awaited one by one (buffer-and-release).
    let pending: Vec<(String, JoinHandle<anyhow::Result<TtsAudio>>)> = utterances
        .into_iter()
        .map(|utterance| {
            let tts = context.tts.clone();
            let tts_text = context.expressions.strip_keywords(&utterance);
            let handle = tokio::spawn(async move { tts.synthesize(&tts_text).await });
            (utterance, handle)
        })
        .collect();

    let mut cancelled = false;
    for (utterance, mut handle) in pending {
        if cancelled {
            handle.abort();
            continue;
        }
        tokio::select! {
            _ = &mut cancel_rx => {
                handle.abort();
                cancelled = true;
            }
            joined = &mut handle => {
                let display_text = DisplayText::new(
                    utterance.clone(),
                    context.character_name.clone(),
                    context.avatar.clone(),
                );
                let actions = context.expressions.extract(&utterance);
                let delivered = match synthesized_clip(joined) {
                    Ok(clip) => {
                        match build_payload(clip, slice_length_ms, display_text.clone(), actions.clone()).await {
                            Ok(payload) => deliver(&transport, ServerMessage::Audio(payload)),
                            Err(message) => deliver_failed_utterance(
                                &transport, message, slice_length_ms, display_text, actions,
                            ),
                        }
                    }
                    Err(message) => deliver_failed_utterance(
                        &transport, message, slice_length_ms, display_text, actions,
                    ),
                };
                if !delivered {
                    // Dead transport: stop synthesizing, but still fall
                    // through to the end signal below.
                    cancelled = true;
                }
            }
        }
    }

    // The end signal goes out exactly once, cancelled or not.
    deliver(&transport, ServerMessage::SynthesisComplete);
}

/// Unwraps a finished synthesis task into the uniform clip representation.
fn synthesized_clip(
    joined: Result<anyhow::Result<TtsAudio>, tokio::task::JoinError>,
) -> Result<AudioClip, String> {
    match joined {
        Ok(Ok(clip)) => Ok(AudioClip::from_pcm16(&clip.pcm16, clip.sample_rate)),
        Ok(Err(e)) => Err(format!("Speech synthesis failed: {e}")),
        Err(e) => Err(format!("Speech synthesis task failed: {e}")),
    }
}

/// Runs the audio pipeline off the scheduler; pitch processing and RMS
/// analysis are CPU-bound.
async fn build_payload(
    clip: AudioClip,
    slice_length_ms: u32,
    display_text: DisplayText,
    actions: Option<stagecast_core::output::AvatarActions>,
) -> Result<AudioPayload, String> {
    let result = tokio::task::spawn_blocking(move || {
        let mut rng = StdRng::from_os_rng();
        audio::prepare_audio_payload(
            Some(clip),
            slice_length_ms,
            display_text,
            actions,
            false,
            &PitchProfile::default(),
            &mut rng,
        )
    })
    .await;
    match result {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(format!("Audio processing failed: {e}")),
        Err(e) => Err(format!("Audio processing task failed: {e}")),
    }
}

/// Per-utterance failure recovery: an error signal plus a silent text-only
/// bubble. The turn continues with the next utterance.
fn deliver_failed_utterance(
    transport: &OutboundSender,
    message: String,
    slice_length_ms: u32,
    display_text: DisplayText,
    actions: Option<stagecast_core::output::AvatarActions>,
) -> bool {
    warn!(%message, "Utterance failed; delivering silent payload");
    deliver(transport, ServerMessage::Error { message })
        && deliver(
            transport,
            ServerMessage::Audio(AudioPayload::silent(
                slice_length_ms,
                display_text,
                actions,
                false,
            )),
        )
}

/// Sends one message through the session's writer channel. A closed channel
/// means the session died; the connection handler owns the cleanup.
fn deliver(transport: &OutboundSender, message: ServerMessage) -> bool {
    transport.send(message).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{StubAgent, StubTts, context_with};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use stagecast_core::engine::TtsEngine;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Synthesizes slower for texts containing "slow", so a later segment can
    /// finish before an earlier one.
    struct DelayedTts;

    #[async_trait]
    impl TtsEngine for DelayedTts {
        async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
            let delay = if text.to_lowercase().contains("slow") {
                Duration::from_millis(80)
            } else {
                Duration::from_millis(5)
            };
            tokio::time::sleep(delay).await;
            StubTts.synthesize(text).await
        }
    }

    /// Never finishes; used to hold a turn open for cancellation tests.
    struct BlockedTts;

    #[async_trait]
    impl TtsEngine for BlockedTts {
        async fn synthesize(&self, _text: &str) -> Result<TtsAudio> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            unreachable!("blocked synthesis should always be cancelled")
        }
    }

    /// Fails for texts containing "bad".
    struct FlakyTts;

    #[async_trait]
    impl TtsEngine for FlakyTts {
        async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
            if text.contains("bad") {
                return Err(anyhow!("voice backend exploded"));
            }
            StubTts.synthesize(text).await
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl stagecast_core::engine::AgentEngine for FailingAgent {
        async fn chat(&self, _s: &str, _h: &str, _u: &str) -> Result<String> {
            Err(anyhow!("model unavailable"))
        }
    }

    async fn finish_turn(context: &SessionContext) {
        let turn = context.active_turn.lock().await.take().unwrap();
        turn.handle.await.unwrap();
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn audio_texts(messages: &[ServerMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Audio(p) => Some(p.display_text.text.clone()),
                _ => None,
            })
            .collect()
    }

    fn count_ends(messages: &[ServerMessage]) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::SynthesisComplete))
            .count()
    }

    #[tokio::test]
    async fn delivery_order_matches_source_order() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(DelayedTts));
        let (tx, mut rx) = mpsc::unbounded_channel();

        begin_turn(
            &registry,
            Uuid::new_v4(),
            context.clone(),
            tx,
            TurnInput::Spoken("Slow first one. Fast second one.".to_string()),
            20,
        )
        .await;
        finish_turn(&context).await;

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::FullText { .. }));
        assert!(matches!(messages[1], ServerMessage::SynthesisStart));
        // The second segment synthesizes faster, but arrives second anyway.
        assert_eq!(
            audio_texts(&messages),
            vec!["Slow first one.", "Fast second one."]
        );
        assert_eq!(count_ends(&messages), 1);
        assert!(matches!(
            messages.last().unwrap(),
            ServerMessage::SynthesisComplete
        ));
    }

    #[tokio::test]
    async fn cancelled_turn_emits_one_end_and_no_audio() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(BlockedTts));
        let (tx, mut rx) = mpsc::unbounded_channel();

        begin_turn(
            &registry,
            Uuid::new_v4(),
            context.clone(),
            tx,
            TurnInput::Spoken("This will never be voiced.".to_string()),
            20,
        )
        .await;
        // Let the turn emit its start signals before barging in.
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_turn(&context).await;

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::FullText { .. }));
        assert!(matches!(messages[1], ServerMessage::SynthesisStart));
        assert!(audio_texts(&messages).is_empty());
        assert_eq!(count_ends(&messages), 1);
    }

    #[tokio::test]
    async fn failed_utterance_recovers_with_silent_payload() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(FlakyTts));
        let (tx, mut rx) = mpsc::unbounded_channel();

        begin_turn(
            &registry,
            Uuid::new_v4(),
            context.clone(),
            tx,
            TurnInput::Spoken("Good start. bad middle. Good finish.".to_string()),
            20,
        )
        .await;
        finish_turn(&context).await;

        let messages = drain(&mut rx);
        let payloads: Vec<&AudioPayload> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Audio(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(payloads.len(), 3);
        assert!(payloads[0].audio.is_some());
        assert!(payloads[1].audio.is_none(), "failed utterance is silent");
        assert!(payloads[2].audio.is_some(), "turn continues after failure");
        assert_eq!(
            messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::Error { .. }))
                .count(),
            1
        );
        assert_eq!(count_ends(&messages), 1);
    }

    #[tokio::test]
    async fn new_turn_cancels_the_active_one_without_interleaving() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(DelayedTts));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        begin_turn(
            &registry,
            id,
            context.clone(),
            tx.clone(),
            TurnInput::Spoken("Slow opener.".to_string()),
            20,
        )
        .await;
        begin_turn(
            &registry,
            id,
            context.clone(),
            tx,
            TurnInput::Spoken("Quick reply.".to_string()),
            20,
        )
        .await;
        finish_turn(&context).await;

        let messages = drain(&mut rx);
        assert_eq!(count_ends(&messages), 2);
        // The first turn's end precedes the second turn's start.
        let first_end = messages
            .iter()
            .position(|m| matches!(m, ServerMessage::SynthesisComplete))
            .unwrap();
        let second_start = messages
            .iter()
            .rposition(|m| matches!(m, ServerMessage::SynthesisStart))
            .unwrap();
        assert!(first_end < second_start);
        // Only the second turn produced audio.
        assert_eq!(audio_texts(&messages), vec!["Quick reply."]);
    }

    #[tokio::test]
    async fn conversation_turn_announces_agent_response() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(StubTts));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        begin_turn(
            &registry,
            id,
            context.clone(),
            tx,
            TurnInput::Conversation {
                user_text: "hi".to_string(),
            },
            20,
        )
        .await;
        finish_turn(&context).await;

        let messages = drain(&mut rx);
        match &messages[0] {
            ServerMessage::FullText { text } => assert_eq!(text, "echo: hi"),
            other => panic!("expected full-text first, got {other:?}"),
        }
        assert_eq!(count_ends(&messages), 1);
    }

    #[tokio::test]
    async fn agent_failure_surfaces_an_error_without_a_turn() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(FailingAgent), Arc::new(StubTts));
        let (tx, mut rx) = mpsc::unbounded_channel();

        begin_turn(
            &registry,
            Uuid::new_v4(),
            context.clone(),
            tx,
            TurnInput::Conversation {
                user_text: "hi".to_string(),
            },
            20,
        )
        .await;
        finish_turn(&context).await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn empty_response_still_brackets_the_turn() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(StubTts));
        let (tx, mut rx) = mpsc::unbounded_channel();

        begin_turn(
            &registry,
            Uuid::new_v4(),
            context.clone(),
            tx,
            TurnInput::Spoken("   ".to_string()),
            20,
        )
        .await;
        finish_turn(&context).await;

        let messages = drain(&mut rx);
        assert!(matches!(messages[0], ServerMessage::FullText { .. }));
        assert!(matches!(messages[1], ServerMessage::SynthesisStart));
        assert!(matches!(messages[2], ServerMessage::SynthesisComplete));
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn disconnect_mid_turn_stops_all_delivery() {
        let registry = SessionRegistry::new();
        let context = context_with(Arc::new(StubAgent), Arc::new(BlockedTts));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.register(id, tx.clone(), context.clone()).unwrap();

        begin_turn(
            &registry,
            id,
            context.clone(),
            tx,
            TurnInput::Spoken("Doomed turn.".to_string()),
            20,
        )
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Disconnect: cancel the turn and unregister as one operation.
        cancel_turn(&context).await;
        registry.unregister(id);

        assert!(registry.list_ids().is_empty());
        let messages = drain(&mut rx);
        assert_eq!(count_ends(&messages), 1);
        assert!(audio_texts(&messages).is_empty());
        // All senders are gone, so the channel reports closed: nothing can
        // deliver to this session anymore.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
