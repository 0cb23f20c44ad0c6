//! Shared Application State
//!
//! `AppState` holds the process-wide resources: the session registry, the
//! default collaborator engines, and configuration. `SessionContext` is the
//! per-connection slice of that state, cloned from the defaults at connect
//! time and owned by the registry for the life of the connection.

use crate::{
    config::Config, models::SystemPromptMode, registry::SessionRegistry, ws::turn::ActiveTurn,
};
use stagecast_core::{
    engine::{AgentEngine, AsrEngine, TtsEngine},
    expression::ExpressionExtractor,
};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub agent: Arc<dyn AgentEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub asr: Arc<dyn AsrEngine>,
    pub expressions: Arc<dyn ExpressionExtractor>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds the context for a newly connected session from the defaults.
    pub fn new_session_context(&self) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            character_name: self.config.character_name.clone(),
            avatar: self.config.character_avatar.clone(),
            history_uid: Uuid::new_v4().to_string(),
            base_system_prompt: self.config.persona_prompt.clone(),
            system_prompt: Mutex::new(self.config.persona_prompt.clone()),
            agent: self.agent.clone(),
            tts: self.tts.clone(),
            asr: self.asr.clone(),
            expressions: self.expressions.clone(),
            active_turn: tokio::sync::Mutex::new(None),
        })
    }
}

/// Mutable per-session state plus the collaborators configured for this
/// session. Owned by the registry; the turn manager borrows it for the
/// duration of a turn and never retains it past turn completion.
pub struct SessionContext {
    pub character_name: String,
    pub avatar: String,
    /// Identifier of the persisted conversation history for this session.
    /// Storage itself is a collaborator concern.
    pub history_uid: String,
    /// The original system prompt, kept as the baseline that control-plane
    /// `reset` restores.
    pub base_system_prompt: String,
    system_prompt: Mutex<String>,
    pub agent: Arc<dyn AgentEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub asr: Arc<dyn AsrEngine>,
    pub expressions: Arc<dyn ExpressionExtractor>,
    /// The at-most-one active turn for this session.
    pub active_turn: tokio::sync::Mutex<Option<ActiveTurn>>,
}

impl SessionContext {
    pub fn current_system_prompt(&self) -> String {
        self.system_prompt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Combines an instruction with the current prompt. Append and prepend
    /// stack across calls; only `reset` restores the connect-time baseline.
    /// Returns the prompt now in effect.
    pub fn update_system_prompt(&self, instruction: &str, mode: SystemPromptMode) -> String {
        let mut current = self
            .system_prompt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = match mode {
            SystemPromptMode::Append => format!("{}\n\n{}", *current, instruction),
            SystemPromptMode::Prepend => format!("{}\n\n{}", instruction, *current),
            SystemPromptMode::Reset => self.base_system_prompt.clone(),
        };
        *current = next.clone();
        next
    }
}


#[cfg(test)]
mod tests {
    use super::testing::stub_context;
    use crate::models::SystemPromptMode;

    #[test]
    fn system_prompt_modes_stack_and_reset_restores_the_baseline() {
        let ctx = stub_context();
        assert_eq!(ctx.current_system_prompt(), "base prompt");

        ctx.update_system_prompt("be dramatic", SystemPromptMode::Append);
        assert_eq!(ctx.current_system_prompt(), "base prompt\n\nbe dramatic");

        // A second append stacks on the first instead of replacing it.
        ctx.update_system_prompt("whisper", SystemPromptMode::Append);
        assert_eq!(
            ctx.current_system_prompt(),
            "base prompt\n\nbe dramatic\n\nwhisper"
        );

        ctx.update_system_prompt("most important", SystemPromptMode::Prepend);
        assert_eq!(
            ctx.current_system_prompt(),
            "most important\n\nbase prompt\n\nbe dramatic\n\nwhisper"
        );

        ctx.update_system_prompt("ignored", SystemPromptMode::Reset);
        assert_eq!(ctx.current_system_prompt(), "base prompt");
        assert_eq!(ctx.base_system_prompt, "base prompt");
    }
}
