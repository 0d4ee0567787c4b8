//! Wizard session state machine (spec §4.9).

use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::WizardMode,
    model::{Complexity, Intent, MessageRole, SessionMessage},
};

/// A wizard session's full state. Persisted as-is (see [`super::store`]).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub enabled: bool,
    pub resolved: bool,
    pub bypassed: bool,
    pub can_offer_skip: bool,
    pub current_turn: u32,
    pub max_turns: u32,
    pub ambiguity_score: Option<f64>,
    pub messages: Vec<SessionMessage>,
}

/// The inputs that decide whether a new session starts enabled (spec §4.9's
/// decision table).
#[derive(Debug, Clone, Copy)]
pub struct WizardDecisionInputs {
    pub mode: WizardMode,
    pub max_turns: u32,
    pub confidence: f64,
    pub intent: Intent,
    pub complexity: Complexity,
}

/// Decide whether a new session should start enabled, and whether it may
/// offer the user a skip option.
fn decide(inputs: WizardDecisionInputs) -> (bool, bool) {
    let enabled = match inputs.mode {
        WizardMode::Off => false,
        WizardMode::Always => true,
        WizardMode::Auto => {
            inputs.intent == Intent::Generate
                || inputs.complexity == Complexity::Complex
                || inputs.confidence < 0.7
                || inputs.max_turns > 1
        }
    };

    let can_offer_skip = inputs.mode == WizardMode::Auto
        && inputs.max_turns > 1
        && inputs.confidence >= 0.7
        && inputs.complexity != Complexity::Complex
        && inputs.intent != Intent::Generate;

    (enabled, can_offer_skip)
}

impl SessionRecord {
    /// Start a new session, deciding enablement per spec §4.9's table.
    pub fn new(inputs: WizardDecisionInputs) -> Self {
        let (enabled, can_offer_skip) = decide(inputs);
        Self {
            id: Uuid::now_v7().to_string(),
            enabled,
            resolved: !enabled,
            bypassed: !enabled,
            can_offer_skip,
            current_turn: 0,
            max_turns: inputs.max_turns,
            ambiguity_score: None,
            messages: Vec::new(),
        }
    }

    /// Append a user message, incrementing `current_turn`. If `current_turn`
    /// reaches `max_turns`, the session is marked resolved.
    pub fn append_user_message(&mut self, text: String) {
        self.messages.push(SessionMessage {
            role: MessageRole::User,
            content: text,
            timestamp: Utc::now(),
            confidence: None,
            is_ambiguous: None,
        });
        self.current_turn += 1;
        if self.current_turn >= self.max_turns {
            self.resolved = true;
        }
    }

    /// Append an assistant message. Updates the ambiguity score to the
    /// message's confidence; if `is_ambiguous` is false, marks the session
    /// resolved.
    pub fn append_assistant_message(&mut self, text: String, confidence: f64, is_ambiguous: bool) {
        self.messages.push(SessionMessage {
            role: MessageRole::Assistant,
            content: text,
            timestamp: Utc::now(),
            confidence: Some(confidence),
            is_ambiguous: Some(is_ambiguous),
        });
        self.ambiguity_score = Some(confidence);
        if !is_ambiguous {
            self.resolved = true;
        }
    }

    /// Mark the session resolved unconditionally.
    pub fn complete(&mut self) {
        self.resolved = true;
    }

    /// The last assistant message whose content starts with `#`, if any.
    pub fn extract_final_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && m.content.trim_start().starts_with('#'))
            .map(|m| m.content.as_str())
    }

    /// The ordered transcript (original user input, then every subsequent
    /// message), excluding system messages.
    pub fn to_chat_format(&self) -> Vec<&SessionMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect()
    }
}
