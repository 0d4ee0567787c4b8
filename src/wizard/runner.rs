//! Drives a [`super::SessionManager`] session across turns, calling the
//! [`crate::orchestrator::Engine`] once per turn to decide whether the
//! conversation is done (spec §4.9: "the orchestrator is re-entered on every
//! wizard turn; a session simply remembers where it left off").

use tokio_util::sync::CancellationToken;

use crate::{
    config::WizardMode,
    model::{Complexity, ImproveRequest, ImprovementResult, Intent},
    orchestrator::Engine,
    prelude::*,
    wizard::{SessionHandle, SessionManager, WizardDecisionInputs},
};

/// What the caller should do after a wizard turn.
#[derive(Debug)]
pub enum WizardStep {
    /// The session wants more information before it's confident; show the
    /// question and collect the user's reply for the next turn.
    Question { session_id: String, question: String },
    /// The session (or the bypass path, if wizard mode decided not to
    /// engage) has a final result.
    Final(Box<ImprovementResult>),
}

pub struct WizardRunner<'a> {
    pub engine: &'a Engine,
    pub sessions: &'a SessionManager,
}

impl<'a> WizardRunner<'a> {
    pub fn new(engine: &'a Engine, sessions: &'a SessionManager) -> Self {
        Self { engine, sessions }
    }

    /// Start a new wizard conversation for `idea`. If the session decides not
    /// to engage (spec §4.9's decision table says disabled), this runs the
    /// plain `improve` pipeline directly and returns the final result.
    pub async fn start(
        &self,
        idea: String,
        context: Option<String>,
        request_template: ImproveRequest,
        cancel: CancellationToken,
    ) -> Result<WizardStep, crate::errors::PipelineError> {
        let analyzed = self.engine.analyze(&request_template);

        let inputs = WizardDecisionInputs {
            mode: self.engine.config.wizard_mode,
            max_turns: self.engine.config.wizard_max_turns,
            confidence: analyzed.analysis_confidence,
            intent: analyzed.intent,
            complexity: analyzed.complexity,
        };

        let session = self
            .sessions
            .create(inputs)
            .await
            .map_err(|_| crate::errors::PipelineError::Internal {
                id: "wizard_session_create_failed",
            })?;

        let session_id = session.lock().await.id.clone();
        let enabled = session.lock().await.enabled;

        if !enabled {
            let mut request = request_template;
            request.idea = idea;
            request.context = context;
            let result = self.engine.improve(request, cancel).await?;
            return Ok(WizardStep::Final(Box::new(result)));
        }

        self.sessions
            .append_user_message(&session, idea.clone())
            .await
            .ok();

        self.run_turn(&session, session_id, idea, context, request_template, cancel)
            .await
    }

    /// Continue an existing session with the user's reply to the previous
    /// clarifying question.
    pub async fn reply(
        &self,
        session_id: &str,
        reply: String,
        original_idea: String,
        request_template: ImproveRequest,
        cancel: CancellationToken,
    ) -> Result<WizardStep, crate::errors::PipelineError> {
        let session = self
            .sessions
            .get_or_load(session_id)
            .await
            .map_err(|_| crate::errors::PipelineError::Internal {
                id: "wizard_session_load_failed",
            })?
            .ok_or(crate::errors::PipelineError::Internal {
                id: "wizard_session_not_found",
            })?;

        self.sessions.append_user_message(&session, reply.clone()).await.ok();

        let accumulated_context = {
            let record = session.lock().await;
            record
                .messages
                .iter()
                .filter(|m| m.role == crate::model::MessageRole::User)
                .skip(1)
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n")
        };

        self.run_turn(
            &session,
            session_id.to_owned(),
            original_idea,
            Some(accumulated_context),
            request_template,
            cancel,
        )
        .await
    }

    async fn run_turn(
        &self,
        session: &SessionHandle,
        session_id: String,
        idea: String,
        context: Option<String>,
        request_template: ImproveRequest,
        cancel: CancellationToken,
    ) -> Result<WizardStep, crate::errors::PipelineError> {
        let mut request = request_template;
        request.idea = idea;
        request.context = context;

        let result = self.engine.improve(request, cancel).await?;

        let (current_turn, max_turns) = {
            let record = session.lock().await;
            (record.current_turn, record.max_turns)
        };

        let has_more_turns = current_turn < max_turns;
        let is_ambiguous = !result.clarifying_questions.is_empty() && has_more_turns;

        if is_ambiguous {
            let question = result.clarifying_questions[0].clone();
            self.sessions
                .append_assistant_message(session, question.clone(), result.confidence, true)
                .await
                .ok();
            Ok(WizardStep::Question { session_id, question })
        } else {
            let final_text = format!("# Improved Prompt\n\n{}", result.improved_prompt);
            self.sessions
                .append_assistant_message(session, final_text, result.confidence, false)
                .await
                .ok();
            self.sessions.complete(session).await.ok();
            Ok(WizardStep::Final(Box::new(result)))
        }
    }
}

/// Whether a `WizardMode`/analysis combination would engage the wizard at
/// all, exposed for callers (like the CLI) that want to skip session
/// bookkeeping entirely when it's clearly off.
pub fn would_engage(mode: WizardMode, intent: Intent, complexity: Complexity, confidence: f64, max_turns: u32) -> bool {
    match mode {
        WizardMode::Off => false,
        WizardMode::Always => true,
        WizardMode::Auto => {
            intent == Intent::Generate || complexity == Complexity::Complex || confidence < 0.7 || max_turns > 1
        }
    }
}
