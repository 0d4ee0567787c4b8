//! A deterministic test-double transport, grounded in the teacher's
//! `drivers/echo.rs`: instead of calling a real model, it synthesizes a
//! plausible [`crate::model::ImprovementResult`] from the call's user
//! message, so the rest of the pipeline can be exercised without a network
//! dependency.

use async_trait::async_trait;
use keen_retry::RetryResult;

use super::{ChatCall, ChatReply, LlmTransport, TransportRetryResult};

/// Echoes a synthesized, schema-conforming reply derived from the request.
/// Useful for tests and for the `--offline` fallback path.
#[derive(Debug, Default)]
pub struct EchoTransport;

impl EchoTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmTransport for EchoTransport {
    async fn chat(&self, call: &ChatCall) -> TransportRetryResult {
        let request_line = call
            .user
            .lines()
            .find(|line| line.starts_with("Request:"))
            .map(|line| line.trim_start_matches("Request:").trim())
            .unwrap_or("the request");

        let body = serde_json::json!({
            "improved_prompt": format!(
                "Provide a complete, well-structured response to: {request_line}",
            ),
            "clarifying_questions": [],
            "assumptions": [],
            "confidence": 0.6,
        });

        RetryResult::Ok {
            reported_input: (),
            output: ChatReply {
                raw_text: body.to_string(),
            },
        }
    }
}
