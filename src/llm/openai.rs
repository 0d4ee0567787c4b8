//! OpenAI-compatible transport adapter, grounded in the teacher's
//! `drivers/openai.rs`: same client construction from `OPENAI_API_KEY`/
//! `OPENAI_API_BASE`, same `ResponseFormatJsonSchema` request shape, same
//! `create_byot` call wrapped in a timeout.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use keen_retry::RetryResult;

use crate::{
    errors::PipelineError,
    retry::IsKnownTransient,
};

use super::{ChatCall, ChatReply, LlmTransport, TransportRetryResult};

/// Transport talking to an OpenAI-compatible chat completions endpoint
/// (OpenAI itself, LiteLLM, Ollama's OpenAI-compat surface, ...).
#[derive(Debug)]
pub struct OpenAiCompatibleTransport {
    client: Client<OpenAIConfig>,
}

impl OpenAiCompatibleTransport {
    pub fn new() -> Self {
        let mut config = OpenAIConfig::new();
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            config = config.with_api_key(api_key);
        }
        if let Ok(api_base) = std::env::var("OPENAI_API_BASE") {
            config = config.with_api_base(api_base);
        }
        Self {
            client: Client::with_config(config),
        }
    }
}

impl Default for OpenAiCompatibleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmTransport for OpenAiCompatibleTransport {
    async fn chat(&self, call: &ChatCall) -> TransportRetryResult {
        let messages = match build_messages(call) {
            Ok(messages) => messages,
            Err(error) => {
                return RetryResult::Fatal {
                    input: (),
                    error: PipelineError::Internal {
                        id: "failed_to_build_chat_messages",
                    }
                    .tap_err(&error),
                };
            }
        };

        let json_schema = ResponseFormatJsonSchema {
            name: "improvement_result".to_owned(),
            schema: Some(call.schema.clone()),
            strict: Some(true),
            description: None,
        };

        let mut req = CreateChatCompletionRequestArgs::default();
        req.model(call.model.clone())
            .messages(messages)
            .response_format(ResponseFormat::JsonSchema { json_schema })
            .temperature(call.temperature)
            .store(false);
        let req = match req.build() {
            Ok(req) => req,
            Err(error) => {
                return RetryResult::Fatal {
                    input: (),
                    error: PipelineError::Internal {
                        id: "failed_to_build_chat_request",
                    }
                    .tap_err(&error),
                };
            }
        };

        let chat = self.client.chat();
        let call_future = chat.create_byot(req);
        let timed = tokio::time::timeout(Duration::from_millis(call.timeout_ms), call_future);

        let response_value: serde_json::Value = match timed.await {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                return classify_openai_error(error);
            }
            Err(_) => {
                return RetryResult::Fatal {
                    input: (),
                    error: PipelineError::Timeout(call.timeout_ms),
                };
            }
        };

        let response: CreateChatCompletionResponse =
            match serde_json::from_value(response_value) {
                Ok(response) => response,
                Err(error) => {
                    return RetryResult::Fatal {
                        input: (),
                        error: PipelineError::Internal {
                            id: "failed_to_parse_openai_response",
                        }
                        .tap_err(&error),
                    };
                }
            };

        let choice = match response.choices.first() {
            Some(choice) => choice,
            None => {
                return RetryResult::Fatal {
                    input: (),
                    error: PipelineError::NonJsonOutput {
                        meta: Default::default(),
                    },
                };
            }
        };
        if choice.finish_reason == Some(async_openai::types::FinishReason::ContentFilter) {
            return RetryResult::Fatal {
                input: (),
                error: PipelineError::QualityGateFailure {
                    rule: "content filter triggered".to_owned(),
                    meta: Default::default(),
                },
            };
        }

        let content = choice.message.content.clone().unwrap_or_default();
        RetryResult::Ok {
            reported_input: (),
            output: ChatReply { raw_text: content },
        }
    }
}

fn build_messages(call: &ChatCall) -> Result<Vec<ChatCompletionRequestMessage>, async_openai::error::OpenAIError> {
    let system = ChatCompletionRequestMessage::System(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(ChatCompletionRequestSystemMessageContent::Text(
                call.system.clone(),
            ))
            .build()?,
    );
    let user = ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Text(
                call.user.clone(),
            ))
            .build()?,
    );
    Ok(vec![system, user])
}

fn classify_openai_error(error: OpenAIError) -> TransportRetryResult {
    let message = error.to_string().to_lowercase();
    if message.contains("model") && message.contains("not found") {
        return RetryResult::Fatal {
            input: (),
            error: PipelineError::ModelNotFound {
                model: "unknown".to_owned(),
                meta: Default::default(),
            },
        };
    }
    if error.is_known_transient() {
        RetryResult::Transient {
            input: (),
            error: PipelineError::ConnectionError(error.to_string()),
        }
    } else {
        RetryResult::Fatal {
            input: (),
            error: PipelineError::ConnectionError(error.to_string()),
        }
    }
}

trait TapErr {
    fn tap_err(self, error: &impl std::fmt::Display) -> Self;
}

impl TapErr for PipelineError {
    fn tap_err(self, error: &impl std::fmt::Display) -> Self {
        tracing::error!(%error, kind = self.kind_name(), "OpenAI transport error");
        self
    }
}
