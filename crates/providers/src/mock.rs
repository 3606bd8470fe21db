//! Deterministic in-process [`LlmProvider`] used as the default dev/test
//! adapter now that concrete vendor HTTP clients are out of scope (see
//! `traits::LlmProvider`'s doc comment). Every configured [`ProviderConfig`]
//! resolves to one of these; behavior is driven entirely by the input
//! messages so tests can assert on it without network I/O.
//!
//! Convention: if the last user message's text is exactly
//! `call_tool:{name}:{json_args}`, the mock emits a single tool call instead
//! of text content. Everything else is echoed back prefixed with `"mock: "`.

use async_trait::async_trait;
use sa_domain::capability::{LlmCapabilities, ToolSupport};
use sa_domain::config::ProviderConfig;
use sa_domain::error::Result;
use sa_domain::stream::{BoxStream, StreamEvent, Usage};
use sa_domain::tool::{Role, ToolCall};

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

pub struct MockProvider {
    id: String,
    default_model: String,
    capabilities: LlmCapabilities,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_model: "mock-1".into(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: true,
                supports_json_mode: true,
                supports_vision: false,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(4_096),
            },
        }
    }

    pub fn from_config(pc: &ProviderConfig) -> Self {
        let mut provider = Self::new(pc.id.clone());
        if let Some(model) = &pc.default_model {
            provider.default_model = model.clone();
        }
        provider
    }

    fn last_user_text(req: &ChatRequest) -> String {
        req.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.extract_all_text())
            .unwrap_or_default()
    }

    /// Parses the `call_tool:{name}:{json}` convention; returns `None` for
    /// ordinary text turns.
    fn parse_tool_directive(text: &str) -> Option<(String, serde_json::Value)> {
        let rest = text.strip_prefix("call_tool:")?;
        let (name, json) = rest.split_once(':')?;
        let args: serde_json::Value = serde_json::from_str(json).ok()?;
        Some((name.to_string(), args))
    }

    fn respond(&self, req: &ChatRequest) -> ChatResponse {
        let text = Self::last_user_text(req);
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let usage = Some(Usage {
            prompt_tokens: (text.len() as u32 / 4).max(1),
            completion_tokens: 8,
            total_tokens: (text.len() as u32 / 4).max(1) + 8,
        });

        if let Some((name, arguments)) = Self::parse_tool_directive(&text) {
            return ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    call_id: format!("mock-call-{}", req.messages.len()),
                    tool_name: name,
                    arguments,
                }],
                usage,
                model,
                finish_reason: Some("tool_use".into()),
            };
        }

        ChatResponse {
            content: format!("mock: {text}"),
            tool_calls: Vec::new(),
            usage,
            model,
            finish_reason: Some("end_turn".into()),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        Ok(self.respond(&req))
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.respond(&req);
        let stream = async_stream::stream! {
            if response.tool_calls.is_empty() {
                for word in response.content.split_inclusive(' ') {
                    yield Ok(StreamEvent::Token { text: word.to_string() });
                }
            } else {
                for call in response.tool_calls {
                    yield Ok(StreamEvent::ToolCallStarted {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                    });
                    let args_str = call.arguments.to_string();
                    yield Ok(StreamEvent::ToolCallDelta {
                        call_id: call.call_id.clone(),
                        delta: args_str,
                    });
                    yield Ok(StreamEvent::ToolCallFinished {
                        call_id: call.call_id,
                        tool_name: call.tool_name,
                        arguments: call.arguments,
                    });
                }
            }
            yield Ok(StreamEvent::Done {
                usage: response.usage,
                finish_reason: response.finish_reason,
            });
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        // Deterministic pseudo-embedding: each vector is derived from the
        // input text's bytes so identical inputs always produce identical
        // vectors (useful for exercising cache-hit paths in tests).
        let embeddings = req
            .input
            .iter()
            .map(|text| {
                let mut vec = vec![0f32; 8];
                for (i, byte) in text.bytes().enumerate() {
                    vec[i % 8] += byte as f32 / 255.0;
                }
                vec
            })
            .collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::tool::Message;

    fn provider() -> MockProvider {
        MockProvider::new("mock")
    }

    fn req_with_text(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("m1", text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn echoes_plain_text() {
        let resp = provider().chat(req_with_text("hello")).await.unwrap();
        assert_eq!(resp.content, "mock: hello");
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn call_tool_directive_produces_tool_call() {
        let resp = provider()
            .chat(req_with_text(r#"call_tool:write_file:{"path":"a.txt","content":"v1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "write_file");
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let p = provider();
        let a = p
            .embeddings(EmbeddingsRequest {
                input: vec!["same text".into()],
                model: None,
            })
            .await
            .unwrap();
        let b = p
            .embeddings(EmbeddingsRequest {
                input: vec!["same text".into()],
                model: None,
            })
            .await
            .unwrap();
        assert_eq!(a.embeddings, b.embeddings);
    }

    #[tokio::test]
    async fn chat_stream_ends_with_done() {
        use futures_util::StreamExt;
        let mut stream = provider().chat_stream(req_with_text("hi")).await.unwrap();
        let mut last = None;
        while let Some(event) = stream.next().await {
            last = Some(event.unwrap());
        }
        assert!(matches!(last, Some(StreamEvent::Done { .. })));
    }
}
