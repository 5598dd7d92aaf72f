//! Answer generation against a model-invocation endpoint.
//!
//! A chatbot profile names a model by registry key; the registry maps it to
//! a provider model id and a response-shape family. The two families differ
//! in both request and response payloads:
//!
//! - [`ModelFamily::Chat`] — messages array in, `content[0].text` out.
//! - [`ModelFamily::Completion`] — bare prompt in, `generation` out.
//!
//! Dispatch is on the registry tag, never on sniffing the response. An
//! unknown key falls back to the configured default model so a stale profile
//! cannot break a live widget.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::ChatbotProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Chat,
    Completion,
}

/// One entry in the model registry.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Registry key used in chatbot profiles.
    pub key: &'static str,
    /// Provider-side model identifier.
    pub model_id: &'static str,
    pub family: ModelFamily,
    /// Used when a profile does not set its own max_tokens.
    pub default_max_tokens: u32,
}

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        key: "claude-3-5-haiku",
        model_id: "us.anthropic.claude-3-5-haiku-20241022-v1:0",
        family: ModelFamily::Chat,
        default_max_tokens: 8000,
    },
    ModelSpec {
        key: "llama-3-8b",
        model_id: "meta.llama3-8b-instruct-v1:0",
        family: ModelFamily::Completion,
        default_max_tokens: 2048,
    },
];

pub fn resolve_model(key: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.key == key)
}

/// Build the grounded prompt: system instructions, then a delimited
/// knowledge-base section when any context was retrieved, then the user's
/// message with a trailing assistant cue.
pub fn assemble_prompt(system_prompt: &str, context_chunks: &[String], user_message: &str) -> String {
    if context_chunks.is_empty() {
        format!("{}\n\nUser: {}\n\nAssistant:", system_prompt, user_message)
    } else {
        format!(
            "{}\n\nContext from knowledge base:\n{}\n\nUser: {}\n\nAssistant:",
            system_prompt,
            context_chunks.join("\n\n"),
            user_message
        )
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce an answer for `user_message` grounded in `context_chunks`,
    /// using the profile's model and sampling settings.
    async fn generate(
        &self,
        profile: &ChatbotProfile,
        context_chunks: &[String],
        user_message: &str,
    ) -> Result<String, GenerationError>;
}

/// HTTP generator against a Bedrock-style invocation endpoint
/// (`POST {url}/model/{model_id}/invoke`).
pub struct HttpGenerator {
    url: String,
    default_model: String,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
            client,
        })
    }

    fn spec_for(&self, profile_model: &str) -> &'static ModelSpec {
        resolve_model(profile_model)
            .or_else(|| resolve_model(&self.default_model))
            .unwrap_or(&MODELS[0])
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        profile: &ChatbotProfile,
        context_chunks: &[String],
        user_message: &str,
    ) -> Result<String, GenerationError> {
        let spec = self.spec_for(&profile.model);
        let prompt = assemble_prompt(&profile.system_prompt, context_chunks, user_message);
        let max_tokens = if profile.max_tokens > 0 {
            profile.max_tokens
        } else {
            spec.default_max_tokens
        };
        let body = build_request(spec.family, &prompt, profile.temperature, max_tokens);

        let resp = self
            .client
            .post(format!("{}/model/{}/invoke", self.url, spec.model_id))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(GenerationError(format!(
                "model invocation error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GenerationError(e.to_string()))?;
        parse_response(spec.family, &json)
    }
}

/// Request payload for one model family.
pub fn build_request(
    family: ModelFamily,
    prompt: &str,
    temperature: f64,
    max_tokens: u32,
) -> serde_json::Value {
    match family {
        ModelFamily::Chat => serde_json::json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        }),
        ModelFamily::Completion => serde_json::json!({
            "prompt": prompt,
            "max_gen_len": max_tokens,
            "temperature": temperature,
        }),
    }
}

/// Parse the completion text for one model family. An empty or missing
/// completion is a [`GenerationError`], not an empty answer.
pub fn parse_response(
    family: ModelFamily,
    json: &serde_json::Value,
) -> Result<String, GenerationError> {
    let text = match family {
        ModelFamily::Chat => json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|item| item.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| GenerationError("malformed completion: missing content[0].text".into()))?,
        ModelFamily::Completion => json
            .get("generation")
            .and_then(|g| g.as_str())
            .ok_or_else(|| GenerationError("malformed completion: missing generation".into()))?,
    };

    if text.trim().is_empty() {
        return Err(GenerationError("empty completion".into()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tags_families_correctly() {
        let claude = resolve_model("claude-3-5-haiku").unwrap();
        assert_eq!(claude.family, ModelFamily::Chat);
        assert!(claude.model_id.contains("anthropic"));

        let llama = resolve_model("llama-3-8b").unwrap();
        assert_eq!(llama.family, ModelFamily::Completion);

        assert!(resolve_model("gpt-nonexistent").is_none());
    }

    #[test]
    fn prompt_without_context_has_no_context_section() {
        let p = assemble_prompt("You are helpful.", &[], "Hi there");
        assert!(p.starts_with("You are helpful."));
        assert!(!p.contains("Context from knowledge base:"));
        assert!(p.contains("User: Hi there"));
        assert!(p.ends_with("Assistant:"));
    }

    #[test]
    fn prompt_places_context_between_system_and_user() {
        let chunks = vec!["Refunds take five days.".to_string(), "Chat is 24/7.".to_string()];
        let p = assemble_prompt("You are helpful.", &chunks, "How long do refunds take?");

        let ctx_pos = p.find("Context from knowledge base:").unwrap();
        let sys_pos = p.find("You are helpful.").unwrap();
        let user_pos = p.find("User: How long do refunds take?").unwrap();
        assert!(sys_pos < ctx_pos && ctx_pos < user_pos);
        assert!(p.contains("Refunds take five days.\n\nChat is 24/7."));
    }

    #[test]
    fn chat_request_carries_messages_and_params() {
        let body = build_request(ModelFamily::Chat, "prompt text", 0.4, 512);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "prompt text");
        assert_eq!(body["max_tokens"], 512);
        assert!((body["temperature"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn completion_request_carries_prompt_and_params() {
        let body = build_request(ModelFamily::Completion, "prompt text", 0.9, 256);
        assert_eq!(body["prompt"], "prompt text");
        assert_eq!(body["max_gen_len"], 256);
    }

    #[test]
    fn parses_chat_family_response() {
        let json = serde_json::json!({"content": [{"text": "the answer"}]});
        assert_eq!(parse_response(ModelFamily::Chat, &json).unwrap(), "the answer");
    }

    #[test]
    fn parses_completion_family_response() {
        let json = serde_json::json!({"generation": "the answer"});
        assert_eq!(
            parse_response(ModelFamily::Completion, &json).unwrap(),
            "the answer"
        );
    }

    #[test]
    fn family_shapes_are_not_interchangeable() {
        let chat_shape = serde_json::json!({"content": [{"text": "x"}]});
        assert!(parse_response(ModelFamily::Completion, &chat_shape).is_err());

        let completion_shape = serde_json::json!({"generation": "x"});
        assert!(parse_response(ModelFamily::Chat, &completion_shape).is_err());
    }

    #[test]
    fn empty_completion_is_an_error() {
        let json = serde_json::json!({"generation": "   "});
        assert!(parse_response(ModelFamily::Completion, &json).is_err());
    }
}
