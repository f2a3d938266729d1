use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat client used for both free-text generation and
/// structured emotion classification.
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            api_url,
            api_key: api_key.unwrap_or_default(),
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Generate a completion using the OpenAI API format.
    pub async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        self.generate_with_timeout(messages, None).await
    }

    /// Generate a completion with a per-call request timeout. A timeout is
    /// treated by callers exactly like any other collaborator failure.
    pub async fn generate_with_timeout(
        &self,
        messages: Vec<ChatMessage>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(2000),
        };

        let mut req = self.client.post(&url).json(&request);

        // Add API key header if provided (not needed for local models)
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        // Check for HTTP errors and include response body for debugging
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?;

        Ok(content)
    }

    /// Generate a structured JSON response using the LLM. The raw text is
    /// run through [`extract_json`] before deserialization so markdown fences
    /// and reasoning preambles don't break parsing.
    pub async fn generate_json<T>(
        &self,
        messages: Vec<ChatMessage>,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.generate_with_timeout(messages, timeout).await?;
        parse_json_response(&response)
    }
}

/// Deserialize a model reply that should contain a JSON object, tolerating
/// markdown code fences, `<think>` preambles and surrounding prose.
pub fn parse_json_response<T>(response: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(response) {
        return Ok(parsed);
    }

    let extracted = extract_json(response);
    serde_json::from_str::<T>(extracted).context(format!(
        "Failed to parse JSON response. Extracted: {} | Original: {}",
        extracted,
        response.chars().take(500).collect::<String>()
    ))
}

fn extract_json(response: &str) -> &str {
    let cleaned = if let Some(think_end) = response.rfind("</think>") {
        &response[think_end + 8..]
    } else {
        response
    };

    if let Some(start) = cleaned.find("```json") {
        let after_start = &cleaned[start + 7..];
        if let Some(end) = after_start.find("```") {
            return after_start[..end].trim();
        }
    }
    if let Some(start) = cleaned.find('{') {
        if let Some(end) = cleaned.rfind('}') {
            if end > start {
                return &cleaned[start..=end];
            }
        }
    }
    cleaned.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        value: i64,
    }

    #[test]
    fn parses_bare_json() {
        let probe: Probe = parse_json_response("{\"value\": 3}").unwrap();
        assert_eq!(probe, Probe { value: 3 });
    }

    #[test]
    fn parses_json_inside_markdown_fence() {
        let raw = "Here you go:\n```json\n{\"value\": 7}\n```\nanything else?";
        let probe: Probe = parse_json_response(raw).unwrap();
        assert_eq!(probe, Probe { value: 7 });
    }

    #[test]
    fn parses_json_after_think_block() {
        let raw = "<think>deliberating...</think>\n{\"value\": 1}";
        let probe: Probe = parse_json_response(raw).unwrap();
        assert_eq!(probe, Probe { value: 1 });
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let raw = "Sure! The answer is {\"value\": 9} as requested.";
        let probe: Probe = parse_json_response(raw).unwrap();
        assert_eq!(probe, Probe { value: 9 });
    }

    #[test]
    fn malformed_body_is_an_error() {
        let result: Result<Probe> = parse_json_response("no json here at all");
        assert!(result.is_err());
    }
}
