//! OpenRouter chat completions for contextual and translated announcements.
//!
//! Every call is optional: failures are logged and the caller falls back to
//! the static description.

use cc_hooks_core::config::OpenRouterConfig;
use cc_hooks_protocol::HookEventKind;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::transcript::ConversationContext;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TOKENS: u32 = 50;
const TEMPERATURE: f32 = 0.3;
const REFERER: &str = "https://github.com/cc-hooks/cc-hooks";
const TITLE: &str = "Claude Code Hooks";

const ASSISTANT_BACKGROUND: &str = "Claude Code is an AI coding assistant working in a \
terminal. It runs tools such as Bash, Read, Write, Edit and Grep. A session is one \
conversation with the user. Subagents handle delegated sub-tasks. Hook events: \
SessionStart (session begins or resumes), SessionEnd (session closes), PreToolUse and \
PostToolUse (around a tool call), Notification (needs the user's attention), Stop (task \
finished), SubagentStop (sub-task finished), UserPromptSubmit (user sent input), \
PreCompact (conversation history is about to be compacted).";

const TRANSLATION_PROMPT: &str = "You translate short spoken status messages for an AI \
coding assistant. Use the event details to make the text specific, for example naming \
the tool that is running. Reply with the translated text only.";

const COMPLETION_PROMPT: &str = "You are the assistant. Given the last exchange with the \
user, say in one short sentence (at most 12 words) what you just did. Reword rather than \
repeat. Plain text only: no emojis, symbols, backticks or commas after names.";

const PRE_TOOL_PROMPT: &str = "You are the assistant about to run a tool. Given the \
user's request, say in one short sentence (at most 12 words) what you are about to do. \
Focus on the request, not the tool name. Plain text only: no emojis, symbols or \
backticks.";

pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    contextual_stop: bool,
    contextual_pretooluse: bool,
}

impl OpenRouterClient {
    /// `None` unless OpenRouter is enabled and has an API key.
    pub fn from_config(config: &OpenRouterConfig) -> Option<Self> {
        if !config.is_usable() {
            return None;
        }
        let client = match Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "Failed to build OpenRouter client");
                return None;
            }
        };
        Some(Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            contextual_stop: config.contextual_stop,
            contextual_pretooluse: config.contextual_pretooluse,
        })
    }

    pub fn contextual_stop(&self) -> bool {
        self.contextual_stop
    }

    pub fn contextual_pretooluse(&self) -> bool {
        self.contextual_pretooluse
    }

    pub async fn translate(
        &self,
        text: &str,
        language: &str,
        kind: &HookEventKind,
        data: &Value,
    ) -> Option<String> {
        let user = format!(
            "Event: {}\nEvent data: {}\nTranslate from 'en' to '{}' (ISO 639 code):\n\"{}\"",
            kind,
            compact_event_data(data),
            language,
            text
        );
        self.complete(&format!("{}\n\n{}", TRANSLATION_PROMPT, ASSISTANT_BACKGROUND), &user)
            .await
    }

    pub async fn completion_message(
        &self,
        context: &ConversationContext,
        language: &str,
    ) -> Option<String> {
        let user = conversation_prompt(language, None, context);
        self.complete(COMPLETION_PROMPT, &user).await
    }

    pub async fn pre_tool_message(
        &self,
        tool_name: &str,
        context: &ConversationContext,
        language: &str,
    ) -> Option<String> {
        let user = conversation_prompt(language, Some(tool_name), context);
        self.complete(PRE_TOOL_PROMPT, &user).await
    }

    async fn complete(&self, system: &str, user: &str) -> Option<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = match self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "OpenRouter request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "OpenRouter returned an error status");
            return None;
        }
        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "Failed to decode OpenRouter response");
                return None;
            }
        };

        let reply = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(clean_reply)
            .filter(|text| !text.is_empty());
        debug!(reply = ?reply, "OpenRouter reply");
        reply
    }
}

fn conversation_prompt(
    language: &str,
    tool_name: Option<&str>,
    context: &ConversationContext,
) -> String {
    let mut lines = vec![format!("Respond in language '{}' (ISO 639 code).", language)];
    if let Some(tool) = tool_name {
        lines.push(format!("Tool about to run: {}", tool));
    }
    lines.push("Conversation:".to_string());
    if let Some(prompt) = &context.last_user_prompt {
        lines.push(format!("User: {}", prompt));
    }
    if let Some(reply) = &context.last_assistant_text {
        lines.push(format!("Assistant: {}", reply));
    }
    if !context.has_context() {
        lines.push("(no conversation available)".to_string());
    }
    lines.join("\n")
}

/// Event data minus bulky fields that say nothing about the announcement.
fn compact_event_data(data: &Value) -> String {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        for field in ["transcript_path", "tool_response", "cwd"] {
            map.remove(field);
        }
    }
    data.to_string()
}

fn clean_reply(text: &str) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}
