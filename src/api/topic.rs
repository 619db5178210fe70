use crate::config::TopicLlm;
use crate::types::{Message, Role};
use anyhow::{Context, Result};
use serde_json::json;

const TITLE_MAX_CHARS: usize = 30;
const SUMMARY_MESSAGE_LIMIT: usize = 6;

const TITLE_SYSTEM_PROMPT: &str = "You extract conversation topics. \
Given a conversation, produce one short title of a few words that sums it up, \
for example: headache and fever consult. \
No full sentences, no quotes, no other punctuation.";

/// Produce a display name for a chat from its opening exchange. Any failure
/// (LLM disabled, unreachable, empty answer) falls back to the first message.
pub async fn generate_chat_name(
    http: &reqwest::Client,
    topic: &TopicLlm,
    messages: &[Message],
) -> String {
    if !topic.enabled || topic.base_url.is_empty() || topic.api_key.is_empty() {
        return fallback_name(messages);
    }

    match request_title(http, topic, messages).await {
        Ok(name) if !name.is_empty() => name,
        Ok(_) => fallback_name(messages),
        Err(error) => {
            tracing::error!(%error, "chat title generation failed");
            fallback_name(messages)
        }
    }
}

async fn request_title(
    http: &reqwest::Client,
    topic: &TopicLlm,
    messages: &[Message],
) -> Result<String> {
    let mut summary = String::new();
    for message in messages.iter().take(SUMMARY_MESSAGE_LIMIT) {
        let role = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        summary.push_str(&format!("{role}: {}\n", message.content));
    }

    let url = format!("{}/chat/completions", topic.base_url.trim_end_matches('/'));
    let payload = json!({
        "model": topic.model,
        "messages": [
            { "role": "system", "content": TITLE_SYSTEM_PROMPT },
            { "role": "user", "content": format!("Write a short title for this conversation:\n\n{summary}") },
        ],
        "max_tokens": 50,
        "temperature": 0.7,
    });

    let response = http
        .post(&url)
        .header("authorization", format!("Bearer {}", topic.api_key))
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("title request to '{url}' failed"))?
        .error_for_status()?;

    let body: serde_json::Value = response.json().await?;
    let name = body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .trim();
    Ok(clip_title(trim_quotes(name)))
}

pub fn fallback_name(messages: &[Message]) -> String {
    let first = messages
        .first()
        .map(|message| message.content.as_str())
        .filter(|content| !content.is_empty())
        .unwrap_or("New Chat");

    let clipped = clip_title(first);
    if clipped.chars().count() < first.chars().count() {
        format!("{clipped}...")
    } else {
        clipped
    }
}

fn trim_quotes(name: &str) -> &str {
    name.trim_matches(|c| matches!(c, '"' | '\'' | '「' | '」' | '『' | '』'))
}

fn clip_title(name: &str) -> String {
    name.chars().take(TITLE_MAX_CHARS).collect()
}
