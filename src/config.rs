use crate::auth::{parse_users, User};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_APP_TITLE: &str = "AI Chat";
pub const DEFAULT_TOPIC_MODEL: &str = "gpt-5-mini";
const DEFAULT_USERS: &str = "admin:admin";
const USERS_ENV: &str = "HOOKCHAT_USERS";

/// One selectable webhook endpoint with its Basic-auth credentials.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub webhook_url: String,
    pub auth_user: String,
    pub auth_password: String,
}

/// The OpenAI-compatible endpoint used for chat title generation.
#[derive(Debug, Clone)]
pub struct TopicLlm {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl TopicLlm {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            model: DEFAULT_TOPIC_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Directive for `tracing_subscriber`'s `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub agents: Vec<Agent>,
    pub topic_llm: TopicLlm,
    pub app_title: String,
    pub log_level: LogLevel,
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    agents: Vec<RawAgent>,
    #[serde(default)]
    topic_llm: Option<RawTopicLlm>,
    #[serde(default)]
    app_title: Option<String>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    users: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAgent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    auth_user: Option<String>,
    #[serde(default)]
    auth_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTopicLlm {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file '{}'", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).context("config is not valid TOML")?;

        let agents = raw
            .agents
            .into_iter()
            .enumerate()
            .map(|(index, agent)| Agent {
                id: format!("agent-{index}"),
                name: agent.name.unwrap_or_else(|| format!("Agent {}", index + 1)),
                webhook_url: resolve_env_vars(&agent.webhook_url.unwrap_or_default()),
                auth_user: resolve_env_vars(&agent.auth_user.unwrap_or_default()),
                auth_password: resolve_env_vars(&agent.auth_password.unwrap_or_default()),
            })
            .collect();

        let topic_llm = match raw.topic_llm {
            Some(topic) => TopicLlm {
                enabled: topic.enabled.unwrap_or(true),
                base_url: resolve_env_vars(&topic.base_url.unwrap_or_default()),
                api_key: resolve_env_vars(&topic.api_key.unwrap_or_default()),
                model: topic
                    .model
                    .unwrap_or_else(|| DEFAULT_TOPIC_MODEL.to_string()),
            },
            None => TopicLlm::disabled(),
        };

        let log_level = raw
            .log_level
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or(LogLevel::Info);

        let users_raw = raw
            .users
            .or_else(|| std::env::var(USERS_ENV).ok())
            .unwrap_or_else(|| DEFAULT_USERS.to_string());

        Ok(Self {
            agents,
            topic_llm,
            app_title: raw
                .app_title
                .unwrap_or_else(|| DEFAULT_APP_TITLE.to_string()),
            log_level,
            users: parse_users(&users_raw),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            bail!("no agents configured; add at least one [[agents]] entry");
        }
        for agent in &self.agents {
            if !agent.webhook_url.starts_with("http://")
                && !agent.webhook_url.starts_with("https://")
            {
                bail!(
                    "agent '{}' has invalid webhook_url '{}': expected http:// or https:// URL",
                    agent.name,
                    agent.webhook_url
                );
            }
        }
        Ok(())
    }

    pub fn agent_by_id(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == agent_id)
    }
}

/// Substitute `${VAR}` placeholders from the process environment; unset
/// variables resolve to the empty string, as the original loader did.
fn resolve_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
