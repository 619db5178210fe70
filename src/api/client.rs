use super::aggregate::ByteStream;
use crate::config::Agent;
use crate::error::SendError;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
#[cfg(test)]
use std::sync::Arc;

/// One binary attachment going out with a message (the original client only
/// ever sends images, but the form field is shape-agnostic).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// An agent's reply, reduced to what the aggregator needs: the content-type
/// used for shape resolution and the raw byte stream.
pub struct AgentResponse {
    pub content_type: String,
    pub body: ByteStream,
}

#[cfg(test)]
pub trait MockResponseProducer: Send + Sync {
    fn produce(&self, text: &str, session_id: &str) -> Result<AgentResponse, SendError>;
}

/// Transport boundary to one webhook agent: multipart form POST with Basic
/// credentials, response handed back as a content-typed byte stream.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    #[cfg(test)]
    mock_producer: Option<Arc<dyn MockResponseProducer>>,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            #[cfg(test)]
            mock_producer: None,
        }
    }

    #[cfg(test)]
    pub fn new_mock(producer: Arc<dyn MockResponseProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            mock_producer: Some(producer),
        }
    }

    /// Shared HTTP client, reused by the topic-LLM call.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn send_message(
        &self,
        agent: &Agent,
        text: &str,
        session_id: &str,
        attachments: Vec<Attachment>,
    ) -> Result<AgentResponse, SendError> {
        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_producer {
                return producer.produce(text, session_id);
            }
        }

        let url = agent.webhook_url.clone();
        let mut form = Form::new()
            .text("chatInput", text.to_string())
            .text("sessionId", session_id.to_string());
        for attachment in attachments {
            let part = Part::bytes(attachment.bytes)
                .file_name(attachment.file_name)
                .mime_str(&attachment.mime_type)
                .map_err(|source| SendError::Transport {
                    url: url.clone(),
                    source,
                })?;
            form = form.part("files", part);
        }

        tracing::debug!(%url, message_length = text.len(), "sending message to agent");
        let response = self
            .http
            .post(&url)
            .basic_auth(&agent.auth_user, Some(&agent.auth_password))
            .multipart(form)
            .send()
            .await
            .map_err(|source| SendError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(%url, %status, "agent request rejected");
            return Err(SendError::Http {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::debug!(%status, %content_type, "agent responded");

        let stream_url = url;
        let body = response.bytes_stream().map(move |item| {
            item.map_err(|source| SendError::Transport {
                url: stream_url.clone(),
                source,
            })
        });

        Ok(AgentResponse {
            content_type,
            body: Box::pin(body),
        })
    }
}
