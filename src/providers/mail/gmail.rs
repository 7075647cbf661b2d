//! Gmail API mailbox implementation.
//!
//! Implements [`MailProvider`] against the Gmail REST API:
//! `users.messages.list` for paginated ID listing under a filter and
//! `users.messages.get` for full payloads. The caller supplies a bearer
//! per call; this type holds no credentials.
//!
//! Normalisation applied before a message is handed to the sync runner:
//! headers are read case-insensitively, the sender is the bracketed
//! address when present, bodies come from a recursive MIME walk that
//! prefers `text/plain`, body data is URL-safe-base64 decoded (decode
//! failures yield empty strings, never a failed message), and the receive
//! instant is the provider's internal millisecond timestamp.

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use super::{MailProvider, MessagePage, ProviderError, Result};
use crate::domain::FetchedMessage;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<MessageRef>>,
    next_page_token: Option<String>,
    #[allow(dead_code)]
    result_size_estimate: Option<u32>,
}

/// Gmail API message reference (ID only).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[allow(dead_code)]
    thread_id: Option<String>,
}

/// Gmail API full message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    payload: Option<GmailPayload>,
    internal_date: Option<String>,
}

/// Gmail message payload (headers and body parts).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPayload {
    headers: Option<Vec<GmailHeader>>,
    parts: Option<Vec<GmailPart>>,
    body: Option<GmailBody>,
    mime_type: Option<String>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message part (for multipart messages).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailBody {
    data: Option<String>,
    #[allow(dead_code)]
    size: Option<u32>,
}

/// Gmail REST mailbox.
pub struct GmailMailbox {
    client: reqwest::Client,
    base_url: String,
}

impl GmailMailbox {
    /// Creates a mailbox against the production Gmail API.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: GMAIL_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn auth_headers(bearer: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {bearer}"))
                .map_err(|e| ProviderError::Internal(format!("invalid header: {e}")))?,
        );
        Ok(headers)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        bearer: &str,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .headers(Self::auth_headers(bearer)?)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse response: {e}")))
    }

    async fn handle_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => ProviderError::Authentication(format!("unauthorized: {body}")),
            404 => ProviderError::NotFound(body),
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after,
            },
            _ => ProviderError::Internal(format!("API error ({status}): {body}")),
        }
    }

    /// Reads a header value case-insensitively.
    fn header_value(headers: Option<&Vec<GmailHeader>>, name: &str) -> Option<String> {
        headers.and_then(|h| {
            h.iter()
                .find(|hdr| hdr.name.eq_ignore_ascii_case(name))
                .map(|hdr| hdr.value.clone())
        })
    }

    /// Extracts the bare address from a From value like `Name <a@b.com>`.
    fn parse_sender(value: &str) -> String {
        let value = value.trim();
        if let Some(start) = value.find('<') {
            if let Some(end) = value.find('>') {
                if end > start {
                    return value[start + 1..end].trim().to_string();
                }
            }
        }
        value.to_string()
    }

    fn decode_body(data: &str) -> String {
        BASE64_URL_SAFE_NO_PAD
            .decode(data)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }

    /// Walks the MIME tree collecting the first text/plain and text/html
    /// bodies.
    fn extract_bodies(payload: &GmailPayload) -> (String, String) {
        let mut text = String::new();
        let mut html = String::new();

        if let Some(body) = &payload.body {
            if let Some(data) = &body.data {
                let decoded = Self::decode_body(data);
                match payload.mime_type.as_deref() {
                    Some("text/html") => html = decoded,
                    _ => text = decoded,
                }
            }
        }

        if let Some(parts) = &payload.parts {
            Self::extract_from_parts(parts, &mut text, &mut html);
        }

        (text, html)
    }

    fn extract_from_parts(parts: &[GmailPart], text: &mut String, html: &mut String) {
        for part in parts {
            let mime = part.mime_type.as_deref().unwrap_or("");

            if mime == "text/plain" && text.is_empty() {
                if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                    *text = Self::decode_body(data);
                }
            } else if mime == "text/html" && html.is_empty() {
                if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                    *html = Self::decode_body(data);
                }
            }

            if let Some(nested) = &part.parts {
                Self::extract_from_parts(nested, text, html);
            }
        }
    }

    /// Normalises a Gmail message into the pipeline's fetched form.
    fn normalise(message: GmailMessage) -> FetchedMessage {
        let payload = message.payload.as_ref();
        let headers = payload.and_then(|p| p.headers.as_ref());

        let subject = Self::header_value(headers, "Subject");
        let sender = Self::header_value(headers, "From")
            .map(|v| Self::parse_sender(&v))
            .unwrap_or_default();

        let received_at = message
            .internal_date
            .as_deref()
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let (body_text, body_html) = payload
            .map(Self::extract_bodies)
            .unwrap_or((String::new(), String::new()));

        FetchedMessage {
            message_id: message.id,
            subject,
            sender,
            body_text,
            body_html,
            received_at,
        }
    }
}

#[async_trait]
impl MailProvider for GmailMailbox {
    async fn list_page(
        &self,
        bearer: &str,
        filter: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let page_size = page_size.to_string();
        let mut params = vec![("q", filter), ("maxResults", page_size.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: MessageListResponse = self.get(bearer, "/messages", &params).await?;

        Ok(MessagePage {
            ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.id)
                .collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn fetch_message(&self, bearer: &str, message_id: &str) -> Result<FetchedMessage> {
        let endpoint = format!("/messages/{message_id}");
        let message: GmailMessage = self
            .get(bearer, &endpoint, &[("format", "full")])
            .await?;
        Ok(Self::normalise(message))
    }
}
