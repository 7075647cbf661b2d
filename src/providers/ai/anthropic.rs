//! Anthropic Claude language-model classifier.
//!
//! Sends one fixed-template prompt per mail row and parses the model's
//! JSON answer into a [`LmVerdict`]. Answers are repaired before being
//! rejected: code fences are stripped, trailing commas trimmed, and
//! unbalanced braces closed. A response that still fails to parse is an
//! [`LmError::InvalidResponse`].

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::content;
use super::traits::{LmError, LmProvider, LmVerdict, Result};
use crate::config::LmSettings;
use crate::domain::{BillingCycle, Classification, MailRow};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// USD per million input tokens.
const INPUT_COST_PER_MTOK: f64 = 0.25;
/// USD per million output tokens.
const OUTPUT_COST_PER_MTOK: f64 = 1.25;

const PROMPT_TEMPLATE: &str = "\
Analyze this email and decide whether it is evidence of a recurring paid subscription \
(streaming service, SaaS plan, membership, or any other recurring charge).

Subject: {subject}
From: {sender}
Date: {date}

Body:
{body}

Respond with ONLY a JSON object, no other text:
{\"is_subscription\": true or false, \"confidence\": number between 0 and 1, \
\"service_name\": string or null, \"amount\": number or null, \
\"currency\": string or null, \
\"billing_cycle\": \"monthly\" or \"yearly\" or \"weekly\" or \"quarterly\" or null, \
\"next_billing_date\": \"YYYY-MM-DD\" or null, \"reasoning\": string}";

/// Computes the charge for one call, rounded to 6 decimal places USD.
pub fn cost_usd(input_tokens: u64, output_tokens: u64) -> f64 {
    let raw = input_tokens as f64 / 1e6 * INPUT_COST_PER_MTOK
        + output_tokens as f64 / 1e6 * OUTPUT_COST_PER_MTOK;
    (raw * 1e6).round() / 1e6
}

/// Anthropic API request format.
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

/// Anthropic API response format.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Anthropic API error response.
#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// The model's JSON answer before validation.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    is_subscription: bool,
    confidence: f64,
    #[serde(default)]
    service_name: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    billing_cycle: Option<String>,
    #[serde(default)]
    next_billing_date: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn re_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
}

fn re_trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap())
}

/// Claude-backed language-model classifier.
pub struct AnthropicLm {
    client: reqwest::Client,
    api_key: String,
    settings: LmSettings,
    api_url: String,
}

impl AnthropicLm {
    /// Creates a classifier with the given API key and call shape.
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, settings: LmSettings) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            settings,
            api_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Overrides the endpoint URL.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers
    }

    fn build_prompt(&self, mail: &MailRow) -> String {
        let body = content::prepare_body(
            &mail.body_text,
            &mail.body_html,
            self.settings.content_truncate_chars,
        );

        PROMPT_TEMPLATE
            .replace("{subject}", mail.subject.as_deref().unwrap_or("(no subject)"))
            .replace("{sender}", &mail.sender)
            .replace("{date}", &mail.received_at.to_rfc3339())
            .replace("{body}", &body)
    }

    async fn call(&self, prompt: &str) -> Result<AnthropicResponse> {
        let body = AnthropicRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .headers(self.build_headers())
            .timeout(self.settings.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LmError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| LmError::InvalidResponse(format!("parse response: {e}")))
    }

    async fn handle_error_response(response: reqwest::Response) -> LmError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return LmError::RateLimited {
                retry_after_secs: retry_after,
            };
        }

        if let Ok(error) = response.json::<AnthropicError>().await {
            if status == 401 || error.error.error_type == "authentication_error" {
                return LmError::Authentication(error.error.message);
            }
            return LmError::Api {
                status,
                message: error.error.message,
            };
        }

        LmError::Api {
            status,
            message: format!("HTTP {status}"),
        }
    }

    /// Strips markdown code-fence markers around the answer.
    fn strip_code_fences(text: &str) -> &str {
        let text = text.trim();
        let text = text
            .strip_prefix("```json")
            .or_else(|| text.strip_prefix("```"))
            .unwrap_or(text);
        text.strip_suffix("```").unwrap_or(text).trim()
    }

    /// Minimal repair pass: trim trailing commas and close unbalanced
    /// braces.
    fn repair_json(text: &str) -> String {
        let mut repaired = re_trailing_comma().replace_all(text, "$1").into_owned();

        let open = repaired.matches('{').count();
        let close = repaired.matches('}').count();
        for _ in close..open {
            repaired.push('}');
        }
        repaired
    }

    fn parse_verdict(response: AnthropicResponse) -> Result<LmVerdict> {
        let text = response
            .content
            .iter()
            .find(|c| c.content_type == "text")
            .and_then(|c| c.text.as_deref())
            .ok_or_else(|| LmError::InvalidResponse("no text content".to_string()))?;

        let candidate = Self::strip_code_fences(text);

        let raw: RawVerdict = match serde_json::from_str(candidate) {
            Ok(raw) => raw,
            Err(_) => {
                let repaired = Self::repair_json(candidate);
                serde_json::from_str(&repaired)
                    .map_err(|e| LmError::InvalidResponse(format!("unparseable answer: {e}")))?
            }
        };

        let next_billing_date = raw
            .next_billing_date
            .as_deref()
            .filter(|d| re_date().is_match(d))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

        let classification = Classification {
            is_subscription: raw.is_subscription,
            confidence: raw.confidence.clamp(0.0, 1.0),
            service_name: raw.service_name.filter(|s| !s.is_empty()),
            amount: raw.amount,
            currency: raw.currency,
            billing_cycle: raw.billing_cycle.as_deref().and_then(BillingCycle::parse),
            next_billing_date,
        };

        Ok(LmVerdict {
            classification,
            reasoning: raw.reasoning.unwrap_or_default(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cost: cost_usd(response.usage.input_tokens, response.usage.output_tokens),
        })
    }
}

impl AnthropicLm {
    /// Backoff before retrying `err`, or `None` when it is terminal.
    ///
    /// Each retriable status has its own delay: rate limits clear fast,
    /// server errors slower, overload slowest.
    fn retry_delay(&self, err: &LmError) -> Option<std::time::Duration> {
        let index = match err {
            LmError::RateLimited { .. } => 0,
            LmError::Api { status: 500, .. } => 1,
            LmError::Api { status: 503, .. } => 2,
            _ => return None,
        };
        self.settings.retry_delays.get(index).copied()
    }
}

#[async_trait]
impl LmProvider for AnthropicLm {
    async fn classify(&self, mail: &MailRow) -> Result<LmVerdict> {
        let prompt = self.build_prompt(mail);

        const MAX_ATTEMPTS: usize = 3;
        let mut attempt = 1usize;
        loop {
            match self.call(&prompt).await {
                Ok(response) => return Self::parse_verdict(response),
                Err(err) => {
                    let delay = match self.retry_delay(&err) {
                        Some(delay) if attempt < MAX_ATTEMPTS => delay,
                        _ => return Err(err),
                    };
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "language-model call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, MailId};
    use chrono::Utc;

    fn mail(subject: &str, body_text: &str, body_html: &str) -> MailRow {
        MailRow {
            id: MailId::from("mail-1"),
            account_id: AccountId::from("acct-1"),
            message_id: "m1".to_string(),
            subject: Some(subject.to_string()),
            sender: "billing@netflix.com".to_string(),
            body_text: body_text.to_string(),
            body_html: body_html.to_string(),
            received_at: Utc::now(),
            processed_at: None,
            is_subscription: false,
            subscription_confidence: 0.0,
            extracted_data: None,
            ai_provider: None,
            ai_reasoning: None,
            analysis_attempts: 0,
        }
    }

    fn provider() -> AnthropicLm {
        AnthropicLm::new(reqwest::Client::new(), "sk-test", LmSettings::default())
    }

    fn response(text: &str, input: u64, output: u64) -> AnthropicResponse {
        AnthropicResponse {
            content: vec![AnthropicContent {
                content_type: "text".to_string(),
                text: Some(text.to_string()),
            }],
            usage: AnthropicUsage {
                input_tokens: input,
                output_tokens: output,
            },
        }
    }

    #[test]
    fn cost_matches_pricing_and_rounds_to_6_places() {
        assert_eq!(cost_usd(1_000_000, 0), 0.25);
        assert_eq!(cost_usd(0, 1_000_000), 1.25);
        assert_eq!(cost_usd(1000, 200), 0.0005);
        // 123 in + 57 out: 123 * 2.5e-7 + 57 * 1.25e-6 = 0.000102
        assert_eq!(cost_usd(123, 57), 0.000102);
    }

    #[test]
    fn prompt_substitutes_all_placeholders() {
        let provider = provider();
        let prompt = provider.build_prompt(&mail("Your receipt", "the body", ""));

        assert!(prompt.contains("Subject: Your receipt"));
        assert!(prompt.contains("From: billing@netflix.com"));
        assert!(prompt.contains("the body"));
        assert!(!prompt.contains("{subject}"));
        assert!(!prompt.contains("{body}"));
    }

    #[test]
    fn prompt_uses_stripped_html_when_no_text() {
        let provider = provider();
        let prompt = provider.build_prompt(&mail("S", "", "<p>html only</p>"));
        assert!(prompt.contains("html only"));
        assert!(!prompt.contains("<p>"));
    }

    #[test]
    fn parses_clean_answer() {
        let text = r#"{"is_subscription": true, "confidence": 0.98, "service_name": "Netflix",
            "amount": 15.99, "currency": "USD", "billing_cycle": "monthly",
            "next_billing_date": "2025-09-01", "reasoning": "monthly receipt"}"#;
        let verdict = AnthropicLm::parse_verdict(response(text, 500, 60)).unwrap();

        assert!(verdict.classification.is_subscription);
        assert_eq!(verdict.classification.confidence, 0.98);
        assert_eq!(verdict.classification.service_name.as_deref(), Some("Netflix"));
        assert_eq!(verdict.classification.amount, Some(15.99));
        assert_eq!(
            verdict.classification.billing_cycle,
            Some(BillingCycle::Monthly)
        );
        assert_eq!(
            verdict.classification.next_billing_date,
            NaiveDate::from_ymd_opt(2025, 9, 1)
        );
        assert_eq!(verdict.reasoning, "monthly receipt");
        assert_eq!(verdict.input_tokens, 500);
        assert_eq!(verdict.output_tokens, 60);
        assert_eq!(verdict.cost, cost_usd(500, 60));
    }

    #[test]
    fn strips_code_fences() {
        let text = "```json\n{\"is_subscription\": false, \"confidence\": 0.1}\n```";
        let verdict = AnthropicLm::parse_verdict(response(text, 10, 5)).unwrap();
        assert!(!verdict.classification.is_subscription);
    }

    #[test]
    fn repairs_trailing_comma() {
        let text = r#"{"is_subscription": true, "confidence": 0.9,}"#;
        let verdict = AnthropicLm::parse_verdict(response(text, 10, 5)).unwrap();
        assert!(verdict.classification.is_subscription);
    }

    #[test]
    fn repairs_missing_closing_brace() {
        let text = r#"{"is_subscription": true, "confidence": 0.9, "reasoning": "cut off""#;
        let verdict = AnthropicLm::parse_verdict(response(text, 10, 5)).unwrap();
        assert!(verdict.classification.is_subscription);
        assert_eq!(verdict.reasoning, "cut off");
    }

    #[test]
    fn unrepairable_answer_fails() {
        let result = AnthropicLm::parse_verdict(response("not json at all", 10, 5));
        assert!(matches!(result, Err(LmError::InvalidResponse(_))));
    }

    #[test]
    fn confidence_is_clamped() {
        let text = r#"{"is_subscription": true, "confidence": 1.7}"#;
        let verdict = AnthropicLm::parse_verdict(response(text, 10, 5)).unwrap();
        assert_eq!(verdict.classification.confidence, 1.0);
    }

    #[test]
    fn malformed_billing_date_is_dropped() {
        let text = r#"{"is_subscription": true, "confidence": 0.9,
            "next_billing_date": "September 1st"}"#;
        let verdict = AnthropicLm::parse_verdict(response(text, 10, 5)).unwrap();
        assert!(verdict.classification.next_billing_date.is_none());
    }

    #[test]
    fn retry_delay_maps_status_to_schedule() {
        let provider = provider();
        assert_eq!(
            provider.retry_delay(&LmError::RateLimited {
                retry_after_secs: None
            }),
            Some(std::time::Duration::from_secs(10))
        );
        assert_eq!(
            provider.retry_delay(&LmError::Api {
                status: 500,
                message: String::new()
            }),
            Some(std::time::Duration::from_secs(30))
        );
        assert_eq!(
            provider.retry_delay(&LmError::Api {
                status: 503,
                message: String::new()
            }),
            Some(std::time::Duration::from_secs(90))
        );
        assert_eq!(
            provider.retry_delay(&LmError::Authentication("bad".to_string())),
            None
        );
    }

    #[test]
    fn unknown_billing_cycle_is_dropped() {
        let text = r#"{"is_subscription": true, "confidence": 0.9, "billing_cycle": "daily"}"#;
        let verdict = AnthropicLm::parse_verdict(response(text, 10, 5)).unwrap();
        assert!(verdict.classification.billing_cycle.is_none());
    }
}
