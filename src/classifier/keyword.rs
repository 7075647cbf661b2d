//! Deterministic first-stage classifier.
//!
//! A pure scorer over a mail row: weighted keyword hits plus service and
//! amount extraction. Cheap enough to run on every row; the process
//! runner only escalates to the paid language-model stage when this
//! score clears the escalation threshold.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{BillingCycle, Classification, MailRow};
use crate::providers::mail::{SENDER_PATTERNS, SUBJECT_KEYWORDS};

/// Weight per subscription-keyword hit.
const SUBSCRIPTION_KEYWORD_WEIGHT: f64 = 0.15;
/// Weight per billing-sender hit.
const BILLING_KEYWORD_WEIGHT: f64 = 0.10;
/// Weight for the first matching service pattern.
const SERVICE_PATTERN_WEIGHT: f64 = 0.30;
/// Weight for the first matched amount.
const AMOUNT_WEIGHT: f64 = 0.20;
/// Confidence above which the verdict is positive.
const SUBSCRIPTION_THRESHOLD: f64 = 0.4;

/// Known recurring services, pattern to canonical name.
const SERVICE_PATTERNS: &[(&str, &str)] = &[
    ("netflix", "Netflix"),
    ("spotify", "Spotify"),
    ("hulu", "Hulu"),
    (r"disney\+|disneyplus", "Disney+"),
    (r"amazon prime|prime video", "Amazon Prime"),
    (r"youtube premium|youtube music", "YouTube Premium"),
    (r"apple (?:music|tv|one|arcade)|icloud", "Apple"),
    ("audible", "Audible"),
    ("adobe", "Adobe"),
    ("dropbox", "Dropbox"),
    ("github", "GitHub"),
    ("notion", "Notion"),
    ("slack", "Slack"),
    ("zoom", "Zoom"),
    (r"openai|chatgpt", "OpenAI"),
    ("paramount", "Paramount+"),
    ("crunchyroll", "Crunchyroll"),
    ("linkedin premium", "LinkedIn Premium"),
];

fn service_regexes() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SERVICE_PATTERNS
            .iter()
            .map(|(pattern, name)| (Regex::new(pattern).unwrap(), *name))
            .collect()
    })
}

fn re_amount() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // The comma-grouped branch must come first and require at least
        // one group, so "$1234.56" falls through to the bare branch and
        // matches in full rather than stopping after three digits.
        Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d{2})?|\d+(?:\.\d{2})?)|(\d+(?:\.\d{2})?)\s?usd")
            .unwrap()
    })
}

/// The keyword stage's verdict plus the hits that produced it.
#[derive(Debug, Clone)]
pub struct KeywordVerdict {
    /// The scored classification.
    pub classification: Classification,
    /// Keywords that contributed to the score.
    pub matched_keywords: Vec<&'static str>,
}

impl KeywordVerdict {
    /// Short human-readable account of the score, stored as the row's
    /// reasoning when this stage is final.
    pub fn reasoning(&self) -> String {
        if self.matched_keywords.is_empty() {
            format!(
                "keyword score {:.2}, no subscription signals",
                self.classification.confidence
            )
        } else {
            format!(
                "keyword score {:.2}, matched: {}",
                self.classification.confidence,
                self.matched_keywords.join(", ")
            )
        }
    }
}

/// Scores a mail row without any remote call.
pub fn classify(mail: &MailRow) -> KeywordVerdict {
    let text = mail.searchable_text();
    let sender = mail.sender.to_lowercase();

    let mut score = 0.0;
    let mut matched = Vec::new();

    for keyword in SUBJECT_KEYWORDS {
        if text.contains(keyword) {
            score += SUBSCRIPTION_KEYWORD_WEIGHT;
            matched.push(*keyword);
        }
    }

    for keyword in SENDER_PATTERNS {
        if sender.contains(keyword) {
            score += BILLING_KEYWORD_WEIGHT;
            matched.push(*keyword);
        }
    }

    let service_name = service_regexes()
        .iter()
        .find(|(regex, _)| regex.is_match(&text))
        .map(|(_, name)| {
            score += SERVICE_PATTERN_WEIGHT;
            matched.push(*name);
            name.to_string()
        });

    let amount = extract_amount(&text);
    if amount.is_some() {
        score += AMOUNT_WEIGHT;
    }

    let confidence = score.min(1.0);

    KeywordVerdict {
        classification: Classification {
            is_subscription: confidence > SUBSCRIPTION_THRESHOLD,
            confidence,
            service_name,
            amount,
            currency: Some("USD".to_string()),
            billing_cycle: Some(detect_cycle(&text)),
            next_billing_date: None,
        },
        matched_keywords: matched,
    }
}

/// First USD amount in the text, if any.
fn extract_amount(text: &str) -> Option<f64> {
    re_amount().captures(text).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().replace(',', "").parse().ok())
    })
}

fn detect_cycle(text: &str) -> BillingCycle {
    if text.contains("annual") || text.contains("yearly") || text.contains("per year") {
        BillingCycle::Yearly
    } else if text.contains("weekly") || text.contains("per week") {
        BillingCycle::Weekly
    } else {
        BillingCycle::Monthly
    }
}
