//! Shared classifier verdict type.
//!
//! Both classifier stages produce a [`Classification`]; the process runner
//! persists it onto the mail row and, when the verdict names a service and
//! an amount, materialises it as a subscription.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::BillingCycle;

/// A classifier's verdict on one mail row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Whether the message evidences a recurring subscription.
    pub is_subscription: bool,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Service being paid for, when extractable.
    pub service_name: Option<String>,
    /// Charge amount, when extractable.
    pub amount: Option<f64>,
    /// ISO 4217 currency code.
    pub currency: Option<String>,
    /// Charge cadence.
    pub billing_cycle: Option<BillingCycle>,
    /// Next expected charge date, when the message stated one.
    pub next_billing_date: Option<NaiveDate>,
}

impl Classification {
    /// A confident "not a subscription" verdict.
    pub fn negative() -> Self {
        Self {
            is_subscription: false,
            confidence: 0.0,
            service_name: None,
            amount: None,
            currency: None,
            billing_cycle: None,
            next_billing_date: None,
        }
    }

    /// Whether the verdict carries enough fields to materialise a
    /// subscription row.
    pub fn has_subscription_fields(&self) -> bool {
        self.is_subscription && self.service_name.is_some() && self.amount.is_some()
    }
}
