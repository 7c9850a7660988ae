//! OnePay Redirect Enforcement
//!
//! Client-side adapter that drives the externally loaded OnePay checkout
//! widget and forces it to finish through a full-page navigation instead of
//! its own popup, iframe or modal.
//!
//! ## Features
//! - Readiness polling for the widget entry point
//! - Reversible interception of popup, frame, modal and DOM primitives
//! - Outcome delivery from the widget's success/failure signals
//! - Bounded restoration of every overridden primitive
//! - Callback receiver service for the gateway's post-payment navigation

pub mod browser;
pub mod callback;
pub mod config;
pub mod domain;
pub mod redirect;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use validator::{Validate, ValidationError};

pub use browser::WidgetError;
pub use config::{ConfigError, RedirectConfig};
pub use domain::aggregates::SessionError;
pub use domain::value_objects::{CallbackUrl, GatewayPolicy, PolicyError};
pub use redirect::{OutcomeBridge, OverrideRegistry, PaymentSessionInitiator, ReadinessMonitor, ScriptReadinessState};

// =============================================================================
// Core Types
// =============================================================================

/// Merchant credentials issued by OnePay.
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentCredentials {
    app_id: String,
    hash_token: String,
    app_token: String,
}

impl PaymentCredentials {
    /// Builds credentials from optional parts; blank values count as missing.
    pub fn from_parts(app_id: Option<String>, hash_token: Option<String>, app_token: Option<String>) -> Result<Self> {
        Ok(Self {
            app_id: required(app_id, "ONEPAY_APP_ID")?,
            hash_token: required(hash_token, "ONEPAY_HASH_TOKEN")?,
            app_token: required(app_token, "ONEPAY_APP_TOKEN")?,
        })
    }

    pub fn app_id(&self) -> &str { &self.app_id }
    pub fn hash_token(&self) -> &str { &self.hash_token }
    pub fn app_token(&self) -> &str { &self.app_token }
}

fn required(value: Option<String>, name: &'static str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(RedirectError::MissingCredential(name))
}

impl fmt::Debug for PaymentCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentCredentials")
            .field("app_id", &self.app_id)
            .field("hash_token", &"<redacted>")
            .field("app_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
}

/// One checkout attempt. Validated on construction and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Validate)]
pub struct PaymentSessionRequest {
    #[validate(custom = "positive_amount")]
    amount: Decimal,
    #[validate(length(min = 1))]
    currency: String,
    #[validate(length(min = 1))]
    order_reference: String,
    customer: Customer,
    additional_data: Option<String>,
}

fn positive_amount(amount: &Decimal) -> std::result::Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() { Ok(()) } else { Err(ValidationError::new("positive_amount")) }
}

impl PaymentSessionRequest {
    pub fn new(amount: Decimal, currency: &str, order_reference: &str, customer: Customer) -> Result<Self> {
        let request = Self {
            amount,
            currency: currency.trim().to_uppercase(),
            order_reference: order_reference.trim().to_string(),
            customer,
            additional_data: None,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_additional_data(mut self, data: impl Into<String>) -> Self {
        self.additional_data = Some(data.into());
        self
    }

    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn order_reference(&self) -> &str { &self.order_reference }
    pub fn customer(&self) -> &Customer { &self.customer }
    pub fn additional_data(&self) -> Option<&str> { self.additional_data.as_deref() }
}

/// The object the widget entry point reads from its well-known global slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalPaymentPayload {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub app_id: String,
    pub hash_token: String,
    pub app_token: String,
    pub order_reference: String,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_email: String,
    pub customer_phone_number: String,
    pub transaction_redirect_url: String,
    pub additional_data: String,
}

impl GlobalPaymentPayload {
    pub fn assemble(request: &PaymentSessionRequest, credentials: &PaymentCredentials, callback: &CallbackUrl) -> Self {
        let customer = request.customer();
        Self {
            amount: request.amount(),
            currency: request.currency().to_string(),
            app_id: credentials.app_id().to_string(),
            hash_token: credentials.hash_token().to_string(),
            app_token: credentials.app_token().to_string(),
            order_reference: request.order_reference().to_string(),
            customer_first_name: customer.first_name.clone(),
            customer_last_name: customer.last_name.clone(),
            customer_email: customer.email.clone(),
            customer_phone_number: customer.phone_number.clone(),
            transaction_redirect_url: callback.as_str().to_string(),
            additional_data: request.additional_data().unwrap_or_default().to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    #[serde(rename = "201")]
    Completed,
    #[serde(rename = "400")]
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAIL")]
    Fail,
}

/// Transaction outcome carried by the widget's result signals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub code: ResultCode,
    pub transaction_id: String,
    pub status: TransactionStatus,
}

impl PaymentResult {
    pub fn new(transaction_id: impl Into<String>, success: bool) -> Self {
        let (code, status) = if success {
            (ResultCode::Completed, TransactionStatus::Success)
        } else {
            (ResultCode::Rejected, TransactionStatus::Fail)
        };
        Self { code, transaction_id: transaction_id.into(), status }
    }

    pub fn is_success(&self) -> bool { self.status == TransactionStatus::Success }
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("Browser context unavailable")]
    NoBrowserContext,

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Payment widget not ready ({0:?})")]
    NotReady(ScriptReadinessState),

    #[error("A payment session is already in flight")]
    SessionInFlight,

    #[error("Invalid payment request: {0}")]
    InvalidRequest(#[from] validator::ValidationErrors),

    #[error("Invalid gateway policy: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error("Widget invocation failed: {0}")]
    Invocation(#[from] WidgetError),

    #[error("Session state error: {0}")]
    Session(#[from] SessionError),

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, RedirectError>;
