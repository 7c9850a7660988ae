//! Callback receiver for the gateway's post-payment navigation.
//!
//! The widget is handed `{origin}/api/onepay/callback` as its redirect URL.
//! The browser lands here after the gateway; the outcome is published on
//! NATS when configured and the shopper is sent on to the success or
//! failure page.

use crate::config::ServiceConfig;
use crate::domain::value_objects::CALLBACK_PATH;
use crate::PaymentResult;
use axum::{extract::{Query, State}, http::StatusCode, response::Redirect, routing::get, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use validator::{Validate, ValidationError};

pub const CALLBACK_SUBJECT: &str = "onepay.callback";

#[derive(Clone)]
pub struct CallbackState {
    pub nats: Option<async_nats::Client>,
    pub config: Arc<ServiceConfig>,
}

impl CallbackState {
    pub fn new(config: ServiceConfig, nats: Option<async_nats::Client>) -> Self {
        Self { nats, config: Arc::new(config) }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CallbackParams {
    #[validate(length(min = 1, max = 128), custom = "transaction_id_chars")]
    pub transaction_id: Option<String>,
    pub status: Option<String>,
    pub code: Option<String>,
}

fn transaction_id_chars(id: &str) -> Result<(), ValidationError> {
    if id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(ValidationError::new("transaction_id_chars"))
    }
}

impl CallbackParams {
    /// A callback counts as successful when either the status or the code
    /// says so; anything else is a failure.
    pub fn into_result(self) -> Result<PaymentResult, (StatusCode, String)> {
        self.validate().map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        let id = self.transaction_id.ok_or_else(|| (StatusCode::BAD_REQUEST, "transaction_id is required".to_string()))?;
        let success = self.status.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("SUCCESS")) || self.code.as_deref() == Some("201");
        Ok(PaymentResult::new(id, success))
    }
}

pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "onepay-redirect"})) }))
        .route(CALLBACK_PATH, get(callback_query).post(callback_json))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}

async fn callback_query(State(s): State<CallbackState>, Query(p): Query<CallbackParams>) -> Result<Redirect, (StatusCode, String)> {
    settle(&s, p.into_result()?).await
}

async fn callback_json(State(s): State<CallbackState>, Json(p): Json<CallbackParams>) -> Result<Redirect, (StatusCode, String)> {
    settle(&s, p.into_result()?).await
}

async fn settle(s: &CallbackState, result: PaymentResult) -> Result<Redirect, (StatusCode, String)> {
    info!(transaction_id = %result.transaction_id, success = result.is_success(), "payment callback received");
    if let Some(nats) = &s.nats {
        let body = serde_json::to_vec(&result).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        if let Err(error) = nats.publish(CALLBACK_SUBJECT.to_string(), body.into()).await {
            warn!(%error, transaction_id = %result.transaction_id, "failed to publish payment callback");
        }
    }
    let page = if result.is_success() { &s.config.success_page } else { &s.config.failure_page };
    let separator = if page.contains('?') { '&' } else { '?' };
    Ok(Redirect::to(&format!("{page}{separator}transaction_id={}", result.transaction_id)))
}
