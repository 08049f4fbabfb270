//! axum middleware applying the gate to every inbound request.
//!
//! The middleware assembles request facts, asks the gate for a verdict, and
//! translates it back into HTTP: pass-through with quota headers, or a
//! structured 429 rejection.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error};

use crate::gate::{phone_from_payload, Admission, Denial, Gate, RequestFacts, Verdict};

/// Shared context injected into request extensions by the outermost layer.
#[derive(Clone)]
pub struct GateContext {
    pub gate: Arc<Gate>,
}

/// Largest messaging payload buffered for phone extraction.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Body of a structured 429 rejection.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub error: &'static str,
    pub message: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
}

/// Gate middleware. Accesses [`GateContext`] from request extensions.
pub async fn admit(req: Request, next: Next) -> Response {
    let received_at = Instant::now();

    let Some(ctx) = req.extensions().get::<GateContext>().cloned() else {
        // Missing context is a wiring bug; pass through rather than erroring.
        error!("Gate context missing from request extensions, passing through");
        return next.run(req).await;
    };

    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let bearer_token = header_str(&req, header::AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let forwarded_for = header_str(&req, "x-forwarded-for").map(str::to_string);
    let user_agent = header_str(&req, header::USER_AGENT).map(str::to_string);
    let country_code = header_str(&req, "cf-ipcountry").map(str::to_string);

    // Messaging webhooks carry the subject in the payload; buffer the body
    // for extraction and hand the request downstream intact.
    let (req, phone) = if ctx.gate.is_messaging_path(&path) {
        buffer_phone(req).await
    } else {
        (req, None)
    };

    let facts = RequestFacts {
        path,
        method,
        bearer_token,
        phone,
        forwarded_for,
        user_agent,
        country_code,
        received_at,
    };

    match ctx.gate.check(&facts).await {
        Verdict::Skipped => next.run(req).await,
        Verdict::Admitted(admission) => {
            let response = next.run(req).await;
            let status_code = response.status().as_u16();
            let response_time_ms = facts.received_at.elapsed().as_millis() as u64;
            ctx.gate
                .record_outcome(&admission, &facts, status_code, response_time_ms)
                .await;
            with_quota_headers(response, &admission)
        }
        Verdict::Denied(denial) => rejection_response(&denial),
    }
}

fn header_str<'a, K>(req: &'a Request, key: K) -> Option<&'a str>
where
    K: axum::http::header::AsHeaderName,
{
    req.headers().get(key).and_then(|v| v.to_str().ok())
}

async fn buffer_phone(req: Request) -> (Request, Option<String>) {
    let (parts, body) = req.into_parts();
    match to_bytes(body, MAX_PAYLOAD_BYTES).await {
        Ok(bytes) => {
            let content_type = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let phone = phone_from_payload(content_type, &bytes);
            (Request::from_parts(parts, Body::from(bytes)), phone)
        }
        Err(e) => {
            // Oversized or unreadable payload; the resolver falls back to
            // the next identifier tier.
            debug!(error = %e, "Could not buffer messaging payload");
            (Request::from_parts(parts, Body::empty()), None)
        }
    }
}

fn with_quota_headers(mut response: Response, admission: &Admission) -> Response {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&admission.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&admission.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&admission.reset_at.timestamp().to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

fn rejection_response(denial: &Denial) -> Response {
    let body = RejectionBody {
        error: "Too Many Requests",
        message: format!(
            "Rate limit of {} requests exceeded, retry after {}s",
            denial.limit, denial.retry_after_secs
        ),
        retry_after: denial.retry_after_secs,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&denial.retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}
