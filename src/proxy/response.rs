//! JSON responses generated by the gateway itself.
//!
//! Covers the reserved endpoints (`/`, `/health`) and the local fallbacks
//! for unroutable paths, unavailable upstreams and internal failures.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::{Method, StatusCode};
use pingora_core::prelude::*;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;
use serde::Serialize;

use super::upstream::HealthTracker;
use crate::store::RouteTable;

pub const GATEWAY_NAME: &str = "Atlantiplex Gateway";
pub const UNAVAILABLE_ERROR: &str = "Service temporarily unavailable";
pub const NOT_FOUND_ERROR: &str = "Not Found";
pub const INTERNAL_ERROR: &str = "Internal Server Error";

/// Current time as an ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ErrorBody {
    pub fn not_found(path: &str) -> Self {
        Self {
            error: NOT_FOUND_ERROR,
            path: Some(path.to_string()),
            message: Some(format!("No route registered for {}", path)),
            timestamp: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            error: UNAVAILABLE_ERROR,
            path: None,
            message: None,
            timestamp: Some(timestamp()),
        }
    }

    pub fn internal() -> Self {
        Self {
            error: INTERNAL_ERROR,
            path: None,
            message: None,
            timestamp: Some(timestamp()),
        }
    }

    /// Body matching a failure status code.
    ///
    /// 503 and 500 use the gateway's own wording; any other code is named by
    /// its canonical reason, so the body always agrees with the status line.
    pub fn for_status(status: u16) -> Self {
        match status {
            503 => Self::unavailable(),
            500 => Self::internal(),
            _ => {
                let reason = StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason());
                Self {
                    error: match reason {
                        Some(reason) => reason,
                        None if status < 500 => "Bad Request",
                        None => INTERNAL_ERROR,
                    },
                    path: None,
                    message: None,
                    timestamp: Some(timestamp()),
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: String,
}

impl HealthBody {
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            timestamp: timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub path: String,
    pub target: String,
    pub name: String,
    pub healthy: bool,
}

/// Body of `GET /`: the configured routes and their display names.
#[derive(Debug, Serialize)]
pub struct GatewayInfo {
    pub name: &'static str,
    pub status: &'static str,
    pub routes: Vec<RouteInfo>,
    pub timestamp: String,
}

impl GatewayInfo {
    pub fn from_table(table: &RouteTable, tracker: &HealthTracker) -> Self {
        let routes = table
            .routes()
            .iter()
            .map(|route| RouteInfo {
                path: route.prefix().to_string(),
                target: route.target().url().to_string(),
                name: route.name().to_string(),
                healthy: tracker.is_healthy(&route.target().address()),
            })
            .collect();

        Self {
            name: GATEWAY_NAME,
            status: "running",
            routes,
            timestamp: timestamp(),
        }
    }
}

/// Writes a JSON response and ends the downstream exchange.
///
/// `HEAD` requests get the headers only. Always returns `Ok(true)` so it can
/// be returned straight out of `request_filter`.
pub async fn send_json<T: Serialize>(session: &mut Session, status: u16, body: &T) -> Result<bool> {
    let payload = serde_json::to_vec(body)
        .map_err(|e| Error::because(ErrorType::InternalError, "failed to encode response body", e))?;

    let mut header = ResponseHeader::build(status, Some(4))?;
    header.insert_header("Content-Type", "application/json; charset=utf-8")?;
    header.insert_header("Content-Length", payload.len().to_string())?;
    header.insert_header("Cache-Control", "no-store")?;

    let head_only = session.req_header().method == Method::HEAD;
    session
        .write_response_header(Box::new(header), head_only)
        .await?;
    if !head_only {
        session
            .write_response_body(Some(Bytes::from(payload)), true)
            .await?;
    }
    Ok(true)
}
