//! HTTP trigger endpoint.
//!
//! `/v1/update` accepts these query parameters:
//!
//! * `image` (repeatable, comma separated): images to update.  Without it
//!   the request is a general scan, which is skipped when another update
//!   is already running.
//! * `hostname`: only update containers with this hostname.
//! * `newImageName`: replacement image for managed server containers.
//! * `stopAfterUpdate` (legacy `stopWatchtower`): shut the daemon down
//!   once the update finished.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use log::{debug, error, info, warn};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use url::form_urlencoded;

use crate::coordinator::Coordinator;
use crate::error::{InvalidParameter, UpdateError};
use crate::gate::AdmissionGate;
use crate::types::{DispatchOutcome, UpdateIntent};

pub const UPDATE_PATH: &str = "/v1/update";

/// Response header telling callers whether the update ran or was skipped.
pub const STATUS_HEADER: &str = "x-updraft-status";

const STOP_PARAMS: [&str; 2] = ["stopAfterUpdate", "stopWatchtower"];
const INVALID_STOP_BODY: &str = "Invalid stopAfterUpdate parameter";
const INTERNAL_ERROR_BODY: &str = "Internal Server Error";
const UNAUTHORIZED_BODY: &str = "Unauthorized";

/// State shared with the handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Bearer token required by the endpoint, if any.
    pub api_token: Option<Arc<str>>,
}

#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(UPDATE_PATH, any(trigger_update))
        .with_state(state)
}

/// Serves `app` until `shutdown` resolves.
///
/// The gate is closed as soon as shutdown starts, so requests still waiting
/// for it fail instead of starting new updates; the update holding the gate
/// runs to completion before this returns.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    gate: AdmissionGate,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            gate.close();
        })
        .await
}

async fn trigger_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if !authorized(state.api_token.as_deref(), &headers) {
        warn!("Rejected update request with missing or invalid token");
        return (StatusCode::UNAUTHORIZED, UNAUTHORIZED_BODY).into_response();
    }

    info!("Updates triggered by HTTP API request.");
    debug!("Request query: {}", query.as_deref().unwrap_or_default());

    let intent = match parse_intent(query.as_deref()) {
        Ok(intent) => intent,
        Err(e) => {
            error!("{}", e);
            return (StatusCode::BAD_REQUEST, INVALID_STOP_BODY).into_response();
        }
    };

    respond(state.coordinator.dispatch(&intent).await)
}

fn authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    token.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Builds an [`UpdateIntent`] from a raw query string.
pub fn parse_intent(query: Option<&str>) -> Result<UpdateIntent, InvalidParameter> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect();
    let first = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let mut intent = UpdateIntent::default();
    for (_, value) in pairs.iter().filter(|(k, _)| k == "image") {
        debug!("Image parameter found: {}", value);
        for image in value.split(',') {
            intent.add_target(image);
        }
    }

    if let Some(hostname) = first("hostname") {
        debug!("Hostname parameter found: {}", hostname);
        intent.hostname = non_empty(hostname);
    }
    if let Some(image) = first("newImageName") {
        debug!("New image name parameter found: {}", image);
        intent.new_image_name = non_empty(image);
    }

    if let Some((name, value)) = pairs.iter().find(|(k, _)| STOP_PARAMS.contains(&k.as_str())) {
        debug!("Stop parameter {} found: {}", name, value);
        intent.stop_after_update = parse_bool(value).ok_or_else(|| InvalidParameter {
            name: name.clone(),
            value: value.clone(),
        })?;
    }
    Ok(intent)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Accepts the same spellings as Go's `strconv.ParseBool`.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn respond(result: Result<DispatchOutcome, UpdateError>) -> Response {
    match result {
        Ok(DispatchOutcome::Completed) => status_only("completed"),
        Ok(DispatchOutcome::Skipped) => status_only("skipped"),
        Err(UpdateError::Validation(reason)) => {
            warn!("{}", reason);
            (StatusCode::PRECONDITION_FAILED, reason).into_response()
        }
        Err(e @ (UpdateError::Runtime(_) | UpdateError::GateClosed(_))) => {
            error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
        }
    }
}

fn status_only(status: &'static str) -> Response {
    (
        StatusCode::OK,
        [(
            HeaderName::from_static(STATUS_HEADER),
            HeaderValue::from_static(status),
        )],
    )
        .into_response()
}
