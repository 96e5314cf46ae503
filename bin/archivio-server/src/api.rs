//! Archive API handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use archivio_archiver::{ArchiveRequest, Archiver, CallbackToken, CompletionReport};
use archivio_client::GatewayClient;
use archivio_common::types::{ArchiveStatus, NodeId, Provider, RegistrationId, UserId};
use archivio_common::{AggregateStatResult, Config, Error};
use archivio_registry::{Completion, Registration, Registry};

/// Application state shared across handlers
pub struct AppState {
    pub archiver: Arc<Archiver>,
    pub registry: Arc<Registry>,
    pub gateway: Arc<GatewayClient>,
    pub config: Config,
}

/// JSON error body returned by every failing route
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Map a service error onto its HTTP status with a JSON body
fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Request body for POST /archives
#[derive(Debug, Deserialize)]
pub struct StartArchiveBody {
    pub registration: String,
    pub source: String,
    pub title: String,
    pub initiator: String,
    pub initiator_email: String,
    #[serde(default)]
    pub parent: Option<String>,
    pub providers: Vec<String>,
    pub gateway_cookie: String,
}

impl StartArchiveBody {
    /// Validate ids and provider names into a typed archive request
    fn into_request(self) -> Result<ArchiveRequest, Error> {
        let parent = match self.parent {
            Some(parent) => Some(RegistrationId::new(parent)?),
            None => None,
        };
        let providers = self
            .providers
            .iter()
            .map(|name| Provider::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ArchiveRequest {
            registration: RegistrationId::new(self.registration)?,
            source: NodeId::new(self.source)?,
            title: self.title,
            initiator: UserId::new(self.initiator)?,
            initiator_email: self.initiator_email,
            parent,
            providers,
            gateway_cookie: self.gateway_cookie,
        })
    }
}

/// Response body for POST /archives
#[derive(Serialize)]
pub struct StartArchiveResponse {
    pub registration: String,
    pub status_url: String,
    pub callback_token: String,
}

/// Request body for POST /archives/{id}/callback
#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    pub token: String,
    pub provider: String,
    pub status: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Query parameters for GET /archives
#[derive(Debug, Deserialize, Default)]
pub struct ListArchivesParams {
    /// If true, return only registrations stuck past the archive timeout
    #[serde(default)]
    stalled: bool,
}

/// Response body for GET /archives
#[derive(Serialize)]
pub struct ArchiveList {
    pub registrations: Vec<String>,
}

/// Per-provider slice of a status report
#[derive(Serialize)]
pub struct ProviderReport {
    pub provider: String,
    pub status: ArchiveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat: Option<AggregateStatResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Response body for GET /archives/{id}
#[derive(Serialize)]
pub struct StatusReport {
    pub registration: String,
    pub source: String,
    pub title: String,
    pub initiator: String,
    pub archiving: bool,
    pub is_deleted: bool,
    pub completion: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_providers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_provider: Option<String>,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub providers: Vec<ProviderReport>,
}

impl StatusReport {
    fn from_registration(registration: &Registration) -> Self {
        let (completion, failed_providers) = match registration.completion() {
            Completion::Incomplete => ("incomplete", Vec::new()),
            Completion::Complete => ("complete", Vec::new()),
            Completion::Failed(failed) => {
                ("failed", failed.iter().map(ToString::to_string).collect())
            }
        };
        let providers = registration
            .providers
            .iter()
            .map(|(provider, state)| ProviderReport {
                provider: provider.to_string(),
                status: state.status,
                stat: state.stat.clone(),
                errors: state.errors.clone(),
                updated_at: state.updated_at,
            })
            .collect();
        Self {
            registration: registration.id.to_string(),
            source: registration.source.to_string(),
            title: registration.title.clone(),
            initiator: registration.initiator.to_string(),
            archiving: registration.archiving,
            is_deleted: registration.is_deleted,
            completion,
            failed_providers,
            archive_provider: registration.archive_provider.as_ref().map(ToString::to_string),
            registered_at: registration.registered_at,
            archived_at: registration.archived_at,
            providers,
        }
    }
}

/// Start an archive run (POST /archives)
pub async fn start_archive(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartArchiveBody>,
) -> Response {
    let req = match body.into_request() {
        Ok(req) => req,
        Err(e) => return error_response(&e),
    };

    match state.archiver.clone().start(req) {
        Ok(receipt) => {
            info!("Accepted archive request for {}", receipt.registration);
            let response = StartArchiveResponse {
                status_url: format!(
                    "{}/archives/{}",
                    state.config.server.public_url, receipt.registration
                ),
                registration: receipt.registration.to_string(),
                callback_token: receipt.callback_token,
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Registration status report (GET /archives/{id})
pub async fn archive_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match RegistrationId::new(id) {
        Ok(id) => id,
        Err(e) => return error_response(&Error::from(e)),
    };

    match state.registry.get(&id) {
        Some(registration) => Json(StatusReport::from_registration(&registration)).into_response(),
        None => error_response(&Error::RegistrationNotFound(id.to_string())),
    }
}

/// Gateway completion webhook (POST /archives/{id}/callback)
pub async fn provider_callback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CallbackBody>,
) -> Response {
    match apply_callback(&state, &id, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// Decode, validate, and apply one completion webhook
async fn apply_callback(state: &AppState, id: &str, body: CallbackBody) -> Result<(), Error> {
    let id = RegistrationId::new(id)?;
    let provider = Provider::new(body.provider)?;

    // Decoded once for both checks: the cross-check here rejects tokens
    // aimed at a different registration than the URL names, and
    // complete_provider checks the signature.
    let token = CallbackToken::decode(&body.token)?;
    if token.registration != id {
        return Err(Error::TokenSignatureMismatch);
    }

    let report = match body.status.as_str() {
        "success" => CompletionReport::Success,
        "failure" => CompletionReport::Failure(body.errors),
        other => {
            return Err(Error::invalid_request(format!(
                "callback status must be \"success\" or \"failure\", got {other:?}"
            )));
        }
    };

    state.archiver.complete_provider(&token, &provider, report).await
}

/// List registration ids, optionally only stalled ones (GET /archives)
pub async fn list_archives(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListArchivesParams>,
) -> Response {
    let registrations = if params.stalled {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(state.config.archive.archive_timeout_secs as i64);
        state.registry.find_stalled(cutoff)
    } else {
        state.registry.list()
    };

    let mut ids: Vec<String> = registrations.iter().map(|r| r.id.to_string()).collect();
    ids.sort();

    Json(ArchiveList { registrations: ids }).into_response()
}

/// Health check endpoint (GET /health)
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let gateway = if state.gateway.health_check().await {
        "up"
    } else {
        "down"
    };
    Json(serde_json::json!({
        "status": "healthy",
        "gateway": gateway,
        "registrations": state.registry.len(),
    }))
    .into_response()
}
