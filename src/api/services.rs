//! HTTP handlers for the dispatcher process

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use http_body_util::BodyExt;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use super::auth::require_api_key;
use super::error::ApiError;
use super::state::AppState;
use super::utils::{parse_content_type, parse_form, validate_body_size};
use crate::broker::HEARTBEAT_TTL;
use crate::clients::sms::verify_signature;
use crate::store::{ApplicationStatus, ProfileInput};
use crate::worker::HEARTBEAT_SERVICE;

pub const SIGNATURE_HEADER: &str = "x-applybox-signature";

#[derive(Debug, Deserialize)]
struct ProfileIngest {
    headline: String,
    summary: String,
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    #[serde(default)]
    preferences: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct ProfileIngestResponse {
    status: &'static str,
    profile_id: u64,
}

/// Profile ingestion endpoint (POST /ingest/profile)
///
/// Upserts the profile (phone number is the natural key) and replaces any
/// provided preferences. Rate limited per client IP.
pub async fn ingest_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;

    if !state.limiter.check(client_ip(&headers)) {
        return Err(ApiError::RateLimited);
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    let data = read_body(&state, body).await?;
    let input: ProfileIngest = serde_json::from_slice(&data)?;

    let store = state.dispatcher.store();
    let existing = match &input.phone {
        Some(phone) => store.profile_by_phone(phone)?,
        None => store.first_profile()?,
    };

    if existing.is_none() && input.phone.is_none() {
        return Err(ApiError::InvalidPayload(
            "phone is required for a new profile".into(),
        ));
    }

    let base = existing.as_ref();
    let profile = store.upsert_profile(ProfileInput {
        full_name: input
            .full_name
            .or_else(|| base.map(|p| p.full_name.clone()))
            .unwrap_or_default(),
        email: input
            .email
            .or_else(|| base.map(|p| p.email.clone()))
            .unwrap_or_default(),
        phone: input
            .phone
            .or_else(|| base.map(|p| p.phone.clone()))
            .unwrap_or_default(),
        headline: input.headline,
        summary: input.summary,
    })?;

    if let Some(preferences) = input.preferences {
        for (key, value) in preferences {
            store.set_preference(profile.id, &key, &value)?;
        }
    }

    Ok((
        StatusCode::OK,
        Json(ProfileIngestResponse {
            status: "ok",
            profile_id: profile.id,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct ApplyResponse {
    status: &'static str,
    task_id: Option<String>,
    application_id: u64,
}

/// Application trigger endpoint (POST /jobs/apply/{role_id})
///
/// Creates or reuses the active application for this role and publishes
/// the automation task. A repeated call while a task is in flight returns
/// the same application id without publishing again.
pub async fn apply(
    State(state): State<AppState>,
    Path(role_id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;

    let profile = state
        .dispatcher
        .store()
        .first_profile()?
        .ok_or_else(|| ApiError::NotFound("profile".into()))?;

    let outcome = state
        .dispatcher
        .trigger_application(profile.id, role_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(ApplyResponse {
            status: if outcome.reused_active { "reused" } else { "queued" },
            task_id: outcome.task_id,
            application_id: outcome.application_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ApplicationFilter {
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApplicationSummary {
    id: u64,
    role_title: String,
    company_name: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    submitted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Application listing endpoint (GET /applications?status=)
pub async fn list_applications(
    State(state): State<AppState>,
    Query(filter): Query<ApplicationFilter>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;

    let status = match &filter.status {
        Some(raw) => Some(ApplicationStatus::parse(raw).ok_or_else(|| {
            ApiError::InvalidPayload(format!("unknown application status: {raw}"))
        })?),
        None => None,
    };

    let store = state.dispatcher.store();
    let mut out = Vec::new();
    for app in store.list_applications(status, 200)? {
        let role = store.role(app.role_id)?;
        let (role_title, company_name) = role
            .map(|role| (role.title, role.company))
            .unwrap_or_else(|| (format!("role #{}", app.role_id), String::new()));
        out.push(ApplicationSummary {
            id: app.id,
            role_title,
            company_name,
            status: app.status.to_string(),
            created_at: app.created_at,
            submitted_at: app.submitted_at,
        });
    }

    Ok((StatusCode::OK, Json(out)))
}

/// Application detail endpoint (GET /applications/{id})
pub async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;

    let app = state
        .dispatcher
        .store()
        .application(id)?
        .ok_or_else(|| ApiError::NotFound(format!("application {id}")))?;
    Ok((StatusCode::OK, Json(app)))
}

#[derive(Debug, Deserialize)]
struct AdvanceRequest {
    status: String,
}

/// User-driven post-terminal progress (POST /applications/{id}/advance)
///
/// Moves a submitted application through interview/offer/rejected/closed.
pub async fn advance_application(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;

    let data = read_body(&state, body).await?;
    let input: AdvanceRequest = serde_json::from_slice(&data)?;
    let to = ApplicationStatus::parse(&input.status).ok_or_else(|| {
        ApiError::InvalidPayload(format!("unknown application status: {}", input.status))
    })?;

    let store = state.dispatcher.store();
    let lock = store.lock_application(id);
    let _guard = lock.lock().await;
    let app = store.apply_event(id, &crate::store::Event::Advanced { to })?;

    Ok((StatusCode::OK, Json(app)))
}

/// Role listing endpoint (GET /roles)
pub async fn list_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;
    let roles = state.dispatcher.store().list_roles(200)?;
    Ok((StatusCode::OK, Json(roles)))
}

#[derive(Debug, Deserialize)]
struct RoleIngest {
    company: String,
    title: String,
    description: String,
    posting_url: String,
}

#[derive(Debug, Serialize)]
struct RoleIngestResponse {
    status: &'static str,
    role_id: u64,
    created: bool,
}

/// Role ingestion endpoint (POST /ingest/role)
///
/// Upserts by dedup hash; re-ingesting a ranked role regresses it to
/// sourced so it gets re-scored.
pub async fn ingest_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, state.config.secrets.api_key.as_ref())?;

    let data = read_body(&state, body).await?;
    let input: RoleIngest = serde_json::from_slice(&data)?;
    if input.company.trim().is_empty() || input.title.trim().is_empty() {
        return Err(ApiError::InvalidPayload(
            "company and title are required".into(),
        ));
    }

    let (role, created) = state.dispatcher.store().upsert_role(crate::store::RoleInput {
        company: input.company,
        title: input.title,
        description: input.description,
        posting_url: input.posting_url,
    })?;

    Ok((
        StatusCode::OK,
        Json(RoleIngestResponse {
            status: "ok",
            role_id: role.id,
            created,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    services: HashMap<String, String>,
    metrics: crate::observability::MetricsSnapshot,
    version: String,
}

/// Health check endpoint (GET /health)
///
/// 200 when everything is healthy, 206 when degraded (a collaborator or the
/// automation heartbeat is missing), 503 when the store is down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = &state.dispatcher;
    let mut services = HashMap::new();

    let store_ok = dispatcher.store().health_check().is_ok();
    services.insert(
        "store".to_string(),
        if store_ok { "healthy" } else { "unhealthy" }.to_string(),
    );

    let broker_ok = dispatcher.broker().ping().await;
    services.insert(
        "broker".to_string(),
        if broker_ok { "healthy" } else { "unhealthy" }.to_string(),
    );

    let blob_ok = dispatcher.artifacts.ping().await;
    services.insert(
        "blob".to_string(),
        if blob_ok { "healthy" } else { "unhealthy" }.to_string(),
    );

    let sms_ok = dispatcher.sms.is_configured();
    services.insert(
        "sms".to_string(),
        if sms_ok { "healthy" } else { "unhealthy" }.to_string(),
    );

    // A worker that has not heartbeat within the TTL reads as unhealthy
    let automation_ok = matches!(
        dispatcher.broker().last_heartbeat(HEARTBEAT_SERVICE).await,
        Ok(Some(beat)) if fresh(&beat)
    );
    services.insert(
        "automation".to_string(),
        if automation_ok { "healthy" } else { "unhealthy" }.to_string(),
    );

    let (status, code) = if !store_ok {
        ("critical", StatusCode::SERVICE_UNAVAILABLE)
    } else if !broker_ok || !blob_ok || !sms_ok || !automation_ok {
        ("degraded", StatusCode::PARTIAL_CONTENT)
    } else {
        ("ok", StatusCode::OK)
    };

    let response = HealthResponse {
        status: status.to_string(),
        services,
        metrics: dispatcher.metrics().snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (code, Json(response))
}

fn fresh(beat: &crate::messages::Heartbeat) -> bool {
    let age = chrono::Utc::now() - beat.timestamp;
    age < chrono::Duration::from_std(HEARTBEAT_TTL).unwrap_or(chrono::Duration::seconds(120))
}

/// Inbound SMS webhook (POST /webhooks/sms)
///
/// Signature validation is a precondition; unsigned or mis-signed requests
/// are rejected before the body is parsed.
pub async fn sms_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let Some(secret) = state.config.secrets.sms_webhook_secret.as_ref() else {
        return Err(ApiError::Forbidden);
    };
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(ApiError::Forbidden);
    };

    let data = read_body(&state, body).await?;
    if !verify_signature(secret.expose_secret(), &data, signature) {
        return Err(ApiError::Forbidden);
    }

    let text = std::str::from_utf8(&data)
        .map_err(|_| ApiError::InvalidPayload("body is not UTF-8".into()))?;
    let form = parse_form(text);
    let (Some(from), Some(message)) = (form.get("From"), form.get("Body")) else {
        return Err(ApiError::InvalidPayload("From and Body are required".into()));
    };

    state
        .hitl
        .handle_inbound(from, message)
        .await
        .map_err(ApiError::from)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Client address for rate limiting: the first X-Forwarded-For entry when
/// deployed behind a proxy, loopback otherwise
fn client_ip(headers: &HeaderMap) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Reads request body and validates size (decompression is handled by
/// middleware before this sees the bytes)
async fn read_body(state: &AppState, body: axum::body::Body) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();
    validate_body_size(&data, state.config.server.api.max_payload_bytes.as_usize())?;
    Ok(data)
}
