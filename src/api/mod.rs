//! REST API: request routing, request/response types, and handlers.
//!
//! Handlers stay thin: validate, call into the store/service, map rows to
//! responses. Errors bubble as [`TwistwatchError`] and serialize through
//! its `IntoResponse` impl. CORS is permissive because the review frontend
//! is served from a separate origin.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::errors::{Result, TwistwatchError};
use crate::models::{DomainWithRisk, Permutation, Schedule, User};
use crate::probe::RootProbe;
use crate::queue::QueueClient;
use crate::risk::RiskCounts;
use crate::scanner::ScanBackend;
use crate::service::{self, PhishingHit};
use crate::store::Store;

/// Shared state behind every handler.
pub struct AppState {
    pub store: Store,
    pub scanner: Arc<dyn ScanBackend>,
    pub probe: Option<RootProbe>,
    pub queue: Option<Arc<QueueClient>>,
    pub risk: RiskConfig,
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api", get(health))
        .route("/api/user", post(create_user))
        .route(
            "/api/:user_id/domain",
            get(list_domains).post(add_domain).delete(delete_domain),
        )
        .route(
            "/api/:user_id/:domain_name/permutations",
            get(get_permutations).post(run_scan),
        )
        .route("/api/:user_id/permutations-count", get(permutations_count))
        .route(
            "/api/:user_id/schedule",
            get(list_schedules)
                .post(create_schedules)
                .patch(update_schedule)
                .delete(delete_schedules),
        )
        .route("/publish-message", post(publish_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// --------------------------------- health -----------------------------------

async fn root() -> &'static str {
    "OK"
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "API is up and running" }))
}

// ---------------------------------- users -----------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub message: String,
    pub user_name: String,
    pub user_id: String,
}

#[instrument(skip(state, body), fields(request_id = %Uuid::new_v4()))]
async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    let user_name = body
        .user_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwistwatchError::missing_field("user_name"))?;

    let (user, created) = state.store.create_or_get_user(user_name).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let message = if created {
        "User created successfully"
    } else {
        "User already exists"
    };

    info!(user_id = %user.user_id, created, "user request handled");
    Ok((
        status,
        Json(CreateUserResponse {
            message: message.to_string(),
            user_name: user.user_name,
            user_id: user.user_id,
        }),
    ))
}

// --------------------------------- domains ----------------------------------

#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    #[serde(default)]
    pub domain_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DomainsResponse {
    pub domains: Vec<DomainWithRisk>,
    pub user_risk_counts: RiskCounts,
}

#[instrument(skip(state))]
async fn list_domains(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<DomainsResponse>> {
    require_user(&state.store, &user_id).await?;

    let mut domains = Vec::new();
    let mut user_risk_counts = RiskCounts::default();

    for domain in state.store.list_domains(&user_id).await? {
        let risk_counts = state
            .store
            .risk_counts_for_domain(&domain.domain_name)
            .await?;
        user_risk_counts.merge(&risk_counts);
        domains.push(DomainWithRisk {
            domain,
            risk_counts,
        });
    }

    Ok(Json(DomainsResponse {
        domains,
        user_risk_counts,
    }))
}

#[instrument(skip(state, body), fields(request_id = %Uuid::new_v4()))]
async fn add_domain(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<DomainRequest>,
) -> Result<impl IntoResponse> {
    let raw = body
        .domain_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwistwatchError::missing_field("domain_name"))?;

    let domain =
        service::register_domain(&state.store, state.probe.as_ref(), &user_id, raw).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Domain added successfully",
            "domain_name": domain.domain_name,
        })),
    ))
}

#[instrument(skip(state, body))]
async fn delete_domain(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<DomainRequest>,
) -> Result<impl IntoResponse> {
    let domain_name = body
        .domain_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwistwatchError::missing_field("domain_name"))?;

    require_user(&state.store, &user_id).await?;

    if !state.store.delete_domain(&user_id, domain_name).await? {
        return Err(TwistwatchError::domain_not_found(domain_name));
    }

    info!(domain_name, %user_id, "domain deleted");
    Ok(Json(json!({
        "message": "Domain deleted successfully",
        "domain_name": domain_name,
    })))
}

// ------------------------------- permutations --------------------------------

/// A stored permutation plus its Unicode display form.
#[derive(Debug, Serialize)]
pub struct PermutationView {
    #[serde(flatten)]
    pub row: Permutation,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub scanned_domain: String,
    pub phishing_matches: Vec<PhishingHit>,
    pub total_matches: usize,
    pub new_permutations: usize,
    pub updated_permutations: usize,
}

#[instrument(skip(state))]
async fn get_permutations(
    State(state): State<Arc<AppState>>,
    Path((user_id, domain_name)): Path<(String, String)>,
) -> Result<Json<Vec<PermutationView>>> {
    require_user(&state.store, &user_id).await?;

    if state.store.get_domain(&domain_name).await?.is_none() {
        return Err(TwistwatchError::domain_not_found(&domain_name));
    }

    let rows = state.store.list_permutations(&domain_name).await?;
    if rows.is_empty() {
        return Err(TwistwatchError::NoPermutations {
            domain: domain_name,
        });
    }

    let views = rows
        .into_iter()
        .map(|row| PermutationView {
            display_name: crate::domain_utils::to_display(&row.permutation_name),
            row,
        })
        .collect();
    Ok(Json(views))
}

#[instrument(skip(state), fields(request_id = %Uuid::new_v4()))]
async fn run_scan(
    State(state): State<Arc<AppState>>,
    Path((user_id, domain_name)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_user(&state.store, &user_id).await?;

    let outcome = service::scan_domain(
        &state.store,
        state.scanner.as_ref(),
        &state.risk,
        &domain_name,
    )
    .await?;

    let response = ScanResponse {
        scanned_domain: outcome.scanned_domain,
        total_matches: outcome.phishing_matches.len(),
        phishing_matches: outcome.phishing_matches,
        new_permutations: outcome.new_permutations,
        updated_permutations: outcome.updated_permutations,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[instrument(skip(state))]
async fn permutations_count(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    require_user(&state.store, &user_id).await?;
    let count = state.store.count_permutations_for_user(&user_id).await?;
    Ok(Json(json!({ "count": count })))
}

// -------------------------------- schedules ----------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSchedulesRequest {
    pub hours: i64,
    #[serde(default)]
    pub domain_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub schedule_id: String,
    #[serde(default)]
    pub schedule_name: Option<String>,
    #[serde(default)]
    pub next_scan: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteSchedulesRequest {
    #[serde(default)]
    pub schedule_ids: Vec<String>,
}

#[instrument(skip(state))]
async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    require_user(&state.store, &user_id).await?;
    let schedules = state.store.list_schedules(&user_id).await?;
    Ok(Json(json!({ "schedules": schedules })))
}

#[instrument(skip(state, body), fields(request_id = %Uuid::new_v4()))]
async fn create_schedules(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<CreateSchedulesRequest>,
) -> Result<impl IntoResponse> {
    require_user(&state.store, &user_id).await?;

    if body.hours < 1 {
        return Err(TwistwatchError::invalid_request(
            "schedule interval must be at least one hour",
        ));
    }
    if body.domain_names.is_empty() {
        return Err(TwistwatchError::missing_field("domain_names"));
    }

    let now = Utc::now();
    let mut schedules = Vec::new();

    for domain_name in &body.domain_names {
        let owned = state
            .store
            .get_domain(domain_name)
            .await?
            .map(|d| d.user_id == user_id)
            .unwrap_or(false);
        if !owned {
            return Err(TwistwatchError::domain_not_found(domain_name));
        }

        let schedule = Schedule {
            schedule_id: Uuid::new_v4().to_string(),
            schedule_name: format!("{domain_name} / every {}h", body.hours),
            domain_name: domain_name.clone(),
            start_date: now,
            next_scan: Some(now + Duration::hours(body.hours)),
        };
        state.store.insert_schedule(&schedule).await?;
        schedules.push(schedule);
    }

    info!(%user_id, count = schedules.len(), "schedules created");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Schedules created successfully",
            "schedules": schedules,
        })),
    ))
}

#[instrument(skip(state, body))]
async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateScheduleRequest>,
) -> Result<Json<serde_json::Value>> {
    require_user(&state.store, &user_id).await?;

    let updated = state
        .store
        .update_schedule(
            &body.schedule_id,
            body.schedule_name.as_deref(),
            body.next_scan,
        )
        .await?
        .ok_or_else(|| TwistwatchError::ScheduleNotFound {
            schedule_id: body.schedule_id.clone(),
        })?;

    Ok(Json(json!({
        "message": "Schedule updated successfully",
        "schedule": updated,
    })))
}

#[instrument(skip(state, body))]
async fn delete_schedules(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<DeleteSchedulesRequest>,
) -> Result<Json<serde_json::Value>> {
    require_user(&state.store, &user_id).await?;

    if body.schedule_ids.is_empty() {
        return Err(TwistwatchError::missing_field("schedule_ids"));
    }

    let deleted = state.store.delete_schedules(&body.schedule_ids).await?;
    Ok(Json(json!({
        "message": "Schedules deleted successfully",
        "deleted_schedules": deleted,
    })))
}

// ----------------------------- message queue ----------------------------------

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[instrument(skip(state, body))]
async fn publish_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>> {
    let message = body
        .message
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TwistwatchError::missing_field("message"))?;

    let Some(ref queue) = state.queue else {
        warn!("publish requested but no queue is configured");
        return Err(TwistwatchError::QueueDisabled);
    };

    let msg_id = queue.publish(message).await?;
    info!(%msg_id, "message published");
    Ok(Json(json!({
        "message": "Message published",
        "msg_id": msg_id,
    })))
}

// --------------------------------- helpers -----------------------------------

async fn require_user(store: &Store, user_id: &str) -> Result<User> {
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| TwistwatchError::user_not_found(user_id))
}
