//! The axum surface of the aggregation service.
//!
//! | Method | Path                        | Purpose                                |
//! |--------|-----------------------------|----------------------------------------|
//! | PUT    | `/agg?auth=`                | ingest a batch of partials             |
//! | PUT    | `/process?auth=`            | long-poll liveness registration        |
//! | GET    | `/status?auth=`             | live status of a tenant                |
//! | GET    | `/processes?auth=`          | registered processes and their state   |
//! | POST   | `/processes/:name/kill?auth=` | press every button held by a process |

use crate::environment::Environment;
use crate::environments::Environments;
use crate::process::ProcessInfo;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statline_core::{PartialBatch, ServerConfig, StatlineError, Status};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    pub environments: Arc<Environments>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(environments: Arc<Environments>, config: Arc<ServerConfig>) -> Self {
        Self {
            environments,
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/agg", put(put_agg))
        .route("/process", put(put_process))
        .route("/status", get(get_status))
        .route("/processes", get(list_processes))
        .route("/processes/:name/kill", post(kill_process))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    #[serde(default)]
    auth: String,
}

#[derive(Debug, Deserialize)]
struct ProcessRegistration {
    process: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub count: usize,
    pub last_activity: DateTime<Utc>,
    pub status: Status,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillResponse {
    pub name: String,
    pub killed: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(StatlineError);

impl From<StatlineError> for ApiError {
    fn from(err: StatlineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StatlineError::NoActiveProcess(_) => StatusCode::NOT_FOUND,
            StatlineError::InvalidTenant(_)
            | StatlineError::InvalidPath(_)
            | StatlineError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            other => {
                error!("Request failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

async fn environment(
    state: &AppState,
    auth: &str,
) -> Result<Arc<Mutex<Environment>>, ApiError> {
    Ok(state.environments.get_or_create(auth).await?)
}

async fn put_agg(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
    Json(batch): Json<PartialBatch>,
) -> Result<StatusCode, ApiError> {
    let env = environment(&state, &query.auth).await?;
    let count = batch.prt.len();
    env.lock().await.agg(batch.prt);
    debug!("[{}] /agg {} partial(s)", query.auth, count);
    Ok(StatusCode::OK)
}

/// Holds the request open until the process is killed or the hold expires.
/// The button outlives an expired hold and is dropped by the sweep.
async fn put_process(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
    Json(registration): Json<ProcessRegistration>,
) -> Result<String, ApiError> {
    let name = registration.process.trim().to_string();
    if name.is_empty() {
        return Err(StatlineError::InvalidPath("empty process name".to_string()).into());
    }

    let env = environment(&state, &query.auth).await?;
    let (tx, rx) = oneshot::channel::<()>();
    env.lock().await.add_process(
        &name,
        Box::new(move || {
            let _ = tx.send(());
        }),
    );

    match tokio::time::timeout(state.config.long_poll_hold, rx).await {
        Ok(Ok(())) => {
            info!("[{}] kill delivered to '{}'", query.auth, name);
            Ok(format!("{}-{}", query.auth, name))
        }
        _ => Ok(String::new()),
    }
}

async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let env = environment(&state, &query.auth).await?;
    let env = env.lock().await;
    Ok(Json(StatusResponse {
        count: env.count(),
        last_activity: env.last_activity(),
        status: env.current(),
    }))
}

async fn list_processes(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> Result<Json<Vec<ProcessInfo>>, ApiError> {
    let env = environment(&state, &query.auth).await?;
    let processes = env.lock().await.processes();
    Ok(Json(processes))
}

async fn kill_process(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AuthQuery>,
) -> Result<Json<KillResponse>, ApiError> {
    let env = environment(&state, &query.auth).await?;
    let killed = env.lock().await.kill_process(&name)?;
    Ok(Json(KillResponse { name, killed }))
}
