//! Web console: HTML forms for adding and removing rules, plus a small JSON API
//!
//! Every store/mirror call runs on the blocking pool: netsh can take seconds
//! and has no timeout.

pub mod pages;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::host;
use crate::rule::{NewRule, Rule};
use crate::sync::{RuleSynchronizer, SyncError};

#[derive(Clone)]
struct ConsoleState {
    sync: Arc<RuleSynchronizer>,
}

/// Build the console router
pub fn router(sync: Arc<RuleSynchronizer>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/list", get(list_rules))
        .route("/add", post(add_rule))
        .route("/remove", post(remove_rule))
        .route("/api/rules", get(api_rules))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(ConsoleState { sync })
}

/// Serve the console on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    sync: Arc<RuleSynchronizer>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("Port proxy console listening on http://{addr}");

    axum::serve(listener, router(sync))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// --- Errors ---

/// Plain-text error page
#[derive(Debug)]
struct ConsoleError {
    status: StatusCode,
    message: String,
}

impl ConsoleError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<SyncError> for ConsoleError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::InvalidRule(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.message);
        }
        (self.status, self.message).into_response()
    }
}

/// Run `f` against the synchronizer on the blocking pool
async fn blocking<T, F>(state: &ConsoleState, f: F) -> Result<T, ConsoleError>
where
    F: FnOnce(&RuleSynchronizer) -> Result<T, ConsoleError> + Send + 'static,
    T: Send + 'static,
{
    let sync = state.sync.clone();
    tokio::task::spawn_blocking(move || f(&sync))
        .await
        .map_err(|e| ConsoleError::internal(format!("request worker failed: {e}")))?
}

fn fetch_rules(sync: &RuleSynchronizer) -> Result<Vec<Rule>, ConsoleError> {
    sync.list()
        .map_err(|e| ConsoleError::internal(format!("failed to fetch rules from database: {e}")))
}

// --- Form / API types ---

#[derive(Deserialize)]
struct RemoveForm {
    #[serde(default)]
    rule_name: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rules: usize,
    mirror: &'static str,
}

// --- Handlers ---

async fn home() -> Html<String> {
    let ip = tokio::task::spawn_blocking(host::router_ip)
        .await
        .unwrap_or(std::net::Ipv4Addr::LOCALHOST);
    Html(pages::home(ip))
}

async fn list_rules(State(state): State<ConsoleState>) -> Result<Html<String>, ConsoleError> {
    let rules = blocking(&state, fetch_rules).await?;
    Ok(Html(pages::list(&rules)))
}

/// Run the add sequence, then show the updated rule list
async fn add_rule(
    State(state): State<ConsoleState>,
    Form(rule): Form<NewRule>,
) -> Result<Html<String>, ConsoleError> {
    let rules = blocking(&state, move |sync| {
        sync.add(rule)?;
        fetch_rules(sync)
    })
    .await?;
    Ok(Html(pages::list(&rules)))
}

/// Run the remove sequence, then show the updated rule list
async fn remove_rule(
    State(state): State<ConsoleState>,
    Form(form): Form<RemoveForm>,
) -> Result<Html<String>, ConsoleError> {
    let rules = blocking(&state, move |sync| {
        sync.remove(&form.rule_name)?;
        fetch_rules(sync)
    })
    .await?;
    Ok(Html(pages::list(&rules)))
}

async fn api_rules(State(state): State<ConsoleState>) -> Result<Json<Vec<Rule>>, ConsoleError> {
    let rules = blocking(&state, fetch_rules).await?;
    Ok(Json(rules))
}

async fn health_check(State(state): State<ConsoleState>) -> Result<Json<HealthResponse>, ConsoleError> {
    blocking(&state, |sync| {
        let rules = sync
            .store()
            .count()
            .map_err(|e| ConsoleError::internal(format!("failed to count rules: {e}")))?;
        Ok(Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            rules,
            mirror: sync.mirror().backend(),
        }))
    })
    .await
}
