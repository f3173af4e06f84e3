use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use handlebars::TemplateError;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::dataset::TabularDataset;
use crate::decoder::{self, FileOutcome, GENERIC_ERROR_MESSAGE, UploadedFile};
use crate::graph::{self, ChartOutcome, GraphOptions};
use crate::preview::{PreviewRenderer, TablePage};
use crate::saving;
use crate::selection::{AggregateFunction, PlotType, SelectionState, SelectorOptions};
use crate::session::{SessionPhase, SessionStore};

const SESSION_COOKIE: &str = "session";

pub struct AppState {
    store: SessionStore,
    renderer: PreviewRenderer,
}

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadedFile>,
}

#[derive(Serialize)]
struct PreviewBlock {
    filename: String,
    ok: bool,
    html: String,

    /// Token of this file's own dataset, for paging and charting this block
    stored: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    status: String,
    blocks: Vec<PreviewBlock>,
    stored: Option<String>,
    options: SelectorOptions,
    cleared: Vec<String>,
    phase: SessionPhase,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

impl StatusResponse {
    fn error(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<usize>,
}

#[derive(Deserialize)]
struct PreviewRequest {
    #[serde(default)]
    page: Option<usize>,

    /// Dataset token of the block being paged
    #[serde(default)]
    stored: Option<String>,
}

/// Selector values as submitted by the page; empty strings mean "nothing selected"
#[derive(Deserialize, Default)]
#[serde(default)]
struct SelectionForm {
    plot_type: Option<String>,
    group_by: Option<String>,
    aggregate: Option<String>,
    x_column: Option<String>,
    y_column: Option<String>,
}

impl SelectionForm {
    fn into_selection(self) -> SelectionState {
        SelectionState {
            plot_type: non_empty(self.plot_type).and_then(|v| PlotType::from_value(&v)),
            group_by: non_empty(self.group_by),
            aggregate: non_empty(self.aggregate).and_then(|v| AggregateFunction::from_label(&v)),
            x_column: non_empty(self.x_column),
            y_column: non_empty(self.y_column),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[derive(Deserialize)]
struct GraphRequest {
    /// Times "Create Graph" was pressed; absent until the first press
    #[serde(default)]
    n_clicks: Option<u32>,

    #[serde(flatten)]
    selection: SelectionForm,

    /// Dataset token from a previous upload, used instead of the session's copy
    #[serde(default)]
    stored: Option<String>,
}

#[derive(Serialize)]
struct GraphResponse {
    status: String,
    chart: Option<graph::ChartSpec>,
    html: String,
}

/// Builds the application router with fresh session storage
///
/// # Errors
/// * Returns a `TemplateError` if the bundled page templates fail to parse
pub fn build_router(config: &ServerConfig) -> Result<Router, TemplateError> {
    let app_state = Arc::new(AppState {
        store: SessionStore::new(),
        renderer: PreviewRenderer::new()?,
    });

    Ok(Router::new()
        .route("/", get(serve_index))
        .route("/api/upload", post(upload_files))
        .route("/api/upload/multipart", post(upload_multipart))
        .route("/api/preview", get(get_preview).post(post_preview))
        .route("/api/options", get(get_options))
        .route("/api/selection", get(get_selection).post(update_selection))
        .route("/api/graph", post(create_graph))
        .route("/api/state", get(get_state))
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(middleware::from_fn(log_requests))
        .with_state(app_state))
}

pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(&config)?;

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        "Listening on http://{} (debug: {})",
        config.bind_address(),
        config.debug
    );
    axum::serve(listener, app).await?;

    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        "{} {} -> {} in {:?}",
        method,
        path,
        response.status(),
        started.elapsed()
    );
    response
}

/// Finds the caller's session id
///
/// A missing cookie, or one naming a session the store does not hold, gets a
/// freshly issued session and cookie.
fn session_from(jar: CookieJar, store: &SessionStore) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        if store.touch(&id) {
            return (jar, id);
        }
        debug!("Replacing unknown session cookie");
    }

    let id = store.create_session();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true);
    (jar.add(cookie), id)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn upload_files(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(payload): Json<UploadRequest>,
) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);

    let outcomes = decoder::decode_batch(&payload.files);
    (jar, respond_to_upload(&state, &session, outcomes))
}

async fn upload_multipart(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);
    let mut outcomes = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Rejected multipart upload: {}", e);
                let body = Json(StatusResponse::error(format!("Invalid upload: {}", e)));
                return (jar, (StatusCode::BAD_REQUEST, body).into_response());
            }
        };

        // plain form fields carry no file
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        match field.bytes().await {
            Ok(bytes) => outcomes.push(decoder::decode_file_bytes(&filename, &bytes, None)),
            Err(e) => {
                warn!("Failed to read uploaded file {}: {}", filename, e);
                let body = Json(StatusResponse::error(format!("Invalid upload: {}", e)));
                return (jar, (StatusCode::BAD_REQUEST, body).into_response());
            }
        }
    }

    (jar, respond_to_upload(&state, &session, outcomes))
}

/// Renders one block per file and keeps the last decoded dataset for the session
///
/// Every decoded file's block carries its own dataset token. Files that
/// failed to decode leave the stored dataset untouched.
fn respond_to_upload(state: &AppState, session: &str, outcomes: Vec<FileOutcome>) -> Response {
    let blocks: Vec<PreviewBlock> = outcomes
        .iter()
        .map(|outcome| {
            let html = state.renderer.file_block(outcome).unwrap_or_else(|e| {
                error!("Failed to render preview for {}: {}", outcome.filename, e);
                GENERIC_ERROR_MESSAGE.to_string()
            });
            let stored = outcome.result.as_ref().ok().and_then(|dataset| {
                saving::encode_dataset(dataset)
                    .map_err(|e| error!("Failed to pack {} for the client: {}", outcome.filename, e))
                    .ok()
            });
            PreviewBlock {
                filename: outcome.filename.clone(),
                ok: outcome.result.is_ok(),
                html,
                stored,
            }
        })
        .collect();

    let stored = blocks
        .iter()
        .rev()
        .find(|block| block.ok)
        .and_then(|block| block.stored.clone());
    let mut cleared = Vec::new();
    if let Some(dataset) = outcomes.into_iter().rev().find_map(|o| o.result.ok()) {
        cleared = state.store.set_current(session, dataset);
    }

    let current = state.store.get_current(session);
    Json(UploadResponse {
        status: "ok".to_string(),
        blocks,
        stored,
        options: SelectorOptions::from_dataset(current.as_ref()),
        cleared,
        phase: state.store.phase(session),
    })
    .into_response()
}

async fn get_preview(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<PageQuery>,
) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);
    let dataset = state.store.get_current(&session);
    (jar, preview_page(&state, dataset, params.page.unwrap_or(0)))
}

/// Pages through the dataset of one preview block, named by its token
async fn post_preview(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<PreviewRequest>,
) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);
    let dataset = dataset_for(&state, &session, request.stored.as_deref());
    (jar, preview_page(&state, dataset, request.page.unwrap_or(0)))
}

fn preview_page(state: &AppState, dataset: Option<TabularDataset>, page: usize) -> Response {
    match dataset {
        Some(dataset) => {
            let page = TablePage::from_dataset(&dataset, page);
            let html = state.renderer.table(&page).unwrap_or_else(|e| {
                error!("Failed to render table page: {}", e);
                String::new()
            });
            Json(json!({ "status": "ok", "table": page, "html": html })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(StatusResponse::error("No dataset uploaded")),
        )
            .into_response(),
    }
}

/// The dataset a request works on: its token when it sent one, else the session's
fn dataset_for(state: &AppState, session: &str, stored: Option<&str>) -> Option<TabularDataset> {
    match stored {
        Some(token) => saving::decode_dataset(token)
            .map_err(|e| warn!("Ignoring stored dataset from client: {}", e))
            .ok(),
        None => state.store.get_current(session),
    }
}

async fn get_options(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);
    let current = state.store.get_current(&session);
    (jar, Json(SelectorOptions::from_dataset(current.as_ref())))
}

async fn get_selection(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);
    let body = json!({
        "selection": state.store.selection(&session),
        "phase": state.store.phase(&session),
    });
    (jar, Json(body))
}

async fn update_selection(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(form): Json<SelectionForm>,
) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);

    let selection = form.into_selection();
    let phase = state.store.update_selection(&session, selection.clone());
    (jar, Json(json!({ "selection": selection, "phase": phase })))
}

async fn get_state(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);
    let body = json!({
        "phase": state.store.phase(&session),
        "has_dataset": state.store.get_current(&session).is_some(),
    });
    (jar, Json(body))
}

/// The "Create Graph" button
///
/// The submitted selector values are the whole selection; an empty or
/// missing field is unset. Returns 204 before the first press so the page
/// keeps its chart.
async fn create_graph(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<GraphRequest>,
) -> impl IntoResponse {
    let (jar, session) = session_from(jar, &state.store);

    let selection = request.selection.into_selection();
    let dataset = dataset_for(&state, &session, request.stored.as_deref());

    let outcome = graph::make_graph(request.n_clicks, &selection, dataset.as_ref());
    if request.n_clicks.is_some() {
        state.store.update_selection(&session, selection);
    }
    state.store.record_outcome(&session, &outcome);

    let response = match (outcome, dataset.as_ref()) {
        (ChartOutcome::NotTriggered, _) => StatusCode::NO_CONTENT.into_response(),
        (ChartOutcome::Produced(spec), Some(dataset)) => {
            let svg = graph::render_svg(&spec, dataset, &GraphOptions::for_spec(&spec))
                .map_err(|e| warn!("Chart for {:?} has nothing to draw: {}", spec, e))
                .ok();
            let html = state
                .renderer
                .chart(&spec, svg.as_deref())
                .unwrap_or_else(|e| {
                    error!("Failed to render chart fragment: {}", e);
                    String::new()
                });
            Json(GraphResponse {
                status: "ok".to_string(),
                chart: Some(spec),
                html,
            })
            .into_response()
        }
        _ => Json(GraphResponse {
            status: "empty".to_string(),
            chart: None,
            html: String::new(),
        })
        .into_response(),
    };

    (jar, response)
}
