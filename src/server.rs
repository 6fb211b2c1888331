//! HTTP server.
//!
//! Serves the question-answering endpoints, the project registry and the
//! document listing over a JSON API. All handlers share one
//! [`AppContext`] through Axum's `State` extractor.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/` | Answer `{query}` from the document corpus |
//! | `POST` | `/stream` | Same, streamed as `text/plain` |
//! | `POST` | `/projects` | Register and classify a project (multipart form) |
//! | `GET`  | `/projects` | List projects |
//! | `GET`  | `/project/{id}` | Fetch one project |
//! | `PATCH` | `/project/{id}` | Rename or re-attach a project |
//! | `DELETE` | `/project/{id}` | Delete a project |
//! | `GET`  | `/files` | List files in the document directory |
//! | `POST` | `/index/rebuild` | Rebuild the vector index |
//! | `GET`  | `/health` | Health check |
//!
//! # Error Contract
//!
//! Every error response is `{ "message": "..." }` with the status chosen by
//! [`AppError`]: 400 for validation and persistence failures, 404 for unknown
//! projects, 502/503/504 when the model backends fail.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end on
//! another origin can call the API.

use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::embedding::EmbeddingError;
use crate::error::AppError;
use crate::files::list_files;
use crate::ingest::IndexStats;
use crate::models::{FileInfo, NewProject, ProjectJson, ProjectUpdate};
use crate::rag::{self, Answer};
use crate::uploads::{discard_attachment, save_attachment};

type AppState = Arc<AppContext>;

/// Build the router with every route and layer attached.
pub fn router(ctx: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = ctx.config.uploads.max_bytes;

    Router::new()
        .route("/", post(handle_answer))
        .route("/stream", post(handle_answer_stream))
        .route("/projects", post(handle_create_project).get(handle_list_projects))
        .route(
            "/project/{id}",
            get(handle_get_project)
                .patch(handle_update_project)
                .delete(handle_delete_project),
        )
        .route("/files", get(handle_list_files))
        .route("/index/rebuild", post(handle_rebuild_index))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(ctx: AppState) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("eurisk listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::Validation(rejection.body_text())
}

// ============ POST / and POST /stream ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: Option<String>,
}

impl QueryRequest {
    fn query(self) -> Result<String, AppError> {
        self.query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Missing required field: query".into()))
    }
}

async fn handle_answer(
    State(ctx): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let Json(request) = body.map_err(bad_json)?;
    let query = request.query()?;
    Ok(Json(rag::answer(&ctx, &query).await?))
}

/// Streams fragments as they arrive; nothing is buffered before the first
/// byte. A generation failure mid-stream aborts the response body.
async fn handle_answer_stream(
    State(ctx): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body.map_err(bad_json)?;
    let query = request.query()?;
    let fragments = rag::answer_stream(&ctx, &query).await?;

    let stream = futures_util::stream::unfold(fragments, |mut rx| async move {
        let item = rx.recv().await?;
        if let Err(e) = &item {
            tracing::error!(error = %e, "answer stream failed");
        }
        Some((item, rx))
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

// ============ /projects ============

#[derive(Default)]
struct ProjectForm {
    name: Option<String>,
    description: Option<String>,
    markets: Vec<String>,
    attachment: Option<(String, Vec<u8>)>,
}

impl ProjectForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = ProjectForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?
        {
            let field_name = field.name().unwrap_or_default().to_string();
            match field_name.as_str() {
                "attachment" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(e.body_text()))?;
                    // Browsers send an empty part when no file was chosen.
                    if !file_name.is_empty() || !bytes.is_empty() {
                        form.attachment = Some((file_name, bytes.to_vec()));
                    }
                }
                "name" | "description" | "market" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| AppError::Validation(e.body_text()))?;
                    match field_name.as_str() {
                        "name" => form.name = Some(value),
                        "description" => form.description = Some(value),
                        _ => form.markets.push(value),
                    }
                }
                other => tracing::debug!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    /// Market tags as one comma-separated string, or `None` when absent.
    fn market(&self) -> Option<String> {
        let tags: Vec<&str> = self
            .markets
            .iter()
            .flat_map(|m| m.split(','))
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect();
        if tags.is_empty() {
            None
        } else {
            Some(tags.join(","))
        }
    }
}

fn require(value: &Option<String>, field: &str) -> Result<String, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::Validation(format!(
            "Missing required field: {}",
            field
        ))),
    }
}

#[derive(Serialize)]
struct CreatedResponse {
    message: String,
    id: i64,
}

/// Validate, classify, store the attachment, then persist. A failure before
/// persisting leaves no row; a failed insert removes the saved file.
async fn handle_create_project(
    State(ctx): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let multipart = multipart.map_err(|e| AppError::Validation(e.body_text()))?;
    let form = ProjectForm::read(multipart).await?;

    let name = require(&form.name, "name")?;
    let description = require(&form.description, "description")?;
    let market = require(&form.market(), "market")?;

    let assessment = rag::classify(&ctx, &description).await?;

    let saved: Option<PathBuf> = match &form.attachment {
        Some((file_name, bytes)) => Some(
            save_attachment(&ctx.config.uploads.dir, file_name, bytes)
                .await
                .map_err(AppError::internal)?,
        ),
        None => None,
    };

    let project = NewProject {
        name: Some(name),
        description: Some(description),
        market: Some(market),
        eu_risk: Some(assessment.risk),
        eu_risk_reason: Some(assessment.reason),
        attachment: saved.as_ref().map(|p| p.display().to_string()),
    };

    match ctx.projects.create(project).await {
        Ok(id) => Ok((
            StatusCode::CREATED,
            Json(CreatedResponse {
                message: "Project created successfully.".to_string(),
                id,
            }),
        )),
        Err(e) => {
            if let Some(path) = &saved {
                discard_attachment(path).await;
            }
            Err(e.into())
        }
    }
}

#[derive(Serialize)]
struct ProjectListResponse {
    projects: Vec<ProjectJson>,
}

async fn handle_list_projects(
    State(ctx): State<AppState>,
) -> Result<Json<ProjectListResponse>, AppError> {
    let projects = ctx.projects.list().await?;
    Ok(Json(ProjectListResponse {
        projects: projects.iter().map(ProjectJson::from).collect(),
    }))
}

// ============ /project/{id} ============

/// Ids that are not integers cannot name a project.
fn project_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound("Project could not be found.".to_string()))
}

async fn handle_get_project(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectJson>, AppError> {
    let project = ctx.projects.get(project_id(&id)?).await?;
    Ok(Json(ProjectJson::from(&project)))
}

async fn handle_update_project(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ProjectUpdate>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = project_id(&id)?;
    let Json(update) = body.map_err(bad_json)?;
    ctx.projects.update(id, update).await?;
    Ok(message("Project updated successfully."))
}

async fn handle_delete_project(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    ctx.projects.delete(project_id(&id)?).await?;
    Ok(message("Project deleted successfully."))
}

// ============ GET /files ============

async fn handle_list_files(State(ctx): State<AppState>) -> Result<Json<Vec<FileInfo>>, AppError> {
    let dir = ctx.config.documents.dir.clone();
    let files = tokio::task::spawn_blocking(move || list_files(&dir))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)?;
    Ok(Json(files))
}

// ============ POST /index/rebuild ============

async fn handle_rebuild_index(State(ctx): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    match ctx.rebuild_index().await {
        Ok(stats) => Ok(Json(stats)),
        Err(err) => match err.downcast::<EmbeddingError>() {
            Ok(embedding) => Err(AppError::Embedding(embedding)),
            Err(other) => Err(AppError::Internal(format!("{:#}", other))),
        },
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    indexed_chunks: usize,
}

async fn handle_health(State(ctx): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_chunks: ctx.index.len(),
    })
}
