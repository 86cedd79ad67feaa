use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use toolhub_core::{ArtifactKind, MetadataPatch, ToolKind, ToolManifest, ToolMetadata, ToolStatus};
use toolhub_runtime::{MountInfo, MountReport, ToolRequest};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bridge::{self, DOCUMENT_CSP};
use crate::config::ServerConfig;
use crate::error::HubError;
use crate::hub::{ArtifactFiles, ToolHub, ToolView, UploadRequest, UploadedFile};

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ToolHub>,
}

/// Build the HTTP surface: management API under `/api`, tool routes under
/// `/tools/{id}`.
pub fn router(hub: Arc<ToolHub>, server: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/tools", post(upload_tool).get(list_tools))
        .route(
            "/tools/{id}",
            get(get_tool).patch(edit_tool).delete(delete_tool),
        )
        .route("/tools/{id}/artifacts", put(replace_artifacts))
        .route("/tools/{id}/file", get(artifact_file))
        .route("/tools/{id}/frontend", get(frontend_document))
        .route("/tools/{id}/run", get(run_page))
        .route("/tools/{id}/toggle", post(toggle_tool))
        .route("/tools/{id}/reload", post(reload_tool))
        .route("/mounts", get(list_mounts))
        .route("/mounts/reload", post(reload_mounts));

    let router = Router::new()
        .nest("/api", api)
        .route("/tools/{id}", any(dispatch_root))
        .route("/tools/{id}/{*path}", any(dispatch_path))
        .with_state(AppState { hub })
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    if server.cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tools: usize,
    active: usize,
    failed: usize,
    mounted: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.hub.counts().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools: counts.tools,
        active: counts.active,
        failed: counts.failed,
        mounted: counts.mounted,
    })
}

async fn upload_tool(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ToolManifest>), HubError> {
    let form = read_form(multipart).await?;
    let name = form
        .name
        .ok_or_else(|| HubError::BadRequest("missing `name` field".into()))?;

    let mut metadata = ToolMetadata::named(name);
    if let Some(description) = form.description {
        metadata.description = description;
    }
    if let Some(category) = form.category.filter(|c| !c.trim().is_empty()) {
        metadata.category = category;
    }
    if let Some(version) = form.version.filter(|v| !v.trim().is_empty()) {
        metadata.version = version;
    }
    if let Some(author) = form.author {
        metadata.author = author;
    }

    let manifest = state
        .hub
        .upload(UploadRequest {
            metadata,
            kind: form.kind,
            files: form.files,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ToolManifest>>, HubError> {
    let status = query
        .status
        .as_deref()
        .map(ToolStatus::from_str)
        .transpose()
        .map_err(HubError::BadRequest)?;
    Ok(Json(state.hub.list(status).await))
}

async fn get_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToolView>, HubError> {
    Ok(Json(state.hub.get(&id).await?))
}

async fn edit_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<MetadataPatch>,
) -> Result<Json<ToolManifest>, HubError> {
    Ok(Json(state.hub.edit(&id, patch).await?))
}

async fn delete_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HubError> {
    state.hub.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<ToolManifest>, HubError> {
    let form = read_form(multipart).await?;
    Ok(Json(state.hub.replace_artifacts(&id, form.files).await?))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    kind: String,
}

async fn artifact_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Response, HubError> {
    let kind = match query.kind.trim().to_ascii_lowercase().as_str() {
        "backend" => ArtifactKind::Backend,
        "frontend" => ArtifactKind::Frontend,
        other => {
            return Err(HubError::BadRequest(format!(
                "unknown artifact kind `{other}` (expected backend or frontend)"
            )));
        }
    };
    let file = state.hub.artifact_file(&id, kind).await?;

    let mut response = file.content.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(file.content_type),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.artifact.filename.replace(['"', '\\', '\r', '\n'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn frontend_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HubError> {
    let document = state.hub.frontend_document(&id).await?;
    let csp = format!("{DOCUMENT_CSP}; {}", namespace_csp(&headers, &id));
    with_csp(Html(document).into_response(), &csp)
}

async fn run_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HubError> {
    let page = state.hub.host_page(&id).await?;
    with_csp(Html(page).into_response(), &namespace_csp(&headers, &id))
}

fn namespace_csp(headers: &HeaderMap, id: &str) -> String {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    bridge::namespace_csp(host, &bridge::reachable_paths(id))
}

fn with_csp(mut response: Response, csp: &str) -> Result<Response, HubError> {
    let value = HeaderValue::from_str(csp)
        .map_err(|e| HubError::BadRequest(format!("cannot build content security policy: {e}")))?;
    response
        .headers_mut()
        .insert(header::CONTENT_SECURITY_POLICY, value);
    Ok(response)
}

async fn toggle_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToolManifest>, HubError> {
    Ok(Json(state.hub.toggle(&id).await?))
}

async fn reload_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToolManifest>, HubError> {
    Ok(Json(state.hub.reload(&id).await?))
}

async fn list_mounts(State(state): State<AppState>) -> Json<Vec<MountInfo>> {
    Json(state.hub.mounted().await)
}

async fn reload_mounts(State(state): State<AppState>) -> Json<MountReport> {
    Json(state.hub.mount_all().await)
}

async fn dispatch_root(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    body: Bytes,
) -> Result<Response, HubError> {
    dispatch(&state, &id, method, "/", body).await
}

async fn dispatch_path(
    State(state): State<AppState>,
    Path((id, path)): Path<(String, String)>,
    method: Method,
    body: Bytes,
) -> Result<Response, HubError> {
    dispatch(&state, &id, method, &path, body).await
}

async fn dispatch(
    state: &AppState,
    id: &str,
    method: Method,
    path: &str,
    body: Bytes,
) -> Result<Response, HubError> {
    let body = String::from_utf8(body.to_vec())
        .map_err(|_| HubError::BadRequest("request body is not valid UTF-8".into()))?;
    let request = ToolRequest::new(method.as_str(), path, body);
    let output = state.hub.dispatch(id, request).await?;

    let content_type = if serde_json::from_str::<serde_json::Value>(&output).is_ok() {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], output).into_response())
}

/// Text fields and files of an upload form.
#[derive(Debug, Default)]
struct UploadForm {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    version: Option<String>,
    author: Option<String>,
    kind: Option<ToolKind>,
    files: ArtifactFiles,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, HubError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HubError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let filename = field.file_name().map(str::to_string);
        let content = field
            .bytes()
            .await
            .map_err(|e| HubError::BadRequest(format!("cannot read field `{name}`: {e}")))?;

        match name.as_str() {
            "backend" | "frontend" => {
                // Browsers send an empty part for an unused file input.
                let filename = filename.unwrap_or_default();
                if filename.is_empty() && content.is_empty() {
                    continue;
                }
                if filename.is_empty() {
                    return Err(HubError::BadRequest(format!(
                        "`{name}` must be a file with a filename"
                    )));
                }
                let file = Some(UploadedFile::new(filename, content.to_vec()));
                if name == "backend" {
                    form.files.backend = file;
                } else {
                    form.files.frontend = file;
                }
            }
            "kind" => {
                let text = text_field(&name, &content)?;
                if !text.trim().is_empty() {
                    form.kind = Some(ToolKind::from_str(&text).map_err(HubError::BadRequest)?);
                }
            }
            "name" => form.name = Some(text_field(&name, &content)?),
            "description" => form.description = Some(text_field(&name, &content)?),
            "category" => form.category = Some(text_field(&name, &content)?),
            "version" => form.version = Some(text_field(&name, &content)?),
            "author" => form.author = Some(text_field(&name, &content)?),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }
    Ok(form)
}

fn text_field(name: &str, content: &[u8]) -> Result<String, HubError> {
    String::from_utf8(content.to_vec())
        .map_err(|_| HubError::BadRequest(format!("field `{name}` is not valid UTF-8")))
}
