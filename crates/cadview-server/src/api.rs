//! REST API handlers

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use cadview_core::{BlockConfig, CadRenderBlock, FileId, FormSubmission, RenderedBlock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::blocks::{BlockInstance, BlockStoreError};
use crate::config::WebConfig;
use crate::files::{FileRecord, FileStoreError};
use crate::page::{render_page, PageSection};
use crate::state::{AppState, SubmitError};

/// Multipart field carrying the upload
const UPLOAD_FIELD: &str = "file";

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiError::new(msg))).into_response()
}

fn block_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Block not found")
}

/// Stored file as returned by the API
#[derive(Serialize)]
struct FileView {
    #[serde(flatten)]
    record: FileRecord,
    url: String,
}

/// List registered block plugins
pub async fn list_plugins(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.definitions().to_vec())
}

/// List placed blocks
pub async fn list_blocks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let blocks: Vec<BlockInstance> = state.blocks.read().await.list().into_iter().cloned().collect();
    Json(blocks)
}

/// Placement request body
#[derive(Deserialize)]
pub struct CreateBlockRequest {
    #[serde(default = "default_plugin")]
    plugin: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    weight: i32,
    /// Partial configuration merged over the defaults
    #[serde(default)]
    settings: Option<serde_json::Value>,
}

fn default_plugin() -> String {
    CadRenderBlock::DEFINITION.id.to_string()
}

/// Place a new block
pub async fn create_block(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBlockRequest>,
) -> impl IntoResponse {
    if state.registry.get(&req.plugin).is_none() {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Unknown block plugin: {}", req.plugin),
        );
    }

    let settings = match req.settings {
        Some(value) => match BlockConfig::merged(value) {
            Ok(settings) => settings,
            Err(e) => {
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("Invalid block settings: {}", e),
                )
            }
        },
        None => CadRenderBlock::default_configuration(),
    };

    match state
        .blocks
        .write()
        .await
        .create(&req.plugin, req.region, req.weight, settings)
    {
        Ok(block) => (StatusCode::CREATED, Json(block)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to place block");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to place block: {}", e))
        }
    }
}

/// Get a placed block by ID
pub async fn get_block(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.blocks.read().await.get(&id) {
        Some(block) => Json(block.clone()).into_response(),
        None => block_not_found(),
    }
}

/// Remove a placed block and release its files
pub async fn delete_block(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let removed = state.blocks.write().await.remove(&id);
    match removed {
        Ok(block) => {
            state.release_files(&block).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(BlockStoreError::NotFound(_)) => block_not_found(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to remove block: {}", e)),
    }
}

/// Admin form of a block, defaults taken from its configuration
pub async fn get_block_form(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.blocks.read().await.get(&id) {
        Some(block) => Json(block.plugin().block_form()).into_response(),
        None => block_not_found(),
    }
}

/// Submit the admin form of a block
pub async fn submit_block(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(submission): Json<FormSubmission>,
) -> impl IntoResponse {
    match state.submit_block(&id, &submission).await {
        Ok(block) => {
            info!(block = %id, "Block settings saved");
            Json(block).into_response()
        }
        Err(SubmitError::NotFound(_)) => block_not_found(),
        Err(SubmitError::Invalid(errors)) => {
            debug!(block = %id, %errors, "Block form rejected");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(errors)).into_response()
        }
        Err(e) => {
            error!(block = %id, error = %e, "Failed to store block submission");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn render_instance(state: &AppState, block: &BlockInstance) -> RenderedBlock {
    let files = state.files.read().await;
    block.plugin().build(&*files, state.next_token())
}

/// Render-time settings of one block instance
pub async fn get_block_settings(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(block) = state.blocks.read().await.get(&id).cloned() else {
        return block_not_found();
    };
    Json(render_instance(&state, &block).await).into_response()
}

/// Upload a model as a temporary file
pub async fn upload_file(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> impl IntoResponse {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(e.status(), e.body_text()),
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content = match field.bytes().await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Upload aborted");
                return error_response(e.status(), e.body_text());
            }
        };

        let mut files = state.files.write().await;
        return match files.create_temporary(
            &filename,
            &content,
            state.config.storage.max_upload_bytes,
            chrono::Utc::now(),
        ) {
            Ok(record) => {
                let url = files.url_for(&record);
                (StatusCode::CREATED, Json(FileView { record, url })).into_response()
            }
            Err(e @ FileStoreError::TooLarge { .. }) => error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
            Err(e @ (FileStoreError::Extension(_) | FileStoreError::InvalidName(_))) => {
                error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            Err(e) => {
                error!(error = %e, "Failed to store upload");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to store upload: {}", e))
            }
        };
    }

    error_response(
        StatusCode::BAD_REQUEST,
        format!("Missing multipart field '{}'", UPLOAD_FIELD),
    )
}

/// Get a stored file record
pub async fn get_file(State(state): State<Arc<AppState>>, Path(fid): Path<u64>) -> impl IntoResponse {
    let files = state.files.read().await;
    match files.get(FileId(fid)) {
        Some(record) => Json(FileView {
            record: record.clone(),
            url: files.url_for(record),
        })
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "File not found"),
    }
}

fn html_page(title: &str, sections: &[PageSection], web: &WebConfig) -> Response {
    match render_page(title, sections, &web.viewer_script, &web.decoder_script()) {
        Ok(html) => Html(html).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to render page: {}", e)),
    }
}

/// HTML page rendering a single block
pub async fn block_page(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(block) = state.blocks.read().await.get(&id).cloned() else {
        return block_not_found();
    };

    let title = block.settings.label.clone();
    let sections = vec![PageSection {
        region: block.region.clone(),
        blocks: vec![render_instance(&state, &block).await],
    }];
    html_page(&title, &sections, &state.config.web)
}

/// HTML page rendering every placed block by region
pub async fn full_page(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let blocks: Vec<BlockInstance> = state.blocks.read().await.list().into_iter().cloned().collect();

    let mut sections: Vec<PageSection> = Vec::new();
    for block in &blocks {
        let rendered = render_instance(&state, block).await;
        match sections.last_mut() {
            Some(section) if section.region == block.region => section.blocks.push(rendered),
            _ => sections.push(PageSection {
                region: block.region.clone(),
                blocks: vec![rendered],
            }),
        }
    }

    html_page("CAD Render", &sections, &state.config.web)
}
