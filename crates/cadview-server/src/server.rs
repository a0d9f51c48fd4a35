//! Web server setup and routing

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::api;
use crate::auth;
use crate::config::TlsConfig;
use crate::state::AppState;

/// Multipart framing allowance on top of the upload size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state
        .config
        .storage
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);

    let admin = Router::new()
        .route("/api/blocks", post(api::create_block))
        .route("/api/blocks/{id}", put(api::submit_block).delete(api::delete_block))
        .route(
            "/api/files",
            post(api::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    let public = Router::new()
        .route("/api/plugins", get(api::list_plugins))
        .route("/api/blocks", get(api::list_blocks))
        .route("/api/blocks/{id}", get(api::get_block))
        .route("/api/blocks/{id}/form", get(api::get_block_form))
        .route("/api/blocks/{id}/settings", get(api::get_block_settings))
        .route("/api/files/{fid}", get(api::get_file))
        .route("/blocks/{id}", get(api::block_page))
        .route("/page", get(api::full_page));

    let mut app = Router::new().merge(public).merge(admin);

    // Uploaded files, when they are served by this process
    let base_url = state.config.storage.public_base_url.trim_end_matches('/');
    if base_url.starts_with('/') && base_url.len() > 1 {
        app = app.nest_service(base_url, ServeDir::new(&state.config.storage.public_dir));
    }

    app
        // Static files (WASM viewer bundle) - must be fallback for root
        .fallback_service(ServeDir::new(&state.config.web.dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server (HTTP or HTTPS depending on config)
pub async fn run(state: Arc<AppState>, bind: &str, tls: Option<&TlsConfig>) -> Result<()> {
    let app = router(state.clone());

    // Expired temporary uploads are removed in the background
    state.spawn_garbage_collector();

    if let Some(tls_config) = tls {
        run_https(app, bind, tls_config).await
    } else {
        run_http(app, bind).await
    }
}

/// Run plain HTTP server
async fn run_http(app: Router, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run HTTPS server with TLS
async fn run_https(app: Router, bind: &str, tls: &TlsConfig) -> Result<()> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::path::PathBuf;

    let cert_path = PathBuf::from(&tls.cert);
    let key_path = PathBuf::from(&tls.key);

    if !cert_path.exists() {
        anyhow::bail!("TLS certificate file not found: {}", tls.cert);
    }
    if !key_path.exists() {
        anyhow::bail!("TLS key file not found: {}", tls.key);
    }

    let rustls_config = RustlsConfig::from_pem_file(&cert_path, &key_path).await?;

    let addr: std::net::SocketAddr = bind.parse()?;
    info!(address = %bind, protocol = "HTTPS", cert = %tls.cert, "Starting web server with TLS");

    axum_server::bind_rustls(addr, rustls_config)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
