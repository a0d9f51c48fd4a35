//! Model downloads
//!
//! Models are fetched outside Bevy so compressed meshes can be decoded
//! first. Finished downloads are handed to the asset server through the
//! embedded asset source.

use bevy::asset::io::embedded::EmbeddedAssetRegistry;
use bevy::prelude::*;
use bevy::window::RequestRedraw;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::draco::DracoError;
use crate::instance::{ModelState, ViewerInstance};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(#[from] gloo_net::Error),
    #[error("Server answered {0}")]
    Status(u16),
    #[error(transparent)]
    Draco(#[from] DracoError),
}

/// Result of one model download
pub struct Download {
    /// Window entity of the viewer that asked for the model
    pub window: Entity,
    pub result: Result<Vec<u8>, String>,
}

/// Downloads finished since the last frame
#[derive(Resource, Clone, Default)]
pub struct FinishedDownloads(pub Arc<Mutex<Vec<Download>>>);

impl FinishedDownloads {
    pub fn push(&self, download: Download) {
        match self.0.lock() {
            Ok(mut queue) => queue.push(download),
            Err(_) => tracing::error!("Download queue poisoned, dropping result"),
        }
    }

    pub fn take(&self) -> Vec<Download> {
        self.0
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

/// Asset path a viewer's model is registered under
pub fn model_path(canvas_id: &str) -> PathBuf {
    PathBuf::from(format!("models/{canvas_id}.glb"))
}

pub struct FetchPlugin;

impl Plugin for FetchPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FinishedDownloads>()
            .add_systems(Update, hand_over_downloads);
    }
}

/// Start downloading a viewer's model
#[cfg(target_arch = "wasm32")]
pub fn request_model(window: Entity, url: String, downloads: &FinishedDownloads) {
    use wasm_bindgen_futures::spawn_local;

    let downloads = downloads.clone();
    spawn_local(async move {
        let result = download(&url).await.map_err(|e| e.to_string());
        downloads.push(Download { window, result });
    });
}

#[cfg(not(target_arch = "wasm32"))]
pub fn request_model(window: Entity, url: String, downloads: &FinishedDownloads) {
    tracing::warn!("Model downloads need a browser, not fetching {}", url);
    downloads.push(Download {
        window,
        result: Err("no browser".to_string()),
    });
}

#[cfg(target_arch = "wasm32")]
async fn download(url: &str) -> Result<Vec<u8>, FetchError> {
    let response = gloo_net::http::Request::get(url).send().await?;
    if !response.ok() {
        return Err(FetchError::Status(response.status()));
    }
    let bytes = response.binary().await?;

    if !crate::draco::is_compressed(&bytes) {
        return Ok(bytes);
    }
    tracing::debug!("Decoding compressed meshes in {}", url);
    let mut module = crate::decoder::load_module().await?;
    Ok(crate::draco::decompress(&bytes, &mut module)?)
}

/// Register finished models with the asset server
fn hand_over_downloads(
    downloads: Res<FinishedDownloads>,
    registry: Res<EmbeddedAssetRegistry>,
    asset_server: Res<AssetServer>,
    mut instances: Query<&mut ViewerInstance>,
    mut redraw: MessageWriter<RequestRedraw>,
) {
    let finished = downloads.take();
    if finished.is_empty() {
        return;
    }

    for Download { window, result } in finished {
        let Ok(mut instance) = instances.get_mut(window) else {
            continue;
        };
        match result {
            Ok(bytes) => {
                let path = model_path(&instance.canvas_id);
                registry.insert_asset(PathBuf::new(), &path, bytes);
                instance.model = ModelState::Loading(asset_server.load(format!("embedded://{}", path.display())));
            }
            Err(e) => {
                tracing::error!("Failed to load model for block {}: {}", instance.unique_id, e);
                instance.model = ModelState::Failed;
            }
        }
    }
    redraw.write(RequestRedraw);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downloads_are_taken_once() {
        let downloads = FinishedDownloads::default();
        let shared = downloads.clone();
        shared.push(Download {
            window: Entity::PLACEHOLDER,
            result: Ok(vec![1, 2, 3]),
        });

        let taken = downloads.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].result.as_deref(), Ok(&[1u8, 2, 3][..]));
        assert!(downloads.take().is_empty());
    }

    #[test]
    fn test_model_paths_are_per_canvas() {
        assert_eq!(model_path("cad-render-canvas-0"), PathBuf::from("models/cad-render-canvas-0.glb"));
        assert_ne!(model_path("cad-render-canvas-0"), model_path("cad-render-canvas-1"));
    }
}
