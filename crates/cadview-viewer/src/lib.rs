//! CAD Render Viewer - WebAssembly renderer for CAD Render blocks
//!
//! Finds every `.cad-render-block-wrapper` on the page, reads its settings
//! object and renders the configured glTF binary model into a canvas inside
//! the block's container. Draco compressed meshes are decoded with the
//! decoder script the page loads.

mod app;
#[cfg(target_arch = "wasm32")]
mod decoder;
mod dom;
mod draco;
mod fetch;
mod glb;
mod instance;
mod model;

use std::sync::atomic::{AtomicBool, Ordering};
use wasm_bindgen::prelude::*;

/// Set when the page asks for a new scan of block wrappers
static RESCAN_REQUESTED: AtomicBool = AtomicBool::new(true);

/// Take a pending rescan request
pub(crate) fn take_rescan_request() -> bool {
    RESCAN_REQUESTED.swap(false, Ordering::AcqRel)
}

/// Attach viewers to wrappers added since the last scan.
///
/// Wrappers that already carry a viewer are left alone.
#[wasm_bindgen]
pub fn attach_behaviors() {
    RESCAN_REQUESTED.store(true, Ordering::Release);
}

/// WASM entry point
#[wasm_bindgen(start)]
pub fn main() {
    // Set up panic hook for better error messages
    console_error_panic_hook::set_once();

    tracing_wasm::set_as_global_default_with_config(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::WARN)
            .build(),
    );

    app::run();
}
