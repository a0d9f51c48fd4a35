//! Page access: block discovery, canvas creation and container measurement

use cadview_core::ViewerSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element};

pub const WRAPPER_SELECTOR: &str = ".cad-render-block-wrapper";
pub const CONTAINER_SELECTOR: &str = ".cad-render-block-container";
pub const SETTINGS_SELECTOR: &str = "script.cad-render-settings";
/// Marks a wrapper that has been processed
pub const ATTACHED_ATTRIBUTE: &str = "data-cad-render-attached";

/// A wrapper found on the page that needs a viewer
pub struct DiscoveredBlock {
    /// Creation order, starting at zero
    pub index: usize,
    pub unique_id: String,
    pub canvas_id: String,
    pub container_size: (f32, f32),
    pub settings: ViewerSettings,
}

fn document() -> Option<Document> {
    web_sys::window().and_then(|w| w.document())
}

/// Collect wrappers that were not processed yet.
///
/// Every returned block already has its canvas in place. Wrappers without a
/// model or with unreadable settings are marked as processed and skipped.
pub fn discover_blocks(next_index: &mut usize) -> Vec<DiscoveredBlock> {
    let Some(document) = document() else {
        return Vec::new();
    };
    let wrappers = match document.query_selector_all(WRAPPER_SELECTOR) {
        Ok(list) => list,
        Err(e) => {
            tracing::error!("Wrapper query failed: {:?}", e);
            return Vec::new();
        }
    };

    let mut blocks = Vec::new();
    for i in 0..wrappers.length() {
        let Some(wrapper) = wrappers.item(i).and_then(|n| n.dyn_into::<Element>().ok()) else {
            continue;
        };
        let unique_id = wrapper.get_attribute("data-unique-id").unwrap_or_default();
        if !claim(&wrapper, &unique_id) {
            continue;
        }
        let Some(settings) = read_settings(&wrapper, &unique_id) else {
            continue;
        };
        if settings.asset_url().is_none() {
            tracing::debug!("Block {} has no model, skipping", unique_id);
            continue;
        }

        let container = match wrapper.query_selector(CONTAINER_SELECTOR) {
            Ok(Some(container)) => container,
            _ => {
                tracing::warn!("Block {} has no container element", unique_id);
                continue;
            }
        };

        let index = *next_index;
        let canvas_id = format!("cad-render-canvas-{index}");
        if let Err(e) = append_canvas(&document, &container, &canvas_id) {
            tracing::error!("Failed to create canvas for block {}: {:?}", unique_id, e);
            continue;
        }
        *next_index += 1;

        blocks.push(DiscoveredBlock {
            index,
            unique_id,
            container_size: element_size(&container),
            canvas_id,
            settings,
        });
    }
    blocks
}

/// Element carrying the attach-once marker
pub trait AttachMarker {
    type Error: std::fmt::Debug;

    fn is_attached(&self) -> bool;
    fn mark_attached(&self) -> Result<(), Self::Error>;
}

impl AttachMarker for Element {
    type Error = JsValue;

    fn is_attached(&self) -> bool {
        self.has_attribute(ATTACHED_ATTRIBUTE)
    }

    fn mark_attached(&self) -> Result<(), JsValue> {
        self.set_attribute(ATTACHED_ATTRIBUTE, "")
    }
}

/// Take an element for a new viewer.
///
/// `false` when it already has one, or when it cannot be marked: an
/// unmarked element would get a second viewer on the next scan.
pub fn claim<M: AttachMarker>(element: &M, unique_id: &str) -> bool {
    if element.is_attached() {
        return false;
    }
    match element.mark_attached() {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to mark block {} as attached: {:?}", unique_id, e);
            false
        }
    }
}

fn read_settings(wrapper: &Element, unique_id: &str) -> Option<ViewerSettings> {
    let script = match wrapper.query_selector(SETTINGS_SELECTOR) {
        Ok(Some(script)) => script,
        _ => {
            tracing::warn!("Block {} has no settings", unique_id);
            return None;
        }
    };
    let text = script.text_content().unwrap_or_default();
    match serde_json::from_str::<ViewerSettings>(&text) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::error!("Invalid settings for block {}: {}", unique_id, e);
            None
        }
    }
}

fn append_canvas(document: &Document, container: &Element, canvas_id: &str) -> Result<(), JsValue> {
    let canvas = document.create_element("canvas")?;
    canvas.set_id(canvas_id);
    canvas.set_attribute("style", "display: block; outline: none;")?;
    container.append_child(&canvas)?;
    Ok(())
}

fn element_size(element: &Element) -> (f32, f32) {
    (element.client_width() as f32, element.client_height() as f32)
}

/// Current box size of the container holding a canvas
pub fn container_size(canvas_id: &str) -> Option<(f32, f32)> {
    let canvas = document()?.get_element_by_id(canvas_id)?;
    canvas.parent_element().map(|container| element_size(&container))
}

/// Resolve a possibly relative URL against the page location
pub fn absolute_url(url: &str) -> String {
    let Some(base) = web_sys::window().and_then(|w| w.location().href().ok()) else {
        return url.to_string();
    };
    match web_sys::Url::new_with_base(url, &base) {
        Ok(resolved) => resolved.href(),
        Err(_) => url.to_string(),
    }
}

/// Raise `flag` whenever the browser window is resized
pub fn watch_resize(flag: Arc<AtomicBool>) {
    let Some(window) = web_sys::window() else {
        return;
    };
    let closure = Closure::<dyn FnMut(web_sys::Event)>::new(move |_event: web_sys::Event| {
        flag.store(true, Ordering::Release);
    });
    if let Err(e) = window.add_event_listener_with_callback("resize", closure.as_ref().unchecked_ref()) {
        tracing::error!("Failed to watch window resize: {:?}", e);
        return;
    }
    // Listener lives as long as the page
    closure.forget();
}
