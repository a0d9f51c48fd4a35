//! Bindings to the page's Draco decoder module
//!
//! The page loads `draco_decoder.js`, which defines the global
//! `DracoDecoderModule` factory. The module is instantiated once and shared
//! by every viewer on the page.

use js_sys::{Array, Function, Int8Array, Object, Promise, Reflect, Uint8Array};
use std::cell::RefCell;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::draco::{AttributeRequest, ComponentType, DecodedMesh, DracoError, MeshDecoder};

const FACTORY: &str = "DracoDecoderModule";

thread_local! {
    static MODULE: RefCell<Option<Promise>> = const { RefCell::new(None) };
}

fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

fn get(target: &JsValue, key: &str) -> Result<JsValue, DracoError> {
    Reflect::get(target, &JsValue::from_str(key)).map_err(|e| DracoError::Decode(describe(&e)))
}

fn function(target: &JsValue, name: &str) -> Result<Function, DracoError> {
    get(target, name)?
        .dyn_into()
        .map_err(|_| DracoError::Decode(format!("{name} is not a function")))
}

fn call(target: &JsValue, method: &str, args: &[&JsValue]) -> Result<JsValue, DracoError> {
    let args: Array = args.iter().copied().collect();
    Reflect::apply(&function(target, method)?, target, &args)
        .map_err(|e| DracoError::Decode(format!("{method}: {}", describe(&e))))
}

fn count(value: JsValue, what: &str) -> Result<usize, DracoError> {
    value
        .as_f64()
        .filter(|v| *v >= 0.0)
        .map(|v| v as usize)
        .ok_or_else(|| DracoError::Decode(format!("{what} is not a count")))
}

fn is_null(object: &JsValue) -> Result<bool, DracoError> {
    Ok(get(object, "ptr")?.as_f64().is_none_or(|ptr| ptr == 0.0))
}

/// Module object released when dropped
struct Owned<'m> {
    module: &'m JsValue,
    object: JsValue,
}

impl<'m> Owned<'m> {
    fn new(module: &'m JsValue, class: &str) -> Result<Self, DracoError> {
        let object = Reflect::construct(&function(module, class)?, &Array::new())
            .map_err(|e| DracoError::Decode(format!("new {class}: {}", describe(&e))))?;
        Ok(Self { module, object })
    }
}

impl Drop for Owned<'_> {
    fn drop(&mut self) {
        if let Err(e) = call(self.module, "destroy", &[&self.object]) {
            tracing::warn!("Failed to release decoder object: {}", e);
        }
    }
}

/// Allocation on the module heap
struct Allocation<'m> {
    module: &'m JsValue,
    ptr: JsValue,
    len: usize,
}

impl<'m> Allocation<'m> {
    fn new(module: &'m JsValue, len: usize) -> Result<Self, DracoError> {
        let ptr = call(module, "_malloc", &[&JsValue::from(len as u32)])?;
        Ok(Self { module, ptr, len })
    }

    fn read(&self) -> Result<Vec<u8>, DracoError> {
        // Re-read after every allocation, memory growth replaces the view
        let heap: Uint8Array = get(self.module, "HEAPU8")?
            .dyn_into()
            .map_err(|_| DracoError::Decode("HEAPU8 is not a byte array".to_string()))?;
        let start = count(self.ptr.clone(), "heap pointer")? as u32;
        Ok(heap.subarray(start, start + self.len as u32).to_vec())
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if let Err(e) = call(self.module, "_free", &[&self.ptr]) {
            tracing::warn!("Failed to free decoder memory: {}", e);
        }
    }
}

fn data_type(module: &JsValue, component_type: ComponentType) -> Result<JsValue, DracoError> {
    let name = match component_type {
        ComponentType::I8 => "DT_INT8",
        ComponentType::U8 => "DT_UINT8",
        ComponentType::I16 => "DT_INT16",
        ComponentType::U16 => "DT_UINT16",
        ComponentType::U32 => "DT_UINT32",
        ComponentType::F32 => "DT_FLOAT32",
    };
    get(module, name)
}

/// Instantiated decoder module
pub struct DracoModule(JsValue);

/// Instantiate the decoder module, or reuse the one already loading
pub async fn load_module() -> Result<DracoModule, DracoError> {
    let promise = MODULE.with(|cell| cell.borrow_mut().get_or_insert_with(instantiate).clone());
    let wrapper = JsFuture::from(promise)
        .await
        .map_err(|e| DracoError::Unavailable(describe(&e)))?;
    Ok(DracoModule(get(&wrapper, "module")?))
}

fn instantiate() -> Promise {
    Promise::new(&mut |resolve, reject| {
        if let Err(e) = start_module(resolve) {
            if let Err(e) = reject.call1(&JsValue::NULL, &JsValue::from_str(&e.to_string())) {
                tracing::error!("Failed to report decoder failure: {}", describe(&e));
            }
        }
    })
}

fn start_module(resolve: Function) -> Result<(), DracoError> {
    let factory: Function = get(&js_sys::global(), FACTORY)?
        .dyn_into()
        .map_err(|_| DracoError::Unavailable(format!("{FACTORY} is not loaded")))?;

    // The module is thenable, so it travels inside a wrapper object
    let loaded = Closure::once_into_js(move |module: JsValue| {
        let wrapper = Object::new();
        let handed_over = Reflect::set(&wrapper, &JsValue::from_str("module"), &module)
            .and_then(|_| resolve.call1(&JsValue::NULL, &wrapper));
        if let Err(e) = handed_over {
            tracing::error!("Failed to hand over decoder module: {}", describe(&e));
        }
    });

    let config = Object::new();
    Reflect::set(&config, &JsValue::from_str("onModuleLoaded"), &loaded)
        .map_err(|e| DracoError::Unavailable(describe(&e)))?;
    factory
        .call1(&JsValue::NULL, &config)
        .map_err(|e| DracoError::Unavailable(describe(&e)))?;
    Ok(())
}

impl MeshDecoder for DracoModule {
    fn decode(&mut self, data: &[u8], attributes: &[AttributeRequest]) -> Result<DecodedMesh, DracoError> {
        let module = &self.0;
        let decoder = Owned::new(module, "Decoder")?;
        let mesh = Owned::new(module, "Mesh")?;

        let bytes = Uint8Array::from(data);
        let array: JsValue = Int8Array::new(&bytes.buffer()).into();
        let status = call(
            &decoder.object,
            "DecodeArrayToMesh",
            &[&array, &JsValue::from(data.len() as u32), &mesh.object],
        )?;
        let ok = call(&status, "ok", &[])?.as_bool().unwrap_or(false);
        if !ok || is_null(&mesh.object)? {
            let message = call(&status, "error_msg", &[])
                .ok()
                .and_then(|m| m.as_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(DracoError::Decode(message));
        }

        let faces = count(call(&mesh.object, "num_faces", &[])?, "face count")?;
        let vertex_count = count(call(&mesh.object, "num_points", &[])?, "point count")?;

        let index_count = faces * 3;
        let triangles = Allocation::new(module, index_count * 4)?;
        call(
            &decoder.object,
            "GetTrianglesUInt32Array",
            &[&mesh.object, &JsValue::from((index_count * 4) as u32), &triangles.ptr],
        )?;
        let indices = triangles
            .read()?
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        drop(triangles);

        let mut decoded = Vec::with_capacity(attributes.len());
        for request in attributes {
            let attribute = call(
                &decoder.object,
                "GetAttributeByUniqueId",
                &[&mesh.object, &JsValue::from(request.unique_id)],
            )?;
            if is_null(&attribute)? {
                return Err(DracoError::Decode(format!("{} is missing", request.semantic)));
            }
            let components = count(call(&attribute, "num_components", &[])?, "component count")?;
            if components != request.components {
                return Err(DracoError::Decode(format!(
                    "{} has {} components, expected {}",
                    request.semantic, components, request.components
                )));
            }

            let len = vertex_count * components * request.component_type.size();
            let values = Allocation::new(module, len)?;
            call(
                &decoder.object,
                "GetAttributeDataArrayForAllPoints",
                &[
                    &mesh.object,
                    &attribute,
                    &data_type(module, request.component_type)?,
                    &JsValue::from(len as u32),
                    &values.ptr,
                ],
            )?;
            decoded.push(values.read()?);
        }

        Ok(DecodedMesh {
            indices,
            vertex_count,
            attributes: decoded,
        })
    }
}
