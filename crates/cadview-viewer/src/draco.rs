//! Compressed mesh support
//!
//! Primitives using `KHR_draco_mesh_compression` are decoded before the
//! glTF loader sees the file: decoded indices and attributes are appended
//! to the binary chunk, their accessors repointed at the new data and the
//! extension removed. The decoding itself sits behind [`MeshDecoder`].

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::glb::{self, Glb, GlbError};

pub const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";

const ARRAY_BUFFER: u64 = 34962;
const ELEMENT_ARRAY_BUFFER: u64 = 34963;

#[derive(Error, Debug)]
pub enum DracoError {
    #[error(transparent)]
    Container(#[from] GlbError),
    #[error("Invalid glTF document: {0}")]
    Document(String),
    #[error("Mesh decoder unavailable: {0}")]
    Unavailable(String),
    #[error("Mesh decoding failed: {0}")]
    Decode(String),
}

fn invalid(message: impl Into<String>) -> DracoError {
    DracoError::Document(message.into())
}

/// Accessor component types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            5120 => Some(Self::I8),
            5121 => Some(Self::U8),
            5122 => Some(Self::I16),
            5123 => Some(Self::U16),
            5125 => Some(Self::U32),
            5126 => Some(Self::F32),
            _ => None,
        }
    }

    fn code(self) -> u64 {
        match self {
            Self::I8 => 5120,
            Self::U8 => 5121,
            Self::I16 => 5122,
            Self::U16 => 5123,
            Self::U32 => 5125,
            Self::F32 => 5126,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

fn component_count(accessor_type: &str) -> Option<usize> {
    match accessor_type {
        "SCALAR" => Some(1),
        "VEC2" => Some(2),
        "VEC3" => Some(3),
        "VEC4" | "MAT2" => Some(4),
        "MAT3" => Some(9),
        "MAT4" => Some(16),
        _ => None,
    }
}

/// One attribute to pull out of a compressed mesh
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRequest {
    pub semantic: String,
    /// Attribute id inside the compressed data
    pub unique_id: u32,
    pub components: usize,
    pub component_type: ComponentType,
}

/// Decoded triangle mesh. Attribute data is little-endian, in request
/// order, `vertex_count * components` values each.
#[derive(Debug, Clone, Default)]
pub struct DecodedMesh {
    pub indices: Vec<u32>,
    pub vertex_count: usize,
    pub attributes: Vec<Vec<u8>>,
}

pub trait MeshDecoder {
    fn decode(&mut self, data: &[u8], attributes: &[AttributeRequest]) -> Result<DecodedMesh, DracoError>;
}

/// Whether a glTF document needs decoding
pub fn uses_draco(json: &Value) -> bool {
    json.get("extensionsUsed")
        .and_then(Value::as_array)
        .is_some_and(|used| used.iter().any(|e| e.as_str() == Some(DRACO_EXTENSION)))
}

/// Whether `bytes` is a binary glTF file with compressed meshes
pub fn is_compressed(bytes: &[u8]) -> bool {
    Glb::parse(bytes).is_ok_and(|glb| uses_draco(&glb.json))
}

/// A primitive carrying the extension
struct CompressedPrimitive {
    mesh: usize,
    primitive: usize,
    buffer_view: usize,
    indices: Option<usize>,
    /// Semantic, id in the compressed data, accessor
    attributes: Vec<(String, u32, usize)>,
}

fn as_index(value: &Value) -> Option<usize> {
    value.as_u64().and_then(|v| usize::try_from(v).ok())
}

fn compressed_primitives(json: &Value) -> Result<Vec<CompressedPrimitive>, DracoError> {
    let mut found = Vec::new();
    let meshes = json.get("meshes").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();

    for (m, mesh) in meshes.iter().enumerate() {
        let primitives = mesh
            .get("primitives")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (p, primitive) in primitives.iter().enumerate() {
            let Some(extension) = primitive.pointer(&format!("/extensions/{DRACO_EXTENSION}")) else {
                continue;
            };
            let buffer_view = extension
                .get("bufferView")
                .and_then(as_index)
                .ok_or_else(|| invalid(format!("mesh {m} primitive {p}: missing compressed bufferView")))?;

            let ids = extension
                .get("attributes")
                .and_then(Value::as_object)
                .ok_or_else(|| invalid(format!("mesh {m} primitive {p}: missing compressed attributes")))?;

            let mut attributes = Vec::new();
            for (semantic, id) in ids {
                let id = id
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| invalid(format!("mesh {m} primitive {p}: bad id for {semantic}")))?;
                let accessor = primitive
                    .get("attributes")
                    .and_then(|a| a.get(semantic))
                    .and_then(as_index)
                    .ok_or_else(|| invalid(format!("mesh {m} primitive {p}: no accessor for {semantic}")))?;
                attributes.push((semantic.clone(), id, accessor));
            }

            found.push(CompressedPrimitive {
                mesh: m,
                primitive: p,
                buffer_view,
                indices: primitive.get("indices").and_then(as_index),
                attributes,
            });
        }
    }
    Ok(found)
}

fn indexed<'j>(json: &'j Value, collection: &str, index: usize) -> Result<&'j Value, DracoError> {
    json.get(collection)
        .and_then(|c| c.get(index))
        .ok_or_else(|| invalid(format!("{collection}[{index}] does not exist")))
}

fn indexed_mut<'j>(json: &'j mut Value, collection: &str, index: usize) -> Result<&'j mut Map<String, Value>, DracoError> {
    json.get_mut(collection)
        .and_then(|c| c.get_mut(index))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| invalid(format!("{collection}[{index}] does not exist")))
}

/// Bytes of a buffer view stored in the binary chunk
fn view_bytes<'b>(json: &Value, bin: &'b [u8], view: usize) -> Result<&'b [u8], DracoError> {
    let view_json = indexed(json, "bufferViews", view)?;
    if view_json.get("buffer").and_then(as_index) != Some(0) {
        return Err(invalid(format!("bufferViews[{view}] is not in the binary chunk")));
    }
    let offset = view_json.get("byteOffset").and_then(as_index).unwrap_or(0);
    let length = view_json
        .get("byteLength")
        .and_then(as_index)
        .ok_or_else(|| invalid(format!("bufferViews[{view}] has no byteLength")))?;
    offset
        .checked_add(length)
        .and_then(|end| bin.get(offset..end))
        .ok_or_else(|| invalid(format!("bufferViews[{view}] exceeds the binary chunk")))
}

fn attribute_request(json: &Value, semantic: &str, unique_id: u32, accessor: usize) -> Result<AttributeRequest, DracoError> {
    let accessor_json = indexed(json, "accessors", accessor)?;
    let component_type = accessor_json
        .get("componentType")
        .and_then(Value::as_u64)
        .and_then(ComponentType::from_code)
        .ok_or_else(|| invalid(format!("accessors[{accessor}] has an unknown componentType")))?;
    let components = accessor_json
        .get("type")
        .and_then(Value::as_str)
        .and_then(component_count)
        .ok_or_else(|| invalid(format!("accessors[{accessor}] has an unknown type")))?;

    Ok(AttributeRequest {
        semantic: semantic.to_string(),
        unique_id,
        components,
        component_type,
    })
}

/// Append data as a new buffer view, 4-byte aligned
fn push_view(json: &mut Value, bin: &mut Vec<u8>, data: &[u8], target: u64) -> Result<usize, DracoError> {
    bin.resize(bin.len().div_ceil(4) * 4, 0);
    let offset = bin.len();
    bin.extend_from_slice(data);

    let views = json
        .as_object_mut()
        .ok_or_else(|| invalid("document is not an object"))?
        .entry("bufferViews")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| invalid("bufferViews is not an array"))?;
    views.push(json!({
        "buffer": 0,
        "byteOffset": offset,
        "byteLength": data.len(),
        "target": target,
    }));
    Ok(views.len() - 1)
}

fn repoint_accessor(
    json: &mut Value,
    accessor: usize,
    view: usize,
    component_type: ComponentType,
    count: usize,
) -> Result<(), DracoError> {
    let accessor = indexed_mut(json, "accessors", accessor)?;
    accessor.insert("bufferView".to_string(), json!(view));
    accessor.remove("byteOffset");
    accessor.insert("componentType".to_string(), json!(component_type.code()));
    accessor.insert("count".to_string(), json!(count));
    Ok(())
}

fn drop_extension_name(json: &mut Value, list: &str) {
    let Some(object) = json.as_object_mut() else {
        return;
    };
    let now_empty = match object.get_mut(list).and_then(Value::as_array_mut) {
        Some(names) => {
            names.retain(|name| name.as_str() != Some(DRACO_EXTENSION));
            names.is_empty()
        }
        None => false,
    };
    if now_empty {
        object.remove(list);
    }
}

fn strip_primitive_extension(json: &mut Value, mesh: usize, primitive: usize) -> Result<(), DracoError> {
    let primitive = indexed_mut(json, "meshes", mesh)?
        .get_mut("primitives")
        .and_then(|p| p.get_mut(primitive))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| invalid(format!("meshes[{mesh}] lost primitive {primitive}")))?;

    let now_empty = match primitive.get_mut("extensions").and_then(Value::as_object_mut) {
        Some(extensions) => {
            extensions.remove(DRACO_EXTENSION);
            extensions.is_empty()
        }
        None => false,
    };
    if now_empty {
        primitive.remove("extensions");
    }
    Ok(())
}

/// Rewrite a binary glTF file so none of its meshes needs decoding.
/// Files without compressed meshes are returned unchanged.
pub fn decompress(bytes: &[u8], decoder: &mut dyn MeshDecoder) -> Result<Vec<u8>, DracoError> {
    let glb = Glb::parse(bytes)?;
    if !uses_draco(&glb.json) {
        return Ok(bytes.to_vec());
    }
    let source = glb.bin.ok_or_else(|| invalid("compressed meshes without a binary chunk"))?;
    let mut json = glb.json;
    let mut bin = source.to_vec();

    for primitive in compressed_primitives(&json)? {
        let requests = primitive
            .attributes
            .iter()
            .map(|(semantic, id, accessor)| attribute_request(&json, semantic, *id, *accessor))
            .collect::<Result<Vec<_>, _>>()?;

        let data = view_bytes(&json, source, primitive.buffer_view)?;
        let decoded = decoder.decode(data, &requests)?;
        if decoded.attributes.len() != requests.len() {
            return Err(DracoError::Decode(format!(
                "expected {} attributes, got {}",
                requests.len(),
                decoded.attributes.len()
            )));
        }

        if let Some(accessor) = primitive.indices {
            let indices: Vec<u8> = decoded.indices.iter().flat_map(|i| i.to_le_bytes()).collect();
            let view = push_view(&mut json, &mut bin, &indices, ELEMENT_ARRAY_BUFFER)?;
            repoint_accessor(&mut json, accessor, view, ComponentType::U32, decoded.indices.len())?;
        }

        for ((request, data), (_, _, accessor)) in requests.iter().zip(&decoded.attributes).zip(&primitive.attributes) {
            let expected = decoded.vertex_count * request.components * request.component_type.size();
            if data.len() != expected {
                return Err(DracoError::Decode(format!(
                    "{} has {} bytes, expected {}",
                    request.semantic,
                    data.len(),
                    expected
                )));
            }
            let view = push_view(&mut json, &mut bin, data, ARRAY_BUFFER)?;
            repoint_accessor(&mut json, *accessor, view, request.component_type, decoded.vertex_count)?;
        }

        strip_primitive_extension(&mut json, primitive.mesh, primitive.primitive)?;
    }

    drop_extension_name(&mut json, "extensionsUsed");
    drop_extension_name(&mut json, "extensionsRequired");
    indexed_mut(&mut json, "buffers", 0)?.insert("byteLength".to_string(), json!(bin.len()));

    Ok(glb::write(&json, Some(&bin))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPRESSED: &[u8] = b"DRACO-DATA\0\0";

    /// Stands in for the real decoder with a fixed triangle
    #[derive(Default)]
    struct TriangleDecoder {
        seen: Vec<(Vec<u8>, Vec<AttributeRequest>)>,
    }

    impl MeshDecoder for TriangleDecoder {
        fn decode(&mut self, data: &[u8], attributes: &[AttributeRequest]) -> Result<DecodedMesh, DracoError> {
            self.seen.push((data.to_vec(), attributes.to_vec()));
            let attributes = attributes
                .iter()
                .map(|request| match request.semantic.as_str() {
                    "POSITION" => [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
                        .iter()
                        .flatten()
                        .flat_map(|v| v.to_le_bytes())
                        .collect(),
                    _ => vec![0; 3 * request.components * request.component_type.size()],
                })
                .collect();
            Ok(DecodedMesh {
                indices: vec![0, 1, 2],
                vertex_count: 3,
                attributes,
            })
        }
    }

    fn compressed_file() -> Vec<u8> {
        let doc = json!({
            "asset": {"version": "2.0"},
            "extensionsUsed": [DRACO_EXTENSION, "KHR_materials_unlit"],
            "extensionsRequired": [DRACO_EXTENSION],
            "buffers": [{"byteLength": COMPRESSED.len()}],
            "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": COMPRESSED.len()}],
            "accessors": [
                {"componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0]},
                {"componentType": 5126, "count": 3, "type": "VEC3"},
                {"componentType": 5123, "count": 3, "type": "SCALAR"}
            ],
            "meshes": [{
                "primitives": [{
                    "attributes": {"POSITION": 0, "NORMAL": 1},
                    "indices": 2,
                    "extensions": {
                        DRACO_EXTENSION: {"bufferView": 0, "attributes": {"POSITION": 0, "NORMAL": 1}}
                    }
                }]
            }],
            "nodes": [{"mesh": 0}],
            "scenes": [{"nodes": [0]}]
        });
        glb::write(&doc, Some(COMPRESSED)).unwrap()
    }

    fn accessor_bytes<'b>(json: &Value, bin: &'b [u8], accessor: usize) -> &'b [u8] {
        let view = json["accessors"][accessor]["bufferView"].as_u64().unwrap() as usize;
        view_bytes(json, bin, view).unwrap()
    }

    #[test]
    fn test_decompress_rewrites_primitive() {
        let file = compressed_file();
        assert!(is_compressed(&file));

        let mut decoder = TriangleDecoder::default();
        let output = decompress(&file, &mut decoder).unwrap();
        assert!(!is_compressed(&output));

        let (data, requests) = &decoder.seen[0];
        assert_eq!(&data[..], COMPRESSED);
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.components == 3 && r.component_type == ComponentType::F32));

        let glb = Glb::parse(&output).unwrap();
        let json = &glb.json;
        let bin = glb.bin.unwrap();
        assert_eq!(json["extensionsUsed"], json!(["KHR_materials_unlit"]));
        assert!(json.get("extensionsRequired").is_none());
        assert!(json["meshes"][0]["primitives"][0].get("extensions").is_none());
        assert_eq!(json["buffers"][0]["byteLength"].as_u64().unwrap() as usize % 4, 0);

        let indices = &json["accessors"][2];
        assert_eq!(indices["componentType"], json!(5125));
        assert_eq!(indices["count"], json!(3));
        let index_bytes: Vec<u8> = [0u32, 1, 2].iter().flat_map(|i| i.to_le_bytes()).collect();
        assert_eq!(accessor_bytes(json, bin, 2), &index_bytes[..]);

        let positions = accessor_bytes(json, bin, 0);
        assert_eq!(positions.len(), 36);
        assert_eq!(f32::from_le_bytes(positions[12..16].try_into().unwrap()), 1.0);
        // Bounds are kept for the loader
        assert_eq!(json["accessors"][0]["max"], json!([1, 1, 0]));
    }

    #[test]
    fn test_plain_files_pass_through() {
        let plain = glb::write(&json!({"asset": {"version": "2.0"}}), None).unwrap();
        let mut decoder = TriangleDecoder::default();
        assert_eq!(decompress(&plain, &mut decoder).unwrap(), plain);
        assert!(decoder.seen.is_empty());
    }

    #[test]
    fn test_short_attribute_data_is_rejected() {
        struct ShortDecoder;
        impl MeshDecoder for ShortDecoder {
            fn decode(&mut self, _: &[u8], attributes: &[AttributeRequest]) -> Result<DecodedMesh, DracoError> {
                Ok(DecodedMesh {
                    indices: vec![0, 1, 2],
                    vertex_count: 3,
                    attributes: attributes.iter().map(|_| vec![0; 4]).collect(),
                })
            }
        }
        assert!(matches!(
            decompress(&compressed_file(), &mut ShortDecoder),
            Err(DracoError::Decode(_))
        ));
    }

    #[test]
    fn test_missing_accessor_is_rejected() {
        let mut doc = Glb::parse(&compressed_file()).unwrap().json;
        doc["meshes"][0]["primitives"][0]["attributes"]
            .as_object_mut()
            .unwrap()
            .remove("NORMAL");
        let file = glb::write(&doc, Some(COMPRESSED)).unwrap();
        assert!(matches!(
            decompress(&file, &mut TriangleDecoder::default()),
            Err(DracoError::Document(_))
        ));
    }
}
