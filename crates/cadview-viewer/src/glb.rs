//! Binary glTF container

use serde_json::Value;
use thiserror::Error;

const MAGIC: u32 = 0x4654_6C67;
const VERSION: u32 = 2;
const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

#[derive(Error, Debug)]
pub enum GlbError {
    #[error("Not a binary glTF file")]
    NotGlb,
    #[error("Unsupported container version {0}")]
    Version(u32),
    #[error("Truncated container")]
    Truncated,
    #[error("Missing JSON chunk")]
    MissingJson,
    #[error("Container too large")]
    TooLarge,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parsed container, the binary chunk borrowed from the input
#[derive(Debug)]
pub struct Glb<'a> {
    pub json: Value,
    pub bin: Option<&'a [u8]>,
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, GlbError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(GlbError::Truncated)
}

impl<'a> Glb<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, GlbError> {
        if read_u32(bytes, 0)? != MAGIC {
            return Err(GlbError::NotGlb);
        }
        let version = read_u32(bytes, 4)?;
        if version != VERSION {
            return Err(GlbError::Version(version));
        }
        let length = read_u32(bytes, 8)? as usize;
        let bytes = bytes.get(..length).ok_or(GlbError::Truncated)?;

        let mut json = None;
        let mut bin = None;
        let mut offset = HEADER_LEN;
        while offset + CHUNK_HEADER_LEN <= bytes.len() {
            let chunk_len = read_u32(bytes, offset)? as usize;
            let chunk_type = read_u32(bytes, offset + 4)?;
            let start = offset + CHUNK_HEADER_LEN;
            let end = start.checked_add(chunk_len).ok_or(GlbError::Truncated)?;
            let data = bytes.get(start..end).ok_or(GlbError::Truncated)?;

            match chunk_type {
                CHUNK_JSON if json.is_none() => json = Some(serde_json::from_slice(data)?),
                CHUNK_BIN if bin.is_none() => bin = Some(data),
                // Unknown chunks are skipped
                _ => {}
            }
            offset = end;
        }

        Ok(Self {
            json: json.ok_or(GlbError::MissingJson)?,
            bin,
        })
    }
}

fn chunk_header(out: &mut Vec<u8>, len: usize, chunk_type: u32) -> Result<(), GlbError> {
    let len = u32::try_from(len).map_err(|_| GlbError::TooLarge)?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&chunk_type.to_le_bytes());
    Ok(())
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

/// Serialize a container. The JSON chunk is padded with spaces, the
/// binary chunk with zeros.
pub fn write(json: &Value, bin: Option<&[u8]>) -> Result<Vec<u8>, GlbError> {
    let mut text = serde_json::to_vec(json)?;
    text.resize(padded_len(text.len()), b' ');

    let bin_len = bin.map_or(0, |b| CHUNK_HEADER_LEN + padded_len(b.len()));
    let total = HEADER_LEN + CHUNK_HEADER_LEN + text.len() + bin_len;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&u32::try_from(total).map_err(|_| GlbError::TooLarge)?.to_le_bytes());

    chunk_header(&mut out, text.len(), CHUNK_JSON)?;
    out.extend_from_slice(&text);

    if let Some(bin) = bin {
        let len = padded_len(bin.len());
        chunk_header(&mut out, len, CHUNK_BIN)?;
        out.extend_from_slice(bin);
        out.resize(out.len() + len - bin.len(), 0);
    }
    Ok(out)
}
