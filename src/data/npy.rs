//! Minimal reader/writer for NumPy `.npy` arrays.
//!
//! # File layout
//! ```text
//! bytes 0-5:   0x93 'N' 'U' 'M' 'P' 'Y'
//! byte  6:     major version (1, 2 or 3)
//! byte  7:     minor version
//! bytes 8-9:   header length, little-endian u16   (version 1)
//! bytes 8-11:  header length, little-endian u32   (versions 2 and 3)
//! header:      Python dict literal, e.g.
//!              {'descr': '<f4', 'fortran_order': False, 'shape': (10, 6, 8, 9, 5), }
//! data:        numel × itemsize bytes, C order
//! ```
//!
//! Only little-endian (or byte-order-free) bool, integer and float dtypes in
//! C order are accepted. Every element is widened/narrowed to `f32`.
use std::fs;
use std::path::Path;

use crate::error::{EegError, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// A decoded array: its shape and its elements as `f32`, in C order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    Bool,
    Int(usize),
    UInt(usize),
    Float(usize),
}

impl Dtype {
    fn parse(descr: &str) -> Result<Dtype> {
        let unrecognized = || EegError::Npy(format!("unrecognized dtype '{descr}'"));
        let mut chars = descr.chars();
        match chars.next() {
            Some('>') => return Err(EegError::Npy(format!("big-endian dtype '{descr}' is not supported"))),
            Some('<' | '|' | '=') => {}
            _ => return Err(unrecognized()),
        }
        let kind = chars.next().ok_or_else(unrecognized)?;
        let size: usize = chars.as_str().parse().map_err(|_| unrecognized())?;
        match (kind, size) {
            ('b', 1) => Ok(Dtype::Bool),
            ('i', 1 | 2 | 4 | 8) => Ok(Dtype::Int(size)),
            ('u', 1 | 2 | 4 | 8) => Ok(Dtype::UInt(size)),
            ('f', 4 | 8) => Ok(Dtype::Float(size)),
            _ => Err(EegError::Npy(format!("unsupported dtype '{descr}'"))),
        }
    }

    fn itemsize(self) -> usize {
        match self {
            Dtype::Bool => 1,
            Dtype::Int(n) | Dtype::UInt(n) | Dtype::Float(n) => n,
        }
    }

    fn decode(self, b: &[u8]) -> f32 {
        match self {
            Dtype::Bool => if b[0] != 0 { 1.0 } else { 0.0 },
            Dtype::Int(1) => b[0] as i8 as f32,
            Dtype::Int(2) => i16::from_le_bytes([b[0], b[1]]) as f32,
            Dtype::Int(4) => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            Dtype::Int(_) => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32,
            Dtype::UInt(1) => b[0] as f32,
            Dtype::UInt(2) => u16::from_le_bytes([b[0], b[1]]) as f32,
            Dtype::UInt(4) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            Dtype::UInt(_) => u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32,
            Dtype::Float(4) => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Dtype::Float(_) => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32,
        }
    }
}

/// Returns the text following `'key':` in the header dict.
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| EegError::Npy(format!("header is missing '{key}'")))?;
    Ok(header[start + needle.len()..].trim_start())
}

fn parse_descr(header: &str) -> Result<Dtype> {
    let value = header_value(header, "descr")?;
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| EegError::Npy("'descr' is not a string".into()))?;
    let end = value[1..]
        .find(quote)
        .ok_or_else(|| EegError::Npy("unterminated 'descr' string".into()))?;
    Dtype::parse(&value[1..1 + end])
}

fn parse_fortran_order(header: &str) -> Result<bool> {
    let value = header_value(header, "fortran_order")?;
    if value.starts_with("True") {
        Ok(true)
    } else if value.starts_with("False") {
        Ok(false)
    } else {
        Err(EegError::Npy("'fortran_order' is not a bool".into()))
    }
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {
    let value = header_value(header, "shape")?;
    if !value.starts_with('(') {
        return Err(EegError::Npy("'shape' is not a tuple".into()));
    }
    let end = value
        .find(')')
        .ok_or_else(|| EegError::Npy("unterminated 'shape' tuple".into()))?;
    value[1..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| EegError::Npy(format!("bad dimension '{s}' in 'shape'")))
        })
        .collect()
}

/// Decodes a complete `.npy` file held in memory.
pub fn parse_npy(bytes: &[u8]) -> Result<NpyArray> {
    // ── Preamble ────────────────────────────────────────────────────────────

    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(EegError::Npy("missing \\x93NUMPY magic".into()));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10usize),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(EegError::Npy("truncated preamble".into()));
            }
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => return Err(EegError::Npy(format!("unsupported format version {v}"))),
    };
    let data_start = header_start
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| EegError::Npy(format!("header declares {header_len} bytes past end of file")))?;

    // ── Header dict ─────────────────────────────────────────────────────────

    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .map_err(|_| EegError::Npy("header is not valid text".into()))?;
    let dtype = parse_descr(header)?;
    if parse_fortran_order(header)? {
        return Err(EegError::Npy("Fortran-ordered arrays are not supported".into()));
    }
    let shape = parse_shape(header)?;

    // ── Payload ─────────────────────────────────────────────────────────────

    let numel = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| EegError::Npy(format!("shape {shape:?} overflows usize")))?;
    let needed = numel
        .checked_mul(dtype.itemsize())
        .ok_or_else(|| EegError::Npy(format!("shape {shape:?} overflows usize")))?;
    let payload = &bytes[data_start..];
    if payload.len() < needed {
        return Err(EegError::Npy(format!(
            "payload too short: shape {:?} needs {} bytes, file has {}",
            shape, needed, payload.len()
        )));
    }

    let data = payload[..needed]
        .chunks_exact(dtype.itemsize())
        .map(|b| dtype.decode(b))
        .collect();
    Ok(NpyArray { shape, data })
}

pub fn read_npy(path: impl AsRef<Path>) -> Result<NpyArray> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    parse_npy(&bytes).map_err(|e| match e {
        EegError::Npy(msg) => EegError::Npy(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Encodes `data` as a version 1.0 `<f4` array of `shape`.
pub fn encode_npy(shape: &[usize], data: &[f32]) -> Result<Vec<u8>> {
    let numel: usize = shape.iter().product();
    if numel != data.len() {
        return Err(EegError::shape_mismatch("encode_npy", &[numel], &[data.len()]));
    }
    let dims = match shape {
        [d] => format!("({d},)"),
        _ => format!("({})", shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")),
    };
    let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {dims}, }}");
    // Pad so the payload starts on a 64-byte boundary; the header ends in '\n'.
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| EegError::Npy(format!("header for shape {shape:?} is too long")))?;

    let mut out = Vec::with_capacity(10 + header.len() + data.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

pub fn write_npy(path: impl AsRef<Path>, shape: &[usize], data: &[f32]) -> Result<()> {
    fs::write(path, encode_npy(shape, data)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(descr: &str, shape: &str, fortran: &str, payload: &[u8]) -> Vec<u8> {
        let header = format!("{{'descr': '{descr}', 'fortran_order': {fortran}, 'shape': {shape}, }}\n");
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn encoded_header_is_aligned_and_readable() {
        let data: Vec<f32> = (0..24).map(|i| i as f32 * 0.5).collect();
        let bytes = encode_npy(&[2, 3, 4], &data).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');

        let back = parse_npy(&bytes).unwrap();
        assert_eq!(back.shape, vec![2, 3, 4]);
        assert_eq!(back.data, data);
    }

    #[test]
    fn int64_labels_decode() {
        let payload: Vec<u8> = [0i64, 3, 1].iter().flat_map(|v| v.to_le_bytes()).collect();
        let arr = parse_npy(&raw("<i8", "(3,)", "False", &payload)).unwrap();
        assert_eq!(arr.shape, vec![3]);
        assert_eq!(arr.data, vec![0.0, 3.0, 1.0]);
    }

    #[test]
    fn float64_features_decode() {
        let payload: Vec<u8> = [1.5f64, -2.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        let arr = parse_npy(&raw("<f8", "(1, 2)", "False", &payload)).unwrap();
        assert_eq!(arr.data, vec![1.5, -2.25]);
    }

    #[test]
    fn rejects_unsupported_layouts() {
        let payload = [0u8; 8];
        assert!(parse_npy(&raw("<f4", "(2,)", "True", &payload)).is_err());
        assert!(parse_npy(&raw(">f4", "(2,)", "False", &payload)).is_err());
        assert!(parse_npy(&raw("<c8", "(1,)", "False", &payload)).is_err());
        // payload shorter than the declared shape
        assert!(parse_npy(&raw("<f4", "(3,)", "False", &payload)).is_err());
        assert!(parse_npy(b"not an npy file").is_err());
    }

    #[test]
    fn non_ascii_descr_is_an_error() {
        let payload = [0u8; 8];
        for descr in ["é4", "<é4", "<f\u{2074}", "<", ""] {
            let err = parse_npy(&raw(descr, "(2,)", "False", &payload)).unwrap_err();
            assert!(matches!(err, EegError::Npy(_)), "{descr}: {err}");
        }
    }

    #[test]
    fn version_two_header_decodes() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (2,), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[2, 0]);
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        for v in [0.5f32, -1.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let arr = parse_npy(&bytes).unwrap();
        assert_eq!(arr.shape, vec![2]);
        assert_eq!(arr.data, vec![0.5, -1.0]);
    }

    #[test]
    fn one_dim_shape_keeps_trailing_comma() {
        let bytes = encode_npy(&[3], &[1.0, 2.0, 3.0]).unwrap();
        let text = String::from_utf8_lossy(&bytes[10..]);
        assert!(text.contains("'shape': (3,)"));
    }
}
