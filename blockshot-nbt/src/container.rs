//! Container decoding.
//!
//! An uploaded structure file is a gzip (or zlib) wrapped NBT tag tree. The
//! decoder inflates it, checks the leading bytes against [`TAG_TREE_MAGIC`]
//! and parses the tree. A header mismatch is logged and followed by a direct
//! parse attempt; only when that attempt fails too is the input rejected.

use std::io::Read;

use fastnbt::Value;
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use log::{debug, warn};
use thiserror::Error;

/// Expected first four bytes of a decompressed tag tree.
pub const TAG_TREE_MAGIC: [u8; 4] = [0x0A, 0x00, 0x00, 0x00];

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("tag tree header {header:02x?} does not match and direct parse failed: {source}")]
    FormatMismatch {
        header: Vec<u8>,
        #[source]
        source: fastnbt::error::Error,
    },
    #[error("tag tree parse failed: {0}")]
    TagTree(#[source] fastnbt::error::Error),
}

/// Wrapping format detected from the first bytes of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
}

/// Raw bytes as uploaded.
#[derive(Debug, Clone, Copy)]
pub struct StructureContainer<'a> {
    bytes: &'a [u8],
}

impl<'a> StructureContainer<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Compression marker, if the leading bytes carry a known one.
    pub fn compression(&self) -> Option<Compression> {
        match self.bytes {
            [0x1f, 0x8b, ..] => Some(Compression::Gzip),
            // zlib: CM=8 and the header checksum must divide by 31
            [cmf, flg, ..] if cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 => {
                Some(Compression::Zlib)
            }
            _ => None,
        }
    }

    pub fn decompress(&self) -> Result<Vec<u8>, ContainerError> {
        debug!(
            "Decoding container: {} bytes, compression {:?}",
            self.len(),
            self.compression()
        );
        if self.is_empty() {
            return Err(ContainerError::Decompression("container is empty".to_string()));
        }

        let mut out = Vec::new();
        let result = match self.compression() {
            Some(Compression::Gzip) => MultiGzDecoder::new(self.bytes).read_to_end(&mut out),
            Some(Compression::Zlib) => ZlibDecoder::new(self.bytes).read_to_end(&mut out),
            None => {
                return Err(ContainerError::Decompression(format!(
                    "unrecognised compression marker {:02x?}",
                    &self.bytes[..self.bytes.len().min(2)]
                )));
            }
        };
        result.map_err(|e| ContainerError::Decompression(e.to_string()))?;

        if out.is_empty() {
            return Err(ContainerError::Decompression(
                "container inflated to zero bytes".to_string(),
            ));
        }
        Ok(out)
    }
}

/// Decoded hierarchical key/value document.
#[derive(Debug, Clone, PartialEq)]
pub struct TagTree {
    root: Value,
}

impl TagTree {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_root(self) -> Value {
        self.root
    }
}

/// Validate, decompress and parse a container.
pub fn decode(bytes: &[u8]) -> Result<TagTree, ContainerError> {
    parse(&StructureContainer::new(bytes).decompress()?)
}

/// Parse an already inflated tag tree, falling back to a direct parse when
/// the header does not carry the expected magic.
pub fn parse(inflated: &[u8]) -> Result<TagTree, ContainerError> {
    let header = &inflated[..inflated.len().min(4)];
    debug!("Inflated to {} bytes, header {:02x?}", inflated.len(), header);

    if header == TAG_TREE_MAGIC {
        let root = fastnbt::from_bytes::<Value>(inflated).map_err(ContainerError::TagTree)?;
        return Ok(TagTree::new(root));
    }

    warn!(
        "Tag tree header {:02x?} does not match {:02x?}, attempting direct parse",
        header, TAG_TREE_MAGIC
    );
    match fastnbt::from_bytes::<Value>(inflated) {
        Ok(root) => Ok(TagTree::new(root)),
        Err(source) => Err(ContainerError::FormatMismatch {
            header: header.to_vec(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression as Level;
    use std::collections::HashMap;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Level::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_nbt() -> Vec<u8> {
        let mut root = HashMap::new();
        root.insert("Version".to_string(), Value::Int(6));
        fastnbt::to_bytes(&Value::Compound(root)).unwrap()
    }

    #[test]
    fn test_empty_input_is_decompression_error() {
        let err = decode(&[]).unwrap_err();
        assert!(matches!(err, ContainerError::Decompression(_)));
    }

    #[test]
    fn test_unknown_marker_is_decompression_error() {
        let err = decode(&[0x13, 0x37, 0x00, 0x42, 0x99, 0x01, 0x02, 0x03, 0x04, 0x05]).unwrap_err();
        assert!(matches!(err, ContainerError::Decompression(_)));
    }

    #[test]
    fn test_truncated_gzip_is_decompression_error() {
        let mut data = gzip(&sample_nbt());
        data.truncate(data.len() / 2);
        let err = decode(&data).unwrap_err();
        assert!(matches!(err, ContainerError::Decompression(_)));
    }

    #[test]
    fn test_compression_marker() {
        assert_eq!(StructureContainer::new(&gzip(b"x")).compression(), Some(Compression::Gzip));

        let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
        encoder.write_all(b"x").unwrap();
        let zlib = encoder.finish().unwrap();
        assert_eq!(StructureContainer::new(&zlib).compression(), Some(Compression::Zlib));

        assert_eq!(StructureContainer::new(&[0x0A, 0x00]).compression(), None);
    }

    #[test]
    fn test_mismatched_header_falls_back_to_direct_parse() {
        // Unnamed root compound: 0A 00 00 followed by the first field's tag id.
        let nbt = sample_nbt();
        assert_ne!(&nbt[..4], &TAG_TREE_MAGIC);

        let tree = decode(&gzip(&nbt)).expect("fallback parse should succeed");
        let Value::Compound(root) = tree.root() else {
            panic!("root should be a compound");
        };
        assert_eq!(root.get("Version"), Some(&Value::Int(6)));
    }

    #[test]
    fn test_mismatched_header_and_garbage_is_format_mismatch() {
        let err = decode(&gzip(b"definitely not a tag tree")).unwrap_err();
        match err {
            ContainerError::FormatMismatch { header, .. } => assert_eq!(header, b"defi".to_vec()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
