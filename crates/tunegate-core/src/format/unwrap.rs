//! Container unwrapping.
//!
//! Each tool container is a header magic, a vendor metadata block and the
//! bare calibration image. Unwrapping validates the magic, skips the
//! metadata block and returns the image. Bare formats pass through.

use std::collections::BTreeMap;

use crate::format::detect::EcuFormat;

/// How a container stores its metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBlock {
    /// Fixed number of bytes directly after the magic.
    Fixed(usize),
    /// Little-endian u16 length prefix, then that many bytes.
    U16Le,
    /// Little-endian u32 length prefix, then that many bytes.
    U32Le,
}

/// Envelope description for one container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLayout {
    pub format: EcuFormat,
    pub magic: &'static [u8],
    pub metadata: MetadataBlock,
}

const LAYOUTS: [ContainerLayout; 4] = [
    ContainerLayout {
        format: EcuFormat::WoolichContainer,
        magic: b"WRTUNE\x01",
        metadata: MetadataBlock::Fixed(58),
    },
    ContainerLayout {
        format: EcuFormat::PowerVisionContainer,
        magic: b"PVV1",
        metadata: MetadataBlock::U16Le,
    },
    ContainerLayout {
        format: EcuFormat::HpTunersContainer,
        magic: b"HPTF",
        metadata: MetadataBlock::U32Le,
    },
    ContainerLayout {
        format: EcuFormat::FtEcuContainer,
        magic: b"FTECU\x00",
        metadata: MetadataBlock::Fixed(26),
    },
];

impl ContainerLayout {
    pub fn for_format(format: EcuFormat) -> Option<Self> {
        LAYOUTS.into_iter().find(|l| l.format == format)
    }

    /// Header size before any variable-length metadata.
    pub fn min_header_len(&self) -> usize {
        self.magic.len()
            + match self.metadata {
                MetadataBlock::Fixed(n) => n,
                MetadataBlock::U16Le => 2,
                MetadataBlock::U32Le => 4,
            }
    }

    fn unwrap<'a>(&self, bytes: &'a [u8]) -> Result<Unwrapped<'a>, UnwrapError> {
        if !bytes.starts_with(self.magic) {
            return Err(UnwrapError::MagicMissing {
                format: self.format,
            });
        }

        let after_magic = self.magic.len();
        let (meta_start, meta_len) = match self.metadata {
            MetadataBlock::Fixed(n) => (after_magic, n),
            MetadataBlock::U16Le => {
                let prefix = self.read_prefix::<2>(bytes, after_magic)?;
                (after_magic + 2, u16::from_le_bytes(prefix) as usize)
            }
            MetadataBlock::U32Le => {
                let prefix = self.read_prefix::<4>(bytes, after_magic)?;
                (after_magic + 4, u32::from_le_bytes(prefix) as usize)
            }
        };

        let payload_offset =
            meta_start
                .checked_add(meta_len)
                .ok_or(UnwrapError::MetadataTruncated {
                    format: self.format,
                    declared: meta_len,
                    available: bytes.len().saturating_sub(meta_start),
                })?;
        if payload_offset > bytes.len() {
            return Err(UnwrapError::MetadataTruncated {
                format: self.format,
                declared: meta_len,
                available: bytes.len().saturating_sub(meta_start),
            });
        }
        if payload_offset == bytes.len() {
            return Err(UnwrapError::EmptyPayload {
                format: self.format,
            });
        }

        Ok(Unwrapped {
            payload: &bytes[payload_offset..],
            payload_offset,
            metadata: parse_metadata(&bytes[meta_start..payload_offset]),
        })
    }

    fn read_prefix<const N: usize>(
        &self,
        bytes: &[u8],
        at: usize,
    ) -> Result<[u8; N], UnwrapError> {
        bytes
            .get(at..at + N)
            .and_then(|s| s.try_into().ok())
            .ok_or(UnwrapError::MetadataTruncated {
                format: self.format,
                declared: N,
                available: bytes.len().saturating_sub(at),
            })
    }
}

/// Inner calibration payload plus whatever vendor metadata could be read.
#[derive(Debug, Clone, PartialEq)]
pub struct Unwrapped<'a> {
    pub payload: &'a [u8],
    /// Offset of `payload` within the original upload.
    pub payload_offset: usize,
    /// Printable `key=value` pairs found in the metadata block.
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnwrapError {
    #[error("{format} header magic missing")]
    MagicMissing { format: EcuFormat },

    #[error("{format} metadata block truncated: declared {declared} bytes, {available} available")]
    MetadataTruncated {
        format: EcuFormat,
        declared: usize,
        available: usize,
    },

    #[error("{format} carries no payload after its metadata block")]
    EmptyPayload { format: EcuFormat },
}

/// Strip the container envelope, or pass bare formats through unchanged.
pub fn unwrap_payload(bytes: &[u8], format: EcuFormat) -> Result<Unwrapped<'_>, UnwrapError> {
    match format.container_layout() {
        Some(layout) => layout.unwrap(bytes),
        None => Ok(Unwrapped {
            payload: bytes,
            payload_offset: 0,
            metadata: BTreeMap::new(),
        }),
    }
}

/// Best-effort read of `key=value` pairs separated by NUL, `;` or newlines.
/// Non-printable content is ignored.
fn parse_metadata(block: &[u8]) -> BTreeMap<String, String> {
    block
        .split(|b| matches!(b, 0 | b';' | b'\n' | b'\r'))
        .filter_map(|field| std::str::from_utf8(field).ok())
        .filter(|field| field.chars().all(|c| c.is_ascii_graphic() || c == ' '))
        .filter_map(|field| field.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Vec<u8> {
        (0..1024u32).map(|i| (i % 200) as u8).collect()
    }

    #[test]
    fn bare_formats_pass_through() {
        let bytes = image();
        let out = unwrap_payload(&bytes, EcuFormat::BareBinary).unwrap();
        assert_eq!(out.payload, bytes.as_slice());
        assert_eq!(out.payload_offset, 0);
    }

    #[test]
    fn fixed_metadata_block_is_skipped() {
        let mut meta = b"vehicle=YZF-R1;tool=woolich".to_vec();
        meta.resize(58, 0);
        let mut bytes = b"WRTUNE\x01".to_vec();
        bytes.extend(&meta);
        bytes.extend(image());

        let out = unwrap_payload(&bytes, EcuFormat::WoolichContainer).unwrap();
        assert_eq!(out.payload, image().as_slice());
        assert_eq!(out.payload_offset, 65);
        assert_eq!(out.metadata.get("vehicle").map(String::as_str), Some("YZF-R1"));
        assert_eq!(out.metadata.get("tool").map(String::as_str), Some("woolich"));
    }

    #[test]
    fn u16_length_prefixed_metadata_is_skipped() {
        let meta = b"model=ZX-10R\nmanufacturer=Kawasaki";
        let mut bytes = b"PVV1".to_vec();
        bytes.extend((meta.len() as u16).to_le_bytes());
        bytes.extend(meta);
        bytes.extend(image());

        let out = unwrap_payload(&bytes, EcuFormat::PowerVisionContainer).unwrap();
        assert_eq!(out.payload, image().as_slice());
        assert_eq!(out.metadata.len(), 2);
    }

    #[test]
    fn u32_length_prefixed_metadata_is_skipped() {
        let mut bytes = b"HPTF".to_vec();
        bytes.extend(3u32.to_le_bytes());
        bytes.extend([1, 2, 3]);
        bytes.extend(image());

        let out = unwrap_payload(&bytes, EcuFormat::HpTunersContainer).unwrap();
        assert_eq!(out.payload.len(), 1024);
        assert!(out.metadata.is_empty());
    }

    #[test]
    fn missing_magic_fails() {
        let err = unwrap_payload(&image(), EcuFormat::FtEcuContainer).unwrap_err();
        assert_eq!(
            err,
            UnwrapError::MagicMissing {
                format: EcuFormat::FtEcuContainer
            }
        );
    }

    #[test]
    fn oversized_length_prefix_fails() {
        let mut bytes = b"HPTF".to_vec();
        bytes.extend(u32::MAX.to_le_bytes());
        bytes.extend(image());

        let err = unwrap_payload(&bytes, EcuFormat::HpTunersContainer).unwrap_err();
        assert!(matches!(err, UnwrapError::MetadataTruncated { .. }));
    }

    #[test]
    fn missing_length_prefix_fails() {
        let err = unwrap_payload(b"PVV1\x01", EcuFormat::PowerVisionContainer).unwrap_err();
        assert!(matches!(err, UnwrapError::MetadataTruncated { declared: 2, .. }));
    }

    #[test]
    fn header_without_payload_fails() {
        let mut bytes = b"FTECU\x00".to_vec();
        bytes.extend([0u8; 26]);
        let err = unwrap_payload(&bytes, EcuFormat::FtEcuContainer).unwrap_err();
        assert!(matches!(err, UnwrapError::EmptyPayload { .. }));
    }
}
