//! Intel HEX record decoding.
//!
//! Records are `:LLAAAATT<data>CC`. Every record is checksum-verified; the
//! data records are assembled into a flat image (gaps filled with 0xFF, the
//! erased-flash value) which is then searched like a bare binary, with a
//! higher confidence because the image bytes themselves are verified.

use crate::extract::manufacturer;
use crate::extract::pattern::{Endian, PatternScanner};
use crate::extract::{ExtractionStrategy, StrategyOutput, TextFormatError};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXT_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

/// Largest address span assembled into one image.
const MAX_IMAGE_SPAN: u64 = 64 * 1024 * 1024;

const SCANNER: PatternScanner = PatternScanner {
    endian_order: [Endian::Little, Endian::Big],
    base_confidence: 0.75,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexStrategy;

impl ExtractionStrategy for HexStrategy {
    fn name(&self) -> &'static str {
        "intel_hex"
    }

    fn extract(&self, payload: &[u8]) -> Result<StrategyOutput, TextFormatError> {
        let image = decode_image(payload)?;

        let mut output = StrategyOutput {
            tables: SCANNER.scan(&image.bytes, self.name()),
            ..Default::default()
        };
        output.metadata.manufacturer = manufacturer::identify(&image.bytes).map(str::to_string);
        output
            .metadata
            .extra
            .insert("image_base_address".into(), format!("0x{:08x}", image.base));

        Ok(output)
    }
}

/// A decoded flash image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexImage {
    pub base: u64,
    pub bytes: Vec<u8>,
}

/// Decode all records up to the EOF record into a contiguous image.
pub fn decode_image(payload: &[u8]) -> Result<HexImage, TextFormatError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| TextFormatError::new(0, format!("not valid text: {e}")))?;

    let mut chunks: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut upper: u64 = 0;
    let mut saw_eof = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let record = parse_record(line, line_no)?;
        match record.kind {
            RECORD_DATA => {
                chunks.push((upper + record.address as u64, record.data));
            }
            RECORD_EOF => {
                saw_eof = true;
                break;
            }
            RECORD_EXT_SEGMENT => {
                upper = (record.u16_payload(line_no)? as u64) << 4;
            }
            RECORD_EXT_LINEAR => {
                upper = (record.u16_payload(line_no)? as u64) << 16;
            }
            RECORD_START_SEGMENT | RECORD_START_LINEAR => {}
            other => {
                return Err(TextFormatError::new(
                    line_no,
                    format!("unknown record type 0x{other:02x}"),
                ));
            }
        }
    }

    if !saw_eof {
        return Err(TextFormatError::new(
            text.lines().count(),
            "missing end-of-file record",
        ));
    }
    if chunks.is_empty() {
        return Ok(HexImage {
            base: 0,
            bytes: vec![],
        });
    }

    let base = chunks.iter().map(|(a, _)| *a).min().unwrap_or(0);
    let end = chunks
        .iter()
        .map(|(a, d)| a + d.len() as u64)
        .max()
        .unwrap_or(base);
    if end - base > MAX_IMAGE_SPAN {
        return Err(TextFormatError::new(
            0,
            format!("address span of {} bytes is too large", end - base),
        ));
    }

    let mut bytes = vec![0xFFu8; (end - base) as usize];
    for (addr, data) in chunks {
        let start = (addr - base) as usize;
        bytes[start..start + data.len()].copy_from_slice(&data);
    }

    Ok(HexImage { base, bytes })
}

struct Record {
    address: u16,
    kind: u8,
    data: Vec<u8>,
}

impl Record {
    fn u16_payload(&self, line_no: usize) -> Result<u16, TextFormatError> {
        match self.data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(TextFormatError::new(
                line_no,
                format!("address record carries {} bytes, expected 2", self.data.len()),
            )),
        }
    }
}

fn parse_record(line: &str, line_no: usize) -> Result<Record, TextFormatError> {
    let Some(digits) = line.strip_prefix(':') else {
        return Err(TextFormatError::new(line_no, "record does not start with ':'"));
    };
    if digits.len() % 2 != 0 {
        return Err(TextFormatError::new(line_no, "odd number of hex digits"));
    }

    let bytes = hex::decode(digits)
        .map_err(|e| TextFormatError::new(line_no, format!("invalid hex digits: {e}")))?;
    if bytes.len() < 5 {
        return Err(TextFormatError::new(line_no, "record too short"));
    }

    let len = bytes[0] as usize;
    if bytes.len() != len + 5 {
        return Err(TextFormatError::new(
            line_no,
            format!("byte count {len} does not match record length {}", bytes.len() - 5),
        ));
    }

    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(TextFormatError::new(line_no, "checksum mismatch"));
    }

    Ok(Record {
        address: u16::from_be_bytes([bytes[1], bytes[2]]),
        kind: bytes[3],
        data: bytes[4..4 + len].to_vec(),
    })
}

/// Encode `data` at `base` as Intel HEX with 16-byte data records.
#[cfg(test)]
pub(crate) fn encode_image(base: u32, data: &[u8]) -> String {
    fn record(kind: u8, address: u16, data: &[u8]) -> String {
        let mut bytes = vec![data.len() as u8];
        bytes.extend(address.to_be_bytes());
        bytes.push(kind);
        bytes.extend(data);
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        bytes.push(sum.wrapping_neg());
        format!(":{}\n", hex::encode_upper(bytes))
    }

    let mut out = String::new();
    let mut upper = None;
    for (i, chunk) in data.chunks(16).enumerate() {
        let addr = base + (i * 16) as u32;
        let hi = (addr >> 16) as u16;
        if upper != Some(hi) {
            out.push_str(&record(RECORD_EXT_LINEAR, 0, &hi.to_be_bytes()));
            upper = Some(hi);
        }
        out.push_str(&record(RECORD_DATA, addr as u16, chunk));
    }
    out.push_str(&record(RECORD_EOF, 0, &[]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::model::TableKind;
    use crate::extract::pattern::tests::{encode_table, load_axis, rpm_axis};

    #[test]
    fn decodes_reference_record() {
        let text = ":10010000214601360121470136007EFE09D2190140\n:00000001FF\n";
        let image = decode_image(text.as_bytes()).unwrap();

        assert_eq!(image.base, 0x0100);
        assert_eq!(image.bytes.len(), 16);
        assert_eq!(image.bytes[0], 0x21);
        assert_eq!(image.bytes[15], 0x01);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let text = ":10010000214601360121470136007EFE09D2190141\n:00000001FF\n";
        let err = decode_image(text.as_bytes()).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("checksum"));
    }

    #[test]
    fn missing_eof_is_rejected() {
        let text = ":10010000214601360121470136007EFE09D2190140\n";
        let err = decode_image(text.as_bytes()).unwrap_err();
        assert!(err.message.contains("end-of-file"));
    }

    #[test]
    fn byte_count_mismatch_is_rejected() {
        let text = ":0201000021FF\n:00000001FF\n";
        assert!(decode_image(text.as_bytes()).is_err());
    }

    #[test]
    fn extended_linear_address_and_gaps() {
        let mut text = encode_image(0x0008_0000, &[1, 2, 3, 4]);
        text = text.replace(":00000001FF\n", "");
        text.push_str(&encode_image(0x0008_0010, &[9]));

        let image = decode_image(text.as_bytes()).unwrap();
        assert_eq!(image.base, 0x0008_0000);
        assert_eq!(image.bytes.len(), 0x11);
        assert_eq!(&image.bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(image.bytes[4], 0xFF);
        assert_eq!(image.bytes[0x10], 9);
    }

    #[test]
    fn encode_then_decode_preserves_bytes() {
        let data: Vec<u8> = (0..=255u8).collect();
        let image = decode_image(encode_image(0x1000, &data).as_bytes()).unwrap();
        assert_eq!(image.bytes, data);
    }

    #[test]
    fn strategy_locates_tables_in_decoded_image() {
        let mut data = vec![0u8; 256];
        data.extend(encode_table(
            Endian::Little,
            &rpm_axis(8),
            &load_axis(8),
            &[30u8; 64],
        ));
        data.extend(vec![0u8; 256]);
        let text = encode_image(0x0004_0000, &data);

        let out = HexStrategy.extract(text.as_bytes()).unwrap();
        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].kind, TableKind::Ignition);
        assert!((out.tables[0].confidence - 0.75).abs() < 1e-9);
        assert_eq!(
            out.metadata.extra.get("image_base_address").map(String::as_str),
            Some("0x00040000")
        );
    }
}
