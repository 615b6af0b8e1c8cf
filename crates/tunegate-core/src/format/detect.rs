//! File-type classification.
//!
//! Detection is two-layered: the extension is a hint, the content signature
//! is authoritative where one exists. Formats without a reliable signature
//! fall back to the extension plus their minimum plausible size.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::format::unwrap::ContainerLayout;
use crate::safety::catalog::{FindingSource, RuleId, SafetyFinding, Severity};

/// Closed set of accepted tune-file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcuFormat {
    BareBinary,
    IntelHex,
    MapText,
    BdmDump,
    WoolichContainer,
    PowerVisionContainer,
    HpTunersContainer,
    FtEcuContainer,
}

impl EcuFormat {
    pub const ALL: [EcuFormat; 8] = [
        EcuFormat::BareBinary,
        EcuFormat::IntelHex,
        EcuFormat::MapText,
        EcuFormat::BdmDump,
        EcuFormat::WoolichContainer,
        EcuFormat::PowerVisionContainer,
        EcuFormat::HpTunersContainer,
        EcuFormat::FtEcuContainer,
    ];

    pub const CONTAINERS: [EcuFormat; 4] = [
        EcuFormat::WoolichContainer,
        EcuFormat::PowerVisionContainer,
        EcuFormat::HpTunersContainer,
        EcuFormat::FtEcuContainer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EcuFormat::BareBinary => "bare_binary",
            EcuFormat::IntelHex => "intel_hex",
            EcuFormat::MapText => "map_text",
            EcuFormat::BdmDump => "bdm_dump",
            EcuFormat::WoolichContainer => "woolich_container",
            EcuFormat::PowerVisionContainer => "power_vision_container",
            EcuFormat::HpTunersContainer => "hp_tuners_container",
            EcuFormat::FtEcuContainer => "ftecu_container",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            EcuFormat::BareBinary => &["bin", "ori"],
            EcuFormat::IntelHex => &["hex", "ihx"],
            EcuFormat::MapText => &["map", "cal"],
            EcuFormat::BdmDump => &["bdm"],
            EcuFormat::WoolichContainer => &["wrf"],
            EcuFormat::PowerVisionContainer => &["pvv"],
            EcuFormat::HpTunersContainer => &["hpt"],
            EcuFormat::FtEcuContainer => &["fte"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EcuFormat::BareBinary => "Bare ECU flash/calibration binary",
            EcuFormat::IntelHex => "Intel HEX record-encoded flash image",
            EcuFormat::MapText => "Calibration map text export",
            EcuFormat::BdmDump => "BDM chip read-out",
            EcuFormat::WoolichContainer => "Woolich Racing tune container",
            EcuFormat::PowerVisionContainer => "Dynojet Power Vision tune container",
            EcuFormat::HpTunersContainer => "HP Tuners tune container",
            EcuFormat::FtEcuContainer => "FTEcu tune container",
        }
    }

    /// Smallest buffer that could hold a real calibration table.
    pub fn min_size(&self) -> usize {
        const BINARY_IMAGE_MIN: usize = 1024;
        match self {
            EcuFormat::BareBinary => BINARY_IMAGE_MIN,
            EcuFormat::IntelHex => 44,
            EcuFormat::MapText => 32,
            EcuFormat::BdmDump => 2048,
            container => {
                container
                    .container_layout()
                    .map(|l| l.min_header_len())
                    .unwrap_or(0)
                    + BINARY_IMAGE_MIN
            }
        }
    }

    pub fn container_layout(&self) -> Option<ContainerLayout> {
        ContainerLayout::for_format(*self)
    }

    pub fn is_container(&self) -> bool {
        self.container_layout().is_some()
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extensions().contains(&ext.as_str()))
    }
}

impl fmt::Display for EcuFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted extension, as returned by the companion query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub extension: String,
    pub format: EcuFormat,
    pub description: String,
    pub min_size_bytes: usize,
}

/// Closed set of supported extensions, in declaration order.
pub fn supported_formats() -> Vec<FormatDescriptor> {
    EcuFormat::ALL
        .into_iter()
        .flat_map(|format| {
            format.extensions().iter().map(move |ext| FormatDescriptor {
                extension: (*ext).to_string(),
                format,
                description: format.description().to_string(),
                min_size_bytes: format.min_size(),
            })
        })
        .collect()
}

/// Result of a successful detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub format: EcuFormat,
    /// Whether a content signature confirmed the format. `false` means the
    /// extension alone decided it.
    pub signature_verified: bool,
    /// Findings carried forward into the assessment (e.g. mislabeled exports).
    pub findings: Vec<SafetyFinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatRejection {
    #[error("unsupported extension '.{0}'")]
    UnknownExtension(String),

    #[error("{format} requires at least {min} bytes, got {actual}")]
    TooSmall {
        format: EcuFormat,
        min: usize,
        actual: usize,
    },
}

/// Classify `bytes` declared with `extension`.
pub fn detect(bytes: &[u8], extension: &str) -> Result<Detection, FormatRejection> {
    let declared = EcuFormat::from_extension(extension)
        .ok_or_else(|| FormatRejection::UnknownExtension(extension.to_string()))?;

    let sniffed = sniff(bytes);
    let mut findings = Vec::new();

    let (format, signature_verified) = match sniffed {
        Some(found) if found == declared => (found, true),
        Some(found) => {
            findings.push(SafetyFinding::structural(
                RuleId::SFmt01,
                Severity::Moderate,
                FindingSource::Detector,
                format!(
                    "extension '.{extension}' declares {declared} but content signature is {found}"
                ),
                json!({ "declared": declared, "detected": found }),
            ));
            (found, true)
        }
        None => (declared, false),
    };

    if bytes.len() < format.min_size() {
        return Err(FormatRejection::TooSmall {
            format,
            min: format.min_size(),
            actual: bytes.len(),
        });
    }

    Ok(Detection {
        format,
        signature_verified,
        findings,
    })
}

/// Content signature, where the format has one.
fn sniff(bytes: &[u8]) -> Option<EcuFormat> {
    for format in EcuFormat::CONTAINERS {
        if let Some(layout) = format.container_layout() {
            if bytes.starts_with(layout.magic) {
                return Some(format);
            }
        }
    }

    if looks_like_intel_hex(bytes) {
        return Some(EcuFormat::IntelHex);
    }
    if looks_like_map_text(bytes) {
        return Some(EcuFormat::MapText);
    }

    None
}

const TEXT_SNIFF_WINDOW: usize = 4096;

fn looks_like_intel_hex(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let rest = &bytes[start..];
    if rest.first() != Some(&b':') {
        return false;
    }

    let line_end = rest
        .iter()
        .position(|b| *b == b'\n' || *b == b'\r')
        .unwrap_or(rest.len());
    let digits = &rest[1..line_end];

    // Shortest record: count, address, type, checksum.
    digits.len() >= 10 && digits.len() % 2 == 0 && digits.iter().all(u8::is_ascii_hexdigit)
}

fn looks_like_map_text(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(TEXT_SNIFF_WINDOW)];
    if !window.iter().all(|b| b.is_ascii() && (*b >= 0x20 || b.is_ascii_whitespace())) {
        return false;
    }

    // The window is pure ASCII, so this cannot fail.
    let Ok(text) = std::str::from_utf8(window) else {
        return false;
    };

    text.lines().any(|line| {
        matches!(
            line.split_whitespace().next(),
            Some("TABLE") | Some("SCALAR")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(prefix: &[u8], len: usize) -> Vec<u8> {
        let mut bytes = prefix.to_vec();
        bytes.resize(len, 0x11);
        bytes
    }

    #[test]
    fn every_extension_resolves_to_one_format() {
        for d in supported_formats() {
            assert_eq!(EcuFormat::from_extension(&d.extension), Some(d.format));
        }
    }

    #[test]
    fn supported_formats_lists_all_extensions() {
        let exts: Vec<String> = supported_formats().into_iter().map(|d| d.extension).collect();
        assert_eq!(
            exts,
            vec!["bin", "ori", "hex", "ihx", "map", "cal", "bdm", "wrf", "pvv", "hpt", "fte"]
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = detect(&padded(b"", 4096), "zip").unwrap_err();
        assert_eq!(err, FormatRejection::UnknownExtension("zip".into()));
    }

    #[test]
    fn bare_binary_by_extension() {
        let d = detect(&padded(b"", 2048), "bin").unwrap();
        assert_eq!(d.format, EcuFormat::BareBinary);
        assert!(!d.signature_verified);
        assert!(d.findings.is_empty());
    }

    #[test]
    fn undersized_inputs_are_always_rejected() {
        for format in EcuFormat::ALL {
            let ext = format.extensions()[0];
            let bytes = padded(b"", format.min_size() - 1);
            assert!(
                matches!(detect(&bytes, ext), Err(FormatRejection::TooSmall { .. })),
                "{format} accepted an undersized input"
            );
        }
    }

    #[test]
    fn container_magic_is_authoritative() {
        let layout = EcuFormat::PowerVisionContainer.container_layout().unwrap();
        let bytes = padded(layout.magic, 4096);

        let d = detect(&bytes, "pvv").unwrap();
        assert_eq!(d.format, EcuFormat::PowerVisionContainer);
        assert!(d.signature_verified);
        assert!(d.findings.is_empty());
    }

    #[test]
    fn signature_wins_over_extension_with_moderate_finding() {
        let layout = EcuFormat::HpTunersContainer.container_layout().unwrap();
        let bytes = padded(layout.magic, 4096);

        let d = detect(&bytes, "bin").unwrap();
        assert_eq!(d.format, EcuFormat::HpTunersContainer);
        assert_eq!(d.findings.len(), 1);
        assert_eq!(d.findings[0].rule_id, RuleId::SFmt01);
        assert_eq!(d.findings[0].severity, Severity::Moderate);
    }

    #[test]
    fn container_extension_without_magic_is_unverified() {
        let d = detect(&padded(b"", 4096), "wrf").unwrap();
        assert_eq!(d.format, EcuFormat::WoolichContainer);
        assert!(!d.signature_verified);
    }

    #[test]
    fn intel_hex_is_sniffed() {
        let text = b":10010000214601360121470136007EFE09D2190140\n:00000001FF\n";
        let d = detect(text, "hex").unwrap();
        assert_eq!(d.format, EcuFormat::IntelHex);
        assert!(d.signature_verified);
    }

    #[test]
    fn map_text_is_sniffed_even_when_mislabeled() {
        let text = padded(b"; export\nTABLE fuel unit=afr\nRPM 1000 2000\n", 1100);
        let text: Vec<u8> = text
            .into_iter()
            .map(|b| if b == 0x11 { b' ' } else { b })
            .collect();
        let d = detect(&text, "bin").unwrap();
        assert_eq!(d.format, EcuFormat::MapText);
        assert_eq!(d.findings.len(), 1);
    }

    #[test]
    fn binary_bytes_are_not_map_text() {
        assert!(!looks_like_map_text(b"TABLE\x00\x01\x02"));
    }
}
