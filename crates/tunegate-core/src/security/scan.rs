//! Byte-level security screening.
//!
//! Runs before any parser touches the upload. The scanner never decodes
//! the payload: it only compares raw bytes against known signatures, in a
//! single linear pass, and fails closed on the first hit.

use serde::{Deserialize, Serialize};

/// Scanner outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ScanVerdict {
    Pass,
    Fail { reason: String },
}

impl ScanVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, ScanVerdict::Pass)
    }

    fn fail(reason: impl Into<String>) -> Self {
        ScanVerdict::Fail {
            reason: reason.into(),
        }
    }
}

/// Magic bytes of executables, libraries and archives, checked at offset 0.
const LEADING_MAGICS: &[(&[u8], &str)] = &[
    (b"MZ", "PE/DOS executable"),
    (b"\x7fELF", "ELF executable"),
    (b"\xfe\xed\xfa\xce", "Mach-O executable"),
    (b"\xfe\xed\xfa\xcf", "Mach-O executable"),
    (b"\xce\xfa\xed\xfe", "Mach-O executable"),
    (b"\xcf\xfa\xed\xfe", "Mach-O executable"),
    (b"\xca\xfe\xba\xbe", "Mach-O universal binary / Java class"),
    (b"\0asm", "WebAssembly module"),
    (b"dex\n", "Android DEX bytecode"),
    (b"#!", "script with interpreter line"),
    (b"PK\x03\x04", "ZIP/JAR/APK archive"),
    (b"Rar!", "RAR archive"),
    (b"7z\xbc\xaf\x27\x1c", "7-Zip archive"),
];

/// Markers searched anywhere in the buffer, ASCII case-insensitively.
const EMBEDDED_MARKERS: &[(&[u8], &str)] = &[
    (b"<script", "embedded script markup"),
    (b"<?php", "embedded PHP"),
    (b"<%@", "embedded server page directive"),
    (b"<iframe", "embedded iframe markup"),
    (b"javascript:", "javascript URL"),
    (b"vbscript:", "vbscript URL"),
    (b"powershell", "PowerShell invocation"),
    (b"cmd.exe", "Windows shell invocation"),
    (b"/bin/sh", "POSIX shell invocation"),
    (b"eval(", "dynamic code evaluation"),
    (b"this program cannot be run in dos mode", "embedded PE executable"),
];

/// File extensions that may never appear in any segment of an upload name.
const DENIED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "com", "scr", "bat", "cmd", "ps1", "vbs", "vbe", "js", "jse", "wsf", "jar",
    "sh", "msi", "apk", "so", "dylib", "app", "lnk", "hta", "cpl",
];

const MAX_NAME_LEN: usize = 255;

/// Screen an upload. Any hit is terminal.
pub fn scan(bytes: &[u8], file_name: &str) -> ScanVerdict {
    if let Some(reason) = check_file_name(file_name) {
        return ScanVerdict::fail(reason);
    }

    for (magic, label) in LEADING_MAGICS {
        if bytes.starts_with(magic) {
            return ScanVerdict::fail(format!("{label} signature at offset 0"));
        }
    }

    match find_embedded_marker(bytes) {
        Some((offset, label)) => ScanVerdict::fail(format!("{label} at offset {offset}")),
        None => ScanVerdict::Pass,
    }
}

fn check_file_name(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return Some("empty file name".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Some(format!("file name longer than {MAX_NAME_LEN} bytes"));
    }
    if name.chars().any(|c| c.is_control()) {
        return Some("file name contains control characters".into());
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Some("file name contains path components".into());
    }

    let lower = name.to_ascii_lowercase();
    // Every dotted segment after the stem is checked, so "tune.exe.bin" is caught.
    for segment in lower.split('.').skip(1) {
        if DENIED_EXTENSIONS.contains(&segment) {
            return Some(format!("denylisted extension '.{segment}' in file name"));
        }
    }

    None
}

/// Single pass over `bytes`. Candidates are dispatched on the lower-cased
/// first byte, so each position is compared against at most a handful of
/// short markers.
fn find_embedded_marker(bytes: &[u8]) -> Option<(usize, &'static str)> {
    let mut by_first: [Vec<usize>; 256] = std::array::from_fn(|_| Vec::new());
    for (idx, (marker, _)) in EMBEDDED_MARKERS.iter().enumerate() {
        by_first[marker[0].to_ascii_lowercase() as usize].push(idx);
    }

    for (offset, byte) in bytes.iter().enumerate() {
        for &idx in &by_first[byte.to_ascii_lowercase() as usize] {
            let (marker, label) = EMBEDDED_MARKERS[idx];
            if let Some(window) = bytes.get(offset..offset + marker.len()) {
                if window.eq_ignore_ascii_case(marker) {
                    return Some((offset, label));
                }
            }
        }
    }

    None
}
