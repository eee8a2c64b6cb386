use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use serde::Deserialize;
use tracing::warn;

use crate::config::UploadPolicy;

/// How much of a file the sniffer looks at.
pub const SNIFF_LEN: usize = 1024;

/// Longest sanitized filename kept; storage keys prepend a date path and a
/// 33-byte prefix.
pub const MAX_FILENAME_LEN: usize = 150;

const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const MAGIC_BYTES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (OLE_MAGIC, "application/x-ole-storage"),
    (b"AC10", "image/vnd.dwg"),
    (b"MZ", "application/x-dosexec"),
    (b"\x7fELF", "application/x-executable"),
];

const ZIP_SIGNATURES: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

const OOXML_PARTS: &[(&[u8], &str)] = &[
    (
        b"word/",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        b"xl/",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        b"ppt/",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
];

/// Content type of a file judged from its leading bytes.
pub fn sniff_mime_type(data: &[u8]) -> &'static str {
    if data.is_empty() {
        return "application/x-empty";
    }

    if ZIP_SIGNATURES.iter().any(|sig| data.starts_with(sig)) {
        return OOXML_PARTS
            .iter()
            .find(|(part, _)| contains(data, part))
            .map(|(_, mime)| *mime)
            .unwrap_or("application/zip");
    }

    if let Some((_, mime)) = MAGIC_BYTES.iter().find(|(magic, _)| data.starts_with(magic)) {
        return *mime;
    }

    if looks_like_text(data) {
        return "text/plain";
    }

    "application/octet-stream"
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

fn looks_like_text(data: &[u8]) -> bool {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        // a multi-byte sequence cut off by the sniff window is still text
        Err(err) if err.error_len().is_none() => {
            match std::str::from_utf8(&data[..err.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };

    text.chars()
        .all(|ch| !ch.is_control() || matches!(ch, '\t' | '\n' | '\r' | '\x0c' | '\x1b'))
}

/// Lower-cased text after the last `.`, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

/// Accepts a file only when its extension is whitelisted and the sniffed
/// content type is one the extension may carry. The stream position is
/// restored before returning.
pub fn is_allowed<R: Read + Seek>(policy: &UploadPolicy, filename: &str, stream: &mut R) -> bool {
    let Some(extension) = file_extension(filename) else {
        return false;
    };
    if !policy.allowed_extensions.contains(&extension) {
        return false;
    }

    let head = match read_head(stream) {
        Ok(head) => head,
        Err(err) => {
            warn!(error = %err, filename, "failed to read upload for type detection");
            return false;
        }
    };

    let sniffed = sniff_mime_type(&head);
    match policy.accepted_types(&extension) {
        Some(accepted) => accepted.iter().any(|mime| mime == sniffed),
        None => false,
    }
}

fn read_head<R: Read + Seek>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let start = stream.stream_position()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    stream.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    stream.seek(SeekFrom::Start(start))?;
    Ok(head)
}

/// Content type recorded for a stored file. Generic containers are named
/// after the file's extension instead.
pub fn stored_mime_type(filename: &str, data: &[u8]) -> String {
    let sniffed = sniff_mime_type(&data[..data.len().min(SNIFF_LEN)]);
    match sniffed {
        "application/zip" | "application/x-ole-storage" | "application/octet-stream" => {
            mime_guess::from_path(filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        }
        other => other.to_string(),
    }
}

/// Reduces a client-supplied filename to a safe ASCII name with no path
/// components.
pub fn sanitize_filename(filename: &str) -> String {
    let flattened: String = filename
        .chars()
        .map(|ch| if ch == '/' || ch == '\\' { ' ' } else { ch })
        .collect();
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches(|ch| ch == '.' || ch == '_').to_string();

    let extension =
        file_extension(filename).filter(|ext| ext.chars().all(|ch| ch.is_ascii_alphanumeric()));
    let keeps_extension = match &extension {
        Some(ext) => {
            let lowered = cleaned.to_ascii_lowercase();
            lowered.len() > ext.len() + 1 && lowered.ends_with(&format!(".{ext}"))
        }
        None => true,
    };

    if cleaned.is_empty() || !keeps_extension {
        return match extension {
            Some(ext) => format!("document.{ext}"),
            None => "document".to_string(),
        };
    }

    truncate_filename(cleaned, extension.as_deref())
}

/// Shortens an ASCII name to [`MAX_FILENAME_LEN`] bytes, keeping the extension.
fn truncate_filename(name: String, extension: Option<&str>) -> String {
    if name.len() <= MAX_FILENAME_LEN {
        return name;
    }
    match extension {
        Some(ext) if ext.len() + 2 <= MAX_FILENAME_LEN => {
            let stem_len = MAX_FILENAME_LEN - ext.len() - 1;
            let stem = name[..stem_len].trim_end_matches(|ch| ch == '.' || ch == '_');
            let stem = if stem.is_empty() { "document" } else { stem };
            format!("{stem}.{ext}")
        }
        _ => name[..MAX_FILENAME_LEN].to_string(),
    }
}

/// Per-file title and description supplied alongside a bulk upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BulkMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct BulkMetadataRow {
    filename: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parses a `filename,title,description` CSV, keyed by sanitized filename.
pub fn parse_bulk_metadata(data: &[u8]) -> Result<HashMap<String, BulkMetadata>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data);

    let mut metadata = HashMap::new();
    for row in reader.deserialize::<BulkMetadataRow>() {
        let row = row?;
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        metadata.insert(
            sanitize_filename(&row.filename),
            BulkMetadata {
                title: non_empty(row.title),
                description: non_empty(row.description),
            },
        );
    }
    Ok(metadata)
}
