//! Deterministic filename derivation.
//!
//! The derived filename is half of a transfer's resume identity, so the same
//! URL must always map to the same name: no timestamps, no uniqueness suffixes.

use std::path::{Component, Path};

use tracing::debug;
use url::Url;

/// Name used when the URL path carries no usable last segment.
pub const FALLBACK_FILENAME: &str = "download";

/// Longest filename produced, in bytes.
const MAX_FILENAME_BYTES: usize = 255;

/// Derives the output filename from the last path segment of `url`.
///
/// The segment is percent-decoded and sanitized. URLs that cannot be parsed
/// or end in `/` yield [`FALLBACK_FILENAME`].
#[must_use]
pub fn derive_filename(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_FILENAME.to_string();
    };
    let Some(last) = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
    else {
        return FALLBACK_FILENAME.to_string();
    };

    let decoded = urlencoding::decode(last).map_or_else(
        |e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.to_string()
        },
        std::borrow::Cow::into_owned,
    );

    let name = truncate_to_bytes(&sanitize_filename(&decoded), MAX_FILENAME_BYTES);
    if name.chars().all(|c| c == '_') {
        FALLBACK_FILENAME.to_string()
    } else {
        name
    }
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

fn truncate_to_bytes(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
