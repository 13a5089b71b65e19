use std::path::Path;

use crate::{AnalysisError, ReportContent};

/// Extensions whose bytes are read as UTF-8 text.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Decodes report bytes into text. Undecodable bytes are an error, never
/// replaced silently.
pub fn extract_text(source_filename: &str, bytes: &[u8]) -> Result<ReportContent, AnalysisError> {
    let extension = Path::new(source_filename)
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AnalysisError::UnsupportedFormat {
            filename: source_filename.to_string(),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{extension}")
            },
        });
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|_| AnalysisError::InvalidEncoding(source_filename.to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(AnalysisError::EmptyContent(source_filename.to_string()));
    }
    Ok(ReportContent {
        source_filename: source_filename.to_string(),
        text: text.to_string(),
    })
}
