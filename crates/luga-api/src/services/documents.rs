//! Plain-text extraction from uploaded documents.
//!
//! `.txt` is decoded directly; `.pdf` goes through `pdftotext` and `.docx`
//! through `pandoc`. Both tools are looked up on `PATH` per call.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use luga_models::utils::file_extension;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ApiError;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest document accepted for extraction.
pub const MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Unsupported file type. Please upload a .txt, .docx or .pdf file")]
    Unsupported,

    #[error("Document is empty")]
    Empty,

    #[error("Document too large")]
    TooLarge,

    #[error("{0} is not installed")]
    ToolMissing(&'static str),

    #[error("Failed to extract text: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Unsupported | DocumentError::Empty | DocumentError::TooLarge => {
                ApiError::bad_request(e.to_string())
            }
            DocumentError::Extraction(_) => ApiError::unprocessable(e.to_string()),
            DocumentError::ToolMissing(_) | DocumentError::Io(_) => ApiError::internal(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        match file_extension(name).as_deref() {
            Some("txt") => Some(DocumentKind::Text),
            Some("pdf") => Some(DocumentKind::Pdf),
            Some("docx") => Some(DocumentKind::Docx),
            _ => None,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            DocumentKind::Text => ".txt",
            DocumentKind::Pdf => ".pdf",
            DocumentKind::Docx => ".docx",
        }
    }
}

/// Extract the text of an uploaded document.
pub async fn extract_text(file_name: &str, data: &[u8]) -> Result<String, DocumentError> {
    let kind = DocumentKind::from_file_name(file_name).ok_or(DocumentError::Unsupported)?;
    if data.is_empty() {
        return Err(DocumentError::Empty);
    }
    if data.len() > MAX_DOCUMENT_BYTES {
        return Err(DocumentError::TooLarge);
    }

    let text = match kind {
        DocumentKind::Text => decode_text(data),
        DocumentKind::Pdf | DocumentKind::Docx => {
            let mut file = tempfile::Builder::new()
                .prefix("luga-doc-")
                .suffix(kind.suffix())
                .tempfile()?;
            file.write_all(data)?;
            file.flush()?;

            match kind {
                DocumentKind::Pdf => {
                    run_tool("pdftotext", &["-layout", "-enc", "UTF-8"], file.path(), Some("-")).await?
                }
                _ => run_tool("pandoc", &["-t", "plain", "--wrap=none"], file.path(), None).await?,
            }
        }
    };

    debug!(file_name = %file_name, chars = text.len(), "Extracted document text");
    Ok(text.trim().to_string())
}

fn decode_text(data: &[u8]) -> String {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    String::from_utf8_lossy(data).into_owned()
}

async fn run_tool(
    tool: &'static str,
    args: &[&str],
    input: &Path,
    trailing: Option<&str>,
) -> Result<String, DocumentError> {
    let binary = which::which(tool).map_err(|_| DocumentError::ToolMissing(tool))?;

    let mut command = Command::new(binary);
    command
        .args(args)
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(arg) = trailing {
        command.arg(arg);
    }

    let output = tokio::time::timeout(EXTRACT_TIMEOUT, command.output())
        .await
        .map_err(|_| DocumentError::Extraction(format!("{} timed out", tool)))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(tool = tool, status = ?output.status.code(), stderr = %stderr, "Text extraction failed");
        return Err(DocumentError::Extraction(format!("{} exited with {}", tool, output.status)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text() {
        let text = extract_text("notes.TXT", b"\xEF\xBB\xBF  Hello world\n").await.unwrap();
        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn test_unsupported_and_empty() {
        assert!(matches!(
            extract_text("slides.pptx", b"x").await,
            Err(DocumentError::Unsupported)
        ));
        assert!(matches!(extract_text("noext", b"x").await, Err(DocumentError::Unsupported)));
        assert!(matches!(extract_text("a.pdf", b"").await, Err(DocumentError::Empty)));

        let err: ApiError = DocumentError::Unsupported.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_docx_via_pandoc_when_available() {
        if which::which("pandoc").is_err() {
            return;
        }
        // Not a real docx; pandoc must fail cleanly rather than hang.
        let result = extract_text("broken.docx", b"not a zip archive").await;
        assert!(matches!(result, Err(DocumentError::Extraction(_))));
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(DocumentKind::from_file_name("a.pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_file_name("Report.DOCX"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_file_name("a.doc"), None);
    }
}
