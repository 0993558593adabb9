//! Buffered multipart form parsing for upload endpoints.

use std::collections::HashMap;

use axum::extract::Multipart;

use crate::error::{ApiError, ApiResult};

/// A file part read into memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn content_type_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.content_type.as_deref().unwrap_or(fallback)
    }
}

/// All parts of a multipart body. Parts with a filename are files, the rest text.
#[derive(Debug, Default)]
pub struct UploadForm {
    files: Vec<(String, UploadedFile)>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);

            match file_name {
                Some(file_name) if !file_name.is_empty() => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(e.body_text()))?;
                    form.files.push((
                        name,
                        UploadedFile {
                            file_name,
                            content_type,
                            data: data.to_vec(),
                        },
                    ));
                }
                _ => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(e.body_text()))?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// First file sent under `name`.
    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        let index = self.files.iter().position(|(field, _)| field == name)?;
        Some(self.files.remove(index).1)
    }

    /// Every file sent under `name`, in order.
    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        let (taken, rest) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        taken.into_iter().map(|(_, file)| file).collect()
    }

    /// Trimmed, non-empty text field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Require a file field, answering 400 with `missing` otherwise.
    pub fn require_file(&mut self, name: &str, missing: &str) -> ApiResult<UploadedFile> {
        self.take_file(name).ok_or_else(|| ApiError::bad_request(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            content_type: Some("audio/mpeg".to_string()),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_take_files_keeps_other_parts() {
        let mut form = UploadForm {
            files: vec![
                ("files".into(), file("a.mp3")),
                ("cover".into(), file("c.png")),
                ("files".into(), file("b.mp3")),
            ],
            fields: HashMap::from([("voice_name".to_string(), "  Ana  ".to_string())]),
        };

        let samples = form.take_files("files");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].file_name, "b.mp3");
        assert!(form.take_file("cover").is_some());
        assert!(form.take_file("files").is_none());
        assert_eq!(form.text("voice_name"), Some("Ana"));
        assert_eq!(form.text("description"), None);
    }

    #[test]
    fn test_require_file() {
        let mut form = UploadForm::default();
        let err = form.require_file("audio", "No audio file provided").unwrap_err();
        assert_eq!(err.to_string(), "No audio file provided");
    }
}
