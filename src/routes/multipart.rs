use axum::extract::Multipart;
use bytes::Bytes;
use std::collections::HashMap;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// A fully buffered multipart form: text fields plus any non-empty files.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: Vec<(String, UploadedFile)>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;

            match file_name {
                // Empty file inputs still send a part
                Some(_) if bytes.is_empty() => {}
                Some(file_name) => form.files.push((
                    name,
                    UploadedFile {
                        file_name,
                        content_type,
                        bytes,
                    },
                )),
                None => {
                    let value = String::from_utf8(bytes.to_vec())
                        .map_err(|_| AppError::BadRequest(format!("{} is not valid text", name)))?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Trimmed text, `None` when missing or blank.
    pub fn non_empty(&self, name: &str) -> Option<String> {
        self.text(name)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn checked(&self, name: &str) -> bool {
        matches!(self.text(name), Some("on" | "true" | "1" | "yes"))
    }

    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        taken.into_iter().map(|(_, file)| file).collect()
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.take_files(name).into_iter().next()
    }
}
