use std::path::Path;

use axum::body::Bytes;
use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;

use crate::config::MIB;
use crate::error::Error;

/// Form field the image is uploaded under.
pub const FILE_FIELD: &str = "file";

pub const ALLOWED_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"];

// Room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadRejection {
    #[error("No file provided")]
    NoFile,
    #[error("No filename provided")]
    NoFilename,
    #[error("Invalid file type. Allowed types: {}", ALLOWED_EXTENSIONS.join(", "))]
    InvalidFileType,
    #[error("File too large. Maximum size: {max_mb}MB")]
    FileTooLarge { max_mb: usize },
    #[error("Empty file provided")]
    EmptyFile,
}

impl UploadRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadRejection::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug)]
pub enum UploadValidationOutcome {
    Accepted { bytes: Bytes, filename: String },
    Rejected(UploadRejection),
}

/// The `file` field as it arrived, before any rule ran.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub filename: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadValidator {
    max_bytes: usize,
}

impl UploadValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Body limit for the `/analyze` route. Slightly above `max_bytes` so an
    /// oversized file is still read and rejected with a JSON 413.
    pub fn body_limit(&self) -> usize {
        self.max_bytes.saturating_add(MULTIPART_OVERHEAD)
    }

    /// Applies the rules in order; the first failing one wins.
    pub fn validate(&self, upload: Option<RawUpload>) -> UploadValidationOutcome {
        let Some(upload) = upload else {
            return UploadValidationOutcome::Rejected(UploadRejection::NoFile);
        };
        let filename = match self.check_filename(upload.filename.as_deref()) {
            Ok(filename) => filename,
            Err(rejection) => return UploadValidationOutcome::Rejected(rejection),
        };
        if let Err(rejection) = self.check_payload(&upload.bytes) {
            return UploadValidationOutcome::Rejected(rejection);
        }
        UploadValidationOutcome::Accepted {
            bytes: upload.bytes,
            filename,
        }
    }

    pub fn check_filename(&self, filename: Option<&str>) -> Result<String, UploadRejection> {
        let filename = filename
            .filter(|name| !name.is_empty())
            .ok_or(UploadRejection::NoFilename)?;

        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .ok_or(UploadRejection::InvalidFileType)?;

        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(UploadRejection::InvalidFileType);
        }
        Ok(filename.to_string())
    }

    pub fn check_payload(&self, bytes: &[u8]) -> Result<(), UploadRejection> {
        if bytes.len() > self.max_bytes {
            return Err(self.too_large());
        }
        if bytes.is_empty() {
            return Err(UploadRejection::EmptyFile);
        }
        Ok(())
    }

    /// Pulls the `file` field out of the form and validates it.
    ///
    /// Filename rules run before the field body is read, so a rejected file
    /// type never has its payload buffered.
    pub async fn validate_multipart(
        &self,
        mut multipart: Multipart,
    ) -> Result<UploadValidationOutcome, Error> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| self.multipart_error(e))?
        {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }

            let filename = match self.check_filename(field.file_name()) {
                Ok(filename) => filename,
                Err(rejection) => return Ok(UploadValidationOutcome::Rejected(rejection)),
            };
            let bytes = field.bytes().await.map_err(|e| self.multipart_error(e))?;

            return Ok(self.validate(Some(RawUpload {
                filename: Some(filename),
                bytes,
            })));
        }

        Ok(self.validate(None))
    }

    fn too_large(&self) -> UploadRejection {
        UploadRejection::FileTooLarge {
            max_mb: self.max_bytes / MIB,
        }
    }

    fn multipart_error(&self, error: MultipartError) -> Error {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::Validation(self.too_large())
        } else {
            Error::Multipart(error.body_text())
        }
    }
}
