use std::collections::BTreeSet;

/// An uploaded file as read off the multipart stream.
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    /// Set when the stream carried more bytes than the configured maximum.
    /// `bytes` is truncated in that case.
    pub exceeded_limit: bool,
}

impl UploadedFile {
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Debug, Clone)]
pub struct UploadLimits {
    allowed_extensions: BTreeSet<String>,
    max_bytes: usize,
}

impl UploadLimits {
    pub fn new<I, S>(allowed_extensions: I, max_bytes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn allows_extension(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| self.allowed_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    fn allowed_list(&self) -> String {
        self.allowed_extensions
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("No file was provided")]
    MissingFile,
    #[error("No file was selected")]
    EmptyFilename,
    #[error("File type not allowed. Allowed extensions: {allowed}")]
    DisallowedExtension { allowed: String },
    #[error("The file is too large. Maximum allowed size: {}MB", megabytes(.max_bytes))]
    TooLarge { max_bytes: usize },
}

fn megabytes(bytes: &usize) -> String {
    format!("{:.1}", *bytes as f64 / (1024.0 * 1024.0))
}

/// Runs the upload checks in order and stops at the first failure.
pub fn validate_upload(
    file: Option<&UploadedFile>,
    limits: &UploadLimits,
) -> Result<(), ValidationError> {
    let file = file.ok_or(ValidationError::MissingFile)?;

    let filename = file
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(ValidationError::EmptyFilename)?;

    if !limits.allows_extension(filename) {
        return Err(ValidationError::DisallowedExtension {
            allowed: limits.allowed_list(),
        });
    }

    if file.exceeded_limit || file.bytes.len() > limits.max_bytes {
        return Err(ValidationError::TooLarge {
            max_bytes: limits.max_bytes,
        });
    }

    Ok(())
}
