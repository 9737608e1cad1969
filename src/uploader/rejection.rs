use std::fmt;
use std::str::FromStr;
use crate::config::SessionConfig;
use crate::utils::{format_size, SizeUnit};
use super::types::{FileDescriptor, RejectedFile};

/// Why the drop zone refused a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionCode {
    FileTooLarge,
    FileInvalidType,
    FileTooSmall,
    TooManyFiles,
    Other(String),
}

impl RejectionCode {
    pub fn as_str(&self) -> &str {
        match self {
            RejectionCode::FileTooLarge => "file-too-large",
            RejectionCode::FileInvalidType => "file-invalid-type",
            RejectionCode::FileTooSmall => "file-too-small",
            RejectionCode::TooManyFiles => "too-many-files",
            RejectionCode::Other(code) => code,
        }
    }
}

impl FromStr for RejectionCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "file-too-large" => RejectionCode::FileTooLarge,
            "file-invalid-type" => RejectionCode::FileInvalidType,
            "file-too-small" => RejectionCode::FileTooSmall,
            "too-many-files" => RejectionCode::TooManyFiles,
            other => RejectionCode::Other(other.to_string()),
        })
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing message for a rejected file.
pub fn classify(code: &RejectionCode, file: &FileDescriptor, max_size_bytes: u64) -> String {
    match code {
        RejectionCode::FileTooLarge => format!(
            "File must be {} or smaller.",
            format_size(max_size_bytes as f64, SizeUnit::B, 1)
        ),
        RejectionCode::FileInvalidType => format!("{} files are not allowed.", file.mime_type),
        RejectionCode::FileTooSmall => "File size is too small.".to_string(),
        RejectionCode::TooManyFiles => "Only one file is allowed.".to_string(),
        RejectionCode::Other(_) => "Unexpected error. Please try again.".to_string(),
    }
}

fn is_accepted_type(config: &SessionConfig, file: &FileDescriptor) -> bool {
    if config.accepted_types.is_empty() {
        return true;
    }

    let extensions = config.accepted_extensions();
    let by_extension = file
        .extension()
        .map(|ext| extensions.contains(&ext))
        .unwrap_or(false);
    let by_mime = config
        .accepted_types
        .iter()
        .any(|ty| ty.contains('/') && ty.eq_ignore_ascii_case(&file.mime_type));

    by_extension || by_mime
}

/// Splits a raw drop into accepted and rejected files, the way the drop zone does
/// before it hands them over.
///
/// Type is checked before size. In single-file mode a drop that would accept more than
/// one file rejects all of them with `too-many-files`. A disabled session takes nothing.
pub fn validate_drop(config: &SessionConfig, files: Vec<FileDescriptor>) -> (Vec<FileDescriptor>, Vec<RejectedFile>) {
    if config.disabled {
        return (Vec::new(), Vec::new());
    }

    let max_size = config.max_size_bytes();
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for file in files {
        let mut codes = Vec::new();
        if !is_accepted_type(config, &file) {
            codes.push(RejectionCode::FileInvalidType);
        }
        if file.size > max_size {
            codes.push(RejectionCode::FileTooLarge);
        }

        if codes.is_empty() {
            accepted.push(file);
        } else {
            rejected.push(RejectedFile { file, codes });
        }
    }

    if !config.multiple_files && accepted.len() > 1 {
        rejected.extend(
            accepted
                .drain(..)
                .map(|file| RejectedFile::new(file, RejectionCode::TooManyFiles)),
        );
    }

    (accepted, rejected)
}

/// Drop zone caption lines.
pub fn instructions(config: &SessionConfig) -> (String, String) {
    let title = format!(
        "Drag and drop file{} here",
        if config.multiple_files { "s" } else { "" }
    );

    let mut limit = format!(
        "Limit {} per file",
        format_size(config.max_size_bytes() as f64, SizeUnit::B, 0)
    );
    let extensions = config.accepted_extensions();
    if !extensions.is_empty() {
        limit.push_str(" • ");
        limit.push_str(&extensions.join(", ").to_ascii_uppercase());
    }

    (title, limit)
}
