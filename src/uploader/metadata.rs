use std::collections::BTreeMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use super::types::FileDescriptor;

/// `Upload-Metadata` header: comma separated `key base64(value)` pairs.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub filename: Option<String>,
    pub filetype: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl Metadata {
    pub fn for_file(file: &FileDescriptor) -> Self {
        Self {
            filename: Some(file.name.clone()),
            filetype: Some(file.mime_type.clone()).filter(|ty| !ty.is_empty()),
            custom: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn to_header(&self) -> String {
        let mut parts = Vec::new();

        if let Some(filename) = &self.filename {
            parts.push(format!("filename {}", STANDARD.encode(filename)));
        }

        if let Some(filetype) = &self.filetype {
            parts.push(format!("filetype {}", STANDARD.encode(filetype)));
        }

        for (key, value) in &self.custom {
            parts.push(format!("{} {}", key, STANDARD.encode(value)));
        }

        parts.join(",")
    }
}
