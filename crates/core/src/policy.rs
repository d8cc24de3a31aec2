//! Upload validation policy.
//!
//! Every file is checked against the policy before any bytes are stored:
//! name, size, extension allow-list, declared content type and, once the
//! first bytes arrive, a magic-number sniff of the actual content.

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::file::file_extension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of leading bytes inspected by [`UploadPolicy::check_content`].
pub const SNIFF_LEN: usize = 8192;

/// Extensions accepted by default.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "txt", "rtf", "odt", "xls", "xlsx", "csv", "ods", "ppt", "pptx", "odp",
    "jpg", "jpeg", "png", "gif", "svg", "bmp", "webp", "dwg", "dxf", "step", "stp", "iges", "igs",
    "js", "jsx", "ts", "tsx", "py", "java", "cpp", "c", "h", "css", "html", "php", "rb", "go",
    "rs", "zip", "rar", "7z", "tar", "gz", "md", "json", "xml", "yaml", "yml",
];

/// Declared content types accepted for allowed extensions. A trailing `*`
/// matches any suffix.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/rtf",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.*",
    "application/vnd.oasis.opendocument.*",
    "text/*",
    "image/*",
    "model/*",
    "application/zip",
    "application/x-zip-compressed",
    "application/vnd.rar",
    "application/x-rar-compressed",
    "application/x-7z-compressed",
    "application/x-tar",
    "application/gzip",
    "application/x-gzip",
    "application/json",
    "application/xml",
    "application/yaml",
    "application/x-yaml",
    "application/javascript",
    "application/typescript",
    "application/x-httpd-php",
    "application/x-python-code",
    "application/acad",
    "application/dxf",
    "application/step",
    "application/iges",
];

/// Content types that carry no information; accepted whenever the extension is.
const GENERIC_CONTENT_TYPES: &[&str] = &["", "application/octet-stream", "binary/octet-stream"];

/// Sniffed kinds that are never accepted, whatever the extension says.
const EXECUTABLE_KINDS: &[&str] = &["exe", "dll", "elf", "mach", "class", "dex", "dey", "wasm"];

/// A file offered for upload, before any content is read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileCandidate {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FileCandidate {
    pub fn new(name: impl Into<String>, size: u64, content_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: content_type.map(str::to_string),
        }
    }
}

/// Outcome of validating a batch of files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Rules applied to every upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub max_files_per_batch: usize,
    pub allowed_extensions: BTreeSet<String>,
    pub sniff_content: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: crate::DEFAULT_MAX_FILE_SIZE,
            max_files_per_batch: crate::DEFAULT_MAX_FILES_PER_BATCH,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            sniff_content: true,
        }
    }
}

impl UploadPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            max_files_per_batch: config.max_files_per_batch,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            sniff_content: config.sniff_content,
        }
    }

    /// Check the file name and return its lowercased extension.
    pub fn validate_name(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::InvalidFileName("name is empty".to_string()));
        }
        if name.len() > 255 {
            return Err(Error::InvalidFileName(format!(
                "name is {} bytes (max 255)",
                name.len()
            )));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(Error::InvalidFileName(
                "name must not contain path separators".to_string(),
            ));
        }
        let ext = file_extension(name)
            .ok_or_else(|| Error::DisallowedExtension(String::new()))?;
        if !self.allowed_extensions.contains(&ext) {
            return Err(Error::DisallowedExtension(ext));
        }
        Ok(ext)
    }

    pub fn validate_size(&self, size: u64) -> Result<()> {
        if size == 0 {
            return Err(Error::EmptyFile);
        }
        if size > self.max_file_size {
            return Err(Error::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Check a declared content type. Parameters such as `charset` are ignored.
    pub fn validate_content_type(&self, content_type: Option<&str>) -> Result<()> {
        let essence = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if GENERIC_CONTENT_TYPES.contains(&essence.as_str()) {
            return Ok(());
        }

        let allowed = ALLOWED_CONTENT_TYPES.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => essence.starts_with(prefix),
                None => essence == *pattern,
            }
        });
        if allowed {
            Ok(())
        } else {
            Err(Error::DisallowedContentType(essence))
        }
    }

    /// Validate a single file candidate: name, size, then content type.
    pub fn validate_file(&self, candidate: &FileCandidate) -> Result<()> {
        self.validate_name(&candidate.name)?;
        self.validate_size(candidate.size)?;
        self.validate_content_type(candidate.content_type.as_deref())?;
        Ok(())
    }

    /// Validate a batch, collecting one message per failing file.
    pub fn validate_batch(&self, candidates: &[FileCandidate]) -> ValidationReport {
        let mut errors = Vec::new();

        if candidates.is_empty() {
            errors.push("no files selected".to_string());
        } else if candidates.len() > self.max_files_per_batch {
            errors.push(
                Error::TooManyFiles {
                    count: candidates.len(),
                    max: self.max_files_per_batch,
                }
                .to_string(),
            );
        }

        for candidate in candidates {
            if let Err(e) = self.validate_file(candidate) {
                errors.push(format!("{}: {e}", candidate.name));
            }
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Sniff the leading bytes of a file and reject content that contradicts
    /// its extension.
    ///
    /// Text-like and unrecognized content passes; recognized binary formats
    /// must be compatible with the extension, and executables never pass.
    pub fn check_content(&self, name: &str, head: &[u8]) -> Result<()> {
        if !self.sniff_content || head.is_empty() {
            return Ok(());
        }
        let Some(kind) = infer::get(head) else {
            return Ok(());
        };

        if EXECUTABLE_KINDS.contains(&kind.extension()) {
            return Err(Error::ExecutableContent(kind.mime_type().to_string()));
        }
        if kind.matcher_type() == infer::MatcherType::Text {
            return Ok(());
        }

        let ext = file_extension(name).unwrap_or_default();
        if extension_matches_kind(&ext, kind.extension()) {
            Ok(())
        } else {
            Err(Error::ContentMismatch {
                extension: ext,
                detected: kind.mime_type().to_string(),
            })
        }
    }
}

fn extension_matches_kind(ext: &str, detected: &str) -> bool {
    const ZIP_CONTAINERS: &[&str] = &["zip", "docx", "xlsx", "pptx", "odt", "ods", "odp"];
    const OLE_CONTAINERS: &[&str] = &["doc", "xls", "ppt", "msi"];

    if ext == detected {
        return true;
    }
    match ext {
        "jpg" | "jpeg" => matches!(detected, "jpg" | "jpeg"),
        "zip" | "docx" | "xlsx" | "pptx" | "odt" | "ods" | "odp" => {
            ZIP_CONTAINERS.contains(&detected)
        }
        "doc" | "xls" | "ppt" => OLE_CONTAINERS.contains(&detected),
        "tar" => detected == "tar",
        "gz" => matches!(detected, "gz" | "tar"),
        _ => false,
    }
}
