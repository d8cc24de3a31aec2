//! Auto-categorization, filename tags and Norwegian course-code extraction.

use crate::file::{FileCategory, UploadMetadata, file_extension, parse_tags};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Course code embedded in a longer string, e.g. `tkt4140_oblig2.pdf`.
static EMBEDDED_COURSE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Z0-9])([A-Z]{2,5}[0-9]{3,4})(?:[^0-9]|$)")
        .expect("course code regex is valid")
});

/// A complete course code such as `TKT4140` or `MA1101`.
static COURSE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2,5}[0-9]{3,4}$").expect("course code regex is valid"));

const KEYWORD_TAGS: &[(&[&str], &str)] = &[
    (&["oblig", "øving", "assignment", "homework"], "assignment"),
    (&["eksamen", "exam"], "exam"),
    (&["rapport", "report"], "report"),
    (&["notater", "notes", "forelesning", "lecture"], "notes"),
    (&["lab"], "lab"),
];

/// Result of classifying an upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: FileCategory,
    pub tags: Vec<String>,
    pub course_code: Option<String>,
}

/// Category for a file name, decided by its extension.
pub fn categorize(name: &str) -> FileCategory {
    let Some(ext) = file_extension(name) else {
        return FileCategory::Other;
    };
    match ext.as_str() {
        "pdf" | "doc" | "docx" | "txt" | "rtf" | "odt" | "md" => FileCategory::Documents,
        "xls" | "xlsx" | "csv" | "ods" => FileCategory::Spreadsheets,
        "ppt" | "pptx" | "odp" => FileCategory::Presentations,
        "jpg" | "jpeg" | "png" | "gif" | "svg" | "bmp" | "webp" => FileCategory::Images,
        "dwg" | "dxf" | "step" | "stp" | "iges" | "igs" => FileCategory::Cad,
        "js" | "jsx" | "ts" | "tsx" | "py" | "java" | "cpp" | "c" | "h" | "css" | "html"
        | "php" | "rb" | "go" | "rs" | "json" | "xml" | "yaml" | "yml" => FileCategory::Code,
        "zip" | "rar" | "7z" | "tar" | "gz" => FileCategory::Archives,
        _ => FileCategory::Other,
    }
}

/// Tags implied by keywords in the file name.
pub fn auto_tags(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    KEYWORD_TAGS
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, tag)| (*tag).to_string())
        .collect()
}

/// First course code found in `text`, uppercased.
pub fn extract_course_code(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    EMBEDDED_COURSE_CODE
        .captures(&upper)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether `code` is a complete, uppercase course code.
pub fn is_valid_course_code(code: &str) -> bool {
    COURSE_CODE.is_match(code)
}

/// Categorize a file and merge user tags with filename tags.
///
/// The course code comes from the first source that yields one: an explicit
/// `course_code`, then `subject`, then the file name.
pub fn classify(name: &str, metadata: &UploadMetadata) -> Classification {
    let course_code = metadata
        .course_code
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| is_valid_course_code(c))
        .or_else(|| {
            metadata
                .subject
                .as_deref()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| is_valid_course_code(s))
        })
        .or_else(|| extract_course_code(name));

    let user_tags = metadata.tags.as_deref().map(parse_tags).unwrap_or_default();
    let mut tags: Vec<String> = Vec::new();
    for tag in user_tags
        .into_iter()
        .map(|t| t.to_lowercase())
        .chain(auto_tags(name))
    {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Classification {
        category: categorize(name),
        tags,
        course_code,
    }
}
