//! Extension to category table.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Coarse file category, also the name of the folder leaves are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Images,
    Videos,
    Audio,
    Documents,
    Archives,
    Code,
    Other,
}

/// Folder holding the preserved trees of folder picks when grouping by type.
pub const FOLDERS_DIR: &str = "Folders";

/// Extension used in breakdowns for files without one.
pub const NO_EXTENSION: &str = "noext";

const IMAGES: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "heic", "heif", "svg", "ico",
    "raw", "cr2", "nef", "arw", "dng", "psd",
];
const VIDEOS: &[&str] = &[
    "mp4", "mov", "mkv", "avi", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp", "mts",
];
const AUDIO: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "aiff", "opus", "mid", "midi",
];
const DOCUMENTS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "md", "rtf", "csv", "json",
    "odt", "ods", "odp", "pages", "numbers", "key", "epub",
];
const ARCHIVES: &[&str] = &["zip", "7z", "rar", "tar", "gz", "bz2", "xz", "zst", "tgz", "iso", "dmg"];
const CODE: &[&str] = &[
    "js", "ts", "tsx", "jsx", "py", "go", "java", "kt", "rs", "c", "cpp", "h", "hpp", "cs", "rb",
    "php", "sh", "yaml", "yml", "toml", "html", "css", "swift", "sql",
];

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Images,
        Category::Videos,
        Category::Audio,
        Category::Documents,
        Category::Archives,
        Category::Code,
        Category::Other,
    ];

    /// Category for a lowercased extension without the dot.
    pub fn from_extension(ext: &str) -> Self {
        let tables: [(&[&str], Category); 6] = [
            (IMAGES, Category::Images),
            (VIDEOS, Category::Videos),
            (AUDIO, Category::Audio),
            (DOCUMENTS, Category::Documents),
            (ARCHIVES, Category::Archives),
            (CODE, Category::Code),
        ];
        tables
            .iter()
            .find(|(exts, _)| exts.contains(&ext))
            .map(|(_, cat)| *cat)
            .unwrap_or(Category::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Images => "Images",
            Category::Videos => "Videos",
            Category::Audio => "Audio",
            Category::Documents => "Documents",
            Category::Archives => "Archives",
            Category::Code => "Code",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a path: returns its category and lowercased extension (or `noext`).
pub fn classify(path: &Path) -> (Category, String) {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if ext.is_empty() {
        (Category::Other, NO_EXTENSION.to_string())
    } else {
        (Category::from_extension(&ext), ext)
    }
}
