use serde::{Deserialize, Serialize};

/// Where a `FileRef`'s bytes actually live. The source system passes around
/// an untyped "bytes/url" field; we pin it to an enum so the state store
/// never has to guess which variant it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileSource {
    /// Base64-encoded inline content.
    Bytes { base64: String },
    /// A URL the file can be fetched from (e.g. a spreadsheet-service link).
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub mime: String,
    pub source: FileSource,
    pub size_bytes: u64,
}

/// One page of extracted document content (spec §3.1 `processed_files_content`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageContentKind {
    Text,
    Table,
    ImageOcr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedPage {
    pub kind: PageContentKind,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessedFile {
    pub pages: Vec<ProcessedPage>,
}
