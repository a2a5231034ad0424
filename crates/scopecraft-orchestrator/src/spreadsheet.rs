use async_trait::async_trait;
use scopecraft_types::{
    AppState, BrainChoice, ComplexityHint, DecisionKind, DecisionOption, DecisionRequest, FileRef,
    FileSource, WorkerResult,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// The external spreadsheet-service call, behind a trait so it can be faked
/// in tests (spec §6.4). The real HTTP integration is out of scope (spec
/// §1); this crate only defines the seam a real adapter plugs into.
#[async_trait]
pub trait SpreadsheetClient: Send + Sync {
    /// Enumerates the files attached to the sheet at `url`.
    async fn list_files(&self, url: &str) -> Result<Vec<SpreadsheetFile>, String>;
    /// Downloads one previously-listed file by id.
    async fn download(&self, url: &str, file_id: &str) -> Result<FileRef, String>;
}

#[derive(Debug, Clone)]
pub struct SpreadsheetFile {
    pub id: String,
    pub name: String,
    pub detail: Option<String>,
}

/// Extracts the first spreadsheet-service URL from a query string. Mirrors
/// the classifier's own pattern (spec §4.2 `spreadsheet_url` rule); kept
/// separate so the worker doesn't depend on the classifier crate module.
fn extract_url(query: &str) -> Option<&str> {
    query
        .split_whitespace()
        .find(|token| token.contains("spreadsheet-service"))
}

/// The `spreadsheet-intake` worker (spec §6.4). First dispatch lists the
/// sheet's files: a single obvious file set resolves immediately; multiple
/// candidates raise a `needs_user_input` with one option per file. On the
/// resume dispatch (after the decision is answered), `manager_notes.last_decision`
/// holds the chosen file id and the worker downloads it.
pub struct SpreadsheetIntakeWorker {
    client: std::sync::Arc<dyn SpreadsheetClient>,
}

impl SpreadsheetIntakeWorker {
    pub fn new(client: std::sync::Arc<dyn SpreadsheetClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl scopecraft_core::Worker for SpreadsheetIntakeWorker {
    fn name(&self) -> &'static str {
        "spreadsheet-intake"
    }

    fn complexity_hint(&self, _snapshot: &AppState) -> ComplexityHint {
        ComplexityHint::Low
    }

    async fn dispatch(
        &self,
        snapshot: &AppState,
        _choice: &BrainChoice,
        _cancel: CancellationToken,
    ) -> WorkerResult {
        let Some(url) = extract_url(&snapshot.query) else {
            return WorkerResult::FatalError {
                message: "no spreadsheet-service URL found in query".into(),
                details: Map::new(),
            };
        };

        if let Some(Value::String(selected)) = snapshot.manager_notes.get("last_decision") {
            return match self.client.download(url, selected).await {
                Ok(file) => {
                    let mut field_writes = Map::new();
                    field_writes.insert(
                        "files".into(),
                        Value::Array(vec![serde_json::to_value(&file).unwrap_or(Value::Null)]),
                    );
                    WorkerResult::Ok { field_writes }
                }
                Err(message) => WorkerResult::FatalError {
                    message,
                    details: Map::new(),
                },
            };
        }

        match self.client.list_files(url).await {
            Ok(files) if files.len() == 1 => {
                let file = &files[0];
                match self.client.download(url, &file.id).await {
                    Ok(downloaded) => {
                        let mut field_writes = Map::new();
                        field_writes.insert(
                            "files".into(),
                            Value::Array(vec![serde_json::to_value(&downloaded).unwrap_or(Value::Null)]),
                        );
                        WorkerResult::Ok { field_writes }
                    }
                    Err(message) => WorkerResult::FatalError {
                        message,
                        details: Map::new(),
                    },
                }
            }
            Ok(files) if files.is_empty() => WorkerResult::FatalError {
                message: "spreadsheet has no attached files".into(),
                details: Map::new(),
            },
            Ok(files) => {
                let options = files
                    .into_iter()
                    .map(|f| DecisionOption {
                        id: f.id,
                        label: f.name,
                        detail: f.detail,
                    })
                    .collect::<Vec<_>>();
                let mut request = DecisionRequest::new(
                    DecisionKind::FileSelection,
                    "Multiple files are attached to this sheet. Which one should be analyzed?",
                    300,
                );
                request.options = options;
                request.can_skip = false;
                WorkerResult::NeedsUserInput { request }
            }
            Err(message) => WorkerResult::FatalError {
                message,
                details: Map::new(),
            },
        }
    }
}

/// Test-only client with a fixed file list and canned downloads, so the
/// manager loop's spreadsheet-integration path (spec S3) is exercisable
/// without a live spreadsheet service.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeSpreadsheetClient {
    pub files: Vec<SpreadsheetFile>,
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl SpreadsheetClient for FakeSpreadsheetClient {
    async fn list_files(&self, _url: &str) -> Result<Vec<SpreadsheetFile>, String> {
        Ok(self.files.clone())
    }

    async fn download(&self, _url: &str, file_id: &str) -> Result<FileRef, String> {
        let file = self
            .files
            .iter()
            .find(|f| f.id == file_id)
            .ok_or_else(|| format!("unknown file id '{file_id}'"))?;
        Ok(FileRef {
            name: file.name.clone(),
            mime: "application/pdf".into(),
            source: FileSource::Url {
                url: format!("https://my-spreadsheet-service.example/files/{}", file.id),
            },
            size_bytes: 1024,
        })
    }
}
