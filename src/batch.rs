//! Sequential batch processing.
//!
//! A batch is a list of sources that all share a [`FileType`]. We resolve and
//! OCR them one at a time, in order. A failure on one item is recorded on
//! that item and never stops the batch, so the output always lines up with
//! the input.

use indicatif::ProgressBar;
use schemars::JsonSchema;
use thiserror::Error;

use crate::{
    ocr::{
        invoker::OcrInvoker,
        result::{FailureKind, ItemFailure, ResultText},
    },
    prelude::*,
    source::{DocumentRequest, FileType, PreviewHandle, Source, Upload, resolve},
};

/// The raw inputs for a batch.
#[derive(Clone, Debug)]
pub enum BatchSources {
    /// URLs, one per line.
    Urls(String),
    /// Local files.
    Uploads(Vec<Upload>),
}

impl BatchSources {
    /// Split our input into individual sources, rejecting empty batches.
    ///
    /// Every line of URL input is a source, including blank ones, so that
    /// positions in the output match lines in the input.
    pub fn into_sources(self) -> Result<Vec<Source>, InvalidBatchInputError> {
        match self {
            BatchSources::Urls(text) if text.trim().is_empty() => {
                Err(InvalidBatchInputError::EmptyUrls)
            }
            BatchSources::Urls(text) => Ok(text
                .split('\n')
                .map(|line| Source::Url(line.to_owned()))
                .collect()),
            BatchSources::Uploads(uploads) if uploads.is_empty() => {
                Err(InvalidBatchInputError::NoFiles)
            }
            BatchSources::Uploads(uploads) => {
                Ok(uploads.into_iter().map(Source::Upload).collect())
            }
        }
    }
}

/// The batch as a whole cannot be started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidBatchInputError {
    #[error("Please enter at least one valid URL.")]
    EmptyUrls,

    #[error("Please upload at least one file.")]
    NoFiles,
}

/// One processed source.
#[derive(Clone, Debug)]
pub struct BatchItem {
    /// Position in the input, starting at 0.
    pub index: usize,

    /// A human-readable name for the source.
    pub source: String,

    /// The request we sent. `None` if the source could not be resolved.
    pub request: Option<DocumentRequest>,

    /// A preview of the source. `None` if the source could not be resolved.
    pub preview: Option<PreviewHandle>,

    /// The extracted text, or a placeholder explaining what went wrong.
    pub result: ResultText,

    /// Why this item failed, if it did.
    pub failure: Option<ItemFailure>,
}

impl BatchItem {
    /// Build an output record for this item. `files` lists any exports we
    /// wrote for it.
    pub fn to_output(&self, files: Vec<PathBuf>) -> ItemOutput {
        ItemOutput {
            index: self.index,
            source: self.source.clone(),
            status: if self.failure.is_some() {
                ItemStatus::Failed
            } else {
                ItemStatus::Ok
            },
            request_kind: self.request.as_ref().map(|r| r.kind().to_owned()),
            preview: self.preview.as_ref().map(PreviewHandle::summary),
            failure: self.failure.as_ref().map(ItemFailure::kind),
            error: self.failure.as_ref().map(|f| f.to_string()),
            result: self.result.clone(),
            files,
        }
    }
}

/// Status of a batch item.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    // OCR succeeded, although the text may be a "no text found" message.
    Ok,

    // The item failed, and `result` explains why.
    Failed,
}

/// Output record describing one batch item.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ItemOutput {
    /// Position of the item in the input, starting at 0.
    pub index: usize,

    /// The URL or file name of the input.
    pub source: String,

    /// Did this item succeed?
    pub status: ItemStatus,

    /// What kind of request we sent, if we got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_kind: Option<String>,

    /// A description of the input preview, if we got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,

    /// The kind of failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    /// Details of the failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Extracted text, or a message explaining why there is none.
    pub result: ResultText,

    /// Exported files for this item.
    pub files: Vec<PathBuf>,
}

/// Drives a batch through resolution and OCR.
pub struct BatchOrchestrator {
    /// Our OCR service.
    invoker: OcrInvoker,

    /// Progress display, if any.
    progress: Option<ProgressBar>,
}

impl BatchOrchestrator {
    /// Create a new orchestrator.
    pub fn new(invoker: OcrInvoker) -> Self {
        Self {
            invoker,
            progress: None,
        }
    }

    /// Report progress on `progress` as items complete.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Process a batch. Returns one item per source, in input order. Each
    /// call returns a fresh result list.
    #[instrument(level = "debug", skip_all, fields(file_type = ?file_type))]
    pub async fn process_batch(
        &self,
        sources: BatchSources,
        file_type: FileType,
    ) -> Result<Vec<BatchItem>, InvalidBatchInputError> {
        let sources = sources.into_sources()?;
        info!(count = sources.len(), "Processing batch");
        if let Some(pb) = &self.progress {
            pb.set_length(sources.len() as u64);
        }

        let mut items = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let item = self.process_item(index, source, file_type).await;
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Resolve and OCR a single source.
    #[instrument(level = "debug", skip_all, fields(index = index))]
    async fn process_item(
        &self,
        index: usize,
        source: &Source,
        file_type: FileType,
    ) -> BatchItem {
        let label = source.label();
        if let Some(pb) = &self.progress {
            pb.set_message(format!("Processing {label}"));
        }

        let resolved = match resolve(source, file_type).await {
            Ok(resolved) => resolved,
            Err(err) => {
                let failure = ItemFailure::InvalidInput(err.to_string());
                let result = ResultText::from_failure(&failure);
                error!("{}", result);
                return BatchItem {
                    index,
                    source: label,
                    request: None,
                    preview: None,
                    result,
                    failure: Some(failure),
                };
            }
        };

        debug!(
            kind = resolved.request.kind(),
            mime_type = ?resolved.request.mime_type(),
            preview = %resolved.preview.summary(),
            "Resolved source"
        );

        let (result, failure) = match self.invoker.try_invoke(&resolved.request).await {
            Ok(result) => (result, None),
            Err(failure) => (ResultText::from_failure(&failure), Some(failure)),
        };
        BatchItem {
            index,
            source: label,
            request: Some(resolved.request),
            preview: Some(resolved.preview),
            result,
            failure,
        }
    }
}
