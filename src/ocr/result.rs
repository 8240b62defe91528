//! Normalized OCR results.

use std::fmt;

use schemars::JsonSchema;
use thiserror::Error;

use crate::prelude::*;

/// Used when the OCR service answers with something that has no pages.
pub const NO_TEXT_FOUND: &str = "No text could be extracted from the image/document.";

/// Used when the OCR service returns pages, but they contain no text.
pub const EMPTY_TEXT: &str = "No text was extracted from the document. Please ensure \
                              the image/document is clear and contains readable text.";

/// Used when the OCR service rejects our credentials.
pub const INVALID_API_KEY: &str =
    "Error: Invalid or missing API key. Please check your Mistral API key.";

/// Extracted text, or a human-readable placeholder explaining why there is
/// none. Never empty or all-whitespace.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultText(String);

impl ResultText {
    /// Wrap text returned by the OCR service, substituting [`EMPTY_TEXT`] if
    /// there is nothing readable in it.
    pub fn from_extracted(text: String) -> Self {
        if text.trim().is_empty() {
            Self(EMPTY_TEXT.to_owned())
        } else {
            Self(text)
        }
    }

    /// The placeholder text for a failed item.
    pub fn from_failure(failure: &ItemFailure) -> Self {
        Self(failure.sentinel())
    }

    /// Get our text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a single batch item failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ItemFailure {
    /// The source could not be resolved into a request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The OCR service rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Anything else that went wrong talking to the OCR service.
    #[error("processing failed: {0}")]
    Processing(String),
}

impl ItemFailure {
    /// Classify an error reported by the OCR service.
    pub fn from_service_error(message: String) -> Self {
        if message.to_lowercase().contains("api key") {
            ItemFailure::Authentication(message)
        } else {
            ItemFailure::Processing(message)
        }
    }

    /// The kind of failure, for output records.
    pub fn kind(&self) -> FailureKind {
        match self {
            ItemFailure::InvalidInput(_) => FailureKind::InvalidInput,
            ItemFailure::Authentication(_) => FailureKind::Authentication,
            ItemFailure::Processing(_) => FailureKind::Processing,
        }
    }

    /// The text we show in place of OCR output.
    fn sentinel(&self) -> String {
        match self {
            ItemFailure::InvalidInput(message) => format!(
                "Error reading input: {message}\nPlease check the source and try again."
            ),
            ItemFailure::Authentication(_) => INVALID_API_KEY.to_owned(),
            ItemFailure::Processing(message) => format!(
                "Error processing document: {message}\nPlease ensure the document is \
                 valid and try again."
            ),
        }
    }
}

/// Failure categories, as written to output records.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    Authentication,
    Processing,
}
