//! Calling the OCR service once per document.

use std::{sync::Arc, time::Duration};

use tokio::time;

use crate::{prelude::*, source::DocumentRequest};

use super::{
    client::OcrClient,
    result::{ItemFailure, NO_TEXT_FOUND, ResultText},
};

/// The OCR model we ask for by default.
pub const DEFAULT_MODEL: &str = "mistral-ocr-latest";

/// How long to wait after each successful call, to stay under the service's
/// rate limit.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// Runs single OCR requests and turns whatever happens into a [`ResultText`].
pub struct OcrInvoker {
    /// The remote OCR service.
    client: Arc<dyn OcrClient>,

    /// The model to request.
    model: String,

    /// Delay after each successful call.
    throttle: Duration,
}

impl OcrInvoker {
    /// Create an invoker using [`DEFAULT_MODEL`] and [`DEFAULT_THROTTLE`].
    pub fn new(client: Arc<dyn OcrClient>) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_owned(),
            throttle: DEFAULT_THROTTLE,
        }
    }

    /// Use a different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use a different post-call delay.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// OCR a document. Never fails: errors become placeholder text.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn invoke(&self, request: &DocumentRequest) -> ResultText {
        match self.try_invoke(request).await {
            Ok(text) => text,
            Err(failure) => ResultText::from_failure(&failure),
        }
    }

    /// OCR a document, reporting failures as an [`ItemFailure`].
    #[instrument(level = "debug", skip_all, fields(kind = %request.kind()))]
    pub async fn try_invoke(
        &self,
        request: &DocumentRequest,
    ) -> Result<ResultText, ItemFailure> {
        let response = match self.client.process(&self.model, request).await {
            Ok(response) => response,
            Err(err) => {
                let failure = ItemFailure::from_service_error(format!("{err:#}"));
                error!("{}", ResultText::from_failure(&failure));
                return Err(failure);
            }
        };

        // Only successful calls count against the rate limit, but they all
        // count, including the last one in a batch.
        time::sleep(self.throttle).await;

        let text = match extract_text(&response) {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!("OCR response contained no pages");
                NO_TEXT_FOUND.to_owned()
            }
            Err(err) => {
                let failure = ItemFailure::Processing(format!("{err:#}"));
                error!("{}", ResultText::from_failure(&failure));
                return Err(failure);
            }
        };
        if text.trim().is_empty() {
            warn!("OCR returned no text");
        }
        Ok(ResultText::from_extracted(text))
    }
}

/// Pull the Markdown text out of an OCR response.
///
/// We accept either an object with a `pages` array, or a bare array of
/// pages. Pages are joined with a blank line. Returns `None` for any other
/// shape.
fn extract_text(response: &Value) -> Result<Option<String>> {
    let pages = match response {
        Value::Object(map) => match map.get("pages") {
            Some(pages) => pages,
            None => return Ok(None),
        },
        Value::Array(_) => response,
        _ => return Ok(None),
    };
    let Value::Array(pages) = pages else {
        return Err(anyhow!("expected OCR pages to be an array, found {pages}"));
    };
    let texts = pages
        .iter()
        .enumerate()
        .map(|(page_idx, page)| {
            page.get("markdown")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("OCR page {page_idx} has no markdown text"))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(pages = texts.len(), "Extracted OCR pages");
    Ok(Some(texts.join("\n\n")))
}
