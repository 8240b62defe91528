//! Interface to a remote OCR service.

use crate::{prelude::*, source::DocumentRequest};

/// A remote OCR capability.
///
/// Implementations make exactly one request per call, and return the raw
/// JSON response. Interpreting the response is up to the caller, because
/// the response shape is not something we fully control.
#[async_trait]
pub trait OcrClient: Send + Sync + 'static {
    /// OCR `document` using `model`.
    async fn process(&self, model: &str, document: &DocumentRequest) -> Result<Value>;
}

#[cfg(test)]
pub mod testing {
    //! Fake OCR clients for tests.

    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// A scripted OCR client that records every request it sees.
    pub struct FakeOcrClient {
        respond: Box<dyn Fn(&DocumentRequest) -> Result<Value> + Send + Sync>,
        calls: AtomicUsize,
        requests: Mutex<Vec<(String, DocumentRequest)>>,
    }

    impl FakeOcrClient {
        /// Answer every request using `respond`.
        pub fn new(
            respond: impl Fn(&DocumentRequest) -> Result<Value> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(vec![]),
            }
        }

        /// Answer every request with the same pages.
        pub fn with_pages(pages: &[&str]) -> Self {
            let pages = pages
                .iter()
                .map(|markdown| serde_json::json!({ "markdown": markdown }))
                .collect::<Vec<_>>();
            Self::new(move |_| Ok(serde_json::json!({ "pages": pages.clone() })))
        }

        /// Fail every request with `message`.
        pub fn failing(message: &'static str) -> Self {
            Self::new(move |_| Err(anyhow!(message)))
        }

        /// How many times were we called?
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Every `(model, request)` pair we were called with.
        pub fn requests(&self) -> Vec<(String, DocumentRequest)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OcrClient for FakeOcrClient {
        async fn process(&self, model: &str, document: &DocumentRequest) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .unwrap()
                .push((model.to_owned(), document.clone()));
            (self.respond)(document)
        }
    }
}
