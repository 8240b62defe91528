//! OCR through a remote service.
//!
//! [`client::OcrClient`] is the raw remote capability, and
//! [`invoker::OcrInvoker`] wraps it with throttling, response mapping and
//! failure classification, so that every call ends in a displayable
//! [`result::ResultText`].

pub mod client;
pub mod invoker;
pub mod mistral;
pub mod result;
