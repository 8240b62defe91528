//! Turning raw inputs into OCR requests.
//!
//! A source is either a URL or a locally uploaded file. Each one is resolved
//! into a [`DocumentRequest`], which is what we actually send to the OCR
//! service, plus a [`PreviewHandle`] that a presentation layer can use to show
//! the original input next to the extracted text. Nothing here touches the
//! network.

use clap::ValueEnum;
use schemars::JsonSchema;
use thiserror::Error;

use crate::{
    data_url::{data_url, parse_data_url},
    prelude::*,
};

/// MIME type used for inline PDFs.
const PDF_MIME_TYPE: &str = "application/pdf";

/// What kind of document are we processing?
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// A PDF document, possibly with many pages.
    #[default]
    Pdf,
    /// A single image.
    Image,
}

impl FileType {
    /// A human-readable name for messages.
    pub fn name(self) -> &'static str {
        match self {
            FileType::Pdf => "PDF",
            FileType::Image => "image",
        }
    }

    /// File extensions we accept for local uploads of this type.
    pub fn upload_extensions(self) -> &'static [&'static str] {
        match self {
            FileType::Pdf => &["pdf"],
            FileType::Image => &["jpg", "jpeg", "png"],
        }
    }
}

/// Where do our inputs come from?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SourceType {
    /// Inputs are URLs, one per line.
    #[default]
    Url,
    /// Inputs are local files, which we upload inline.
    #[value(name = "local")]
    LocalUpload,
}

/// A locally uploaded file.
#[derive(Clone, Debug)]
pub struct Upload {
    /// The file name, for display.
    pub filename: String,

    /// Where to read the file contents from.
    pub path: PathBuf,

    /// The declared MIME type. We trust this rather than sniffing the
    /// contents.
    pub mime_type: String,
}

impl Upload {
    /// Does this file have an extension we accept for `file_type`?
    pub fn has_extension_for(&self, file_type: FileType) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                file_type
                    .upload_extensions()
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
    }

    /// Describe a file on disk. If `mime_type` is not given, we guess it from
    /// the file extension, the same way a browser fills in upload metadata.
    pub fn from_path(path: impl Into<PathBuf>, mime_type: Option<&str>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = match mime_type {
            Some(mime_type) => mime_type.to_owned(),
            None => mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_owned(),
        };
        Self {
            filename,
            path,
            mime_type,
        }
    }
}

/// A single raw input.
#[derive(Clone, Debug)]
pub enum Source {
    /// A URL, exactly as the user typed it.
    Url(String),
    /// A local file.
    Upload(Upload),
}

impl Source {
    /// A short human-readable name for this source.
    pub fn label(&self) -> String {
        match self {
            Source::Url(url) => url.trim().to_owned(),
            Source::Upload(upload) => upload.filename.clone(),
        }
    }
}

/// A normalized OCR request payload.
///
/// URL variants hold a URL. Inline variants hold a `data:` URL with the
/// correct MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentRequest {
    PdfUrl(String),
    PdfInlineBase64(String),
    ImageUrl(String),
    ImageInlineBase64(String),
}

impl DocumentRequest {
    /// Build a request for `payload`, which is either a URL or a `data:` URL.
    fn new(file_type: FileType, inline: bool, payload: String) -> Self {
        match (file_type, inline) {
            (FileType::Pdf, false) => DocumentRequest::PdfUrl(payload),
            (FileType::Pdf, true) => DocumentRequest::PdfInlineBase64(payload),
            (FileType::Image, false) => DocumentRequest::ImageUrl(payload),
            (FileType::Image, true) => DocumentRequest::ImageInlineBase64(payload),
        }
    }

    /// The URL or `data:` URL we send to the OCR service.
    pub fn payload(&self) -> &str {
        match self {
            DocumentRequest::PdfUrl(payload)
            | DocumentRequest::PdfInlineBase64(payload)
            | DocumentRequest::ImageUrl(payload)
            | DocumentRequest::ImageInlineBase64(payload) => payload,
        }
    }

    /// What kind of file is this?
    pub fn file_type(&self) -> FileType {
        match self {
            DocumentRequest::PdfUrl(_) | DocumentRequest::PdfInlineBase64(_) => {
                FileType::Pdf
            }
            DocumentRequest::ImageUrl(_) | DocumentRequest::ImageInlineBase64(_) => {
                FileType::Image
            }
        }
    }

    /// Is the document embedded in the request?
    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            DocumentRequest::PdfInlineBase64(_) | DocumentRequest::ImageInlineBase64(_)
        )
    }

    /// The declared MIME type of an inline document.
    pub fn mime_type(&self) -> Option<&str> {
        if self.is_inline() {
            parse_data_url(self.payload()).map(|(mime_type, _)| mime_type)
        } else {
            None
        }
    }

    /// A short name for the request variant, for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentRequest::PdfUrl(_) => "pdf_url",
            DocumentRequest::PdfInlineBase64(_) => "pdf_inline_base64",
            DocumentRequest::ImageUrl(_) => "image_url",
            DocumentRequest::ImageInlineBase64(_) => "image_inline_base64",
        }
    }
}

/// The document descriptor expected by the OCR API.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DocumentDescriptor<'a> {
    DocumentUrl { document_url: &'a str },
    ImageUrl { image_url: &'a str },
}

impl Serialize for DocumentRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let payload = self.payload();
        let descriptor = match self.file_type() {
            FileType::Pdf => DocumentDescriptor::DocumentUrl {
                document_url: payload,
            },
            FileType::Image => DocumentDescriptor::ImageUrl { image_url: payload },
        };
        descriptor.serialize(serializer)
    }
}

/// Something a presentation layer can render to show the original input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewHandle {
    /// The same URL or `data:` URL used for the request.
    Uri(String),
    /// Raw bytes of a locally uploaded image. Some image viewers handle these
    /// better than a `data:` URL.
    RawBytes { mime_type: String, bytes: Vec<u8> },
}

impl PreviewHandle {
    /// A short description of the preview, suitable for logs and output
    /// records. Inline data is summarized rather than included.
    pub fn summary(&self) -> String {
        match self {
            PreviewHandle::Uri(uri) => match parse_data_url(uri) {
                Some((mime_type, data)) => {
                    format!("inline {mime_type} ({} base64 bytes)", data.len())
                }
                None => uri.clone(),
            },
            PreviewHandle::RawBytes { mime_type, bytes } => {
                format!("raw {mime_type} ({} bytes)", bytes.len())
            }
        }
    }
}

/// A resolved source.
#[derive(Clone, Debug)]
pub struct Resolved {
    /// What we send to the OCR service.
    pub request: DocumentRequest,

    /// What we show the user.
    pub preview: PreviewHandle,
}

/// A source could not be turned into a request.
#[derive(Debug, Error)]
pub enum InvalidInputError {
    #[error("URL is empty")]
    EmptyUrl,

    #[error("{filename} is not a supported {kind} file (expected .{expected})")]
    UnsupportedType {
        filename: String,
        kind: &'static str,
        expected: String,
    },

    #[error("could not read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve a single source into a request and a preview.
#[instrument(level = "debug", skip_all, fields(source = %source.label()))]
pub async fn resolve(
    source: &Source,
    file_type: FileType,
) -> Result<Resolved, InvalidInputError> {
    match source {
        Source::Url(url) => {
            let url = url.trim();
            if url.is_empty() {
                return Err(InvalidInputError::EmptyUrl);
            }
            Ok(Resolved {
                request: DocumentRequest::new(file_type, false, url.to_owned()),
                preview: PreviewHandle::Uri(url.to_owned()),
            })
        }
        Source::Upload(upload) => {
            if !upload.has_extension_for(file_type) {
                return Err(InvalidInputError::UnsupportedType {
                    filename: upload.filename.clone(),
                    kind: file_type.name(),
                    expected: file_type.upload_extensions().join(", ."),
                });
            }
            let bytes = tokio::fs::read(&upload.path).await.map_err(|source| {
                InvalidInputError::Unreadable {
                    path: upload.path.clone(),
                    source,
                }
            })?;
            debug!(bytes = bytes.len(), mime_type = %upload.mime_type, "Read upload");
            match file_type {
                FileType::Pdf => {
                    let uri = data_url(PDF_MIME_TYPE, &bytes);
                    Ok(Resolved {
                        request: DocumentRequest::new(file_type, true, uri.clone()),
                        preview: PreviewHandle::Uri(uri),
                    })
                }
                FileType::Image => {
                    let uri = data_url(&upload.mime_type, &bytes);
                    Ok(Resolved {
                        request: DocumentRequest::new(file_type, true, uri),
                        preview: PreviewHandle::RawBytes {
                            mime_type: upload.mime_type.clone(),
                            bytes,
                        },
                    })
                }
            }
        }
    }
}
