//! Client for the Mistral OCR API.

use std::{convert::Infallible, env, fmt, str::FromStr};

use reqwest::StatusCode;

use crate::{prelude::*, source::DocumentRequest};

use super::client::OcrClient;

/// Where the API lives, unless `MISTRAL_API_BASE` says otherwise.
const DEFAULT_API_BASE: &str = "https://api.mistral.ai";

/// An API key from the command line. Its `Debug` output is redacted, so
/// options can be logged safely.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// The key itself.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl FromStr for ApiKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

/// Look up our API key. An explicit key takes priority over
/// `MISTRAL_API_KEY`. A blank key counts as missing.
pub fn api_key(explicit: Option<&str>) -> Result<String> {
    let key = match explicit {
        Some(key) => Some(key.to_owned()),
        None => env::var("MISTRAL_API_KEY").ok(),
    };
    match key {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_owned()),
        _ => Err(anyhow!(
            "Please supply a Mistral API key using --api-key or MISTRAL_API_KEY"
        )),
    }
}

/// Request body for `POST /v1/ocr`.
#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: &'a DocumentRequest,
}

/// Talks to the Mistral OCR endpoint over HTTPS.
#[derive(Debug)]
pub struct MistralClient {
    /// Shared HTTP client.
    http: reqwest::Client,

    /// The full URL of the OCR endpoint.
    url: String,

    /// Our bearer token.
    api_key: String,
}

impl MistralClient {
    /// Create a new client. `MISTRAL_API_BASE` may be used to point at a
    /// proxy or a test server.
    pub fn new(api_key: String) -> Result<Self> {
        let api_base =
            env::var("MISTRAL_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned());
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self::with_http(http, &api_base, api_key))
    }

    /// Create a client from an existing HTTP client and API base.
    fn with_http(http: reqwest::Client, api_base: &str, api_key: String) -> Self {
        Self {
            http,
            url: ocr_endpoint(api_base),
            api_key,
        }
    }
}

/// Build the OCR endpoint URL from an API base.
fn ocr_endpoint(api_base: &str) -> String {
    let mut url = api_base.trim_end_matches('/').to_owned();
    if !url.ends_with("/v1") {
        url.push_str("/v1");
    }
    url.push_str("/ocr");
    url
}

#[async_trait]
impl OcrClient for MistralClient {
    #[instrument(level = "debug", skip_all, fields(model = %model, kind = %document.kind()))]
    async fn process(&self, model: &str, document: &DocumentRequest) -> Result<Value> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&OcrRequest { model, document })
            .send()
            .await
            .context("failed to send OCR request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(anyhow!(
                    "invalid or missing API key (status {}): {}",
                    status,
                    body.trim()
                ));
            }
            return Err(anyhow!(
                "OCR request failed (status {}): {}",
                status,
                body.trim()
            ));
        }

        let response = response
            .json::<Value>()
            .await
            .context("failed to parse OCR response")?;
        if let Some(usage) = response.get("usage_info") {
            debug!(%usage, "OCR usage");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::ocr::{
        invoker::OcrInvoker,
        result::{FailureKind, INVALID_API_KEY, ResultText},
    };

    /// Read one HTTP request, including its body.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|len| len.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answer a single request with `status` and a JSON `body`. Returns the
    /// API base to use and a handle yielding the request we received.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            request
        });
        (format!("http://{addr}"), handle)
    }

    fn client(api_base: &str) -> MistralClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        MistralClient::with_http(http, api_base, "sk-1234".to_owned())
    }

    fn document() -> DocumentRequest {
        DocumentRequest::PdfUrl("https://example.com/a.pdf".to_owned())
    }

    #[tokio::test]
    async fn test_successful_response() {
        let (api_base, server) =
            serve_once("200 OK", r#"{"pages":[{"index":0,"markdown":"hello"}]}"#).await;
        let invoker = OcrInvoker::new(Arc::new(client(&api_base)))
            .with_throttle(std::time::Duration::ZERO);
        let text = invoker.invoke(&document()).await;
        assert_eq!(text.as_str(), "hello");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/ocr "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-1234"));
        assert!(request.contains(r#""document_url":"https://example.com/a.pdf""#));
    }

    #[tokio::test]
    async fn test_unauthorized_is_an_authentication_failure() {
        let (api_base, _server) =
            serve_once("401 Unauthorized", r#"{"detail":"Unauthorized"}"#).await;
        let invoker = OcrInvoker::new(Arc::new(client(&api_base)));
        let failure = invoker.try_invoke(&document()).await.unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Authentication);

        let (api_base, _server) = serve_once("403 Forbidden", "{}").await;
        let invoker = OcrInvoker::new(Arc::new(client(&api_base)));
        assert_eq!(invoker.invoke(&document()).await.as_str(), INVALID_API_KEY);
    }

    #[tokio::test]
    async fn test_server_error_is_a_processing_failure() {
        let (api_base, _server) =
            serve_once("500 Internal Server Error", r#"{"detail":"boom"}"#).await;
        let invoker = OcrInvoker::new(Arc::new(client(&api_base)));
        let failure = invoker.try_invoke(&document()).await.unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Processing);
        assert!(failure.to_string().contains("500"));
        let text = ResultText::from_failure(&failure);
        assert!(text.as_str().starts_with("Error processing document: "));
    }

    #[test]
    fn test_ocr_endpoint() {
        assert_eq!(
            ocr_endpoint("https://api.mistral.ai"),
            "https://api.mistral.ai/v1/ocr"
        );
        assert_eq!(
            ocr_endpoint("https://api.mistral.ai/"),
            "https://api.mistral.ai/v1/ocr"
        );
        assert_eq!(
            ocr_endpoint("http://localhost:4000/v1"),
            "http://localhost:4000/v1/ocr"
        );
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = "sk-secret".parse::<ApiKey>().unwrap();
        assert_eq!(key.expose(), "sk-secret");
        assert!(!format!("{:?}", Some(key)).contains("sk-secret"));
    }

    #[test]
    fn test_explicit_api_key() {
        assert_eq!(api_key(Some(" sk-1234 ")).unwrap(), "sk-1234");
        assert!(api_key(Some("   ")).is_err());
    }

    #[test]
    fn test_request_body() {
        let document = DocumentRequest::PdfUrl("https://example.com/a.pdf".to_owned());
        let body = serde_json::to_value(OcrRequest {
            model: "mistral-ocr-latest",
            document: &document,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "mistral-ocr-latest",
                "document": {
                    "type": "document_url",
                    "document_url": "https://example.com/a.pdf",
                },
            })
        );
    }
}
