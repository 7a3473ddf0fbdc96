use crate::LoadKitError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime::Mime;
use reqwest::{Client, Url};

/// An upstream response, mirrored back to the caller as-is.
#[derive(Debug, Clone)]
pub struct Relayed {
    pub status: u16,
    pub content_type: Option<Mime>,
    pub body: Bytes,
}

/// Outbound side of the `/request` relay.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Relayed, LoadKitError>;
}

/// Performs a single plain GET per call. No retries and no timeout policy:
/// failures and slowness of the remote end are exactly what callers want to
/// see.
#[derive(Debug, Clone, Default)]
pub struct HttpUpstream {
    client: Client,
    max_body: Option<usize>,
}

impl HttpUpstream {
    pub fn new(max_body: Option<usize>) -> Self {
        Self::with_client(Client::new(), max_body)
    }

    pub fn with_client(client: Client, max_body: Option<usize>) -> Self {
        Self { client, max_body }
    }
}

fn too_large() -> LoadKitError {
    LoadKitError::NetworkError("Upstream body exceeds size limit".into())
}

#[async_trait::async_trait]
impl Upstream for HttpUpstream {
    /// Fetches `url` and buffers the body.
    ///
    /// When a body cap is configured it is enforced twice: up front against
    /// `Content-Length`, then while streaming, since the header can lie.
    ///
    /// # Errors
    /// Returns `LoadKitError::NetworkError` if the request fails, the body cannot
    /// be read, or the body exceeds the configured cap. Non-2xx statuses are
    /// not errors; they are relayed.
    async fn get(&self, url: &Url) -> Result<Relayed, LoadKitError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LoadKitError::NetworkError(e.to_string()))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Mime>().ok());

        if let (Some(max), Some(len)) = (self.max_body, resp.content_length()) {
            if len > max as u64 {
                return Err(too_large());
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| LoadKitError::NetworkError(e.to_string()))?
        {
            if let Some(max) = self.max_body {
                if buf.len() + chunk.len() > max {
                    return Err(too_large());
                }
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(Relayed { status, content_type, body: buf.freeze() })
    }
}
