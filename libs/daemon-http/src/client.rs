use std::time::Duration;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::HttpError;

type Connector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Outbound HTTP client shared by the Distributor (EG dispatch) and the
/// RS Capacity Oracle (registry polling, when the registry is itself an
/// HTTP service rather than the shared queue-store hash).
///
/// Cloning is cheap: `hyper_util::client::legacy::Client` is internally
/// `Arc`-backed and safe to share across tasks without a mutex.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client<Connector, Full<Bytes>>,
}

impl HttpClient {
    /// Builds a client that allows both `http://` and `https://` targets —
    /// EGs and the RS registry are reached over the cluster-internal
    /// network, so plain HTTP is routine here (unlike a public-facing
    /// client, which would be HTTPS-only by default).
    pub fn new() -> Result<Self, HttpError> {
        let connector: Connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| HttpError::Tls(Box::new(e)))?
            .https_or_http()
            .enable_http1()
            .build();
        let inner = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self { inner })
    }

    /// `POST url` with a JSON body, the shared-secret auth header, and a
    /// per-call timeout. Returns the response status; any transport error
    /// or timeout becomes `HttpError`. Callers that only care about the
    /// 200/non-200 split (the Distributor) can map both to "failure".
    pub async fn post_json(
        &self,
        url: &str,
        body: &impl serde::Serialize,
        auth_header: (&str, &str),
        timeout: Duration,
    ) -> Result<StatusCode, HttpError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                uri: url.to_owned(),
                reason: e.to_string(),
            })?;
        let payload = serde_json::to_vec(body)?;
        let header_name = HeaderName::from_bytes(auth_header.0.as_bytes())
            .map_err(|e| HttpError::InvalidUri {
                uri: auth_header.0.to_owned(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(auth_header.1).map_err(|e| HttpError::InvalidUri {
            uri: auth_header.1.to_owned(),
            reason: e.to_string(),
        })?;

        let request = Request::post(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(header_name, header_value)
            .body(Full::new(Bytes::from(payload)))?;

        let call = self.inner.request(request);
        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| HttpError::Timeout(timeout))?
            .map_err(|e| HttpError::Transport(Box::new(e)))?;

        let status = response.status();
        // Drain the body so the connection can be reused; dispatch bodies
        // are tiny (an ack or an error string) and we never need them.
        let _ = tokio::time::timeout(timeout, response.into_body().collect()).await;
        Ok(status)
    }
}
