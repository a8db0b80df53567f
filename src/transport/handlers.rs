//! Delivery handlers backed by `reqwest`.
use std::collections::BTreeMap;

use futures::future::{self, BoxFuture, FutureExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::{HttpHandler, HttpRequest, HttpResponse};
use crate::{error::TransportError, Error, Result};

/// Request/response delivery. Non-success statuses are reported as
/// [`TransportError::HttpStatus`].
#[derive(Debug, Clone, Default)]
pub struct FetchHandler {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl FetchHandler {
    pub fn new() -> FetchHandler {
        FetchHandler::default()
    }

    pub fn with_client(client: reqwest::Client) -> FetchHandler {
        FetchHandler { client }
    }
}

impl HttpHandler for FetchHandler {
    fn handle(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
        let client = self.client.clone();
        async move {
            let response = send(&client, request).await?;
            let status = response.status().as_u16();
            let headers = response_headers(response.headers());
            let body = response.text().await?;
            let response = HttpResponse {
                status,
                headers,
                body,
            };

            if !response.is_success() {
                log::warn!(target: "feature_evaluations",
                           status;
                           "received non-success response");
                return Err(Error::Transport(TransportError::HttpStatus {
                    status,
                    body: response.body,
                }));
            }

            Ok(response)
        }
        .boxed()
    }
}

/// Best-effort delivery.
///
/// The request is detached onto the current tokio runtime and the returned future resolves as
/// soon as it is queued, with status 200 and an empty body. The outcome of the delivery itself is
/// only logged. Without a runtime the request cannot be queued and
/// [`TransportError::BeaconNotQueued`] is returned.
#[derive(Debug, Clone, Default)]
pub struct BeaconHandler {
    client: reqwest::Client,
}

impl BeaconHandler {
    pub fn new() -> BeaconHandler {
        BeaconHandler::default()
    }

    pub fn with_client(client: reqwest::Client) -> BeaconHandler {
        BeaconHandler { client }
    }
}

impl HttpHandler for BeaconHandler {
    fn handle(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return future::ready(Err(Error::Transport(TransportError::BeaconNotQueued))).boxed();
        };

        let client = self.client.clone();
        runtime.spawn(async move {
            match send(&client, request).await {
                Ok(response) => log::debug!(target: "feature_evaluations",
                                            status = response.status().as_u16();
                                            "beacon delivered"),
                Err(err) => log::warn!(target: "feature_evaluations",
                                       "beacon delivery failed: {:?}", err),
            }
        });

        future::ready(Ok(HttpResponse {
            status: 200,
            ..Default::default()
        }))
        .boxed()
    }
}

async fn send(client: &reqwest::Client, request: HttpRequest) -> Result<reqwest::Response> {
    let url = request.url()?;

    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        // reqwest derives the host header from the URL.
        if name == "host" {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::Signing(format!("invalid header name {name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| TransportError::Signing(format!("invalid header value: {err}")))?;
        headers.insert(name, value);
    }

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|err| TransportError::Signing(format!("invalid method: {err}")))?;

    let response = client
        .request(method, url)
        .headers(headers)
        .body(request.body)
        .send()
        .await?;
    Ok(response)
}

fn response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn request() -> HttpRequest {
        HttpRequest {
            method: "POST".to_owned(),
            protocol: "http:".to_owned(),
            hostname: "127.0.0.1".to_owned(),
            port: Some(1),
            path: "/beacon".to_owned(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    #[test]
    fn beacon_requires_runtime() {
        let result = futures::executor::block_on(BeaconHandler::new().handle(request()));

        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::BeaconNotQueued))
        ));
    }

    #[tokio::test]
    async fn beacon_resolves_once_queued() {
        let response = BeaconHandler::new().handle(request()).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn fetch_reports_non_success_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbusy")
                .await
                .unwrap();
        });

        let result = FetchHandler::new()
            .handle(HttpRequest {
                port: Some(port),
                ..request()
            })
            .await;

        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::HttpStatus { status: 503, body })) if body == "busy"
        ));
    }

    #[tokio::test]
    async fn fetch_surfaces_network_errors() {
        let result = FetchHandler::new().handle(request()).await;

        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::Network(_)))
        ));
    }
}
