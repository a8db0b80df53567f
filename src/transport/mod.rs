//! Signed HTTP dispatch.
//!
//! [`SignedTransport`] turns a serialized body and a path suffix into an [`HttpRequest`]
//! descriptor, signs it with the configured [`RequestSigner`] and hands it to one of two
//! [`HttpHandler`]s:
//!
//! - [`Delivery::Fetch`] for request/response delivery. Requests are fully signed (authorization
//!   and date headers).
//! - [`Delivery::Beacon`] for best-effort delivery, e.g. on shutdown, where only simple header-less
//!   requests are reliable. Requests are presigned (signature in query parameters, 60 second
//!   expiry).
//!
//! Nothing is retried at this layer; handler failures are returned to the caller as-is.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use url::Url;

use crate::{error::TransportError, serializer::content_hash, Result};

mod handlers;
mod signer;

pub use handlers::{BeaconHandler, FetchHandler};
pub use signer::{Credentials, RequestSigner, SigV4Signer, UnsignedSigner};
pub(crate) use signer::uri_encode;

pub(crate) const METHOD: &str = "POST";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain;charset=UTF-8";
/// Header carrying the SHA-256 of the exact request body.
pub const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";

/// Lifetime of presigned requests.
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(60);

/// An HTTP-shaped request descriptor.
///
/// Header names are lowercase. `BTreeMap`s keep headers and query parameters in a stable order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Scheme with trailing colon, e.g. `https:`.
    pub protocol: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpRequest {
    /// Full URL of the request, including query parameters.
    pub fn url(&self) -> std::result::Result<Url, TransportError> {
        let scheme = self.protocol.trim_end_matches(':');
        let mut url = match self.port {
            Some(port) => Url::parse(&format!("{scheme}://{}:{port}{}", self.hostname, self.path)),
            None => Url::parse(&format!("{scheme}://{}{}", self.hostname, self.path)),
        }
        .map_err(TransportError::InvalidUrl)?;

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

/// A structured HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A delivery channel: accepts a request descriptor and resolves to the response.
///
/// Implemented for closures, which is handy in tests:
///
/// ```
/// # use feature_evaluations::transport::{HttpHandler, HttpRequest, HttpResponse};
/// # use futures::FutureExt;
/// let handler = |_request: HttpRequest| {
///     async { Ok(HttpResponse { status: 200, ..Default::default() }) }.boxed()
/// };
/// # fn assert_handler(_: impl HttpHandler) {}
/// # assert_handler(handler);
/// ```
pub trait HttpHandler: Send + Sync {
    fn handle(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>>;
}

impl<F> HttpHandler for F
where
    F: Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync,
{
    fn handle(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
        self(request)
    }
}

/// Which delivery channel (and signing discipline) to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Request/response delivery with full signing.
    Fetch,
    /// Fire-and-forget delivery with a presigned request.
    Beacon,
}

/// Build an unsigned request descriptor for `{endpoint path}/{path_suffix}`.
///
/// A single trailing slash is stripped from the endpoint path. When `with_content_hash` is set,
/// the [`CONTENT_SHA256_HEADER`] is computed from the exact `body`.
pub fn build_request(
    endpoint: &Url,
    path_suffix: &str,
    body: String,
    content_type: &str,
    with_content_hash: bool,
) -> HttpRequest {
    let base_path = endpoint.path();
    let base_path = base_path.strip_suffix('/').unwrap_or(base_path);
    let hostname = endpoint.host_str().unwrap_or_default().to_owned();
    let host = match endpoint.port() {
        Some(port) => format!("{hostname}:{port}"),
        None => hostname.clone(),
    };

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_owned(), content_type.to_owned());
    headers.insert("host".to_owned(), host);
    if with_content_hash {
        headers.insert(CONTENT_SHA256_HEADER.to_owned(), content_hash(&body));
    }

    HttpRequest {
        method: METHOD.to_owned(),
        protocol: format!("{}:", endpoint.scheme()),
        hostname,
        port: endpoint.port(),
        path: format!("{base_path}/{path_suffix}"),
        query: BTreeMap::new(),
        headers,
        body,
    }
}

/// Builds, signs and delivers requests to one service endpoint.
#[derive(Clone)]
pub struct SignedTransport {
    endpoint: Url,
    signer: Arc<dyn RequestSigner>,
    fetch_handler: Arc<dyn HttpHandler>,
    beacon_handler: Arc<dyn HttpHandler>,
    clock: fn() -> DateTime<Utc>,
}

impl SignedTransport {
    pub fn new(
        endpoint: Url,
        signer: Arc<dyn RequestSigner>,
        fetch_handler: Arc<dyn HttpHandler>,
        beacon_handler: Arc<dyn HttpHandler>,
    ) -> SignedTransport {
        SignedTransport {
            endpoint,
            signer,
            fetch_handler,
            beacon_handler,
            clock: Utc::now,
        }
    }

    /// Replace the clock used for signing dates.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> SignedTransport {
        self.clock = clock;
        self
    }

    /// Build and sign a request for `delivery` without sending it.
    pub fn prepare(
        &self,
        delivery: Delivery,
        path_suffix: &str,
        body: String,
        content_type: &str,
    ) -> Result<HttpRequest> {
        let request = build_request(
            &self.endpoint,
            path_suffix,
            body,
            content_type,
            self.signer.is_signing(),
        );
        let now = (self.clock)();
        let request = match delivery {
            Delivery::Fetch => self.signer.sign(request, now)?,
            Delivery::Beacon => self.signer.presign(request, PRESIGN_EXPIRY, now)?,
        };
        Ok(request)
    }

    /// Build, sign and deliver a request.
    ///
    /// All work up to handing the request to the handler happens before this function returns;
    /// the returned future only awaits delivery.
    pub fn dispatch(
        &self,
        delivery: Delivery,
        path_suffix: &str,
        body: String,
        content_type: &str,
    ) -> BoxFuture<'static, Result<HttpResponse>> {
        let request = match self.prepare(delivery, path_suffix, body, content_type) {
            Ok(request) => request,
            Err(err) => return future::ready(Err(err)).boxed(),
        };

        log::debug!(target: "feature_evaluations",
                    path = request.path.as_str();
                    "dispatching {delivery:?} request");

        match delivery {
            Delivery::Fetch => self.fetch_handler.handle(request),
            Delivery::Beacon => self.beacon_handler.handle(request),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use futures::future::{BoxFuture, FutureExt};

    use super::{HttpHandler, HttpRequest, HttpResponse};
    use crate::Result;

    /// Records every request and answers with a fixed response.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingHandler {
        pub requests: Arc<Mutex<Vec<HttpRequest>>>,
        pub response: HttpResponse,
    }

    impl RecordingHandler {
        pub fn responding(body: &str) -> RecordingHandler {
            RecordingHandler {
                requests: Arc::default(),
                response: HttpResponse {
                    status: 200,
                    body: body.to_owned(),
                    ..Default::default()
                },
            }
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpHandler for RecordingHandler {
        fn handle(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
            self.requests.lock().unwrap().push(request);
            let response = self.response.clone();
            async move { Ok(response) }.boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::{testing::RecordingHandler, *};

    fn epoch() -> DateTime<Utc> {
        DateTime::UNIX_EPOCH
    }

    #[test]
    fn strips_single_trailing_slash_from_endpoint_path() {
        let endpoint = Url::parse("https://example.com/prod/").unwrap();

        let request = build_request(&endpoint, "projects/p1/evaluations", "{}".to_owned(), CONTENT_TYPE_JSON, false);

        assert_eq!(request.path, "/prod/projects/p1/evaluations");
        assert_eq!(request.hostname, "example.com");
        assert_eq!(request.protocol, "https:");
        assert_eq!(request.headers["host"], "example.com");
        assert!(!request.headers.contains_key(CONTENT_SHA256_HEADER));
    }

    #[test]
    fn root_endpoint_produces_absolute_path() {
        let endpoint = Url::parse("https://example.com").unwrap();

        let request = build_request(&endpoint, "appmonitors/m1", "{}".to_owned(), CONTENT_TYPE_TEXT, true);

        assert_eq!(request.path, "/appmonitors/m1");
        assert_eq!(request.headers["content-type"], CONTENT_TYPE_TEXT);
        assert_eq!(request.headers[CONTENT_SHA256_HEADER], content_hash("{}"));
    }

    #[test]
    fn host_header_keeps_non_default_port() {
        let endpoint = Url::parse("http://localhost:8080/").unwrap();

        let request = build_request(&endpoint, "x", String::new(), CONTENT_TYPE_JSON, false);

        assert_eq!(request.headers["host"], "localhost:8080");
        assert_eq!(request.url().unwrap().as_str(), "http://localhost:8080/x");
    }

    #[test]
    fn url_includes_query_parameters() {
        let endpoint = Url::parse("https://example.com/").unwrap();
        let mut request = build_request(&endpoint, "x", String::new(), CONTENT_TYPE_JSON, false);
        request.query.insert("X-Amz-Expires".to_owned(), "60".to_owned());

        assert_eq!(request.url().unwrap().as_str(), "https://example.com/x?X-Amz-Expires=60");
    }

    #[test]
    fn only_2xx_responses_are_successful() {
        let response = |status| HttpResponse {
            status,
            ..Default::default()
        };

        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(199).is_success());
        assert!(!response(304).is_success());
        assert!(!response(500).is_success());
    }

    #[tokio::test]
    async fn routes_each_delivery_to_its_handler() {
        let fetch = RecordingHandler::responding("fetched");
        let beacon = RecordingHandler::responding("");
        let transport = SignedTransport::new(
            Url::parse("https://example.com/").unwrap(),
            Arc::new(SigV4Signer::new(Credentials::new("abc123", "xyz456"), "us-west-2", "rum")),
            Arc::new(fetch.clone()),
            Arc::new(beacon.clone()),
        )
        .with_clock(epoch);

        let response = transport
            .dispatch(Delivery::Fetch, "a", "{}".to_owned(), CONTENT_TYPE_JSON)
            .await
            .unwrap();
        assert_eq!(response.body, "fetched");

        transport
            .dispatch(Delivery::Beacon, "b", "{}".to_owned(), CONTENT_TYPE_TEXT)
            .await
            .unwrap();

        let fetched = fetch.requests();
        assert_eq!(fetched.len(), 1);
        assert!(fetched[0].headers.contains_key("authorization"));
        assert_eq!(fetched[0].headers["x-amz-date"], "19700101T000000Z");

        let beaconed = beacon.requests();
        assert_eq!(beaconed.len(), 1);
        assert!(!beaconed[0].headers.contains_key("authorization"));
        assert_eq!(beaconed[0].query["X-Amz-Expires"], "60");
        assert!(beaconed[0].query.contains_key("X-Amz-Signature"));
    }

    #[tokio::test]
    async fn unsigned_transport_leaves_requests_untouched() {
        let fetch = RecordingHandler::responding("{}");
        let transport = SignedTransport::new(
            Url::parse("https://example.com/").unwrap(),
            Arc::new(UnsignedSigner),
            Arc::new(fetch.clone()),
            Arc::new(RecordingHandler::default()),
        );

        transport
            .dispatch(Delivery::Fetch, "a", "{}".to_owned(), CONTENT_TYPE_JSON)
            .await
            .unwrap();

        let request = &fetch.requests()[0];
        assert_eq!(
            request.headers.keys().collect::<Vec<_>>(),
            vec!["content-type", "host"]
        );
        assert!(request.query.is_empty());
    }
}
