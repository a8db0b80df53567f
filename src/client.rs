use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    cache::{EvaluationCache, EvaluationCacheConfig},
    evaluation_client::{EvaluationClient, EVALUATION_SERVICE},
    events_client::{EventsClient, EVENTS_SERVICE},
    transport::{RequestSigner, SigV4Signer, SignedTransport, UnsignedSigner},
    ClientConfig, EvaluationRequest, EvaluationResults, Result,
};

/// A client for feature evaluations.
///
/// In order to create a client instance, first create [`ClientConfig`]. Cloning is cheap and
/// clones share the same evaluation cache.
///
/// # Examples
/// ```
/// # use feature_evaluations::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::from_endpoint("https://example.com").project("project01"));
/// assert!(client.is_ok());
/// ```
#[derive(Clone)]
pub struct Client {
    cache: EvaluationCache,
    events: EventsClient,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let (endpoint, events_endpoint) = config.parse_endpoints()?;

        let signer = |service: &str| -> Arc<dyn RequestSigner> {
            match &config.credentials {
                Some(credentials) => Arc::new(SigV4Signer::new(
                    credentials.clone(),
                    config.region.clone(),
                    service,
                )),
                None => Arc::new(UnsignedSigner),
            }
        };

        let evaluation_client = EvaluationClient::new(
            SignedTransport::new(
                endpoint,
                signer(EVALUATION_SERVICE),
                config.fetch_handler.clone(),
                config.beacon_handler.clone(),
            ),
            config.project.clone(),
        );
        let events = EventsClient::new(SignedTransport::new(
            events_endpoint,
            signer(EVENTS_SERVICE),
            config.fetch_handler.clone(),
            config.beacon_handler.clone(),
        ));

        let cache = EvaluationCache::new(
            EvaluationCacheConfig {
                enabled: config.project.is_some(),
                max_features_per_request: config.max_features_per_request,
                persist: config.persist_evaluations,
            },
            Arc::new(evaluation_client),
            config.attribute_recorder.clone(),
            config.session_storage.clone(),
        );

        log::debug!(target: "feature_evaluations",
                    project = config.project.as_deref().unwrap_or_default(),
                    signed = config.credentials.is_some();
                    "created feature evaluation client");

        Ok(Client { cache, events })
    }

    /// Request evaluations for a set of features.
    ///
    /// Returns as soon as the request is recorded; evaluations that are not cached yet are
    /// fetched in the background and can be read with [`Client::get_evaluations`].
    ///
    /// # Errors
    ///
    /// [`Error::NotEnabled`](crate::Error::NotEnabled) if no project is configured, or
    /// [`Error::Validation`](crate::Error::Validation) if the request is malformed.
    pub fn request_evaluations(&self, request: EvaluationRequest) -> Result<()> {
        self.cache.request_evaluations(request)
    }

    /// Get evaluations for features of the last request.
    ///
    /// Resolves immediately if all features are cached. Otherwise waits for the fetch started by
    /// the last [`Client::request_evaluations`] call.
    pub fn get_evaluations<I, S>(&self, features: I) -> BoxFuture<'static, Result<EvaluationResults>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache.get_evaluations(features)
    }

    /// Client for sending telemetry batches, signed for the events data plane.
    pub fn events(&self) -> &EventsClient {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::{
        events_client::{AppMonitorDetails, PutRumEventsRequest},
        storage::MemoryStorage,
        transport::{testing::RecordingHandler, Credentials},
        ClientConfig, EvaluationRequest, EvaluationValue, Error, UserDetails,
    };

    const EVALUATIONS: &str = r#"{
        "results": [{
            "feature": "arn:aws:evidently:us-west-2:000000000000:project/project01/feature/feature01",
            "reason": "DEFAULT",
            "variation": "on",
            "value": { "boolValue": true }
        }]
    }"#;

    fn config(fetch: &RecordingHandler) -> ClientConfig {
        ClientConfig::from_endpoint("https://evidently.us-west-2.amazonaws.com")
            .project("project01")
            .region("us-west-2")
            .credentials(Credentials::new("abc123", "xyz456"))
            .fetch_handler(fetch.clone())
            .beacon_handler(RecordingHandler::default())
    }

    #[tokio::test]
    async fn returns_evaluations_once_fetched() {
        let fetch = RecordingHandler::responding(EVALUATIONS);
        let client = config(&fetch).to_client().unwrap();

        client
            .request_evaluations(EvaluationRequest::new(["feature01"]).entity_id("user-1"))
            .unwrap();
        let evaluations = client.get_evaluations(["feature01"]).await.unwrap();

        assert_eq!(evaluations["feature01"].value, EvaluationValue::BoolValue(true));
        let requests = fetch.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/projects/project01/evaluations");
        assert!(requests[0].headers["authorization"]
            .contains("/us-west-2/evidently/aws4_request"));
    }

    #[tokio::test]
    async fn without_project_evaluations_are_not_enabled() {
        let fetch = RecordingHandler::responding(EVALUATIONS);
        let client = ClientConfig::from_endpoint("https://example.com")
            .fetch_handler(fetch.clone())
            .to_client()
            .unwrap();

        assert!(matches!(
            client.request_evaluations(EvaluationRequest::new(["feature01"])),
            Err(Error::NotEnabled)
        ));
        assert!(matches!(
            client.get_evaluations(["feature01"]).await,
            Err(Error::NotEnabled)
        ));
        assert!(fetch.requests().is_empty());
    }

    #[tokio::test]
    async fn without_credentials_requests_are_unsigned() {
        let fetch = RecordingHandler::responding(EVALUATIONS);
        let client = ClientConfig::from_endpoint("https://example.com")
            .project("project01")
            .fetch_handler(fetch.clone())
            .to_client()
            .unwrap();

        client
            .request_evaluations(EvaluationRequest::new(["feature01"]).entity_id("user-1"))
            .unwrap();
        client.get_evaluations(["feature01"]).await.unwrap();

        let request = &fetch.requests()[0];
        assert!(!request.headers.contains_key("authorization"));
        assert!(!request.headers.contains_key("x-amz-content-sha256"));
    }

    #[test]
    fn rejects_invalid_endpoints() {
        for endpoint in ["not a url", "data:text/plain,hello"] {
            assert!(
                matches!(
                    ClientConfig::from_endpoint(endpoint).to_client(),
                    Err(Error::InvalidEndpoint(_))
                ),
                "{endpoint} should be rejected"
            );
        }
        assert!(matches!(
            ClientConfig::from_endpoint("https://example.com")
                .events_endpoint("::")
                .to_client(),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn configured_limit_applies() {
        let fetch = RecordingHandler::responding(EVALUATIONS);
        let client = config(&fetch)
            .max_features_per_request(2)
            .to_client()
            .unwrap();

        assert!(matches!(
            client.request_evaluations(EvaluationRequest::new(["a", "b", "c"])),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn clients_sharing_storage_share_persisted_evaluations() {
        let storage = Arc::new(MemoryStorage::new());
        let fetch = RecordingHandler::responding(EVALUATIONS);

        let first = config(&fetch)
            .persist_evaluations(true)
            .session_storage(storage.clone())
            .to_client()
            .unwrap();
        first
            .request_evaluations(EvaluationRequest::new(["feature01"]).entity_id("user-1"))
            .unwrap();
        first.get_evaluations(["feature01"]).await.unwrap();

        let second = config(&fetch)
            .persist_evaluations(true)
            .session_storage(storage)
            .to_client()
            .unwrap();
        let evaluations = second.get_evaluations(["feature01"]).await.unwrap();

        assert_eq!(evaluations["feature01"].variation, "on");
        assert_eq!(fetch.requests().len(), 1);
    }

    #[tokio::test]
    async fn events_are_signed_for_events_endpoint() {
        let fetch = RecordingHandler::responding("");
        let client = config(&fetch)
            .events_endpoint("https://dataplane.rum.us-west-2.amazonaws.com")
            .to_client()
            .unwrap();

        client
            .events()
            .send_fetch(&PutRumEventsRequest {
                batch_id: "batch-1".to_owned(),
                app_monitor_details: AppMonitorDetails {
                    id: "monitor-1".to_owned(),
                    version: "1.0.0".to_owned(),
                },
                user_details: UserDetails::default(),
                rum_events: vec![crate::events_client::RumEvent {
                    id: "event-1".to_owned(),
                    timestamp: Utc::now(),
                    event_type: "com.amazon.rum.page_view_event".to_owned(),
                    metadata: None,
                    details: "{}".to_owned(),
                }],
            })
            .await
            .unwrap();

        let request = &fetch.requests()[0];
        assert_eq!(request.hostname, "dataplane.rum.us-west-2.amazonaws.com");
        assert_eq!(request.path, "/appmonitors/monitor-1");
        assert!(request.headers["authorization"].contains("/us-west-2/rum/aws4_request"));
    }
}
