use std::sync::Arc;

use url::Url;

use crate::{
    attribute_recorder::NoopAttributeRecorder,
    storage::NoopStorage,
    transport::{BeaconHandler, Credentials, FetchHandler, HttpHandler},
    AttributeRecorder, Client, Error, Result, SessionStorage,
};

/// Configuration for [`Client`].
pub struct ClientConfig {
    pub(crate) endpoint: String,
    pub(crate) events_endpoint: Option<String>,
    pub(crate) project: Option<String>,
    pub(crate) region: String,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) max_features_per_request: usize,
    pub(crate) persist_evaluations: bool,
    pub(crate) attribute_recorder: Arc<dyn AttributeRecorder>,
    pub(crate) session_storage: Arc<dyn SessionStorage>,
    pub(crate) fetch_handler: Arc<dyn HttpHandler>,
    pub(crate) beacon_handler: Arc<dyn HttpHandler>,
}

impl ClientConfig {
    /// Default limit on the number of features in a single evaluation request.
    pub const DEFAULT_MAX_FEATURES_PER_REQUEST: usize = 10;

    /// Default signing region.
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Create a default configuration for the evaluation service at `endpoint`.
    ///
    /// Requests are unsigned until [`ClientConfig::credentials`] is set, and evaluation is
    /// disabled until [`ClientConfig::project`] is set.
    ///
    /// ```
    /// # use feature_evaluations::ClientConfig;
    /// ClientConfig::from_endpoint("https://evidently.us-west-2.amazonaws.com");
    /// ```
    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        ClientConfig {
            endpoint: endpoint.into(),
            events_endpoint: None,
            project: None,
            region: ClientConfig::DEFAULT_REGION.to_owned(),
            credentials: None,
            max_features_per_request: ClientConfig::DEFAULT_MAX_FEATURES_PER_REQUEST,
            persist_evaluations: false,
            attribute_recorder: Arc::new(NoopAttributeRecorder),
            session_storage: Arc::new(NoopStorage),
            fetch_handler: Arc::new(FetchHandler::new()),
            beacon_handler: Arc::new(BeaconHandler::new()),
        }
    }

    /// Set the project features are evaluated in.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sign requests with `credentials`.
    ///
    /// ```
    /// # use feature_evaluations::{ClientConfig, Credentials};
    /// let config = ClientConfig::from_endpoint("https://evidently.us-west-2.amazonaws.com")
    ///     .region("us-west-2")
    ///     .credentials(Credentials::new("access-key-id", "secret-access-key"));
    /// ```
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override the telemetry data-plane endpoint. Defaults to the evaluation endpoint.
    pub fn events_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.events_endpoint = Some(endpoint.into());
        self
    }

    pub fn max_features_per_request(mut self, max: usize) -> Self {
        self.max_features_per_request = max;
        self
    }

    /// Mirror the last request and cached evaluations to session storage, so they survive a
    /// client being recreated with the same storage.
    pub fn persist_evaluations(mut self, persist: bool) -> Self {
        self.persist_evaluations = persist;
        self
    }

    /// Set the recorder evaluation reads are reported to.
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use feature_evaluations::{AttributeRecorder, ClientConfig, UserDetails};
    /// struct PrintAttributes;
    /// impl AttributeRecorder for PrintAttributes {
    ///     fn user_details(&self) -> UserDetails {
    ///         UserDetails::default()
    ///     }
    ///     fn add_attributes(&self, attributes: HashMap<String, String>) {
    ///         println!("{:?}", attributes);
    ///     }
    ///     fn reset_attributes(&self) {}
    /// }
    ///
    /// let config = ClientConfig::from_endpoint("https://example.com").attribute_recorder(PrintAttributes);
    /// ```
    pub fn attribute_recorder(mut self, recorder: impl AttributeRecorder + 'static) -> Self {
        self.attribute_recorder = Arc::new(recorder);
        self
    }

    pub fn session_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.session_storage = storage;
        self
    }

    /// Replace the request/response delivery channel.
    pub fn fetch_handler(mut self, handler: impl HttpHandler + 'static) -> Self {
        self.fetch_handler = Arc::new(handler);
        self
    }

    /// Replace the best-effort delivery channel.
    pub fn beacon_handler(mut self, handler: impl HttpHandler + 'static) -> Self {
        self.beacon_handler = Arc::new(handler);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEndpoint`] if an endpoint is not a valid URL.
    ///
    /// ```
    /// # use feature_evaluations::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_endpoint("https://example.com")
    ///     .project("project01")
    ///     .to_client()
    ///     .unwrap();
    /// ```
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }

    pub(crate) fn parse_endpoints(&self) -> Result<(Url, Url)> {
        let endpoint = parse_endpoint(&self.endpoint)?;
        let events_endpoint = match &self.events_endpoint {
            Some(events_endpoint) => parse_endpoint(events_endpoint)?,
            None => endpoint.clone(),
        };
        Ok((endpoint, events_endpoint))
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(Error::InvalidEndpoint)?;
    if url.host_str().is_none() {
        return Err(Error::InvalidEndpoint(url::ParseError::EmptyHost));
    }
    Ok(url)
}
