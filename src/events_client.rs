//! Delivery of ready-made telemetry batches to the events data plane.
//!
//! [`EventsClient::send_fetch`] is used during normal operation. [`EventsClient::send_beacon`] is
//! meant for shutdown, when there is no time to wait for a response: the request is presigned and
//! handed to the best-effort channel.
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::{
    attribute_recorder::UserDetails,
    serializer::{serialize, timestamp_seconds},
    transport::{uri_encode, Delivery, HttpResponse, SignedTransport, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT},
    Result,
};

/// Service name telemetry requests are signed for.
pub const EVENTS_SERVICE: &str = "rum";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMonitorDetails {
    pub id: String,
    pub version: String,
}

/// One telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RumEvent {
    pub id: String,
    #[serde(with = "timestamp_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub details: String,
}

/// A batch of telemetry events for one app monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRumEventsRequest {
    pub batch_id: String,
    pub app_monitor_details: AppMonitorDetails,
    pub user_details: UserDetails,
    pub rum_events: Vec<RumEvent>,
}

#[derive(Clone)]
pub struct EventsClient {
    transport: SignedTransport,
}

impl EventsClient {
    pub fn new(transport: SignedTransport) -> EventsClient {
        EventsClient { transport }
    }

    /// Send a batch over the request/response channel with a fully signed request.
    pub fn send_fetch(&self, request: &PutRumEventsRequest) -> BoxFuture<'static, Result<HttpResponse>> {
        self.send(Delivery::Fetch, request, CONTENT_TYPE_JSON)
    }

    /// Send a batch over the best-effort channel with a presigned request.
    pub fn send_beacon(&self, request: &PutRumEventsRequest) -> BoxFuture<'static, Result<HttpResponse>> {
        self.send(Delivery::Beacon, request, CONTENT_TYPE_TEXT)
    }

    fn send(
        &self,
        delivery: Delivery,
        request: &PutRumEventsRequest,
        content_type: &str,
    ) -> BoxFuture<'static, Result<HttpResponse>> {
        let body = match serialize(request) {
            Ok(body) => body,
            Err(err) => return future::ready(Err(err.into())).boxed(),
        };

        log::trace!(target: "feature_evaluations",
                    batch_id = request.batch_id.as_str(),
                    events = request.rum_events.len();
                    "sending telemetry batch");

        self.transport.dispatch(
            delivery,
            &format!("appmonitors/{}", uri_encode(&request.app_monitor_details.id, true)),
            body,
            content_type,
        )
    }
}
