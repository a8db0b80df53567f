//! An HTTP client for the batch feature evaluation endpoint.
use futures::future::{self, BoxFuture, FutureExt};

use crate::{
    serializer::serialize,
    transport::{uri_encode, Delivery, HttpResponse, SignedTransport, CONTENT_TYPE_JSON},
    types::BatchEvaluateFeatureRequest,
    Error, Result,
};

/// Service name evaluation requests are signed for.
pub const EVALUATION_SERVICE: &str = "evidently";

/// The capability the evaluation cache uses to reach the evaluation service.
///
/// Building and signing happen synchronously when this is called; the returned future only
/// awaits the response.
pub trait EvaluationDispatch: Send + Sync {
    fn dispatch_batch_evaluate_feature(
        &self,
        request: BatchEvaluateFeatureRequest,
    ) -> BoxFuture<'static, Result<HttpResponse>>;
}

impl<F> EvaluationDispatch for F
where
    F: Fn(BatchEvaluateFeatureRequest) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync,
{
    fn dispatch_batch_evaluate_feature(
        &self,
        request: BatchEvaluateFeatureRequest,
    ) -> BoxFuture<'static, Result<HttpResponse>> {
        self(request)
    }
}

/// Sends batch evaluation requests for one project over the fetch channel, fully signed.
#[derive(Clone)]
pub struct EvaluationClient {
    transport: SignedTransport,
    project: Option<String>,
}

impl EvaluationClient {
    pub fn new(transport: SignedTransport, project: Option<String>) -> EvaluationClient {
        EvaluationClient { transport, project }
    }

    /// `POST {endpoint}/projects/{project}/evaluations`.
    pub fn batch_evaluate_feature(
        &self,
        request: &BatchEvaluateFeatureRequest,
    ) -> BoxFuture<'static, Result<HttpResponse>> {
        let Some(project) = &self.project else {
            return future::ready(Err(Error::NotEnabled)).boxed();
        };
        let body = match serialize(request) {
            Ok(body) => body,
            Err(err) => return future::ready(Err(err.into())).boxed(),
        };

        log::debug!(target: "feature_evaluations",
                    project = project.as_str(),
                    count = request.requests.len();
                    "requesting feature evaluations");

        self.transport.dispatch(
            Delivery::Fetch,
            &format!("projects/{}/evaluations", uri_encode(project, true)),
            body,
            CONTENT_TYPE_JSON,
        )
    }
}

impl EvaluationDispatch for EvaluationClient {
    fn dispatch_batch_evaluate_feature(
        &self,
        request: BatchEvaluateFeatureRequest,
    ) -> BoxFuture<'static, Result<HttpResponse>> {
        self.batch_evaluate_feature(&request)
    }
}
