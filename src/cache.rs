//! The evaluation cache.
//!
//! [`EvaluationCache`] decides which features need fetching, keeps at most one fetch in flight and
//! answers point queries from cached results or from that shared fetch.
//!
//! Cached evaluations are only valid for the entity and context of the last request. When a
//! request targets a different entity or context, the cache is cleared and a generation counter is
//! bumped. Every fetch remembers the generation it was dispatched under and its results are only
//! merged if the generation is still current, so a slow fetch for a superseded request never
//! pollutes the cache. The fetch itself is not cancelled.
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::{
    channel::oneshot,
    future::{self, BoxFuture, FutureExt, Shared},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    attribute_recorder::AttributeRecorder,
    error::{TransportError, ValidationError},
    evaluation_client::EvaluationDispatch,
    serializer::serialize,
    storage::SessionStorage,
    types::{
        BatchEvaluateFeatureRequest, BatchEvaluateFeatureResult, EvaluationRequest,
        EvaluationResult, EvaluationResults, FeatureEvaluationRequest,
    },
    Error, Result,
};

const REQUEST_CACHE_KEY: &str = "lastRequest";
const EVALS_CACHE_KEY: &str = "cachedEvaluations";

type PendingFetch = Shared<BoxFuture<'static, Result<Arc<EvaluationResults>>>>;

/// Configuration for [`EvaluationCache`].
#[derive(Debug, Clone)]
pub struct EvaluationCacheConfig {
    /// Whether feature evaluation is configured at all (i.e., a project is set).
    pub enabled: bool,
    /// Maximum number of features in a single [`EvaluationRequest`].
    pub max_features_per_request: usize,
    /// Mirror the last request and cached evaluations to [`SessionStorage`].
    pub persist: bool,
}

impl Default for EvaluationCacheConfig {
    fn default() -> EvaluationCacheConfig {
        EvaluationCacheConfig {
            enabled: true,
            max_features_per_request: crate::ClientConfig::DEFAULT_MAX_FEATURES_PER_REQUEST,
            persist: false,
        }
    }
}

/// Caches and coalesces feature evaluations for one client.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct EvaluationCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: EvaluationCacheConfig,
    dispatch: Arc<dyn EvaluationDispatch>,
    recorder: Arc<dyn AttributeRecorder>,
    storage: Arc<dyn SessionStorage>,
    // Never held across an await point, nor while calling the dispatcher or the recorder.
    state: Mutex<State>,
}

struct State {
    /// Whether persisted state has been read already.
    seeded: bool,
    last_request: Option<EvaluationRequest>,
    evaluations: EvaluationResults,
    generation: u64,
    pending: PendingFetch,
}

enum Lookup {
    /// Every requested feature is cached.
    Cached(EvaluationResults),
    /// Some features must come from the pending fetch. `cached` holds those that don't.
    Pending {
        pending: PendingFetch,
        cached: EvaluationResults,
    },
}

impl EvaluationCache {
    pub fn new(
        config: EvaluationCacheConfig,
        dispatch: Arc<dyn EvaluationDispatch>,
        recorder: Arc<dyn AttributeRecorder>,
        storage: Arc<dyn SessionStorage>,
    ) -> EvaluationCache {
        EvaluationCache {
            inner: Arc::new(Inner {
                config,
                dispatch,
                recorder,
                storage,
                state: Mutex::new(State {
                    seeded: false,
                    last_request: None,
                    evaluations: EvaluationResults::new(),
                    generation: 0,
                    pending: resolved(EvaluationResults::new()),
                }),
            }),
        }
    }

    /// Submit a request for evaluations.
    ///
    /// Bookkeeping happens before this function returns: the request becomes the last request and,
    /// if any of its features are not cached, a fetch for exactly those features is dispatched and
    /// becomes the pending fetch. If a tokio runtime is available, the fetch is driven there right
    /// away; otherwise it runs when first awaited by [`EvaluationCache::get_evaluations`].
    ///
    /// # Errors
    ///
    /// - [`Error::NotEnabled`] if no project is configured.
    /// - [`Error::Validation`] if the request has too many features or an empty feature name.
    ///   Nothing is changed in that case.
    pub fn request_evaluations(&self, request: EvaluationRequest) -> Result<()> {
        let inner = &self.inner;
        if !inner.config.enabled {
            return Err(Error::NotEnabled);
        }
        inner.validate(&request)?;

        // The dispatched fetch is handed over once the lock is released, so the dispatcher and
        // the recorder may call back into the cache.
        let (fetch_tx, fetch_rx) = oneshot::channel::<BoxFuture<'static, Result<Arc<EvaluationResults>>>>();

        let (pending, needed) = {
            let mut guard = inner.lock();
            inner.seed(&mut guard);
            let state = &mut *guard;

            let reuse = state
                .last_request
                .as_ref()
                .is_some_and(|last| last.same_identity(&request));

            let needed: Vec<String> = if reuse {
                request
                    .features
                    .iter()
                    .filter(|feature| !state.evaluations.contains_key(*feature))
                    .cloned()
                    .collect()
            } else {
                state.evaluations.clear();
                inner.clear_persisted();
                state.generation += 1;
                log::debug!(target: "feature_evaluations",
                            generation = state.generation;
                            "evaluation target changed, cached evaluations invalidated");
                request.features.clone()
            };

            inner.persist(REQUEST_CACHE_KEY, &request);
            state.last_request = Some(request.clone());

            let generation = state.generation;
            let cache = Arc::downgrade(&self.inner);
            let requested = needed.clone();
            let pending = async move {
                let fetch = fetch_rx
                    .await
                    .map_err(|_canceled| Error::NotLoaded(requested))?;
                let evaluations = fetch.await?;
                if let Some(cache) = Weak::upgrade(&cache) {
                    cache.merge(generation, &evaluations);
                }
                Ok::<_, Error>(evaluations)
            }
            .boxed()
            .shared();

            state.pending = pending.clone();
            (pending, needed)
        };

        let fetch = if needed.is_empty() {
            future::ready(Ok(Arc::new(EvaluationResults::new()))).boxed()
        } else {
            inner.fetch_evaluations(&request, needed)
        };
        let _ = fetch_tx.send(fetch);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                // Errors are delivered to waiters.
                let _ = pending.await;
            });
        }

        inner.recorder.reset_attributes();
        Ok(())
    }

    /// Get evaluations for `features`.
    ///
    /// If all features are cached, the returned future is already resolved. Otherwise it waits for
    /// the pending fetch; no new request is issued. Evaluations returned are reported to the
    /// [`AttributeRecorder`].
    ///
    /// # Errors
    ///
    /// - [`Error::NotEnabled`] if no project is configured.
    /// - [`Error::NotLoaded`] if no request was submitted, if any feature is not part of the last
    ///   request, or if a feature is still missing after the pending fetch resolves.
    /// - The pending fetch's own error, unchanged, if it failed.
    pub fn get_evaluations<I, S>(&self, features: I) -> BoxFuture<'static, Result<EvaluationResults>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let features: Vec<String> = features.into_iter().map(Into::into).collect();

        match self.inner.lookup(&features) {
            Err(err) => future::ready(Err(err)).boxed(),
            Ok(Lookup::Cached(evaluations)) => {
                log::trace!(target: "feature_evaluations",
                            count = evaluations.len();
                            "serving evaluations from cache");
                self.inner.report(&evaluations);
                future::ready(Ok(evaluations)).boxed()
            }
            Ok(Lookup::Pending { pending, cached }) => {
                let inner = Arc::clone(&self.inner);
                async move {
                    let fetched = pending.await?;

                    let mut evaluations = EvaluationResults::with_capacity(features.len());
                    for feature in features {
                        let Some(evaluation) = fetched.get(&feature).or_else(|| cached.get(&feature)) else {
                            return Err(Error::NotLoaded(vec![feature]));
                        };
                        let evaluation = evaluation.clone();
                        evaluations.insert(feature, evaluation);
                    }

                    inner.report(&evaluations);
                    Ok(evaluations)
                }
                .boxed()
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .expect("thread holding evaluation cache lock should not panic")
    }

    fn validate(&self, request: &EvaluationRequest) -> std::result::Result<(), ValidationError> {
        let max = self.config.max_features_per_request;
        if request.features.len() > max {
            return Err(ValidationError::TooManyFeatures {
                max,
                requested: request.features.len(),
            });
        }
        if request.features.iter().any(String::is_empty) {
            return Err(ValidationError::EmptyFeatureName);
        }
        Ok(())
    }

    fn lookup(&self, features: &[String]) -> Result<Lookup> {
        if !self.config.enabled {
            return Err(Error::NotEnabled);
        }

        let mut guard = self.lock();
        self.seed(&mut guard);
        let state = &*guard;

        let Some(last_request) = &state.last_request else {
            return Err(Error::NotLoaded(features.to_vec()));
        };
        let not_loaded: Vec<String> = features
            .iter()
            .filter(|feature| !last_request.features.contains(*feature))
            .cloned()
            .collect();
        if !not_loaded.is_empty() {
            return Err(Error::NotLoaded(not_loaded));
        }

        let cached: EvaluationResults = features
            .iter()
            .filter_map(|feature| {
                let evaluation = state.evaluations.get(feature)?;
                Some((feature.clone(), evaluation.clone()))
            })
            .collect();

        if features.iter().all(|feature| cached.contains_key(feature)) {
            Ok(Lookup::Cached(cached))
        } else {
            Ok(Lookup::Pending {
                pending: state.pending.clone(),
                cached,
            })
        }
    }

    /// Build the wire request for `features` and hand it to the dispatcher.
    fn fetch_evaluations(
        &self,
        request: &EvaluationRequest,
        features: Vec<String>,
    ) -> BoxFuture<'static, Result<Arc<EvaluationResults>>> {
        let entity_id = match &request.entity_id {
            Some(entity_id) => entity_id.clone(),
            None => self.recorder.user_details().default_entity_id().to_owned(),
        };
        let evaluation_context = request
            .context
            .as_ref()
            .map(|context| serde_json::Value::Object(context.clone()).to_string());

        log::debug!(target: "feature_evaluations",
                    entity_id = entity_id.as_str(),
                    count = features.len();
                    "fetching feature evaluations");

        let api_request = BatchEvaluateFeatureRequest {
            requests: features
                .into_iter()
                .map(|feature| FeatureEvaluationRequest {
                    entity_id: entity_id.clone(),
                    evaluation_context: evaluation_context.clone(),
                    feature,
                })
                .collect(),
        };

        let response = self.dispatch.dispatch_batch_evaluate_feature(api_request);
        async move {
            let response = response.await.inspect_err(|err| {
                log::warn!(target: "feature_evaluations",
                           "failed to fetch feature evaluations: {:?}", err);
            })?;
            parse_evaluations(&response.body).map(Arc::new)
        }
        .boxed()
    }

    /// Add `evaluations` to the cache if they were fetched for the current generation. Existing
    /// entries are kept.
    fn merge(&self, generation: u64, evaluations: &EvaluationResults) {
        let mut state = self.lock();
        if state.generation != generation {
            log::debug!(target: "feature_evaluations",
                        generation,
                        current = state.generation;
                        "discarding evaluations fetched for a superseded request");
            return;
        }
        if evaluations.is_empty() {
            return;
        }

        for (feature, evaluation) in evaluations {
            state
                .evaluations
                .entry(feature.clone())
                .or_insert_with(|| evaluation.clone());
        }
        self.persist(EVALS_CACHE_KEY, &state.evaluations);
    }

    fn report(&self, evaluations: &EvaluationResults) {
        let attributes = evaluations
            .values()
            .map(|evaluation| (evaluation.feature.clone(), evaluation.variation.clone()))
            .collect();
        self.recorder.add_attributes(attributes);
    }

    /// Load persisted state on first access.
    fn seed(&self, state: &mut State) {
        if state.seeded {
            return;
        }
        state.seeded = true;

        if let Some(request) = self.read_persisted(REQUEST_CACHE_KEY) {
            state.last_request = Some(request);
        }
        if let Some(evaluations) = self.read_persisted(EVALS_CACHE_KEY) {
            state.evaluations = evaluations;
        }
    }

    fn read_persisted<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.config.persist {
            return None;
        }
        let text = match self.storage.get(key) {
            Ok(text) => text?,
            Err(err) => {
                log::debug!(target: "feature_evaluations", key; "cannot read session storage: {}", err);
                return None;
            }
        };
        serde_json::from_str(&text)
            .inspect_err(|err| {
                log::debug!(target: "feature_evaluations", key; "ignoring unparsable session storage entry: {}", err);
            })
            .ok()
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        if !self.config.persist {
            return;
        }
        let result = serialize(value)
            .map_err(|err| err.to_string())
            .and_then(|text| self.storage.set(key, text).map_err(|err| err.to_string()));
        if let Err(err) = result {
            log::debug!(target: "feature_evaluations", key; "cannot write session storage: {}", err);
        }
    }

    fn clear_persisted(&self) {
        if !self.config.persist {
            return;
        }
        if let Err(err) = self.storage.clear() {
            log::debug!(target: "feature_evaluations", "cannot clear session storage: {}", err);
        }
    }
}

fn resolved(evaluations: EvaluationResults) -> PendingFetch {
    future::ready(Ok(Arc::new(evaluations))).boxed().shared()
}

fn parse_evaluations(body: &str) -> Result<EvaluationResults> {
    let result: BatchEvaluateFeatureResult = serde_json::from_str(body)
        .map_err(|err| Error::Transport(TransportError::InvalidResponse(Arc::new(err))))?;

    Ok(result
        .results
        .into_iter()
        .map(EvaluationResult::from)
        .map(|evaluation| (evaluation.feature.clone(), evaluation))
        .collect())
}
