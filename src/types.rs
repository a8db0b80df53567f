use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Free-form attributes narrowing an evaluation (e.g., targeting rules).
///
/// Insertion order is preserved, so two contexts with the same entries in a different order
/// serialize differently and do not match for cache-reuse purposes.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Evaluations keyed by (short) feature name.
pub type EvaluationResults = HashMap<String, EvaluationResult>;

/// A request to evaluate a set of features for an entity.
///
/// # Examples
/// ```
/// # use feature_evaluations::EvaluationRequest;
/// let request = EvaluationRequest::new(["feature01", "feature02"]).entity_id("user-1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Entity the evaluation is scoped to. Defaults to the current user or session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    pub features: Vec<String>,
}

impl EvaluationRequest {
    /// Create a request for `features` with no entity id and no context.
    pub fn new<I, S>(features: I) -> EvaluationRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EvaluationRequest {
            entity_id: None,
            context: None,
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Set the entity id.
    pub fn entity_id(mut self, entity_id: impl Into<String>) -> EvaluationRequest {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the evaluation context.
    pub fn context(mut self, context: Context) -> EvaluationRequest {
        self.context = Some(context);
        self
    }

    /// Returns `true` if `other` targets the same entity and context.
    ///
    /// Contexts are compared by their serialized form, so differently ordered but otherwise
    /// identical contexts do not match. A missing context matches an empty one.
    pub(crate) fn same_identity(&self, other: &EvaluationRequest) -> bool {
        self.entity_id == other.entity_id
            && serialized_context(self.context.as_ref()) == serialized_context(other.context.as_ref())
    }
}

fn serialized_context(context: Option<&Context>) -> String {
    match context {
        Some(context) => serde_json::Value::Object(context.clone()).to_string(),
        None => "{}".to_owned(),
    }
}

impl TryFrom<serde_json::Value> for EvaluationRequest {
    type Error = ValidationError;

    /// Validate a loosely-typed request. `context` may be given either as an object or as a
    /// string holding a JSON object.
    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let serde_json::Value::Object(mut object) = value else {
            return Err(ValidationError::Malformed("request must be an object".to_owned()));
        };

        let features = match object.remove("features") {
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(ValidationError::Malformed(format!(
                        "feature must be a string, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(ValidationError::Malformed(
                    "features must be an array of strings".to_owned(),
                ))
            }
        };

        let entity_id = match object.remove("entityId") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(_) => {
                return Err(ValidationError::Malformed(
                    "entityId must be a string".to_owned(),
                ))
            }
        };

        let context = match object.remove("context") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Object(context)) => Some(context),
            Some(serde_json::Value::String(s)) => match serde_json::from_str(&s) {
                Ok(serde_json::Value::Object(context)) => Some(context),
                _ => {
                    return Err(ValidationError::Malformed(
                        "context string must hold a JSON object".to_owned(),
                    ))
                }
            },
            Some(_) => {
                return Err(ValidationError::Malformed(
                    "context must be an object".to_owned(),
                ))
            }
        };

        Ok(EvaluationRequest {
            entity_id,
            context,
            features,
        })
    }
}

/// Value of an evaluated variation.
///
/// Serialized the way the evaluation service returns it: a single-key object such as
/// `{"boolValue": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationValue {
    BoolValue(bool),
    DoubleValue(f64),
    LongValue(i64),
    StringValue(String),
}

impl EvaluationValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvaluationValue::BoolValue(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvaluationValue::DoubleValue(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EvaluationValue::LongValue(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvaluationValue::StringValue(s) => Some(s),
            _ => None,
        }
    }
}

/// Outcome of evaluating one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Short feature name (any path prefix removed).
    pub feature: String,
    pub reason: String,
    pub variation: String,
    pub value: EvaluationValue,
}

/// Wire format of the batch-evaluate request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluateFeatureRequest {
    pub requests: Vec<FeatureEvaluationRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluationRequest {
    pub entity_id: String,
    /// Stringified context map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_context: Option<String>,
    pub feature: String,
}

/// Wire format of the batch-evaluate response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluateFeatureResult {
    pub results: Vec<FeatureEvaluationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluationResult {
    /// Feature name, possibly a hierarchical path (e.g., an ARN).
    pub feature: String,
    pub reason: String,
    pub variation: String,
    pub value: EvaluationValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl From<FeatureEvaluationResult> for EvaluationResult {
    fn from(result: FeatureEvaluationResult) -> EvaluationResult {
        EvaluationResult {
            feature: short_feature_name(&result.feature).to_owned(),
            reason: result.reason,
            variation: result.variation,
            value: result.value,
        }
    }
}

/// Keep only the segment after the last `/`.
pub(crate) fn short_feature_name(feature: &str) -> &str {
    match feature.rfind('/') {
        Some(idx) => &feature[idx + 1..],
        None => feature,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_path_prefix_from_feature_names() {
        assert_eq!(
            short_feature_name("arn:aws:evidently:us-west-2:0000:project/p1/feature/myFeature"),
            "myFeature"
        );
        assert_eq!(short_feature_name("myFeature"), "myFeature");
        assert_eq!(short_feature_name("trailing/"), "");
    }

    #[test]
    fn parses_service_result() {
        let result: BatchEvaluateFeatureResult = serde_json::from_value(json!({
            "results": [{
                "feature": "project/p1/feature/myFeature",
                "reason": "LAUNCH_RULE_MATCH",
                "variation": "on",
                "value": { "longValue": 10 },
                "details": "{}"
            }]
        }))
        .unwrap();

        let evaluation = EvaluationResult::from(result.results[0].clone());
        assert_eq!(evaluation.feature, "myFeature");
        assert_eq!(evaluation.value, EvaluationValue::LongValue(10));
        assert_eq!(evaluation.value.as_i64(), Some(10));
    }

    #[test]
    fn identity_ignores_features_but_not_context_order() {
        let mut ab = Context::new();
        ab.insert("a".to_owned(), json!(1));
        ab.insert("b".to_owned(), json!(2));
        let mut ba = Context::new();
        ba.insert("b".to_owned(), json!(2));
        ba.insert("a".to_owned(), json!(1));

        let r1 = EvaluationRequest::new(["f1"]).entity_id("u1").context(ab.clone());
        let r2 = EvaluationRequest::new(["f2"]).entity_id("u1").context(ab);
        let r3 = EvaluationRequest::new(["f1"]).entity_id("u1").context(ba);

        assert!(r1.same_identity(&r2));
        assert!(!r1.same_identity(&r3));
    }

    #[test]
    fn missing_context_matches_empty_context() {
        let r1 = EvaluationRequest::new(["f1"]).entity_id("u1");
        let r2 = EvaluationRequest::new(["f1"]).entity_id("u1").context(Context::new());

        assert!(r1.same_identity(&r2));
    }

    #[test]
    fn accepts_loosely_typed_requests() {
        let request = EvaluationRequest::try_from(json!({
            "features": ["one"],
            "entityId": "hello",
            "context": "{\"color\":\"red\"}"
        }))
        .unwrap();
        assert_eq!(request.entity_id.as_deref(), Some("hello"));
        assert_eq!(request.context.unwrap()["color"], json!("red"));

        let request = EvaluationRequest::try_from(json!({ "features": ["one"] })).unwrap();
        assert_eq!(request, EvaluationRequest::new(["one"]));
    }

    #[test]
    fn rejects_wrongly_typed_requests() {
        for value in [
            json!({ "features": ["one"], "entityId": 1 }),
            json!({ "features": ["one"], "context": 1 }),
            json!({ "features": "feature" }),
            json!({ "features": ["feature", 2, "feature2"] }),
            json!({ "features": [["feature", [], "feature2"]] }),
            json!("features"),
        ] {
            assert!(
                matches!(
                    EvaluationRequest::try_from(value.clone()),
                    Err(ValidationError::Malformed(_))
                ),
                "{value} should be rejected"
            );
        }
    }
}
