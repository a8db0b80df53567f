use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// User id reported for anonymous users.
pub const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Identity of the current user and session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub user_id: String,
    pub session_id: String,
}

impl UserDetails {
    /// Entity id used for evaluations that don't name one: the session id for anonymous users,
    /// the user id otherwise.
    pub fn default_entity_id(&self) -> &str {
        if self.user_id == NIL_UUID {
            &self.session_id
        } else {
            &self.user_id
        }
    }
}

/// Session data model the evaluation cache reports into.
///
/// Every evaluation actually read by a caller is published as a `feature → variation` session
/// attribute, and pending attributes are reset whenever new evaluations are requested.
pub trait AttributeRecorder: Send + Sync {
    fn user_details(&self) -> UserDetails;
    fn add_attributes(&self, attributes: HashMap<String, String>);
    fn reset_attributes(&self);
}

pub(crate) struct NoopAttributeRecorder;
impl AttributeRecorder for NoopAttributeRecorder {
    fn user_details(&self) -> UserDetails {
        UserDetails {
            user_id: NIL_UUID.to_owned(),
            session_id: NIL_UUID.to_owned(),
        }
    }

    fn add_attributes(&self, _attributes: HashMap<String, String>) {}

    fn reset_attributes(&self) {}
}
