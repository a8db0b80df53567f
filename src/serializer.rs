//! Wire serialization shared by transmission and request signing.
//!
//! The exact text returned by [`serialize`] is both sent as the request body and hashed by
//! [`content_hash`], so the two never disagree.
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::TransportError;

/// Serialize `value` into its wire text.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, TransportError> {
    serde_json::to_string(value).map_err(|err| TransportError::Serialization(err.into()))
}

/// SHA-256 digest of `payload`, rendered as lowercase hex.
pub fn content_hash(payload: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(payload.as_ref()))
}

/// Serde adapter that writes a timestamp as whole seconds since the epoch, rounded to the nearest
/// second (halves round up).
///
/// ```
/// # use chrono::{DateTime, Utc};
/// # use serde::{Deserialize, Serialize};
/// #[derive(Serialize, Deserialize)]
/// struct Event {
///     #[serde(with = "feature_evaluations::timestamp_seconds")]
///     timestamp: DateTime<Utc>,
/// }
/// ```
pub mod timestamp_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(to_seconds(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {seconds}")))
    }

    pub(crate) fn to_seconds(value: &DateTime<Utc>) -> i64 {
        (value.timestamp_millis() + 500).div_euclid(1000)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Stamped {
        id: String,
        #[serde(with = "timestamp_seconds")]
        timestamp: DateTime<Utc>,
    }

    #[test]
    fn timestamps_serialize_as_epoch_seconds() {
        let stamped = Stamped {
            id: "event".to_owned(),
            timestamp: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        };

        let text = serialize(&stamped).unwrap();
        assert_eq!(text, r#"{"id":"event","timestamp":1577836800}"#);

        let parsed: Stamped = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, stamped);
    }

    #[test]
    fn timestamps_round_to_nearest_second() {
        let at = |millis| DateTime::from_timestamp_millis(millis).unwrap();

        assert_eq!(timestamp_seconds::to_seconds(&at(1_577_836_800_499)), 1_577_836_800);
        assert_eq!(timestamp_seconds::to_seconds(&at(1_577_836_800_500)), 1_577_836_801);
        assert_eq!(timestamp_seconds::to_seconds(&at(-1_500)), -1);
    }

    #[test]
    fn content_hash_is_lowercase_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
