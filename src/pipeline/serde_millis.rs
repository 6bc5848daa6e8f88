//! Serde helpers storing `Duration` values as whole milliseconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Serialize a duration as milliseconds.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Deserialize a duration from milliseconds.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// The same encoding for maps of durations.
pub mod map {
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Serialize every value as milliseconds.
    pub fn serialize<K, S>(map: &BTreeMap<K, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, duration) in map {
            out.serialize_entry(key, &(duration.as_millis() as u64))?;
        }
        out.end()
    }

    /// Deserialize a map whose values are milliseconds.
    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Duration>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<K, u64>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(key, millis)| (key, Duration::from_millis(millis)))
            .collect())
    }
}
