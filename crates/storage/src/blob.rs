//! Versioned JSON envelopes for persisted client state.
//!
//! Blobs are written as `{ "version": n, "state": ... }`. Anything else found
//! under a key is treated as an unversioned (version 0) blob so that state
//! written before envelopes existed can still be migrated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repository::{KeyValueStore, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub state: Value,
}

impl Envelope {
    /// Split a raw blob into its version and state.
    #[must_use]
    pub fn from_raw(raw: Value) -> Self {
        let looks_wrapped = raw.as_object().is_some_and(|map| {
            map.len() == 2 && map.contains_key("state") && map.contains_key("version")
        });
        if looks_wrapped {
            if let Ok(envelope) = serde_json::from_value::<Envelope>(raw.clone()) {
                return envelope;
            }
        }
        Self {
            version: 0,
            state: raw,
        }
    }
}

/// Load and decode the blob under `key`, migrating older versions first.
///
/// `migrate` receives the stored version and state and must return state in
/// the `current` layout.
///
/// # Errors
///
/// Returns `StorageError::UnsupportedVersion` for blobs written by a newer build,
/// `StorageError::Serialization` if the (migrated) state does not decode, or any
/// backend error.
pub async fn load_versioned<T, F>(
    kv: &dyn KeyValueStore,
    key: &str,
    current: u32,
    migrate: F,
) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    F: FnOnce(u32, Value) -> Result<Value, StorageError>,
{
    let Some(raw) = kv.load(key).await? else {
        return Ok(None);
    };

    let envelope = Envelope::from_raw(raw);
    let state = match envelope.version {
        v if v == current => envelope.state,
        v if v > current => {
            return Err(StorageError::UnsupportedVersion {
                found: v,
                supported: current,
            });
        }
        v => migrate(v, envelope.state)?,
    };

    Ok(Some(serde_json::from_value(state)?))
}

/// Encode `state` and store it under `key` wrapped in a version envelope.
///
/// # Errors
///
/// Returns `StorageError` if encoding or the backend write fails.
pub async fn save_versioned<T>(
    kv: &dyn KeyValueStore,
    key: &str,
    version: u32,
    state: &T,
) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
{
    let envelope = Envelope {
        version,
        state: serde_json::to_value(state)?,
    };
    kv.save(key, &serde_json::to_value(envelope)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        mode: String,
    }

    fn no_migration(_: u32, state: Value) -> Result<Value, StorageError> {
        Ok(state)
    }

    #[tokio::test]
    async fn round_trips_current_version() {
        let repo = InMemoryRepository::new();
        let prefs = Prefs {
            mode: "classic".into(),
        };
        save_versioned(&repo, "prefs", 1, &prefs).await.unwrap();

        let raw = repo.load("prefs").await.unwrap().unwrap();
        assert_eq!(raw["version"], 1);

        let loaded: Option<Prefs> = load_versioned(&repo, "prefs", 1, no_migration)
            .await
            .unwrap();
        assert_eq!(loaded, Some(prefs));
    }

    #[tokio::test]
    async fn missing_key_loads_none() {
        let repo = InMemoryRepository::new();
        let loaded: Option<Prefs> = load_versioned(&repo, "prefs", 1, no_migration)
            .await
            .unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn bare_blob_is_migrated_as_version_zero() {
        let repo = InMemoryRepository::new();
        repo.save("prefs", &json!({ "legacyMode": "modern" }))
            .await
            .unwrap();

        let loaded: Option<Prefs> = load_versioned(&repo, "prefs", 1, |version, state| {
            assert_eq!(version, 0);
            Ok(json!({ "mode": state["legacyMode"] }))
        })
        .await
        .unwrap();
        assert_eq!(
            loaded,
            Some(Prefs {
                mode: "modern".into()
            })
        );
    }

    #[tokio::test]
    async fn newer_version_is_rejected() {
        let repo = InMemoryRepository::new();
        save_versioned(&repo, "prefs", 7, &json!({ "mode": "x" }))
            .await
            .unwrap();

        let result: Result<Option<Prefs>, _> =
            load_versioned(&repo, "prefs", 1, no_migration).await;
        assert!(matches!(
            result,
            Err(StorageError::UnsupportedVersion {
                found: 7,
                supported: 1
            })
        ));
    }

    #[test]
    fn object_with_extra_fields_is_not_an_envelope() {
        let raw = json!({ "version": 1, "state": {}, "other": true });
        assert_eq!(Envelope::from_raw(raw).version, 0);
    }
}
