//! Reading and writing the derived objects.
//!
//! Everything is keyed by namespace and name. Writes are plain create and replace calls, a
//! concurrent modification shows up as [`Error::Conflict`] and is retried by [`upsert`].

use std::{fmt::Debug, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        NamespaceResourceScope,
        api::core::v1::{ConfigMap, Pod, Service},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    },
    kube::{
        self, Resource,
        api::{Api, PostParams},
    },
};

use crate::crd::constants::FIELD_MANAGER;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("{kind} {name:?} was modified concurrently"))]
    Conflict { kind: String, name: String },

    #[snafu(display("{kind} {name:?} does not exist"))]
    NotFound { kind: String, name: String },

    #[snafu(display("{kind} has no {field}"))]
    MissingMetadata { kind: String, field: &'static str },

    #[snafu(display("failed to get {kind} {name:?}"))]
    Get {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to create {kind} {name:?}"))]
    Create {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to update {kind} {name:?}"))]
    Update {
        source: kube::Error,
        kind: String,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// A namespaced object kind the submission writes.
pub trait StoredResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Replaces the desired state of `existing` with the one of `self`, keeping what the
    /// server manages.
    fn copy_onto(self, existing: Self) -> Self;
}

impl StoredResource for ConfigMap {
    fn copy_onto(self, existing: Self) -> Self {
        ConfigMap {
            metadata: copy_metadata(self.metadata, existing.metadata),
            data: self.data,
            binary_data: self.binary_data,
            ..existing
        }
    }
}

impl StoredResource for Pod {
    fn copy_onto(self, existing: Self) -> Self {
        Pod {
            metadata: copy_metadata(self.metadata, existing.metadata),
            spec: self.spec,
            ..existing
        }
    }
}

impl StoredResource for Service {
    fn copy_onto(self, existing: Self) -> Self {
        Service {
            metadata: copy_metadata(self.metadata, existing.metadata),
            spec: self.spec,
            ..existing
        }
    }
}

fn copy_metadata(desired: ObjectMeta, existing: ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        resource_version: existing.resource_version,
        uid: existing.uid,
        creation_timestamp: existing.creation_timestamp,
        generation: existing.generation,
        managed_fields: existing.managed_fields,
        ..desired
    }
}

pub fn kind<K: StoredResource>() -> String {
    K::kind(&()).into_owned()
}

/// Get, create and update of namespaced objects.
///
/// `get` returns `None` for objects that do not exist. `create` and `update` fail with
/// [`Error::Conflict`] if the object was created or modified concurrently.
#[allow(async_fn_in_trait)]
pub trait ResourceStore {
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: StoredResource>(&self, namespace: &str, object: &K) -> Result<K>;

    async fn update<K: StoredResource>(&self, namespace: &str, object: &K) -> Result<K>;
}

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }
}

impl ResourceStore for KubeStore {
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Api::<K>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetSnafu {
                kind: kind::<K>(),
                name,
            })
    }

    async fn create<K: StoredResource>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?;
        match Api::<K>::namespaced(self.client.clone(), namespace)
            .create(&Self::post_params(), object)
            .await
        {
            Err(kube::Error::Api(ae)) if ae.code == 409 => ConflictSnafu {
                kind: kind::<K>(),
                name,
            }
            .fail(),
            result => result.with_context(|_| CreateSnafu {
                kind: kind::<K>(),
                name: name.clone(),
            }),
        }
    }

    async fn update<K: StoredResource>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object_name(object)?;
        match Api::<K>::namespaced(self.client.clone(), namespace)
            .replace(&name, &Self::post_params(), object)
            .await
        {
            Err(kube::Error::Api(ae)) if ae.code == 409 => ConflictSnafu {
                kind: kind::<K>(),
                name,
            }
            .fail(),
            Err(kube::Error::Api(ae)) if ae.code == 404 => NotFoundSnafu {
                kind: kind::<K>(),
                name,
            }
            .fail(),
            result => result.with_context(|_| UpdateSnafu {
                kind: kind::<K>(),
                name: name.clone(),
            }),
        }
    }
}

fn object_name<K: StoredResource>(object: &K) -> Result<String> {
    object.meta().name.clone().context(MissingMetadataSnafu {
        kind: kind::<K>(),
        field: "name",
    })
}

/// A fixed number of attempts with a fixed pause in between.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Retries of a write that lost against a concurrent modification.
    pub const CONFLICT: RetryPolicy = RetryPolicy {
        attempts: 5,
        interval: Duration::from_millis(10),
    };
    /// Polling for a freshly created object to become readable.
    pub const VISIBILITY: RetryPolicy = RetryPolicy {
        attempts: 2,
        interval: Duration::from_secs(2),
    };
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Upserted {
    Created,
    Updated,
}

/// Creates `desired`, or updates the existing object of the same name to match it.
///
/// Conflicts restart the whole get-then-write sequence, up to `retry.attempts` times.
pub async fn upsert<K: StoredResource>(
    store: &impl ResourceStore,
    desired: &K,
    retry: RetryPolicy,
) -> Result<Upserted> {
    let name = object_name(desired)?;
    let namespace = desired
        .meta()
        .namespace
        .clone()
        .context(MissingMetadataSnafu {
            kind: kind::<K>(),
            field: "namespace",
        })?;

    let mut attempt = 1;
    loop {
        let result = match store.get::<K>(&namespace, &name).await? {
            None => store
                .create(&namespace, desired)
                .await
                .map(|_| Upserted::Created),
            Some(existing) => store
                .update(&namespace, &desired.clone().copy_onto(existing))
                .await
                .map(|_| Upserted::Updated),
        };

        match result {
            Err(Error::Conflict { .. }) if attempt < retry.attempts => {
                tracing::debug!(
                    kind = %kind::<K>(),
                    %name,
                    attempt,
                    "Write conflicted with a concurrent modification, retrying"
                );
                attempt += 1;
                tokio::time::sleep(retry.interval).await;
            }
            result => return result,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    Confirmed,
    TimedOut,
}

/// Polls until the object can be read back.
pub async fn await_visible<K: StoredResource>(
    store: &impl ResourceStore,
    namespace: &str,
    name: &str,
    retry: RetryPolicy,
) -> Result<Visibility> {
    for attempt in 1..=retry.attempts {
        if store.get::<K>(namespace, name).await?.is_some() {
            return Ok(Visibility::Confirmed);
        }
        if attempt < retry.attempts {
            tokio::time::sleep(retry.interval).await;
        }
    }
    Ok(Visibility::TimedOut)
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        in_memory::{InMemoryStore, Verb},
        *,
    };

    const NO_PAUSE: RetryPolicy = RetryPolicy {
        attempts: 5,
        interval: Duration::ZERO,
    };

    fn config_map(value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("app-driver-conf-map".to_string()),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let store = InMemoryStore::default();

        let first = upsert(&store, &config_map("a"), NO_PAUSE).await.unwrap();
        let second = upsert(&store, &config_map("b"), NO_PAUSE).await.unwrap();

        assert_eq!(Upserted::Created, first);
        assert_eq!(Upserted::Updated, second);
        assert_eq!(1, store.count(Verb::Create));
        assert_eq!(1, store.count(Verb::Update));
        let stored = store
            .object::<ConfigMap>("default", "app-driver-conf-map")
            .unwrap();
        assert_eq!(Some("2"), stored.metadata.resource_version.as_deref());
        assert_eq!("b", stored.data.unwrap()["key"]);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let store = InMemoryStore::default();
        store.fail_writes_with_conflict(3);

        let upserted = upsert(&store, &config_map("a"), NO_PAUSE).await.unwrap();

        assert_eq!(Upserted::Created, upserted);
        assert_eq!(4, store.count(Verb::Create));
        assert_eq!(4, store.count(Verb::Get));
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_retries() {
        let store = InMemoryStore::default();
        store.fail_writes_with_conflict(5);

        let result = upsert(&store, &config_map("a"), NO_PAUSE).await;

        assert!(matches!(result, Err(Error::Conflict { .. })));
        assert_eq!(5, store.count(Verb::Create));
        assert!(
            store
                .object::<ConfigMap>("default", "app-driver-conf-map")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_missing_namespace() {
        let store = InMemoryStore::default();
        let mut config_map = config_map("a");
        config_map.metadata.namespace = None;

        let result = upsert(&store, &config_map, NO_PAUSE).await;

        assert!(matches!(
            result,
            Err(Error::MissingMetadata {
                field: "namespace",
                ..
            })
        ));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_missing_object() {
        let store = InMemoryStore::default();

        let result = store.update("default", &config_map("a")).await;

        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_await_visible() {
        let store = InMemoryStore::default();
        upsert(&store, &config_map("a"), NO_PAUSE).await.unwrap();

        let policy = RetryPolicy {
            attempts: 2,
            interval: Duration::ZERO,
        };
        store.hide_reads(1);
        assert_eq!(
            Visibility::Confirmed,
            await_visible::<ConfigMap>(&store, "default", "app-driver-conf-map", policy)
                .await
                .unwrap()
        );
        store.hide_reads(2);
        assert_eq!(
            Visibility::TimedOut,
            await_visible::<ConfigMap>(&store, "default", "app-driver-conf-map", policy)
                .await
                .unwrap()
        );
    }

    #[test]
    fn test_copy_onto_keeps_server_fields() {
        let mut existing = config_map("old");
        existing.metadata.resource_version = Some("7".to_string());
        existing.metadata.uid = Some("uid-1".to_string());
        let mut desired = config_map("new");
        desired.metadata.labels = Some(BTreeMap::from([("a".to_string(), "b".to_string())]));

        let merged = desired.copy_onto(existing);

        assert_eq!(Some("7"), merged.metadata.resource_version.as_deref());
        assert_eq!(Some("uid-1"), merged.metadata.uid.as_deref());
        assert_eq!("b", merged.metadata.labels.unwrap()["a"]);
        assert_eq!("new", merged.data.unwrap()["key"]);
    }
}
