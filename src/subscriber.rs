//! Change notifications delivered to [`EventHandler`](crate::EventHandler)s.

use std::{fmt, sync::Arc};

use kube_core::Resource;

/// Uniquely identifies an object of a known type by namespace and name.
///
/// Displays as `namespace/name`, or just `name` for cluster-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn from_resource<K: Resource>(resource: &K) -> Self {
        let meta = resource.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta
                .name
                .clone()
                .or_else(|| meta.generate_name.clone())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) if !namespace.is_empty() => write!(f, "{namespace}/{}", self.name),
            _ => f.write_str(&self.name),
        }
    }
}

/// One observed transition of a cached object.
#[derive(Debug)]
pub enum Notification<K> {
    Added(Arc<K>),
    /// Emitted on modification and on periodic resync.
    /// Resync replays carry the same snapshot as `old` and `new`.
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Deletion<K>),
}

impl<K> Clone for Notification<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(obj) => Self::Added(Arc::clone(obj)),
            Self::Updated { old, new } => Self::Updated {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
            Self::Deleted(deletion) => Self::Deleted(deletion.clone()),
        }
    }
}

/// The payload of a deletion notification.
#[derive(Debug)]
pub enum Deletion<K> {
    /// The apiserver confirmed the deletion and sent the final state.
    Object(Arc<K>),
    /// The object disappeared while the watch was disconnected.
    /// Only the last state held by the cache is known.
    FinalStateUnknown(DeletedFinalStateUnknown<K>),
}

impl<K> Clone for Deletion<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Object(obj) => Self::Object(Arc::clone(obj)),
            Self::FinalStateUnknown(tombstone) => Self::FinalStateUnknown(tombstone.clone()),
        }
    }
}

impl<K> Deletion<K> {
    /// Resolves the deleted snapshot, which may be stale for [`Deletion::FinalStateUnknown`].
    pub fn object(&self) -> Result<&Arc<K>, TombstoneError> {
        match self {
            Self::Object(obj) => Ok(obj),
            Self::FinalStateUnknown(tombstone) => {
                tombstone
                    .obj
                    .as_ref()
                    .ok_or_else(|| TombstoneError::MissingObject {
                        key: tombstone.key.clone(),
                    })
            }
        }
    }

    /// The store key of the deleted object.
    pub fn key(&self) -> String
    where
        K: Resource,
    {
        match self {
            Self::Object(obj) => QualifiedName::from_resource(obj.as_ref()).to_string(),
            Self::FinalStateUnknown(tombstone) => tombstone.key.clone(),
        }
    }
}

/// A deletion whose final state was missed.
#[derive(Debug)]
pub struct DeletedFinalStateUnknown<K> {
    /// `namespace/name` of the object.
    pub key: String,
    /// The last snapshot the cache held, if it still had one.
    pub obj: Option<Arc<K>>,
}

impl<K> Clone for DeletedFinalStateUnknown<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            obj: self.obj.clone(),
        }
    }
}

/// The error type returned by [`Deletion::object`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TombstoneError {
    #[error("deletion tombstone for {key} carries no object")]
    MissingObject { key: String },
}

pub mod objects;
pub use objects::notifications;

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Namespace, Pod};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.into()),
                name: Some(name.into()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn qualified_name_display() {
        assert_eq!(
            QualifiedName::from_resource(&pod("default", "foo")).to_string(),
            "default/foo"
        );

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some("kube-system".into()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        assert_eq!(QualifiedName::from_resource(&ns).to_string(), "kube-system");
    }

    #[test]
    fn direct_deletion_resolves() {
        let deletion = Deletion::Object(Arc::new(pod("default", "foo")));
        assert_eq!(deletion.object().unwrap().metadata.name.as_deref(), Some("foo"));
        assert_eq!(deletion.key(), "default/foo");
    }

    #[test]
    fn tombstone_unwraps_last_known_state() {
        let deletion = Deletion::FinalStateUnknown(DeletedFinalStateUnknown {
            key: "default/foo".into(),
            obj: Some(Arc::new(pod("default", "foo"))),
        });
        assert_eq!(deletion.object().unwrap().metadata.name.as_deref(), Some("foo"));
    }

    #[test]
    fn empty_tombstone_is_an_error() {
        let deletion = Deletion::<Pod>::FinalStateUnknown(DeletedFinalStateUnknown {
            key: "default/foo".into(),
            obj: None,
        });
        assert_eq!(
            deletion.object().unwrap_err(),
            TombstoneError::MissingObject {
                key: "default/foo".into()
            }
        );
        assert_eq!(deletion.key(), "default/foo");
    }
}
