//! Shared informers: cached list-watches with event handlers.
//!
//! ```no_run
//! # async fn example(client: kube_client::Client) {
//! use kube_pod_watch::{InformerFactory, LabelSelector, PodLifecycleLogger};
//! use tokio_util::sync::CancellationToken;
//!
//! let factory = InformerFactory::new(client, std::time::Duration::ZERO);
//! let pods = factory.pods();
//! pods.add_event_handler(PodLifecycleLogger);
//!
//! let stop = CancellationToken::new();
//! factory.start(&stop);
//! factory.wait_for_cache_sync(&stop).await;
//! let cached = pods.lister().list(&LabelSelector::everything());
//! # }
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use futures::future::{self, BoxFuture, FutureExt};
use k8s_openapi::api::core::v1::Pod;
use kube_client::{Api, Client};
use kube_core::Resource;
use kube_runtime::{reflector, watcher, WatchStreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::runner::{self, EventHandler, Shared};
use crate::subscriber::QualifiedName;

mod selector;
pub use selector::{LabelSelector, SelectorError};

/// Hands out one [`SharedInformer`] per resource type, all scoped to every namespace.
pub struct InformerFactory {
    client: Client,
    resync: Duration,
    informers: Mutex<HashMap<TypeId, Registered>>,
}

struct Registered {
    informer: Box<dyn Any + Send + Sync>,
    control: Arc<dyn Control>,
}

/// Type-erased lifecycle of a [`SharedInformer`].
trait Control: Send + Sync {
    fn start(&self, stop: &CancellationToken) -> bool;

    fn wait_for_cache_sync<'a>(&'a self, stop: &'a CancellationToken) -> BoxFuture<'a, bool>;
}

impl InformerFactory {
    /// A zero `resync` disables periodic resync.
    pub fn new(client: Client, resync: Duration) -> Self {
        Self {
            client,
            resync,
            informers: Mutex::new(HashMap::new()),
        }
    }

    /// The shared informer for `K`, created on first request.
    ///
    /// Informers requested after [`start`](Self::start) run once `start` is called again.
    pub fn informer<K>(&self) -> SharedInformer<K>
    where
        K: 'static + Resource + Clone + Debug + DeserializeOwned + Send + Sync,
        K::DynamicType: Clone + Eq + Hash + Default + Send + Sync,
    {
        let mut informers = self.informers.lock();
        let existing = informers
            .get(&TypeId::of::<K>())
            .and_then(|registered| registered.informer.downcast_ref::<SharedInformer<K>>());
        if let Some(informer) = existing {
            return informer.clone();
        }

        let informer = SharedInformer::<K>::new(
            Api::all(self.client.clone()),
            watcher::Config::default(),
            self.resync,
        );
        informers.insert(
            TypeId::of::<K>(),
            Registered {
                control: Arc::new(informer.clone()),
                informer: Box::new(informer.clone()),
            },
        );
        informer
    }

    pub fn pods(&self) -> SharedInformer<Pod> {
        self.informer()
    }

    /// Starts every requested informer that is not running yet.
    ///
    /// Informers stop when `stop` is cancelled.
    pub fn start(&self, stop: &CancellationToken) {
        for control in self.controls() {
            control.start(stop);
        }
    }

    /// Blocks until every requested informer has synced its cache.
    ///
    /// Returns `false` if `stop` was cancelled first.
    pub async fn wait_for_cache_sync(&self, stop: &CancellationToken) -> bool {
        let controls = self.controls();
        future::join_all(
            controls
                .iter()
                .map(|control| control.wait_for_cache_sync(stop)),
        )
        .await
        .into_iter()
        .all(|synced| synced)
    }

    fn controls(&self) -> Vec<Arc<dyn Control>> {
        self.informers
            .lock()
            .values()
            .map(|registered| Arc::clone(&registered.control))
            .collect()
    }
}

/// A cached list-watch of `K` whose notifications are shared by all registered handlers.
pub struct SharedInformer<K: 'static + Resource>
where
    K::DynamicType: Eq + Hash,
{
    inner: Arc<Inner<K>>,
}

impl<K: 'static + Resource> Clone for SharedInformer<K>
where
    K::DynamicType: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K: 'static + Resource>
where
    K::DynamicType: Eq + Hash,
{
    api: Api<K>,
    watcher_config: watcher::Config,
    resync: Duration,
    shared: Arc<Shared<K>>,
    /// Taken by the task on start.
    writer: Mutex<Option<reflector::store::Writer<K>>>,
}

impl<K> SharedInformer<K>
where
    K: 'static + Resource + Clone + Debug + DeserializeOwned + Send + Sync,
    K::DynamicType: Clone + Eq + Hash + Default + Send + Sync,
{
    pub fn new(api: Api<K>, watcher_config: watcher::Config, resync: Duration) -> Self {
        let dyntype = K::DynamicType::default();
        let writer = reflector::store::Writer::new(dyntype.clone());
        let shared = Arc::new(Shared::new(writer.as_reader(), dyntype));
        Self {
            inner: Arc::new(Inner {
                api,
                watcher_config,
                resync,
                shared,
                writer: Mutex::new(Some(writer)),
            }),
        }
    }

    /// Registers a handler for all future notifications.
    ///
    /// Objects already in the cache are replayed to the handler as additions first.
    pub fn add_event_handler(&self, handler: impl EventHandler<K> + 'static) {
        self.inner.shared.add_handler(Arc::new(handler));
    }

    pub fn lister(&self) -> Lister<K> {
        Lister {
            shared: Arc::clone(&self.inner.shared),
        }
    }

    pub fn has_synced(&self) -> bool {
        self.inner.shared.has_synced()
    }

    /// Spawns the list-watch task. Returns `false` if it was already started.
    pub fn start(&self, stop: &CancellationToken) -> bool {
        let Some(writer) = self.inner.writer.lock().take() else {
            return false;
        };

        let events = watcher(self.inner.api.clone(), self.inner.watcher_config.clone())
            .default_backoff();
        tokio::spawn(runner::run(
            events,
            writer,
            Arc::clone(&self.inner.shared),
            self.inner.resync,
            stop.clone(),
        ));
        true
    }

    /// Blocks until the initial listing has been loaded into the cache.
    ///
    /// Returns `false` if `stop` was cancelled first.
    pub async fn wait_for_cache_sync(&self, stop: &CancellationToken) -> bool {
        self.inner.shared.wait_for_sync(stop).await
    }
}

impl<K> Control for SharedInformer<K>
where
    K: 'static + Resource + Clone + Debug + DeserializeOwned + Send + Sync,
    K::DynamicType: Clone + Eq + Hash + Default + Send + Sync,
{
    fn start(&self, stop: &CancellationToken) -> bool {
        SharedInformer::start(self, stop)
    }

    fn wait_for_cache_sync<'a>(&'a self, stop: &'a CancellationToken) -> BoxFuture<'a, bool> {
        SharedInformer::wait_for_cache_sync(self, stop).boxed()
    }
}

/// Read access to a [`SharedInformer`]'s cache.
pub struct Lister<K: 'static + Resource>
where
    K::DynamicType: Eq + Hash,
{
    shared: Arc<Shared<K>>,
}

impl<K: 'static + Resource> Clone for Lister<K>
where
    K::DynamicType: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> Lister<K>
where
    K: 'static + Resource + Clone,
    K::DynamicType: Clone + Eq + Hash,
{
    /// Lists cached objects whose labels match `selector`, ordered by namespace and name.
    pub fn list(&self, selector: &LabelSelector) -> Result<Vec<Arc<K>>, ListError> {
        if !self.shared.has_synced() {
            return Err(ListError::NotSynced);
        }

        let mut objects: Vec<_> = self
            .shared
            .store
            .state()
            .into_iter()
            .filter(|obj| selector.matches(obj.meta().labels.as_ref()))
            .collect();
        objects.sort_by_cached_key(|obj| QualifiedName::from_resource(obj.as_ref()));
        Ok(objects)
    }

    /// Looks up one cached object.
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let mut key = reflector::ObjectRef::new_with(name, self.shared.dyntype.clone());
        if let Some(namespace) = namespace {
            key = key.within(namespace);
        }
        self.shared.store.get(&key)
    }
}

/// The error type returned by [`Lister::list`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    #[error("informer cache has not synced yet")]
    NotSynced,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::stream;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn pod(name: &str, app: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some(name.into()),
                labels: Some(BTreeMap::from([("app".to_owned(), app.to_owned())])),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    async fn synced_lister(pods: Vec<Pod>) -> Lister<Pod> {
        let writer = reflector::store::Writer::new(());
        let shared = Arc::new(Shared::new(writer.as_reader(), ()));
        let lister = Lister {
            shared: Arc::clone(&shared),
        };
        runner::run(
            stream::iter([Ok(watcher::Event::Restarted(pods))]),
            writer,
            shared,
            Duration::ZERO,
            CancellationToken::new(),
        )
        .await;
        lister
    }

    #[test]
    fn list_before_sync_fails() {
        let writer = reflector::store::Writer::<Pod>::new(());
        let lister = Lister {
            shared: Arc::new(Shared::new(writer.as_reader(), ())),
        };
        assert_eq!(
            lister.list(&LabelSelector::everything()),
            Err(ListError::NotSynced)
        );
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let lister = synced_lister(vec![pod("b", "web"), pod("a", "web"), pod("c", "db")]).await;

        let names = |selector: &str| -> Vec<String> {
            lister
                .list(&selector.parse::<LabelSelector>().unwrap())
                .unwrap()
                .iter()
                .map(|pod| pod.metadata.name.clone().unwrap())
                .collect()
        };
        assert_eq!(names(""), ["a", "b", "c"]);
        assert_eq!(names("app=web"), ["a", "b"]);
        assert_eq!(names("app!=web"), ["c"]);
    }

    #[tokio::test]
    async fn factory_hands_out_one_informer_per_type() {
        let config = kube_client::Config::new("http://127.0.0.1:8001".parse().unwrap());
        let factory = InformerFactory::new(Client::try_from(config).unwrap(), Duration::ZERO);

        let first = factory.pods();
        let second = factory.informer::<Pod>();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
        assert_eq!(factory.controls().len(), 1);
        assert!(!first.has_synced());
    }

    #[tokio::test]
    async fn get_looks_up_by_namespace_and_name() {
        let lister = synced_lister(vec![pod("a", "web")]).await;
        assert!(lister.get(Some("default"), "a").is_some());
        assert!(lister.get(Some("other"), "a").is_none());
        assert!(lister.get(None, "a").is_none());
    }
}
