use std::{cell::RefCell, hash::Hash, pin::pin, sync::Arc, time::Duration};

use futures::{future, Stream, StreamExt};
use kube_core::Resource;
use kube_runtime::{reflector, watcher};
use parking_lot::ReentrantMutex;
use tokio::{
    sync::watch,
    time::{self, Instant, Interval},
};
use tokio_util::sync::CancellationToken;

use crate::subscriber::{self, Deletion, Notification};

/// Receives notifications from a [`SharedInformer`](crate::SharedInformer).
///
/// Handlers are invoked from the informer's task, one notification at a time,
/// so notifications about the same object arrive in order.
/// Implementations should return quickly.
/// A handler may register further handlers on the same informer from inside a callback;
/// those start receiving notifications from the next event on.
pub trait EventHandler<K>: Send + Sync {
    fn on_added(&self, obj: &K);

    /// `old` and `new` share a resource version when the update is a periodic resync.
    fn on_updated(&self, old: &K, new: &K);

    fn on_deleted(&self, deletion: &Deletion<K>);
}

fn dispatch<K>(handler: &dyn EventHandler<K>, notification: &Notification<K>) {
    match notification {
        Notification::Added(obj) => handler.on_added(obj),
        Notification::Updated { old, new } => handler.on_updated(old, new),
        Notification::Deleted(deletion) => handler.on_deleted(deletion),
    }
}

/// State shared between an informer's handle and its running task.
pub(crate) struct Shared<K: 'static + Resource>
where
    K::DynamicType: Eq + Hash,
{
    pub(crate) store: reflector::Store<K>,
    pub(crate) dyntype: K::DynamicType,
    /// Held for the whole of each delivery. Reentrant so that callbacks can register handlers.
    handlers: ReentrantMutex<RefCell<Vec<Arc<dyn EventHandler<K>>>>>,
    synced: watch::Sender<bool>,
}

impl<K> Shared<K>
where
    K: 'static + Resource + Clone,
    K::DynamicType: Clone + Eq + Hash,
{
    pub(crate) fn new(store: reflector::Store<K>, dyntype: K::DynamicType) -> Self {
        Self {
            store,
            dyntype,
            handlers: ReentrantMutex::new(RefCell::new(Vec::new())),
            synced: watch::Sender::new(false),
        }
    }

    /// Registers a handler and replays the current cache contents to it as additions.
    pub(crate) fn add_handler(&self, handler: Arc<dyn EventHandler<K>>) {
        // excludes deliveries from other threads, so the replay and later notifications do not overlap
        let handlers = self.handlers.lock();
        for obj in self.store.state() {
            handler.on_added(&obj);
        }
        handlers.borrow_mut().push(handler);
    }

    /// Calls every handler registered before this delivery started.
    fn deliver<'a>(&self, notifications: impl IntoIterator<Item = &'a Notification<K>>) {
        let guard = self.handlers.lock();
        let handlers = guard.borrow().clone();
        for notification in notifications {
            for handler in &handlers {
                dispatch(handler.as_ref(), notification);
            }
        }
    }

    pub(crate) fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the first full listing has been applied.
    ///
    /// Returns `false` if `stop` was cancelled first.
    pub(crate) async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        let mut synced = self.synced.subscribe();
        tokio::select! {
            () = stop.cancelled() => false,
            result = synced.wait_for(|synced| *synced) => result.is_ok(),
        }
    }

    fn apply(&self, writer: &mut reflector::store::Writer<K>, event: watcher::Event<K>) {
        let _delivery = self.handlers.lock();
        let notifications = subscriber::notifications(&self.store, &event, &self.dyntype);
        writer.apply_watcher_event(&event);
        self.deliver(&notifications);

        if matches!(event, watcher::Event::Restarted(_)) && !self.synced.send_replace(true) {
            log::debug!(objects = notifications.len(); "Cache synced");
        }
    }

    fn resync(&self) {
        let _delivery = self.handlers.lock();
        let replays: Vec<_> = self
            .store
            .state()
            .into_iter()
            .map(|obj| Notification::Updated {
                old: Arc::clone(&obj),
                new: obj,
            })
            .collect();
        self.deliver(&replays);
    }
}

/// Drives an informer: applies `events` to the cache and notifies handlers until `stop` is cancelled.
///
/// A non-zero `resync` replays every cached object as an update on that period.
pub(crate) async fn run<K, S>(
    events: S,
    mut writer: reflector::store::Writer<K>,
    shared: Arc<Shared<K>>,
    resync: Duration,
    stop: CancellationToken,
) where
    K: 'static + Resource + Clone,
    K::DynamicType: Clone + Eq + Hash,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
{
    let mut events = pin!(events);
    let mut resync_timer =
        (!resync.is_zero()).then(|| time::interval_at(Instant::now() + resync, resync));

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = tick(resync_timer.as_mut()) => shared.resync(),
            event = events.next() => match event {
                Some(Ok(event)) => shared.apply(&mut writer, event),
                Some(Err(err)) => log::warn!(error:% = err; "Watch failed, will retry"),
                None => break,
            },
        }
    }

    log::debug!("Informer stopped");
}

async fn tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => future::pending().await,
    }
}
