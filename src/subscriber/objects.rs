use std::{collections::HashSet, hash::Hash, sync::Arc};

use kube_core::Resource;
use kube_runtime::{reflector, watcher};

use super::{DeletedFinalStateUnknown, Deletion, Notification, QualifiedName};

/// Computes the notifications implied by applying `event` to `store`.
///
/// Must be called before the event is applied to the store's writer,
/// since the previous state of each object is read from `store`.
pub fn notifications<K>(
    store: &reflector::Store<K>,
    event: &watcher::Event<K>,
    dyntype: &K::DynamicType,
) -> Vec<Notification<K>>
where
    K: 'static + Resource + Clone,
    K::DynamicType: Clone + Eq + Hash,
{
    let lookup = |obj: &K| store.get(&reflector::ObjectRef::from_obj_with(obj, dyntype.clone()));
    let upsert = |obj: &K| {
        let new = Arc::new(obj.clone());
        match lookup(obj) {
            Some(old) => Notification::Updated { old, new },
            None => Notification::Added(new),
        }
    };

    match event {
        watcher::Event::Applied(obj) => vec![upsert(obj)],
        watcher::Event::Deleted(obj) => {
            vec![Notification::Deleted(Deletion::Object(Arc::new(obj.clone())))]
        }
        watcher::Event::Restarted(objs) => {
            let listed: HashSet<_> = objs
                .iter()
                .map(|obj| reflector::ObjectRef::from_obj_with(obj, dyntype.clone()))
                .collect();

            let mut out: Vec<_> = objs.iter().map(upsert).collect();
            // anything cached but absent from the relist was deleted while we were not watching
            out.extend(
                store
                    .state()
                    .into_iter()
                    .filter(|cached| {
                        !listed.contains(&reflector::ObjectRef::from_obj_with(
                            cached.as_ref(),
                            dyntype.clone(),
                        ))
                    })
                    .map(|cached| {
                        Notification::Deleted(Deletion::FinalStateUnknown(
                            DeletedFinalStateUnknown {
                                key: QualifiedName::from_resource(cached.as_ref()).to_string(),
                                obj: Some(cached),
                            },
                        ))
                    }),
            );
            out
        }
    }
}
