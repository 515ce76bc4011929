//! Logs Pod lifecycle transitions.

use k8s_openapi::api::core::v1::Pod;

use crate::{runner::EventHandler, subscriber::Deletion, QualifiedName};

/// Logs every added, updated and deleted Pod with its node assignment and phase.
///
/// Stateless; updates that do not change the resource version are resync replays and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PodLifecycleLogger;

fn node_name(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .unwrap_or_default()
}

fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default()
}

fn log_pod(message: &str, pod: &Pod) {
    log::info!(
        pod:% = QualifiedName::from_resource(pod),
        assignedNodeName:% = node_name(pod),
        phase:% = phase(pod);
        "{message}"
    );
}

impl EventHandler<Pod> for PodLifecycleLogger {
    fn on_added(&self, pod: &Pod) {
        log_pod("Pod added", pod);
    }

    fn on_updated(&self, old: &Pod, new: &Pod) {
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }

        log_pod("Old pod", old);
        log_pod("New pod", new);
    }

    fn on_deleted(&self, deletion: &Deletion<Pod>) {
        match deletion.object() {
            Ok(pod) => log_pod("Pod deleted", pod),
            Err(err) => {
                log::error!(
                    pod:% = deletion.key(),
                    error:% = err;
                    "Cannot recover pod from deletion tombstone"
                );
            }
        }
    }
}
