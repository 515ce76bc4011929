//! kube-pod-watch observes Pods through a shared informer
//! and logs their lifecycle transitions.
//!
//! An [`InformerFactory`] hands out one [`SharedInformer`] per resource type.
//! Each informer list-watches its type across all namespaces,
//! keeps the results in a reflector store,
//! and fans added/updated/deleted notifications out to registered [`EventHandler`]s.
//! [`PodLifecycleLogger`] is the handler that turns Pod notifications into log lines.

pub mod config;
pub use config::{connect, BootstrapError, Config};
pub mod dispatcher;
pub use dispatcher::PodLifecycleLogger;
pub mod informer;
pub use informer::{InformerFactory, LabelSelector, ListError, Lister, SharedInformer};
mod runner;
pub use runner::EventHandler;
pub mod subscriber;
pub use subscriber::{Deletion, Notification, QualifiedName};
