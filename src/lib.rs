pub mod app;
pub mod cluster;
pub mod config;
pub mod error;

pub use app::{ClusterObserver, RunningObserver};
pub use error::{ObserverError, Result};
