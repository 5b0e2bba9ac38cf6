//! Connectivity detection

mod monitor;
mod probe;
mod subscribers;

pub use monitor::{ConnectivityMonitor, ConnectivityStatus};
pub use probe::{Probe, TcpProbe};
pub use subscribers::{SubscriberId, Subscribers};

#[cfg(test)]
pub(crate) use monitor::tests::ScriptedProbe;
