//! Coordination primitives shared by the pipeline workers.
//!
//! Every worker owns its state exclusively and only interacts with the rest of the process
//! through the message bus, so the single cross-worker concern is shutdown: one
//! [`shutdown::ShutdownTx`] is held by the topology and each worker loop selects on its own
//! [`shutdown::ShutdownRx`] with priority over inbound deliveries.

pub mod shutdown;
