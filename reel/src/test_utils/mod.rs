//! Helpers shared by unit and integration tests.
//!
//! - [`fixtures`] builds movies, reviews and credits.
//! - [`bus`] inspects what stages published on a [`crate::bus::memory::MemoryBus`].
//! - [`notify`] bounds every wait with a timeout so a stuck stage fails the test instead of
//!   hanging it.

pub mod bus;
pub mod fixtures;
pub mod notify;
