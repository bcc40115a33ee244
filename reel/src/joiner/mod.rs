//! Gated stream join between the movie relation and the review and credit streams.
//!
//! Each joiner shard runs one [`join_loop::JoinLoop`] owning a [`store::SessionStore`] with a
//! [`session::JoinSession`] per client. Reviews are joined with the movie titles and credits are
//! filtered by the movie set, but only once the movie relation of the client is complete.

pub mod join_loop;
pub mod session;
pub mod store;

pub use join_loop::JoinLoop;
pub use session::{JoinSession, MoviesOutcome, PendingBatch, Probe, SessionState};
pub use store::{Admission, SessionStore};
