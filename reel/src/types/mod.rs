//! Common types exchanged between pipeline stages.
//!
//! Includes the batch envelope with its header, the movie domain relations and the partial and
//! final results of the reducer queries.

mod batch;
mod movie;
mod results;

pub use batch::*;
pub use movie::*;
pub use results::*;
