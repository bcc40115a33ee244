use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A shard index is not lower than the number of shards.
    #[error("shard id {shard_id} is out of range for {shards} shards")]
    ShardOutOfRange { shard_id: u16, shards: u16 },
}
