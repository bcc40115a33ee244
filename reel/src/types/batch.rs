use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ReelResult};
use crate::reel_error;

/// Wire value of `total_weight` while the total of a stream is not known yet.
pub const TOTAL_WEIGHT_UNKNOWN: i32 = -1;

/// Wire value of `total_weight` asking every stage to drop the state of a client.
pub const TOTAL_WEIGHT_CLEANUP: i32 = -2;

/// Identifier correlating every batch of one end-to-end client request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Header carried by every batch.
///
/// `weight` is the number of items the batch accounts for and `total_weight` is only positive
/// on the terminal marker of a stream, where it declares the grand total. Non-positive totals are
/// sentinels, see [`Header::kind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub client_id: ClientId,
    pub weight: u32,
    pub total_weight: i32,
}

/// Role of a batch within its stream, decoded from the header sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// A chunk of items; the total of the stream is not known yet.
    Data,
    /// The end of the stream, declaring how many items it carried overall.
    Terminal { total: u32 },
    /// The client went away and its state must be discarded.
    Cleanup,
}

impl Header {
    /// Creates the header of a data batch.
    pub fn data(client_id: ClientId, weight: u32) -> Self {
        Self {
            client_id,
            weight,
            total_weight: TOTAL_WEIGHT_UNKNOWN,
        }
    }

    /// Creates the header of a terminal marker declaring `total` items.
    pub fn terminal(client_id: ClientId, total: u32) -> Self {
        Self {
            client_id,
            weight: 0,
            total_weight: i32::try_from(total).unwrap_or(i32::MAX),
        }
    }

    /// Creates the header of a cleanup marker.
    pub fn cleanup(client_id: ClientId) -> Self {
        Self {
            client_id,
            weight: 0,
            total_weight: TOTAL_WEIGHT_CLEANUP,
        }
    }

    pub fn kind(&self) -> BatchKind {
        match self.total_weight {
            total if total > 0 => BatchKind::Terminal {
                total: total.unsigned_abs(),
            },
            TOTAL_WEIGHT_CLEANUP => BatchKind::Cleanup,
            _ => BatchKind::Data,
        }
    }
}

/// Envelope carrying an ordered chunk of items of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<T> {
    pub header: Header,
    pub data: Vec<T>,
}

impl<T> Batch<T> {
    /// Creates a data batch whose weight is the number of items.
    pub fn data(client_id: ClientId, data: Vec<T>) -> Self {
        let weight = u32::try_from(data.len()).unwrap_or(u32::MAX);

        Self {
            header: Header::data(client_id, weight),
            data,
        }
    }

    /// Creates the terminal marker of a stream of `total` items.
    pub fn terminal(client_id: ClientId, total: u32) -> Self {
        Self {
            header: Header::terminal(client_id, total),
            data: Vec::new(),
        }
    }

    /// Creates a cleanup marker.
    pub fn cleanup(client_id: ClientId) -> Self {
        Self {
            header: Header::cleanup(client_id),
            data: Vec::new(),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.header.client_id
    }

    pub fn kind(&self) -> BatchKind {
        self.header.kind()
    }

    /// Returns a batch with the same header carrying `data` instead.
    ///
    /// Stages that transform items keep the input weight so that completion accounting
    /// downstream is unaffected by the output cardinality.
    pub fn with_data<U>(&self, data: Vec<U>) -> Batch<U> {
        Batch {
            header: self.header.clone(),
            data,
        }
    }
}

impl<T> Batch<T>
where
    T: DeserializeOwned,
{
    /// Decodes a JSON encoded batch.
    pub fn decode(payload: &[u8]) -> ReelResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl<T> Batch<T>
where
    T: Serialize,
{
    /// Encodes the batch as JSON.
    pub fn encode(&self) -> ReelResult<Bytes> {
        encode_json(self)
    }
}

/// Encodes any message exchanged over the bus as JSON.
pub fn encode_json<T: Serialize>(value: &T) -> ReelResult<Bytes> {
    serde_json::to_vec(value).map(Bytes::from).map_err(|err| {
        reel_error!(
            ErrorKind::SerializationError,
            "Message serialization failed",
            err.to_string(),
            source: err
        )
    })
}
