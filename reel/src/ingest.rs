//! Slicing of a client relation into a weighted stream of batches.

use reel_config::shared::BatchConfig;

use crate::bail;
use crate::error::{ErrorKind, ReelResult};
use crate::types::{Batch, ClientId};

/// Produces the batches a client sends for one relation.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    client_id: ClientId,
    max_size: usize,
}

impl StreamWriter {
    pub fn new(client_id: ClientId, config: &BatchConfig) -> Self {
        Self {
            client_id,
            max_size: config.max_size.max(1),
        }
    }

    /// Splits `items` into data batches of at most `max_size` items followed by a terminal marker
    /// declaring the number of items.
    ///
    /// An empty relation cannot be terminated, since a terminal marker must declare a positive
    /// total, and is rejected with [`ErrorKind::InvalidData`].
    pub fn batches<T: Clone>(&self, items: &[T]) -> ReelResult<Vec<Batch<T>>> {
        if items.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "Empty relation cannot be streamed",
                format!("client {} has no items to send", self.client_id)
            );
        }

        let Ok(total) = u32::try_from(items.len()) else {
            bail!(
                ErrorKind::InvalidData,
                "Relation too large to be streamed",
                format!("{} items exceed the header weight range", items.len())
            );
        };

        let mut batches: Vec<Batch<T>> = items
            .chunks(self.max_size)
            .map(|chunk| Batch::data(self.client_id.clone(), chunk.to_vec()))
            .collect();
        batches.push(Batch::terminal(self.client_id.clone(), total));

        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionTracker;
    use crate::types::BatchKind;

    #[test]
    fn relation_is_chunked_and_terminated() {
        let writer = StreamWriter::new(ClientId::new("c1"), &BatchConfig { max_size: 2 });

        let batches = writer.batches(&[1, 2, 3, 4, 5]).unwrap();

        let weights: Vec<_> = batches.iter().map(|batch| batch.header.weight).collect();
        assert_eq!(weights, vec![2, 2, 1, 0]);
        assert_eq!(
            batches.last().unwrap().kind(),
            BatchKind::Terminal { total: 5 }
        );

        let mut tracker = CompletionTracker::new();
        for batch in &batches {
            tracker.register(&batch.header).unwrap();
        }
        assert!(tracker.is_complete());
    }

    #[test]
    fn empty_relation_is_rejected() {
        let writer = StreamWriter::new(ClientId::new("c1"), &BatchConfig::default());

        let err = writer.batches::<u32>(&[]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
