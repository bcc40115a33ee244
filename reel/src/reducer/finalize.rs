//! Finalize policies shared by the query aggregates.

use std::cmp::Ordering;

/// Keeps the `n` entries with the highest weight.
///
/// Entries are ordered by descending weight and ties are broken by ascending key, so the result
/// does not depend on the order the entries were accumulated in. When fewer than `n` entries
/// exist the lowest ranked one is repeated until `n` slots are filled. No entries yield an empty
/// result.
pub fn top_n<T, W, K>(
    mut entries: Vec<T>,
    n: usize,
    weight: impl Fn(&T) -> W,
    key: impl Fn(&T) -> K,
) -> Vec<T>
where
    T: Clone,
    W: Ord,
    K: Ord,
{
    entries.sort_by(|a, b| {
        weight(b)
            .cmp(&weight(a))
            .then_with(|| key(a).cmp(&key(b)))
    });
    entries.truncate(n);

    if let Some(last) = entries.last().cloned() {
        entries.resize(n, last);
    }

    entries
}

/// Running maximum and minimum over scored entries.
///
/// On equal scores the entry offered first is kept, so callers feed entries in a deterministic
/// order.
#[derive(Debug, Clone)]
pub struct Extremes<T> {
    best: Option<(f64, T)>,
    worst: Option<(f64, T)>,
}

impl<T: Clone> Extremes<T> {
    pub fn new() -> Self {
        Self {
            best: None,
            worst: None,
        }
    }

    pub fn offer(&mut self, score: f64, entry: T) {
        let is_best = match &self.best {
            None => true,
            Some((best, _)) => score.partial_cmp(best) == Some(Ordering::Greater),
        };
        if is_best {
            self.best = Some((score, entry.clone()));
        }

        let is_worst = match &self.worst {
            None => true,
            Some((worst, _)) => score.partial_cmp(worst) == Some(Ordering::Less),
        };
        if is_worst {
            self.worst = Some((score, entry));
        }
    }

    pub fn best(&self) -> Option<&(f64, T)> {
        self.best.as_ref()
    }

    pub fn worst(&self) -> Option<&(f64, T)> {
        self.worst.as_ref()
    }

    pub fn into_parts(self) -> (Option<(f64, T)>, Option<(f64, T)>) {
        (self.best, self.worst)
    }
}

impl<T: Clone> Default for Extremes<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top3(entries: &[(&'static str, u64)]) -> Vec<(&'static str, u64)> {
        top_n(entries.to_vec(), 3, |entry| entry.1, |entry| entry.0)
    }

    #[test]
    fn top_n_orders_by_weight_then_key() {
        let result = top3(&[("b", 5), ("a", 5), ("c", 9), ("d", 1)]);

        assert_eq!(result, vec![("c", 9), ("a", 5), ("b", 5)]);
    }

    #[test]
    fn top_n_pads_with_the_lowest_ranked_entry() {
        let result = top_n(vec![("us", 1000u64), ("cn", 2000)], 5, |e| e.1, |e| e.0);

        assert_eq!(
            result,
            vec![("cn", 2000), ("us", 1000), ("us", 1000), ("us", 1000), ("us", 1000)]
        );
    }

    #[test]
    fn top_n_of_nothing_is_empty() {
        assert!(top3(&[]).is_empty());
    }

    #[test]
    fn extremes_pick_best_and_worst() {
        let mut extremes = Extremes::new();
        extremes.offer(8.0, "A");
        extremes.offer(2.0, "B");
        extremes.offer(5.0, "C");

        assert_eq!(extremes.best(), Some(&(8.0, "A")));
        assert_eq!(extremes.worst(), Some(&(2.0, "B")));
    }

    #[test]
    fn single_entry_is_both_best_and_worst() {
        let mut extremes = Extremes::new();
        extremes.offer(3.0, "A");

        assert_eq!(extremes.best(), Some(&(3.0, "A")));
        assert_eq!(extremes.worst(), Some(&(3.0, "A")));
    }

    #[test]
    fn zero_average_is_a_valid_worst() {
        let mut extremes = Extremes::new();
        extremes.offer(4.0, "A");
        extremes.offer(0.0, "B");

        assert_eq!(extremes.worst(), Some(&(0.0, "B")));
    }
}
