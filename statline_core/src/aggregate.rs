use crate::model::Partial;
use serde::{Deserialize, Serialize};

/// Positions of the bottom and top approximations in a value-sorted sequence of `n` items.
///
/// `bottom = clamp(ceil(p * n), 0, n - 1)`, `top = clamp(round((1 - p) * n), 0, n - 1)`.
/// Both are `0` when `n == 0`.
pub fn approx_indices(n: usize, percentile: f64) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }

    let len = n as f64;
    let last = (n - 1) as f64;
    let bottom = (percentile * len).ceil().clamp(0.0, last) as usize;
    let top = ((1.0 - percentile) * len).round().clamp(0.0, last) as usize;
    (bottom, top)
}

/// The result of folding a run of partials for one (type, path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folded {
    pub pct: f64,
    pub sum: i64,
    #[serde(rename = "cnt")]
    pub count: u64,
    pub max: i64,
    pub min: i64,
    #[serde(rename = "fst")]
    pub first: i64,
    #[serde(rename = "lst")]
    pub last: i64,
    #[serde(rename = "bot")]
    pub bottom: i64,
    pub top: i64,
    #[serde(rename = "emp")]
    pub emphasis: bool,
}

impl Folded {
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum as f64 / self.count as f64)
        }
    }
}

/// Folds partials given oldest first. Returns `None` for an empty run.
///
/// Sums and counts add up (saturating at the integer bounds), extrema are running, `first` comes from the oldest
/// partial and `last` from the newest. Bottom and top are not recomputable
/// once raw samples are gone: the children's bottoms (resp. tops) are sorted
/// and picked with the same index rule as a flush, using the oldest
/// partial's percentile. This is an approximation.
pub fn fold_partials<'a, I>(partials: I) -> Option<Folded>
where
    I: IntoIterator<Item = &'a Partial>,
{
    let mut iter = partials.into_iter();
    let head = iter.next()?;

    let mut folded = Folded {
        pct: head.pct,
        sum: head.sum,
        count: head.count,
        max: head.max,
        min: head.min,
        first: head.first,
        last: head.last,
        bottom: head.bottom,
        top: head.top,
        emphasis: head.emphasis,
    };
    let mut bottoms = vec![head.bottom];
    let mut tops = vec![head.top];

    for partial in iter {
        folded.sum = folded.sum.saturating_add(partial.sum);
        folded.count = folded.count.saturating_add(partial.count);
        folded.max = folded.max.max(partial.max);
        folded.min = folded.min.min(partial.min);
        folded.last = partial.last;
        folded.emphasis |= partial.emphasis;
        bottoms.push(partial.bottom);
        tops.push(partial.top);
    }

    bottoms.sort_unstable();
    tops.sort_unstable();
    let (bottom_index, _) = approx_indices(bottoms.len(), folded.pct);
    let (_, top_index) = approx_indices(tops.len(), folded.pct);
    folded.bottom = bottoms[bottom_index];
    folded.top = tops[top_index];

    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricType;
    use proptest::prelude::*;

    fn partial(sum: i64, count: u64, min: i64, max: i64, emphasis: bool) -> Partial {
        Partial {
            typ: MetricType::Timer,
            path: "db.query".to_string(),
            pct: 0.1,
            sum,
            count,
            max,
            min,
            first: min,
            last: max,
            bottom: min,
            top: max,
            emphasis,
        }
    }

    #[test]
    fn test_approx_indices_small_windows() {
        assert_eq!(approx_indices(1, 0.1), (0, 0));
        assert_eq!(approx_indices(2, 0.1), (1, 1));
        assert_eq!(approx_indices(10, 0.1), (1, 9));
        assert_eq!(approx_indices(20, 0.1), (2, 18));
        assert_eq!(approx_indices(4, 0.5), (2, 2));
    }

    #[test]
    fn test_fold_empty_is_none() {
        assert!(fold_partials(std::iter::empty::<&Partial>()).is_none());
    }

    #[test]
    fn test_fold_combines_partials() {
        let partials = vec![
            partial(30, 3, 5, 15, false),
            partial(100, 2, 40, 60, true),
            partial(4, 4, 1, 1, false),
        ];

        let folded = fold_partials(&partials).unwrap();
        assert_eq!(folded.sum, 134);
        assert_eq!(folded.count, 9);
        assert_eq!(folded.max, 60);
        assert_eq!(folded.min, 1);
        assert_eq!(folded.first, 5);
        assert_eq!(folded.last, 1);
        assert!(folded.emphasis);
        // bottoms [1, 5, 40] -> index ceil(0.3) = 1; tops [1, 15, 60] -> index round(2.7) clamped to 2
        assert_eq!(folded.bottom, 5);
        assert_eq!(folded.top, 60);
    }

    #[test]
    fn test_fold_saturates_at_bounds() {
        let partials = vec![
            partial(i64::MAX, u64::MAX, 1, 1, false),
            partial(1, 1, 1, 1, false),
        ];
        let folded = fold_partials(&partials).unwrap();
        assert_eq!(folded.sum, i64::MAX);
        assert_eq!(folded.count, u64::MAX);

        let partials = vec![partial(i64::MIN, 1, -1, -1, false), partial(-1, 1, -1, -1, false)];
        assert_eq!(fold_partials(&partials).unwrap().sum, i64::MIN);
    }

    #[test]
    fn test_folded_average() {
        let folded = fold_partials(&[partial(10, 4, 1, 5, false)]).unwrap();
        assert_eq!(folded.average(), Some(2.5));
    }

    proptest! {
        #[test]
        fn test_approx_indices_in_bounds(n in 1usize..10_000, p in 0.0001f64..=0.5) {
            let (bottom, top) = approx_indices(n, p);
            prop_assert!(bottom <= n - 1);
            prop_assert!(top <= n - 1);
        }
    }
}
