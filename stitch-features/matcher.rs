use rayon::prelude::*;
use stitch_brief::hamming_distance;
use stitch_core::{DescriptorSet, FloatDescriptor, Match, SessionConfig};

/// Why a two-nearest-neighbour query could not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnnError {
    /// The ratio test needs a second neighbour
    TooFewTrainDescriptors { available: usize },
    /// Float and binary descriptors cannot be compared
    MetricMismatch,
}

impl std::fmt::Display for KnnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KnnError::TooFewTrainDescriptors { available } => {
                write!(f, "k=2 query needs at least 2 train descriptors, got {}", available)
            }
            KnnError::MetricMismatch => write!(f, "descriptor families differ (float vs binary)"),
        }
    }
}

impl std::error::Error for KnnError {}

pub type KnnResult<T> = Result<T, KnnError>;

/// Smallest number of matches kept by the fallback path
pub const FALLBACK_MIN_MATCHES: usize = 10;

#[inline]
pub fn euclidean_distance(a: &FloatDescriptor, b: &FloatDescriptor) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Best and second-best train neighbour for every query descriptor, ordered by query index
pub fn knn2(query: &DescriptorSet, train: &DescriptorSet) -> KnnResult<Vec<[Match; 2]>> {
    if train.len() < 2 {
        return Err(KnnError::TooFewTrainDescriptors { available: train.len() });
    }
    match (query, train) {
        (DescriptorSet::Float(q), DescriptorSet::Float(t)) => Ok(two_nearest(q, t, euclidean_distance)),
        (DescriptorSet::Binary(q), DescriptorSet::Binary(t)) => {
            Ok(two_nearest(q, t, |a, b| hamming_distance(a, b) as f32))
        }
        _ => Err(KnnError::MetricMismatch),
    }
}

fn two_nearest<D, F>(query: &[D], train: &[D], distance: F) -> Vec<[Match; 2]>
where
    D: Sync,
    F: Fn(&D, &D) -> f32 + Sync,
{
    query
        .par_iter()
        .enumerate()
        .map(|(qi, q)| {
            let mut best = Match { query_idx: qi, train_idx: 0, distance: f32::INFINITY };
            let mut second = best;
            for (ti, t) in train.iter().enumerate() {
                let d = distance(q, t);
                if d < best.distance {
                    second = best;
                    best = Match { query_idx: qi, train_idx: ti, distance: d };
                } else if d < second.distance {
                    second = Match { query_idx: qi, train_idx: ti, distance: d };
                }
            }
            [best, second]
        })
        .collect()
}

fn nearest<D, F>(from: &[D], to: &[D], distance: &F) -> Vec<(usize, f32)>
where
    D: Sync,
    F: Fn(&D, &D) -> f32 + Sync,
{
    from.par_iter()
        .map(|a| {
            to.iter()
                .enumerate()
                .map(|(j, b)| (j, distance(a, b)))
                .fold((0, f32::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc })
        })
        .collect()
}

fn cross_checked<D, F>(query: &[D], train: &[D], distance: F) -> Vec<Match>
where
    D: Sync,
    F: Fn(&D, &D) -> f32 + Sync,
{
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }
    let forward = nearest(query, train, &distance);
    let backward = nearest(train, query, &distance);
    forward
        .into_iter()
        .enumerate()
        .filter(|&(qi, (ti, _))| backward[ti].0 == qi)
        .map(|(qi, (ti, d))| Match { query_idx: qi, train_idx: ti, distance: d })
        .collect()
}

/// Mutual nearest neighbours, ascending by distance; empty on a metric mismatch
pub fn cross_check_matches(query: &DescriptorSet, train: &DescriptorSet) -> Vec<Match> {
    let mut matches = match (query, train) {
        (DescriptorSet::Float(q), DescriptorSet::Float(t)) => cross_checked(q, t, euclidean_distance),
        (DescriptorSet::Binary(q), DescriptorSet::Binary(t)) => {
            cross_checked(q, t, |a, b| hamming_distance(a, b) as f32)
        }
        _ => Vec::new(),
    };
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.query_idx.cmp(&b.query_idx)));
    matches
}

/// Ratio-test descriptor matcher with a cross-checked fallback
#[derive(Debug, Clone, Copy)]
pub struct FeatureMatcher {
    ratio: f32,
}

impl FeatureMatcher {
    pub fn new(ratio: f32) -> Self {
        Self { ratio }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.match_ratio)
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Good matches from `query` into `train`. Never fails; may be empty.
    pub fn match_descriptors(&self, query: &DescriptorSet, train: &DescriptorSet) -> Vec<Match> {
        if query.is_empty() || train.is_empty() {
            return Vec::new();
        }

        match knn2(query, train) {
            Ok(pairs) => {
                let good: Vec<Match> = pairs
                    .into_iter()
                    .filter(|[best, second]| best.distance < self.ratio * second.distance)
                    .map(|[best, _]| best)
                    .collect();
                log::debug!("ratio test kept {} of {} query descriptors", good.len(), query.len());
                good
            }
            Err(KnnError::MetricMismatch) => {
                log::warn!("cannot match {:?} against {:?} descriptors", query.metric(), train.metric());
                Vec::new()
            }
            Err(err) => {
                let matches = Self::fallback_matches(query, train);
                log::warn!("{}; falling back to cross-checked matching ({} kept)", err, matches.len());
                matches
            }
        }
    }

    /// Top quarter (at least [`FALLBACK_MIN_MATCHES`]) of the cross-checked matches
    pub fn fallback_matches(query: &DescriptorSet, train: &DescriptorSet) -> Vec<Match> {
        let mut matches = cross_check_matches(query, train);
        let keep = (matches.len() / 4).max(FALLBACK_MIN_MATCHES).min(matches.len());
        matches.truncate(keep);
        matches
    }
}

impl Default for FeatureMatcher {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use stitch_core::{BinaryDescriptor, FLOAT_DESCRIPTOR_LEN};

    fn random_binary(rng: &mut StdRng, n: usize) -> Vec<BinaryDescriptor> {
        (0..n).map(|_| std::array::from_fn(|_| rng.random::<u8>())).collect()
    }

    fn random_float(rng: &mut StdRng, n: usize) -> Vec<FloatDescriptor> {
        (0..n).map(|_| std::array::from_fn(|_| rng.random_range(0.0f32..1.0))).collect()
    }

    /// Brute-force best/second distances for one query against the train set
    fn brute_force(query: &DescriptorSet, train: &DescriptorSet, qi: usize) -> (f32, f32) {
        let mut ds: Vec<f32> = match (query, train) {
            (DescriptorSet::Float(q), DescriptorSet::Float(t)) => t.iter().map(|d| euclidean_distance(&q[qi], d)).collect(),
            (DescriptorSet::Binary(q), DescriptorSet::Binary(t)) => {
                t.iter().map(|d| hamming_distance(&q[qi], d) as f32).collect()
            }
            _ => unreachable!(),
        };
        ds.sort_by(f32::total_cmp);
        (ds[0], ds.get(1).copied().unwrap_or(f32::INFINITY))
    }

    #[test]
    fn test_empty_sets_return_nothing() {
        let matcher = FeatureMatcher::default();
        let empty = DescriptorSet::Binary(Vec::new());
        let one = DescriptorSet::Binary(vec![[1u8; 32]]);
        assert!(matcher.match_descriptors(&empty, &one).is_empty());
        assert!(matcher.match_descriptors(&one, &empty).is_empty());
    }

    #[test]
    fn test_knn_requires_two_train_descriptors() {
        let one = DescriptorSet::Binary(vec![[0u8; 32]]);
        assert_eq!(knn2(&one, &one), Err(KnnError::TooFewTrainDescriptors { available: 1 }));
    }

    #[test]
    fn test_metric_mismatch() {
        let float = DescriptorSet::Float(vec![[0.0; FLOAT_DESCRIPTOR_LEN]; 3]);
        let binary = DescriptorSet::Binary(vec![[0u8; 32]; 3]);
        assert_eq!(knn2(&float, &binary), Err(KnnError::MetricMismatch));
        assert!(FeatureMatcher::default().match_descriptors(&float, &binary).is_empty());
    }

    #[test]
    fn test_single_train_descriptor_uses_fallback() {
        let train = DescriptorSet::Binary(vec![[0b1010_1010u8; 32]]);
        let query = DescriptorSet::Binary(vec![[0xFF; 32], [0b1010_1010u8; 32], [0u8; 32]]);
        let matches = FeatureMatcher::default().match_descriptors(&query, &train);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0], Match { query_idx: 1, train_idx: 0, distance: 0.0 });
    }

    #[test]
    fn test_identical_sets_match_themselves() {
        let mut rng = StdRng::seed_from_u64(7);
        let set = DescriptorSet::Binary(random_binary(&mut rng, 60));
        let matches = FeatureMatcher::default().match_descriptors(&set, &set);
        assert_eq!(matches.len(), 60);
        assert!(matches.iter().all(|m| m.query_idx == m.train_idx && m.distance == 0.0));
    }

    #[test]
    fn test_float_nearest_neighbour() {
        let mut rng = StdRng::seed_from_u64(11);
        let train = random_float(&mut rng, 20);
        let mut shifted = train[5];
        shifted[0] += 0.01;
        let matches = FeatureMatcher::default()
            .match_descriptors(&DescriptorSet::Float(vec![shifted]), &DescriptorSet::Float(train));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].train_idx, 5);
        assert!((matches[0].distance - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_fallback_keeps_top_quarter_with_floor() {
        let mut rng = StdRng::seed_from_u64(3);
        let set = DescriptorSet::Binary(random_binary(&mut rng, 80));
        let kept = FeatureMatcher::fallback_matches(&set, &set);
        assert_eq!(kept.len(), 20);
        assert!(kept.windows(2).all(|w| w[0].distance <= w[1].distance));

        let small = DescriptorSet::Binary(random_binary(&mut rng, 12));
        assert_eq!(FeatureMatcher::fallback_matches(&small, &small).len(), 10);

        let tiny = DescriptorSet::Binary(random_binary(&mut rng, 4));
        assert_eq!(FeatureMatcher::fallback_matches(&tiny, &tiny).len(), 4);
    }

    proptest! {
        #[test]
        fn prop_binary_matches_pass_ratio_test(seed in any::<u64>(), nq in 1usize..40, nt in 1usize..40, ratio in 0.3f32..0.95) {
            let mut rng = StdRng::seed_from_u64(seed);
            let query = DescriptorSet::Binary(random_binary(&mut rng, nq));
            let train = DescriptorSet::Binary(random_binary(&mut rng, nt));
            for m in FeatureMatcher::new(ratio).match_descriptors(&query, &train) {
                let (best, second) = brute_force(&query, &train, m.query_idx);
                prop_assert_eq!(m.distance, best);
                prop_assert!(best < ratio * second);
            }
        }

        #[test]
        fn prop_float_matches_pass_ratio_test(seed in any::<u64>(), nq in 1usize..20, nt in 1usize..20) {
            let mut rng = StdRng::seed_from_u64(seed);
            let query = DescriptorSet::Float(random_float(&mut rng, nq));
            let train = DescriptorSet::Float(random_float(&mut rng, nt));
            for m in FeatureMatcher::new(0.7).match_descriptors(&query, &train) {
                let (best, second) = brute_force(&query, &train, m.query_idx);
                prop_assert!((m.distance - best).abs() <= 1e-5);
                prop_assert!(best < 0.7 * second);
            }
        }
    }
}
