use std::cmp::Ordering;
use std::collections::HashSet;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::math::cosine_similarity;

/// What the matcher needs to know about one side of a pairing.
#[derive(Clone, Copy, Debug)]
pub struct MatchCandidate<'a> {
    pub bbox: &'a BoundingBox,
    pub descriptor: Option<&'a [f32]>,
}

impl<'a> MatchCandidate<'a> {
    pub fn new(bbox: &'a BoundingBox, descriptor: Option<&'a [f32]>) -> Self {
        Self { bbox, descriptor }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assignment {
    /// `(region index, observation index)` in the order they were assigned.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_regions: Vec<usize>,
    pub unmatched_observations: Vec<usize>,
}

#[derive(Clone, Copy, Debug)]
struct Pair {
    region: usize,
    observation: usize,
    iou: f64,
    similarity: Option<f64>,
}

fn by_iou(a: &Pair, b: &Pair) -> Ordering {
    b.iou
        .total_cmp(&a.iou)
        .then(a.region.cmp(&b.region))
        .then(a.observation.cmp(&b.observation))
}

/// Inside a tie bucket: higher descriptor similarity first, pairs without a
/// similarity last, then the plain IoU order.
fn by_similarity(a: &Pair, b: &Pair) -> Ordering {
    match (a.similarity, b.similarity) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| by_iou(a, b))
}

/// Orders candidate pairs for greedy assignment.
///
/// Pairs are sorted by IoU descending. Runs of pairs whose IoU lies within
/// `tie_window` of the run's best are re-ordered by descriptor similarity.
/// Remaining ties fall back to region order, then observation order.
fn ranked_pairs(mut pairs: Vec<Pair>, tie_window: f64) -> Vec<Pair> {
    pairs.sort_by(by_iou);
    if tie_window <= 0.0 {
        return pairs;
    }

    let mut ranked = Vec::with_capacity(pairs.len());
    let mut start = 0;
    while start < pairs.len() {
        let floor = pairs[start].iou - tie_window;
        let end = pairs[start..]
            .iter()
            .position(|p| p.iou < floor)
            .map_or(pairs.len(), |offset| start + offset);
        let mut bucket = pairs[start..end].to_vec();
        bucket.sort_by(by_similarity);
        ranked.extend(bucket);
        start = end;
    }
    ranked
}

/// Greedy highest-IoU-first assignment of observations to regions.
///
/// Only pairs with IoU >= `iou_threshold` are considered. Each region and each
/// observation is used at most once. The result depends only on the inputs
/// and their order.
pub fn greedy_assign(
    regions: &[MatchCandidate<'_>],
    observations: &[MatchCandidate<'_>],
    iou_threshold: f64,
    tie_window: f64,
) -> Assignment {
    let mut pairs = Vec::new();
    for (ri, region) in regions.iter().enumerate() {
        for (oi, observation) in observations.iter().enumerate() {
            let iou = region.bbox.iou(observation.bbox);
            if iou >= iou_threshold {
                let similarity = match (region.descriptor, observation.descriptor) {
                    (Some(a), Some(b)) => cosine_similarity(a, b),
                    _ => None,
                };
                pairs.push(Pair {
                    region: ri,
                    observation: oi,
                    iou,
                    similarity,
                });
            }
        }
    }

    let mut used_regions = HashSet::new();
    let mut used_observations = HashSet::new();
    let mut matches = Vec::new();

    for pair in ranked_pairs(pairs, tie_window) {
        if !used_regions.contains(&pair.region) && !used_observations.contains(&pair.observation) {
            used_regions.insert(pair.region);
            used_observations.insert(pair.observation);
            matches.push((pair.region, pair.observation));
        }
    }

    Assignment {
        matches,
        unmatched_regions: (0..regions.len())
            .filter(|i| !used_regions.contains(i))
            .collect(),
        unmatched_observations: (0..observations.len())
            .filter(|i| !used_observations.contains(i))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn boxes(specs: &[(f64, f64, f64, f64)]) -> Vec<BoundingBox> {
        specs
            .iter()
            .map(|&(x, y, w, h)| BoundingBox::new(x, y, w, h))
            .collect()
    }

    fn plain(boxes: &[BoundingBox]) -> Vec<MatchCandidate<'_>> {
        boxes.iter().map(|b| MatchCandidate::new(b, None)).collect()
    }

    #[test]
    fn test_highest_iou_wins() {
        let regions = boxes(&[(0.0, 0.0, 100.0, 100.0)]);
        let observations = boxes(&[(40.0, 0.0, 100.0, 100.0), (5.0, 0.0, 100.0, 100.0)]);

        let a = greedy_assign(&plain(&regions), &plain(&observations), 0.3, 0.0);

        assert_eq!(a.matches, vec![(0, 1)]);
        assert_eq!(a.unmatched_observations, vec![0]);
        assert!(a.unmatched_regions.is_empty());
    }

    #[rstest]
    #[case::just_below(0.29, false)]
    #[case::at_threshold(0.3, true)]
    fn test_threshold_is_inclusive(#[case] iou: f64, #[case] matched: bool) {
        // Same height, shifted horizontally: IoU = (w - d) / (w + d).
        let w = 100.0;
        let d = w * (1.0 - iou) / (1.0 + iou);
        let regions = boxes(&[(0.0, 0.0, w, w)]);
        let observations = boxes(&[(d, 0.0, w, w)]);

        let a = greedy_assign(&plain(&regions), &plain(&observations), 0.3 - 1e-9, 0.0);
        assert_eq!(!a.matches.is_empty(), matched);
    }

    #[test]
    fn test_equal_iou_ties_go_to_earlier_region() {
        // Observation sits exactly between two regions.
        let regions = boxes(&[(0.0, 0.0, 100.0, 100.0), (20.0, 0.0, 100.0, 100.0)]);
        let observations = boxes(&[(10.0, 0.0, 100.0, 100.0)]);

        for _ in 0..5 {
            let a = greedy_assign(&plain(&regions), &plain(&observations), 0.3, 0.0);
            assert_eq!(a.matches, vec![(0, 0)]);
            assert_eq!(a.unmatched_regions, vec![1]);
        }
    }

    #[test]
    fn test_swapped_faces_keep_one_region_each() {
        let regions = boxes(&[(0.0, 0.0, 100.0, 100.0), (60.0, 0.0, 100.0, 100.0)]);
        let observations = boxes(&[(58.0, 0.0, 100.0, 100.0), (3.0, 0.0, 100.0, 100.0)]);

        let a = greedy_assign(&plain(&regions), &plain(&observations), 0.3, 0.0);

        let mut matches = a.matches.clone();
        matches.sort_unstable();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
        assert!(a.unmatched_observations.is_empty());
    }

    #[test]
    fn test_descriptor_breaks_near_ties() {
        let regions = boxes(&[(0.0, 0.0, 100.0, 100.0), (20.0, 0.0, 100.0, 100.0)]);
        // Slightly closer to region 0 by IoU, but looks like region 1.
        let observations = boxes(&[(9.0, 0.0, 100.0, 100.0)]);
        let left = [1.0f32, 0.0];
        let right = [0.0f32, 1.0];
        let region_candidates = vec![
            MatchCandidate::new(&regions[0], Some(&left[..])),
            MatchCandidate::new(&regions[1], Some(&right[..])),
        ];
        let observation_candidates = vec![MatchCandidate::new(&observations[0], Some(&right[..]))];

        let with_window = greedy_assign(&region_candidates, &observation_candidates, 0.3, 0.05);
        assert_eq!(with_window.matches, vec![(1, 0)]);

        let without_window = greedy_assign(&region_candidates, &observation_candidates, 0.3, 0.0);
        assert_eq!(without_window.matches, vec![(0, 0)]);
    }

    #[test]
    fn test_descriptor_does_not_override_clear_iou_gap() {
        let regions = boxes(&[(0.0, 0.0, 100.0, 100.0), (50.0, 0.0, 100.0, 100.0)]);
        let observations = boxes(&[(2.0, 0.0, 100.0, 100.0)]);
        let left = [1.0f32, 0.0];
        let right = [0.0f32, 1.0];
        let region_candidates = vec![
            MatchCandidate::new(&regions[0], Some(&left[..])),
            MatchCandidate::new(&regions[1], Some(&right[..])),
        ];
        let observation_candidates = vec![MatchCandidate::new(&observations[0], Some(&right[..]))];

        let a = greedy_assign(&region_candidates, &observation_candidates, 0.3, 0.02);
        assert_eq!(a.matches, vec![(0, 0)]);
    }

    #[test]
    fn test_no_regions_leaves_all_observations_unmatched() {
        let observations = boxes(&[(0.0, 0.0, 10.0, 10.0), (50.0, 50.0, 10.0, 10.0)]);
        let a = greedy_assign(&[], &plain(&observations), 0.3, 0.02);
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_observations, vec![0, 1]);
    }
}
