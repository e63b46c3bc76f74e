use crate::descriptors::Descriptor;
use crate::KeyPoint;
use log::*;
use std::collections::HashSet;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Whether a correspondence must be confirmed from both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatchPolicy {
    /// Every keypoint of the first set looks for its match in the second set.
    #[default]
    OneWay,
    /// A match is only kept if the first keypoint is also the nearest
    /// neighbour of its match when searching back through the first set.
    Mutual,
}

/// One accepted correspondence between two images, in (row, col) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchPair {
    pub row1: f32,
    pub col1: f32,
    pub row2: f32,
    pub col2: f32,
}

impl MatchPair {
    fn bits(&self) -> [u32; 4] {
        [
            self.row1.to_bits(),
            self.col1.to_bits(),
            self.row2.to_bits(),
            self.col2.to_bits(),
        ]
    }
}

/// Brute force descriptor matcher with Lowe's ratio test.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matcher {
    /// A match is accepted when `sqrt(best / second_best)` of the squared
    /// descriptor distances is strictly below this.
    pub ratio_threshold: f32,

    /// See [`MatchPolicy`].
    pub policy: MatchPolicy,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.65,
            policy: MatchPolicy::OneWay,
        }
    }
}

/// Squared euclidean distance between two descriptors.
pub fn descriptor_distance_squared(a: &Descriptor, b: &Descriptor) -> f32 {
    a.iter().zip(b.iter()).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// Index of the nearest candidate together with the best and second best
/// squared distances. The second best stays at `f32::MAX` for a single candidate.
fn nearest_two(query: &Descriptor, candidates: &[KeyPoint]) -> Option<(usize, f32, f32)> {
    let mut best_index = None;
    let mut best = f32::MAX;
    let mut second = f32::MAX;
    for (index, candidate) in candidates.iter().enumerate() {
        let distance = descriptor_distance_squared(query, &candidate.descriptor);
        if distance < best {
            second = best;
            best = distance;
            best_index = Some(index);
        } else if distance < second {
            second = distance;
        }
    }
    best_index.map(|index| (index, best, second))
}

impl Matcher {
    /// A one way matcher with a custom ratio threshold.
    pub fn new(ratio_threshold: f32) -> Self {
        Self {
            ratio_threshold,
            ..Default::default()
        }
    }

    /// The same matcher, requiring matches to be mutual.
    pub fn mutual(self) -> Self {
        Self {
            policy: MatchPolicy::Mutual,
            ..self
        }
    }

    fn match_one(&self, index: usize, a: &[KeyPoint], b: &[KeyPoint]) -> Option<MatchPair> {
        let keypoint = &a[index];
        let (best_index, best, second) = nearest_two(&keypoint.descriptor, b)?;
        // 0 / 0 is NaN and fails the comparison.
        if !((best / second).sqrt() < self.ratio_threshold) {
            return None;
        }
        let other = &b[best_index];
        if self.policy == MatchPolicy::Mutual {
            let (back_index, _, _) = nearest_two(&other.descriptor, a)?;
            if back_index != index {
                return None;
            }
        }
        Some(MatchPair {
            row1: keypoint.row,
            col1: keypoint.col,
            row2: other.row,
            col2: other.col,
        })
    }

    /// Match every keypoint of `a` against all keypoints of `b`.
    ///
    /// Matches are returned in the order of `a`. Matches with exactly the same
    /// coordinates in both images are only reported once, which happens when
    /// several orientations of one location find the same partner.
    pub fn match_keypoints(&self, a: &[KeyPoint], b: &[KeyPoint]) -> Vec<MatchPair> {
        if a.is_empty() || b.is_empty() {
            return vec![];
        }
        #[cfg(not(feature = "rayon"))]
        let matches: Vec<MatchPair> = (0..a.len())
            .filter_map(|index| self.match_one(index, a, b))
            .collect();
        #[cfg(feature = "rayon")]
        let matches: Vec<MatchPair> = (0..a.len())
            .into_par_iter()
            .filter_map(|index| self.match_one(index, a, b))
            .collect();
        let accepted = matches.len();
        let mut seen = HashSet::new();
        let matches: Vec<MatchPair> = matches
            .into_iter()
            .filter(|pair| seen.insert(pair.bits()))
            .collect();
        debug!(
            "Accepted {} of {} keypoints, {} unique matches",
            accepted,
            a.len(),
            matches.len()
        );
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::{descriptor_distance_squared, MatchPair, MatchPolicy, Matcher};
    use crate::descriptors::{Descriptor, DESCRIPTOR_LEN};
    use crate::KeyPoint;

    fn descriptor(components: &[(usize, f32)]) -> Descriptor {
        let mut values = [0f32; DESCRIPTOR_LEN];
        for &(index, value) in components {
            values[index] = value;
        }
        Descriptor(values)
    }

    fn keypoint(row: f32, col: f32, descriptor: Descriptor) -> KeyPoint {
        KeyPoint {
            row,
            col,
            octave: 0,
            scale: 1.6,
            angle: 0.0,
            response: 1.0,
            descriptor,
        }
    }

    #[test]
    fn distance() {
        let a = descriptor(&[(0, 1.0)]);
        let b = descriptor(&[(1, 1.0), (2, 2.0)]);
        assert_eq!(descriptor_distance_squared(&a, &b), 6.0);
        assert_eq!(descriptor_distance_squared(&a, &a), 0.0);
    }

    #[test]
    fn empty_input_gives_no_matches() {
        let matcher = Matcher::default();
        let one = [keypoint(1.0, 2.0, descriptor(&[(0, 1.0)]))];
        assert!(matcher.match_keypoints(&[], &one).is_empty());
        assert!(matcher.match_keypoints(&one, &[]).is_empty());
    }

    #[test]
    fn single_candidate_is_accepted() {
        let matcher = Matcher::default();
        let a = [keypoint(1.0, 2.0, descriptor(&[(0, 1.0)]))];
        let b = [keypoint(3.0, 4.0, descriptor(&[(1, 1.0)]))];
        assert_eq!(
            matcher.match_keypoints(&a, &b),
            vec![MatchPair {
                row1: 1.0,
                col1: 2.0,
                row2: 3.0,
                col2: 4.0
            }]
        );
    }

    #[test]
    fn picks_nearest_neighbour() {
        let matcher = Matcher::default();
        let a = [
            keypoint(0.0, 0.0, descriptor(&[(0, 1.0)])),
            keypoint(0.0, 1.0, descriptor(&[(1, 1.0)])),
        ];
        let b = [
            keypoint(5.0, 5.0, descriptor(&[(1, 1.0)])),
            keypoint(6.0, 6.0, descriptor(&[(0, 1.0)])),
        ];
        let matches = matcher.match_keypoints(&a, &b);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].row2, matches[0].col2), (6.0, 6.0));
        assert_eq!((matches[1].row2, matches[1].col2), (5.0, 5.0));
    }

    #[test]
    fn ratio_test() {
        let matcher = Matcher::default();
        let query = [keypoint(0.0, 0.0, descriptor(&[]))];
        // Squared distances 1 and 4 give a ratio of 0.5.
        let clear = [
            keypoint(1.0, 1.0, descriptor(&[(0, 1.0)])),
            keypoint(2.0, 2.0, descriptor(&[(0, 2.0)])),
        ];
        assert_eq!(matcher.match_keypoints(&query, &clear).len(), 1);
        // Squared distances 1 and 2 give a ratio of about 0.71.
        let ambiguous = [
            keypoint(1.0, 1.0, descriptor(&[(0, 1.0)])),
            keypoint(2.0, 2.0, descriptor(&[(0, 1.0), (1, 1.0)])),
        ];
        assert!(matcher.match_keypoints(&query, &ambiguous).is_empty());
        assert_eq!(Matcher::new(0.75).match_keypoints(&query, &ambiguous).len(), 1);
    }

    #[test]
    fn identical_candidates_are_rejected() {
        let matcher = Matcher::default();
        let d = descriptor(&[(3, 1.0)]);
        let a = [keypoint(0.0, 0.0, d)];
        let b = [keypoint(1.0, 1.0, d), keypoint(2.0, 2.0, d)];
        assert!(matcher.match_keypoints(&a, &b).is_empty());
    }

    #[test]
    fn duplicate_matches_are_removed() {
        let matcher = Matcher::default();
        let a = [
            keypoint(3.0, 3.0, descriptor(&[(0, 1.0)])),
            keypoint(3.0, 3.0, descriptor(&[(0, 0.9)])),
            keypoint(4.0, 4.0, descriptor(&[(1, 1.0)])),
        ];
        let b = [
            keypoint(7.0, 7.0, descriptor(&[(0, 1.0)])),
            keypoint(8.0, 8.0, descriptor(&[(1, 1.0)])),
        ];
        let matches = matcher.match_keypoints(&a, &b);
        assert_eq!(
            matches,
            vec![
                MatchPair {
                    row1: 3.0,
                    col1: 3.0,
                    row2: 7.0,
                    col2: 7.0
                },
                MatchPair {
                    row1: 4.0,
                    col1: 4.0,
                    row2: 8.0,
                    col2: 8.0
                },
            ]
        );
    }

    #[test]
    fn mutual_policy() {
        let a = [
            keypoint(0.0, 0.0, descriptor(&[(0, 0.8)])),
            keypoint(1.0, 1.0, descriptor(&[(0, 1.0)])),
        ];
        let b = [
            keypoint(5.0, 5.0, descriptor(&[(0, 1.0)])),
            keypoint(6.0, 6.0, descriptor(&[(1, 1.0)])),
        ];
        let one_way = Matcher::default();
        assert_eq!(one_way.policy, MatchPolicy::OneWay);
        assert_eq!(one_way.match_keypoints(&a, &b).len(), 2);
        let mutual = Matcher::default().mutual();
        let matches = mutual.match_keypoints(&a, &b);
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].row1, matches[0].row2), (1.0, 5.0));
    }

    #[test]
    fn matching_is_idempotent() {
        let matcher = Matcher::default();
        let a: Vec<KeyPoint> = (0..10)
            .map(|i| keypoint(i as f32, 0.0, descriptor(&[(i, 1.0), (i + 20, 0.5)])))
            .collect();
        let b: Vec<KeyPoint> = (0..10)
            .rev()
            .map(|i| keypoint(0.0, i as f32, descriptor(&[(i, 1.0)])))
            .collect();
        let first = matcher.match_keypoints(&a, &b);
        assert_eq!(first.len(), 10);
        assert_eq!(first, matcher.match_keypoints(&a, &b));
    }
}
