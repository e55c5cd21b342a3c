//! Model types for the clustering job: centers, partial sums, and the
//! per-peer center store.

use serde::{Deserialize, Serialize};

use lockstep_core::{vector, DistanceMeasure, Vector};

use crate::error::KMeansError;

/// A cluster centroid.
///
/// `cluster_index` stays `None` for the whole superstep loop and is
/// stamped with the slot position only when assignments are emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCenter {
    pub centroid: Vector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_index: Option<u32>,
}

impl ClusterCenter {
    pub fn new(centroid: Vector) -> Self {
        Self {
            centroid,
            cluster_index: None,
        }
    }
}

/// Explicit (sum, count) accumulator for one center slot.
///
/// Component-wise sum addition plus count addition is commutative and
/// associative, so merging partials in any arrival order yields bitwise
/// identical centroids on every peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialSum {
    /// Center slot this partial belongs to.
    pub tag: u32,
    pub sum: Vector,
    pub count: u64,
}

impl PartialSum {
    /// Start an accumulator from its first vector.
    pub fn seed(tag: u32, vector: &Vector) -> Self {
        Self {
            tag,
            sum: vector.clone(),
            count: 1,
        }
    }

    /// Fold one more vector in.
    pub fn add_vector(&mut self, vector: &Vector) -> Result<(), KMeansError> {
        vector::add_assign(&mut self.sum, vector)?;
        self.count += 1;
        Ok(())
    }

    /// Merge another partial accumulated for the same slot.
    pub fn merge(&mut self, other: &PartialSum) -> Result<(), KMeansError> {
        vector::add_assign(&mut self.sum, &other.sum)?;
        self.count += other.count;
        Ok(())
    }

    /// The centroid this accumulator implies.
    pub fn mean(&self) -> Vector {
        vector::mean_of_sum(&self.sum, self.count)
    }
}

/// The K center slots, identical on every peer at every superstep.
///
/// Slot index is cluster identity: aggregation replaces slot contents but
/// never moves, adds, or removes slots.
#[derive(Debug, Clone)]
pub struct CenterStore {
    centers: Vec<ClusterCenter>,
    distance: DistanceMeasure,
}

impl CenterStore {
    /// Fails fast when no seed centers are configured.
    pub fn new(
        centers: Vec<ClusterCenter>,
        distance: DistanceMeasure,
    ) -> Result<Self, KMeansError> {
        if centers.is_empty() {
            return Err(KMeansError::NoCenters);
        }
        Ok(Self { centers, distance })
    }

    /// Number of center slots (K).
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub fn distance_measure(&self) -> DistanceMeasure {
        self.distance
    }

    pub fn centers(&self) -> &[ClusterCenter] {
        &self.centers
    }

    pub fn get(&self, slot: usize) -> Option<&ClusterCenter> {
        self.centers.get(slot)
    }

    /// Nearest slot for `vector` by linear scan.
    ///
    /// Strict `<` against a running minimum seeded at `f64::MAX`: the
    /// first minimum wins, so equidistant slots resolve to the lowest
    /// index.
    pub fn nearest(&self, vector: &Vector) -> usize {
        let mut best = 0;
        let mut best_distance = f64::MAX;
        for (slot, center) in self.centers.iter().enumerate() {
            let d = self.distance.distance(&center.centroid, vector);
            if d < best_distance {
                best_distance = d;
                best = slot;
            }
        }
        best
    }

    /// Replace slot `slot` with `new_centroid` if it actually moved.
    ///
    /// Movement is `distance(old, new) > 0.0` under the configured
    /// measure, with no epsilon slack. Returns whether the slot changed.
    pub fn replace_if_moved(
        &mut self,
        slot: usize,
        new_centroid: Vector,
    ) -> Result<bool, KMeansError> {
        let centers = self.centers.len();
        let measure = self.distance;
        let center = self
            .centers
            .get_mut(slot)
            .ok_or(KMeansError::InvalidTag {
                tag: slot as u32,
                centers,
            })?;
        let moved = measure.distance(&center.centroid, &new_centroid) > 0.0;
        if moved {
            center.centroid = new_centroid;
        }
        Ok(moved)
    }

    /// Stamp every slot's `cluster_index` with its position. Called once
    /// before final emission.
    pub fn stamp_indices(&mut self) {
        for (slot, center) in self.centers.iter_mut().enumerate() {
            center.cluster_index = Some(slot as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(centroids: Vec<Vector>) -> CenterStore {
        let centers = centroids.into_iter().map(ClusterCenter::new).collect();
        CenterStore::new(centers, DistanceMeasure::Euclidean).unwrap()
    }

    #[test]
    fn empty_seed_set_is_fatal() {
        let err = CenterStore::new(vec![], DistanceMeasure::Euclidean).unwrap_err();
        assert!(matches!(err, KMeansError::NoCenters));
    }

    #[test]
    fn partial_sum_folds_vectors() {
        let mut partial = PartialSum::seed(0, &vec![1.0, 2.0]);
        partial.add_vector(&vec![3.0, 4.0]).unwrap();
        assert_eq!(partial.sum, vec![4.0, 6.0]);
        assert_eq!(partial.count, 2);
        assert_eq!(partial.mean(), vec![2.0, 3.0]);
    }

    #[test]
    fn partial_sum_merge_accumulates_counts() {
        let mut left = PartialSum::seed(1, &vec![1.0]);
        left.add_vector(&vec![2.0]).unwrap();
        let mut right = PartialSum::seed(1, &vec![9.0]);
        right.add_vector(&vec![11.0]).unwrap();

        left.merge(&right).unwrap();
        assert_eq!(left.sum, vec![23.0]);
        assert_eq!(left.count, 4);
    }

    #[test]
    fn merge_is_order_independent() {
        // Integer-valued components keep f64 addition exact.
        let partials = vec![
            PartialSum::seed(0, &vec![1.0, 8.0]),
            PartialSum::seed(0, &vec![5.0, 2.0]),
            PartialSum::seed(0, &vec![3.0, 6.0]),
        ];

        let mut forward = partials[0].clone();
        forward.merge(&partials[1]).unwrap();
        forward.merge(&partials[2]).unwrap();

        let mut backward = partials[2].clone();
        backward.merge(&partials[1]).unwrap();
        backward.merge(&partials[0]).unwrap();

        assert_eq!(forward.mean(), backward.mean());
        assert_eq!(forward.count, backward.count);
    }

    #[test]
    fn dimension_mismatch_propagates() {
        let mut partial = PartialSum::seed(0, &vec![1.0, 2.0]);
        let err = partial.add_vector(&vec![1.0]).unwrap_err();
        assert!(matches!(err, KMeansError::Core(_)));
    }

    #[test]
    fn nearest_picks_closest_center() {
        let store = store(vec![vec![0.0], vec![10.0]]);
        assert_eq!(store.nearest(&vec![2.0]), 0);
        assert_eq!(store.nearest(&vec![9.0]), 1);
    }

    #[test]
    fn nearest_breaks_ties_toward_lowest_slot() {
        let store = store(vec![vec![0.0], vec![10.0]]);
        // 5.0 is exactly equidistant to both slots.
        assert_eq!(store.nearest(&vec![5.0]), 0);
    }

    #[test]
    fn replace_detects_movement_strictly() {
        let mut store = store(vec![vec![0.0], vec![10.0]]);
        assert!(store.replace_if_moved(0, vec![1.5]).unwrap());
        assert_eq!(store.get(0).unwrap().centroid, vec![1.5]);

        // An identical centroid is not a movement.
        assert!(!store.replace_if_moved(1, vec![10.0]).unwrap());
        assert_eq!(store.get(1).unwrap().centroid, vec![10.0]);
    }

    #[test]
    fn replace_rejects_out_of_range_slot() {
        let mut store = store(vec![vec![0.0]]);
        let err = store.replace_if_moved(3, vec![1.0]).unwrap_err();
        assert!(matches!(
            err,
            KMeansError::InvalidTag { tag: 3, centers: 1 }
        ));
    }

    #[test]
    fn stamping_marks_every_slot() {
        let mut store = store(vec![vec![0.0], vec![10.0]]);
        assert!(store.get(0).unwrap().cluster_index.is_none());

        store.stamp_indices();
        assert_eq!(store.get(0).unwrap().cluster_index, Some(0));
        assert_eq!(store.get(1).unwrap().cluster_index, Some(1));
    }
}
