//! The per-peer clustering driver: assignment, partial-sum broadcast,
//! deterministic aggregation, convergence, and final emission.
//!
//! Every peer owns a disjoint shard of the input and a full copy of the K
//! centers. One superstep = assign the shard to the nearest centers, send
//! one tagged partial sum per non-empty center slot to every peer (self
//! included), barrier, merge all received partials into new centers, and
//! decide whether to loop. Peers make identical control-flow decisions
//! because they merge identical partials in a canonical order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use lockstep_bsp::{Message, PeerId, PeerNetwork};
use lockstep_core::{DistanceMeasure, Vector};

use crate::error::KMeansError;
use crate::io::{AssignmentSink, VectorSource};
use crate::model::{CenterStore, ClusterCenter, PartialSum};

/// State of the superstep loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochState {
    Running,
    /// No center moved during the last superstep.
    Converged,
    /// The superstep index exceeded the configured bound.
    MaxIterReached,
}

impl std::fmt::Display for EpochState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Converged => "converged",
            Self::MaxIterReached => "max_iter_reached",
        })
    }
}

/// Report returned by a finished peer.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub run_id: Uuid,
    pub peer: PeerId,
    pub state: EpochState,
    /// Completed barriers when the loop terminated.
    pub supersteps: u64,
    /// Vectors in the local shard cache.
    pub shard_size: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One peer of a clustering job.
///
/// Created with the seed centers, then driven to completion by [`run`]
/// against a [`PeerNetwork`], a [`VectorSource`], and an
/// [`AssignmentSink`].
///
/// [`run`]: KMeansPeer::run
#[derive(Debug)]
pub struct KMeansPeer {
    run_id: Uuid,
    store: CenterStore,
    max_iterations: Option<u64>,
    /// Local shard, populated once from storage during the first
    /// assignment pass and never re-read after that.
    cache: Vec<Vector>,
}

impl KMeansPeer {
    /// Set up a peer. Fails fast when `centers` is empty.
    pub fn new(
        centers: Vec<ClusterCenter>,
        distance: DistanceMeasure,
        max_iterations: Option<u64>,
    ) -> Result<Self, KMeansError> {
        Ok(Self {
            run_id: Uuid::new_v4(),
            store: CenterStore::new(centers, distance)?,
            max_iterations,
            cache: Vec::new(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current centers, in slot order.
    pub fn centers(&self) -> &[ClusterCenter] {
        self.store.centers()
    }

    /// Drive the superstep loop to a terminal state and emit assignments.
    pub async fn run<N, S, W>(
        &mut self,
        net: &N,
        source: &mut S,
        sink: &mut W,
    ) -> Result<JobSummary, KMeansError>
    where
        N: PeerNetwork,
        S: VectorSource + Send,
        W: AssignmentSink + Send,
    {
        let started_at = Utc::now();
        info!(
            run_id = %self.run_id,
            peer = %net.local(),
            centers = self.store.len(),
            distance = %self.store.distance_measure(),
            max_iterations = ?self.max_iterations,
            "peer starting"
        );

        let state = loop {
            self.assign_and_broadcast(net, source).await?;
            net.sync().await?;
            let changed = self.update_centers(net).await?;
            source.reopen()?;
            debug!(
                peer = %net.local(),
                superstep = net.superstep(),
                changed,
                "superstep complete"
            );

            if changed == 0 {
                break EpochState::Converged;
            }
            if let Some(bound) = self.max_iterations {
                if net.superstep() > bound {
                    break EpochState::MaxIterReached;
                }
            }
        };

        let emitted = self.emit_assignments(sink)?;
        let finished_at = Utc::now();
        let summary = JobSummary {
            run_id: self.run_id,
            peer: net.local(),
            state,
            supersteps: net.superstep(),
            shard_size: self.cache.len(),
            started_at,
            finished_at,
        };
        info!(
            run_id = %summary.run_id,
            peer = %summary.peer,
            state = %summary.state,
            supersteps = summary.supersteps,
            shard = summary.shard_size,
            emitted,
            "peer finished"
        );
        Ok(summary)
    }

    /// Assignment phase: scan the shard, fold each vector into its
    /// nearest center's accumulator, broadcast one message per non-empty
    /// slot to every peer.
    ///
    /// The first pass reads storage and fills the cache; later passes
    /// iterate the cache only.
    async fn assign_and_broadcast<N, S>(
        &mut self,
        net: &N,
        source: &mut S,
    ) -> Result<(), KMeansError>
    where
        N: PeerNetwork,
        S: VectorSource + Send,
    {
        let mut partials: Vec<Option<PartialSum>> = vec![None; self.store.len()];

        if self.cache.is_empty() {
            while let Some(vector) = source.read_next()? {
                fold_nearest(&self.store, &mut partials, &vector)?;
                self.cache.push(vector);
            }
            debug!(peer = %net.local(), shard = self.cache.len(), "shard cached");
        } else {
            for vector in &self.cache {
                fold_nearest(&self.store, &mut partials, vector)?;
            }
        }

        // An empty shard broadcasts nothing but still reaches the barrier.
        let recipients = net.peers();
        for partial in partials.into_iter().flatten() {
            let message = Message::new(partial.tag, &partial)?;
            for to in &recipients {
                net.send(*to, message.clone()).await?;
            }
        }
        Ok(())
    }

    /// Aggregation phase: drain the closed superstep's mailbox, merge
    /// same-tag partials, and replace every center that moved.
    ///
    /// Partials are folded in ascending sender order, so every peer sums
    /// the same values in the same sequence and lands on bitwise
    /// identical centers.
    async fn update_centers<N: PeerNetwork>(&mut self, net: &N) -> Result<usize, KMeansError> {
        let k = self.store.len();
        let mut per_slot: Vec<Vec<(PeerId, PartialSum)>> = vec![Vec::new(); k];

        while let Some(message) = net.recv_next().await? {
            let slot = message.tag as usize;
            if slot >= k {
                return Err(KMeansError::InvalidTag {
                    tag: message.tag,
                    centers: k,
                });
            }
            let partial: PartialSum = message.decode()?;
            per_slot[slot].push((message.from, partial));
        }

        let mut changed = 0;
        for (slot, mut partials) in per_slot.into_iter().enumerate() {
            partials.sort_by_key(|(from, _)| *from);
            let mut iter = partials.into_iter();
            let Some((_, mut merged)) = iter.next() else {
                // No partials: the empty cluster keeps its center.
                continue;
            };
            for (_, partial) in iter {
                merged.merge(&partial)?;
            }
            if self.store.replace_if_moved(slot, merged.mean())? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Final emission: re-scan the cache with the terminal centers and
    /// write one (center, vector) pair per cached vector.
    fn emit_assignments<W: AssignmentSink>(&mut self, sink: &mut W) -> Result<usize, KMeansError> {
        self.store.stamp_indices();
        for vector in &self.cache {
            let slot = self.store.nearest(vector);
            sink.write(&self.store.centers()[slot], vector)?;
        }
        sink.flush()?;
        Ok(self.cache.len())
    }
}

/// Fold `vector` into the accumulator of its nearest center slot.
fn fold_nearest(
    store: &CenterStore,
    partials: &mut [Option<PartialSum>],
    vector: &Vector,
) -> Result<(), KMeansError> {
    let slot = store.nearest(vector);
    if let Some(partial) = &mut partials[slot] {
        partial.add_vector(vector)?;
    } else {
        partials[slot] = Some(PartialSum::seed(slot as u32, vector));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lockstep_bsp::local_cluster;

    use super::*;
    use crate::io::{MemoryAssignmentSink, MemoryVectorSource};

    fn seed_centers(centroids: &[&[f64]]) -> Vec<ClusterCenter> {
        centroids
            .iter()
            .map(|c| ClusterCenter::new(c.to_vec()))
            .collect()
    }

    fn peer(centroids: &[&[f64]], max_iterations: Option<u64>) -> KMeansPeer {
        KMeansPeer::new(
            seed_centers(centroids),
            DistanceMeasure::Euclidean,
            max_iterations,
        )
        .unwrap()
    }

    #[test]
    fn empty_seed_set_fails_setup() {
        let err =
            KMeansPeer::new(vec![], DistanceMeasure::Euclidean, None).unwrap_err();
        assert!(matches!(err, KMeansError::NoCenters));
    }

    #[tokio::test]
    async fn single_peer_converges_on_two_clusters() {
        let net = local_cluster(1).remove(0);
        let mut peer = peer(&[&[0.0], &[10.0]], None);
        let mut source =
            MemoryVectorSource::new(vec![vec![1.0], vec![2.0], vec![9.0], vec![11.0]]);
        let mut sink = MemoryAssignmentSink::new();

        let summary = peer.run(&net, &mut source, &mut sink).await.unwrap();

        // Superstep 1 moves center 0 to 1.5 while center 10 lands exactly
        // on its old position; superstep 2 changes nothing.
        assert_eq!(summary.state, EpochState::Converged);
        assert_eq!(summary.supersteps, 2);
        assert_eq!(summary.shard_size, 4);
        assert_eq!(peer.centers()[0].centroid, vec![1.5]);
        assert_eq!(peer.centers()[1].centroid, vec![10.0]);

        let records = sink.records();
        assert_eq!(records.len(), 4);
        let slots: Vec<_> = records
            .iter()
            .map(|r| r.center.cluster_index.unwrap())
            .collect();
        assert_eq!(slots, vec![0, 0, 1, 1]);
        assert_eq!(records[0].vector, vec![1.0]);
        assert_eq!(records[2].center.centroid, vec![10.0]);
    }

    #[tokio::test]
    async fn empty_cluster_keeps_its_center() {
        let net = local_cluster(1).remove(0);
        let mut peer = peer(&[&[0.0], &[10.0], &[100.0]], None);
        let mut source =
            MemoryVectorSource::new(vec![vec![1.0], vec![2.0], vec![9.0], vec![11.0]]);
        let mut sink = MemoryAssignmentSink::new();

        let summary = peer.run(&net, &mut source, &mut sink).await.unwrap();

        assert_eq!(summary.state, EpochState::Converged);
        assert_eq!(peer.centers()[2].centroid, vec![100.0]);
        assert!(sink
            .records()
            .iter()
            .all(|r| r.center.cluster_index != Some(2)));
    }

    #[tokio::test]
    async fn iteration_bound_cuts_the_loop() {
        let vectors = vec![vec![4.0], vec![6.0], vec![20.0]];

        let net = local_cluster(1).remove(0);
        let mut bounded = peer(&[&[0.0], &[10.0]], Some(1));
        let mut source = MemoryVectorSource::new(vectors.clone());
        let mut sink = MemoryAssignmentSink::new();
        let summary = bounded.run(&net, &mut source, &mut sink).await.unwrap();

        assert_eq!(summary.state, EpochState::MaxIterReached);
        assert_eq!(summary.supersteps, 2);
        assert_eq!(bounded.centers()[0].centroid, vec![5.0]);
        assert_eq!(bounded.centers()[1].centroid, vec![20.0]);

        // Unbounded, the same input converges one superstep later on the
        // same centers.
        let net = local_cluster(1).remove(0);
        let mut unbounded = peer(&[&[0.0], &[10.0]], None);
        let mut source = MemoryVectorSource::new(vectors);
        let mut sink = MemoryAssignmentSink::new();
        let summary = unbounded.run(&net, &mut source, &mut sink).await.unwrap();

        assert_eq!(summary.state, EpochState::Converged);
        assert_eq!(summary.supersteps, 3);
        assert_eq!(unbounded.centers()[0].centroid, vec![5.0]);
        assert_eq!(unbounded.centers()[1].centroid, vec![20.0]);
    }

    #[tokio::test]
    async fn storage_is_read_exactly_once() {
        let net = local_cluster(1).remove(0);
        let mut peer = peer(&[&[0.0], &[10.0]], None);
        let mut source =
            MemoryVectorSource::new(vec![vec![1.0], vec![2.0], vec![9.0], vec![11.0]]);
        let mut sink = MemoryAssignmentSink::new();

        let summary = peer.run(&net, &mut source, &mut sink).await.unwrap();

        // Two supersteps plus emission, but storage served each vector
        // once: every later pass hit the cache.
        assert_eq!(summary.supersteps, 2);
        assert_eq!(source.reads(), 4);
        assert_eq!(source.reopens(), 2);
    }

    #[tokio::test]
    async fn empty_shard_participates_to_convergence() {
        let nets = local_cluster(2);
        let mut handles = Vec::new();
        for (id, net) in nets.into_iter().enumerate() {
            handles.push(tokio::spawn(async move {
                let mut peer = peer(&[&[0.0], &[10.0]], None);
                let mut source = if id == 0 {
                    MemoryVectorSource::new(vec![vec![1.0], vec![9.0]])
                } else {
                    MemoryVectorSource::new(vec![])
                };
                let mut sink = MemoryAssignmentSink::new();
                let summary = peer.run(&net, &mut source, &mut sink).await.unwrap();
                (summary, sink)
            }));
        }

        let (summary0, sink0) = handles.remove(0).await.unwrap();
        let (summary1, sink1) = handles.remove(0).await.unwrap();

        assert_eq!(summary0.state, EpochState::Converged);
        assert_eq!(summary1.state, EpochState::Converged);
        assert_eq!(summary0.supersteps, summary1.supersteps);
        assert_eq!(summary0.shard_size, 2);
        assert_eq!(summary1.shard_size, 0);
        assert_eq!(sink0.records().len(), 2);
        assert!(sink1.records().is_empty());
    }

    #[tokio::test]
    async fn oversized_tag_is_a_protocol_error() {
        let net = local_cluster(1).remove(0);

        // Hand-deliver a partial tagged outside the slot range.
        let rogue = PartialSum::seed(7, &vec![1.0]);
        let message = Message::new(7, &rogue).unwrap();
        net.send(net.local(), message).await.unwrap();
        net.sync().await.unwrap();

        let mut peer = peer(&[&[0.0], &[10.0]], None);
        let err = peer.update_centers(&net).await.unwrap_err();
        assert!(matches!(
            err,
            KMeansError::InvalidTag { tag: 7, centers: 2 }
        ));
    }
}
