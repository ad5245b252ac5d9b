//! groundcut-cluster — Euclidean clustering of obstacle points and per-cluster boxes.

use std::collections::VecDeque;

use groundcut_core::{check_tolerance, Aabb, Cloud, Error, Result};
use groundcut_nn::NeighborIndex3;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Clustering tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterCfg {
    /// Max gap between two neighboring points of one cluster.
    pub distance_tolerance: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl ClusterCfg {
    pub fn validate(&self) -> Result<()> {
        check_tolerance("distance_tolerance", self.distance_tolerance)?;
        if self.min_size == 0 {
            return Err(Error::InvalidParameter {
                name: "min_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.min_size > self.max_size {
            return Err(Error::SizeRange { min: self.min_size, max: self.max_size });
        }
        Ok(())
    }
}

/// Group `cloud` into connected components of the `distance_tolerance` proximity graph.
///
/// `index` must cover every point of `cloud` under its position; an index of
/// another size, or one that reports an id past the end, is rejected. Components
/// with fewer than `min_size` or more than `max_size` points are dropped whole.
/// Clusters come out ordered by their lowest point index; members are in
/// breadth-first expansion order.
pub fn euclidean_cluster<I: NeighborIndex3 + ?Sized>(
    cloud: &Cloud,
    index: &I,
    distance_tolerance: f32,
    min_size: usize,
    max_size: usize,
) -> Result<Vec<Vec<usize>>> {
    ClusterCfg { distance_tolerance, min_size, max_size }.validate()?;
    if index.len() != cloud.len() {
        return Err(Error::InvalidParameter {
            name: "index",
            reason: format!("covers {} points, cloud has {}", index.len(), cloud.len()),
        });
    }

    let n = cloud.len();
    let mut visited = vec![false; n];
    let mut frontier = VecDeque::new();
    let mut clusters = Vec::new();
    let mut discarded = 0usize;

    for seed in 0..n {
        if visited[seed] { continue; }
        visited[seed] = true;
        frontier.push_back(seed);

        let mut members = Vec::new();
        while let Some(i) = frontier.pop_front() {
            members.push(i);
            for nb in index.radius(cloud.point(i), distance_tolerance) {
                if nb.idx >= n {
                    return Err(Error::InvalidParameter {
                        name: "index",
                        reason: format!("returned id {} for a cloud of {n} points", nb.idx),
                    });
                }
                if !visited[nb.idx] {
                    visited[nb.idx] = true;
                    frontier.push_back(nb.idx);
                }
            }
        }

        if (min_size..=max_size).contains(&members.len()) {
            clusters.push(members);
        } else {
            discarded += 1;
        }
    }

    debug!(points = n, kept = clusters.len(), discarded, "euclidean clustering");
    Ok(clusters)
}

/// Materialize each cluster as its own cloud (intensity included).
pub fn cluster_clouds(cloud: &Cloud, clusters: &[Vec<usize>]) -> Vec<Cloud> {
    clusters.iter().map(|c| cloud.select(c)).collect()
}

/// Axis-aligned box around every point of `cloud`.
pub fn bounding_box(cloud: &Cloud) -> Result<Aabb> {
    Aabb::from_points(cloud.iter_points()).ok_or(Error::EmptyCluster)
}

/// Axis-aligned box around the points of `cloud` listed in `indices`.
pub fn bounding_box_of(cloud: &Cloud, indices: &[usize]) -> Result<Aabb> {
    Aabb::from_points(indices.iter().map(|&i| cloud.point(i))).ok_or(Error::EmptyCluster)
}
