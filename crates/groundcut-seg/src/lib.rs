//! groundcut-seg — RANSAC ground-plane segmentation.
//!
//! Candidate triples are drawn sequentially from the caller's RNG, so a seed
//! fixes the whole sample sequence. Scoring the candidates against the cloud
//! is the expensive part and runs on rayon; the reduction keeps the highest
//! inlier count and, among equals, the earliest candidate.

use groundcut_core::{check_tolerance, Cloud, Error, Result};
use nalgebra::Vector3;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Draws per iteration before a collinear sample is given up on.
pub const MAX_RESAMPLES: usize = 32;

/// Plane `n·p + d = 0` with unit normal `n`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane { pub normal: [f32; 3], pub d: f32 }

impl Plane {
    /// Plane through three points, `None` if they are collinear.
    pub fn through(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Option<Self> {
        let a = Vector3::from(a);
        let n = (Vector3::from(b) - a).cross(&(Vector3::from(c) - a));
        let n = n.try_normalize(0.0)?;
        Some(Self { normal: n.into(), d: -n.dot(&a) })
    }

    /// Coefficients `[A, B, C, D]` with `A²+B²+C² = 1`.
    pub fn coefficients(&self) -> [f32; 4] {
        [self.normal[0], self.normal[1], self.normal[2], self.d]
    }

    #[inline]
    pub fn signed_distance(&self, p: [f32; 3]) -> f32 {
        self.normal[0] * p[0] + self.normal[1] * p[1] + self.normal[2] * p[2] + self.d
    }

    #[inline]
    pub fn distance(&self, p: [f32; 3]) -> f32 { self.signed_distance(p).abs() }
}

/// Ground/obstacle split of one cloud. Both halves keep input order.
#[derive(Clone, Debug, Default)]
pub struct Segmentation {
    pub obstacles: Cloud,
    pub ground: Cloud,
    /// Best plane found, `None` when every sample was degenerate.
    pub plane: Option<Plane>,
    /// Inlier count of `plane`; always `ground.len()`.
    pub inliers: usize,
}

/// RANSAC tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RansacCfg {
    pub max_iterations: usize,
    /// Max point-to-plane distance for a ground point (same units as the cloud).
    pub distance_tolerance: f32,
}

impl RansacCfg {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                reason: "must be at least 1".into(),
            });
        }
        check_tolerance("distance_tolerance", self.distance_tolerance)
    }

    pub fn segment<R: Rng + ?Sized>(&self, cloud: &Cloud, rng: &mut R) -> Result<Segmentation> {
        segment_plane(cloud, self.max_iterations, self.distance_tolerance, rng)
    }
}

/// Split `cloud` into obstacles (outliers) and ground (inliers of the best plane).
pub fn segment_plane<R: Rng + ?Sized>(
    cloud: &Cloud,
    max_iterations: usize,
    distance_tolerance: f32,
    rng: &mut R,
) -> Result<Segmentation> {
    RansacCfg { max_iterations, distance_tolerance }.validate()?;

    let triples = sample_triples(cloud, max_iterations, rng);
    let Some((plane, inliers)) = best_plane(cloud, &triples, distance_tolerance) else {
        if cloud.len() >= 3 {
            warn!(points = cloud.len(), "no plane found; every point kept as obstacle");
        }
        return Ok(Segmentation { obstacles: cloud.clone(), ground: Cloud::default(), plane: None, inliers: 0 });
    };
    debug!(candidates = triples.len(), inliers, ?plane, "ransac best plane");

    let mask: Vec<bool> = (0..cloud.len())
        .into_par_iter()
        .map(|i| plane.distance(cloud.point(i)) <= distance_tolerance)
        .collect();
    let (ground, obstacles) = cloud.partition(&mask);
    debug_assert_eq!(ground.len(), inliers);
    Ok(Segmentation { obstacles, ground, plane: Some(plane), inliers })
}

/// Draw one non-collinear triple of distinct indices per iteration.
///
/// Collinear draws are redrawn up to [`MAX_RESAMPLES`] times; an iteration
/// that never finds a valid triple contributes nothing.
pub fn sample_triples<R: Rng + ?Sized>(cloud: &Cloud, iterations: usize, rng: &mut R) -> Vec<[usize; 3]> {
    let n = cloud.len();
    if n < 3 { return Vec::new(); }
    let mut out = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        for _ in 0..MAX_RESAMPLES {
            let s = rand::seq::index::sample(rng, n, 3);
            let t = [s.index(0), s.index(1), s.index(2)];
            if plane_of(cloud, t).is_some() {
                out.push(t);
                break;
            }
        }
    }
    out
}

/// Score each candidate triple and return the best plane with its inlier count.
/// Collinear triples are skipped; ties keep the earlier triple.
pub fn best_plane(cloud: &Cloud, triples: &[[usize; 3]], tol: f32) -> Option<(Plane, usize)> {
    triples
        .par_iter()
        .enumerate()
        .filter_map(|(k, &t)| {
            let plane = plane_of(cloud, t)?;
            Some((k, plane, count_inliers(cloud, &plane, tol)))
        })
        .reduce_with(|a, b| {
            if b.2 > a.2 || (b.2 == a.2 && b.0 < a.0) { b } else { a }
        })
        .map(|(_, plane, count)| (plane, count))
}

pub fn count_inliers(cloud: &Cloud, plane: &Plane, tol: f32) -> usize {
    cloud.iter_points().filter(|&p| plane.distance(p) <= tol).count()
}

fn plane_of(cloud: &Cloud, t: [usize; 3]) -> Option<Plane> {
    Plane::through(cloud.point(t[0]), cloud.point(t[1]), cloud.point(t[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 10x10 grid on z = 0.2x + 0.1y + 1, then `outliers` points 1.0 above it.
    fn tilted_plane_with_outliers(outliers: usize) -> Cloud {
        let mut c = Cloud::default();
        for i in 0..10 {
            for j in 0..10 {
                let (x, y) = (i as f32, j as f32);
                c.push(x, y, 0.2 * x + 0.1 * y + 1.0);
            }
        }
        for k in 0..outliers {
            let (x, y) = (k as f32 * 0.7, 9.0 - k as f32 * 0.5);
            c.push(x, y, 0.2 * x + 0.1 * y + 2.0 + k as f32 * 0.1);
        }
        c
    }

    #[test]
    fn plane_through_three_points() {
        let p = Plane::through([0.0, 0.0, 2.0], [1.0, 0.0, 2.0], [0.0, 1.0, 2.0]).unwrap();
        assert_relative_eq!(p.normal[2].abs(), 1.0);
        assert_relative_eq!(p.distance([5.0, -3.0, 2.0]), 0.0);
        assert_relative_eq!(p.distance([5.0, -3.0, 3.5]), 1.5);
        let [a, b, c, _] = p.coefficients();
        assert_relative_eq!(a * a + b * b + c * c, 1.0);
    }

    #[test]
    fn collinear_points_have_no_plane() {
        assert!(Plane::through([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]).is_none());
        assert!(Plane::through([1.0, 2.0, 3.0], [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn exact_plane_is_recovered_for_any_seed() {
        let cloud = tilted_plane_with_outliers(10);
        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let seg = segment_plane(&cloud, 60, 0.05, &mut rng).unwrap();
            assert_eq!(seg.ground.len(), 100, "seed {seed}");
            assert_eq!(seg.inliers, 100, "seed {seed}");
            assert_eq!(seg.obstacles.len(), 10, "seed {seed}");
            assert!(seg.obstacles.iter_points().all(|p| p[0] <= 6.5 && p[2] > 2.0));
        }
    }

    #[test]
    fn forced_triples_skip_collinear_and_prefer_more_inliers() {
        // 0..4 on z=0, 4..7 on z=5, 7..9 on the line x=y=z
        let cloud = Cloud::from_points(&[
            [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0],
            [0.0, 0.0, 5.0], [2.0, 0.0, 5.0], [0.0, 2.0, 5.0],
            [3.0, 3.0, 3.0], [4.0, 4.0, 4.0],
        ]);
        let triples = [[0, 7, 8], [4, 5, 6], [0, 1, 2]];
        let (plane, inliers) = best_plane(&cloud, &triples, 0.01).unwrap();
        assert_eq!(inliers, 4);
        assert_relative_eq!(plane.distance([7.0, -2.0, 0.0]), 0.0);
    }

    #[test]
    fn ties_keep_the_first_candidate() {
        let cloud = Cloud::from_points(&[
            [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0],
            [0.0, 0.0, 5.0], [1.0, 0.0, 5.0], [0.0, 1.0, 5.0],
        ]);
        let (low, _) = best_plane(&cloud, &[[0, 1, 2], [3, 4, 5]], 0.1).unwrap();
        assert_relative_eq!(low.distance([3.0, 3.0, 0.0]), 0.0);
        let (high, _) = best_plane(&cloud, &[[3, 4, 5], [0, 1, 2]], 0.1).unwrap();
        assert_relative_eq!(high.distance([3.0, 3.0, 5.0]), 0.0);
    }

    #[test]
    fn degenerate_clouds_are_all_obstacles() {
        let mut rng = StdRng::seed_from_u64(0);
        let empty = segment_plane(&Cloud::default(), 10, 0.1, &mut rng).unwrap();
        assert!(empty.ground.is_empty() && empty.obstacles.is_empty() && empty.plane.is_none());
        assert_eq!(empty.inliers, 0);

        let two = Cloud::from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let seg = segment_plane(&two, 10, 0.1, &mut rng).unwrap();
        assert_eq!((seg.obstacles.len(), seg.ground.len()), (2, 0));

        let line: Vec<[f32; 3]> = (0..20).map(|i| [i as f32, 0.0, 0.0]).collect();
        let seg = segment_plane(&Cloud::from_points(&line), 10, 0.1, &mut rng).unwrap();
        assert_eq!((seg.obstacles.len(), seg.ground.len()), (20, 0));
        assert!(seg.plane.is_none());
    }

    #[test]
    fn same_seed_same_split() {
        let cloud = tilted_plane_with_outliers(10);
        let a = segment_plane(&cloud, 5, 0.05, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = segment_plane(&cloud, 5, 0.05, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a.ground, b.ground);
        assert_eq!(a.obstacles, b.obstacles);
        assert_eq!(a.plane, b.plane);
    }

    #[test]
    fn sampled_triples_are_distinct_and_valid() {
        let cloud = tilted_plane_with_outliers(3);
        let triples = sample_triples(&cloud, 50, &mut StdRng::seed_from_u64(4));
        assert_eq!(triples.len(), 50);
        for t in triples {
            assert!(t[0] != t[1] && t[1] != t[2] && t[0] != t[2]);
            assert!(t.iter().all(|&i| i < cloud.len()));
        }
    }

    #[test]
    fn parameter_misuse_is_rejected() {
        let cloud = tilted_plane_with_outliers(0);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            segment_plane(&cloud, 0, 0.1, &mut rng),
            Err(Error::InvalidParameter { name: "max_iterations", .. })
        ));
        assert!(segment_plane(&cloud, 10, -0.1, &mut rng).is_err());
        assert!(segment_plane(&cloud, 10, f32::NAN, &mut rng).is_err());
    }
}
