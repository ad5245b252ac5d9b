//! groundcut-bridge — one frame in, ground + obstacle clusters out.
//!
//! `FrameProcessor` runs filter → RANSAC ground split → k-d tree over the
//! obstacles → Euclidean clustering → boxes. Nothing is kept between frames;
//! with a fixed `seed` the same cloud always yields the same partition.

use anyhow::Context;
use groundcut_cluster::{bounding_box, euclidean_cluster};
use groundcut_core::{Aabb, Cloud, CloudFilter, Passthrough, Result};
use groundcut_filters::CropVoxelFilter;
use groundcut_nn::KdTree;
use groundcut_seg::Plane;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

pub use groundcut_cluster::ClusterCfg;
pub use groundcut_filters::FilterCfg;
pub use groundcut_seg::RansacCfg;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub ransac: RansacCfg,
    pub cluster: ClusterCfg,
    /// Pre-filter; `None` means frames arrive already cropped.
    #[serde(default)]
    pub filter: Option<FilterCfg>,
    /// Fixed RNG seed for reproducible frames; `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.ransac.validate()?;
        self.cluster.validate()?;
        if let Some(f) = &self.filter {
            CropVoxelFilter::new(f.clone())?;
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        let cfg: Self = serde_json::from_reader(std::io::BufReader::new(f))
            .with_context(|| format!("parse {}", path.display()))?;
        cfg.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectedCluster {
    /// Positions in `Frame::obstacles`.
    pub indices: Vec<usize>,
    pub cloud: Cloud,
    pub bbox: Aabb,
}

/// Everything the consumer gets for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub ground: Cloud,
    pub obstacles: Cloud,
    pub plane: Option<Plane>,
    pub clusters: Vec<DetectedCluster>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary { pub points: usize, pub bbox: Aabb, pub center: [f32; 3] }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub ground: usize,
    pub obstacles: usize,
    pub plane: Option<[f32; 4]>,
    pub clusters: Vec<ClusterSummary>,
}

impl Frame {
    pub fn boxes(&self) -> impl Iterator<Item = &Aabb> + '_ {
        self.clusters.iter().map(|c| &c.bbox)
    }

    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            ground: self.ground.len(),
            obstacles: self.obstacles.len(),
            plane: self.plane.map(|p| p.coefficients()),
            clusters: self.clusters.iter().map(|c| ClusterSummary {
                points: c.indices.len(),
                bbox: c.bbox,
                center: c.bbox.center(),
            }).collect(),
        }
    }
}

pub struct FrameProcessor {
    cfg: PipelineConfig,
    filter: Box<dyn CloudFilter>,
}

impl FrameProcessor {
    /// Validates every tunable; the filter comes from `cfg.filter`.
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        cfg.validate()?;
        let filter: Box<dyn CloudFilter> = match &cfg.filter {
            Some(f) => Box::new(CropVoxelFilter::new(f.clone())?),
            None => Box::new(Passthrough),
        };
        Ok(Self { cfg, filter })
    }

    /// Replace the configured pre-filter.
    pub fn with_filter(mut self, filter: Box<dyn CloudFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &PipelineConfig { &self.cfg }

    /// Process one frame with a fresh RNG derived from the configured seed.
    pub fn process(&self, raw: Cloud) -> Result<Frame> {
        let mut rng = match self.cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.process_with_rng(raw, &mut rng)
    }

    pub fn process_with_rng<R: Rng + ?Sized>(&self, raw: Cloud, rng: &mut R) -> Result<Frame> {
        let t = Instant::now();
        raw.ensure_finite()?;
        let raw_len = raw.len();
        let cloud = self.filter.apply(raw)?;
        debug!(raw = raw_len, filtered = cloud.len(), "filter");

        let seg = self.cfg.ransac.segment(&cloud, rng)?;
        drop(cloud);

        let tree = KdTree::build_shuffled((&seg.obstacles).into(), rng);
        debug!(points = tree.len(), depth = tree.depth(), "obstacle index");

        let cc = &self.cfg.cluster;
        let groups = euclidean_cluster(&seg.obstacles, &tree, cc.distance_tolerance, cc.min_size, cc.max_size)?;
        drop(tree);

        let obstacles = &seg.obstacles;
        let clusters = groups
            .into_par_iter()
            .map(|indices| {
                let cloud = obstacles.select(&indices);
                let bbox = bounding_box(&cloud)?;
                Ok(DetectedCluster { indices, cloud, bbox })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            points = raw_len,
            ground = seg.ground.len(),
            obstacles = seg.obstacles.len(),
            clusters = clusters.len(),
            ms = t.elapsed().as_secs_f64() * 1000.0,
            "frame processed"
        );
        Ok(Frame { ground: seg.ground, obstacles: seg.obstacles, plane: seg.plane, clusters })
    }
}

/// Downstream consumer of processed frames (renderer, file writer, ...).
pub trait FrameSink {
    fn consume(&mut self, index: usize, frame: Frame) -> anyhow::Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(usize, Frame) -> anyhow::Result<()>,
{
    fn consume(&mut self, index: usize, frame: Frame) -> anyhow::Result<()> {
        self(index, frame)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats { pub frames: usize, pub clusters: usize }

/// Push every frame through `processor` into `sink`, stopping at the first error.
pub fn run<I, S>(processor: &FrameProcessor, frames: I, sink: &mut S) -> anyhow::Result<RunStats>
where
    I: IntoIterator<Item = anyhow::Result<Cloud>>,
    S: FrameSink + ?Sized,
{
    let mut stats = RunStats::default();
    for (i, raw) in frames.into_iter().enumerate() {
        let raw = raw.with_context(|| format!("load frame {i}"))?;
        let frame = processor.process(raw).with_context(|| format!("process frame {i}"))?;
        stats.frames += 1;
        stats.clusters += frame.clusters.len();
        sink.consume(i, frame).with_context(|| format!("consume frame {i}"))?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PipelineConfig {
        PipelineConfig {
            ransac: RansacCfg { max_iterations: 25, distance_tolerance: 0.3 },
            cluster: ClusterCfg { distance_tolerance: 0.53, min_size: 10, max_size: 500 },
            filter: Some(FilterCfg {
                voxel: Some(0.5),
                crop: Some(Aabb::new([-10.0, -5.0, -2.0], [30.0, 8.0, 1.0])),
                exclude: Some(Aabb::new([-1.5, -1.7, -1.0], [2.6, 1.7, -0.4])),
            }),
            seed: Some(3),
        }
    }

    #[test]
    fn config_json_roundtrip() {
        let c = cfg();
        let json = serde_json::to_string_pretty(&c).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn filter_and_seed_are_optional_in_json() {
        let json = r#"{
            "ransac": { "max_iterations": 100, "distance_tolerance": 0.2 },
            "cluster": { "distance_tolerance": 0.5, "min_size": 30, "max_size": 250 }
        }"#;
        let c: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!(c.filter.is_none() && c.seed.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn processor_rejects_bad_config() {
        let mut c = cfg();
        c.cluster.min_size = 600;
        assert!(FrameProcessor::new(c).is_err());

        let mut c = cfg();
        c.ransac.max_iterations = 0;
        assert!(FrameProcessor::new(c).is_err());

        let mut c = cfg();
        c.filter.as_mut().unwrap().voxel = Some(0.0);
        assert!(FrameProcessor::new(c).is_err());
    }

    #[test]
    fn config_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut c = cfg();
        c.cluster.distance_tolerance = -1.0;
        std::fs::write(&path, serde_json::to_string(&c).unwrap()).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());

        std::fs::write(&path, serde_json::to_string(&cfg()).unwrap()).unwrap();
        assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), cfg());
    }
}
