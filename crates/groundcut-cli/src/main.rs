use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use groundcut_bridge::{run, ClusterCfg, FilterCfg, Frame, FrameProcessor, PipelineConfig, RansacCfg};
use groundcut_core::{Aabb, Cloud, CloudFilter};
use groundcut_filters::CropVoxelFilter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------- helpers ----------

fn t0() -> Instant { Instant::now() }
fn lap(t: Instant, label: &str) {
    let ms = t.elapsed().as_secs_f64() * 1000.0;
    info!("[{label}] {ms:.1} ms");
}

/// "x,y,z" → [x, y, z]
fn parse_vec3(s: &str) -> std::result::Result<[f32; 3], String> {
    let v: Vec<f32> = s
        .split(',')
        .map(|t| t.trim().parse::<f32>().map_err(|e| format!("'{t}': {e}")))
        .collect::<std::result::Result<_, _>>()?;
    match v.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(format!("expected x,y,z, got {} values", v.len())),
    }
}

/// Voxel leaf flag: 0 turns downsampling off, anything else is validated by the filter.
fn leaf(voxel: f32) -> Option<f32> {
    (voxel != 0.0).then_some(voxel)
}

fn print_cloud(label: &str, c: &Cloud) {
    match Aabb::from_points(c.iter_points()) {
        Some(b) => println!("{label}: {} pts  min={:?}  max={:?}", c.len(), b.min, b.max),
        None => println!("{label}: 0 pts"),
    }
}

fn write_frame(dir: &Path, frame: &Frame) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    groundcut_io::write_ply_ascii(&dir.join("ground.ply"), &frame.ground)?;
    groundcut_io::write_ply_ascii(&dir.join("obstacles.ply"), &frame.obstacles)?;
    for (k, c) in frame.clusters.iter().enumerate() {
        groundcut_io::write_ply_ascii(&dir.join(format!("cluster_{k}.ply")), &c.cloud)?;
    }
    let path = dir.join("boxes.json");
    let boxes = std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
    serde_json::to_writer_pretty(boxes, &frame.summary()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

// ---------- CLI ----------

#[derive(Parser)]
#[command(name = "groundcut", version, about = "groundcut: ground removal and obstacle clustering for LiDAR frames")]
struct Args { #[command(subcommand)] cmd: Cmd }

/// Pipeline tunables shared by `detect` and `stream`.
#[derive(clap::Args, Clone, Debug)]
struct PipelineArgs {
    /// JSON pipeline config; overrides every flag below
    #[arg(long)] config: Option<PathBuf>,
    #[arg(long, default_value_t = 100)] iters: usize,
    /// plane inlier distance (m)
    #[arg(long, default_value_t = 0.2)] tol: f32,
    /// cluster neighbor distance (m)
    #[arg(long, default_value_t = 0.5)] cluster_tol: f32,
    #[arg(long, default_value_t = 30)] min_size: usize,
    #[arg(long, default_value_t = 250)] max_size: usize,
    /// voxel leaf (m); 0 disables downsampling
    #[arg(long, default_value_t = 0.5)] voxel: f32,
    #[arg(long, value_parser = parse_vec3, default_value = "-10,-5,-2", allow_hyphen_values = true)] min: [f32; 3],
    #[arg(long, value_parser = parse_vec3, default_value = "30,8,1", allow_hyphen_values = true)] max: [f32; 3],
    /// ego-vehicle box removed after cropping
    #[arg(long, value_parser = parse_vec3, default_value = "-1.5,-1.7,-1", allow_hyphen_values = true)] roof_min: [f32; 3],
    #[arg(long, value_parser = parse_vec3, default_value = "2.6,1.7,-0.4", allow_hyphen_values = true)] roof_max: [f32; 3],
    /// skip voxel/crop/roof filtering
    #[arg(long)] raw: bool,
    #[arg(long)] seed: Option<u64>,
}

impl PipelineArgs {
    fn to_config(&self) -> Result<PipelineConfig> {
        if let Some(path) = &self.config {
            return PipelineConfig::from_json_file(path);
        }
        let filter = (!self.raw).then(|| FilterCfg {
            voxel: leaf(self.voxel),
            crop: Some(Aabb::new(self.min, self.max)),
            exclude: Some(Aabb::new(self.roof_min, self.roof_max)),
        });
        let cfg = PipelineConfig {
            ransac: RansacCfg { max_iterations: self.iters, distance_tolerance: self.tol },
            cluster: ClusterCfg {
                distance_tolerance: self.cluster_tol,
                min_size: self.min_size,
                max_size: self.max_size,
            },
            filter,
            seed: self.seed,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Print point count, intensity presence and bounds of a frame (PLY / PCD / LAS)
    Info { input: PathBuf },

    /// Voxel downsample, crop to a region and optionally cut out the ego vehicle
    Filter {
        input: PathBuf, output: PathBuf,
        /// voxel leaf (m); 0 disables downsampling
        #[arg(long, default_value_t = 0.5)] voxel: f32,
        #[arg(long, value_parser = parse_vec3, default_value = "-10,-5,-2", allow_hyphen_values = true)] min: [f32; 3],
        #[arg(long, value_parser = parse_vec3, default_value = "30,8,1", allow_hyphen_values = true)] max: [f32; 3],
        #[arg(long, value_parser = parse_vec3, requires = "roof_max", allow_hyphen_values = true)] roof_min: Option<[f32; 3]>,
        #[arg(long, value_parser = parse_vec3, requires = "roof_min", allow_hyphen_values = true)] roof_max: Option<[f32; 3]>,
    },

    /// RANSAC ground split; writes ground.ply and obstacles.ply
    Segment {
        input: PathBuf, out_dir: PathBuf,
        #[arg(long, default_value_t = 100)] iters: usize,
        #[arg(long, default_value_t = 0.2)] tol: f32,
        #[arg(long)] seed: Option<u64>,
    },

    /// Full pipeline on one frame; writes ground, obstacles, cluster_<k>.ply and boxes.json
    Detect {
        input: PathBuf, out_dir: PathBuf,
        #[command(flatten)] pipeline: PipelineArgs,
    },

    /// Full pipeline over every frame file in a directory, one output subdirectory per frame
    Stream {
        dir: PathBuf, out_dir: PathBuf,
        #[command(flatten)] pipeline: PipelineArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.cmd {
        Cmd::Info { input } => cmd_info(&input),
        Cmd::Filter { input, output, voxel, min, max, roof_min, roof_max } => {
            let exclude = roof_min.zip(roof_max).map(|(lo, hi)| Aabb::new(lo, hi));
            cmd_filter(&input, &output, FilterCfg { voxel: leaf(voxel), crop: Some(Aabb::new(min, max)), exclude })
        }
        Cmd::Segment { input, out_dir, iters, tol, seed } =>
            cmd_segment(&input, &out_dir, RansacCfg { max_iterations: iters, distance_tolerance: tol }, seed),
        Cmd::Detect { input, out_dir, pipeline } => cmd_detect(&input, &out_dir, pipeline.to_config()?),
        Cmd::Stream { dir, out_dir, pipeline } => cmd_stream(&dir, &out_dir, pipeline.to_config()?),
    }
}

// ---------- commands ----------

fn cmd_info(path: &Path) -> Result<()> {
    let cloud = groundcut_io::read_auto(path)?;
    print_cloud("points", &cloud);
    println!("intensity: {}", if cloud.intensity.is_some() { "yes" } else { "no" });
    Ok(())
}

fn cmd_filter(input: &Path, output: &Path, cfg: FilterCfg) -> Result<()> {
    let cloud = groundcut_io::read_auto(input)?;
    let n = cloud.len();
    let t = t0();
    let out = CropVoxelFilter::new(cfg)?.apply(cloud)?;
    lap(t, "filter");
    groundcut_io::write_ply_ascii(output, &out)?;
    println!("filter: {} -> {} ({})", n, out.len(), output.display());
    Ok(())
}

fn cmd_segment(input: &Path, out_dir: &Path, ransac: RansacCfg, seed: Option<u64>) -> Result<()> {
    let cloud = groundcut_io::read_auto(input)?;
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let t = t0();
    let seg = ransac.segment(&cloud, &mut rng)?;
    lap(t, "ransac");

    match seg.plane {
        Some(p) => println!("plane: {:?}  inliers={}", p.coefficients(), seg.inliers),
        None => println!("plane: none (every point is an obstacle)"),
    }
    print_cloud("ground", &seg.ground);
    print_cloud("obstacles", &seg.obstacles);

    std::fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    groundcut_io::write_ply_ascii(&out_dir.join("ground.ply"), &seg.ground)?;
    groundcut_io::write_ply_ascii(&out_dir.join("obstacles.ply"), &seg.obstacles)?;
    Ok(())
}

fn cmd_detect(input: &Path, out_dir: &Path, cfg: PipelineConfig) -> Result<()> {
    let t = t0();
    let cloud = groundcut_io::read_auto(input)?;
    lap(t, "read");

    let processor = FrameProcessor::new(cfg)?;
    let frame = processor.process(cloud)?;

    let t = t0();
    write_frame(out_dir, &frame)?;
    lap(t, "write");

    print_cloud("ground", &frame.ground);
    print_cloud("obstacles", &frame.obstacles);
    for (k, b) in frame.boxes().enumerate() {
        println!("cluster {k}: min={:?} max={:?}", b.min, b.max);
    }
    Ok(())
}

fn cmd_stream(dir: &Path, out_dir: &Path, cfg: PipelineConfig) -> Result<()> {
    let paths = groundcut_io::list_frames(dir)?;
    if paths.is_empty() {
        bail!("no frame files ({:?}) in {}", groundcut_io::FRAME_EXTENSIONS, dir.display());
    }
    info!(frames = paths.len(), dir = %dir.display(), "streaming");

    let processor = FrameProcessor::new(cfg)?;
    let frames = paths.iter().map(|p| groundcut_io::read_auto(p));
    let mut sink = |i: usize, frame: Frame| -> Result<()> {
        let stem = paths[i].file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| format!("{i:04}"));
        write_frame(&out_dir.join(stem), &frame)?;
        println!("{}: {} ground, {} obstacles, {} clusters",
                 paths[i].display(), frame.ground.len(), frame.obstacles.len(), frame.clusters.len());
        Ok(())
    };

    let t = t0();
    let stats = run(&processor, frames, &mut sink)?;
    lap(t, "stream");
    println!("stream: {} frames, {} clusters -> {}", stats.frames, stats.clusters, out_dir.display());
    Ok(())
}
