//! groundcut-filters — voxel grid, crop box and ego-vehicle removal.

use groundcut_core::{Aabb, Cloud, CloudFilter, Error, Result};
use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Voxel grid downsample (centroid). Intensity, when present, is averaged too.
///
/// Output points are ordered by voxel key, so equal inputs give equal outputs.
pub fn voxel_downsample(input: &Cloud, voxel: f32) -> Result<Cloud> {
    check_leaf(voxel)?;
    let inv = 1.0 / voxel;

    // (sx, sy, sz, si, count)
    let mut bins: HashMap<[i32; 3], (f64, f64, f64, f64, u32)> = HashMap::new();
    for i in 0..input.len() {
        let key = [
            (input.x[i] * inv).floor() as i32,
            (input.y[i] * inv).floor() as i32,
            (input.z[i] * inv).floor() as i32,
        ];
        let e = bins.entry(key).or_insert((0.0, 0.0, 0.0, 0.0, 0));
        e.0 += input.x[i] as f64;
        e.1 += input.y[i] as f64;
        e.2 += input.z[i] as f64;
        e.3 += input.intensity_at(i).unwrap_or(0.0) as f64;
        e.4 += 1;
    }

    let mut bins: Vec<_> = bins.into_iter().collect();
    bins.sort_unstable_by_key(|(k, _)| *k);

    let mut out = Cloud::with_capacity(bins.len());
    let with_intensity = input.intensity.is_some();
    for (_k, (sx, sy, sz, si, cnt)) in bins {
        let invc = 1.0 / (cnt as f64);
        let (x, y, z) = ((sx * invc) as f32, (sy * invc) as f32, (sz * invc) as f32);
        if with_intensity {
            out.push_with_intensity(x, y, z, (si * invc) as f32);
        } else {
            out.push(x, y, z);
        }
    }
    debug!(input = input.len(), output = out.len(), voxel, "voxel downsample");
    Ok(out)
}

fn check_leaf(voxel: f32) -> Result<()> {
    if voxel.is_finite() && voxel > 0.0 {
        return Ok(());
    }
    Err(Error::InvalidParameter {
        name: "voxel",
        reason: format!("leaf size must be finite and > 0, got {voxel}"),
    })
}

/// Keep the points inside `region` (bounds inclusive).
pub fn crop_box(input: &Cloud, region: &Aabb) -> Cloud {
    let keep = inside_mask(input, region);
    input.partition(&keep).0
}

/// Drop the points inside `region`, e.g. returns from the ego vehicle's roof.
pub fn remove_box(input: &Cloud, region: &Aabb) -> Cloud {
    let hit = inside_mask(input, region);
    input.partition(&hit).1
}

fn inside_mask(input: &Cloud, region: &Aabb) -> Vec<bool> {
    (0..input.len())
        .into_par_iter()
        .map(|i| region.contains(input.point(i)))
        .collect()
}

/// Frame pre-filter settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterCfg {
    /// Voxel leaf size; `None` skips downsampling.
    pub voxel: Option<f32>,
    /// Region of interest; `None` keeps everything.
    pub crop: Option<Aabb>,
    /// Region removed after cropping (ego vehicle).
    pub exclude: Option<Aabb>,
}

/// Voxel → crop → exclude, in that order.
#[derive(Clone, Debug)]
pub struct CropVoxelFilter {
    cfg: FilterCfg,
}

impl CropVoxelFilter {
    pub fn new(cfg: FilterCfg) -> Result<Self> {
        if let Some(v) = cfg.voxel {
            check_leaf(v)?;
        }
        for (name, b) in [("crop", cfg.crop), ("exclude", cfg.exclude)] {
            if let Some(b) = b {
                if (0..3).any(|k| !(b.min[k] <= b.max[k])) {
                    return Err(Error::InvalidParameter {
                        name,
                        reason: format!("min {:?} is not below max {:?}", b.min, b.max),
                    });
                }
            }
        }
        Ok(Self { cfg })
    }

    pub fn cfg(&self) -> &FilterCfg { &self.cfg }
}

impl CloudFilter for CropVoxelFilter {
    fn apply(&self, cloud: Cloud) -> Result<Cloud> {
        let mut c = match self.cfg.voxel {
            Some(v) => voxel_downsample(&cloud, v)?,
            None => cloud,
        };
        if let Some(region) = &self.cfg.crop {
            c = crop_box(&c, region);
        }
        if let Some(region) = &self.cfg.exclude {
            c = remove_box(&c, region);
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn voxel_merges_points_to_centroids() {
        let mut c = Cloud::default();
        c.push_with_intensity(0.1, 0.1, 0.1, 1.0);
        c.push_with_intensity(0.3, 0.3, 0.3, 3.0);
        c.push_with_intensity(1.2, 0.1, 0.1, 5.0);
        let out = voxel_downsample(&c, 1.0).unwrap();
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out.x[0], 0.2);
        assert_relative_eq!(out.intensity.as_ref().unwrap()[0], 2.0);
        assert_relative_eq!(out.x[1], 1.2);
    }

    #[test]
    fn voxel_output_is_deterministic() {
        let pts: Vec<[f32; 3]> = (0..200).map(|i| [(i % 17) as f32 * 0.3, (i % 5) as f32, (i / 50) as f32]).collect();
        let c = Cloud::from_points(&pts);
        assert_eq!(voxel_downsample(&c, 0.5).unwrap(), voxel_downsample(&c, 0.5).unwrap());
        assert!(voxel_downsample(&c, 0.5).unwrap().intensity.is_none());
    }

    #[test]
    fn voxel_rejects_bad_leaf() {
        assert!(voxel_downsample(&Cloud::default(), 0.0).is_err());
        assert!(voxel_downsample(&Cloud::default(), f32::NAN).is_err());
    }

    #[test]
    fn crop_then_exclude() {
        let c = Cloud::from_points(&[
            [0.0, 0.0, -0.7],  // roof
            [5.0, 1.0, 0.0],   // kept
            [50.0, 0.0, 0.0],  // outside roi
            [-10.0, -5.0, -2.0], // on the roi corner, kept
        ]);
        let f = CropVoxelFilter::new(FilterCfg {
            voxel: None,
            crop: Some(Aabb::new([-10.0, -5.0, -2.0], [30.0, 8.0, 1.0])),
            exclude: Some(Aabb::new([-1.5, -1.7, -1.0], [2.6, 1.7, -0.4])),
        })
        .unwrap();
        let out = f.apply(c).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.point(0), [5.0, 1.0, 0.0]);
        assert_eq!(out.point(1), [-10.0, -5.0, -2.0]);
    }

    #[test]
    fn inverted_region_is_rejected() {
        let cfg = FilterCfg { voxel: None, crop: Some(Aabb::new([1.0, 0.0, 0.0], [0.0, 1.0, 1.0])), exclude: None };
        assert!(CropVoxelFilter::new(cfg).is_err());
        let cfg = FilterCfg { voxel: Some(-1.0), crop: None, exclude: None };
        assert!(CropVoxelFilter::new(cfg).is_err());
    }
}
