//! groundcut-core — point-cloud data model, bounding boxes and shared errors.

use serde::{Deserialize, Serialize};

/// Errors raised at the API boundary of the groundcut crates.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("cluster size range is empty: min_size {min} > max_size {max}")]
    SizeRange { min: usize, max: usize },

    #[error("point {index} has a non-finite coordinate")]
    NonFinite { index: usize },

    #[error("bounding box of an empty cluster")]
    EmptyCluster,

    #[error("column has {got} values, cloud has {expected} points")]
    ColumnLength { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reject NaN and negative distances.
pub fn check_tolerance(name: &'static str, value: f32) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidParameter {
            name,
            reason: format!("expected a finite value >= 0, got {value}"),
        });
    }
    Ok(())
}

/// Squared Euclidean distance. Every radius test in the workspace goes through here.
#[inline]
pub fn dist2(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Structure-of-Arrays point cloud.
///
/// The position of a point is its identity within a frame. `intensity`, when
/// present, has the same length as the coordinate columns.
#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub intensity: Option<Vec<f32>>,
}

impl Cloud {
    pub fn len(&self) -> usize { self.x.len() }
    pub fn is_empty(&self) -> bool { self.x.is_empty() }

    pub fn with_capacity(n: usize) -> Self {
        let mut c = Self::default();
        c.reserve(n);
        c
    }

    pub fn from_points(points: &[[f32; 3]]) -> Self {
        let mut c = Self::with_capacity(points.len());
        for p in points {
            c.push(p[0], p[1], p[2]);
        }
        c
    }

    /// Push a point. Clouds carrying intensity get 0 for it.
    pub fn push(&mut self, px: f32, py: f32, pz: f32) {
        self.push_xyz(px, py, pz);
        if let Some(col) = self.intensity.as_mut() { col.push(0.0); }
    }

    fn push_xyz(&mut self, px: f32, py: f32, pz: f32) {
        self.x.push(px); self.y.push(py); self.z.push(pz);
    }

    /// Push a point and its intensity. Switches the cloud to carrying an
    /// intensity column if it did not yet; earlier points read as 0.
    pub fn push_with_intensity(&mut self, px: f32, py: f32, pz: f32, i: f32) {
        let n = self.len();
        let col = self.intensity.get_or_insert_with(|| vec![0.0; n]);
        col.push(i);
        self.push_xyz(px, py, pz);
    }

    pub fn reserve(&mut self, n: usize) {
        self.x.reserve(n); self.y.reserve(n); self.z.reserve(n);
        if let Some(col) = self.intensity.as_mut() { col.reserve(n); }
    }

    #[inline]
    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    pub fn intensity_at(&self, i: usize) -> Option<f32> {
        self.intensity.as_ref().map(|col| col[i])
    }

    pub fn iter_points(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        (0..self.len()).map(move |i| self.point(i))
    }

    /// Copy the given points (and their intensity) into a new cloud, in the order given.
    pub fn select(&self, indices: &[usize]) -> Cloud {
        let mut out = Cloud::with_capacity(indices.len());
        for &i in indices {
            out.push_xyz(self.x[i], self.y[i], self.z[i]);
        }
        out.intensity = self
            .intensity
            .as_ref()
            .map(|col| indices.iter().map(|&i| col[i]).collect());
        out
    }

    /// Split into (selected, rest) by a per-point mask, keeping relative order.
    pub fn partition(&self, mask: &[bool]) -> (Cloud, Cloud) {
        let (yes, no): (Vec<usize>, Vec<usize>) = (0..self.len()).partition(|&i| mask[i]);
        (self.select(&yes), self.select(&no))
    }

    /// Check column lengths and coordinate finiteness.
    pub fn ensure_finite(&self) -> Result<()> {
        let n = self.len();
        for got in [self.y.len(), self.z.len()] {
            if got != n {
                return Err(Error::ColumnLength { expected: n, got });
            }
        }
        if let Some(col) = &self.intensity {
            if col.len() != n {
                return Err(Error::ColumnLength { expected: n, got: col.len() });
            }
        }
        match (0..n).find(|&i| !(self.x[i].is_finite() && self.y[i].is_finite() && self.z[i].is_finite())) {
            Some(index) => Err(Error::NonFinite { index }),
            None => Ok(()),
        }
    }
}

/// Zero-copy view into a Cloud (slice-of-SoA).
#[derive(Copy, Clone)]
pub struct CloudView<'a> {
    pub x: &'a [f32],
    pub y: &'a [f32],
    pub z: &'a [f32],
}

impl<'a> CloudView<'a> {
    pub fn len(&self) -> usize { self.x.len() }
    pub fn is_empty(&self) -> bool { self.x.is_empty() }
    #[inline]
    pub fn point(&self, i: usize) -> [f32; 3] { [self.x[i], self.y[i], self.z[i]] }
}

impl<'a> From<&'a Cloud> for CloudView<'a> {
    fn from(c: &'a Cloud) -> Self { Self { x: &c.x, y: &c.y, z: &c.z } }
}

/// Axis-aligned bounding box.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb { pub min: [f32; 3], pub max: [f32; 3] }

impl Aabb {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self { Self { min, max } }

    /// Box around a set of points; `None` when there are none.
    pub fn from_points<I: IntoIterator<Item = [f32; 3]>>(points: I) -> Option<Self> {
        let mut it = points.into_iter();
        let first = it.next()?;
        let mut b = Aabb { min: first, max: first };
        for p in it {
            b.grow(p);
        }
        Some(b)
    }

    pub fn grow(&mut self, p: [f32; 3]) {
        for k in 0..3 {
            self.min[k] = self.min[k].min(p[k]);
            self.max[k] = self.max[k].max(p[k]);
        }
    }

    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    pub fn center(&self) -> [f32; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    pub fn extent(&self) -> [f32; 3] {
        [self.max[0] - self.min[0], self.max[1] - self.min[1], self.max[2] - self.min[2]]
    }

    pub fn volume(&self) -> f32 {
        let e = self.extent();
        e[0] * e[1] * e[2]
    }
}

/// External filtering stage applied to a raw frame before ground removal.
pub trait CloudFilter: Send + Sync {
    fn apply(&self, cloud: Cloud) -> Result<Cloud>;
}

/// Identity filter for clouds that were already cropped upstream.
#[derive(Copy, Clone, Debug, Default)]
pub struct Passthrough;

impl CloudFilter for Passthrough {
    fn apply(&self, cloud: Cloud) -> Result<Cloud> { Ok(cloud) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Cloud {
        let mut c = Cloud::default();
        c.push_with_intensity(0.0, 0.0, 0.0, 1.0);
        c.push_with_intensity(2.0, 1.0, 0.0, 2.0);
        c.push_with_intensity(1.0, 3.0, 1.0, 3.0);
        c
    }

    #[test]
    fn select_keeps_order_and_intensity() {
        let c = sample();
        let s = c.select(&[2, 0]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.point(0), [1.0, 3.0, 1.0]);
        assert_eq!(s.point(1), [0.0, 0.0, 0.0]);
        assert_eq!(s.intensity, Some(vec![3.0, 1.0]));
    }

    #[test]
    fn partition_splits_every_point_once() {
        let c = sample();
        let (a, b) = c.partition(&[true, false, true]);
        assert_eq!(a.len() + b.len(), c.len());
        assert_eq!(b.point(0), [2.0, 1.0, 0.0]);
        assert_eq!(a.intensity, Some(vec![1.0, 3.0]));
    }

    #[test]
    fn intensity_column_backfills() {
        let mut c = Cloud::from_points(&[[0.0, 0.0, 0.0]]);
        c.push_with_intensity(1.0, 1.0, 1.0, 5.0);
        assert_eq!(c.intensity, Some(vec![0.0, 5.0]));
        assert!(c.ensure_finite().is_ok());
    }

    #[test]
    fn ensure_finite_reports_first_bad_point() {
        let c = Cloud::from_points(&[[0.0, 0.0, 0.0], [1.0, f32::NAN, 0.0], [f32::INFINITY, 0.0, 0.0]]);
        assert_eq!(c.ensure_finite(), Err(Error::NonFinite { index: 1 }));
    }

    #[test]
    fn ensure_finite_checks_column_lengths() {
        let mut c = sample();
        c.intensity.as_mut().unwrap().pop();
        assert_eq!(c.ensure_finite(), Err(Error::ColumnLength { expected: 3, got: 2 }));
    }

    #[test]
    fn aabb_from_points() {
        let b = Aabb::from_points(sample().iter_points()).unwrap();
        assert_eq!(b.min, [0.0, 0.0, 0.0]);
        assert_eq!(b.max, [2.0, 3.0, 1.0]);
        assert_relative_eq!(b.volume(), 6.0);
        assert_eq!(b.center(), [1.0, 1.5, 0.5]);
        assert!(b.contains([1.0, 1.0, 1.0]));
        assert!(!b.contains([1.0, 1.0, 1.5]));
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn tolerance_checks() {
        assert!(check_tolerance("tol", 0.0).is_ok());
        assert!(check_tolerance("tol", -0.1).is_err());
        assert!(check_tolerance("tol", f32::NAN).is_err());
    }

    #[test]
    fn cloud_serde_roundtrip() {
        let c = sample();
        let json = serde_json::to_string(&c).unwrap();
        let back: Cloud = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
