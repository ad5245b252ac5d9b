//! groundcut-nn — neighbor indices for 3D: an insertion-built k-d tree and a uniform grid.

use groundcut_core::{dist2, CloudView, Error, Result};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use smallvec::{smallvec, SmallVec};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Neighbor { pub idx: usize, pub dist2: f32 }

/// Fixed-radius neighborhood queries by position.
///
/// `idx` in the results is the identity the point was indexed under.
pub trait NeighborIndex3 {
    fn radius(&self, q: [f32; 3], r: f32) -> SmallVec<[Neighbor; 128]>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }
}

// ---------- k-d tree ----------

#[derive(Clone, Debug)]
struct Node {
    point: [f32; 3],
    id: usize,
    axis: u8,
    left: Option<usize>,
    right: Option<usize>,
}

/// 3-d tree built by repeated insertion, no rebalancing.
///
/// Nodes live in one arena; the split axis cycles x→y→z with depth. Points
/// strictly below a node on its axis go left, everything else goes right.
#[derive(Clone, Debug, Default)]
pub struct KdTree {
    nodes: Vec<Node>,
    root: Option<usize>,
    depth: usize,
}

impl KdTree {
    pub fn new() -> Self { Self::default() }

    pub fn with_capacity(n: usize) -> Self {
        Self { nodes: Vec::with_capacity(n), ..Self::default() }
    }

    /// Index every point of `pts` under its position, in cloud order.
    pub fn from_view(pts: CloudView<'_>) -> Self {
        let mut tree = Self::with_capacity(pts.len());
        for i in 0..pts.len() {
            tree.insert(pts.point(i), i);
        }
        tree
    }

    /// Index every point of `pts` under its position, inserting in a random
    /// order so scan-ordered input does not degrade into a list.
    pub fn build_shuffled<R: Rng + ?Sized>(pts: CloudView<'_>, rng: &mut R) -> Self {
        let mut order: Vec<usize> = (0..pts.len()).collect();
        order.shuffle(rng);
        let mut tree = Self::with_capacity(pts.len());
        for i in order {
            tree.insert(pts.point(i), i);
        }
        tree
    }

    pub fn len(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Number of levels on the longest root-to-leaf path.
    pub fn depth(&self) -> usize { self.depth }

    pub fn insert(&mut self, point: [f32; 3], id: usize) {
        let new = self.nodes.len();
        let Some(mut cur) = self.root else {
            self.nodes.push(Node { point, id, axis: 0, left: None, right: None });
            self.root = Some(new);
            self.depth = 1;
            return;
        };

        let mut level = 1;
        loop {
            let node = &self.nodes[cur];
            let axis = node.axis as usize;
            let go_left = point[axis] < node.point[axis];
            let child = if go_left { node.left } else { node.right };
            level += 1;
            match child {
                Some(c) => cur = c,
                None => {
                    let axis = ((axis + 1) % 3) as u8;
                    self.nodes.push(Node { point, id, axis, left: None, right: None });
                    let parent = &mut self.nodes[cur];
                    if go_left { parent.left = Some(new) } else { parent.right = Some(new) }
                    self.depth = self.depth.max(level);
                    return;
                }
            }
        }
    }

    /// Ids of all points within Euclidean distance `tol` of `q` (inclusive).
    pub fn radius_search(&self, q: [f32; 3], tol: f32) -> Vec<usize> {
        let mut ids = Vec::new();
        self.visit_within(q, tol, |id, _| ids.push(id));
        ids
    }

    fn visit_within(&self, q: [f32; 3], tol: f32, mut f: impl FnMut(usize, f32)) {
        let Some(root) = self.root else { return };
        let r2 = tol * tol;
        let mut stack: SmallVec<[usize; 64]> = smallvec![root];
        while let Some(i) = stack.pop() {
            let n = &self.nodes[i];
            let d2 = dist2(n.point, q);
            if d2 <= r2 {
                f(n.id, d2);
            }
            // a subtree is skipped only when the split plane alone is farther than tol
            let axis = n.axis as usize;
            let (qa, na) = (q[axis], n.point[axis]);
            if let Some(l) = n.left {
                if qa < na || (qa - na) * (qa - na) <= r2 {
                    stack.push(l);
                }
            }
            if let Some(r) = n.right {
                if qa >= na || (na - qa) * (na - qa) <= r2 {
                    stack.push(r);
                }
            }
        }
    }
}

impl NeighborIndex3 for KdTree {
    fn radius(&self, q: [f32; 3], r: f32) -> SmallVec<[Neighbor; 128]> {
        let mut out = SmallVec::new();
        self.visit_within(q, r, |idx, dist2| out.push(Neighbor { idx, dist2 }));
        out
    }

    fn len(&self) -> usize { self.nodes.len() }
}

// ---------- uniform grid ----------

/// Uniform grid hash.
///
/// A query scans the `ceil(r / cell)` rings of cells around the query cell.
/// When that cube would visit more cells than there are occupied buckets, the
/// occupied buckets are scanned instead, so large radii cost at most one pass
/// over the indexed points.
pub struct GridIndex<'a> {
    pts: CloudView<'a>,
    cell: f32,
    buckets: HashMap<[i32; 3], Vec<usize>>,
}

impl<'a> GridIndex<'a> {
    pub fn build(pts: CloudView<'a>, cell: f32) -> Result<Self> {
        if !(cell.is_finite() && cell > 0.0) {
            return Err(Error::InvalidParameter {
                name: "cell",
                reason: format!("grid cell must be finite and > 0, got {cell}"),
            });
        }
        let mut buckets: HashMap<[i32; 3], Vec<usize>> = HashMap::new();
        for i in 0..pts.len() {
            match buckets.entry(key_of(pts.point(i), cell)) {
                Entry::Vacant(v) => { v.insert(vec![i]); }
                Entry::Occupied(mut o) => o.get_mut().push(i),
            }
        }
        Ok(Self { pts, cell, buckets })
    }

    pub fn cell(&self) -> f32 { self.cell }

    fn push_within(&self, bin: &[usize], q: [f32; 3], r2: f32, out: &mut SmallVec<[Neighbor; 128]>) {
        for &j in bin {
            let d2 = dist2(self.pts.point(j), q);
            if d2 <= r2 { out.push(Neighbor { idx: j, dist2: d2 }); }
        }
    }
}

fn key_of(p: [f32; 3], cell: f32) -> [i32; 3] {
    let inv = 1.0 / cell;
    [
        (p[0] * inv).floor() as i32,
        (p[1] * inv).floor() as i32,
        (p[2] * inv).floor() as i32,
    ]
}

impl<'a> NeighborIndex3 for GridIndex<'a> {
    fn radius(&self, q: [f32; 3], r: f32) -> SmallVec<[Neighbor; 128]> {
        let mut out = SmallVec::<[Neighbor; 128]>::new();
        let r2 = r * r;
        let rings = (r as f64 / self.cell as f64).ceil();
        let span = 2.0 * rings + 1.0;
        if !(span * span * span <= self.buckets.len() as f64) {
            for bin in self.buckets.values() {
                self.push_within(bin, q, r2, &mut out);
            }
            return out;
        }

        let layers = rings as i32;
        let base = key_of(q, self.cell);
        for dx in -layers..=layers {
            for dy in -layers..=layers {
                for dz in -layers..=layers {
                    let key = [base[0] + dx, base[1] + dy, base[2] + dz];
                    if let Some(bin) = self.buckets.get(&key) {
                        self.push_within(bin, q, r2, &mut out);
                    }
                }
            }
        }
        out
    }

    fn len(&self) -> usize { self.pts.len() }
}
