//! Nearest reference point for each query point
//!
//! Three exact-or-approximate indexes, picked by the shape of the data:
//! a `kiddo` k-d tree for up to 10 dimensions, a ball tree above that, and a
//! random-projection forest for very large point clouds in more than two
//! dimensions.

use kiddo::float::distance::SquaredEuclidean;
use kiddo::float::kdtree::KdTree;
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::error::{Result, ScError};
use crate::rng::MersenneTwister;

/// Point count above which queries go through the approximate index
pub const APPROXIMATE_MIN_POINTS: usize = 200_000;
/// Largest dimension served by the k-d tree
pub const KD_TREE_MAX_DIMS: usize = 10;

const KD_BUCKET: usize = 256;
const BALL_LEAF_SIZE: usize = 40;
const RP_LEAF_SIZE: usize = 64;
const RP_TREES: usize = 8;

/// Search structure used for a nearest-neighbour query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborIndex {
    KdTree,
    BallTree,
    RandomProjectionForest,
}

impl NeighborIndex {
    /// Index used for `n_points` reference points of `n_dims` dimensions
    pub fn for_shape(n_points: usize, n_dims: usize) -> Self {
        if n_points > APPROXIMATE_MIN_POINTS && n_dims > 2 {
            NeighborIndex::RandomProjectionForest
        } else if n_dims > KD_TREE_MAX_DIMS {
            NeighborIndex::BallTree
        } else {
            NeighborIndex::KdTree
        }
    }
}

/// Run `f` on a dedicated pool of `n_jobs` threads, or the global pool when unset
pub fn with_thread_pool<T, F>(n_jobs: Option<usize>, f: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match n_jobs {
        Some(n) if n > 0 => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(n).build()?;
            Ok(pool.install(f))
        }
        _ => Ok(f()),
    }
}

fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the nearest row of `data` for every row of `queries`
///
/// The index is chosen by [`NeighborIndex::for_shape`]; `seed` drives the
/// random projections of the approximate index.
pub fn nearest_indices(
    data: ArrayView2<f64>,
    queries: ArrayView2<f64>,
    seed: u32,
    n_jobs: Option<usize>,
) -> Result<Vec<usize>> {
    let index = NeighborIndex::for_shape(data.nrows(), data.ncols());
    nearest_indices_with(index, data, queries, seed, n_jobs)
}

/// [`nearest_indices`] with an explicit index
pub fn nearest_indices_with(
    index: NeighborIndex,
    data: ArrayView2<f64>,
    queries: ArrayView2<f64>,
    seed: u32,
    n_jobs: Option<usize>,
) -> Result<Vec<usize>> {
    if data.nrows() == 0 {
        return Err(ScError::EmptyData {
            reason: "no reference points for nearest-neighbour search".to_string(),
        });
    }
    if data.ncols() != queries.ncols() {
        return Err(ScError::DimensionMismatch {
            expected: format!("{} dimensions", data.ncols()),
            got: format!("{} dimensions", queries.ncols()),
        });
    }

    log::debug!(
        "nearest neighbours of {} queries among {} points ({:?})",
        queries.nrows(),
        data.nrows(),
        index
    );

    with_thread_pool(n_jobs, || match index {
        NeighborIndex::KdTree => kd_tree_nearest(data, queries),
        NeighborIndex::BallTree => BallTree::build(data).query_all(queries),
        NeighborIndex::RandomProjectionForest => RpForest::build(data, seed).query_all(queries),
    })
}

fn to_array<const D: usize>(row: ArrayView1<f64>) -> [f64; D] {
    let mut point = [0.0; D];
    for (p, v) in point.iter_mut().zip(row.iter()) {
        *p = *v;
    }
    point
}

fn kd_nearest<const D: usize>(data: ArrayView2<f64>, queries: ArrayView2<f64>) -> Vec<usize> {
    let mut tree: KdTree<f64, u64, D, KD_BUCKET, u32> = KdTree::new();
    for (i, row) in data.outer_iter().enumerate() {
        tree.add(&to_array::<D>(row), i as u64);
    }
    (0..queries.nrows())
        .into_par_iter()
        .map(|q| tree.nearest_one::<SquaredEuclidean>(&to_array::<D>(queries.row(q))).item as usize)
        .collect()
}

macro_rules! kd_dispatch {
    ($dims:expr, $data:expr, $queries:expr, $($d:literal),+) => {
        match $dims {
            $($d => kd_nearest::<$d>($data, $queries),)+
            _ => BallTree::build($data).query_all($queries),
        }
    };
}

/// True when some coordinate value is shared by a full k-d tree bucket of rows
///
/// `kiddo` cannot split such a bucket; zero-inflated expression coordinates
/// hit this routinely.
fn has_crowded_axis(data: ArrayView2<f64>) -> bool {
    data.columns().into_iter().any(|col| {
        let mut values = col.to_vec();
        values.sort_by(f64::total_cmp);
        let mut run = 0;
        for (k, v) in values.iter().enumerate() {
            run = if k > 0 && *v == values[k - 1] { run + 1 } else { 1 };
            if run >= KD_BUCKET {
                return true;
            }
        }
        false
    })
}

fn kd_tree_nearest(data: ArrayView2<f64>, queries: ArrayView2<f64>) -> Vec<usize> {
    if has_crowded_axis(data) {
        log::debug!("at least {} points share a coordinate, using the ball tree", KD_BUCKET);
        return BallTree::build(data).query_all(queries);
    }
    kd_dispatch!(data.ncols(), data, queries, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10)
}

struct BallNode {
    start: usize,
    end: usize,
    centroid: Vec<f64>,
    radius: f64,
    children: Option<(usize, usize)>,
}

/// Binary ball tree split at the median of the widest coordinate
struct BallTree<'a> {
    data: ArrayView2<'a, f64>,
    order: Vec<usize>,
    nodes: Vec<BallNode>,
}

impl<'a> BallTree<'a> {
    fn build(data: ArrayView2<'a, f64>) -> Self {
        let mut tree = Self {
            data,
            order: (0..data.nrows()).collect(),
            nodes: Vec::new(),
        };
        tree.build_node(0, data.nrows());
        tree
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let dims = self.data.ncols();
        let count = (end - start) as f64;
        let mut centroid = vec![0.0; dims];
        for &i in &self.order[start..end] {
            for (c, v) in centroid.iter_mut().zip(self.data.row(i).iter()) {
                *c += v / count;
            }
        }
        let centroid_view = ArrayView1::from(&centroid);
        let radius = self.order[start..end]
            .iter()
            .map(|&i| sq_dist(self.data.row(i), centroid_view))
            .fold(0.0, f64::max)
            .sqrt();

        let id = self.nodes.len();
        self.nodes.push(BallNode {
            start,
            end,
            centroid,
            radius,
            children: None,
        });
        if end - start <= BALL_LEAF_SIZE {
            return id;
        }

        // widest coordinate
        let mut split_dim = 0;
        let mut widest = f64::NEG_INFINITY;
        for d in 0..dims {
            let (lo, hi) = self.order[start..end]
                .iter()
                .map(|&i| self.data[[i, d]])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if hi - lo > widest {
                widest = hi - lo;
                split_dim = d;
            }
        }

        let mid = (end - start) / 2;
        let data = self.data;
        self.order[start..end].select_nth_unstable_by(mid, |&a, &b| {
            data[[a, split_dim]]
                .partial_cmp(&data[[b, split_dim]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let left = self.build_node(start, start + mid);
        let right = self.build_node(start + mid, end);
        self.nodes[id].children = Some((left, right));
        id
    }

    fn search(&self, node: usize, query: ArrayView1<f64>, best: &mut (f64, usize)) {
        let n = &self.nodes[node];
        let to_centroid = sq_dist(query, ArrayView1::from(&n.centroid)).sqrt();
        if to_centroid - n.radius > best.0.sqrt() {
            return;
        }
        match n.children {
            None => {
                for &i in &self.order[n.start..n.end] {
                    let d = sq_dist(query, self.data.row(i));
                    if d < best.0 || (d == best.0 && i < best.1) {
                        *best = (d, i);
                    }
                }
            }
            Some((left, right)) => {
                let dl = sq_dist(query, ArrayView1::from(&self.nodes[left].centroid));
                let dr = sq_dist(query, ArrayView1::from(&self.nodes[right].centroid));
                let (first, second) = if dl <= dr { (left, right) } else { (right, left) };
                self.search(first, query, best);
                self.search(second, query, best);
            }
        }
    }

    fn query_all(&self, queries: ArrayView2<f64>) -> Vec<usize> {
        (0..queries.nrows())
            .into_par_iter()
            .map(|q| {
                let mut best = (f64::INFINITY, 0);
                self.search(0, queries.row(q), &mut best);
                best.1
            })
            .collect()
    }
}

enum RpNode {
    Split {
        normal: Vec<f64>,
        offset: f64,
        left: usize,
        right: usize,
    },
    Leaf(Vec<usize>),
}

/// Forest of random-projection trees; a query is answered exactly among the
/// union of the leaves it falls into
struct RpForest<'a> {
    data: ArrayView2<'a, f64>,
    trees: Vec<Vec<RpNode>>,
}

impl<'a> RpForest<'a> {
    fn build(data: ArrayView2<'a, f64>, seed: u32) -> Self {
        let mut rng = MersenneTwister::new(seed);
        let trees = (0..RP_TREES)
            .map(|_| {
                let mut nodes = Vec::new();
                Self::build_node(data, (0..data.nrows()).collect(), &mut rng, &mut nodes);
                nodes
            })
            .collect();
        Self { data, trees }
    }

    fn build_node(
        data: ArrayView2<f64>,
        points: Vec<usize>,
        rng: &mut MersenneTwister,
        nodes: &mut Vec<RpNode>,
    ) -> usize {
        let id = nodes.len();
        if points.len() <= RP_LEAF_SIZE {
            nodes.push(RpNode::Leaf(points));
            return id;
        }

        // hyperplane equidistant from two random points
        let a = data.row(points[rng.below(points.len())]);
        let b = data.row(points[rng.below(points.len())]);
        let normal: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
        let offset: f64 = normal
            .iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(n, (x, y))| n * (x + y) / 2.0)
            .sum();

        let (left_pts, right_pts): (Vec<usize>, Vec<usize>) =
            points.iter().partition(|&&i| project(&normal, data.row(i)) <= offset);
        if left_pts.is_empty() || right_pts.is_empty() {
            nodes.push(RpNode::Leaf(points));
            return id;
        }

        nodes.push(RpNode::Leaf(Vec::new()));
        let left = Self::build_node(data, left_pts, rng, nodes);
        let right = Self::build_node(data, right_pts, rng, nodes);
        nodes[id] = RpNode::Split {
            normal,
            offset,
            left,
            right,
        };
        id
    }

    fn leaf<'t>(tree: &'t [RpNode], query: ArrayView1<f64>) -> &'t [usize] {
        let mut node = 0;
        loop {
            match &tree[node] {
                RpNode::Leaf(points) => return points,
                RpNode::Split {
                    normal,
                    offset,
                    left,
                    right,
                } => {
                    node = if project(normal, query) <= *offset { *left } else { *right };
                }
            }
        }
    }

    fn query_all(&self, queries: ArrayView2<f64>) -> Vec<usize> {
        (0..queries.nrows())
            .into_par_iter()
            .map(|q| {
                let query = queries.row(q);
                let mut best = (f64::INFINITY, 0);
                for tree in &self.trees {
                    for &i in Self::leaf(tree, query) {
                        let d = sq_dist(query, self.data.row(i));
                        if d < best.0 || (d == best.0 && i < best.1) {
                            best = (d, i);
                        }
                    }
                }
                best.1
            })
            .collect()
    }
}

fn project(normal: &[f64], point: ArrayView1<f64>) -> f64 {
    normal.iter().zip(point.iter()).map(|(n, p)| n * p).sum()
}
