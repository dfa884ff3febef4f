//! Topology representing network
//!
//! A fixed set of nodes is relaxed onto a point cloud by neural-gas updates:
//! each step draws one target point and moves every node towards it with a
//! step size decaying exponentially in the node's closeness rank.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::neighbors::nearest_indices;
use crate::error::{Result, ScError};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::rng::MersenneTwister;

/// Default seed of the samplers
pub const DEFAULT_SEED: u32 = 19491001;

/// Schedule of a TRN run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrnParams {
    /// Steps per node
    pub tmax: f64,
    /// Initial neighbourhood range, per node
    pub li: f64,
    pub lf: f64,
    /// Initial step size
    pub ei: f64,
    pub ef: f64,
    /// Minimum displacement factor; nodes ranked too far to move more are skipped
    pub c: f64,
    /// Threads for the nearest-point lookup; rayon's global pool when unset
    pub n_jobs: Option<usize>,
}

impl Default for TrnParams {
    fn default() -> Self {
        Self {
            tmax: 200.0,
            li: 0.2,
            lf: 0.01,
            ei: 0.3,
            ef: 0.05,
            c: 0.0,
            n_jobs: None,
        }
    }
}

impl TrnParams {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Node set relaxed onto the rows of `X`
#[derive(Debug, Clone)]
pub struct Trnet {
    n_nodes: usize,
    x: Array2<f64>,
    seed: u32,
    w: Array2<f64>,
}

impl Trnet {
    /// Place `n_nodes` nodes on rows of `x` drawn with replacement
    pub fn new(n_nodes: usize, x: ArrayView2<f64>, seed: u32) -> Result<Self> {
        if n_nodes == 0 {
            return Err(ScError::InvalidInput {
                reason: "a topology representing network needs at least one node".to_string(),
            });
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(ScError::EmptyData {
                reason: "no points to sample from".to_string(),
            });
        }
        let mut net = Self {
            n_nodes,
            x: x.to_owned(),
            seed,
            w: Array2::zeros((0, x.ncols())),
        };
        net.w = net.draw_sample(n_nodes);
        Ok(net)
    }

    /// Rows of `X` drawn with replacement, restarting the generator at the seed
    fn draw_sample(&self, n_samples: usize) -> Array2<f64> {
        let mut rng = MersenneTwister::new(self.seed);
        let idx = rng.randint(self.x.nrows(), n_samples);
        self.x.select(Axis(0), &idx)
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn n_dims(&self) -> usize {
        self.x.ncols()
    }

    /// Current node positions, `n_nodes x n_dims`
    pub fn nodes(&self) -> &Array2<f64> {
        &self.w
    }

    pub fn into_nodes(self) -> Array2<f64> {
        self.w
    }

    /// One update towards target `p` with range `l` and step size `ep`
    pub fn run_once(&mut self, p: ArrayView1<f64>, l: f64, ep: f64, c: f64) {
        let mut d = self.w.mapv(|v| -v);
        d += &p;
        let sq: Vec<f64> = d.outer_iter().map(|row| row.dot(&row)).collect();

        let mut order: Vec<usize> = (0..self.n_nodes).collect();
        order.sort_by(|&a, &b| sq[a].partial_cmp(&sq[b]).unwrap_or(std::cmp::Ordering::Equal));
        let mut rank = vec![0usize; self.n_nodes];
        for (r, &i) in order.iter().enumerate() {
            rank[i] = r;
        }

        // nodes ranked at or beyond kc would move by less than c
        let kc = if c == 0.0 { f64::INFINITY } else { -l * (c / ep).ln() };
        for (i, (mut node, delta)) in self.w.outer_iter_mut().zip(d.outer_iter()).enumerate() {
            let k = rank[i] as f64;
            if k < kc {
                node.scaled_add(ep * (-k / l).exp(), &delta);
            }
        }
    }

    fn steps(&self, params: &TrnParams) -> (usize, f64) {
        let tmax = (params.tmax * self.n_nodes as f64) as usize;
        (tmax, params.li * self.n_nodes as f64)
    }

    fn step(&mut self, targets: &Array2<f64>, t: usize, tmax: usize, li: f64, params: &TrnParams) {
        let tt = t as f64 / tmax as f64;
        let l = li * (params.lf / li).powf(tt);
        let ep = params.ei * (params.ef / params.ei).powf(tt);
        self.run_once(targets.row(t - 1), l, ep, params.c);
    }

    /// Full annealing schedule of `tmax * n_nodes` steps
    pub fn run(&mut self, params: &TrnParams, sink: &dyn ProgressSink) {
        let (tmax, li) = self.steps(params);
        let targets = self.draw_sample(tmax);
        let mut tracker = ProgressTracker::new(sink, "Running TRN", tmax);
        for t in 1..=tmax {
            self.step(&targets, t, tmax, li, params);
            tracker.update(t);
        }
        tracker.finish();
    }

    /// Steps `k0..=k` of the schedule of [`Trnet::run`]
    pub fn run_n_pause(&mut self, k0: usize, k: usize, params: &TrnParams, sink: &dyn ProgressSink) -> Result<()> {
        let (tmax, li) = self.steps(params);
        if k0 == 0 || k > tmax || k0 > k {
            return Err(ScError::InvalidInput {
                reason: format!("steps {}..={} outside the schedule 1..={}", k0, k, tmax),
            });
        }
        let targets = self.draw_sample(tmax);
        for t in k0..=k {
            self.step(&targets, t, tmax, li, params);
            if t % 1000 == 0 {
                sink.info(&format!("{} steps have been run", t));
            }
        }
        Ok(())
    }
}

/// Output of [`trn`]
#[derive(Debug, Clone, PartialEq)]
pub enum TrnSample {
    /// Row of `X` nearest to each node
    Indices(Vec<usize>),
    /// Relaxed node positions
    Nodes(Array2<f64>),
}

/// Sub-sample `n` representative points of `x` with a topology representing network
pub fn trn(
    x: ArrayView2<f64>,
    n: usize,
    return_index: bool,
    seed: u32,
    params: &TrnParams,
    sink: &dyn ProgressSink,
) -> Result<TrnSample> {
    let mut net = Trnet::new(n, x, seed)?;
    net.run(params, sink);
    if !return_index {
        return Ok(TrnSample::Nodes(net.into_nodes()));
    }
    let idx = nearest_indices(x, net.nodes().view(), seed, params.n_jobs)?;
    Ok(TrnSample::Indices(idx))
}

/// [`trn`] returning the row indices only
pub fn trn_indices(
    x: ArrayView2<f64>,
    n: usize,
    seed: u32,
    params: &TrnParams,
    sink: &dyn ProgressSink,
) -> Result<Vec<usize>> {
    match trn(x, n, true, seed, params, sink)? {
        TrnSample::Indices(idx) => Ok(idx),
        TrnSample::Nodes(nodes) => nearest_indices(x, nodes.view(), seed, params.n_jobs),
    }
}
