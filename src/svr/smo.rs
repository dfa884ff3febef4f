//! Sequential minimal optimization for the epsilon-SVR dual
//!
//! The dual has `2l` variables: `alpha_i` (sign +1) and `alpha*_i` (sign -1)
//! for every training point. It minimizes `1/2 a'Qa + p'a` subject to
//! `y'a = 0` and `0 <= a <= C`, with `Q_st = y_s y_t K(x_s, x_t)`. Working
//! pairs are chosen by second-order gain, as libsvm does.

/// Floor for the curvature of a working pair
const TAU: f64 = 1e-12;

/// Solution of the dual problem
#[derive(Debug, Clone)]
pub(crate) struct DualSolution {
    /// `alpha_i - alpha*_i` per training point
    pub coef: Vec<f64>,
    pub rho: f64,
    pub iterations: usize,
    pub converged: bool,
}

struct Solver<'a, K: Fn(usize, usize) -> f64> {
    l: usize,
    kernel: &'a K,
    sign: Vec<f64>,
    alpha: Vec<f64>,
    grad: Vec<f64>,
    c: f64,
}

impl<'a, K: Fn(usize, usize) -> f64> Solver<'a, K> {
    /// Row `s` of Q over all `2l` variables
    fn q_row(&self, s: usize) -> Vec<f64> {
        let si = s % self.l;
        let ys = self.sign[s];
        (0..2 * self.l)
            .map(|t| ys * self.sign[t] * (self.kernel)(si, t % self.l))
            .collect()
    }

    fn q_diag(&self, s: usize) -> f64 {
        let si = s % self.l;
        (self.kernel)(si, si)
    }

    fn at_upper(&self, s: usize) -> bool {
        self.alpha[s] >= self.c
    }

    fn at_lower(&self, s: usize) -> bool {
        self.alpha[s] <= 0.0
    }

    /// Maximal violating pair with second-order selection of the partner.
    /// `None` once the KKT gap falls below `tol`.
    fn select_working_set(&self, tol: f64) -> Option<(usize, usize, Vec<f64>)> {
        let n = 2 * self.l;
        let mut gmax = f64::NEG_INFINITY;
        let mut gmax_idx = None;
        for t in 0..n {
            if self.sign[t] > 0.0 {
                if !self.at_upper(t) && -self.grad[t] >= gmax {
                    gmax = -self.grad[t];
                    gmax_idx = Some(t);
                }
            } else if !self.at_lower(t) && self.grad[t] >= gmax {
                gmax = self.grad[t];
                gmax_idx = Some(t);
            }
        }
        let i = gmax_idx?;
        let q_i = self.q_row(i);
        let qd_i = self.q_diag(i);

        let mut gmax2 = f64::NEG_INFINITY;
        let mut gmin_idx = None;
        let mut obj_diff_min = f64::INFINITY;
        for j in 0..n {
            let (grad_diff, quad) = if self.sign[j] > 0.0 {
                if self.at_lower(j) {
                    continue;
                }
                gmax2 = gmax2.max(self.grad[j]);
                (gmax + self.grad[j], qd_i + self.q_diag(j) - 2.0 * self.sign[i] * q_i[j])
            } else {
                if self.at_upper(j) {
                    continue;
                }
                gmax2 = gmax2.max(-self.grad[j]);
                (gmax - self.grad[j], qd_i + self.q_diag(j) + 2.0 * self.sign[i] * q_i[j])
            };
            if grad_diff > 0.0 {
                let obj_diff = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
                if obj_diff <= obj_diff_min {
                    obj_diff_min = obj_diff;
                    gmin_idx = Some(j);
                }
            }
        }

        if gmax + gmax2 < tol {
            return None;
        }
        gmin_idx.map(|j| (i, j, q_i))
    }

    /// Analytic two-variable update, clipped to the box
    fn update_pair(&mut self, i: usize, j: usize, q_i: &[f64]) {
        let q_j = self.q_row(j);
        let c = self.c;
        let (old_i, old_j) = (self.alpha[i], self.alpha[j]);
        let (qd_i, qd_j) = (self.q_diag(i), self.q_diag(j));

        if self.sign[i] != self.sign[j] {
            let mut quad = qd_i + qd_j + 2.0 * q_i[j];
            if quad <= 0.0 {
                quad = TAU;
            }
            let delta = (-self.grad[i] - self.grad[j]) / quad;
            let diff = self.alpha[i] - self.alpha[j];
            self.alpha[i] += delta;
            self.alpha[j] += delta;
            if diff > 0.0 {
                if self.alpha[j] < 0.0 {
                    self.alpha[j] = 0.0;
                    self.alpha[i] = diff;
                }
            } else if self.alpha[i] < 0.0 {
                self.alpha[i] = 0.0;
                self.alpha[j] = -diff;
            }
            if diff > 0.0 {
                if self.alpha[i] > c {
                    self.alpha[i] = c;
                    self.alpha[j] = c - diff;
                }
            } else if self.alpha[j] > c {
                self.alpha[j] = c;
                self.alpha[i] = c + diff;
            }
        } else {
            let mut quad = qd_i + qd_j - 2.0 * q_i[j];
            if quad <= 0.0 {
                quad = TAU;
            }
            let delta = (self.grad[i] - self.grad[j]) / quad;
            let sum = self.alpha[i] + self.alpha[j];
            self.alpha[i] -= delta;
            self.alpha[j] += delta;
            if sum > c {
                if self.alpha[i] > c {
                    self.alpha[i] = c;
                    self.alpha[j] = sum - c;
                }
            } else if self.alpha[j] < 0.0 {
                self.alpha[j] = 0.0;
                self.alpha[i] = sum;
            }
            if sum > c {
                if self.alpha[j] > c {
                    self.alpha[j] = c;
                    self.alpha[i] = sum - c;
                }
            } else if self.alpha[i] < 0.0 {
                self.alpha[i] = 0.0;
                self.alpha[j] = sum;
            }
        }

        let d_i = self.alpha[i] - old_i;
        let d_j = self.alpha[j] - old_j;
        for (k, g) in self.grad.iter_mut().enumerate() {
            *g += q_i[k] * d_i + q_j[k] * d_j;
        }
    }

    /// Bias from free variables, or the midpoint of the feasible interval
    fn rho(&self) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut n_free = 0usize;
        let mut sum_free = 0.0;
        for s in 0..2 * self.l {
            let yg = self.sign[s] * self.grad[s];
            if self.at_upper(s) {
                if self.sign[s] < 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else if self.at_lower(s) {
                if self.sign[s] > 0.0 {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else {
                n_free += 1;
                sum_free += yg;
            }
        }
        if n_free > 0 {
            sum_free / n_free as f64
        } else {
            (upper + lower) / 2.0
        }
    }
}

/// Solve the epsilon-SVR dual for targets `y` under kernel `kernel(i, j)`
pub(crate) fn solve_epsilon_svr<K>(y: &[f64], kernel: &K, c: f64, epsilon: f64, tol: f64, max_iter: usize) -> DualSolution
where
    K: Fn(usize, usize) -> f64,
{
    let l = y.len();
    let mut sign = vec![1.0; 2 * l];
    let mut grad = vec![0.0; 2 * l];
    for i in 0..l {
        grad[i] = epsilon - y[i];
        grad[i + l] = epsilon + y[i];
        sign[i + l] = -1.0;
    }

    let mut solver = Solver {
        l,
        kernel,
        sign,
        alpha: vec![0.0; 2 * l],
        grad,
        c,
    };

    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iter {
        match solver.select_working_set(tol) {
            Some((i, j, q_i)) => solver.update_pair(i, j, &q_i),
            None => {
                converged = true;
                break;
            }
        }
        iterations += 1;
    }

    let coef = (0..l).map(|i| solver.alpha[i] - solver.alpha[i + l]).collect();
    DualSolution {
        coef,
        rho: solver.rho(),
        iterations,
        converged,
    }
}
