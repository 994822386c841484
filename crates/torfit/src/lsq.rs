//! Levenberg-Marquardt nonlinear least squares

use nalgebra as na;

use na::Cholesky;

pub type Dmat = na::DMatrix<f64>;
pub type Dvec = na::DVector<f64>;

/// damping factors beyond this mean no downhill step can be found
const LAMBDA_MAX: f64 = 1e16;
const LAMBDA_MIN: f64 = 1e-12;

/// the final parameters of [LevenbergMarquardt::minimize], along with the sum
/// of squared residuals they produce
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub params: Dvec,
    pub rss: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevenbergMarquardt {
    pub max_iter: usize,

    /// relative reduction in the sum of squares below which an accepted step
    /// counts as converged
    pub ftol: f64,

    /// relative step size below which an accepted step counts as converged
    pub xtol: f64,

    /// largest gradient component considered zero
    pub gtol: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iter: 200,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-14,
        }
    }
}

/// forward-difference Jacobian of `f` at `p`, where `r = f(p)`
fn jacobian<F>(f: &mut F, p: &Dvec, r: &Dvec) -> Dmat
where
    F: FnMut(&Dvec) -> Dvec,
{
    let mut jac = Dmat::zeros(r.len(), p.len());
    for j in 0..p.len() {
        let h = f64::EPSILON.sqrt() * p[j].abs().max(1.0);
        let mut q = p.clone();
        q[j] += h;
        let col = (f(&q) - r) / h;
        jac.set_column(j, &col);
    }
    jac
}

/// solve `a x = b`, first with the Cholesky decomposition and then falling
/// back on LU if `a` is not positive definite
fn solve(a: Dmat, b: &Dvec) -> Option<Dvec> {
    if let Some(chol) = Cholesky::new(a.clone()) {
        return Some(chol.solve(b));
    }
    na::LU::new(a).solve(b)
}

impl LevenbergMarquardt {
    /// minimize the sum of squares of the vector returned by `residuals`,
    /// starting from `p0`. Failing to converge within `max_iter` iterations
    /// is reported in the returned [Solution] rather than as an error.
    pub fn minimize<F>(&self, mut residuals: F, p0: Dvec) -> Solution
    where
        F: FnMut(&Dvec) -> Dvec,
    {
        let mut p = p0;
        let mut r = residuals(&p);
        let mut cost = r.norm_squared();
        let mut lambda = 1e-3;
        let mut converged = false;
        let mut iterations = 0;
        while iterations < self.max_iter {
            iterations += 1;
            let jac = jacobian(&mut residuals, &p, &r);
            let jt = jac.transpose();
            let jtj = &jt * &jac;
            let g = &jt * &r;
            if g.amax() <= self.gtol {
                converged = true;
                break;
            }

            let mut stepped = false;
            while lambda < LAMBDA_MAX {
                let mut a = jtj.clone();
                for i in 0..a.nrows() {
                    a[(i, i)] += lambda * jtj[(i, i)].max(f64::EPSILON);
                }
                let Some(delta) = solve(a, &-&g) else {
                    lambda *= 10.0;
                    continue;
                };
                let trial = &p + &delta;
                let rt = residuals(&trial);
                let ct = rt.norm_squared();
                if ct.is_finite() && ct <= cost {
                    let small_step =
                        delta.norm() <= self.xtol * (p.norm() + self.xtol);
                    let small_drop = cost - ct <= self.ftol * cost;
                    // heavily damped steps are small without being close
                    converged = (small_step || small_drop) && lambda <= 1.0;
                    p = trial;
                    r = rt;
                    cost = ct;
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);
                    stepped = true;
                    break;
                }
                lambda *= 10.0;
            }
            // no downhill direction left at machine precision
            if !stepped {
                converged = true;
            }
            if converged {
                break;
            }
        }
        Solution {
            params: p,
            rss: cost,
            iterations,
            converged,
        }
    }
}
