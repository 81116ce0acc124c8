//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Bounded derivative-free multivariable search."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Bounded Nelder–Mead search over an objective supplied by the caller.
//!
//! Typical use is tuning activity parameters (threads, rates) against a
//! measured throughput. The optimizer knows nothing about the engine; the
//! objective closure does the measuring.
//!
//! ```
//! use r_eb_optimo::Optimo;
//!
//! let result = Optimo::new(vec![0.0, 0.0], vec![10.0, 10.0])
//!     .unwrap()
//!     .max_eval(500)
//!     .maximize(|x| -(x[0] - 3.0).powi(2) - (x[1] - 4.0).powi(2), &[5.0, 5.0])
//!     .unwrap();
//! assert!((result.point[0] - 3.0).abs() < 1e-3);
//! ```

use std::cell::Cell;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OptimoError {
    #[error("expected {expected} values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("at least one dimension is required")]
    NoDimensions,
    #[error("bounds of dimension {index} are invalid: [{lower}, {upper}]")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },
    #[error("initial value {value} of dimension {index} is outside its bounds")]
    InitialOutOfBounds { index: usize, value: f64 },
    #[error("{name} radius must be positive and finite, got {value}")]
    InvalidRadius { name: &'static str, value: f64 },
    #[error("max_eval must be at least {minimum}")]
    TooFewEvaluations { minimum: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Goal {
    Minimize,
    Maximize,
}

/// Outcome of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimoResult {
    pub point: Vec<f64>,
    /// Objective value at `point`, in the caller's sign convention.
    pub value: f64,
    pub evaluations: usize,
    /// False when the evaluation budget ran out before the simplex shrank
    /// below the stopping radius.
    pub converged: bool,
}

/// Search configuration, built fluently.
#[derive(Debug, Clone)]
pub struct Optimo {
    lower: Vec<f64>,
    upper: Vec<f64>,
    initial_radius: Option<f64>,
    stopping_radius: f64,
    max_eval: usize,
}

impl Optimo {
    /// A search over the box `[lower, upper]`.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, OptimoError> {
        if lower.is_empty() {
            return Err(OptimoError::NoDimensions);
        }
        if lower.len() != upper.len() {
            return Err(OptimoError::DimensionMismatch {
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(&upper).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(OptimoError::InvalidBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self {
            lower,
            upper,
            initial_radius: None,
            stopping_radius: 1e-6,
            max_eval: 1000,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.lower.len()
    }

    /// Edge length of the starting simplex. Defaults to a quarter of the narrowest bound.
    pub fn initial_radius(mut self, radius: f64) -> Self {
        self.initial_radius = Some(radius);
        self
    }

    /// The search ends once every vertex lies within this distance of the best one.
    pub fn stopping_radius(mut self, radius: f64) -> Self {
        self.stopping_radius = radius;
        self
    }

    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.max_eval = max_eval;
        self
    }

    pub fn maximize<F>(&self, objective: F, initial: &[f64]) -> Result<OptimoResult, OptimoError>
    where
        F: FnMut(&[f64]) -> f64,
    {
        self.search(objective, initial, Goal::Maximize)
    }

    pub fn minimize<F>(&self, objective: F, initial: &[f64]) -> Result<OptimoResult, OptimoError>
    where
        F: FnMut(&[f64]) -> f64,
    {
        self.search(objective, initial, Goal::Minimize)
    }

    fn validate(&self, initial: &[f64]) -> Result<f64, OptimoError> {
        let n = self.dimensions();
        if initial.len() != n {
            return Err(OptimoError::DimensionMismatch {
                expected: n,
                actual: initial.len(),
            });
        }
        for (index, &value) in initial.iter().enumerate() {
            if !(value >= self.lower[index] && value <= self.upper[index]) {
                return Err(OptimoError::InitialOutOfBounds { index, value });
            }
        }
        let narrowest = self
            .lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .fold(f64::INFINITY, f64::min);
        let radius = self.initial_radius.unwrap_or(narrowest / 4.0);
        check_radius("initial", radius)?;
        check_radius("stopping", self.stopping_radius)?;
        if self.max_eval < n + 1 {
            return Err(OptimoError::TooFewEvaluations { minimum: n + 1 });
        }
        Ok(radius)
    }

    fn search<F>(&self, mut objective: F, initial: &[f64], goal: Goal) -> Result<OptimoResult, OptimoError>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let radius = self.validate(initial)?;
        let n = self.dimensions();
        let evaluations = Cell::new(0usize);
        // internally always minimise; NaN ranks last
        let mut cost = |point: &[f64]| {
            evaluations.set(evaluations.get() + 1);
            let value = objective(point);
            let signed = match goal {
                Goal::Minimize => value,
                Goal::Maximize => -value,
            };
            if signed.is_nan() {
                f64::INFINITY
            } else {
                signed
            }
        };

        let mut simplex: Vec<Vertex> = Vec::with_capacity(n + 1);
        let start = initial.to_vec();
        simplex.push(Vertex::new(cost(&start), start.clone()));
        for axis in 0..n {
            let mut point = start.clone();
            point[axis] = if point[axis] + radius <= self.upper[axis] {
                point[axis] + radius
            } else {
                point[axis] - radius
            };
            self.clamp(&mut point);
            simplex.push(Vertex::new(cost(&point), point));
        }

        let mut converged = false;
        loop {
            simplex.sort_by(|a, b| a.cost.total_cmp(&b.cost));
            if self.spread(&simplex) < self.stopping_radius {
                converged = true;
                break;
            }
            // one iteration costs at most a reflection, a contraction and a shrink of n vertices
            if evaluations.get() + n + 2 > self.max_eval {
                break;
            }

            let centroid = centroid(&simplex[..n]);
            let worst = simplex[n].clone();
            let reflected = self.towards(&centroid, &worst.point, -1.0);
            let reflected_cost = cost(&reflected);

            if reflected_cost < simplex[0].cost {
                let expanded = self.towards(&centroid, &worst.point, -2.0);
                let expanded_cost = cost(&expanded);
                simplex[n] = if expanded_cost < reflected_cost {
                    Vertex::new(expanded_cost, expanded)
                } else {
                    Vertex::new(reflected_cost, reflected)
                };
            } else if reflected_cost < simplex[n - 1].cost {
                simplex[n] = Vertex::new(reflected_cost, reflected);
            } else {
                let (contracted, contracted_cost) = if reflected_cost < worst.cost {
                    let point = self.towards(&centroid, &reflected, 0.5);
                    let value = cost(&point);
                    (point, value)
                } else {
                    let point = self.towards(&centroid, &worst.point, 0.5);
                    let value = cost(&point);
                    (point, value)
                };
                if contracted_cost < worst.cost.min(reflected_cost) {
                    simplex[n] = Vertex::new(contracted_cost, contracted);
                } else {
                    let best = simplex[0].point.clone();
                    for vertex in simplex.iter_mut().skip(1) {
                        let point = self.towards(&best, &vertex.point, 0.5);
                        *vertex = Vertex::new(cost(&point), point);
                    }
                }
            }
            debug!(best = simplex[0].cost, spread = self.spread(&simplex), "optimo iteration");
        }

        let best = simplex.swap_remove(0);
        let value = match goal {
            Goal::Minimize => best.cost,
            Goal::Maximize => -best.cost,
        };
        let evaluations = evaluations.get();
        debug!(evaluations, value, converged, "optimo finished");
        Ok(OptimoResult {
            point: best.point,
            value,
            evaluations,
            converged,
        })
    }

    /// `from + t * (to - from)`, clamped to the bounds.
    fn towards(&self, from: &[f64], to: &[f64], t: f64) -> Vec<f64> {
        let mut point: Vec<f64> = from
            .iter()
            .zip(to)
            .map(|(a, b)| a + t * (b - a))
            .collect();
        self.clamp(&mut point);
        point
    }

    fn clamp(&self, point: &mut [f64]) {
        for (index, value) in point.iter_mut().enumerate() {
            *value = value.clamp(self.lower[index], self.upper[index]);
        }
    }

    /// Largest distance of any vertex from the best one.
    fn spread(&self, simplex: &[Vertex]) -> f64 {
        let best = &simplex[0].point;
        simplex[1..]
            .iter()
            .map(|vertex| distance(best, &vertex.point))
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone)]
struct Vertex {
    cost: f64,
    point: Vec<f64>,
}

impl Vertex {
    fn new(cost: f64, point: Vec<f64>) -> Self {
        Self { cost, point }
    }
}

fn centroid(vertices: &[Vertex]) -> Vec<f64> {
    let n = vertices[0].point.len();
    let mut sum = vec![0.0; n];
    for vertex in vertices {
        for (total, value) in sum.iter_mut().zip(&vertex.point) {
            *total += value;
        }
    }
    sum.iter().map(|total| total / vertices.len() as f64).collect()
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn check_radius(name: &'static str, value: f64) -> Result<(), OptimoError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(OptimoError::InvalidRadius { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maximizes_a_concave_quadratic() {
        let result = Optimo::new(vec![-10.0, -10.0], vec![10.0, 10.0])
            .unwrap()
            .stopping_radius(1e-8)
            .maximize(|x| 5.0 - (x[0] - 1.5).powi(2) - 2.0 * (x[1] + 2.0).powi(2), &[0.0, 0.0])
            .unwrap();
        assert!(result.converged);
        assert!((result.point[0] - 1.5).abs() < 1e-4, "{:?}", result.point);
        assert!((result.point[1] + 2.0).abs() < 1e-4, "{:?}", result.point);
        assert!((result.value - 5.0).abs() < 1e-6);
    }

    #[test]
    fn respects_bounds_when_the_optimum_is_outside() {
        let result = Optimo::new(vec![0.0], vec![4.0])
            .unwrap()
            .minimize(|x| (x[0] - 9.0).powi(2), &[1.0])
            .unwrap();
        assert!((result.point[0] - 4.0).abs() < 1e-4, "{:?}", result.point);
        assert!(result.point[0] <= 4.0);
    }

    #[test]
    fn stops_at_the_evaluation_budget() {
        let mut calls = 0;
        let result = Optimo::new(vec![-5.0; 3], vec![5.0; 3])
            .unwrap()
            .max_eval(20)
            .stopping_radius(1e-12)
            .minimize(
                |x| {
                    calls += 1;
                    x.iter().map(|v| (v - 1.0).powi(2)).sum()
                },
                &[4.0, -4.0, 0.0],
            )
            .unwrap();
        assert!(!result.converged);
        assert_eq!(result.evaluations, calls);
        assert!(calls <= 20, "used {calls} evaluations");
    }

    #[test]
    fn nan_objective_values_rank_last() {
        let result = Optimo::new(vec![0.0], vec![10.0])
            .unwrap()
            .minimize(|x| if x[0] > 6.0 { f64::NAN } else { (x[0] - 5.0).abs() }, &[2.0])
            .unwrap();
        assert!((result.point[0] - 5.0).abs() < 1e-3, "{:?}", result.point);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert_eq!(Optimo::new(vec![], vec![]).unwrap_err(), OptimoError::NoDimensions);
        assert!(matches!(
            Optimo::new(vec![1.0], vec![0.0]),
            Err(OptimoError::InvalidBounds { index: 0, .. })
        ));
        let optimo = Optimo::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert!(matches!(
            optimo.minimize(|_| 0.0, &[0.5]),
            Err(OptimoError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            optimo.minimize(|_| 0.0, &[0.5, 2.0]),
            Err(OptimoError::InitialOutOfBounds { index: 1, .. })
        ));
        assert!(matches!(
            optimo.clone().stopping_radius(0.0).minimize(|_| 0.0, &[0.5, 0.5]),
            Err(OptimoError::InvalidRadius { name: "stopping", .. })
        ));
        assert!(matches!(
            optimo.max_eval(2).minimize(|_| 0.0, &[0.5, 0.5]),
            Err(OptimoError::TooFewEvaluations { minimum: 3 })
        ));
    }
}
