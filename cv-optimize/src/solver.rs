use cv_core::nalgebra::{DMatrix, DVector};
use log::{debug, trace};
use thiserror::Error;

/// The smallest diagonal scale, so parameters the residuals do not depend on yet still get
/// a damped step.
const MIN_SCALING: f64 = 1e-12;
const MIN_DAMPING: f64 = 1e-15;

/// A nonlinear least squares problem `min ½‖r(x)‖²` over a flat parameter vector.
///
/// The problem owns its state: the optimizer reads it with [`LeastSquaresProblem::params`],
/// moves it with [`LeastSquaresProblem::set_params`] and then evaluates the residuals and
/// Jacobian at the new state.
pub trait LeastSquaresProblem {
    fn set_params(&mut self, params: &DVector<f64>);

    fn params(&self) -> DVector<f64>;

    /// Returning `None` marks the current parameters as unusable.
    fn residuals(&self) -> Option<DVector<f64>>;

    /// The Jacobian of the residuals with one row per residual and one column per parameter.
    fn jacobian(&self) -> Option<DMatrix<f64>>;
}

/// Why the optimizer stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The relative cost reduction fell below `ftol` or the relative step below `xtol`.
    Converged { ftol: bool, xtol: bool },
    ResidualsZero,
    /// The gradient fell below `gtol`.
    Orthogonal,
    /// The iteration limit was reached.
    LostPatience,
    NoParameters,
    /// The damping grew past its limit without finding a better point.
    DampingExhausted,
}

impl TerminationReason {
    pub fn was_successful(&self) -> bool {
        matches!(
            self,
            Self::Converged { .. } | Self::ResidualsZero | Self::Orthogonal | Self::NoParameters
        )
    }
}

/// What happened during [`LevenbergMarquardt::minimize`].
///
/// Costs are sums of squared residuals.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MinimizationReport {
    pub termination: TerminationReason,
    /// Number of Jacobian evaluations.
    pub iterations: usize,
    /// Number of residual evaluations.
    pub evaluations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizationError {
    #[error("the residuals at the initial parameters are not finite")]
    NonFiniteResiduals,
    #[error("the optimizer diverged; the best cost reached was {best_cost:e}")]
    Divergence {
        best_cost: f64,
        report: MinimizationReport,
    },
    #[error("the problem is malformed: {0}")]
    InvalidProblem(String),
}

/// Levenberg-Marquardt with Marquardt's diagonal scaling.
///
/// Each iteration solves `(JᵀJ + λ D) δ = -Jᵀr` where `D` holds the largest diagonal of
/// `JᵀJ` seen so far. A step that lowers the cost is taken and `λ` shrinks by a factor of
/// three. A step that does not is undone and `λ` grows by a factor that doubles with every
/// consecutive rejection. The parameters of the problem are therefore always the best ones
/// evaluated, which also holds when an error is returned.
///
/// ```
/// use cv_core::nalgebra::{DMatrix, DVector};
/// use cv_optimize::{LeastSquaresProblem, LevenbergMarquardt};
///
/// /// The point closest to three lines.
/// struct Closest(DVector<f64>);
///
/// impl LeastSquaresProblem for Closest {
///     fn set_params(&mut self, params: &DVector<f64>) {
///         self.0.copy_from(params);
///     }
///     fn params(&self) -> DVector<f64> {
///         self.0.clone()
///     }
///     fn residuals(&self) -> Option<DVector<f64>> {
///         Some(DVector::from_column_slice(&[self.0[0] - 1.0, self.0[1] + 2.0, self.0[0] + self.0[1]]))
///     }
///     fn jacobian(&self) -> Option<DMatrix<f64>> {
///         Some(DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]))
///     }
/// }
///
/// let mut problem = Closest(DVector::zeros(2));
/// let report = LevenbergMarquardt::new().minimize(&mut problem).unwrap();
/// assert!(report.termination.was_successful());
/// approx::assert_relative_eq!(problem.0[0], 4.0 / 3.0, epsilon = 1e-6);
/// approx::assert_relative_eq!(problem.0[1], -5.0 / 3.0, epsilon = 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LevenbergMarquardt {
    ftol: f64,
    xtol: f64,
    gtol: f64,
    patience: usize,
    initial_damping: f64,
    max_damping: f64,
    divergence_patience: usize,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stop when an accepted step lowers the cost by less than this fraction.
    ///
    /// Default is `1e-10`.
    #[must_use]
    pub fn with_ftol(self, ftol: f64) -> Self {
        Self { ftol, ..self }
    }

    /// Stop when an accepted step is shorter than this fraction of the parameter norm.
    ///
    /// Default is `1e-10`.
    #[must_use]
    pub fn with_xtol(self, xtol: f64) -> Self {
        Self { xtol, ..self }
    }

    /// Stop when the largest gradient component is below this.
    ///
    /// Default is `1e-10`.
    #[must_use]
    pub fn with_gtol(self, gtol: f64) -> Self {
        Self { gtol, ..self }
    }

    /// Maximum number of iterations.
    ///
    /// Default is `100`.
    #[must_use]
    pub fn with_patience(self, patience: usize) -> Self {
        Self { patience, ..self }
    }

    /// The initial damping relative to the largest diagonal entry of `JᵀJ`.
    ///
    /// Default is `1e-3`.
    #[must_use]
    pub fn with_initial_damping(self, initial_damping: f64) -> Self {
        Self {
            initial_damping,
            ..self
        }
    }

    /// Once the damping passes this the optimizer gives up on finding a better point.
    ///
    /// Default is `1e32`.
    #[must_use]
    pub fn with_max_damping(self, max_damping: f64) -> Self {
        Self {
            max_damping,
            ..self
        }
    }

    /// How many consecutive rejected steps with growing cost count as divergence once the
    /// damping is exhausted.
    ///
    /// Default is `5`.
    #[must_use]
    pub fn with_divergence_patience(self, divergence_patience: usize) -> Self {
        Self {
            divergence_patience,
            ..self
        }
    }

    pub fn minimize<P>(&self, problem: &mut P) -> Result<MinimizationReport, OptimizationError>
    where
        P: LeastSquaresProblem + ?Sized,
    {
        let mut x = problem.params();
        let mut residuals = problem
            .residuals()
            .filter(|r| r.iter().all(|n| n.is_finite()))
            .ok_or(OptimizationError::NonFiniteResiduals)?;
        let mut cost = residuals.norm_squared();
        let mut report = MinimizationReport {
            termination: TerminationReason::LostPatience,
            iterations: 0,
            evaluations: 1,
            initial_cost: cost,
            final_cost: cost,
        };
        if x.is_empty() {
            report.termination = TerminationReason::NoParameters;
            return Ok(report);
        }
        if cost == 0.0 {
            report.termination = TerminationReason::ResidualsZero;
            return Ok(report);
        }

        let mut scaling = DVector::<f64>::zeros(x.len());
        let mut damping: Option<f64> = None;
        let mut growth = 2.0;

        while report.iterations < self.patience {
            report.iterations += 1;
            let jacobian = problem
                .jacobian()
                .filter(|j| j.shape() == (residuals.len(), x.len()))
                .ok_or_else(|| {
                    OptimizationError::InvalidProblem(format!(
                        "expected a {}x{} jacobian",
                        residuals.len(),
                        x.len()
                    ))
                })?;
            if !jacobian.iter().all(|n| n.is_finite()) {
                report.termination = TerminationReason::DampingExhausted;
                return Err(OptimizationError::Divergence {
                    best_cost: cost,
                    report,
                });
            }
            let jtj = jacobian.tr_mul(&jacobian);
            let gradient = jacobian.tr_mul(&residuals);
            if gradient.amax() < self.gtol {
                report.termination = TerminationReason::Orthogonal;
                return Ok(report);
            }
            for (scale, &diagonal) in scaling.iter_mut().zip(jtj.diagonal().iter()) {
                *scale = scale.max(diagonal).max(MIN_SCALING);
            }
            let lambda = damping.get_or_insert_with(|| {
                self.initial_damping * jtj.diagonal().max().max(MIN_SCALING)
            });

            // Try steps until one lowers the cost.
            let mut rejected = 0;
            let mut growing = true;
            let mut last_trial_cost = f64::NEG_INFINITY;
            loop {
                let mut system = jtj.clone();
                for (ix, &scale) in scaling.iter().enumerate() {
                    system[(ix, ix)] += *lambda * scale;
                }
                let mut trial_cost = f64::INFINITY;
                if let Some(cholesky) = system.cholesky() {
                    let step = cholesky.solve(&-&gradient);
                    let candidate = &x + &step;
                    problem.set_params(&candidate);
                    report.evaluations += 1;
                    let trial = problem.residuals().filter(|r| {
                        r.len() == residuals.len() && r.iter().all(|n| n.is_finite())
                    });
                    if let Some(trial_residuals) = trial {
                        trial_cost = trial_residuals.norm_squared();
                        if trial_cost < cost {
                            let reduction = (cost - trial_cost) / cost;
                            let small_step = step.norm() <= self.xtol * (x.norm() + self.xtol);
                            trace!(
                                "accepted step with lambda {:e}: cost {:e} -> {:e}",
                                lambda,
                                cost,
                                trial_cost
                            );
                            x = candidate;
                            residuals = trial_residuals;
                            cost = trial_cost;
                            report.final_cost = cost;
                            *lambda = (*lambda / 3.0).max(MIN_DAMPING);
                            growth = 2.0;
                            if cost == 0.0 {
                                report.termination = TerminationReason::ResidualsZero;
                                return Ok(report);
                            }
                            if reduction < self.ftol || small_step {
                                report.termination = TerminationReason::Converged {
                                    ftol: reduction < self.ftol,
                                    xtol: small_step,
                                };
                                return Ok(report);
                            }
                            break;
                        }
                        // The linear model expects no real progress either.
                        let predicted = -(2.0 * step.dot(&gradient) + step.dot(&(&jtj * &step)));
                        if predicted <= self.ftol * cost {
                            problem.set_params(&x);
                            report.termination = TerminationReason::Converged {
                                ftol: true,
                                xtol: false,
                            };
                            return Ok(report);
                        }
                    }
                    problem.set_params(&x);
                }

                growing &= !trial_cost.is_finite() || trial_cost > last_trial_cost;
                last_trial_cost = trial_cost;
                rejected += 1;
                *lambda *= growth;
                growth *= 2.0;
                trace!(
                    "rejected step with cost {:e}, lambda is now {:e}",
                    trial_cost,
                    lambda
                );
                if *lambda > self.max_damping {
                    report.termination = TerminationReason::DampingExhausted;
                    debug!(
                        "damping exhausted after {} rejected steps at cost {:e}",
                        rejected, cost
                    );
                    return if growing && rejected >= self.divergence_patience {
                        Err(OptimizationError::Divergence {
                            best_cost: cost,
                            report,
                        })
                    } else {
                        Ok(report)
                    };
                }
            }
            debug!(
                "iteration {}: cost {:e} with lambda {:e}",
                report.iterations, cost, lambda
            );
        }
        Ok(report)
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            patience: 100,
            initial_damping: 1e-3,
            max_damping: 1e32,
            divergence_patience: 5,
        }
    }
}

/// Central difference approximation of the Jacobian at the current parameters.
///
/// The problem is returned to its original parameters afterwards.
pub fn differentiate_numerically<P>(problem: &mut P) -> Option<DMatrix<f64>>
where
    P: LeastSquaresProblem + ?Sized,
{
    let params = problem.params();
    let residuals = problem.residuals()?;
    let mut jacobian = DMatrix::zeros(residuals.len(), params.len());
    let step_scale = f64::EPSILON.cbrt();
    let mut shifted = params.clone();
    let mut complete = true;
    for ix in 0..params.len() {
        let h = step_scale * params[ix].abs().max(1.0);
        shifted[ix] = params[ix] + h;
        problem.set_params(&shifted);
        let forward = problem.residuals();
        shifted[ix] = params[ix] - h;
        problem.set_params(&shifted);
        let backward = problem.residuals();
        shifted[ix] = params[ix];
        match (forward, backward) {
            (Some(forward), Some(backward)) => {
                jacobian.set_column(ix, &((forward - backward) / (2.0 * h)));
            }
            _ => {
                complete = false;
                break;
            }
        }
    }
    problem.set_params(&params);
    complete.then(|| jacobian)
}
