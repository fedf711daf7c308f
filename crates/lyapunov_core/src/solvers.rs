use crate::traits::{lift, DynamicalSystem, Scalar, Steppable};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Coefficients of an explicit Runge-Kutta method.
/// `a[s]` holds the weights of the stages preceding stage `s`.
#[derive(Debug)]
pub struct ButcherTableau {
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

impl ButcherTableau {
    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

/// Classic Runge-Kutta 4th order.
pub const RK4_TABLEAU: ButcherTableau = ButcherTableau {
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Tsitouras 5/4, advanced with the 5th order weights at a fixed step.
/// The FSAL seventh stage only feeds the embedded error estimate and is omitted.
pub const TSIT5_TABLEAU: ButcherTableau = ButcherTableau {
    c: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
    a: &[
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.898, -6.359447987781783, 4.361447987781783],
        &[
            5.325864858437957,
            -11.748883564062828,
            7.495539342889693,
            -0.09249506636030195,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.02826857949054663,
        ],
    ],
    b: &[
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436099,
        2.324710524099774,
    ],
};

/// Fixed-step explicit Runge-Kutta stepper with preallocated stage buffers.
pub struct ExplicitRungeKutta<T: Scalar> {
    c: Vec<T>,
    a: Vec<Vec<T>>,
    b: Vec<T>,
    k: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> ExplicitRungeKutta<T> {
    pub fn new(tableau: &ButcherTableau, dim: usize) -> Self {
        let lift_all = |row: &[f64]| row.iter().map(|&v| lift::<T>(v)).collect::<Vec<T>>();
        Self {
            c: lift_all(tableau.c),
            a: tableau.a.iter().map(|&row| lift_all(row)).collect(),
            b: lift_all(tableau.b),
            k: vec![vec![T::zero(); dim]; tableau.stages()],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for ExplicitRungeKutta<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;

        for s in 0..self.b.len() {
            for i in 0..state.len() {
                let mut increment = T::zero();
                for (weight, stage) in self.a[s].iter().zip(&self.k) {
                    increment = increment + *weight * stage[i];
                }
                self.tmp[i] = state[i] + dt * increment;
            }
            system.apply(t0 + self.c[s] * dt, &self.tmp, &mut self.k[s]);
        }

        for i in 0..state.len() {
            let mut increment = T::zero();
            for (weight, stage) in self.b.iter().zip(&self.k) {
                increment = increment + *weight * stage[i];
            }
            state[i] = state[i] + dt * increment;
        }

        *t = t0 + dt;
    }
}

/// Integrator used to advance flows between map evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Integrator {
    Rk4,
    #[default]
    Tsit5,
}

impl Integrator {
    pub fn tableau(self) -> &'static ButcherTableau {
        match self {
            Integrator::Rk4 => &RK4_TABLEAU,
            Integrator::Tsit5 => &TSIT5_TABLEAU,
        }
    }

    pub fn build<T: Scalar>(self, dim: usize) -> ExplicitRungeKutta<T> {
        ExplicitRungeKutta::new(self.tableau(), dim)
    }
}

/// Upper bound on the number of fixed steps a single `integrate` call may take.
pub const MAX_STEPS: usize = 10_000_000;

/// Number of equal steps covering `horizon` with steps no longer than `step_hint`.
pub fn step_count(horizon: f64, step_hint: f64) -> Result<usize> {
    if !(horizon.is_finite() && horizon > 0.0) {
        bail!("Integration horizon must be positive and finite (got {horizon}).");
    }
    if !(step_hint.is_finite() && step_hint > 0.0) {
        bail!("Step size hint must be positive and finite (got {step_hint}).");
    }
    let steps = (horizon / step_hint).ceil();
    if steps > MAX_STEPS as f64 {
        bail!(
            "Step size hint {step_hint} needs {steps:e} steps to cover horizon {horizon}; at most {MAX_STEPS} are allowed."
        );
    }
    Ok((steps as usize).max(1))
}

/// Advances `state` from `t0` over `horizon` time units.
///
/// Uses `ceil(horizon / step_hint)` equal steps so the endpoint is reached exactly.
/// Returns the final time.
pub fn integrate<S: DynamicalSystem<f64>>(
    system: &S,
    integrator: Integrator,
    state: &mut [f64],
    t0: f64,
    horizon: f64,
    step_hint: f64,
) -> Result<f64> {
    let steps = step_count(horizon, step_hint)?;
    if state.len() != system.dimension() {
        bail!(
            "State dimension mismatch. Expected {}, got {}.",
            system.dimension(),
            state.len()
        );
    }

    let dt = horizon / steps as f64;
    let mut stepper = integrator.build::<f64>(state.len());
    let mut t = t0;

    for _ in 0..steps {
        stepper.step(system, &mut t, state, dt);
        if state.iter().any(|v| !v.is_finite()) {
            bail!("Integration diverged at t = {t}: state became non-finite.");
        }
    }

    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::{integrate, step_count, Integrator, MAX_STEPS, RK4_TABLEAU, TSIT5_TABLEAU};
    use crate::traits::DynamicalSystem;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * x[0];
        }
    }

    struct Blowup;

    impl DynamicalSystem<f64> for Blowup {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn tableaux_are_consistent() {
        for tableau in [&RK4_TABLEAU, &TSIT5_TABLEAU] {
            let weight_sum: f64 = tableau.b.iter().sum();
            assert!((weight_sum - 1.0).abs() < 1e-12);
            assert_eq!(tableau.a.len(), tableau.stages());
            assert_eq!(tableau.c.len(), tableau.stages());
            for (row, &c) in tableau.a.iter().zip(tableau.c) {
                let row_sum: f64 = row.iter().sum();
                // Published Tsit5 coefficients satisfy row-sum = c only to ~5e-7.
                assert!((row_sum - c).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn both_integrators_track_exponential_decay() {
        let system = Decay { rate: 1.5 };
        let expected = (-1.5_f64).exp();
        for integrator in [Integrator::Rk4, Integrator::Tsit5] {
            let mut state = [1.0];
            let t = integrate(&system, integrator, &mut state, 0.0, 1.0, 0.01)
                .expect("integration should succeed");
            assert!((t - 1.0).abs() < 1e-12);
            assert!((state[0] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn non_dividing_step_hint_still_lands_on_horizon() {
        let system = Decay { rate: 1.0 };
        let mut state = [2.0];
        let t = integrate(&system, Integrator::Rk4, &mut state, 3.0, 1.0, 0.3)
            .expect("integration should succeed");
        assert!((t - 4.0).abs() < 1e-12);
        assert!((state[0] - 2.0 * (-1.0_f64).exp()).abs() < 1e-3);
    }

    #[test]
    fn integrate_rejects_invalid_inputs() {
        let system = Decay { rate: 1.0 };
        assert_err_contains(
            integrate(&system, Integrator::Rk4, &mut [1.0], 0.0, 0.0, 0.01),
            "horizon",
        );
        assert_err_contains(
            integrate(&system, Integrator::Rk4, &mut [1.0], 0.0, 1.0, -0.1),
            "Step size hint",
        );
        assert_err_contains(
            integrate(&system, Integrator::Rk4, &mut [1.0, 2.0], 0.0, 1.0, 0.1),
            "dimension mismatch",
        );
    }

    #[test]
    fn tiny_step_hint_is_rejected_instead_of_looping() {
        let system = Decay { rate: 1.0 };
        assert_err_contains(
            integrate(&system, Integrator::Rk4, &mut [1.0], 0.0, 1.0, 1e-300),
            "at most",
        );
        assert!(step_count(1.0, 1e-6).expect("within the limit") <= MAX_STEPS);
        assert_eq!(step_count(1.0, 0.3).expect("valid"), 4);
        assert_eq!(step_count(0.5, 2.0).expect("valid"), 1);
    }

    #[test]
    fn integrate_reports_finite_time_blowup() {
        let mut state = [1.0];
        assert_err_contains(
            integrate(&Blowup, Integrator::Rk4, &mut state, 0.0, 5.0, 0.01),
            "non-finite",
        );
    }
}
