//! The whole-program drivers against finite differences and closed forms.

use approx::assert_relative_eq;
use pangolin::{grad, vjp, Active, LinearTape};

type Var = Active<LinearTape<f64>>;

/// Central finite difference gradient.
fn finite_diff_grad(f: impl Fn(&[f64]) -> f64, x: &[f64], h: f64) -> Vec<f64> {
    let n = x.len();
    let mut grad = vec![0.0; n];
    for i in 0..n {
        let mut xp = x.to_vec();
        let mut xm = x.to_vec();
        xp[i] += h;
        xm[i] -= h;
        grad[i] = (f(&xp) - f(&xm)) / (2.0 * h);
    }
    grad
}

fn rosenbrock_f64(x: &[f64]) -> f64 {
    let mut sum = 0.0;
    for i in 0..x.len() - 1 {
        let t1 = 1.0 - x[i];
        let t2 = x[i + 1] - x[i] * x[i];
        sum += t1 * t1 + 100.0 * t2 * t2;
    }
    sum
}

fn rosenbrock_active(x: &[Var]) -> Var {
    let mut sum = Var::new(0.0);
    for i in 0..x.len() - 1 {
        let t1 = 1.0 - &x[i];
        let t2 = &x[i + 1] - &(&x[i] * &x[i]);
        sum = sum + &t1 * &t1 + 100.0 * (&t2 * &t2);
    }
    sum
}

#[test]
fn grad_simple_quadratic() {
    let g = grad(|x| &x[0] * &x[0] + &x[1] * &x[1], &[3.0, 4.0]);
    assert_relative_eq!(g[0], 6.0, max_relative = 1e-12);
    assert_relative_eq!(g[1], 8.0, max_relative = 1e-12);
}

#[test]
fn grad_matches_finite_differences_on_rosenbrock() {
    let x = [1.2, 0.8, -0.5, 1.4];
    let analytic = grad(rosenbrock_active, &x);
    let numeric = finite_diff_grad(rosenbrock_f64, &x, 1e-6);
    for (&a, &n) in analytic.iter().zip(numeric.iter()) {
        assert_relative_eq!(a, n, max_relative = 1e-5);
    }
}

#[test]
fn grad_with_transcendental_functions() {
    let x = [0.7_f64, 1.3];
    let g = grad(|v| v[0].sin() * &v[1] + v[1].ln(), &x);
    assert_relative_eq!(g[0], x[0].cos() * x[1], max_relative = 1e-12);
    assert_relative_eq!(g[1], x[0].sin() + 1.0 / x[1], max_relative = 1e-12);
}

#[test]
fn grad_with_integer_powers() {
    let x = [1.3_f64, 0.7];
    let g = grad(|v| v[0].powi(3) + v[1].powi(-2), &x);
    assert_relative_eq!(g[0], 3.0 * x[0].powi(2), max_relative = 1e-12);
    assert_relative_eq!(g[1], -2.0 * x[1].powi(-3), max_relative = 1e-12);
}

#[test]
fn grad_f32_uses_its_own_thread_local() {
    let g = grad(|x| &x[0] * &x[0] + &x[1] * &x[1], &[3.0_f32, 4.0]);
    assert_relative_eq!(g[0], 6.0_f32, max_relative = 1e-5);
    assert_relative_eq!(g[1], 8.0_f32, max_relative = 1e-5);
}

#[test]
fn vjp_weights_multiple_outputs() {
    let (values, gradient) = vjp(
        |x| vec![&x[0] * &x[1], &x[0] + &x[1]],
        &[3.0, 5.0],
        &[1.0, 2.0],
    );
    assert_relative_eq!(values[0], 15.0, max_relative = 1e-12);
    assert_relative_eq!(values[1], 8.0, max_relative = 1e-12);
    // w0 * d(xy) + w1 * d(x+y)
    assert_relative_eq!(gradient[0], 5.0 + 2.0, max_relative = 1e-12);
    assert_relative_eq!(gradient[1], 3.0 + 2.0, max_relative = 1e-12);
}

#[test]
fn grad_of_constant_function_is_zero() {
    let g = grad(|_| Var::new(42.0), &[1.0, 2.0]);
    assert_eq!(g, vec![0.0, 0.0]);
}

#[test]
fn sequential_grad_calls_are_independent() {
    let g1 = grad(|x| &x[0] * &x[1], &[3.0, 5.0]);
    let g2 = grad(|x| x[0].exp() + x[1].sqrt(), &[1.0, 4.0]);
    assert_relative_eq!(g1[0], 5.0, max_relative = 1e-12);
    assert_relative_eq!(g1[1], 3.0, max_relative = 1e-12);
    assert_relative_eq!(g2[0], 1.0_f64.exp(), max_relative = 1e-12);
    assert_relative_eq!(g2[1], 0.25, max_relative = 1e-12);
}
