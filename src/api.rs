//! Whole-program gradient drivers over the linear tape.
//!
//! These cover the common record-once-sweep-once use: register the inputs,
//! run the program under a [`TapeGuard`], seed the outputs, evaluate, and
//! read the input adjoints back.

use crate::active::Active;
use crate::float::Float;
use crate::linear_tape::LinearTape;
use crate::tape::{with_active_tape, ReverseTape, TapeGuard, TapeThreadLocal};

/// Compute the gradient of a scalar function `f : R^n → R` by recording one
/// forward pass and sweeping it in reverse.
///
/// ```
/// let g = pangolin::grad(|x| &x[0] * &x[0] + &x[1] * &x[1], &[3.0_f64, 4.0]);
/// assert!((g[0] - 6.0).abs() < 1e-12);
/// assert!((g[1] - 8.0).abs() < 1e-12);
/// ```
pub fn grad<F: Float>(
    f: impl FnOnce(&[Active<LinearTape<F>>]) -> Active<LinearTape<F>>,
    x: &[F],
) -> Vec<F>
where
    LinearTape<F>: TapeThreadLocal + ReverseTape<Real = F>,
{
    let mut tape = LinearTape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let inputs: Vec<Active<LinearTape<F>>> = x
        .iter()
        .map(|&value| {
            let mut input = Active::new(value);
            input.register_input();
            input
        })
        .collect();

    let output = f(&inputs);
    output.set_gradient(F::one());
    with_active_tape::<LinearTape<F>, _>(|tape| tape.evaluate());

    inputs.iter().map(|input| input.gradient()).collect()
}

/// Vector-Jacobian product: `(f(x), wᵀ·J)`.
///
/// Evaluates `f` at `x` and propagates the weights `w` backward through the
/// recorded program.
pub fn vjp<F: Float>(
    f: impl FnOnce(&[Active<LinearTape<F>>]) -> Vec<Active<LinearTape<F>>>,
    x: &[F],
    w: &[F],
) -> (Vec<F>, Vec<F>)
where
    LinearTape<F>: TapeThreadLocal + ReverseTape<Real = F>,
{
    let mut tape = LinearTape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let inputs: Vec<Active<LinearTape<F>>> = x
        .iter()
        .map(|&value| {
            let mut input = Active::new(value);
            input.register_input();
            input
        })
        .collect();

    let outputs = f(&inputs);
    assert_eq!(
        outputs.len(),
        w.len(),
        "output length must match weight vector length"
    );

    let values: Vec<F> = outputs.iter().map(|output| output.value()).collect();
    for (output, &weight) in outputs.iter().zip(w) {
        output.set_gradient(weight);
    }
    with_active_tape::<LinearTape<F>, _>(|tape| tape.evaluate());

    let gradient = inputs.iter().map(|input| input.gradient()).collect();
    (values, gradient)
}
