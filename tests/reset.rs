//! Reset semantics: idempotence, partial rewind, and re-recording over
//! retained chunk capacity.

use approx::assert_relative_eq;
use pangolin::linear_tape;
use pangolin::{with_active_tape, Active, LinearTape, ReuseTape, TapeGuard};

type LVar = Active<LinearTape<f64>>;
type RVar = Active<ReuseTape<f64>>;

/// Records `y = x * x` on the installed tape and sweeps it.
fn record_square() -> f64 {
    let mut x = LVar::new(3.0);
    x.register_input();
    let y = &x * &x;
    y.set_gradient(1.0);
    with_active_tape::<LinearTape<f64>, _>(|tape| tape.evaluate());
    x.gradient()
}

#[test]
fn reset_is_idempotent_and_equivalent_to_fresh() {
    let mut tape = LinearTape::<f64>::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let first = record_square();
    assert_relative_eq!(first, 6.0, max_relative = 1e-12);

    tape.reset();
    tape.reset();
    assert_eq!(tape.position(), linear_tape::Position::default());
    assert_eq!(tape.used_statements(), 0);
    assert_eq!(tape.used_data_entries(), 0);
    assert_eq!(tape.adjoints_size(), 1);
    assert_eq!(tape.get_gradient(1), 0.0);

    // a second recording over the retained chunks behaves like the first
    let second = record_square();
    assert_relative_eq!(second, first, max_relative = 1e-12);
}

#[test]
fn partial_reset_rewinds_to_the_captured_position() {
    let mut tape = LinearTape::<f64>::with_chunk_sizes(8, 8, 8);
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = LVar::new(2.0);
    x.register_input();
    let a = &x * &x;
    let pos = tape.position();
    let statements_at_pos = tape.used_statements();
    let data_at_pos = tape.used_data_entries();

    // record a tail that will be discarded, long enough to roll chunks
    let mut t = a.clone();
    for _ in 0..20 {
        t = &t * &x;
    }
    assert!(tape.used_statements() > statements_at_pos);

    tape.reset_to(pos);
    assert_eq!(tape.position(), pos);
    assert_eq!(tape.used_statements(), statements_at_pos);
    assert_eq!(tape.used_data_entries(), data_at_pos);

    // recording continues from the rewound position
    let b = &a * 5.0;
    b.set_gradient(1.0);
    tape.evaluate();
    // db/dx = 5 * 2x = 20
    assert_relative_eq!(x.gradient(), 20.0, max_relative = 1e-12);
}

#[test]
fn reset_zeroes_seeded_adjoints() {
    let mut tape = LinearTape::<f64>::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = LVar::new(1.0);
    x.register_input();
    let y = &x * &x;
    y.set_gradient(4.0);
    x.set_gradient(2.0);

    tape.reset();
    assert_eq!(tape.get_gradient(1), 0.0);
    assert_eq!(tape.get_gradient(2), 0.0);
}

#[test]
fn clear_adjoints_between_touches_only_the_issued_range() {
    let mut tape = LinearTape::<f64>::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = LVar::new(1.0);
    x.register_input();
    let a = &x * &x;
    let mid = tape.position();
    let b = &a * &x;

    x.set_gradient(1.0);
    a.set_gradient(2.0);
    b.set_gradient(3.0);

    let top = tape.position();
    tape.clear_adjoints_between(top, mid);
    // the seed below the cleared counter range survives
    assert_eq!(b.gradient(), 0.0);
    assert_eq!(x.gradient(), 1.0);
}

#[test]
fn reuse_reset_supports_re_recording() {
    let mut tape = ReuseTape::<f64>::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    {
        let mut x = RVar::new(2.0);
        x.register_input();
        let y = &x * &x;
        y.set_gradient(1.0);
        tape.evaluate();
        assert_relative_eq!(x.gradient(), 4.0, max_relative = 1e-12);
    }

    tape.reset();
    assert_eq!(tape.max_global_index(), 0);
    assert_eq!(tape.used_statements(), 0);

    let mut x = RVar::new(5.0);
    x.register_input();
    let y = &x * &x;
    y.set_gradient(1.0);
    tape.evaluate();
    assert_relative_eq!(x.gradient(), 10.0, max_relative = 1e-12);
}
