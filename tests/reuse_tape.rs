//! Recording, index recycling, and reverse-evaluation behavior of the
//! index-reuse tape.

use approx::assert_relative_eq;
use pangolin::{Active, ReuseTape, TapeGuard};

type Tape = ReuseTape<f64>;
type Var = Active<Tape>;

#[test]
fn chain_rule_three_variables() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(3.0);
    x.register_input();
    let a = x.clone();
    let b = &x * &x;
    let c = &a + &b;

    c.set_gradient(1.0);
    tape.evaluate();
    assert_relative_eq!(x.gradient(), 7.0, max_relative = 1e-12);
}

#[test]
fn copies_get_their_own_slot_and_a_unit_statement() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(2.0);
    x.register_input();
    let a = x.clone();
    let b = a.clone();

    assert_ne!(b.index(), a.index());
    assert_ne!(a.index(), x.index());
    assert_eq!(tape.used_statements(), 2);
    assert_eq!(tape.used_data_entries(), 2);

    b.set_gradient(1.0);
    tape.evaluate();
    assert_relative_eq!(x.gradient(), 1.0, max_relative = 1e-12);
}

#[test]
fn live_indices_are_unique() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(1.5);
    x.register_input();
    let values: Vec<Var> = (0..16).map(|_| &x * &x).collect();

    let mut indices: Vec<u32> = values.iter().map(|v| v.index()).collect();
    indices.push(x.index());
    indices.sort_unstable();
    let before = indices.len();
    indices.dedup();
    assert_eq!(indices.len(), before);
    assert!(indices.iter().all(|&i| i != 0));
}

#[test]
fn dead_values_recycle_their_indices() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(1.0);
    x.register_input();
    for _ in 0..1000 {
        let y = &x * &x;
        assert_ne!(y.index(), 0);
    }
    // peak live population is two: the input and one temporary
    assert!(tape.max_global_index() <= 2);
}

#[test]
fn reverse_sweep_consumes_lhs_adjoints() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(2.0);
    x.register_input();
    let y = &x * &x;
    let z = &y + &x;

    z.set_gradient(1.0);
    tape.evaluate();
    // dz/dx = 2x + 1 = 5; intermediate adjoints were read and zeroed
    assert_relative_eq!(x.gradient(), 5.0, max_relative = 1e-12);
    assert_eq!(y.gradient(), 0.0);
    assert_eq!(z.gradient(), 0.0);
}

#[test]
fn passive_stores_free_the_index() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(1.0);
    x.register_input();
    let mut a = x.clone();
    let freed = a.index();
    assert_ne!(freed, 0);

    a.assign_passive(3.14);
    assert_eq!(a.index(), 0);

    // the freed index is handed out again before the high-water mark moves
    let b = x.clone();
    assert_eq!(b.index(), freed);
}

#[test]
fn inactive_tape_frees_on_store() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(2.0);
    x.register_input();
    let mut a = x.clone();
    assert_ne!(a.index(), 0);

    tape.set_passive();
    let statements = tape.used_statements();
    a.assign_copy(&x);
    assert_eq!(a.index(), 0);
    assert_eq!(tape.used_statements(), statements);
}

#[test]
fn register_input_reuses_a_held_index() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(1.0);
    x.register_input();
    let held = x.index();
    assert_ne!(held, 0);

    // registering again keeps the allocated slot
    x.register_input();
    assert_eq!(x.index(), held);
}

#[test]
fn partial_reset_keeps_the_index_handler() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    let mut x = Var::new(1.0);
    x.register_input();
    let a = &x * &x;
    let pos = tape.position();
    let _b = &a * &x;
    let _c = &a + &x;

    let high_water = tape.max_global_index();
    tape.reset_to(pos);
    // live values still hold their indices, so the handler must not rewind
    assert_eq!(tape.max_global_index(), high_water);
    assert_eq!(tape.position(), pos);
}

#[test]
fn full_reset_rewinds_the_index_handler() {
    let mut tape = Tape::new();
    tape.set_active();
    let _guard = TapeGuard::new(&mut tape);

    {
        let mut x = Var::new(1.0);
        x.register_input();
        let _y = &x * &x;
    }
    assert!(tape.max_global_index() > 0);

    tape.reset();
    assert_eq!(tape.max_global_index(), 0);
    assert_eq!(tape.used_statements(), 0);
    assert_eq!(tape.used_data_entries(), 0);
}
