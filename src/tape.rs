//! The recording contract shared by the tape variants, and the thread-local
//! plumbing that lets [`crate::Active`] values find their tape.

use std::cell::Cell;
use std::thread::LocalKey;

use crate::expr::Expression;
use crate::float::Float;
use crate::Index;

/// Callbacks a tape serves to its active values.
///
/// Implemented by [`crate::LinearTape`] and [`crate::ReuseTape`]; the two
/// differ in their index policies but share this surface.
pub trait ReverseTape: Sized + 'static {
    type Real: Float;

    /// Record `lhs = rhs` for a general expression right-hand side.
    fn store<E: Expression<Real = Self::Real>>(
        &mut self,
        lhs_value: &mut Self::Real,
        lhs_index: &mut Index,
        rhs: &E,
    );

    /// Record `lhs = rhs` where the right-hand side is a single active value.
    fn store_copy(
        &mut self,
        lhs_value: &mut Self::Real,
        lhs_index: &mut Index,
        rhs_value: Self::Real,
        rhs_index: Index,
    );

    /// Record `lhs = c` for a passive right-hand side.
    fn store_passive(&mut self, lhs_value: &mut Self::Real, lhs_index: &mut Index, rhs: Self::Real);

    /// Hook run when an active value is constructed.
    fn init_gradient_data(&mut self, index: &mut Index);

    /// Hook run when an active value is destroyed.
    fn destroy_gradient_data(&mut self, index: &mut Index);

    /// Mark an externally sourced value as an independent input.
    fn register_input(&mut self, index: &mut Index);

    /// Mark a value as a dependent output. Reserved; currently a no-op.
    fn register_output(&mut self, _index: &mut Index) {}

    /// Write the adjoint of `index`, ignoring the passive sentinel.
    fn set_gradient(&mut self, index: Index, gradient: Self::Real);

    /// Read the adjoint of `index`; neutral for unallocated slots.
    fn get_gradient(&self, index: Index) -> Self::Real;

    /// Whether assignments are currently being recorded.
    fn is_active(&self) -> bool;
}

/// Selects the thread-local slot holding the installed tape of type `Self`.
///
/// Each tape monomorphisation has its own slot, so a linear and a reuse tape
/// (or an `f32` and an `f64` tape) can be installed side by side.
pub trait TapeThreadLocal: ReverseTape {
    fn cell() -> &'static LocalKey<Cell<*mut Self>>;
}

/// Run `f` with the installed tape of type `T`.
///
/// # Panics
///
/// Panics if no tape of this type is installed; create a [`TapeGuard`] first.
#[inline]
pub fn with_active_tape<T: TapeThreadLocal, R>(f: impl FnOnce(&mut T) -> R) -> R {
    T::cell().with(|cell| {
        let ptr = cell.get();
        assert!(
            !ptr.is_null(),
            "no tape installed for this thread; create a TapeGuard first"
        );
        // SAFETY: the TapeGuard keeps the pointer valid while installed, and
        // the cell is thread-local, so no aliasing mutable reference exists.
        let tape = unsafe { &mut *ptr };
        f(tape)
    })
}

/// Like [`with_active_tape`], but a no-op returning `None` when no tape is
/// installed. Used by active-value destructors, which may outlive the guard.
#[inline]
pub(crate) fn try_with_tape<T: TapeThreadLocal, R>(f: impl FnOnce(&mut T) -> R) -> Option<R> {
    T::cell().with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return None;
        }
        // SAFETY: as in with_active_tape.
        let tape = unsafe { &mut *ptr };
        Some(f(tape))
    })
}

/// RAII guard that installs a tape as the thread-local tape of its type and
/// restores the previous one on drop.
pub struct TapeGuard<T: TapeThreadLocal> {
    prev: *mut T,
}

impl<T: TapeThreadLocal> TapeGuard<T> {
    /// Install `tape` for the current thread.
    pub fn new(tape: &mut T) -> Self {
        let prev = T::cell().with(|cell| {
            let prev = cell.get();
            cell.set(tape as *mut T);
            prev
        });
        TapeGuard { prev }
    }
}

impl<T: TapeThreadLocal> Drop for TapeGuard<T> {
    fn drop(&mut self) {
        T::cell().with(|cell| {
            cell.set(self.prev);
        });
    }
}
