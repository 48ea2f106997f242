//! The operator-overloaded scalar that drives a tape.
//!
//! An [`Active`] value is a primal plus a non-owning adjoint-slot handle —
//! 12 bytes for `f64`. The tape lives behind a thread-local installed by
//! [`crate::TapeGuard`]; every operator and assignment records through it.
//! Construction starts passive (index 0), destruction runs the tape's
//! destroy hook so index-reuse tapes can recycle the slot.

use std::fmt::{self, Debug, Display};

use num_traits::{Float as _, NumCast, One as _};

use crate::expr::{Expression, Operand, Unary};
use crate::tape::{try_with_tape, with_active_tape, TapeThreadLocal};
use crate::Index;

/// A numeric value whose assignments are recorded on a tape of type `T`.
pub struct Active<T: TapeThreadLocal> {
    value: T::Real,
    index: Index,
}

impl<T: TapeThreadLocal> Active<T> {
    /// Lift a passive value. Nothing is recorded until it is assigned to or
    /// registered as an input.
    pub fn new(value: T::Real) -> Self {
        let mut index = 0;
        try_with_tape::<T, _>(|tape| tape.init_gradient_data(&mut index));
        Active { value, index }
    }

    /// The primal value.
    pub fn value(&self) -> T::Real {
        self.value
    }

    /// The adjoint-slot handle; 0 while passive.
    pub fn index(&self) -> Index {
        self.index
    }

    /// Snapshot of this value as an expression leaf.
    pub fn operand(&self) -> Operand<T::Real> {
        Operand::new(self.value, self.index)
    }

    /// Record a fresh value assigned from an expression.
    pub fn from_expr<E: Expression<Real = T::Real>>(rhs: E) -> Self {
        let mut out = Active {
            value: rhs.value(),
            index: 0,
        };
        with_active_tape::<T, _>(|tape| tape.store(&mut out.value, &mut out.index, &rhs));
        out
    }

    /// Record `self = rhs` for an expression right-hand side.
    pub fn assign<E: Expression<Real = T::Real>>(&mut self, rhs: &E) {
        with_active_tape::<T, _>(|tape| tape.store(&mut self.value, &mut self.index, rhs));
    }

    /// Record `self = rhs` for another active value.
    pub fn assign_copy(&mut self, rhs: &Active<T>) {
        with_active_tape::<T, _>(|tape| {
            tape.store_copy(&mut self.value, &mut self.index, rhs.value, rhs.index)
        });
    }

    /// Record `self = c` for a passive constant.
    pub fn assign_passive(&mut self, rhs: T::Real) {
        with_active_tape::<T, _>(|tape| tape.store_passive(&mut self.value, &mut self.index, rhs));
    }

    /// Mark this value as an externally sourced independent input.
    pub fn register_input(&mut self) {
        with_active_tape::<T, _>(|tape| tape.register_input(&mut self.index));
    }

    /// Mark this value as a dependent output. Reserved; currently a no-op.
    pub fn register_output(&mut self) {
        with_active_tape::<T, _>(|tape| tape.register_output(&mut self.index));
    }

    /// Read this value's adjoint from the installed tape.
    pub fn gradient(&self) -> T::Real {
        with_active_tape::<T, _>(|tape| tape.get_gradient(self.index))
    }

    /// Seed this value's adjoint on the installed tape. Dropped silently
    /// while passive.
    pub fn set_gradient(&self, gradient: T::Real) {
        with_active_tape::<T, _>(|tape| tape.set_gradient(self.index, gradient));
    }

    fn unary(&self, value: T::Real, partial: T::Real) -> Active<T> {
        Active::from_expr(Unary::new(self.operand(), value, partial))
    }

    pub fn sin(&self) -> Active<T> {
        self.unary(self.value.sin(), self.value.cos())
    }

    pub fn cos(&self) -> Active<T> {
        self.unary(self.value.cos(), -self.value.sin())
    }

    pub fn exp(&self) -> Active<T> {
        let exp = self.value.exp();
        self.unary(exp, exp)
    }

    pub fn ln(&self) -> Active<T> {
        self.unary(self.value.ln(), self.value.recip())
    }

    pub fn sqrt(&self) -> Active<T> {
        let root = self.value.sqrt();
        let two = T::Real::one() + T::Real::one();
        self.unary(root, (two * root).recip())
    }

    pub fn recip(&self) -> Active<T> {
        let inv = self.value.recip();
        self.unary(inv, -(inv * inv))
    }

    pub fn powi(&self, n: i32) -> Active<T> {
        let value = self.value.powi(n);
        let partial = <T::Real as NumCast>::from(n).unwrap() * self.value.powi(n - 1);
        self.unary(value, partial)
    }
}

impl<T: TapeThreadLocal> Clone for Active<T> {
    /// Cloning is the copy-assignment of the recording contract: the linear
    /// tape aliases the source's slot, the reuse tape forwards through a
    /// unit statement.
    fn clone(&self) -> Self {
        let mut out = Active {
            value: self.value,
            index: 0,
        };
        try_with_tape::<T, _>(|tape| {
            tape.store_copy(&mut out.value, &mut out.index, self.value, self.index)
        });
        out
    }
}

impl<T: TapeThreadLocal> Drop for Active<T> {
    fn drop(&mut self) {
        if self.index != 0 {
            let mut index = self.index;
            try_with_tape::<T, _>(|tape| tape.destroy_gradient_data(&mut index));
        }
    }
}

impl<T: TapeThreadLocal> Display for Active<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T: TapeThreadLocal> Debug for Active<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Active")
            .field("value", &self.value)
            .field("index", &self.index)
            .finish()
    }
}
