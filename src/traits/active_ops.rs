//! `std::ops` implementations for [`Active<T>`].
//!
//! Each operator records one statement on the installed tape through the
//! general expression store; partials are computed during the forward
//! evaluation of the operator.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{Float as _, One as _};

use crate::active::Active;
use crate::expr::{Binary, Unary};
use crate::tape::{ReverseTape, TapeThreadLocal};

#[inline]
fn binary_op<T: TapeThreadLocal>(
    lhs: &Active<T>,
    rhs: &Active<T>,
    value: T::Real,
    lhs_partial: T::Real,
    rhs_partial: T::Real,
) -> Active<T> {
    Active::from_expr(Binary::new(
        lhs.operand(),
        rhs.operand(),
        value,
        lhs_partial,
        rhs_partial,
    ))
}

// ──────────────────────────────────────────────
//  Active<T> ↔ Active<T> operators
// ──────────────────────────────────────────────

impl<'a, T: TapeThreadLocal> Add for &'a Active<T> {
    type Output = Active<T>;
    #[inline]
    fn add(self, rhs: Self) -> Active<T> {
        let one = T::Real::one();
        binary_op(self, rhs, self.value() + rhs.value(), one, one)
    }
}

impl<'a, T: TapeThreadLocal> Sub for &'a Active<T> {
    type Output = Active<T>;
    #[inline]
    fn sub(self, rhs: Self) -> Active<T> {
        let one = T::Real::one();
        binary_op(self, rhs, self.value() - rhs.value(), one, -one)
    }
}

impl<'a, T: TapeThreadLocal> Mul for &'a Active<T> {
    type Output = Active<T>;
    #[inline]
    fn mul(self, rhs: Self) -> Active<T> {
        binary_op(
            self,
            rhs,
            self.value() * rhs.value(),
            rhs.value(),
            self.value(),
        )
    }
}

impl<'a, T: TapeThreadLocal> Div for &'a Active<T> {
    type Output = Active<T>;
    #[inline]
    fn div(self, rhs: Self) -> Active<T> {
        let inv = rhs.value().recip();
        binary_op(
            self,
            rhs,
            self.value() * inv,
            inv,
            -(self.value() * inv * inv),
        )
    }
}

impl<'a, T: TapeThreadLocal> Neg for &'a Active<T> {
    type Output = Active<T>;
    #[inline]
    fn neg(self) -> Active<T> {
        Active::from_expr(Unary::new(
            self.operand(),
            -self.value(),
            -T::Real::one(),
        ))
    }
}

impl<T: TapeThreadLocal> Neg for Active<T> {
    type Output = Active<T>;
    #[inline]
    fn neg(self) -> Active<T> {
        -&self
    }
}

// Owned and mixed-ownership variants delegate to the reference impls.
macro_rules! forward_binop {
    ($op:ident, $method:ident) => {
        impl<T: TapeThreadLocal> $op for Active<T> {
            type Output = Active<T>;
            #[inline]
            fn $method(self, rhs: Self) -> Active<T> {
                (&self).$method(&rhs)
            }
        }

        impl<'a, T: TapeThreadLocal> $op<&'a Active<T>> for Active<T> {
            type Output = Active<T>;
            #[inline]
            fn $method(self, rhs: &'a Active<T>) -> Active<T> {
                (&self).$method(rhs)
            }
        }

        impl<'a, T: TapeThreadLocal> $op<Active<T>> for &'a Active<T> {
            type Output = Active<T>;
            #[inline]
            fn $method(self, rhs: Active<T>) -> Active<T> {
                self.$method(&rhs)
            }
        }
    };
}

forward_binop!(Add, add);
forward_binop!(Sub, sub);
forward_binop!(Mul, mul);
forward_binop!(Div, div);

// Assign variants delegate to the binary ops; the overwritten value runs its
// destroy hook through the regular drop path.
macro_rules! forward_assign {
    ($op:ident, $method:ident, $binop:tt) => {
        impl<T: TapeThreadLocal> $op for Active<T> {
            #[inline]
            fn $method(&mut self, rhs: Self) {
                *self = &*self $binop &rhs;
            }
        }

        impl<'a, T: TapeThreadLocal> $op<&'a Active<T>> for Active<T> {
            #[inline]
            fn $method(&mut self, rhs: &'a Active<T>) {
                *self = &*self $binop rhs;
            }
        }
    };
}

forward_assign!(AddAssign, add_assign, +);
forward_assign!(SubAssign, sub_assign, -);
forward_assign!(MulAssign, mul_assign, *);
forward_assign!(DivAssign, div_assign, /);

// ──────────────────────────────────────────────
//  Mixed ops: Active<T> with primitive floats
// ──────────────────────────────────────────────

macro_rules! impl_active_scalar_ops {
    ($f:ty) => {
        impl<'a, T> Add<$f> for &'a Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn add(self, rhs: $f) -> Active<T> {
                Active::from_expr(Unary::new(self.operand(), self.value() + rhs, 1.0))
            }
        }

        impl<'a, T> Add<&'a Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn add(self, rhs: &'a Active<T>) -> Active<T> {
                Active::from_expr(Unary::new(rhs.operand(), self + rhs.value(), 1.0))
            }
        }

        impl<'a, T> Sub<$f> for &'a Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn sub(self, rhs: $f) -> Active<T> {
                Active::from_expr(Unary::new(self.operand(), self.value() - rhs, 1.0))
            }
        }

        impl<'a, T> Sub<&'a Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn sub(self, rhs: &'a Active<T>) -> Active<T> {
                Active::from_expr(Unary::new(rhs.operand(), self - rhs.value(), -1.0))
            }
        }

        impl<'a, T> Mul<$f> for &'a Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn mul(self, rhs: $f) -> Active<T> {
                Active::from_expr(Unary::new(self.operand(), self.value() * rhs, rhs))
            }
        }

        impl<'a, T> Mul<&'a Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn mul(self, rhs: &'a Active<T>) -> Active<T> {
                Active::from_expr(Unary::new(rhs.operand(), self * rhs.value(), self))
            }
        }

        impl<'a, T> Div<$f> for &'a Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn div(self, rhs: $f) -> Active<T> {
                let inv = rhs.recip();
                Active::from_expr(Unary::new(self.operand(), self.value() * inv, inv))
            }
        }

        impl<'a, T> Div<&'a Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn div(self, rhs: &'a Active<T>) -> Active<T> {
                let inv = rhs.value().recip();
                Active::from_expr(Unary::new(
                    rhs.operand(),
                    self * inv,
                    -(self * inv * inv),
                ))
            }
        }

        // Owned variants.
        impl<T> Add<$f> for Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn add(self, rhs: $f) -> Active<T> {
                &self + rhs
            }
        }

        impl<T> Add<Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn add(self, rhs: Active<T>) -> Active<T> {
                self + &rhs
            }
        }

        impl<T> Sub<$f> for Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn sub(self, rhs: $f) -> Active<T> {
                &self - rhs
            }
        }

        impl<T> Sub<Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn sub(self, rhs: Active<T>) -> Active<T> {
                self - &rhs
            }
        }

        impl<T> Mul<$f> for Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn mul(self, rhs: $f) -> Active<T> {
                &self * rhs
            }
        }

        impl<T> Mul<Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn mul(self, rhs: Active<T>) -> Active<T> {
                self * &rhs
            }
        }

        impl<T> Div<$f> for Active<T>
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn div(self, rhs: $f) -> Active<T> {
                &self / rhs
            }
        }

        impl<T> Div<Active<T>> for $f
        where
            T: TapeThreadLocal + ReverseTape<Real = $f>,
        {
            type Output = Active<T>;
            #[inline]
            fn div(self, rhs: Active<T>) -> Active<T> {
                self / &rhs
            }
        }
    };
}

impl_active_scalar_ops!(f32);
impl_active_scalar_ops!(f64);
