use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for the base floating-point types (`f32`, `f64`) stored on
/// tapes and in adjoint vectors.
///
/// Bundles the numeric and utility traits the tape machinery relies on.
/// Only primitive floats implement this; [`crate::Active`] does not.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}
