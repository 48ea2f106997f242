//! Compile-time tuning constants.
//!
//! All of these are folded into the recording and evaluation loops at
//! monomorphisation time; changing one is a rebuild, not a runtime switch.

/// Rows per chunk for jacobian and statement streams created by `new()`.
///
/// Large recordings should call `resize` or the chunk-size setters up front;
/// tests that exercise chunk boundaries construct tapes via
/// `with_chunk_sizes` instead.
pub const DEFAULT_CHUNK_SIZE: usize = 32768;

/// Rows per chunk for external-function records created by `new()`.
pub const DEFAULT_EXTERNAL_FUNCTION_CHUNK_SIZE: usize = 1000;

/// Honor `set_passive`: when false, tapes record unconditionally and the
/// activity flag is ignored.
pub const OPT_TAPE_ACTIVITY: bool = true;

/// Skip a statement's jacobian walk during reverse evaluation when its
/// adjoint is zero.
pub const OPT_ZERO_ADJOINT: bool = true;

/// Drop exact-zero partials at `push_jacobi`.
pub const OPT_JACOBI_IS_ZERO: bool = true;

/// Drop non-finite partials at `push_jacobi`.
pub const OPT_IGNORE_INVALID_JACOBIANS: bool = true;

/// Upper bound on the operand count of a single statement; must fit
/// [`crate::StatementInt`].
pub const MAX_STATEMENT_ARGS: usize = u16::MAX as usize;
