//! Linear-index chunk tape: every recorded assignment gets a fresh,
//! monotonically increasing adjoint index.
//!
//! Three chunked streams nest over a statement counter:
//!
//! ```text
//! external functions -> statements -> jacobians -> statement counter
//! ```
//!
//! A statement stores only its operand count; its left-hand-side index is
//! implicit, because statements are numbered consecutively by the counter.
//! Copy assignments store nothing at all — the copy aliases its source's
//! adjoint slot.

use std::cell::Cell;
use std::thread::LocalKey;

use crate::adjoints::Adjoints;
use crate::chunk::{Chunk, Chunk1, Chunk2};
use crate::chunk_vector::{ChunkPosition, ChunkVector, NestedStream, StatementCounter};
use crate::config;
use crate::expr::{Expression, JacobiSink};
use crate::external::{self, ExternalFunction};
use crate::float::Float;
use crate::tape::{ReverseTape, TapeThreadLocal};
use crate::{Index, StatementInt};

/// Position within the jacobian stream; the inner component is the statement
/// counter at that point.
pub type JacobiPosition = ChunkPosition<Index>;
/// Position within the statement stream.
pub type StatementPosition = ChunkPosition<JacobiPosition>;
/// Full tape position, usable with [`LinearTape::evaluate_between`] and
/// [`LinearTape::reset_to`].
pub type Position = ChunkPosition<StatementPosition>;

type JacobiVector<F> = ChunkVector<Chunk2<F, Index>, StatementCounter>;
type StatementVector<F> = ChunkVector<Chunk1<StatementInt>, JacobiVector<F>>;
type ExternalFunctionVector<F> =
    ChunkVector<Chunk2<ExternalFunction<F>, StatementPosition>, StatementVector<F>>;

/// A tape whose adjoint indices are issued by a monotone counter.
pub struct LinearTape<F: Float> {
    streams: ExternalFunctionVector<F>,
    adjoints: Adjoints<F>,
    active: bool,
}

impl<F: Float> LinearTape<F> {
    /// Tape with the default chunk sizes from [`crate::config`].
    pub fn new() -> Self {
        Self::with_chunk_sizes(
            config::DEFAULT_CHUNK_SIZE,
            config::DEFAULT_CHUNK_SIZE,
            config::DEFAULT_EXTERNAL_FUNCTION_CHUNK_SIZE,
        )
    }

    /// Tape with explicit chunk sizes for the jacobian, statement, and
    /// external-function streams.
    pub fn with_chunk_sizes(data: usize, statements: usize, external_functions: usize) -> Self {
        let jacobians = ChunkVector::new(data, StatementCounter::default());
        let statements = ChunkVector::new(statements, jacobians);
        let streams = ChunkVector::new(external_functions, statements);
        LinearTape {
            streams,
            adjoints: Adjoints::new(),
            active: false,
        }
    }

    fn statements(&self) -> &StatementVector<F> {
        self.streams.inner()
    }

    fn statements_mut(&mut self) -> &mut StatementVector<F> {
        self.streams.inner_mut()
    }

    fn jacobians(&self) -> &JacobiVector<F> {
        self.statements().inner()
    }

    fn jacobians_mut(&mut self) -> &mut JacobiVector<F> {
        self.statements_mut().inner_mut()
    }

    fn counter(&self) -> &StatementCounter {
        self.jacobians().inner()
    }

    /// Start recording.
    pub fn set_active(&mut self) {
        self.active = true;
    }

    /// Stop recording.
    pub fn set_passive(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The current position, usable for partial evaluation or reset.
    pub fn position(&self) -> Position {
        self.streams.position()
    }

    /// Chunk size for subsequently allocated jacobian chunks.
    pub fn set_data_chunk_size(&mut self, size: usize) {
        self.jacobians_mut().set_chunk_size(size);
    }

    /// Chunk size for subsequently allocated statement chunks.
    pub fn set_statement_chunk_size(&mut self, size: usize) {
        self.statements_mut().set_chunk_size(size);
    }

    /// Chunk size for subsequently allocated external-function chunks.
    pub fn set_external_function_chunk_size(&mut self, size: usize) {
        self.streams.set_chunk_size(size);
    }

    /// Preallocate chunks for the given jacobian and statement totals.
    pub fn resize(&mut self, data_size: usize, statement_size: usize) {
        self.jacobians_mut().resize(data_size);
        self.statements_mut().resize(statement_size);
    }

    /// Number of recorded jacobian entries.
    pub fn used_data_entries(&self) -> usize {
        self.jacobians().data_size()
    }

    /// Number of recorded statements.
    pub fn used_statements(&self) -> usize {
        self.statements().data_size()
    }

    /// Adjoint slots the recording needs, including the passive sentinel.
    pub fn adjoints_size(&self) -> usize {
        self.counter().count() as usize + 1
    }

    /// Size the adjoint vector for the current recording. Advisory:
    /// [`evaluate`](Self::evaluate) performs the same sizing itself.
    pub fn allocate_adjoints(&mut self) {
        self.adjoints.resize(self.counter().count() as usize + 1);
    }

    /// Read the adjoint of `index`; neutral for unallocated slots.
    pub fn get_gradient(&self, index: Index) -> F {
        self.adjoints.get(index)
    }

    /// Write the adjoint of `index`, ignoring the passive sentinel.
    pub fn set_gradient(&mut self, index: Index, gradient: F) {
        self.adjoints.set(index, gradient);
    }

    /// Mutable reference to the adjoint of `index`, growing the vector as
    /// needed. Panics on the passive sentinel.
    pub fn gradient_mut(&mut self, index: Index) -> &mut F {
        self.adjoints.slot_mut(index)
    }

    /// Zero all adjoints of the current recording.
    pub fn clear_adjoints(&mut self) {
        self.adjoints.clear(self.counter().count());
    }

    /// Zero the adjoints whose indices were issued between the two
    /// positions.
    pub fn clear_adjoints_between(&mut self, start: Position, end: Position) {
        self.adjoints
            .clear_range(start.inner.inner.inner, end.inner.inner.inner);
    }

    /// Register `callback` to run during reverse evaluation at the current
    /// statement position. The tape owns the callback and its captures.
    pub fn push_external_function(&mut self, callback: impl FnMut(&mut Adjoints<F>) + 'static) {
        let anchor = self.statements().position();
        self.streams.reserve_items(1);
        self.streams.push((ExternalFunction::new(callback), anchor));
    }

    /// Propagate adjoints backward over the whole recording.
    pub fn evaluate(&mut self) {
        let start = self.position();
        self.evaluate_between(start, Position::default());
    }

    /// Propagate adjoints backward over `[end, start)`. Requires
    /// `start >= end`.
    pub fn evaluate_between(&mut self, start: Position, end: Position) {
        debug_assert!(start >= end);
        let count = self.counter().count();
        self.adjoints.resize(count as usize + 1);

        let LinearTape {
            streams, adjoints, ..
        } = self;
        let (ext_chunks, stmts) = streams.split_chunks_inner();

        // Walk external-function records newest-first, reducing the
        // statements between neighboring anchors before each callback.
        let mut stmt_cursor = start.inner;
        for chunk in (end.chunk..=start.chunk).rev() {
            let hi = if chunk == start.chunk {
                start.data
            } else {
                ext_chunks[chunk].used()
            };
            let lo = if chunk == end.chunk { end.data } else { 0 };
            for slot in (lo..hi).rev() {
                let (func, anchor) = ext_chunks[chunk].row_mut(slot);
                evaluate_statements(stmts, adjoints, stmt_cursor, *anchor);
                func.evaluate(adjoints);
                stmt_cursor = *anchor;
            }
        }
        evaluate_statements(stmts, adjoints, stmt_cursor, end.inner);
    }

    /// Discard everything recorded at or after `pos`: zero the affected
    /// adjoints, drop unreached external functions newest-first, and
    /// truncate the streams.
    pub fn reset_to(&mut self, pos: Position) {
        let count = self.counter().count();
        self.adjoints.clear_range(pos.inner.inner.inner, count);
        external::pop_unreached(&mut self.streams, pos.chunk, pos.data);
        self.streams.reset_to(pos);
    }

    /// Reset the tape to its initial state. Chunk capacity is retained.
    pub fn reset(&mut self) {
        self.reset_to(Position::default());
    }
}

impl<F: Float> Default for LinearTape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> JacobiSink<F> for LinearTape<F> {
    #[inline]
    fn push_jacobi(&mut self, partial: F, index: Index) {
        if index != 0 {
            if config::OPT_IGNORE_INVALID_JACOBIANS && !partial.is_finite() {
                return;
            }
            if config::OPT_JACOBI_IS_ZERO && partial == F::zero() {
                return;
            }
            self.jacobians_mut().push((partial, index));
        }
    }
}

impl<F: Float> ReverseTape for LinearTape<F> {
    type Real = F;

    fn store<E: Expression<Real = F>>(
        &mut self,
        lhs_value: &mut F,
        lhs_index: &mut Index,
        rhs: &E,
    ) {
        if !config::OPT_TAPE_ACTIVITY || self.active {
            debug_assert!(E::MAX_ACTIVE_VARIABLES <= config::MAX_STATEMENT_ARGS);
            self.jacobians_mut().reserve_items(E::MAX_ACTIVE_VARIABLES);
            // The statement reservation must precede the jacobian pushes of
            // this statement so its chunk boundary captures their start.
            self.statements_mut().reserve_items(1);
            let start = self.jacobians().chunk_used();
            rhs.calc_gradient(self, F::one());
            let active_variables = self.jacobians().chunk_used() - start;
            if active_variables == 0 {
                *lhs_index = 0;
            } else {
                self.statements_mut().push(active_variables as StatementInt);
                *lhs_index = self.jacobians_mut().inner_mut().advance();
            }
        }
        // A passive tape leaves a holdover index on the lhs untouched.
        *lhs_value = rhs.value();
    }

    fn store_copy(&mut self, lhs_value: &mut F, lhs_index: &mut Index, rhs_value: F, rhs_index: Index) {
        if !config::OPT_TAPE_ACTIVITY || self.active {
            // Copies store nothing: both values share one adjoint slot.
            *lhs_index = rhs_index;
        }
        *lhs_value = rhs_value;
    }

    fn store_passive(&mut self, lhs_value: &mut F, lhs_index: &mut Index, rhs: F) {
        if !config::OPT_TAPE_ACTIVITY || self.active {
            *lhs_index = 0;
        }
        *lhs_value = rhs;
    }

    fn init_gradient_data(&mut self, index: &mut Index) {
        *index = 0;
    }

    fn destroy_gradient_data(&mut self, _index: &mut Index) {}

    fn register_input(&mut self, index: &mut Index) {
        self.statements_mut().reserve_items(1);
        self.statements_mut().push(0);
        *index = self.jacobians_mut().inner_mut().advance();
    }

    fn set_gradient(&mut self, index: Index, gradient: F) {
        LinearTape::set_gradient(self, index, gradient);
    }

    fn get_gradient(&self, index: Index) -> F {
        LinearTape::get_gradient(self, index)
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Reduce the statements in `[end, start)`, swapping jacobian cursors at
/// statement-chunk boundaries.
fn evaluate_statements<F: Float>(
    stmts: &StatementVector<F>,
    adjoints: &mut Adjoints<F>,
    start: StatementPosition,
    end: StatementPosition,
) {
    let mut stmt_slot = start.data;
    let mut jac_cursor = start.inner;
    for chunk in ((end.chunk + 1)..=start.chunk).rev() {
        let boundary = stmts.inner_start(chunk);
        evaluate_jacobians(
            stmts.inner(),
            adjoints,
            jac_cursor,
            boundary,
            &mut stmt_slot,
            stmts.chunk(chunk).data(),
        );
        jac_cursor = boundary;
        stmt_slot = stmts.used(chunk - 1);
    }
    evaluate_jacobians(
        stmts.inner(),
        adjoints,
        jac_cursor,
        end.inner,
        &mut stmt_slot,
        stmts.chunk(end.chunk).data(),
    );
}

/// Walk the jacobian chunks covering `[end, start)`; the counter span
/// captured at each chunk start bounds the statements reduced per chunk.
fn evaluate_jacobians<F: Float>(
    jacobians: &JacobiVector<F>,
    adjoints: &mut Adjoints<F>,
    start: JacobiPosition,
    end: JacobiPosition,
    stmt_slot: &mut usize,
    stmt_col: &[StatementInt],
) {
    let mut data_slot = start.data;
    let mut adj_cursor = start.inner;
    for chunk in ((end.chunk + 1)..=start.chunk).rev() {
        let boundary = jacobians.inner_start(chunk);
        let (partials, operands) = jacobians.chunk(chunk).columns();
        propagate(
            adjoints, adj_cursor, boundary, stmt_slot, stmt_col, &mut data_slot, partials, operands,
        );
        adj_cursor = boundary;
        data_slot = jacobians.used(chunk - 1);
    }
    let (partials, operands) = jacobians.chunk(end.chunk).columns();
    propagate(
        adjoints, adj_cursor, end.inner, stmt_slot, stmt_col, &mut data_slot, partials, operands,
    );
}

/// The multiply-accumulate core: one statement per counter value, operand
/// updates in reverse deposit order.
#[allow(clippy::too_many_arguments)]
fn propagate<F: Float>(
    adjoints: &mut Adjoints<F>,
    start_adj: Index,
    end_adj: Index,
    stmt_slot: &mut usize,
    stmt_col: &[StatementInt],
    data_slot: &mut usize,
    partials: &[F],
    operands: &[Index],
) {
    let mut adj_pos = start_adj;
    while adj_pos > end_adj {
        let adj = adjoints[adj_pos];
        adj_pos -= 1;
        *stmt_slot -= 1;
        let n_args = stmt_col[*stmt_slot] as usize;
        if !config::OPT_ZERO_ADJOINT || adj != F::zero() {
            for _ in 0..n_args {
                *data_slot -= 1;
                let operand = operands[*data_slot];
                adjoints[operand] = adjoints[operand] + adj * partials[*data_slot];
            }
        } else {
            *data_slot -= n_args;
        }
    }
}

thread_local! {
    static LINEAR_TAPE_F32: Cell<*mut LinearTape<f32>> = const { Cell::new(std::ptr::null_mut()) };
    static LINEAR_TAPE_F64: Cell<*mut LinearTape<f64>> = const { Cell::new(std::ptr::null_mut()) };
}

impl TapeThreadLocal for LinearTape<f32> {
    fn cell() -> &'static LocalKey<Cell<*mut Self>> {
        &LINEAR_TAPE_F32
    }
}

impl TapeThreadLocal for LinearTape<f64> {
    fn cell() -> &'static LocalKey<Cell<*mut Self>> {
        &LINEAR_TAPE_F64
    }
}
