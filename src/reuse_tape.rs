//! Index-reuse chunk tape: adjoint indices of dead values are recycled
//! through an [`IndexHandler`] free list.
//!
//! The stream nesting matches the linear tape, but the jacobian stream's
//! terminator is empty — there is no statement counter, because statements
//! carry their left-hand-side index explicitly:
//!
//! ```text
//! external functions -> statements -> jacobians -> ()
//! ```
//!
//! During the reverse sweep the left-hand-side adjoint is consumed: it is
//! read once and zeroed, so a later recording that reuses the index starts
//! from a clean slot.

use std::cell::Cell;
use std::thread::LocalKey;

use crate::adjoints::Adjoints;
use crate::chunk::{Chunk, Chunk2};
use crate::chunk_vector::{ChunkPosition, ChunkVector, EmptyStream, NestedStream};
use crate::config;
use crate::expr::{Expression, JacobiSink};
use crate::external::{self, ExternalFunction};
use crate::float::Float;
use crate::index_handler::IndexHandler;
use crate::tape::{ReverseTape, TapeThreadLocal};
use crate::{Index, StatementInt};

/// Position within the jacobian stream. The terminator is empty, so the
/// inner component carries no information.
pub type JacobiPosition = ChunkPosition<()>;
/// Position within the statement stream.
pub type StatementPosition = ChunkPosition<JacobiPosition>;
/// Full tape position, usable with [`ReuseTape::evaluate_between`] and
/// [`ReuseTape::reset_to`].
pub type Position = ChunkPosition<StatementPosition>;

type JacobiVector<F> = ChunkVector<Chunk2<F, Index>, EmptyStream>;
type StatementVector<F> = ChunkVector<Chunk2<StatementInt, Index>, JacobiVector<F>>;
type ExternalFunctionVector<F> =
    ChunkVector<Chunk2<ExternalFunction<F>, StatementPosition>, StatementVector<F>>;

/// A tape whose adjoint indices are recycled when active values die.
pub struct ReuseTape<F: Float> {
    streams: ExternalFunctionVector<F>,
    adjoints: Adjoints<F>,
    index_handler: IndexHandler,
    active: bool,
}

impl<F: Float> ReuseTape<F> {
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
        let jacobians = ChunkVector::new(data, EmptyStream);
        let statements = ChunkVector::new(statements, jacobians);
        let streams = ChunkVector::new(external_functions, statements);
        ReuseTape {
            streams,
            adjoints: Adjoints::new(),
            index_handler: IndexHandler::new(),
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

    /// Highest adjoint index ever issued.
    pub fn max_global_index(&self) -> Index {
        self.index_handler.max_global_index()
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
        self.index_handler.max_global_index() as usize + 1
    }

    /// Size the adjoint vector for the current recording. Advisory:
    /// [`evaluate`](Self::evaluate) performs the same sizing itself.
    pub fn allocate_adjoints(&mut self) {
        self.adjoints
            .resize(self.index_handler.max_global_index() as usize + 1);
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
    ///
    /// Recycled indices have no positional meaning, so this variant offers
    /// no positional clear.
    pub fn clear_adjoints(&mut self) {
        self.adjoints.clear(self.index_handler.max_global_index());
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
        let max_index = self.index_handler.max_global_index();
        self.adjoints.resize(max_index as usize + 1);

        let ReuseTape {
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

    /// Discard everything recorded at or after `pos`: zero the adjoints,
    /// drop unreached external functions newest-first, and truncate the
    /// streams.
    ///
    /// The index handler rewinds only on a full reset — after a partial
    /// reset, live values still hold their indices.
    pub fn reset_to(&mut self, pos: Position) {
        self.clear_adjoints();
        external::pop_unreached(&mut self.streams, pos.chunk, pos.data);
        self.streams.reset_to(pos);
        if pos == Position::default() {
            self.index_handler.reset();
        }
    }

    /// Reset the tape to its initial state. Chunk capacity is retained.
    pub fn reset(&mut self) {
        self.reset_to(Position::default());
    }
}

impl<F: Float> Default for ReuseTape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> JacobiSink<F> for ReuseTape<F> {
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

impl<F: Float> ReverseTape for ReuseTape<F> {
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
                self.index_handler.free(lhs_index);
            } else {
                self.index_handler.assign(lhs_index);
                self.statements_mut()
                    .push((active_variables as StatementInt, *lhs_index));
            }
        } else {
            self.index_handler.free(lhs_index);
        }
        *lhs_value = rhs.value();
    }

    fn store_copy(&mut self, lhs_value: &mut F, lhs_index: &mut Index, rhs_value: F, rhs_index: Index) {
        if (!config::OPT_TAPE_ACTIVITY || self.active) && rhs_index != 0 {
            // A copy forwards the adjoint through a unit statement; the lhs
            // keeps its own slot so index uniqueness holds.
            self.index_handler.assign(lhs_index);
            self.jacobians_mut().reserve_items(1);
            self.statements_mut().reserve_items(1);
            self.jacobians_mut().push((F::one(), rhs_index));
            self.statements_mut().push((1, *lhs_index));
        } else {
            self.index_handler.free(lhs_index);
        }
        *lhs_value = rhs_value;
    }

    fn store_passive(&mut self, lhs_value: &mut F, lhs_index: &mut Index, rhs: F) {
        self.index_handler.free(lhs_index);
        *lhs_value = rhs;
    }

    fn init_gradient_data(&mut self, index: &mut Index) {
        *index = 0;
    }

    fn destroy_gradient_data(&mut self, index: &mut Index) {
        self.index_handler.free(index);
    }

    fn register_input(&mut self, index: &mut Index) {
        self.index_handler.assign(index);
    }

    fn set_gradient(&mut self, index: Index, gradient: F) {
        ReuseTape::set_gradient(self, index, gradient);
    }

    fn get_gradient(&self, index: Index) -> F {
        ReuseTape::get_gradient(self, index)
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Jacobian-stream cursor for the reverse walk. The stream's terminator is
/// empty, so chunk hops are demand-driven rather than counter-bounded.
struct JacobiCursor {
    chunk: usize,
    slot: usize,
}

/// Reduce the statements in `[end, start)`, consuming each left-hand-side
/// adjoint as it is read.
fn evaluate_statements<F: Float>(
    stmts: &StatementVector<F>,
    adjoints: &mut Adjoints<F>,
    start: StatementPosition,
    end: StatementPosition,
) {
    let mut cursor = JacobiCursor {
        chunk: start.inner.chunk,
        slot: start.inner.data,
    };
    let mut stmt_slot = start.data;
    for chunk in ((end.chunk + 1)..=start.chunk).rev() {
        let (n_args_col, lhs_col) = stmts.chunk(chunk).columns();
        reduce_statements(
            stmts.inner(),
            adjoints,
            &mut cursor,
            n_args_col,
            lhs_col,
            stmt_slot,
            0,
        );
        stmt_slot = stmts.used(chunk - 1);
    }
    let (n_args_col, lhs_col) = stmts.chunk(end.chunk).columns();
    reduce_statements(
        stmts.inner(),
        adjoints,
        &mut cursor,
        n_args_col,
        lhs_col,
        stmt_slot,
        end.data,
    );
}

/// The multiply-accumulate core over one statement-chunk column.
#[allow(clippy::too_many_arguments)]
fn reduce_statements<F: Float>(
    jacobians: &JacobiVector<F>,
    adjoints: &mut Adjoints<F>,
    cursor: &mut JacobiCursor,
    n_args_col: &[StatementInt],
    lhs_col: &[Index],
    start_slot: usize,
    end_slot: usize,
) {
    let mut slot = start_slot;
    while slot > end_slot {
        slot -= 1;
        let lhs = lhs_col[slot];
        let adj = adjoints[lhs];
        adjoints[lhs] = F::zero();
        let n_args = n_args_col[slot] as usize;
        if n_args > 0 && cursor.slot == 0 {
            // A statement's jacobians never split across chunks, so an
            // exhausted chunk means they sit at the tail of the previous one.
            cursor.chunk -= 1;
            cursor.slot = jacobians.used(cursor.chunk);
        }
        let (partials, operands) = jacobians.chunk(cursor.chunk).columns();
        if !config::OPT_ZERO_ADJOINT || adj != F::zero() {
            for _ in 0..n_args {
                cursor.slot -= 1;
                let operand = operands[cursor.slot];
                adjoints[operand] = adjoints[operand] + adj * partials[cursor.slot];
            }
        } else {
            cursor.slot -= n_args;
        }
    }
}

thread_local! {
    static REUSE_TAPE_F32: Cell<*mut ReuseTape<f32>> = const { Cell::new(std::ptr::null_mut()) };
    static REUSE_TAPE_F64: Cell<*mut ReuseTape<f64>> = const { Cell::new(std::ptr::null_mut()) };
}

impl TapeThreadLocal for ReuseTape<f32> {
    fn cell() -> &'static LocalKey<Cell<*mut Self>> {
        &REUSE_TAPE_F32
    }
}

impl TapeThreadLocal for ReuseTape<f64> {
    fn cell() -> &'static LocalKey<Cell<*mut Self>> {
        &REUSE_TAPE_F64
    }
}
