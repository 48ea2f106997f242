//! External-function records spliced into reverse evaluation.
//!
//! An external function stands in for a computation the tape cannot record
//! primitively (a library call, a coarse-grained adjoint rule). The record
//! owns its captured state; during reverse evaluation the callback runs at
//! the statement position it was registered at and may read and write the
//! adjoint vector directly. Dropping the record releases the state, which is
//! how resets dispose of unreached callbacks.

use std::fmt;

use crate::adjoints::Adjoints;
use crate::chunk::{Chunk, Chunk2};
use crate::chunk_vector::{ChunkVector, NestedStream};
use crate::float::Float;

/// Owned user callback invoked during reverse evaluation at its recorded
/// anchor.
pub struct ExternalFunction<F: Float> {
    callback: Box<dyn FnMut(&mut Adjoints<F>)>,
}

impl<F: Float> ExternalFunction<F> {
    pub fn new(callback: impl FnMut(&mut Adjoints<F>) + 'static) -> Self {
        ExternalFunction {
            callback: Box::new(callback),
        }
    }

    pub(crate) fn evaluate(&mut self, adjoints: &mut Adjoints<F>) {
        (self.callback)(adjoints);
    }
}

impl<F: Float> fmt::Debug for ExternalFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExternalFunction")
    }
}

/// Drop every record newer than `(chunk, data)`, newest first, so callback
/// state is released in reverse registration order.
pub(crate) fn pop_unreached<F: Float, P, Inner: NestedStream>(
    records: &mut ChunkVector<Chunk2<ExternalFunction<F>, P>, Inner>,
    chunk: usize,
    data: usize,
) {
    for c in (chunk..=records.cur_chunk()).rev() {
        let keep = if c == chunk { data } else { 0 };
        while records.chunk(c).used() > keep {
            records.chunk_mut(c).pop();
        }
    }
}
