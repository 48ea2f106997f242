//! Fixed-capacity parallel-column arena slabs.
//!
//! A chunk owns one `Vec` per row field, all allocated up front to the same
//! capacity and never reallocated. Appends go row-by-row; a truncating reset
//! shrinks the used count without releasing capacity. Reverse traversal only
//! reads slots below the used count, so reset never needs to zero memory.

/// Storage slab used by [`crate::chunk_vector::ChunkVector`].
pub trait Chunk {
    /// One row of the slab.
    type Item;

    /// Allocate an empty slab holding up to `capacity` rows.
    fn with_capacity(capacity: usize) -> Self;

    /// Maximum number of rows.
    fn capacity(&self) -> usize;

    /// Number of rows written so far.
    fn used(&self) -> usize;

    /// Remaining free rows.
    fn unused(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Append one row. Callers must have checked capacity via a reserve.
    fn push(&mut self, item: Self::Item);

    /// Shrink the used count to `used`. Capacity is retained.
    fn truncate(&mut self, used: usize);
}

/// Single-column chunk.
#[derive(Debug)]
pub struct Chunk1<T> {
    data: Vec<T>,
    capacity: usize,
}

impl<T> Chunk1<T> {
    /// The written rows.
    pub fn data(&self) -> &[T] {
        &self.data
    }
}

impl<T> Chunk for Chunk1<T> {
    type Item = T;

    fn with_capacity(capacity: usize) -> Self {
        Chunk1 {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.data.len()
    }

    fn push(&mut self, item: T) {
        debug_assert!(self.data.len() < self.capacity);
        self.data.push(item);
    }

    fn truncate(&mut self, used: usize) {
        debug_assert!(used <= self.data.len());
        self.data.truncate(used);
    }
}

/// Two-column chunk; both columns share one used count.
#[derive(Debug)]
pub struct Chunk2<A, B> {
    a: Vec<A>,
    b: Vec<B>,
    capacity: usize,
}

impl<A, B> Chunk2<A, B> {
    /// The written rows, column by column.
    pub fn columns(&self) -> (&[A], &[B]) {
        (&self.a, &self.b)
    }

    /// One row, first column mutable. Used to run owned callbacks in place
    /// while their anchor stays borrowed.
    pub fn row_mut(&mut self, i: usize) -> (&mut A, &B) {
        (&mut self.a[i], &self.b[i])
    }

    /// Remove and return the newest row.
    pub fn pop(&mut self) -> Option<(A, B)> {
        match (self.a.pop(), self.b.pop()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}

impl<A, B> Chunk for Chunk2<A, B> {
    type Item = (A, B);

    fn with_capacity(capacity: usize) -> Self {
        Chunk2 {
            a: Vec::with_capacity(capacity),
            b: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.a.len()
    }

    fn push(&mut self, (a, b): (A, B)) {
        debug_assert!(self.a.len() < self.capacity);
        self.a.push(a);
        self.b.push(b);
    }

    fn truncate(&mut self, used: usize) {
        debug_assert!(used <= self.a.len());
        self.a.truncate(used);
        self.b.truncate(used);
    }
}
