// Copyright (c) 2024-present, talus-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Typed free-list pool for high-churn helper objects (position-vector
//! writers, tokenizer scratch). Indexing a document allocates one such
//! object per distinct term; recycling them across documents keeps the
//! allocator out of the hot path.

/// A free-list pool of `T`s.
pub struct Pool<T> {
    free: Vec<T>,
    make: fn() -> T,
    reset: fn(&mut T),
}

impl<T> Pool<T> {
    /// Initial free-list capacity.
    pub const DEFAULT_CAPACITY: usize = 16;

    /// Creates a pool producing objects with `make` and recycling them
    /// through `reset`.
    #[must_use]
    pub fn new(make: fn() -> T, reset: fn(&mut T)) -> Self {
        Self {
            free: Vec::with_capacity(Self::DEFAULT_CAPACITY),
            make,
            reset,
        }
    }

    /// Takes an object from the pool, creating one if none is free.
    pub fn get(&mut self) -> T {
        self.free.pop().unwrap_or_else(|| (self.make)())
    }

    /// Returns an object to the pool after resetting it.
    pub fn put(&mut self, mut item: T) {
        (self.reset)(&mut item);
        self.free.push(item);
    }

    /// Number of pooled (idle) objects.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("idle", &self.free.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Pool;
    use crate::varint::VarintVectorWriter;
    use test_log::test;

    #[test]
    fn pool_recycles() {
        let mut pool: Pool<VarintVectorWriter> = Pool::new(
            || VarintVectorWriter::with_capacity(64),
            VarintVectorWriter::reset,
        );

        let mut w = pool.get();
        w.write(42);
        assert_eq!(1, w.count());
        pool.put(w);
        assert_eq!(1, pool.idle());

        // recycled writers come back clean
        let w = pool.get();
        assert_eq!(0, w.count());
        assert_eq!(0, pool.idle());
    }
}
