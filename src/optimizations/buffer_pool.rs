//! Thread-local buffer pool for encode output and decode scratch
//!
//! Buffers are handed out as `PooledBuffer` guards and go back to the pool
//! when the guard drops, so every exit path of an encode or decode call
//! (including `?` returns) releases them.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

/// Size thresholds for buffer classification
const SMALL_THRESHOLD: usize = 1024;       // 1KB
const MEDIUM_THRESHOLD: usize = 65536;     // 64KB
const MAX_POOL_SIZE: usize = 8;            // Keep max 8 buffers per size class
const MAX_BUFFER_SIZE: usize = 1_000_000; // Don't pool buffers > 1MB

/// Thread-local buffer pool with size-stratified caching
pub struct BufferPool {
    small: Vec<Vec<u8>>,   // Buffers < 1KB
    medium: Vec<Vec<u8>>,  // Buffers 1KB - 64KB
    large: Vec<Vec<u8>>,   // Buffers > 64KB
}

impl BufferPool {
    #[inline]
    fn new() -> Self {
        Self {
            small: Vec::with_capacity(MAX_POOL_SIZE),
            medium: Vec::with_capacity(MAX_POOL_SIZE),
            large: Vec::with_capacity(MAX_POOL_SIZE),
        }
    }

    #[inline]
    fn class_mut(&mut self, capacity: usize) -> &mut Vec<Vec<u8>> {
        if capacity < SMALL_THRESHOLD {
            &mut self.small
        } else if capacity < MEDIUM_THRESHOLD {
            &mut self.medium
        } else {
            &mut self.large
        }
    }

    /// Acquire a buffer from the pool or allocate a new one
    #[inline]
    pub fn acquire(&mut self, capacity: usize) -> Vec<u8> {
        match self.class_mut(capacity).pop() {
            Some(buf) => buf,
            // power-of-2 capacity for better reuse
            None => Vec::with_capacity(capacity.next_power_of_two()),
        }
    }

    /// Return a buffer to the pool for reuse
    #[inline]
    pub fn release(&mut self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_BUFFER_SIZE {
            return;
        }
        buf.clear();

        let pool = self.class_mut(buf.capacity());
        if pool.len() < MAX_POOL_SIZE {
            pool.push(buf);
        }
    }
}

thread_local! {
    static BUFFER_POOL: RefCell<BufferPool> = RefCell::new(BufferPool::new());
}

/// Buffer checked out of the thread-local pool; returned on drop
pub struct PooledBuffer {
    buf: Vec<u8>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        // try_with: the pool may already be gone during thread teardown
        let _ = BUFFER_POOL.try_with(|pool| pool.borrow_mut().release(buf));
    }
}

/// Acquire a buffer from the thread-local pool
#[inline]
pub fn acquire_buffer(capacity: usize) -> PooledBuffer {
    let buf = BUFFER_POOL
        .try_with(|pool| pool.borrow_mut().acquire(capacity))
        .unwrap_or_else(|_| Vec::with_capacity(capacity));
    PooledBuffer { buf }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let mut pool = BufferPool::new();

        let buf = pool.acquire(512);
        assert!(buf.capacity() >= 512);

        pool.release(buf);
        let buf2 = pool.acquire(512);
        assert!(buf2.capacity() >= 512);

        // Should reuse from pool
        assert!(pool.small.is_empty());
    }

    #[test]
    fn test_buffer_pool_size_classes() {
        let mut pool = BufferPool::new();

        let small = pool.acquire(500);
        pool.release(small);
        let medium = pool.acquire(5000);
        pool.release(medium);
        let large = pool.acquire(100_000);
        pool.release(large);

        assert_eq!(pool.small.len(), 1);
        assert_eq!(pool.medium.len(), 1);
        assert_eq!(pool.large.len(), 1);
    }

    #[test]
    fn test_buffer_pool_max_size() {
        let mut pool = BufferPool::new();
        let held: Vec<_> = (0..15).map(|_| pool.acquire(512)).collect();
        for buf in held {
            pool.release(buf);
        }
        assert!(pool.small.len() <= MAX_POOL_SIZE);
    }

    #[test]
    fn test_guard_returns_cleared_buffer() {
        {
            let mut buf = acquire_buffer(64);
            buf.extend_from_slice(b"scratch");
            assert_eq!(buf.as_slice(), b"scratch");
        }
        let buf = acquire_buffer(64);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn fails() -> Result<(), ()> {
            let mut buf = acquire_buffer(32);
            buf.push(b'x');
            Err(())
        }
        assert!(fails().is_err());
        assert!(acquire_buffer(32).is_empty());
    }
}
