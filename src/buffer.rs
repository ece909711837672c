/*!
 * Per-worker buffer pool: three fixed-size 2 MiB buffers reused for every
 * file a worker handles, so the hot path never allocates.
 */

/// Buffer size chosen once for the whole job; large enough to amortize
/// syscall overhead, small enough that `thread_count` workers' buffers stay
/// a bounded, predictable slice of memory.
pub const BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// The three buffers one worker owns for its entire lifetime: a raw read
/// staging area, a compressed-frame staging area, and a write staging area.
/// Re-used across every `CopyEntry` the worker processes.
pub struct BufferPool {
    pub read: Vec<u8>,
    pub compressed: Vec<u8>,
    pub write: Vec<u8>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            read: vec![0u8; BUFFER_SIZE],
            compressed: vec![0u8; BUFFER_SIZE],
            write: vec![0u8; BUFFER_SIZE],
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_preallocated_to_fixed_size() {
        let pool = BufferPool::new();
        assert_eq!(pool.read.len(), BUFFER_SIZE);
        assert_eq!(pool.compressed.len(), BUFFER_SIZE);
        assert_eq!(pool.write.len(), BUFFER_SIZE);
    }
}
