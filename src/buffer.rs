//! Pooled sample vectors and the per-block view processors work on.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// A single audio sample.
pub type Sample = f32;

/// Handle to a sample vector owned by a chain's [`BufferPool`].
///
/// Two ports holding the same `BufferId` share one vector.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferId(pub(crate) u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Why the pool refused to hand out a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllocError {
    ZeroBlockSize,
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroBlockSize => f.write_str("block size is zero"),
            AllocError::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

/// Fixed-length sample vectors, all `block_size` long.
///
/// Vectors are only allocated on the control path while a chain starts; the
/// real-time path only ever indexes into them.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<Box<[Sample]>>,
    block_size: usize,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drops every vector and sets the length of future ones.
    pub(crate) fn reset(&mut self, block_size: usize) {
        self.buffers.clear();
        self.block_size = block_size;
    }

    /// Drops every vector, keeping the block size.
    pub(crate) fn release(&mut self) {
        self.buffers = Vec::new();
    }

    pub(crate) fn allocate(&mut self) -> Result<BufferId, AllocError> {
        if self.block_size == 0 {
            return Err(AllocError::ZeroBlockSize);
        }
        self.buffers.try_reserve(1).map_err(|_| AllocError::OutOfMemory)?;

        let mut samples = Vec::new();
        samples
            .try_reserve_exact(self.block_size)
            .map_err(|_| AllocError::OutOfMemory)?;
        samples.resize(self.block_size, 0.0);

        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(samples.into_boxed_slice());
        Ok(id)
    }

    /// Whether `id` names a live vector of the current block size.
    pub(crate) fn is_valid(&self, id: BufferId) -> bool {
        self.buffers
            .get(id.0 as usize)
            .map_or(false, |b| b.len() == self.block_size)
    }

    /// Length of every vector in the pool.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of vectors currently allocated.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Samples of `id`, or an empty slice for a stale handle.
    pub fn get(&self, id: BufferId) -> &[Sample] {
        self.buffers.get(id.0 as usize).map_or(&[][..], |b| &b[..])
    }

    pub fn get_mut(&mut self, id: BufferId) -> &mut [Sample] {
        match self.buffers.get_mut(id.0 as usize) {
            Some(b) => &mut b[..],
            None => Default::default(),
        }
    }

    /// Borrows `src` for reading and `dst` for writing at the same time.
    ///
    /// Returns `None` when both handles name the same vector or either is stale.
    pub(crate) fn split(&mut self, src: BufferId, dst: BufferId) -> Option<(&[Sample], &mut [Sample])> {
        let (s, d) = (src.0 as usize, dst.0 as usize);
        if s == d || s >= self.buffers.len() || d >= self.buffers.len() {
            return None;
        }
        if s < d {
            let (lo, hi) = self.buffers.split_at_mut(d);
            Some((&lo[s][..], &mut hi[0][..]))
        } else {
            let (lo, hi) = self.buffers.split_at_mut(s);
            Some((&hi[0][..], &mut lo[d][..]))
        }
    }

    pub(crate) fn clear(&mut self, id: BufferId) {
        self.get_mut(id).iter_mut().for_each(|s| *s = 0.0);
    }

    pub(crate) fn copy(&mut self, src: BufferId, dst: BufferId) {
        if let Some((from, to)) = self.split(src, dst) {
            to.copy_from_slice(from);
        }
    }

    pub(crate) fn accumulate(&mut self, src: BufferId, dst: BufferId) {
        if src == dst {
            self.get_mut(dst).iter_mut().for_each(|s| *s += *s);
        } else if let Some((from, to)) = self.split(src, dst) {
            for (out, &x) in to.iter_mut().zip(from.iter()) {
                *out += x;
            }
        }
    }
}

/// The inputs and outputs of one node for one block.
///
/// An inlet and an outlet may share a vector when the node is in-place
/// eligible; the helpers below handle that case, while [`input`](Self::input)
/// followed by [`output`](Self::output) on a shared pair reads samples that
/// the write will overwrite.
pub struct BlockIo<'a> {
    pool: &'a mut BufferPool,
    inputs: &'a [Option<BufferId>],
    outputs: &'a [Option<BufferId>],
}

impl<'a> BlockIo<'a> {
    pub(crate) fn new(
        pool: &'a mut BufferPool,
        inputs: &'a [Option<BufferId>],
        outputs: &'a [Option<BufferId>],
    ) -> Self {
        Self { pool, inputs, outputs }
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Samples in the block.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.pool.block_size()
    }

    /// Samples arriving at `inlet`; empty if the inlet does not exist.
    pub fn input(&self, inlet: usize) -> &[Sample] {
        match self.inputs.get(inlet).copied().flatten() {
            Some(id) => self.pool.get(id),
            None => &[],
        }
    }

    /// Vector to fill for `outlet`; empty if the outlet does not exist.
    pub fn output(&mut self, outlet: usize) -> &mut [Sample] {
        match self.outputs.get(outlet).copied().flatten() {
            Some(id) => self.pool.get_mut(id),
            None => Default::default(),
        }
    }

    /// Whether `inlet` and `outlet` are the same vector this block.
    pub fn is_in_place(&self, inlet: usize, outlet: usize) -> bool {
        match (self.inputs.get(inlet), self.outputs.get(outlet)) {
            (Some(Some(i)), Some(Some(o))) => i == o,
            _ => false,
        }
    }

    /// Writes `f(input[n])` into `output[n]` for every sample.
    pub fn process(&mut self, inlet: usize, outlet: usize, mut f: impl FnMut(Sample) -> Sample) {
        let (src, dst) = match self.pair(inlet, outlet) {
            Some(pair) => pair,
            None => return,
        };
        if src == dst {
            for s in self.pool.get_mut(dst).iter_mut() {
                *s = f(*s);
            }
        } else if let Some((from, to)) = self.pool.split(src, dst) {
            for (out, &x) in to.iter_mut().zip(from.iter()) {
                *out = f(x);
            }
        }
    }

    /// Copies `inlet` into `outlet`.
    pub fn copy(&mut self, inlet: usize, outlet: usize) {
        if let Some((src, dst)) = self.pair(inlet, outlet) {
            self.pool.copy(src, dst);
        }
    }

    /// Adds `inlet` onto whatever `outlet` already holds.
    pub fn accumulate(&mut self, inlet: usize, outlet: usize) {
        if let Some((src, dst)) = self.pair(inlet, outlet) {
            self.pool.accumulate(src, dst);
        }
    }

    /// Adds `inlet * gain` onto `outlet`.
    pub fn mix(&mut self, inlet: usize, outlet: usize, gain: Sample) {
        let (src, dst) = match self.pair(inlet, outlet) {
            Some(pair) => pair,
            None => return,
        };
        if src == dst {
            self.pool.get_mut(dst).iter_mut().for_each(|s| *s += *s * gain);
        } else if let Some((from, to)) = self.pool.split(src, dst) {
            for (out, &x) in to.iter_mut().zip(from.iter()) {
                *out += x * gain;
            }
        }
    }

    /// Sets every sample of `outlet` to `value`.
    pub fn fill(&mut self, outlet: usize, value: Sample) {
        self.output(outlet).iter_mut().for_each(|s| *s = value);
    }

    /// Zeroes every outlet.
    pub fn silence(&mut self) {
        for outlet in 0..self.outputs.len() {
            self.fill(outlet, 0.0);
        }
    }

    fn pair(&self, inlet: usize, outlet: usize) -> Option<(BufferId, BufferId)> {
        let src = self.inputs.get(inlet).copied().flatten()?;
        let dst = self.outputs.get(outlet).copied().flatten()?;
        Some((src, dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(n: usize, block_size: usize) -> (BufferPool, Vec<BufferId>) {
        let mut pool = BufferPool::new();
        pool.reset(block_size);
        let ids = (0..n).map(|_| pool.allocate().unwrap()).collect();
        (pool, ids)
    }

    #[test]
    fn zero_block_size_is_refused() {
        let mut pool = BufferPool::new();
        pool.reset(0);
        assert_eq!(pool.allocate(), Err(AllocError::ZeroBlockSize));
    }

    #[test]
    fn split_rejects_aliasing() {
        let (mut pool, ids) = pool_with(2, 4);
        assert!(pool.split(ids[0], ids[0]).is_none());
        assert!(pool.split(ids[1], ids[0]).is_some());
    }

    #[test]
    fn process_handles_shared_vectors() {
        let (mut pool, ids) = pool_with(1, 4);
        pool.get_mut(ids[0]).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        let ins = [Some(ids[0])];
        let outs = [Some(ids[0])];
        let mut io = BlockIo::new(&mut pool, &ins, &outs);
        assert!(io.is_in_place(0, 0));
        io.process(0, 0, |x| x * 2.0);

        assert_eq!(pool.get(ids[0]), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn accumulate_sums_distinct_vectors() {
        let (mut pool, ids) = pool_with(2, 3);
        pool.get_mut(ids[0]).copy_from_slice(&[1.0, 1.0, 1.0]);
        pool.get_mut(ids[1]).copy_from_slice(&[0.5, 0.0, -1.0]);
        pool.accumulate(ids[0], ids[1]);
        assert_eq!(pool.get(ids[1]), &[1.5, 1.0, 0.0]);
    }

    #[test]
    fn missing_ports_read_as_empty() {
        let (mut pool, _) = pool_with(1, 8);
        let mut io = BlockIo::new(&mut pool, &[], &[None]);
        assert!(io.input(0).is_empty());
        assert!(io.output(0).is_empty());
        assert!(io.output(7).is_empty());
    }
}
