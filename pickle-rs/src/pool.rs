//! Block pool allocator.
//!
//! A pool is an ordered list of size-class arenas.  Each arena holds a fixed
//! number of fixed-size blocks in one contiguous address range, tracks free
//! blocks in a bitmap (`1` = free) and keeps running counters.  Arenas are
//! laid out once, at construction, and never resized.
//!
//! | Operation      | Behaviour                                                       |
//! |----------------|-----------------------------------------------------------------|
//! | `allocate`     | smallest class whose block size fits; fails if that class is full |
//! | `release`      | locate arena by address range, mark the block free              |
//! | `reallocate`   | keep the block if the new size fits its class, else move & copy |
//!
//! There is no spill-over into a larger class: a full class fails cleanly and
//! leaves the decision to the caller.  Bad releases (foreign, misaligned or
//! repeated addresses) are reported, never ignored.
//!
//! Each block has real backing storage, reachable through [`Pool::bytes`] and
//! [`Pool::bytes_mut`] and carried across a moving `reallocate`.  Only callers
//! that use those accessors keep data there.  Interpreter strings
//! ([`Text`](crate::text::Text)) hold their bytes in their own buffer and use
//! the pool for accounting only: a block is taken and sized to match, so
//! capacity limits, counters and leak checks apply, but its storage stays
//! untouched.
//!
//! The pool is single-threaded; share it across threads only behind a lock.

use std::fmt;

use thiserror::Error;

use crate::alloc::{Addr, AllocError, Allocator};

// ── Specification ─────────────────────────────────────────────────────────────

/// Address of the first arena.  Address zero is never handed out.
pub const POOL_BASE: usize = 0x1000;

/// One size class: `block_count` blocks of `block_size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
    pub block_size: usize,
    pub block_count: usize,
}

impl PoolSpec {
    pub const fn new(block_size: usize, block_count: usize) -> Self {
        PoolSpec { block_size, block_count }
    }
}

/// Layout used by the command-line front end: most allocations are small,
/// and the largest class bounds the longest string.
pub const DEFAULT_SPECS: [PoolSpec; 7] = [
    PoolSpec::new(8, 512),
    PoolSpec::new(16, 256),
    PoolSpec::new(32, 128),
    PoolSpec::new(64, 64),
    PoolSpec::new(128, 32),
    PoolSpec::new(256, 16),
    PoolSpec::new(512, 8),
];

/// Rejected pool specification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("a pool needs at least one size class")]
    Empty,
    #[error("size class {index} has a zero block size")]
    ZeroSize { index: usize },
    #[error("size class {index} has no blocks")]
    ZeroCount { index: usize },
    #[error("size class {index} ({size} bytes) is not larger than the class before it")]
    NotIncreasing { index: usize, size: usize },
}

fn validate(specs: &[PoolSpec]) -> Result<(), SpecError> {
    if specs.is_empty() {
        return Err(SpecError::Empty);
    }
    for (index, spec) in specs.iter().enumerate() {
        if spec.block_size == 0 {
            return Err(SpecError::ZeroSize { index });
        }
        if spec.block_count == 0 {
            return Err(SpecError::ZeroCount { index });
        }
        if index > 0 && spec.block_size <= specs[index - 1].block_size {
            return Err(SpecError::NotIncreasing { index, size: spec.block_size });
        }
    }
    Ok(())
}

// ── Statistics & tracing ──────────────────────────────────────────────────────

/// Counters for one arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub block_size: usize,
    pub blocks: usize,
    pub active: usize,
    pub max: usize,
    pub allocs: u64,
    pub freed: u64,
}

/// Counters for the whole pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocs: u64,
    pub freed: u64,
    /// Reallocations that had to move a block to a larger class.
    pub relocations: u64,
    pub active: usize,
    pub max: usize,
    /// Bytes of block storage across all arenas.
    pub total: usize,
    pub blocks: usize,
    pub arenas: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Allocate,
    Release,
    Reallocate,
}

/// What the trace hook sees for every pool operation.
#[derive(Debug, Clone, Copy)]
pub struct TraceEvent {
    pub op: TraceOp,
    pub addr: Addr,
    /// Requested size (zero for releases).
    pub size: usize,
    /// Index of the arena that served the operation.
    pub arena: usize,
    /// Arena counters after the operation.
    pub stats: ArenaStats,
}

/// Trace hook.  A plain function pointer, so installing one never allocates.
pub type Tracer = fn(&TraceEvent);

/// Stock trace hook: one `tracing` event per pool operation.
pub fn log_event(event: &TraceEvent) {
    tracing::trace!(
        op = ?event.op,
        addr = %event.addr,
        size = event.size,
        class = event.stats.block_size,
        active = event.stats.active,
        max = event.stats.max,
        allocs = event.stats.allocs,
        freed = event.stats.freed,
        "pool"
    );
}

// ── Free-block bitmap ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Bitmap {
    words: Vec<u64>,
    bits: usize,
}

impl Bitmap {
    /// A bitmap with every bit set.
    fn full(bits: usize) -> Self {
        let mut words = vec![u64::MAX; bits.div_ceil(64)];
        let tail = bits % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Bitmap { words, bits }
    }

    fn first_set(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * 64 + w.trailing_zeros() as usize)
    }

    fn get(&self, bit: usize) -> bool {
        (self.words[bit / 64] >> (bit % 64)) & 1 == 1
    }

    fn set(&mut self, bit: usize) {
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    fn clear(&mut self, bit: usize) {
        self.words[bit / 64] &= !(1u64 << (bit % 64));
    }
}

// ── Arena ─────────────────────────────────────────────────────────────────────

struct Arena {
    base: usize,
    block_size: usize,
    freelist: Bitmap,
    storage: Vec<u8>,
    active: usize,
    max: usize,
    allocs: u64,
    freed: u64,
}

impl Arena {
    fn new(base: usize, spec: PoolSpec) -> Self {
        Arena {
            base,
            block_size: spec.block_size,
            freelist: Bitmap::full(spec.block_count),
            storage: vec![0; spec.block_size * spec.block_count],
            active: 0,
            max: 0,
            allocs: 0,
            freed: 0,
        }
    }

    fn end(&self) -> usize {
        self.base + self.storage.len()
    }

    fn contains(&self, addr: Addr) -> bool {
        addr.0 >= self.base && addr.0 < self.end()
    }

    fn index_of(&self, addr: Addr) -> Option<usize> {
        let offset = addr.0.checked_sub(self.base)?;
        (offset % self.block_size == 0).then_some(offset / self.block_size)
    }

    fn take(&mut self) -> Option<Addr> {
        let index = self.freelist.first_set()?;
        self.freelist.clear(index);
        self.active += 1;
        self.max = self.max.max(self.active);
        self.allocs += 1;
        Some(Addr(self.base + index * self.block_size))
    }

    fn put(&mut self, index: usize) {
        self.freelist.set(index);
        self.active -= 1;
        self.freed += 1;
    }

    fn is_free(&self, index: usize) -> bool {
        self.freelist.get(index)
    }

    fn block(&self, index: usize) -> &[u8] {
        let start = index * self.block_size;
        &self.storage[start..start + self.block_size]
    }

    fn block_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.block_size;
        &mut self.storage[start..start + self.block_size]
    }

    fn stats(&self) -> ArenaStats {
        ArenaStats {
            block_size: self.block_size,
            blocks: self.freelist.bits,
            active: self.active,
            max: self.max,
            allocs: self.allocs,
            freed: self.freed,
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("base", &Addr(self.base))
            .field("block_size", &self.block_size)
            .field("blocks", &self.freelist.bits)
            .field("active", &self.active)
            .finish()
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Fixed-size-class block allocator.
#[derive(Debug)]
pub struct Pool {
    arenas: Vec<Arena>,
    allocs: u64,
    freed: u64,
    relocations: u64,
    active: usize,
    max: usize,
    tracer: Option<Tracer>,
}

impl Pool {
    /// Build a pool from size classes sorted by strictly increasing block size.
    pub fn new(specs: &[PoolSpec]) -> Result<Self, SpecError> {
        validate(specs)?;
        let mut arenas = Vec::with_capacity(specs.len());
        let mut base = POOL_BASE;
        for spec in specs {
            let arena = Arena::new(base, *spec);
            base = arena.end();
            arenas.push(arena);
        }
        Ok(Pool {
            arenas,
            allocs: 0,
            freed: 0,
            relocations: 0,
            active: 0,
            max: 0,
            tracer: None,
        })
    }

    /// Pool laid out with [`DEFAULT_SPECS`].
    pub fn with_default_specs() -> Result<Self, SpecError> {
        Self::new(&DEFAULT_SPECS)
    }

    /// Install or remove the trace hook.
    pub fn set_tracer(&mut self, tracer: Option<Tracer>) {
        self.tracer = tracer;
    }

    pub fn tracer(&self) -> Option<Tracer> {
        self.tracer
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocs: self.allocs,
            freed: self.freed,
            relocations: self.relocations,
            active: self.active,
            max: self.max,
            total: self.arenas.iter().map(|a| a.storage.len()).sum(),
            blocks: self.arenas.iter().map(|a| a.freelist.bits).sum(),
            arenas: self.arenas.len(),
        }
    }

    pub fn arena_stats(&self, index: usize) -> Option<ArenaStats> {
        self.arenas.get(index).map(Arena::stats)
    }

    /// Largest request the pool can ever satisfy.
    pub fn max_block_size(&self) -> usize {
        self.arenas.last().map_or(0, |a| a.block_size)
    }

    /// Contents of the allocated block starting at `addr`.
    pub fn bytes(&self, addr: Addr) -> Result<&[u8], AllocError> {
        let (arena, index) = self.locate_allocated(addr)?;
        Ok(self.arenas[arena].block(index))
    }

    /// Mutable contents of the allocated block starting at `addr`.
    pub fn bytes_mut(&mut self, addr: Addr) -> Result<&mut [u8], AllocError> {
        let (arena, index) = self.locate_allocated(addr)?;
        Ok(self.arenas[arena].block_mut(index))
    }

    fn class_for(&self, size: usize) -> Option<usize> {
        self.arenas.iter().position(|a| a.block_size >= size)
    }

    /// Arena and block index owning `addr`, by address-range containment.
    fn locate(&self, addr: Addr) -> Result<(usize, usize), AllocError> {
        let arena = self
            .arenas
            .iter()
            .position(|a| a.contains(addr))
            .ok_or(AllocError::Foreign(addr))?;
        let index = self.arenas[arena]
            .index_of(addr)
            .ok_or(AllocError::Foreign(addr))?;
        Ok((arena, index))
    }

    fn locate_allocated(&self, addr: Addr) -> Result<(usize, usize), AllocError> {
        let (arena, index) = self.locate(addr)?;
        if self.arenas[arena].is_free(index) {
            return Err(AllocError::NotAllocated(addr));
        }
        Ok((arena, index))
    }

    fn trace(&self, op: TraceOp, addr: Addr, size: usize, arena: usize) {
        if let Some(tracer) = self.tracer {
            tracer(&TraceEvent {
                op,
                addr,
                size,
                arena,
                stats: self.arenas[arena].stats(),
            });
        }
    }
}

impl Allocator for Pool {
    fn allocate(&mut self, size: usize) -> Result<Addr, AllocError> {
        let arena = self.class_for(size).ok_or(AllocError::NoBlock { size })?;
        let addr = self.arenas[arena].take().ok_or(AllocError::NoBlock { size })?;
        self.allocs += 1;
        self.active += 1;
        self.max = self.max.max(self.active);
        self.trace(TraceOp::Allocate, addr, size, arena);
        Ok(addr)
    }

    fn reallocate(&mut self, addr: Addr, size: usize) -> Result<Addr, AllocError> {
        let (arena, index) = self.locate_allocated(addr)?;
        if size <= self.arenas[arena].block_size {
            self.trace(TraceOp::Reallocate, addr, size, arena);
            return Ok(addr);
        }

        let moved = self.allocate(size)?;
        let (target, target_index) = self.locate(moved)?;
        // Classes grow strictly, so the target arena always sits above the source.
        let (low, high) = self.arenas.split_at_mut(target);
        let src = low[arena].block(index);
        high[0].block_mut(target_index)[..src.len()].copy_from_slice(src);

        self.release(addr)?;
        self.relocations += 1;
        self.trace(TraceOp::Reallocate, moved, size, target);
        Ok(moved)
    }

    fn release(&mut self, addr: Addr) -> Result<(), AllocError> {
        let (arena, index) = self.locate(addr)?;
        if self.arenas[arena].is_free(index) {
            return Err(AllocError::DoubleRelease(addr));
        }
        self.arenas[arena].put(index);
        self.freed += 1;
        self.active -= 1;
        self.trace(TraceOp::Release, addr, 0, arena);
        Ok(())
    }

    fn active(&self) -> usize {
        self.active
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small_pool() -> Pool {
        Pool::new(&[PoolSpec::new(8, 4), PoolSpec::new(32, 2)]).unwrap()
    }

    #[test]
    fn spec_validation() {
        assert_eq!(Pool::new(&[]).unwrap_err(), SpecError::Empty);
        assert_eq!(
            Pool::new(&[PoolSpec::new(8, 0)]).unwrap_err(),
            SpecError::ZeroCount { index: 0 }
        );
        assert_eq!(
            Pool::new(&[PoolSpec::new(0, 4)]).unwrap_err(),
            SpecError::ZeroSize { index: 0 }
        );
        assert_eq!(
            Pool::new(&[PoolSpec::new(16, 4), PoolSpec::new(16, 4)]).unwrap_err(),
            SpecError::NotIncreasing { index: 1, size: 16 }
        );
        assert!(Pool::with_default_specs().is_ok());
    }

    #[test]
    fn smallest_fitting_class_is_used() {
        let mut p = small_pool();
        let a = p.allocate(1).unwrap();
        let b = p.allocate(9).unwrap();
        assert_eq!(p.arena_stats(0).unwrap().active, 1);
        assert_eq!(p.arena_stats(1).unwrap().active, 1);
        assert_eq!(a, Addr(POOL_BASE));
        assert_eq!(b, Addr(POOL_BASE + 8 * 4));
    }

    #[test]
    fn exhausted_class_does_not_spill_over() {
        let mut p = small_pool();
        for _ in 0..4 {
            p.allocate(8).unwrap();
        }
        assert_eq!(p.allocate(8), Err(AllocError::NoBlock { size: 8 }));
        // The larger class is untouched.
        assert_eq!(p.arena_stats(1).unwrap().active, 0);
    }

    #[test]
    fn oversized_request_fails() {
        let mut p = small_pool();
        assert_eq!(p.allocate(33), Err(AllocError::NoBlock { size: 33 }));
        assert_eq!(p.stats().active, 0);
    }

    #[test]
    fn release_makes_block_available_again() {
        let mut p = small_pool();
        let blocks: Vec<Addr> = (0..4).map(|_| p.allocate(4).unwrap()).collect();
        p.release(blocks[2]).unwrap();
        assert_eq!(p.allocate(4).unwrap(), blocks[2]);
        assert!(p.allocate(4).is_err());
    }

    #[test]
    fn double_release_is_reported() {
        let mut p = small_pool();
        let a = p.allocate(4).unwrap();
        p.release(a).unwrap();
        let err = p.release(a).unwrap_err();
        assert_eq!(err, AllocError::DoubleRelease(a));
        assert!(err.is_invariant());
    }

    #[test]
    fn foreign_and_misaligned_release_are_reported() {
        let mut p = small_pool();
        let a = p.allocate(4).unwrap();
        assert_eq!(p.release(Addr(1)), Err(AllocError::Foreign(Addr(1))));
        assert_eq!(p.release(Addr(a.0 + 3)), Err(AllocError::Foreign(Addr(a.0 + 3))));
        assert_eq!(p.stats().active, 1);
    }

    #[test]
    fn reallocate_within_class_keeps_address() {
        let mut p = small_pool();
        let a = p.allocate(2).unwrap();
        assert_eq!(p.reallocate(a, 8).unwrap(), a);
        assert_eq!(p.stats().relocations, 0);
    }

    #[test]
    fn reallocate_across_classes_copies_contents() {
        let mut p = small_pool();
        let a = p.allocate(8).unwrap();
        p.bytes_mut(a).unwrap().copy_from_slice(b"abcdefgh");
        let b = p.reallocate(a, 20).unwrap();
        assert_ne!(a, b);
        assert_eq!(&p.bytes(b).unwrap()[..8], b"abcdefgh");
        assert_eq!(p.bytes(a), Err(AllocError::NotAllocated(a)));
        let stats = p.stats();
        assert_eq!(stats.relocations, 1);
        assert_eq!(stats.active, 1);
    }

    #[test]
    fn failed_growth_leaves_original_intact() {
        let mut p = small_pool();
        let a = p.allocate(8).unwrap();
        p.bytes_mut(a).unwrap()[..3].copy_from_slice(b"xyz");
        let _x = p.allocate(32).unwrap();
        let _y = p.allocate(32).unwrap();
        assert_eq!(p.reallocate(a, 30), Err(AllocError::NoBlock { size: 30 }));
        assert_eq!(&p.bytes(a).unwrap()[..3], b"xyz");
        p.release(a).unwrap();
    }

    #[test]
    fn stats_track_totals() {
        let mut p = small_pool();
        let a = p.allocate(1).unwrap();
        let b = p.allocate(1).unwrap();
        p.release(a).unwrap();
        let s = p.stats();
        assert_eq!(s.allocs, 2);
        assert_eq!(s.freed, 1);
        assert_eq!(s.active, 1);
        assert_eq!(s.max, 2);
        assert_eq!(s.total, 8 * 4 + 32 * 2);
        assert_eq!(s.blocks, 6);
        assert_eq!(s.arenas, 2);
        p.release(b).unwrap();
    }

    #[test]
    fn bitmap_tail_bits_are_not_free() {
        let bm = Bitmap::full(70);
        assert!(bm.get(69));
        assert_eq!(bm.words[1].count_ones(), 6);
    }

    static EVENTS: AtomicUsize = AtomicUsize::new(0);

    fn count_event(_: &TraceEvent) {
        EVENTS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn tracer_sees_every_operation() {
        let mut p = small_pool();
        p.set_tracer(Some(count_event));
        let before = EVENTS.load(Ordering::SeqCst);
        let a = p.allocate(4).unwrap();
        let a = p.reallocate(a, 6).unwrap();
        p.release(a).unwrap();
        assert_eq!(EVENTS.load(Ordering::SeqCst) - before, 3);
        p.set_tracer(None);
        let b = p.allocate(4).unwrap();
        p.release(b).unwrap();
        assert_eq!(EVENTS.load(Ordering::SeqCst) - before, 3);
    }
}
