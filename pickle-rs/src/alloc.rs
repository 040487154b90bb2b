//! Allocator interface shared by the interpreter and its memory back ends.
//!
//! The interpreter never talks to a concrete allocator.  It holds a [`Heap`],
//! a shared handle to anything implementing [`Allocator`], and charges every
//! buffer it keeps alive (words, variable bindings, results) to that heap
//! through a [`Lease`].  Dropping a lease returns its block, so buffers are
//! handed back on every exit path, error unwinding included.
//!
//! Two back ends exist:
//!
//! | Allocator                       | Behaviour                                      |
//! |---------------------------------|------------------------------------------------|
//! | [`SystemAllocator`]             | Unbounded; bookkeeping only, never runs dry    |
//! | [`Pool`](crate::pool::Pool)     | Fixed size classes, fails when a class is full |
//!
//! Addresses ([`Addr`]) are virtual: they identify a block, they are never
//! dereferenced.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

// ── Addresses & errors ────────────────────────────────────────────────────────

/// Virtual address of an allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(pub usize);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Failure reported by an [`Allocator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// No size class fits the request, or the fitting class is exhausted.
    #[error("no block available for {size} bytes")]
    NoBlock { size: usize },
    /// The address does not start a block owned by this allocator.
    #[error("address {0} is not owned by this allocator")]
    Foreign(Addr),
    /// The block at this address was already released.
    #[error("double release of address {0}")]
    DoubleRelease(Addr),
    /// Reallocation was asked for a block that is not currently allocated.
    #[error("reallocation of released block at {0}")]
    NotAllocated(Addr),
}

impl AllocError {
    /// `true` for errors that indicate a bookkeeping bug rather than memory
    /// pressure.
    pub fn is_invariant(&self) -> bool {
        !matches!(self, AllocError::NoBlock { .. })
    }
}

// ── Allocator trait ───────────────────────────────────────────────────────────

/// `malloc`/`realloc`/`free`-shaped allocator interface.
pub trait Allocator {
    /// Allocate a block able to hold `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<Addr, AllocError>;

    /// Resize the block at `addr`.  On failure the original block is left
    /// untouched and still owned by the caller.
    fn reallocate(&mut self, addr: Addr, size: usize) -> Result<Addr, AllocError>;

    /// Return the block at `addr`.
    fn release(&mut self, addr: Addr) -> Result<(), AllocError>;

    /// Number of blocks currently allocated.
    fn active(&self) -> usize;
}

// ── SystemAllocator ───────────────────────────────────────────────────────────

/// Addresses handed out by [`SystemAllocator`] start here, well clear of the
/// range the block pool uses.
pub const SYSTEM_ADDRESS_START: usize = 0x1000_0000;

/// General-purpose fallback allocator.
///
/// Storage itself comes from the Rust global allocator; this type only keeps
/// the books so that leaks and bad releases are caught the same way the pool
/// catches them.  Addresses are bump-allocated and never reused, so a release
/// below the high-water mark of an address that is no longer live is a double
/// release.
#[derive(Debug)]
pub struct SystemAllocator {
    live: HashMap<Addr, usize>,
    next_address: usize,
    allocs: u64,
    freed: u64,
}

impl SystemAllocator {
    pub fn new() -> Self {
        SystemAllocator {
            live: HashMap::new(),
            next_address: SYSTEM_ADDRESS_START,
            allocs: 0,
            freed: 0,
        }
    }

    /// Total number of successful allocations.
    pub fn allocs(&self) -> u64 {
        self.allocs
    }

    /// Total number of successful releases.
    pub fn freed(&self) -> u64 {
        self.freed
    }

    fn unknown(&self, addr: Addr) -> AllocError {
        if addr.0 >= SYSTEM_ADDRESS_START && addr.0 < self.next_address {
            AllocError::DoubleRelease(addr)
        } else {
            AllocError::Foreign(addr)
        }
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&mut self, size: usize) -> Result<Addr, AllocError> {
        let addr = Addr(self.next_address);
        // Zero-sized requests still get a distinct address.
        self.next_address += size.max(1);
        self.live.insert(addr, size);
        self.allocs += 1;
        Ok(addr)
    }

    fn reallocate(&mut self, addr: Addr, size: usize) -> Result<Addr, AllocError> {
        let Some(&current) = self.live.get(&addr) else {
            return Err(match self.unknown(addr) {
                AllocError::DoubleRelease(a) => AllocError::NotAllocated(a),
                other => other,
            });
        };
        if size <= current {
            return Ok(addr);
        }
        let moved = self.allocate(size)?;
        self.release(addr)?;
        Ok(moved)
    }

    fn release(&mut self, addr: Addr) -> Result<(), AllocError> {
        if self.live.remove(&addr).is_none() {
            return Err(self.unknown(addr));
        }
        self.freed += 1;
        Ok(())
    }

    fn active(&self) -> usize {
        self.live.len()
    }
}

// ── Heap handle ───────────────────────────────────────────────────────────────

/// Shared, single-threaded handle to the allocator an interpreter runs on.
///
/// Cloning the handle is cheap and refers to the same allocator.  The
/// allocator is not internally synchronised; a heap must stay on one thread.
#[derive(Clone)]
pub struct Heap {
    inner: Rc<RefCell<dyn Allocator>>,
}

impl Heap {
    /// Wrap an allocator the heap will own.
    pub fn new<A: Allocator + 'static>(allocator: A) -> Self {
        Heap { inner: Rc::new(RefCell::new(allocator)) }
    }

    /// Share an allocator the host also keeps a handle to (for example to
    /// read pool statistics while the interpreter runs).
    pub fn shared<A: Allocator + 'static>(allocator: Rc<RefCell<A>>) -> Self {
        Heap { inner: allocator }
    }

    /// A heap backed by a fresh [`SystemAllocator`].
    pub fn system() -> Self {
        Self::new(SystemAllocator::new())
    }

    /// Allocate a block of `size` bytes, returned as an RAII lease.
    pub fn lease(&self, size: usize) -> Result<Lease, AllocError> {
        let addr = self.inner.borrow_mut().allocate(size)?;
        Ok(Lease { heap: self.clone(), addr, size })
    }

    /// Number of blocks currently allocated.
    pub fn active(&self) -> usize {
        self.inner.borrow().active()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Heap");
        if let Ok(a) = self.inner.try_borrow() {
            s.field("active", &a.active());
        }
        s.finish()
    }
}

// ── Lease ─────────────────────────────────────────────────────────────────────

/// Ownership of one allocator block.  The block is released when the lease
/// is dropped.
pub struct Lease {
    heap: Heap,
    addr: Addr,
    size: usize,
}

impl Lease {
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Size the block was last requested with.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Grow or shrink the block.  On failure the lease keeps its old block.
    pub fn resize(&mut self, size: usize) -> Result<(), AllocError> {
        let addr = self.heap.inner.borrow_mut().reallocate(self.addr, size)?;
        self.addr = addr;
        self.size = size;
        Ok(())
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("addr", &self.addr)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let released = match self.heap.inner.try_borrow_mut() {
            Ok(mut allocator) => allocator.release(self.addr),
            Err(_) => {
                tracing::error!(addr = %self.addr, "allocator busy; block leaked");
                return;
            }
        };
        if let Err(e) = released {
            tracing::error!(addr = %self.addr, "lease release failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocate_and_release() {
        let mut a = SystemAllocator::new();
        let x = a.allocate(10).unwrap();
        let y = a.allocate(0).unwrap();
        assert_ne!(x, y);
        assert_eq!(a.active(), 2);
        a.release(x).unwrap();
        a.release(y).unwrap();
        assert_eq!(a.active(), 0);
        assert_eq!(a.allocs(), 2);
        assert_eq!(a.freed(), 2);
    }

    #[test]
    fn system_double_release_detected() {
        let mut a = SystemAllocator::new();
        let x = a.allocate(4).unwrap();
        a.release(x).unwrap();
        assert_eq!(a.release(x), Err(AllocError::DoubleRelease(x)));
    }

    #[test]
    fn system_foreign_release_detected() {
        let mut a = SystemAllocator::new();
        assert_eq!(a.release(Addr(3)), Err(AllocError::Foreign(Addr(3))));
    }

    #[test]
    fn system_reallocate_grows() {
        let mut a = SystemAllocator::new();
        let x = a.allocate(4).unwrap();
        assert_eq!(a.reallocate(x, 2).unwrap(), x);
        let y = a.reallocate(x, 64).unwrap();
        assert_ne!(x, y);
        assert_eq!(a.active(), 1);
        assert_eq!(a.reallocate(x, 8), Err(AllocError::NotAllocated(x)));
    }

    #[test]
    fn lease_releases_on_drop() {
        let heap = Heap::system();
        {
            let _a = heap.lease(8).unwrap();
            let _b = heap.lease(16).unwrap();
            assert_eq!(heap.active(), 2);
        }
        assert_eq!(heap.active(), 0);
    }

    #[test]
    fn lease_resize_keeps_single_block() {
        let heap = Heap::system();
        let mut l = heap.lease(4).unwrap();
        l.resize(400).unwrap();
        assert_eq!(l.size(), 400);
        assert_eq!(heap.active(), 1);
    }

    #[test]
    fn invariant_classification() {
        assert!(!AllocError::NoBlock { size: 1 }.is_invariant());
        assert!(AllocError::DoubleRelease(Addr(1)).is_invariant());
        assert!(AllocError::Foreign(Addr(1)).is_invariant());
    }
}
