//! Allocator-backed byte string.
//!
//! Every word, variable value and result the interpreter holds is a
//! [`Text`].  The bytes live in an ordinary `Vec<u8>`, but the string is
//! charged to the interpreter's [`Heap`] through a [`Lease`] sized to its
//! length: a string can only grow if the allocator grants the larger block,
//! and dropping the string returns its block.  Byte-string semantics only;
//! no encoding is assumed.

use std::borrow::{Borrow, Cow};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use crate::alloc::{AllocError, Heap, Lease};

/// Owned, heap-charged byte string.
pub struct Text {
    bytes: Vec<u8>,
    lease: Lease,
}

impl Text {
    /// An empty string.
    pub fn new(heap: &Heap) -> Result<Self, AllocError> {
        Ok(Text { bytes: Vec::new(), lease: heap.lease(0)? })
    }

    /// A copy of `bytes`.
    pub fn from_bytes(heap: &Heap, bytes: &[u8]) -> Result<Self, AllocError> {
        let lease = heap.lease(bytes.len())?;
        Ok(Text { bytes: bytes.to_vec(), lease })
    }

    /// Canonical base-10 form of `n`.
    pub fn from_int(heap: &Heap, n: i64) -> Result<Self, AllocError> {
        Self::from_bytes(heap, n.to_string().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn heap(&self) -> &Heap {
        self.lease.heap()
    }

    /// Copy into a new, independently leased string.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        Self::from_bytes(self.heap(), &self.bytes)
    }

    /// Append `more`, growing the lease first.  On failure the string is
    /// unchanged.
    pub fn push_bytes(&mut self, more: &[u8]) -> Result<(), AllocError> {
        if more.is_empty() {
            return Ok(());
        }
        self.reserve_for(self.bytes.len() + more.len())?;
        self.bytes.extend_from_slice(more);
        Ok(())
    }

    pub fn push_byte(&mut self, b: u8) -> Result<(), AllocError> {
        self.push_bytes(&[b])
    }

    /// Replace the contents with `bytes`.
    pub fn assign(&mut self, bytes: &[u8]) -> Result<(), AllocError> {
        self.reserve_for(bytes.len())?;
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn reserve_for(&mut self, len: usize) -> Result<(), AllocError> {
        if len > self.lease.size() {
            self.lease.resize(len)?;
        }
        Ok(())
    }

    /// Lossy UTF-8 view, for diagnostics and host output.
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Base-10 integer interpretation, if the whole string is one.
    pub fn to_int(&self) -> Option<i64> {
        parse_int(&self.bytes)
    }
}

/// Parse a base-10 integer with optional sign and surrounding whitespace.
pub fn parse_int(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

impl Deref for Text {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for Text {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Borrow<[u8]> for Text {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Text {}

impl PartialEq<[u8]> for Text {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes == other
    }
}

impl PartialEq<str> for Text {
    fn eq(&self, other: &str) -> bool {
        self.bytes == other.as_bytes()
    }
}

impl PartialEq<&str> for Text {
    fn eq(&self, other: &&str) -> bool {
        self.bytes == other.as_bytes()
    }
}

// Must agree with `[u8]`'s Hash so `Borrow<[u8]>` lookups work.
impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.as_slice().hash(state);
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolSpec};
    use std::collections::HashMap;

    #[test]
    fn push_and_assign() {
        let heap = Heap::system();
        let mut t = Text::from_bytes(&heap, b"ab").unwrap();
        t.push_bytes(b"cd").unwrap();
        t.push_byte(b'e').unwrap();
        assert_eq!(t, "abcde");
        t.assign(b"z").unwrap();
        assert_eq!(t.as_bytes(), b"z");
        assert_eq!(heap.active(), 1);
    }

    #[test]
    fn growth_fails_cleanly_when_pool_refuses() {
        let heap = Heap::new(Pool::new(&[PoolSpec::new(4, 2)]).unwrap());
        let mut t = Text::from_bytes(&heap, b"abc").unwrap();
        assert!(t.push_bytes(b"de").is_err());
        assert_eq!(t, "abc");
    }

    #[test]
    fn pool_blocks_track_length_not_contents() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let pool = Rc::new(RefCell::new(
            Pool::new(&[PoolSpec::new(8, 4), PoolSpec::new(64, 2)]).unwrap(),
        ));
        let heap = Heap::shared(pool.clone());
        let mut t = Text::from_bytes(&heap, b"abc").unwrap();
        assert_eq!(RefCell::borrow(&pool).arena_stats(0).unwrap().active, 1);

        t.push_bytes(&[b'x'; 20]).unwrap();
        assert_eq!(t.len(), 23);
        assert_eq!(t.lease.size(), 23);
        let p = RefCell::borrow(&pool);
        assert_eq!(p.arena_stats(0).unwrap().active, 0);
        assert_eq!(p.arena_stats(1).unwrap().active, 1);
        assert_eq!(p.stats().relocations, 1);
        assert!(p.bytes(t.lease.addr()).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn drop_returns_block() {
        let heap = Heap::system();
        let t = Text::from_int(&heap, -42).unwrap();
        let u = t.try_clone().unwrap();
        assert_eq!(heap.active(), 2);
        drop(t);
        drop(u);
        assert_eq!(heap.active(), 0);
    }

    #[test]
    fn integer_interpretation() {
        let heap = Heap::system();
        assert_eq!(Text::from_bytes(&heap, b" 17 ").unwrap().to_int(), Some(17));
        assert_eq!(Text::from_bytes(&heap, b"-3").unwrap().to_int(), Some(-3));
        assert_eq!(Text::from_bytes(&heap, b"1x").unwrap().to_int(), None);
        assert_eq!(Text::new(&heap).unwrap().to_int(), None);
    }

    #[test]
    fn usable_as_map_key() {
        let heap = Heap::system();
        let mut map = HashMap::new();
        map.insert(Text::from_bytes(&heap, b"key").unwrap(), 1);
        assert_eq!(map.get(&b"key"[..]), Some(&1));
    }
}
