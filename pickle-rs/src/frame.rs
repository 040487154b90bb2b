//! Call frames and variable storage.
//!
//! Frames live on a stack in strict LIFO order.  Each frame has a parent
//! link; lookups walk from the current frame outward through the parents.
//! The current frame is normally the top of the stack, but `uplevel` can
//! point it at an ancestor for the duration of an evaluation.  Frames pushed
//! meanwhile still go on top of the stack and are parented to that ancestor.

use std::collections::HashMap;

use crate::alloc::{AllocError, Heap};
use crate::text::Text;

/// One scope: variable bindings plus a link to the enclosing scope.
#[derive(Debug)]
pub struct Frame {
    vars: HashMap<Text, Text>,
    parent: Option<usize>,
}

impl Frame {
    fn new(parent: Option<usize>) -> Self {
        Frame { vars: HashMap::new(), parent }
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn get(&self, name: &[u8]) -> Option<&Text> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over the bindings of this frame only.
    pub fn iter(&self) -> impl Iterator<Item = (&Text, &Text)> {
        self.vars.iter()
    }
}

/// The frame stack.  Index 0 is the global frame and is never popped.
#[derive(Debug)]
pub struct Frames {
    stack: Vec<Frame>,
    current: usize,
}

impl Default for Frames {
    fn default() -> Self {
        Self::new()
    }
}

impl Frames {
    pub fn new() -> Self {
        Frames { stack: vec![Frame::new(None)], current: 0 }
    }

    /// Number of frames on the stack, the global frame included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Make `index` the current frame.  Returns the previous current frame,
    /// or `None` if `index` is not on the stack.
    pub fn set_current(&mut self, index: usize) -> Option<usize> {
        if index >= self.stack.len() {
            return None;
        }
        Some(std::mem::replace(&mut self.current, index))
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.stack.get(index)
    }

    /// Number of parent links between the current frame and the global one.
    pub fn level(&self) -> usize {
        self.chain(self.current).count() - 1
    }

    /// Frame reached by following `steps` parent links from the current one.
    pub fn ancestor(&self, steps: usize) -> Option<usize> {
        self.chain(self.current).nth(steps)
    }

    fn chain(&self, start: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(start), move |&i| self.stack[i].parent)
    }

    /// Create a new scope parented to the current frame and make it current.
    pub fn push(&mut self) {
        self.stack.push(Frame::new(Some(self.current)));
        self.current = self.stack.len() - 1;
    }

    /// Destroy the top frame and its bindings.  The global frame is never
    /// removed.
    pub fn pop(&mut self) -> Option<Frame> {
        if self.stack.len() == 1 {
            return None;
        }
        let frame = self.stack.pop()?;
        self.current = frame.parent.unwrap_or(0);
        Some(frame)
    }

    /// Look `name` up from the current frame outward.
    pub fn get(&self, name: &[u8]) -> Option<&Text> {
        self.chain(self.current).find_map(|i| self.stack[i].get(name))
    }

    pub fn exists(&self, name: &[u8]) -> bool {
        self.get(name).is_some()
    }

    /// Create or update a binding in the current frame.  On allocation
    /// failure an existing binding keeps its old value.
    pub fn set(&mut self, heap: &Heap, name: &[u8], value: &[u8]) -> Result<(), AllocError> {
        let vars = &mut self.stack[self.current].vars;
        if let Some(slot) = vars.get_mut(name) {
            return slot.assign(value);
        }
        let key = Text::from_bytes(heap, name)?;
        let value = Text::from_bytes(heap, value)?;
        vars.insert(key, value);
        Ok(())
    }

    /// Remove a binding from the current frame.  Returns `true` if it existed.
    pub fn unset(&mut self, name: &[u8]) -> bool {
        self.stack[self.current].vars.remove(name).is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let heap = Heap::system();
        let mut f = Frames::new();
        f.set(&heap, b"x", b"1").unwrap();
        assert_eq!(f.get(b"x").unwrap(), "1");
        f.set(&heap, b"x", b"22").unwrap();
        assert_eq!(f.get(b"x").unwrap(), "22");
        assert_eq!(f.frame(0).unwrap().len(), 1);
        assert_eq!(heap.active(), 2);
    }

    #[test]
    fn lookup_falls_through_to_outer_frames() {
        let heap = Heap::system();
        let mut f = Frames::new();
        f.set(&heap, b"g", b"global").unwrap();
        f.push();
        assert_eq!(f.get(b"g").unwrap(), "global");
        f.set(&heap, b"g", b"local").unwrap();
        assert_eq!(f.get(b"g").unwrap(), "local");
        f.pop();
        assert_eq!(f.get(b"g").unwrap(), "global");
    }

    #[test]
    fn set_only_touches_current_frame() {
        let heap = Heap::system();
        let mut f = Frames::new();
        f.push();
        f.set(&heap, b"x", b"1").unwrap();
        f.pop();
        assert!(!f.exists(b"x"));
    }

    #[test]
    fn pop_releases_bindings() {
        let heap = Heap::system();
        let mut f = Frames::new();
        f.push();
        f.set(&heap, b"a", b"1").unwrap();
        f.set(&heap, b"b", b"2").unwrap();
        assert_eq!(heap.active(), 4);
        drop(f.pop());
        assert_eq!(heap.active(), 0);
    }

    #[test]
    fn global_frame_is_never_popped() {
        let mut f = Frames::new();
        assert!(f.pop().is_none());
        assert_eq!(f.depth(), 1);
    }

    #[test]
    fn levels_and_ancestors() {
        let mut f = Frames::new();
        f.push();
        f.push();
        assert_eq!(f.level(), 2);
        assert_eq!(f.ancestor(1), Some(1));
        assert_eq!(f.ancestor(2), Some(0));
        assert_eq!(f.ancestor(3), None);

        // Frames pushed while an ancestor is current hang off that ancestor.
        let saved = f.set_current(0).unwrap();
        f.push();
        assert_eq!(f.level(), 1);
        f.pop();
        assert_eq!(f.current(), 0);
        f.set_current(saved);
        assert_eq!(f.level(), 2);
    }

    #[test]
    fn unset_removes_binding() {
        let heap = Heap::system();
        let mut f = Frames::new();
        f.set(&heap, b"x", b"1").unwrap();
        assert!(f.unset(b"x"));
        assert!(!f.unset(b"x"));
        assert_eq!(heap.active(), 0);
    }
}
