//! Command table and dispatch.
//!
//! A command is either native Rust (a closure over whatever state the host
//! wants it to see) or a script procedure capturing its parameter list and
//! body.  Names are unique: registering an existing name replaces it, which
//! is how procedures shadow built-ins.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::alloc::{AllocError, Heap};
use crate::error::{Error, Outcome};
use crate::interp::Interpreter;
use crate::text::Text;

/// Signature of a native command.  `argv[0]` is the command name.
pub type NativeFn = dyn Fn(&mut Interpreter, &[Text]) -> Outcome;

/// A user-defined procedure.
pub struct Proc {
    pub params: Vec<Text>,
    pub body: Text,
}

impl Proc {
    /// `true` when the final parameter is `args`, which collects the
    /// remaining actuals.
    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p.as_bytes() == b"args")
    }
}

/// A command handler.  Cloning shares the handler.
#[derive(Clone)]
pub enum Command {
    Native(Rc<NativeFn>),
    Proc(Rc<Proc>),
}

impl Command {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Text]) -> Outcome + 'static,
    {
        Command::Native(Rc::new(f))
    }

    pub fn as_proc(&self) -> Option<&Proc> {
        match self {
            Command::Proc(p) => Some(p),
            Command::Native(_) => None,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Native(_) => f.write_str("Native"),
            Command::Proc(p) => f
                .debug_struct("Proc")
                .field("params", &p.params)
                .field("body", &p.body)
                .finish(),
        }
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CommandTable {
    map: HashMap<Text, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace.  Returns the handler previously bound to `name`.
    pub fn register(
        &mut self,
        heap: &Heap,
        name: &[u8],
        command: Command,
    ) -> Result<Option<Command>, AllocError> {
        tracing::debug!(name = %String::from_utf8_lossy(name), "register command");
        if let Some(slot) = self.map.get_mut(name) {
            return Ok(Some(std::mem::replace(slot, command)));
        }
        self.map.insert(Text::from_bytes(heap, name)?, command);
        Ok(None)
    }

    pub fn get(&self, name: &[u8]) -> Option<&Command> {
        self.map.get(name)
    }

    /// Handler for `name`, or an "unknown command" error.
    pub fn resolve(&self, name: &[u8]) -> Result<Command, Error> {
        self.map.get(name).cloned().ok_or_else(|| {
            Error::script(format!("unknown command \"{}\"", String::from_utf8_lossy(name)))
        })
    }

    pub fn remove(&mut self, name: &[u8]) -> Option<Command> {
        tracing::debug!(name = %String::from_utf8_lossy(name), "remove command");
        self.map.remove(name)
    }

    /// Move `from` to `to`, replacing anything already there.  An empty `to`
    /// deletes the command.
    pub fn rename(&mut self, heap: &Heap, from: &[u8], to: &[u8]) -> Result<(), Error> {
        let Some(command) = self.map.remove(from) else {
            return Err(Error::script(format!(
                "can't rename \"{}\": no such command",
                String::from_utf8_lossy(from)
            )));
        };
        tracing::debug!(
            from = %String::from_utf8_lossy(from),
            to = %String::from_utf8_lossy(to),
            "rename command"
        );
        if to.is_empty() {
            return Ok(());
        }
        match self.register(heap, to, command.clone()) {
            Ok(_) => Ok(()),
            Err(e) => {
                // Put it back rather than losing the handler.
                if let Ok(key) = Text::from_bytes(heap, from) {
                    self.map.insert(key, command);
                }
                Err(e.into())
            }
        }
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Text> {
        self.map.keys()
    }

    pub fn procs(&self) -> impl Iterator<Item = (&Text, &Proc)> {
        self.map.iter().filter_map(|(k, c)| c.as_proc().map(|p| (k, p)))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Standard arity diagnostic: `wrong # args: expected N, got M: "argv..."`.
pub fn arity_error(expected: usize, argv: &[Text]) -> Error {
    let mut invocation = String::new();
    for (i, a) in argv.iter().enumerate() {
        if i > 0 {
            invocation.push(' ');
        }
        invocation.push_str(&a.to_str_lossy());
    }
    Error::script(format!(
        "wrong # args: expected {expected}, got {}: \"{invocation}\"",
        argv.len()
    ))
}

/// Fail with [`arity_error`] unless `argv` has exactly `expected` words.
pub fn check_arity(argv: &[Text], expected: usize) -> Result<(), Error> {
    if argv.len() == expected {
        Ok(())
    } else {
        Err(arity_error(expected, argv))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn nop() -> Command {
        Command::native(|_, _| Ok(None))
    }

    #[test]
    fn register_replaces() {
        let heap = Heap::system();
        let mut t = CommandTable::new();
        assert!(t.register(&heap, b"x", nop()).unwrap().is_none());
        assert!(t.register(&heap, b"x", nop()).unwrap().is_some());
        assert_eq!(t.len(), 1);
        assert_eq!(heap.active(), 1);
    }

    #[test]
    fn resolve_unknown_fails() {
        let t = CommandTable::new();
        let e = t.resolve(b"nope").unwrap_err();
        assert_eq!(e.to_string(), "unknown command \"nope\"");
    }

    #[test]
    fn rename_and_delete() {
        let heap = Heap::system();
        let mut t = CommandTable::new();
        t.register(&heap, b"a", nop()).unwrap();
        t.rename(&heap, b"a", b"b").unwrap();
        assert!(!t.contains(b"a"));
        assert!(t.contains(b"b"));
        t.rename(&heap, b"b", b"").unwrap();
        assert!(t.is_empty());
        assert!(t.rename(&heap, b"b", b"c").is_err());
        assert_eq!(heap.active(), 0);
    }

    #[test]
    fn arity_message() {
        let heap = Heap::system();
        let argv = vec![
            Text::from_bytes(&heap, b"set").unwrap(),
            Text::from_bytes(&heap, b"a").unwrap(),
            Text::from_bytes(&heap, b"b").unwrap(),
            Text::from_bytes(&heap, b"c").unwrap(),
        ];
        assert_eq!(
            check_arity(&argv, 3).unwrap_err().to_string(),
            "wrong # args: expected 3, got 4: \"set a b c\""
        );
        assert!(check_arity(&argv[..3], 3).is_ok());
    }
}
