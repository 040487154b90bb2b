//! pickle: a small embeddable Tcl-like command language.
//!
//! Everything is a command: a script is a sequence of commands, each a list
//! of words produced by brace/quote grouping, `$var` and `[cmd]`
//! substitution.  Every string the interpreter owns is charged to a
//! pluggable allocator, either the general-purpose [`SystemAllocator`] or
//! the deterministic fixed-size-class [`Pool`].
//!
//! # Quick start
//!
//! ```rust
//! use pickle::{Heap, Interpreter, Status};
//!
//! let mut interp = Interpreter::new(Heap::system()).unwrap();
//! let status = interp.eval("proc double {x} { expr {$x + $x} }; double 21");
//! assert_eq!(status, Status::Ok);
//! assert_eq!(interp.result(), b"42");
//! ```
//!
//! Running on the block pool while keeping a handle for statistics:
//!
//! ```rust
//! use std::{cell::RefCell, rc::Rc};
//! use pickle::{Heap, Interpreter, Pool};
//!
//! let pool = Rc::new(RefCell::new(Pool::with_default_specs().unwrap()));
//! let mut interp = Interpreter::new(Heap::shared(pool.clone())).unwrap();
//! interp.eval("set greeting hello");
//! assert!(pool.borrow().stats().active > 0);
//! ```

pub mod alloc;
pub mod builtins;
pub mod cli;
pub mod command;
pub mod error;
pub mod expr;
pub mod frame;
pub mod host;
pub mod interp;
pub mod lexer;
pub mod pool;
pub mod text;

// Re-exports for convenience.
pub use alloc::{Addr, AllocError, Allocator, Heap, SystemAllocator};
pub use command::Command;
pub use error::{ControlFlow, Error, Outcome, Status};
pub use interp::{Config, Interpreter};
pub use pool::{Pool, PoolSpec, PoolStats};
pub use text::Text;
