//! Host commands for the command-line front end.
//!
//! These are registered through the public embedding API like any third
//! party command would be.  Each is a closure capturing exactly what it
//! needs (an output sink, a pool handle) instead of an untyped private-data
//! pointer.
//!
//! | Command                       | Result                                  |
//! |-------------------------------|-----------------------------------------|
//! | `puts ?-nonewline? text`      | writes `text` to the output sink         |
//! | `source file`                 | result of evaluating `file`              |
//! | `heap`                        | `1` when the block pool is in use        |
//! | `heap <counter>`              | pool-wide counter (see [`heap_query`])   |
//! | `heap arena-<field> <n>`      | counter of arena `n`                     |
//! | `heap tron` / `heap troff`    | install / remove the allocation tracer   |

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use crate::command::arity_error;
use crate::error::{Error, Outcome};
use crate::interp::Interpreter;
use crate::pool::{self, Pool};
use crate::text::{parse_int, Text};

/// Register `puts` writing to `out`.
pub fn register_puts<W: Write + 'static>(
    interp: &mut Interpreter,
    out: Rc<RefCell<W>>,
) -> Result<(), Error> {
    interp.register_command("puts", move |_, argv| {
        let (text, newline) = match argv {
            [_, text] => (text, true),
            [_, flag, text] if *flag == "-nonewline" => (text, false),
            _ => return Err(arity_error(2, argv)),
        };
        let mut out = out.borrow_mut();
        let written = out
            .write_all(text)
            .and_then(|()| if newline { out.write_all(b"\n") } else { Ok(()) })
            .and_then(|()| out.flush());
        written.map_err(|e| Error::script(format!("puts: {e}")))?;
        Ok(None)
    })
}

/// Register `source`, evaluating a script file in the current frame.
pub fn register_source(interp: &mut Interpreter) -> Result<(), Error> {
    interp.register_command("source", |interp, argv| {
        let [_, file] = argv else {
            return Err(arity_error(2, argv));
        };
        source(interp, Path::new(&*file.to_str_lossy()))
    })
}

/// Evaluate the contents of `path` as a nested script.
pub fn source(interp: &mut Interpreter, path: &Path) -> Outcome {
    let script = std::fs::read(path).map_err(|e| {
        Error::script(format!("couldn't read file \"{}\": {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), bytes = script.len(), "source");
    interp.eval_script(&script)
}

/// Answer a `heap` query against `pool`.  Unknown queries and out-of-range
/// arenas yield -1.
pub fn heap_query(pool: &Pool, query: &[u8], arena: Option<&[u8]>) -> i64 {
    let Some(arena) = arena else {
        let s = pool.stats();
        return match query {
            b"freed" => s.freed as i64,
            b"allocs" => s.allocs as i64,
            b"reallocs" => s.relocations as i64,
            b"active" => s.active as i64,
            b"max" => s.max as i64,
            b"total" => s.total as i64,
            b"blocks" => s.blocks as i64,
            b"arenas" => s.arenas as i64,
            _ => -1,
        };
    };
    let stats = parse_int(arena)
        .and_then(|n| usize::try_from(n).ok())
        .and_then(|n| pool.arena_stats(n));
    let Some(a) = stats else {
        return -1;
    };
    match query {
        b"arena-size" => a.blocks as i64,
        b"arena-block" => a.block_size as i64,
        b"arena-active" => a.active as i64,
        b"arena-max" => a.max as i64,
        _ => -1,
    }
}

/// Register `heap`.  `pool` is `None` when the interpreter runs on the
/// general-purpose allocator.
pub fn register_heap(interp: &mut Interpreter, pool: Option<Rc<RefCell<Pool>>>) -> Result<(), Error> {
    interp.register_command("heap", move |interp, argv| {
        if argv.len() > 3 {
            return Err(arity_error(3, argv));
        }
        let Some(pool) = &pool else {
            if argv.len() == 1 {
                interp.set_result_int(0)?;
            } else {
                interp.set_result("unknown")?;
            }
            return Ok(None);
        };
        let query = argv.get(1).map(Text::as_bytes);
        let info = match query {
            None => 1,
            Some(b"tron") if argv.len() == 2 => {
                pool.borrow_mut().set_tracer(Some(pool::log_event));
                return Ok(None);
            }
            Some(b"troff") if argv.len() == 2 => {
                pool.borrow_mut().set_tracer(None);
                return Ok(None);
            }
            Some(q) => heap_query(&pool.borrow(), q, argv.get(2).map(Text::as_bytes)),
        };
        interp.set_result_int(info)?;
        Ok(None)
    })
}

/// Register every host command.
pub fn register_all<W: Write + 'static>(
    interp: &mut Interpreter,
    out: Rc<RefCell<W>>,
    pool: Option<Rc<RefCell<Pool>>>,
) -> Result<(), Error> {
    register_puts(interp, out)?;
    register_source(interp)?;
    register_heap(interp, pool)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
