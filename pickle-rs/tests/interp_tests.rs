//! End-to-end scripting scenarios run through the public embedding API, on
//! both the system allocator and the block pool.

use std::cell::RefCell;
use std::rc::Rc;

use pickle::alloc::AllocError;
use pickle::{Allocator, Config, Error, Heap, Interpreter, Pool, Status};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn system() -> Interpreter {
    Interpreter::new(Heap::system()).unwrap()
}

fn pooled() -> (Interpreter, Rc<RefCell<Pool>>) {
    let pool = Rc::new(RefCell::new(Pool::with_default_specs().unwrap()));
    let interp = Interpreter::new(Heap::shared(pool.clone())).unwrap();
    (interp, pool)
}

/// Evaluate and return `(status, result)`.
fn run(interp: &mut Interpreter, script: &str) -> (Status, String) {
    let status = interp.eval(script);
    (status, interp.result_str().into_owned())
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn proc_doubles_its_argument() {
    let mut i = system();
    assert_eq!(
        run(&mut i, "proc double {x} { expr {$x + $x} }; double 21"),
        (Status::Ok, "42".to_owned())
    );
}

#[test]
fn break_at_top_level_is_an_error() {
    let mut i = system();
    let (status, msg) = run(&mut i, "break");
    assert_eq!(status, Status::Error);
    assert_eq!(msg, "break used outside of a loop");
    let (status, msg) = run(&mut i, "proc p {} { continue }; p");
    assert_eq!(status, Status::Error);
    assert_eq!(msg, "continue used outside of a loop");
}

#[test]
fn countdown_loop_leaves_only_the_global_frame() {
    let mut i = system();
    assert_eq!(i.eval("set x 5; while {$x > 0} { set x [- $x 1] }"), Status::Ok);
    assert_eq!(i.get_var("x").unwrap(), b"0");
    assert_eq!(i.frames().depth(), 1);
    assert_eq!(i.depth(), 0);
}

#[test]
fn procedures_see_caller_variables_but_bind_locally() {
    let mut i = system();
    let script = "set g 1\n\
                  proc touch {} { set local [+ $g 1]; set g 99; return $local }\n\
                  touch";
    assert_eq!(run(&mut i, script), (Status::Ok, "2".to_owned()));
    assert_eq!(i.get_var("g").unwrap(), b"1");
    assert!(!i.var_exists("local"));
}

#[test]
fn recursion_limit_is_exact() {
    let config = Config { max_recursion: 8, ..Config::default() };
    let mut i = Interpreter::with_config(Heap::system(), config).unwrap();
    let nested = |n: usize| "eval {".repeat(n) + "set x ok" + &"}".repeat(n);

    // The top-level script is one level, each `eval` one more.
    assert_eq!(run(&mut i, &nested(7)), (Status::Ok, "ok".to_owned()));
    assert!(i.last_error().is_none());
    let (status, msg) = run(&mut i, &nested(8));
    assert_eq!(status, Status::Error);
    assert_eq!(msg, Error::RecursionLimit(8).to_string());
    assert!(matches!(i.last_error(), Some(Error::RecursionLimit(8))));

    // A script error with the same text is still told apart by its type.
    let (status, _) = run(&mut i, "return {recursion limit exceeded (8)} -1");
    assert_eq!(status, Status::Error);
    assert!(matches!(i.last_error(), Some(Error::Script(_))));
}

#[test]
fn runaway_recursion_releases_everything() {
    let pool = Rc::new(RefCell::new(Pool::with_default_specs().unwrap()));
    let config = Config { max_recursion: 32, ..Config::default() };
    let mut i = Interpreter::with_config(Heap::shared(pool.clone()), config).unwrap();
    i.eval("proc forever {n} { forever [+ $n 1] }");
    i.clear_result();
    let baseline = pool.borrow().stats().active;

    assert_eq!(i.eval("forever 0"), Status::Error);
    assert!(i.result_str().starts_with("recursion limit exceeded"));
    i.clear_result();
    assert_eq!(pool.borrow().stats().active, baseline);
    assert_eq!(i.frames().depth(), 1);
}

#[test]
fn catch_does_not_trap_the_recursion_limit() {
    let config = Config { max_recursion: 16, ..Config::default() };
    let mut i = Interpreter::with_config(Heap::system(), config).unwrap();
    i.eval("proc deep {} { deep }");
    let (status, msg) = run(&mut i, "catch deep; set reached yes");
    assert_eq!(status, Status::Error);
    assert!(msg.starts_with("recursion limit exceeded"));
    assert!(!i.var_exists("reached"));
}

#[test]
fn catch_reports_script_errors() {
    let mut i = system();
    assert_eq!(run(&mut i, "catch {nosuch 1 2} msg"), (Status::Ok, "-1".to_owned()));
    assert_eq!(i.get_var("msg").unwrap(), b"unknown command \"nosuch\"");
    assert_eq!(run(&mut i, "catch {return 7} v; set v"), (Status::Ok, "7".to_owned()));
}

#[test]
fn errors_report_the_failing_line() {
    let mut i = system();
    let (status, _) = run(&mut i, "set a 1\nset b 2\n\nnosuch\nset c 3");
    assert_eq!(status, Status::Error);
    assert_eq!(i.line(), 4);
    assert!(!i.var_exists("c"));
}

#[test]
fn list_and_string_commands_compose() {
    let mut i = system();
    let script = "set l [list a {b c} {}]\n\
                  set out {}\n\
                  foreach e $l { set out [concat $out [string length $e]] }\n\
                  set out";
    assert_eq!(run(&mut i, script), (Status::Ok, "1 3 0".to_owned()));
    assert_eq!(run(&mut i, "llength $l"), (Status::Ok, "3".to_owned()));
    assert_eq!(run(&mut i, "lindex $l 1"), (Status::Ok, "b c".to_owned()));
    assert_eq!(run(&mut i, "join $l -"), (Status::Ok, "a-b c-".to_owned()));
}

#[test]
fn host_commands_use_typed_captures() {
    let mut i = system();
    let calls = Rc::new(RefCell::new(Vec::<String>::new()));
    let seen = calls.clone();
    i.register_command("record", move |interp, argv| {
        seen.borrow_mut().push(argv[1].to_str_lossy().into_owned());
        interp.set_result_int(seen.borrow().len() as i64)?;
        Ok(None)
    })
    .unwrap();
    assert_eq!(run(&mut i, "record a; record [string toupper b]"), (Status::Ok, "2".to_owned()));
    assert_eq!(*calls.borrow(), vec!["a".to_owned(), "B".to_owned()]);
}

// ── Allocator integration ─────────────────────────────────────────────────────

#[test]
fn pool_backed_interpreter_returns_every_block() {
    let (mut i, pool) = pooled();
    i.clear_result();
    let baseline = pool.borrow().stats().active;

    let script = "proc fib {n} { if {$n < 2} { return $n }; \
                  + [fib [- $n 1]] [fib [- $n 2]] }\n\
                  set r [fib 10]";
    assert_eq!(run(&mut i, script), (Status::Ok, "55".to_owned()));
    assert_eq!(run(&mut i, "nosuch [list a b c]").0, Status::Error);

    i.unset_var("r");
    i.remove_command("fib");
    i.clear_result();
    assert_eq!(pool.borrow().stats().active, baseline);
    assert!(pool.borrow().stats().allocs > 0);
}

#[test]
fn pool_exhaustion_is_a_clean_error() {
    // Results may be longer than the largest size class (512 bytes).
    let pool = Rc::new(RefCell::new(Pool::with_default_specs().unwrap()));
    let config = Config { max_string: 4096, ..Config::default() };
    let mut i = Interpreter::with_config(Heap::shared(pool.clone()), config).unwrap();
    let status = i.eval("set big [string repeat x 600]");
    assert_eq!(status, Status::Error);
    assert_eq!(i.result_str(), "out of memory: no block available for 600 bytes");
    assert!(!i.var_exists("big"));
    i.clear_result();
    let stats = pool.borrow().stats();
    assert!(stats.active <= stats.total);
    assert_eq!(i.eval("set small [string repeat x 40]"), Status::Ok);
}

#[test]
fn double_release_is_an_invariant_violation() {
    let mut pool = Pool::with_default_specs().unwrap();
    let addr = pool.allocate(10).unwrap();
    pool.release(addr).unwrap();
    let err = pool.release(addr).unwrap_err();
    assert_eq!(err, AllocError::DoubleRelease(addr));
    let err = Error::from(err);
    assert!(err.is_fatal());
    assert!(matches!(err, Error::Invariant(_)));
}
