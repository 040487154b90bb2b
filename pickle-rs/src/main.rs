use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use pickle::builtins::make_list;
use pickle::cli::{self, CliArgs};
use pickle::host;
use pickle::pool::{self, Pool};
use pickle::{Error, Heap, Interpreter, Status};

const PROMPT: &str = "pickle> ";

// ── Logging ───────────────────────────────────────────────────────────────────

/// Install the `tracing` subscriber.  `RUST_LOG` selects what is shown
/// (warnings by default); `-A` adds pool tracing on top.
fn init_tracing(trace_alloc: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if trace_alloc {
        match "pickle::pool=trace".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("pickle: bad log directive: {e}"),
        }
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .with(filter)
        .init();
}

// ── Setup ─────────────────────────────────────────────────────────────────────

/// Build an interpreter with the host commands and front-end variables.
fn build(args: &CliArgs) -> Result<Interpreter, Error> {
    let pool = if args.use_pool {
        let mut pool = Pool::with_default_specs().map_err(|e| Error::script(e.to_string()))?;
        if args.trace_alloc {
            pool.set_tracer(Some(pool::log_event));
        }
        Some(Rc::new(RefCell::new(pool)))
    } else {
        None
    };
    let heap = match &pool {
        Some(pool) => Heap::shared(pool.clone()),
        None => Heap::system(),
    };

    let mut interp = Interpreter::new(heap)?;
    host::register_all(&mut interp, Rc::new(RefCell::new(io::stdout())), pool)?;

    interp.set_var("prompt", if args.no_prompt { "" } else { PROMPT })?;
    let files: Vec<String> = args.files.iter().map(|p| p.display().to_string()).collect();
    let argv = make_list(interp.heap(), files.iter().map(String::as_bytes))?;
    interp.set_var("argv", argv)?;
    interp.set_var_int("argc", files.len() as i64)?;
    Ok(interp)
}

// ── Drivers ───────────────────────────────────────────────────────────────────

/// Evaluate each file in order, stopping at the first failure.
fn run_files(interp: &mut Interpreter, files: &[PathBuf]) -> ExitCode {
    for path in files {
        let script = match std::fs::read(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("pickle: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        };
        tracing::debug!(path = %path.display(), "evaluating");
        let status = interp.eval(&script);
        if status != Status::Ok {
            eprintln!(
                "pickle: {}:{}: {}",
                path.display(),
                interp.line(),
                interp.result_str()
            );
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

/// Read-eval-print loop on stdin.  Prints `[status] result` for every line
/// that leaves a non-empty result.
fn run_interactive(interp: &mut Interpreter) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        if let Ok(prompt) = interp.get_var("prompt") {
            stdout.write_all(prompt)?;
        }
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let status = interp.eval(line.trim_end_matches(['\r', '\n']));
        if !interp.result().is_empty() {
            writeln!(stdout, "[{status}] {}", interp.result_str())?;
        }
    }
}

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("pickle: {e}");
            eprint!("{}", cli::usage("pickle"));
            return ExitCode::from(2);
        }
    };
    if args.help {
        print!("{}", cli::usage("pickle"));
        return ExitCode::SUCCESS;
    }

    init_tracing(args.trace_alloc);

    let mut interp = match build(&args) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("pickle: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !args.files.is_empty() {
        return run_files(&mut interp, &args.files);
    }
    match run_interactive(&mut interp) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pickle: {e}");
            ExitCode::FAILURE
        }
    }
}
