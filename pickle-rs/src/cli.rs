//! Command-line argument parsing.
//!
//! Usage:
//!   pickle [-hasA] [--] [<file>...]

use std::path::PathBuf;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Print usage and exit (`-h`).
    pub help: bool,
    /// Run the interpreter on the block pool (`-a`).
    pub use_pool: bool,
    /// Trace every pool operation (`-A`, implies `-a`).
    pub trace_alloc: bool,
    /// Suppress the interactive prompt (`-s`).
    pub no_prompt: bool,
    /// Scripts to evaluate in order; empty means read stdin.
    pub files: Vec<PathBuf>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();

    for (i, arg) in argv.iter().enumerate() {
        // `--` ends flag processing.
        if arg == "--" {
            args.files.extend(argv[i + 1..].iter().map(PathBuf::from));
            break;
        }

        // Non-flag argument.  Once the first file is seen, everything after
        // it is a file too.
        if !arg.starts_with('-') || arg == "-" || !args.files.is_empty() {
            args.files.push(PathBuf::from(arg));
            continue;
        }

        for c in arg[1..].chars() {
            match c {
                'h' => args.help = true,
                'a' => args.use_pool = true,
                'A' => {
                    args.use_pool = true;
                    args.trace_alloc = true;
                }
                's' => args.no_prompt = true,
                c => return Err(format!("unknown option: -{c}")),
            }
        }
    }

    Ok(args)
}

/// Help text printed for `-h` and after a usage error.
pub fn usage(program: &str) -> String {
    format!(
        "usage: {program} [-hasA] [--] [<file>...]\n\
         \n\
         Evaluate each <file> in order, or read commands from stdin.\n\
         \n\
         \t-h\tprint this help and exit\n\
         \t-a\tallocate from the block pool instead of the system heap\n\
         \t-A\tlike -a, and trace every pool operation (RUST_LOG=pickle::pool=trace)\n\
         \t-s\tsuppress the interactive prompt\n\
         \t--\tstop processing options\n"
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args() {
        assert_eq!(parse_argv(&argv(&[])).unwrap(), CliArgs::default());
    }

    #[test]
    fn bool_flags() {
        let a = parse_argv(&argv(&["-h", "-a", "-s"])).unwrap();
        assert!(a.help && a.use_pool && a.no_prompt);
        assert!(!a.trace_alloc);
    }

    #[test]
    fn combined_flags() {
        let a = parse_argv(&argv(&["-sA"])).unwrap();
        assert!(a.no_prompt && a.use_pool && a.trace_alloc);
    }

    #[test]
    fn files_in_order() {
        let a = parse_argv(&argv(&["-a", "one.tcl", "two.tcl"])).unwrap();
        assert!(a.use_pool);
        assert_eq!(a.files, vec![PathBuf::from("one.tcl"), PathBuf::from("two.tcl")]);
    }

    #[test]
    fn flags_after_first_file_are_files() {
        let a = parse_argv(&argv(&["run.tcl", "-a"])).unwrap();
        assert!(!a.use_pool);
        assert_eq!(a.files.len(), 2);
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["-s", "--", "-weird.tcl"])).unwrap();
        assert!(a.no_prompt);
        assert_eq!(a.files, vec![PathBuf::from("-weird.tcl")]);
    }

    #[test]
    fn unknown_flag() {
        assert_eq!(parse_argv(&argv(&["-az"])), Err("unknown option: -z".to_owned()));
    }

    #[test]
    fn usage_lists_every_flag() {
        let text = usage("pickle");
        for flag in ["-h", "-a", "-A", "-s", "--"] {
            assert!(text.contains(flag), "{flag}");
        }
    }
}
