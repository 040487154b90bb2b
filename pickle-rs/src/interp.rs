//! The evaluator and the embedding API.
//!
//! [`Interpreter::eval`] is the host entry point.  It runs the driving loop:
//! pull tokens from the [`Lexer`], assemble them into words, and dispatch a
//! command at each end of line.  Any status other than ok stops the script
//! and goes back to the caller unchanged; loops and procedure calls are the
//! places that absorb `break`, `continue` and `return`.
//!
//! Every word, binding and result is a [`Text`] charged to the interpreter's
//! [`Heap`], so whatever a script allocated is returned to the allocator as
//! soon as the evaluation step that owns it finishes, error paths included.

use std::borrow::Cow;

use crate::alloc::Heap;
use crate::builtins;
use crate::command::{arity_error, Command, CommandTable, Proc};
use crate::error::{ControlFlow, Error, Outcome, Status};
use crate::expr::{self, Value};
use crate::frame::Frames;
use crate::lexer::{unescape, Lexer, TokenKind};
use crate::text::{parse_int, Text};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Interpreter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of nested script evaluations.
    pub max_recursion: usize,
    /// Maximum length of a command result, in bytes.
    pub max_string: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_recursion: 128, max_string: 512 }
    }
}

// ── Result slot ───────────────────────────────────────────────────────────────

/// The current result: either a borrowed constant or an owned string.
#[derive(Debug)]
enum ResultValue {
    Static(&'static [u8]),
    Owned(Text),
}

impl ResultValue {
    fn as_bytes(&self) -> &[u8] {
        match self {
            ResultValue::Static(s) => s,
            ResultValue::Owned(t) => t.as_bytes(),
        }
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter {
    heap: Heap,
    frames: Frames,
    commands: CommandTable,
    result: ResultValue,
    /// Active nested evaluations.
    depth: usize,
    /// Line of the command most recently dispatched.
    line: usize,
    /// Line of the innermost command that failed, once an error is unwinding.
    error_line: Option<usize>,
    /// Error that ended the last top-level evaluation.
    last_error: Option<Error>,
    config: Config,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("heap", &self.heap)
            .field("frames", &self.frames.depth())
            .field("commands", &self.commands.len())
            .field("depth", &self.depth)
            .field("config", &self.config)
            .finish()
    }
}

impl Interpreter {
    /// New interpreter on `heap` with default limits and the built-in
    /// command set.
    pub fn new(heap: Heap) -> Result<Self, Error> {
        Self::with_config(heap, Config::default())
    }

    pub fn with_config(heap: Heap, config: Config) -> Result<Self, Error> {
        let mut interp = Interpreter {
            heap,
            frames: Frames::new(),
            commands: CommandTable::new(),
            result: ResultValue::Static(b""),
            depth: 0,
            line: 1,
            error_line: None,
            last_error: None,
            config,
        };
        builtins::register_all(&mut interp)?;
        Ok(interp)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Nesting depth of the evaluation in progress (0 when idle).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Line of the failing command after an error, otherwise of the command
    /// most recently dispatched.
    pub fn line(&self) -> usize {
        self.error_line.unwrap_or(self.line)
    }

    /// The typed error behind the last failed [`eval`](Self::eval), or
    /// `None` if it succeeded.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Evaluate a script at top level.  The result (or error message) is
    /// left in [`result`](Self::result).
    ///
    /// Uncaught `break`/`continue` are errors here; `return` ends the script
    /// normally with its value.
    pub fn eval(&mut self, script: impl AsRef<[u8]>) -> Status {
        self.error_line = None;
        self.last_error = None;
        let outcome = self.eval_script(script.as_ref()).and_then(|flow| match flow {
            Some(ControlFlow::Return) | None => Ok(None),
            Some(flow) => Err(outside_loop(flow)),
        });
        if let Err(e) = &outcome {
            if e.is_fatal() {
                tracing::warn!(error = %e, line = self.line(), "evaluation aborted");
            }
            self.set_error_message(e);
            self.last_error = Some(e.clone());
        }
        Status::of(&outcome)
    }

    /// Evaluate a nested script in the current frame.  Used by commands that
    /// run script bodies; counts toward the recursion limit.
    pub fn eval_script(&mut self, script: &[u8]) -> Outcome {
        if self.depth >= self.config.max_recursion {
            return Err(Error::RecursionLimit(self.config.max_recursion));
        }
        self.depth += 1;
        let outcome = self.run(script);
        self.depth -= 1;
        outcome
    }

    /// Evaluate `script` with frame `frame` as the current scope.
    pub fn eval_in_frame(&mut self, frame: usize, script: &[u8]) -> Outcome {
        let Some(saved) = self.frames.set_current(frame) else {
            return Err(Error::script("bad level"));
        };
        let outcome = self.eval_script(script);
        self.frames.set_current(saved);
        outcome
    }

    fn run(&mut self, script: &[u8]) -> Outcome {
        self.clear_result();
        let mut lexer = Lexer::new(script);
        let mut argv: Vec<Text> = Vec::new();
        let mut prev = TokenKind::Eol;
        let mut cmd_line = lexer.line();
        loop {
            let token = match lexer.next_token() {
                Ok(t) => t,
                Err(e) => {
                    self.error_line.get_or_insert(lexer.line());
                    return Err(e.into());
                }
            };
            let word = match token.kind {
                TokenKind::Eof => return Ok(None),
                TokenKind::Sep => {
                    prev = TokenKind::Sep;
                    continue;
                }
                TokenKind::Eol => {
                    prev = TokenKind::Eol;
                    if argv.is_empty() {
                        continue;
                    }
                    self.line = cmd_line;
                    let outcome = self.dispatch(&argv);
                    argv.clear();
                    match outcome {
                        Ok(None) => continue,
                        Err(e) => {
                            self.error_line.get_or_insert(cmd_line);
                            return Err(e);
                        }
                        flow => return flow,
                    }
                }
                TokenKind::Var => self.var_word(token.text),
                TokenKind::Cmd => match self.eval_script(token.text) {
                    Ok(Some(flow)) => return Ok(Some(flow)),
                    Ok(None) => self.take_result(),
                    Err(e) => Err(e),
                },
                TokenKind::Esc => Text::from_bytes(&self.heap, &unescape(token.text)).map_err(Error::from),
                TokenKind::Str => Text::from_bytes(&self.heap, token.text).map_err(Error::from),
            };
            let word = match word {
                Ok(w) => w,
                Err(e) => {
                    self.error_line.get_or_insert(token.line);
                    return Err(e);
                }
            };
            match argv.last_mut() {
                Some(last) if !matches!(prev, TokenKind::Sep | TokenKind::Eol) => {
                    if let Err(e) = last.push_bytes(&word) {
                        self.error_line.get_or_insert(token.line);
                        return Err(e.into());
                    }
                }
                _ => {
                    if argv.is_empty() {
                        cmd_line = token.line;
                    }
                    argv.push(word);
                }
            }
            prev = token.kind;
        }
    }

    fn var_word(&self, name: &[u8]) -> Result<Text, Error> {
        Ok(Text::from_bytes(&self.heap, self.get_var(name)?)?)
    }

    fn dispatch(&mut self, argv: &[Text]) -> Outcome {
        let command = self.commands.resolve(&argv[0])?;
        tracing::trace!(command = %argv[0], argc = argv.len(), "dispatch");
        self.clear_result();
        match command {
            Command::Native(f) => f(self, argv),
            Command::Proc(p) => self.call_proc(&p, argv),
        }
    }

    /// Invoke a procedure: bind actuals in a fresh frame, run the body, pop
    /// the frame whatever happened.
    fn call_proc(&mut self, proc_: &Proc, argv: &[Text]) -> Outcome {
        let actual = &argv[1..];
        let variadic = proc_.is_variadic();
        let fixed = proc_.params.len() - variadic as usize;
        if actual.len() < fixed || (!variadic && actual.len() > fixed) {
            return Err(arity_error(fixed + 1, argv));
        }
        self.frames.push();
        let outcome = self.bind_and_run(proc_, actual, fixed, variadic);
        drop(self.frames.pop());
        match outcome? {
            Some(ControlFlow::Return) | None => Ok(None),
            Some(flow) => Err(outside_loop(flow)),
        }
    }

    fn bind_and_run(&mut self, proc_: &Proc, actual: &[Text], fixed: usize, variadic: bool) -> Outcome {
        for (param, value) in proc_.params.iter().zip(&actual[..fixed]) {
            self.frames.set(&self.heap, param, value)?;
        }
        if variadic {
            let rest = builtins::make_list(&self.heap, actual[fixed..].iter().map(|t| t.as_bytes()))?;
            self.frames.set(&self.heap, b"args", &rest)?;
        }
        self.eval_script(&proc_.body)
    }

    // ── Substitution & expressions ────────────────────────────────────────────

    /// Perform variable, command and backslash substitution on `src`
    /// without word splitting.
    pub fn subst(&mut self, src: &[u8]) -> Result<Text, Error> {
        let mut out = Text::new(&self.heap)?;
        let mut lexer = Lexer::for_subst(src);
        loop {
            let token = lexer.next_token()?;
            match token.kind {
                TokenKind::Eof | TokenKind::Eol => return Ok(out),
                TokenKind::Var => out.push_bytes(self.get_var(token.text)?)?,
                TokenKind::Cmd => match self.eval_script(token.text)? {
                    Some(ControlFlow::Break) => return Ok(out),
                    Some(ControlFlow::Continue) => {}
                    Some(ControlFlow::Return) | None => out.push_bytes(self.result())?,
                },
                TokenKind::Esc => out.push_bytes(&unescape(token.text))?,
                TokenKind::Str | TokenKind::Sep => out.push_bytes(token.text)?,
            }
        }
    }

    /// Substitute then evaluate an infix expression.
    pub fn eval_expr(&mut self, src: &[u8]) -> Result<Value, Error> {
        let text = self.subst(src)?;
        expr::eval_bytes(&text)
    }

    /// Truth value of a condition expression.
    pub fn condition(&mut self, src: &[u8]) -> Result<bool, Error> {
        self.eval_expr(src)?.truthy()
    }

    // ── Result ────────────────────────────────────────────────────────────────

    /// The current result.  Valid until the next evaluation step.
    pub fn result(&self) -> &[u8] {
        self.result.as_bytes()
    }

    pub fn result_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.result())
    }

    pub fn result_int(&self) -> Option<i64> {
        parse_int(self.result())
    }

    /// Reset the result to the empty string, returning its block.
    pub fn clear_result(&mut self) {
        self.result = ResultValue::Static(b"");
    }

    pub fn set_result(&mut self, value: impl AsRef<[u8]>) -> Result<(), Error> {
        let value = value.as_ref();
        if value.is_empty() {
            self.clear_result();
            return Ok(());
        }
        self.check_length(value.len())?;
        // Drop the old result first so its block is free for the new one.
        self.clear_result();
        self.result = ResultValue::Owned(Text::from_bytes(&self.heap, value)?);
        Ok(())
    }

    pub fn set_result_int(&mut self, n: i64) -> Result<(), Error> {
        self.set_result(n.to_string())
    }

    /// Install an already-built string as the result.
    pub fn set_result_text(&mut self, text: Text) -> Result<(), Error> {
        self.check_length(text.len())?;
        self.result = ResultValue::Owned(text);
        Ok(())
    }

    /// Move the result out, leaving the empty string behind.
    pub fn take_result(&mut self) -> Result<Text, Error> {
        match std::mem::replace(&mut self.result, ResultValue::Static(b"")) {
            ResultValue::Owned(t) => Ok(t),
            ResultValue::Static(s) => Ok(Text::from_bytes(&self.heap, s)?),
        }
    }

    fn check_length(&self, len: usize) -> Result<(), Error> {
        if len > self.config.max_string {
            return Err(Error::script("result too long"));
        }
        Ok(())
    }

    fn set_error_message(&mut self, e: &Error) {
        self.clear_result();
        let msg = e.to_string();
        let msg = &msg.as_bytes()[..msg.len().min(self.config.max_string)];
        self.result = match Text::from_bytes(&self.heap, msg) {
            Ok(t) => ResultValue::Owned(t),
            Err(_) => ResultValue::Static(b"out of memory"),
        };
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    /// Value of `name`, searching from the current frame outward.
    pub fn get_var(&self, name: impl AsRef<[u8]>) -> Result<&[u8], Error> {
        let name = name.as_ref();
        self.frames.get(name).map(|t| t.as_bytes()).ok_or_else(|| {
            Error::script(format!("undefined variable \"{}\"", String::from_utf8_lossy(name)))
        })
    }

    pub fn get_var_int(&self, name: impl AsRef<[u8]>) -> Result<i64, Error> {
        let value = self.get_var(name)?;
        parse_int(value).ok_or_else(|| Error::not_a_number(value))
    }

    /// Bind `name` in the current frame.
    pub fn set_var(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), Error> {
        Ok(self.frames.set(&self.heap, name.as_ref(), value.as_ref())?)
    }

    pub fn set_var_int(&mut self, name: impl AsRef<[u8]>, n: i64) -> Result<(), Error> {
        self.set_var(name, n.to_string())
    }

    /// Remove `name` from the current frame.  Returns `true` if it was bound.
    pub fn unset_var(&mut self, name: impl AsRef<[u8]>) -> bool {
        self.frames.unset(name.as_ref())
    }

    pub fn var_exists(&self, name: impl AsRef<[u8]>) -> bool {
        self.frames.exists(name.as_ref())
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Register a native command, replacing any command of the same name.
    pub fn register_command<F>(&mut self, name: impl AsRef<[u8]>, f: F) -> Result<(), Error>
    where
        F: Fn(&mut Interpreter, &[Text]) -> Outcome + 'static,
    {
        self.register(name, Command::native(f))
    }

    pub fn register(&mut self, name: impl AsRef<[u8]>, command: Command) -> Result<(), Error> {
        self.commands.register(&self.heap, name.as_ref(), command)?;
        Ok(())
    }

    /// Rename a command; an empty `to` deletes it.
    pub fn rename_command(&mut self, from: impl AsRef<[u8]>, to: impl AsRef<[u8]>) -> Result<(), Error> {
        self.commands.rename(&self.heap, from.as_ref(), to.as_ref())
    }

    pub fn remove_command(&mut self, name: impl AsRef<[u8]>) -> bool {
        self.commands.remove(name.as_ref()).is_some()
    }

    /// Define a script procedure.
    pub fn define_proc(&mut self, name: &[u8], params: Vec<Text>, body: Text) -> Result<(), Error> {
        tracing::debug!(name = %String::from_utf8_lossy(name), params = params.len(), "define proc");
        self.register(name, Command::Proc(std::rc::Rc::new(Proc { params, body })))
    }
}

/// Error for a `break`/`continue` that reached a procedure or the top level.
fn outside_loop(flow: ControlFlow) -> Error {
    match flow {
        ControlFlow::Continue => Error::script("continue used outside of a loop"),
        _ => Error::script("break used outside of a loop"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
