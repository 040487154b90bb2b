//! Built-in commands.
//!
//! Every command receives the full argument vector (`argv[0]` is its own
//! name), checks its arity itself, and leaves its value in the interpreter
//! result.  Control commands are where `break`, `continue` and `return`
//! signals are absorbed.

use std::cmp::Ordering;

use regex::bytes::Regex;

use crate::alloc::{AllocError, Heap};
use crate::command::{arity_error, check_arity};
use crate::error::{ControlFlow, Error, Outcome, Status};
use crate::expr::{integer_op, BinOp};
use crate::interp::Interpreter;
use crate::lexer::{quote_element, split_list};
use crate::text::{parse_int, Text};

type Builtin = fn(&mut Interpreter, &[Text]) -> Outcome;

const CORE: &[(&str, Builtin)] = &[
    ("set", cmd_set),
    ("unset", cmd_unset),
    ("incr", cmd_incr),
    ("if", cmd_if),
    ("while", cmd_while),
    ("for", cmd_for),
    ("foreach", cmd_foreach),
    ("break", cmd_break),
    ("continue", cmd_continue),
    ("return", cmd_return),
    ("proc", cmd_proc),
    ("catch", cmd_catch),
    ("eval", cmd_eval),
    ("uplevel", cmd_uplevel),
    ("subst", cmd_subst),
    ("expr", cmd_expr),
    ("rename", cmd_rename),
    ("info", cmd_info),
    ("list", cmd_list),
    ("llength", cmd_llength),
    ("lindex", cmd_lindex),
    ("concat", cmd_concat),
    ("join", cmd_join),
    ("string", cmd_string),
    ("regexp", cmd_regexp),
];

/// Prefix arithmetic taking two integer operands.
const BINARY_MATH: &[(&str, BinOp)] = &[
    ("+", BinOp::Add),
    ("-", BinOp::Sub),
    ("*", BinOp::Mul),
    ("/", BinOp::Div),
    ("mod", BinOp::Rem),
    ("<", BinOp::Lt),
    ("<=", BinOp::Le),
    (">", BinOp::Gt),
    (">=", BinOp::Ge),
    ("==", BinOp::Eq),
    ("!=", BinOp::Ne),
    ("&", BinOp::BitAnd),
    ("|", BinOp::BitOr),
    ("^", BinOp::BitXor),
    ("<<", BinOp::Shl),
    (">>", BinOp::Shr),
    ("&&", BinOp::And),
    ("||", BinOp::Or),
];

/// Install the core command set.
pub fn register_all(interp: &mut Interpreter) -> Result<(), Error> {
    for &(name, f) in CORE {
        interp.register_command(name, f)?;
    }
    for &(name, op) in BINARY_MATH {
        interp.register_command(name, move |i, argv| {
            check_arity(argv, 3)?;
            let n = integer_op(op, int_arg(&argv[1])?, int_arg(&argv[2])?)?;
            i.set_result_int(n)?;
            Ok(None)
        })?;
    }
    interp.register_command("min", |i, argv| binary_int(i, argv, |a, b| Ok(a.min(b))))?;
    interp.register_command("max", |i, argv| binary_int(i, argv, |a, b| Ok(a.max(b))))?;
    interp.register_command("pow", |i, argv| binary_int(i, argv, pow))?;
    interp.register_command("!", |i, argv| unary_int(i, argv, |a| (a == 0) as i64))?;
    interp.register_command("~", |i, argv| unary_int(i, argv, |a| !a))?;
    interp.register_command("abs", |i, argv| unary_int(i, argv, i64::wrapping_abs))?;
    interp.register_command("negate", |i, argv| unary_int(i, argv, i64::wrapping_neg))?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn int_arg(word: &[u8]) -> Result<i64, Error> {
    parse_int(word).ok_or_else(|| Error::not_a_number(word))
}

fn binary_int(
    interp: &mut Interpreter,
    argv: &[Text],
    f: impl Fn(i64, i64) -> Result<i64, Error>,
) -> Outcome {
    check_arity(argv, 3)?;
    let n = f(int_arg(&argv[1])?, int_arg(&argv[2])?)?;
    interp.set_result_int(n)?;
    Ok(None)
}

fn unary_int(interp: &mut Interpreter, argv: &[Text], f: impl Fn(i64) -> i64) -> Outcome {
    check_arity(argv, 2)?;
    interp.set_result_int(f(int_arg(&argv[1])?))?;
    Ok(None)
}

fn pow(base: i64, exp: i64) -> Result<i64, Error> {
    let exp = u32::try_from(exp).map_err(|_| Error::script("negative exponent"))?;
    Ok(base.wrapping_pow(exp))
}

/// Build a well-formed list from `items`.
pub fn make_list<'a>(
    heap: &Heap,
    items: impl IntoIterator<Item = &'a [u8]>,
) -> Result<Text, AllocError> {
    let mut buf = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        quote_element(item, &mut buf);
    }
    Text::from_bytes(heap, &buf)
}

/// Join words with single spaces after trimming surrounding whitespace from
/// each, dropping words that become empty.
fn concat<'a>(words: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for w in words {
        let w = trim_set(w, BLANKS, true, true);
        if w.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(b' ');
        }
        out.extend_from_slice(w);
    }
    out
}

const BLANKS: &[u8] = b" \t\n\r\x0b\x0c";

fn words(argv: &[Text]) -> impl Iterator<Item = &[u8]> {
    argv.iter().map(|t| t.as_bytes())
}

/// Result of a loop body: `Some` when the loop must stop with that outcome.
fn loop_step(flow: Option<ControlFlow>) -> Option<Outcome> {
    match flow {
        Some(ControlFlow::Break) => Some(Ok(None)),
        Some(ControlFlow::Return) => Some(Ok(Some(ControlFlow::Return))),
        Some(ControlFlow::Continue) | None => None,
    }
}

// ── Variables ─────────────────────────────────────────────────────────────────

fn cmd_set(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    match argv.len() {
        2 => {
            let value = Text::from_bytes(interp.heap(), interp.get_var(&argv[1])?)?;
            interp.set_result_text(value)?;
        }
        3 => {
            interp.set_var(&argv[1], &argv[2])?;
            interp.set_result(&argv[2])?;
        }
        _ => return Err(arity_error(3, argv)),
    }
    Ok(None)
}

fn cmd_unset(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 2)?;
    if !interp.unset_var(&argv[1]) {
        return Err(Error::script(format!(
            "can't unset \"{}\": no such variable",
            argv[1]
        )));
    }
    Ok(None)
}

fn cmd_incr(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    let delta = match argv.len() {
        2 => 1,
        3 => int_arg(&argv[2])?,
        _ => return Err(arity_error(3, argv)),
    };
    let n = interp.get_var_int(&argv[1])?.wrapping_add(delta);
    interp.set_var_int(&argv[1], n)?;
    interp.set_result_int(n)?;
    Ok(None)
}

// ── Control ───────────────────────────────────────────────────────────────────

fn cmd_if(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    let mut i = 1;
    loop {
        let cond = argv.get(i).ok_or_else(|| arity_error(3, argv))?;
        i += 1;
        if argv.get(i).is_some_and(|w| *w == "then") {
            i += 1;
        }
        let body = argv.get(i).ok_or_else(|| arity_error(3, argv))?;
        i += 1;
        if interp.condition(cond)? {
            return interp.eval_script(body);
        }
        match argv.get(i) {
            None => return Ok(None),
            Some(w) if *w == "elseif" => i += 1,
            Some(w) => {
                if *w == "else" {
                    i += 1;
                }
                let body = argv.get(i).ok_or_else(|| arity_error(i + 1, argv))?;
                if i + 1 != argv.len() {
                    return Err(Error::script("extra words after \"else\" clause in \"if\" command"));
                }
                return interp.eval_script(body);
            }
        }
    }
}

fn cmd_while(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 3)?;
    while interp.condition(&argv[1])? {
        if let Some(done) = loop_step(interp.eval_script(&argv[2])?) {
            interp.clear_result();
            return done;
        }
    }
    interp.clear_result();
    Ok(None)
}

fn cmd_for(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 5)?;
    if let Some(flow) = interp.eval_script(&argv[1])? {
        return Ok(Some(flow));
    }
    while interp.condition(&argv[2])? {
        if let Some(done) = loop_step(interp.eval_script(&argv[4])?) {
            interp.clear_result();
            return done;
        }
        if let Some(flow) = interp.eval_script(&argv[3])? {
            return Ok(Some(flow));
        }
    }
    interp.clear_result();
    Ok(None)
}

fn cmd_foreach(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 4)?;
    for item in split_list(&argv[2])? {
        interp.set_var(&argv[1], &item)?;
        if let Some(done) = loop_step(interp.eval_script(&argv[3])?) {
            interp.clear_result();
            return done;
        }
    }
    interp.clear_result();
    Ok(None)
}

fn cmd_break(_: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 1)?;
    Ok(Some(ControlFlow::Break))
}

fn cmd_continue(_: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 1)?;
    Ok(Some(ControlFlow::Continue))
}

/// `return ?value? ?code?`
fn cmd_return(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if argv.len() > 3 {
        return Err(arity_error(3, argv));
    }
    let value = argv.get(1).map_or(&b""[..], |t| t.as_bytes());
    let code = match argv.get(2) {
        Some(c) => int_arg(c)?,
        None => Status::Return.code(),
    };
    match Status::from_code(code) {
        Some(Status::Error) => Err(Error::script(String::from_utf8_lossy(value))),
        Some(Status::Ok) => {
            interp.set_result(value)?;
            Ok(None)
        }
        Some(status) => {
            interp.set_result(value)?;
            Ok(match status {
                Status::Break => Some(ControlFlow::Break),
                Status::Continue => Some(ControlFlow::Continue),
                _ => Some(ControlFlow::Return),
            })
        }
        None => Err(Error::script(format!("invalid return code {code}"))),
    }
}

fn cmd_proc(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 4)?;
    let mut params = Vec::new();
    for p in split_list(&argv[2])? {
        params.push(Text::from_bytes(interp.heap(), &p)?);
    }
    let body = argv[3].try_clone()?;
    interp.define_proc(&argv[1], params, body)?;
    Ok(None)
}

/// `catch script ?var?`: run `script`, report its status code.  Fatal
/// errors are not caught.
fn cmd_catch(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if !(2..=3).contains(&argv.len()) {
        return Err(arity_error(3, argv));
    }
    let outcome = interp.eval_script(&argv[1]);
    let code = Status::of(&outcome).code();
    let text = match outcome {
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => Text::from_bytes(interp.heap(), e.to_string().as_bytes())?,
        Ok(_) => interp.take_result()?,
    };
    if let Some(var) = argv.get(2) {
        interp.set_var(var, &text)?;
    }
    drop(text);
    interp.set_result_int(code)?;
    Ok(None)
}

fn cmd_eval(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if argv.len() < 2 {
        return Err(arity_error(2, argv));
    }
    let script = if argv.len() == 2 {
        argv[1].try_clone()?
    } else {
        Text::from_bytes(interp.heap(), &concat(words(&argv[1..])))?
    };
    interp.eval_script(&script)
}

/// `uplevel ?level? script`: `level` counts parent links from the current
/// frame; `#n` names an absolute level, `#0` being the global frame.
fn cmd_uplevel(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    let (level, script) = match argv.len() {
        2 => (&b"1"[..], &argv[1]),
        3 => (argv[1].as_bytes(), &argv[2]),
        _ => return Err(arity_error(3, argv)),
    };
    let frames = interp.frames();
    let steps = match level.strip_prefix(b"#") {
        Some(abs) => {
            let abs = usize::try_from(int_arg(abs)?).ok().filter(|&a| a <= frames.level());
            abs.map(|a| frames.level() - a)
        }
        None => usize::try_from(int_arg(level)?).ok(),
    };
    let frame = steps
        .and_then(|s| frames.ancestor(s))
        .ok_or_else(|| Error::script(format!("bad level \"{}\"", String::from_utf8_lossy(level))))?;
    interp.eval_in_frame(frame, script)
}

fn cmd_subst(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 2)?;
    let text = interp.subst(&argv[1])?;
    interp.set_result_text(text)?;
    Ok(None)
}

fn cmd_expr(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if argv.len() < 2 {
        return Err(arity_error(2, argv));
    }
    let src = concat(words(&argv[1..]));
    let value = interp.eval_expr(&src)?;
    interp.set_result(value.into_bytes())?;
    Ok(None)
}

// ── Introspection ─────────────────────────────────────────────────────────────

fn cmd_rename(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 3)?;
    interp.rename_command(&argv[1], &argv[2])?;
    Ok(None)
}

fn cmd_info(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if argv.len() < 2 {
        return Err(arity_error(2, argv));
    }
    let sub = argv[1].as_bytes();
    let value = match sub {
        b"commands" | b"procs" => {
            check_arity(argv, 2)?;
            let table = interp.commands();
            let mut names: Vec<&[u8]> = if sub == b"commands" {
                table.names().map(|n| n.as_bytes()).collect()
            } else {
                table.procs().map(|(n, _)| n.as_bytes()).collect()
            };
            names.sort_unstable();
            make_list(interp.heap(), names)?
        }
        b"vars" => {
            check_arity(argv, 2)?;
            let frames = interp.frames();
            let mut names: Vec<&[u8]> = frames
                .frame(frames.current())
                .map(|f| f.iter().map(|(k, _)| k.as_bytes()).collect())
                .unwrap_or_default();
            names.sort_unstable();
            make_list(interp.heap(), names)?
        }
        b"exists" => {
            check_arity(argv, 3)?;
            Text::from_int(interp.heap(), interp.var_exists(&argv[2]) as i64)?
        }
        b"level" => {
            check_arity(argv, 2)?;
            Text::from_int(interp.heap(), interp.frames().level() as i64)?
        }
        b"args" | b"body" => {
            check_arity(argv, 3)?;
            let proc_ = interp
                .commands()
                .get(&argv[2])
                .and_then(|c| c.as_proc())
                .ok_or_else(|| Error::script(format!("\"{}\" isn't a procedure", argv[2])))?;
            if sub == b"args" {
                make_list(interp.heap(), proc_.params.iter().map(|p| p.as_bytes()))?
            } else {
                proc_.body.try_clone()?
            }
        }
        _ => {
            return Err(Error::script(format!(
                "bad option \"{}\": must be args, body, commands, exists, level, procs or vars",
                argv[1]
            )))
        }
    };
    interp.set_result_text(value)?;
    Ok(None)
}

// ── Lists ─────────────────────────────────────────────────────────────────────

fn cmd_list(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    let list = make_list(interp.heap(), words(&argv[1..]))?;
    interp.set_result_text(list)?;
    Ok(None)
}

fn cmd_llength(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 2)?;
    let n = split_list(&argv[1])?.len();
    interp.set_result_int(n as i64)?;
    Ok(None)
}

fn cmd_lindex(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 3)?;
    let items = split_list(&argv[1])?;
    let index = resolve_index(&argv[2], items.len())?;
    match index.and_then(|i| items.get(i)) {
        Some(item) => interp.set_result(item)?,
        None => interp.clear_result(),
    }
    Ok(None)
}

fn cmd_concat(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    interp.set_result(concat(words(&argv[1..])))?;
    Ok(None)
}

fn cmd_join(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if !(2..=3).contains(&argv.len()) {
        return Err(arity_error(3, argv));
    }
    let sep = argv.get(2).map_or(&b" "[..], |t| t.as_bytes());
    let mut out = Text::new(interp.heap())?;
    for (i, item) in split_list(&argv[1])?.iter().enumerate() {
        if i > 0 {
            out.push_bytes(sep)?;
        }
        out.push_bytes(item)?;
    }
    interp.set_result_text(out)?;
    Ok(None)
}

/// Index into a sequence of `len` items: an integer, `end` or `end-N`.
/// `None` when it falls outside the sequence.
fn resolve_index(word: &[u8], len: usize) -> Result<Option<usize>, Error> {
    let index = match word.strip_prefix(b"end") {
        Some(b"") => len as i64 - 1,
        Some(rest) => match rest.strip_prefix(b"-") {
            Some(n) => (len as i64 - 1)
                .checked_sub(int_arg(n)?)
                .ok_or_else(|| bad_index(word))?,
            None => return Err(bad_index(word)),
        },
        None => parse_int(word).ok_or_else(|| bad_index(word))?,
    };
    Ok(usize::try_from(index).ok().filter(|&i| i < len))
}

fn bad_index(word: &[u8]) -> Error {
    Error::script(format!(
        "bad index \"{}\": must be integer or end?-integer?",
        String::from_utf8_lossy(word)
    ))
}

// ── Strings ───────────────────────────────────────────────────────────────────

/// Glob match supporting `*`, `?` and backslash-escaped literals.
///
/// Iterative: on a mismatch the most recent `*` absorbs one more byte of
/// the text and matching resumes just after it.
pub fn glob_match(pat: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern index after the last `*`, and the text index it resumes from.
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        let advance = match pat.get(p) {
            Some(b'*') => {
                p += 1;
                star = Some((p, t));
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'\\') if p + 1 < pat.len() => (pat[p + 1] == text[t]).then_some(2),
            Some(&c) => (c == text[t]).then_some(1),
            None => None,
        };
        match (advance, star) {
            (Some(step), _) => {
                p += step;
                t += 1;
            }
            (None, Some((sp, st))) => {
                p = sp;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            (None, None) => return false,
        }
    }
    pat[p..].iter().all(|&c| c == b'*')
}

fn is_class(class: &[u8], s: &[u8]) -> Result<bool, Error> {
    if class == b"integer" {
        return Ok(parse_int(s).is_some());
    }
    let test: fn(&u8) -> bool = match class {
        b"alnum" => u8::is_ascii_alphanumeric,
        b"alpha" => u8::is_ascii_alphabetic,
        b"digit" => u8::is_ascii_digit,
        b"space" => u8::is_ascii_whitespace,
        b"lower" => u8::is_ascii_lowercase,
        b"upper" => u8::is_ascii_uppercase,
        b"xdigit" => u8::is_ascii_hexdigit,
        b"punct" => u8::is_ascii_punctuation,
        b"ascii" => u8::is_ascii,
        _ => {
            return Err(Error::script(format!(
                "bad class \"{}\"",
                String::from_utf8_lossy(class)
            )))
        }
    };
    Ok(!s.is_empty() && s.iter().all(test))
}

fn trim_set<'a>(s: &'a [u8], set: &[u8], left: bool, right: bool) -> &'a [u8] {
    let mut s = s;
    if left {
        let n = s.iter().take_while(|c| set.contains(c)).count();
        s = &s[n..];
    }
    if right {
        let n = s.iter().rev().take_while(|c| set.contains(c)).count();
        s = &s[..s.len() - n];
    }
    s
}

fn cmd_string(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    if argv.len() < 3 {
        return Err(arity_error(3, argv));
    }
    let heap = interp.heap().clone();
    let s = argv[2].as_bytes();
    let value: Text = match argv[1].as_bytes() {
        b"length" => {
            check_arity(argv, 3)?;
            Text::from_int(&heap, s.len() as i64)?
        }
        b"toupper" => {
            check_arity(argv, 3)?;
            Text::from_bytes(&heap, &s.to_ascii_uppercase())?
        }
        b"tolower" => {
            check_arity(argv, 3)?;
            Text::from_bytes(&heap, &s.to_ascii_lowercase())?
        }
        b"reverse" => {
            check_arity(argv, 3)?;
            let mut r = s.to_vec();
            r.reverse();
            Text::from_bytes(&heap, &r)?
        }
        sub @ (b"trim" | b"trimleft" | b"trimright") => {
            if argv.len() > 4 {
                return Err(arity_error(4, argv));
            }
            let set = argv.get(3).map_or(BLANKS, |t| t.as_bytes());
            let (l, r) = match sub {
                b"trimleft" => (true, false),
                b"trimright" => (false, true),
                _ => (true, true),
            };
            Text::from_bytes(&heap, trim_set(s, set, l, r))?
        }
        b"index" => {
            check_arity(argv, 4)?;
            match resolve_index(&argv[3], s.len())? {
                Some(i) => Text::from_bytes(&heap, &s[i..=i])?,
                None => Text::new(&heap)?,
            }
        }
        b"range" => {
            check_arity(argv, 5)?;
            let first = match resolve_index(&argv[3], s.len()) {
                Ok(Some(i)) => i,
                _ if parse_int(&argv[3]).is_some_and(|n| n < 0) => 0,
                Ok(None) => s.len(),
                Err(e) => return Err(e),
            };
            let last = match resolve_index(&argv[4], s.len())? {
                Some(i) => Some(i),
                None if parse_int(&argv[4]).is_some_and(|n| n >= 0) => s.len().checked_sub(1),
                None => None,
            };
            match last {
                Some(last) if first <= last => Text::from_bytes(&heap, &s[first..=last])?,
                _ => Text::new(&heap)?,
            }
        }
        b"repeat" => {
            check_arity(argv, 4)?;
            let n = usize::try_from(int_arg(&argv[3])?).unwrap_or(0);
            if s.len().saturating_mul(n) > interp.config().max_string {
                return Err(Error::script("result too long"));
            }
            Text::from_bytes(&heap, &s.repeat(n))?
        }
        b"first" => {
            check_arity(argv, 4)?;
            let hay = argv[3].as_bytes();
            let pos = if s.is_empty() {
                None
            } else {
                hay.windows(s.len()).position(|w| w == s)
            };
            Text::from_int(&heap, pos.map_or(-1, |p| p as i64))?
        }
        b"compare" => {
            check_arity(argv, 4)?;
            let n = match s.cmp(argv[3].as_bytes()) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            Text::from_int(&heap, n)?
        }
        b"equal" => {
            check_arity(argv, 4)?;
            Text::from_int(&heap, (s == argv[3].as_bytes()) as i64)?
        }
        b"match" => {
            check_arity(argv, 4)?;
            Text::from_int(&heap, glob_match(s, &argv[3]) as i64)?
        }
        b"ordinal" => {
            check_arity(argv, 3)?;
            let first = s.first().ok_or_else(|| Error::script("empty string"))?;
            Text::from_int(&heap, *first as i64)?
        }
        b"char" => {
            check_arity(argv, 3)?;
            let n = int_arg(s)?;
            let byte = u8::try_from(n).map_err(|_| Error::script(format!("character {n} out of range")))?;
            Text::from_bytes(&heap, &[byte])?
        }
        b"is" => {
            check_arity(argv, 4)?;
            Text::from_int(&heap, is_class(s, &argv[3])? as i64)?
        }
        other => {
            return Err(Error::script(format!(
                "unknown string subcommand \"{}\"",
                String::from_utf8_lossy(other)
            )))
        }
    };
    interp.set_result_text(value)?;
    Ok(None)
}

fn cmd_regexp(interp: &mut Interpreter, argv: &[Text]) -> Outcome {
    check_arity(argv, 3)?;
    let pattern = std::str::from_utf8(&argv[1])
        .map_err(|_| Error::script("regular expression is not valid UTF-8"))?;
    let re = Regex::new(pattern).map_err(|e| Error::script(format!("bad regexp: {e}")))?;
    interp.set_result_int(re.is_match(&argv[2]) as i64)?;
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
