//! 基本ビルトイン: 出力、ディレクトリ、コマンド探索、`eval`/`.`/`exec`。

use std::env;
use std::fs;
use std::os::unix::fs::MetadataExt;

use super::{fail, out, quote};
use crate::executor;
use crate::frame::Flow;
use crate::policy::FrameKind;
use crate::process;
use crate::shell::{Input, Shell};
use crate::signals;
use crate::spawn;
use crate::sys;

pub fn colon(_shell: &mut Shell, _args: &[String]) -> i32 {
    0
}

pub fn true_(_shell: &mut Shell, _args: &[String]) -> i32 {
    0
}

pub fn false_(_shell: &mut Shell, _args: &[String]) -> i32 {
    1
}

/// `echo [-n] args...`。エスケープは解釈しない。
pub fn echo(_shell: &mut Shell, args: &[String]) -> i32 {
    let mut args = &args[1..];
    let mut newline = true;
    if args.first().is_some_and(|a| a == "-n") {
        newline = false;
        args = &args[1..];
    }
    let mut text = args.join(" ");
    if newline {
        text.push('\n');
    }
    out(&text)
}

// ── printf ───────────────────────────────────────────────────────────

/// `\` エスケープの解釈結果。
enum Escape {
    Char(char),
    /// 未知のエスケープ。`\` ごと出力する。
    Unknown(char),
    /// `%b` の `\c`: 以降の出力をすべて打ち切る。
    Stop,
}

/// `\` の直後から 1 つのエスケープを読む。`in_b` なら `%b` の規則（`\0NNN`、`\c`）。
fn read_escape(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, in_b: bool) -> Escape {
    let Some(c) = chars.next() else {
        return Escape::Char('\\');
    };
    let simple = match c {
        'a' => Some('\x07'),
        'b' => Some('\x08'),
        'f' => Some('\x0c'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        'v' => Some('\x0b'),
        '\\' => Some('\\'),
        '"' if !in_b => Some('"'),
        '\'' if !in_b => Some('\''),
        _ => None,
    };
    if let Some(ch) = simple {
        return Escape::Char(ch);
    }
    if c == 'c' && in_b {
        return Escape::Stop;
    }
    if c.is_digit(8) {
        // `%b` では `\0` の後に最大 3 桁、書式文字列では最初の桁を含めて最大 3 桁
        let (mut value, mut max) = if in_b && c == '0' { (0, 3) } else { (c.to_digit(8).unwrap_or(0), 2) };
        while max > 0 {
            match chars.peek().and_then(|d| d.to_digit(8)) {
                Some(d) => {
                    value = value * 8 + d;
                    chars.next();
                    max -= 1;
                }
                None => break,
            }
        }
        return Escape::Char(char::from_u32(value & 0xff).unwrap_or('\0'));
    }
    Escape::Unknown(c)
}

/// `%b` の引数を展開する。`\c` に当たれば `true` を返す。
fn expand_b(arg: &str, output: &mut String) -> bool {
    let mut chars = arg.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        let known = chars.peek().is_some_and(|n| "abfnrtv\\c0123456789".contains(*n));
        if !known {
            output.push('\\');
            continue;
        }
        match read_escape(&mut chars, true) {
            Escape::Char(ch) => output.push(ch),
            Escape::Unknown(ch) => {
                output.push('\\');
                output.push(ch);
            }
            Escape::Stop => return true,
        }
    }
    false
}

/// 数値引数。`'c`/`"c` は文字コード。
fn numeric_arg(arg: &str) -> Result<i64, String> {
    if let Some(rest) = arg.strip_prefix('\'').or_else(|| arg.strip_prefix('"')) {
        return Ok(rest.chars().next().map_or(0, |c| c as i64));
    }
    let trimmed = arg.trim_start();
    if trimmed.is_empty() {
        return Ok(0);
    }
    crate::arith::parse_number(trimmed.strip_prefix('+').unwrap_or(trimmed))
        .ok_or_else(|| format!("{arg}: invalid number"))
}

#[derive(Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String, numeric: bool) -> String {
        let width = self.width.unwrap_or(0);
        let len = body.chars().count();
        if len >= width {
            return body;
        }
        let fill = width - len;
        if self.left {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero && numeric && self.precision.is_none() {
            let (sign, digits) = match body.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (c.to_string(), body[1..].to_string()),
                _ => (String::new(), body),
            };
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }

    fn min_digits(&self, digits: String) -> String {
        match self.precision {
            Some(p) if digits.len() < p => format!("{}{digits}", "0".repeat(p - digits.len())),
            _ => digits,
        }
    }
}

/// 書式文字列を 1 回なめる。引数を 1 つでも使ったら `used` が真。
struct Formatter<'a> {
    args: std::slice::Iter<'a, String>,
    used: bool,
    stop: bool,
    errors: Vec<String>,
}

impl Formatter<'_> {
    fn next_arg(&mut self) -> &str {
        match self.args.next() {
            Some(a) => {
                self.used = true;
                a
            }
            None => "",
        }
    }

    fn number(&mut self) -> i64 {
        let arg = self.next_arg().to_string();
        numeric_arg(&arg).unwrap_or_else(|e| {
            self.errors.push(e);
            0
        })
    }

    fn run(&mut self, format: &str, output: &mut String) {
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match read_escape(&mut chars, false) {
                    Escape::Char(ch) => output.push(ch),
                    Escape::Unknown(ch) => {
                        output.push('\\');
                        output.push(ch);
                    }
                    Escape::Stop => {}
                },
                '%' => {
                    if chars.peek() == Some(&'%') {
                        chars.next();
                        output.push('%');
                        continue;
                    }
                    self.conversion(&mut chars, output);
                    if self.stop {
                        return;
                    }
                }
                _ => output.push(c),
            }
        }
    }

    fn count(&mut self, chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
        if chars.peek() == Some(&'*') {
            chars.next();
            return Some(self.number().max(0) as usize);
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        digits.parse().ok()
    }

    fn conversion(&mut self, chars: &mut std::iter::Peekable<std::str::Chars<'_>>, output: &mut String) {
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alt = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = self.count(chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(self.count(chars).unwrap_or(0));
        }
        let Some(conv) = chars.next() else {
            output.push('%');
            return;
        };
        match conv {
            's' => {
                let arg = self.next_arg();
                let body: String = match spec.precision {
                    Some(p) => arg.chars().take(p).collect(),
                    None => arg.to_string(),
                };
                output.push_str(&spec.pad(body, false));
            }
            'b' => {
                let arg = self.next_arg().to_string();
                let mut body = String::new();
                self.stop = expand_b(&arg, &mut body);
                output.push_str(&spec.pad(body, false));
            }
            'c' => {
                let body: String = self.next_arg().chars().take(1).collect();
                output.push_str(&spec.pad(body, false));
            }
            'd' | 'i' => {
                let n = self.number();
                let digits = spec.min_digits(n.unsigned_abs().to_string());
                let sign = if n < 0 {
                    "-"
                } else if spec.plus {
                    "+"
                } else if spec.space {
                    " "
                } else {
                    ""
                };
                output.push_str(&spec.pad(format!("{sign}{digits}"), true));
            }
            'u' | 'o' | 'x' | 'X' => {
                let n = self.number() as u64;
                let digits = match conv {
                    'o' => format!("{n:o}"),
                    'x' => format!("{n:x}"),
                    'X' => format!("{n:X}"),
                    _ => n.to_string(),
                };
                let digits = spec.min_digits(digits);
                let prefix = match conv {
                    'o' if spec.alt && !digits.starts_with('0') => "0",
                    'x' if spec.alt && n != 0 => "0x",
                    'X' if spec.alt && n != 0 => "0X",
                    _ => "",
                };
                output.push_str(&spec.pad(format!("{prefix}{digits}"), true));
            }
            other => {
                self.errors.push(format!("%{other}: invalid directive"));
                self.stop = true;
            }
        }
    }
}

/// `printf format [args...]`。引数が余れば書式を繰り返す。
pub fn printf(shell: &mut Shell, args: &[String]) -> i32 {
    let Some(format) = args.get(1) else {
        return fail(shell, "printf", "usage: printf format [arguments]", 2);
    };
    let mut f = Formatter { args: args[2..].iter(), used: false, stop: false, errors: Vec::new() };
    let mut output = String::new();
    loop {
        f.used = false;
        f.run(format, &mut output);
        if f.stop || !f.used || f.args.len() == 0 {
            break;
        }
    }
    let status = out(&output);
    for e in &f.errors {
        shell.report(format_args!("printf: {e}"));
    }
    if f.errors.is_empty() { status } else { 1 }
}

// ── ディレクトリ ─────────────────────────────────────────────────────

/// `$PWD` が現在のディレクトリを指していればそれ（論理パス）、でなければ物理パス。
fn current_dir(shell: &Shell) -> Option<String> {
    if let Some(pwd) = shell.var("PWD").filter(|p| p.starts_with('/')) {
        let same = match (fs::metadata(&pwd), fs::metadata(".")) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        };
        if same {
            return Some(pwd);
        }
    }
    env::current_dir().ok().map(|p| p.to_string_lossy().into_owned())
}

pub fn pwd(shell: &mut Shell, args: &[String]) -> i32 {
    let physical = args.iter().skip(1).any(|a| a == "-P");
    let dir = if physical {
        env::current_dir().ok().map(|p| p.to_string_lossy().into_owned())
    } else {
        current_dir(shell)
    };
    match dir {
        Some(dir) => out(&format!("{dir}\n")),
        None => fail(shell, "pwd", "cannot determine current directory", 1),
    }
}

/// `cd [-L|-P] [dir|-]`。`CDPATH` を探し、`PWD`/`OLDPWD` を更新する。
pub fn cd(shell: &mut Shell, args: &[String]) -> i32 {
    let operands: Vec<&String> = args[1..].iter().filter(|a| *a != "-L" && *a != "-P").collect();
    let mut print = false;
    let target = match operands.first() {
        None => match shell.var("HOME") {
            Some(home) => home,
            None => return fail(shell, "cd", "HOME not set", 1),
        },
        Some(dash) if dash.as_str() == "-" => match shell.var("OLDPWD") {
            Some(old) => {
                print = true;
                old
            }
            None => return fail(shell, "cd", "OLDPWD not set", 1),
        },
        Some(dir) => dir.to_string(),
    };

    let mut path = target.clone();
    let relative = !target.starts_with('/') && !target.starts_with("./") && !target.starts_with("../")
        && target != "." && target != "..";
    if relative {
        if let Some(cdpath) = shell.var("CDPATH") {
            for dir in cdpath.split(':') {
                let candidate = if dir.is_empty() { format!("./{target}") } else { format!("{dir}/{target}") };
                if fs::metadata(&candidate).is_ok_and(|m| m.is_dir()) {
                    print |= !dir.is_empty();
                    path = candidate;
                    break;
                }
            }
        }
    }

    let old = current_dir(shell).unwrap_or_default();
    if let Err(e) = env::set_current_dir(&path) {
        return fail(shell, "cd", format_args!("{target}: {e}"), 1);
    }
    let new = env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or(path);
    for (name, value) in [("OLDPWD", old), ("PWD", new.clone())] {
        if let Err(e) = shell.assign(name, &value) {
            return fail(shell, "cd", e, 1);
        }
    }
    if print {
        return out(&format!("{new}\n"));
    }
    0
}

pub fn umask(shell: &mut Shell, args: &[String]) -> i32 {
    let symbolic = args.get(1).is_some_and(|a| a == "-S");
    let operand = args[1..].iter().find(|a| *a != "-S");
    match operand {
        None => {
            let mask = unsafe {
                let mask = libc::umask(0);
                libc::umask(mask);
                mask
            } as u32;
            if symbolic {
                let who = |shift: u32| {
                    let allowed = !(mask >> shift) & 0o7;
                    let mut s = String::new();
                    if allowed & 4 != 0 {
                        s.push('r');
                    }
                    if allowed & 2 != 0 {
                        s.push('w');
                    }
                    if allowed & 1 != 0 {
                        s.push('x');
                    }
                    s
                };
                out(&format!("u={},g={},o={}\n", who(6), who(3), who(0)))
            } else {
                out(&format!("{mask:04o}\n"))
            }
        }
        Some(mode) => match u32::from_str_radix(mode, 8) {
            Ok(mask) if mask <= 0o777 => {
                unsafe {
                    libc::umask(mask as libc::mode_t);
                }
                0
            }
            _ => fail(shell, "umask", format_args!("{mode}: invalid mask"), 1),
        },
    }
}

pub fn times(_shell: &mut Shell, _args: &[String]) -> i32 {
    let mut tms: libc::tms = unsafe { std::mem::zeroed() };
    unsafe {
        libc::times(&mut tms);
    }
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as f64;
    let fmt = |t: libc::clock_t| {
        let secs = t as f64 / ticks;
        format!("{}m{:.3}s", (secs / 60.0) as u64, secs % 60.0)
    };
    out(&format!(
        "{} {}\n{} {}\n",
        fmt(tms.tms_utime),
        fmt(tms.tms_stime),
        fmt(tms.tms_cutime),
        fmt(tms.tms_cstime)
    ))
}

// ── コマンドの分類 ───────────────────────────────────────────────────

const KEYWORDS: [&str; 16] = [
    "!", "case", "do", "done", "elif", "else", "esac", "fi", "for", "if", "in", "then", "until", "while", "{", "}",
];

enum Kind {
    Keyword,
    Alias(String),
    SpecialBuiltin,
    Function,
    Builtin,
    File(String),
}

fn classify(shell: &Shell, name: &str) -> Option<Kind> {
    if KEYWORDS.contains(&name) {
        return Some(Kind::Keyword);
    }
    if let Some(value) = shell.frame().aliases.borrow().get(name) {
        return Some(Kind::Alias(value.to_string()));
    }
    let builtin = super::lookup(name);
    if builtin.is_some_and(|b| b.special) {
        return Some(Kind::SpecialBuiltin);
    }
    if shell.frame().functions.borrow().contains(name) {
        return Some(Kind::Function);
    }
    if builtin.is_some() {
        return Some(Kind::Builtin);
    }
    let path_var = shell.var("PATH");
    spawn::find_in_path(name, path_var.as_deref())
        .filter(|p| sys::is_regular_file(p))
        .map(Kind::File)
}

fn describe(name: &str, kind: &Kind) -> String {
    match kind {
        Kind::Keyword => format!("{name} is a shell keyword"),
        Kind::Alias(value) => format!("{name} is an alias for {value}"),
        Kind::SpecialBuiltin => format!("{name} is a special shell builtin"),
        Kind::Function => format!("{name} is a function"),
        Kind::Builtin => format!("{name} is a shell builtin"),
        Kind::File(path) => format!("{name} is {path}"),
    }
}

pub fn type_(shell: &mut Shell, args: &[String]) -> i32 {
    let mut status = 0;
    for name in &args[1..] {
        match classify(shell, name) {
            Some(kind) => status |= out(&format!("{}\n", describe(name, &kind))),
            None => status = fail(shell, "type", format_args!("{name}: not found"), 1),
        }
    }
    status
}

/// `command [-p] [-v|-V] name [args...]`。関数を飛ばして実行する。
pub fn command(shell: &mut Shell, args: &[String]) -> i32 {
    let mut i = 1;
    let mut mode = None;
    while let Some(arg) = args.get(i) {
        match arg.as_str() {
            "-p" => {}
            "-v" => mode = Some('v'),
            "-V" => mode = Some('V'),
            "--" => {
                i += 1;
                break;
            }
            _ => break,
        }
        i += 1;
    }
    let rest = &args[i..];
    if let Some(mode) = mode {
        let mut status = 0;
        for name in rest {
            match (classify(shell, name), mode) {
                (Some(kind), 'V') => status |= out(&format!("{}\n", describe(name, &kind))),
                (Some(Kind::Alias(value)), _) => status |= out(&format!("alias {name}={}\n", quote(&value))),
                (Some(Kind::File(path)), _) => status |= out(&format!("{path}\n")),
                (Some(_), _) => status |= out(&format!("{name}\n")),
                (None, 'V') => status = fail(shell, "command", format_args!("{name}: not found"), 1),
                (None, _) => status = 1,
            }
        }
        return status;
    }
    if rest.is_empty() {
        return 0;
    }
    let outcome = executor::dispatch(shell, rest, &[], &[], false, false);
    if let Some(flow) = outcome.flow {
        shell.frame_mut().pending_flow = Some(flow);
    }
    outcome.status
}

// ── 実行の置き換えと再入 ─────────────────────────────────────────────

/// `exec cmd [args...]`。引数なしの形は executor が処理する。
pub fn exec(shell: &mut Shell, args: &[String]) -> i32 {
    let argv = match args.get(1).map(String::as_str) {
        Some("--") => &args[2..],
        _ => &args[1..],
    };
    if argv.is_empty() {
        return 0;
    }
    let path_var = shell.var("PATH");
    let status = match spawn::find_in_path(&argv[0], path_var.as_deref()) {
        Some(path) => {
            let env = process::command_env(shell, &[]);
            let defaults = {
                let traps = shell.frame().traps.borrow();
                signals::child_defaults(&traps, shell.frames.ignored_at_entry())
            };
            let err = spawn::exec_replace(&path, argv, &env, &defaults);
            shell.report(&err);
            err.exit_status()
        }
        None => fail(shell, "exec", format_args!("{}: not found", argv[0]), 127),
    };
    if !shell.interactive {
        shell.frame_mut().pending_flow = Some(Flow::Exit(status));
    }
    status
}

/// `eval args...`。引数を空白で連結し、Eval フレームで実行する。
pub fn eval(shell: &mut Shell, args: &[String]) -> i32 {
    let text = args[1..].join(" ");
    if text.trim().is_empty() {
        return 0;
    }
    let line = shell.frame().source_line;
    shell.push_frame(FrameKind::Eval);
    let outcome = shell.run_source(Input::Text { text: &text, line }, false);
    shell.pop_frame();
    if let Some(flow) = outcome.flow {
        shell.frame_mut().pending_flow = Some(flow);
    }
    outcome.status
}

/// `. file [args...]`。`/` を含まない名前は `$PATH` から探す。
pub fn dot(shell: &mut Shell, args: &[String]) -> i32 {
    let Some(name) = args.get(1) else {
        return fail(shell, ".", "filename argument required", 2);
    };
    let path = if name.contains('/') {
        Some(name.clone())
    } else {
        let path_var = shell.var("PATH").unwrap_or_default();
        path_var
            .split(':')
            .map(|dir| if dir.is_empty() { format!("./{name}") } else { format!("{dir}/{name}") })
            .find(|candidate| sys::is_regular_file(candidate))
    };
    let Some(path) = path else {
        return fail(shell, ".", format_args!("{name}: not found"), 1);
    };
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => return fail(shell, ".", format_args!("{name}: {e}"), 1),
    };
    let params = (args.len() > 2).then(|| args[2..].to_vec());
    let outcome = shell.run_dot(&path, &text, params);
    if let Some(flow) = outcome.flow {
        shell.frame_mut().pending_flow = Some(flow);
    }
    outcome.status
}

#[cfg(test)]
mod tests {
    use super::super::testing::{output, shell};
    use pretty_assertions::assert_eq;

    #[test]
    fn echo_and_printf() {
        let mut sh = shell();
        assert_eq!(output(&mut sh, "echo a  b; echo -n c; echo"), ("a b\nc\n".into(), 0));
        assert_eq!(output(&mut sh, r"printf '%s=%d\n' a 1 b 2"), ("a=1\nb=2\n".into(), 0));
        assert_eq!(output(&mut sh, r"printf '[%5s][%-3s][%03d][%x]' ab c 7 255"), ("[   ab][c  ][007][ff]".into(), 0));
        assert_eq!(output(&mut sh, r"printf '%b|' 'x\ty' 'stop\cgone'"), ("x\ty|stop".into(), 0));
        assert_eq!(output(&mut sh, r"printf '%.2s%c\101\n' hello world"), ("hewA\n".into(), 0));
    }

    #[test]
    fn printf_invalid_number() {
        let mut sh = shell();
        assert_eq!(output(&mut sh, "printf '%d' abc"), ("0".into(), 1));
    }

    #[test]
    fn cd_updates_pwd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().canonicalize().unwrap();
        let path = path.to_str().unwrap();
        let mut sh = shell();
        let (text, status) = output(&mut sh, &format!("cd {path} && pwd && cd - >/dev/null && cd - && echo $OLDPWD"));
        assert_eq!(status, 0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], path);
        assert_eq!(lines[1], path);
    }

    #[test]
    fn type_and_command_v() {
        let mut sh = shell();
        let (text, _) = output(&mut sh, "f() { :; }; alias ll='ls -l'; type if export cd f ll");
        assert_eq!(
            text,
            "if is a shell keyword\nexport is a special shell builtin\ncd is a shell builtin\n\
             f is a function\nll is an alias for ls -l\n"
        );
        let (text, status) = output(&mut sh, "command -v cd; command -v no_such_cmd_xyz");
        assert_eq!((text.as_str(), status), ("cd\n", 1));
    }

    #[test]
    fn command_skips_functions() {
        let mut sh = shell();
        let (text, _) = output(&mut sh, "echo() { printf 'func\\n'; }; echo x; command echo y");
        assert_eq!(text, "func\ny\n");
    }

    #[test]
    fn eval_and_dot() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("lib.sh");
        std::fs::write(&script, "greeting=\"hi $1\"\nreturn 3\necho unreachable\n").unwrap();
        let mut sh = shell();
        let (text, status) = output(
            &mut sh,
            &format!("eval 'x=1; echo $x'; . {} there; echo $? $greeting", script.display()),
        );
        assert_eq!((text.as_str(), status), ("1\n3 hi there\n", 0));
    }

    #[test]
    fn umask_round_trip() {
        let mut sh = shell();
        let (text, _) = output(&mut sh, "umask 027; umask; umask -S");
        assert_eq!(text, "0027\nu=rwx,g=rx,o=\n");
    }
}
