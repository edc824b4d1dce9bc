//! 変数・オプション・位置パラメータ・エイリアスのビルトインと `read`。

use super::{fail, out, quote};
use crate::expand::DEFAULT_IFS;
use crate::options::{ShellOption, ALL_OPTIONS};
use crate::shell::Shell;
use crate::signals;
use crate::sys;
use crate::variables::is_valid_name;

/// `name=value` を分ける。
fn split_assignment(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (arg, None),
    }
}

// ── export / readonly / unset / local ────────────────────────────────

#[derive(Clone, Copy)]
enum Attr {
    Export,
    ReadOnly,
}

fn print_with_attr(shell: &Shell, attr: Attr, keyword: &str) -> i32 {
    let mut text = String::new();
    for (name, var) in shell.frame().vars.borrow().sorted() {
        let marked = match attr {
            Attr::Export => var.exported,
            Attr::ReadOnly => var.read_only,
        };
        if !marked {
            continue;
        }
        match &var.value {
            Some(value) => text.push_str(&format!("{keyword} {name}={}\n", quote(value))),
            None => text.push_str(&format!("{keyword} {name}\n")),
        }
    }
    out(&text)
}

fn set_attr(shell: &mut Shell, args: &[String], attr: Attr) -> i32 {
    let keyword = args[0].as_str();
    let operands: Vec<&String> = args[1..].iter().filter(|a| *a != "-p").collect();
    if operands.is_empty() {
        return print_with_attr(shell, attr, keyword);
    }
    let mut status = 0;
    for arg in operands {
        let (name, value) = split_assignment(arg);
        let result = {
            let mut vars = shell.frame().vars.borrow_mut();
            let assigned = match value {
                Some(value) => vars.set(name, value),
                None => Ok(()),
            };
            assigned.and_then(|()| match attr {
                Attr::Export => vars.set_exported(name, true),
                Attr::ReadOnly => vars.set_read_only(name),
            })
        };
        if let Err(e) = result {
            status = fail(shell, keyword, e, 1);
        }
    }
    status
}

pub fn export(shell: &mut Shell, args: &[String]) -> i32 {
    set_attr(shell, args, Attr::Export)
}

pub fn readonly(shell: &mut Shell, args: &[String]) -> i32 {
    set_attr(shell, args, Attr::ReadOnly)
}

/// `unset [-f|-v] name...`。フラグなしなら変数を消す。
pub fn unset(shell: &mut Shell, args: &[String]) -> i32 {
    let mut functions = false;
    let mut names = &args[1..];
    while let Some(flag) = names.first() {
        match flag.as_str() {
            "-f" => functions = true,
            "-v" => functions = false,
            "--" => {
                names = &names[1..];
                break;
            }
            _ => break,
        }
        names = &names[1..];
    }
    let mut status = 0;
    for name in names {
        let result = if functions {
            // 未定義の関数を消すのはエラーではない
            let _ = shell.frame().functions.borrow_mut().remove(name);
            Ok(())
        } else {
            shell.frame().vars.borrow_mut().unset(name)
        };
        if let Err(e) = result {
            status = fail(shell, "unset", e, 1);
        }
    }
    status
}

/// `local name[=value]...`。元の値は関数フレームの pop で書き戻される。
pub fn local(shell: &mut Shell, args: &[String]) -> i32 {
    let mut status = 0;
    for arg in &args[1..] {
        let (name, value) = split_assignment(arg);
        if !is_valid_name(name) {
            status = fail(shell, "local", format_args!("{name}: bad variable name"), 1);
            continue;
        }
        if !shell.frames.record_local(name) {
            return fail(shell, "local", "can only be used in a function", 1);
        }
        if let Some(value) = value {
            if let Err(e) = shell.assign(name, value) {
                status = fail(shell, "local", e, 1);
            }
        }
    }
    status
}

// ── set / shift ──────────────────────────────────────────────────────

fn print_options(shell: &Shell, reusable: bool) -> i32 {
    let mut text = String::new();
    for opt in ALL_OPTIONS {
        let on = shell.option(opt);
        if reusable {
            text.push_str(&format!("set {}o {}\n", if on { '-' } else { '+' }, opt.name()));
        } else {
            text.push_str(&format!("{:<16}{}\n", opt.name(), if on { "on" } else { "off" }));
        }
    }
    out(&text)
}

fn print_variables(shell: &Shell) -> i32 {
    let mut text = String::new();
    for (name, var) in shell.frame().vars.borrow().sorted() {
        if let Some(value) = &var.value {
            text.push_str(&format!("{name}={}\n", quote(value)));
        }
    }
    out(&text)
}

/// `set [-+abCefmnuvx] [-+o name] [--] [args...]`
pub fn set(shell: &mut Shell, args: &[String]) -> i32 {
    let rest = &args[1..];
    if rest.is_empty() {
        return print_variables(shell);
    }
    let mut positional = None;
    let mut i = 0;
    while i < rest.len() {
        let arg = rest[i].as_str();
        if arg == "--" {
            positional = Some(rest[i + 1..].to_vec());
            break;
        }
        if arg == "-" {
            shell.set_option(ShellOption::XTrace, false);
            shell.set_option(ShellOption::Verbose, false);
            if i + 1 < rest.len() {
                positional = Some(rest[i + 1..].to_vec());
            }
            break;
        }
        let on = match arg.as_bytes().first() {
            Some(b'-') => true,
            Some(b'+') => false,
            _ => {
                positional = Some(rest[i..].to_vec());
                break;
            }
        };
        i += 1;
        for c in arg[1..].chars() {
            if c == 'o' {
                match rest.get(i) {
                    Some(name) => {
                        let Some(opt) = ShellOption::from_name(name) else {
                            return fail(shell, "set", format_args!("{name}: invalid option name"), 2);
                        };
                        shell.set_option(opt, on);
                        i += 1;
                    }
                    None => return print_options(shell, !on),
                }
                continue;
            }
            let Some(opt) = ShellOption::from_letter(c) else {
                return fail(shell, "set", format_args!("{}{c}: invalid option", if on { '-' } else { '+' }), 2);
            };
            shell.set_option(opt, on);
        }
    }
    if let Some(params) = positional {
        if let Err(e) = shell.frame().positional.borrow_mut().set(params) {
            return fail(shell, "set", e, 1);
        }
    }
    0
}

pub fn shift(shell: &mut Shell, args: &[String]) -> i32 {
    let n = match args.get(1) {
        None => 1,
        Some(text) => match text.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return fail(shell, "shift", format_args!("{text}: numeric argument required"), 2),
        },
    };
    let shifted = shell.frame().positional.borrow_mut().shift(n);
    match shifted {
        Ok(()) => 0,
        Err(e) => fail(shell, "shift", e, 1),
    }
}

// ── read ─────────────────────────────────────────────────────────────

/// 読み込んだ 1 バイトと、`\` でエスケープされていたか。
type Byte = (u8, bool);

/// `read` 用の IFS 分割。最後の変数が残り全部を受け取る（末尾の IFS 空白は除く）。
fn split_for_read(line: &[Byte], ifs: &[u8], count: usize) -> Vec<String> {
    let is_ifs = |&(b, escaped): &Byte| !escaped && ifs.contains(&b);
    let is_space = |c: &Byte| is_ifs(c) && b" \t\n".contains(&c.0);
    let text = |bytes: &[Byte]| {
        let raw: Vec<u8> = bytes.iter().map(|(b, _)| *b).collect();
        String::from_utf8_lossy(&raw).into_owned()
    };

    let len = line.len();
    let mut i = 0;
    while i < len && is_space(&line[i]) {
        i += 1;
    }
    let mut fields = Vec::with_capacity(count);
    while fields.len() + 1 < count && i < len {
        let start = i;
        while i < len && !is_ifs(&line[i]) {
            i += 1;
        }
        fields.push(text(&line[start..i]));
        while i < len && is_space(&line[i]) {
            i += 1;
        }
        if i < len && is_ifs(&line[i]) {
            i += 1;
            while i < len && is_space(&line[i]) {
                i += 1;
            }
        }
    }
    let mut end = len;
    while end > i && is_space(&line[end - 1]) {
        end -= 1;
    }
    fields.push(text(&line[i..end]));
    fields.resize(count, String::new());
    fields
}

/// `read [-r] [-p prompt] [name...]`。名前がなければ `REPLY`。
///
/// 入力末尾に達したら（途中まで読めていても）ステータス 1。
pub fn read(shell: &mut Shell, args: &[String]) -> i32 {
    let mut raw = false;
    let mut prompt = None;
    let mut i = 1;
    while let Some(arg) = args.get(i) {
        match arg.as_str() {
            "-r" => raw = true,
            "-p" => {
                i += 1;
                prompt = args.get(i).cloned();
            }
            "--" => {
                i += 1;
                break;
            }
            _ => break,
        }
        i += 1;
    }
    let names: Vec<String> = if i < args.len() { args[i..].to_vec() } else { vec!["REPLY".to_string()] };
    if let Some(bad) = names.iter().find(|n| !is_valid_name(n)) {
        return fail(shell, "read", format_args!("{bad}: bad variable name"), 2);
    }
    if let Some(prompt) = prompt.filter(|_| sys::isatty(libc::STDIN_FILENO)) {
        let _ = sys::write_all(libc::STDERR_FILENO, prompt.as_bytes());
    }

    let mut line: Vec<Byte> = Vec::new();
    let mut eof = false;
    loop {
        let byte = match sys::read_byte(libc::STDIN_FILENO) {
            Ok(b) => b,
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => {
                if signals::any_pending() {
                    return 128 + libc::SIGINT;
                }
                continue;
            }
            Err(e) => return fail(shell, "read", e, 1),
        };
        match byte {
            None => {
                eof = true;
                break;
            }
            Some(b'\n') => break,
            Some(b'\\') if !raw => match sys::read_byte(libc::STDIN_FILENO) {
                Ok(Some(b'\n')) => {}
                Ok(Some(b)) => line.push((b, true)),
                _ => {
                    eof = true;
                    break;
                }
            },
            Some(b) => line.push((b, false)),
        }
    }

    let ifs = shell.var("IFS").unwrap_or_else(|| DEFAULT_IFS.to_string());
    let fields = split_for_read(&line, ifs.as_bytes(), names.len());
    for (name, value) in names.iter().zip(fields) {
        if let Err(e) = shell.assign(name, &value) {
            return fail(shell, "read", e, 1);
        }
    }
    i32::from(eof)
}

// ── alias / unalias ──────────────────────────────────────────────────

pub fn alias(shell: &mut Shell, args: &[String]) -> i32 {
    if args.len() == 1 {
        let text: String = shell
            .frame()
            .aliases
            .borrow()
            .sorted()
            .into_iter()
            .map(|(name, value)| format!("alias {name}={}\n", quote(value)))
            .collect();
        return out(&text);
    }
    let mut status = 0;
    for arg in &args[1..] {
        match split_assignment(arg) {
            (name, Some(value)) => {
                let result = shell.frame().aliases.borrow_mut().set(name, value);
                if let Err(e) = result {
                    status = fail(shell, "alias", e, 1);
                }
            }
            (name, None) => {
                let value = shell.frame().aliases.borrow().get(name).map(str::to_string);
                match value {
                    Some(value) => status |= out(&format!("alias {name}={}\n", quote(&value))),
                    None => status = fail(shell, "alias", format_args!("{name}: not found"), 1),
                }
            }
        }
    }
    status
}

pub fn unalias(shell: &mut Shell, args: &[String]) -> i32 {
    if args.get(1).is_some_and(|a| a == "-a") {
        shell.frame().aliases.borrow_mut().clear();
        return 0;
    }
    if args.len() == 1 {
        return fail(shell, "unalias", "usage: unalias [-a] name...", 2);
    }
    let mut status = 0;
    for name in &args[1..] {
        let result = shell.frame().aliases.borrow_mut().remove(name);
        if let Err(e) = result {
            status = fail(shell, "unalias", e, 1);
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::super::testing::{output, shell};
    use super::*;
    use pretty_assertions::assert_eq;

    fn bytes(s: &str) -> Vec<Byte> {
        s.bytes().map(|b| (b, false)).collect()
    }

    #[test]
    fn read_splitting() {
        assert_eq!(split_for_read(&bytes("  a  b c  "), b" \t\n", 2), vec!["a", "b c"]);
        assert_eq!(split_for_read(&bytes("a"), b" \t\n", 3), vec!["a", "", ""]);
        assert_eq!(split_for_read(&bytes("a::b"), b":", 3), vec!["a", "", "b"]);
        assert_eq!(split_for_read(&bytes("  keep  "), b"", 1), vec!["  keep  "]);
        let mut escaped = bytes("a b");
        escaped[1].1 = true;
        assert_eq!(split_for_read(&escaped, b" ", 2), vec!["a b", ""]);
    }

    #[test]
    fn read_from_here_doc() {
        let mut sh = shell();
        let src = "read a b <<EOF\none two three\nEOF\necho \"$a|$b\"\nread -r line <<'EOF'\nx\\y\nEOF\necho \"$line\"";
        assert_eq!(output(&mut sh, src), ("one|two three\nx\\y\n".into(), 0));
    }

    #[test]
    fn read_eof_status() {
        let mut sh = shell();
        assert_eq!(output(&mut sh, "printf partial | { read v; echo $? $v; }"), ("1 partial\n".into(), 0));
    }

    #[test]
    fn export_and_readonly() {
        let mut sh = shell();
        let (text, status) = output(&mut sh, "export A=1; readonly R=x; R=y; echo $?; export -p | grep ' A='; readonly -p | grep R");
        assert_eq!((text.as_str(), status), ("1\nexport A='1'\nreadonly R='x'\n", 0));
    }

    #[test]
    fn unset_variables_and_functions() {
        let mut sh = shell();
        let (text, _) = output(&mut sh, "v=1; f() { :; }; unset v; unset -f f; echo \"${v-gone}\"; type f >/dev/null 2>&1; echo $?");
        assert_eq!(text, "gone\n1\n");
    }

    #[test]
    fn set_options_and_params() {
        let mut sh = shell();
        let (text, _) = output(&mut sh, "set -eu -o pipefail a 'b c'; echo $# \"$2\" $-; set +o | grep pipefail; set --; echo $#");
        assert_eq!(text, "2 b c eu\nset -o pipefail\n0\n");
    }

    #[test]
    fn set_rejects_unknown_option() {
        let mut sh = shell();
        assert_eq!(output(&mut sh, "set -Z; echo $?"), ("2\n".into(), 0));
    }

    #[test]
    fn shift_out_of_range() {
        let mut sh = shell();
        assert_eq!(output(&mut sh, "set -- a b c; shift 2; echo $1; shift 5; echo $? $1"), ("c\n1 c\n".into(), 0));
    }

    #[test]
    fn alias_listing() {
        let mut sh = shell();
        let (text, _) = output(&mut sh, "alias b='x y' a=z; alias; unalias a; alias a; echo $?");
        assert_eq!(text, "alias a='z'\nalias b='x y'\n1\n");
    }
}
