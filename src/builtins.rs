//! ビルトインコマンドの表と共通ヘルパー。
//!
//! ビルトインは fork/exec を経由せずプロセス内で直接実行される。
//! 表は名前順に並べてあり [`lookup`] は二分探索する。
//!
//! | モジュール | コマンド |
//! |-----------|---------|
//! | `base` | `:` `true` `false` `echo` `printf` `pwd` `cd` `umask` `times` `type` `command` `exec` `eval` `.` |
//! | `vars` | `export` `readonly` `unset` `local` `set` `shift` `read` `alias` `unalias` |
//! | `flow` | `break` `continue` `return` `exit` `trap` |
//! | `jobs` | `jobs` `fg` `bg` `wait` `kill` |
//! | `test` | `test` `[` |
//!
//! 特殊ビルトインの前置代入はシェルに残り、関数より先に探される。
//! 非局所脱出はフレームの `pending_flow` に置き、executor が拾う。

mod base;
mod flow;
mod jobs;
mod vars;

use std::fmt;
use std::io::Write;

use crate::shell::Shell;
use crate::sys;

/// ビルトインの本体。`args[0]` はコマンド名。
pub type BuiltinFn = fn(&mut Shell, &[String]) -> i32;

#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    /// POSIX の特殊ビルトインか。
    pub special: bool,
    pub run: BuiltinFn,
}

const fn special(name: &'static str, run: BuiltinFn) -> Builtin {
    Builtin { name, special: true, run }
}

const fn regular(name: &'static str, run: BuiltinFn) -> Builtin {
    Builtin { name, special: false, run }
}

/// 名前順（バイト順）。
static BUILTINS: [Builtin; 35] = [
    special(".", base::dot),
    special(":", base::colon),
    regular("[", test::bracket),
    regular("alias", vars::alias),
    regular("bg", jobs::bg),
    special("break", flow::break_),
    regular("cd", base::cd),
    regular("command", base::command),
    special("continue", flow::continue_),
    regular("echo", base::echo),
    special("eval", base::eval),
    special("exec", base::exec),
    special("exit", flow::exit),
    special("export", vars::export),
    regular("false", base::false_),
    regular("fg", jobs::fg),
    regular("jobs", jobs::jobs),
    regular("kill", jobs::kill),
    regular("local", vars::local),
    regular("printf", base::printf),
    regular("pwd", base::pwd),
    regular("read", vars::read),
    special("readonly", vars::readonly),
    special("return", flow::return_),
    special("set", vars::set),
    special("shift", vars::shift),
    regular("test", test::test),
    special("times", base::times),
    special("trap", flow::trap),
    regular("true", base::true_),
    regular("type", base::type_),
    regular("umask", base::umask),
    regular("unalias", vars::unalias),
    special("unset", vars::unset),
    regular("wait", jobs::wait),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS
        .binary_search_by(|b| b.name.cmp(name))
        .ok()
        .map(|i| &BUILTINS[i])
}

// ── 共通ヘルパー ─────────────────────────────────────────────────────

/// `prush: name: msg` を出してステータスを返す。
fn fail(shell: &Shell, name: &str, msg: impl fmt::Display, status: i32) -> i32 {
    shell.report(format_args!("{name}: {msg}"));
    status
}

/// 標準出力（fd 1）へバッファなしで書く。書けなければ 1。
fn out(text: &str) -> i32 {
    match sys::stdout().write_all(text.as_bytes()) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// シェル用の単一引用符クォート（`set`、`export -p`、`trap` の出力）。
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
