//! 制御フローのビルトインと `trap`。

use super::{fail, out, quote};
use crate::frame::Flow;
use crate::shell::Shell;
use crate::signals;
use crate::traps::{self, TrapAction};

/// 省略可能な回数/ステータス引数を読む。
fn count_arg(shell: &Shell, name: &str, arg: Option<&String>) -> Result<Option<i64>, i32> {
    match arg {
        None => Ok(None),
        Some(text) => text
            .parse::<i64>()
            .map(Some)
            .map_err(|_| fail(shell, name, format_args!("{text}: numeric argument required"), 2)),
    }
}

fn loop_flow(shell: &mut Shell, args: &[String], make: fn(usize) -> Flow) -> i32 {
    let name = args[0].as_str();
    let n = match count_arg(shell, name, args.get(1)) {
        Ok(n) => n.unwrap_or(1),
        Err(status) => return status,
    };
    if n < 1 {
        return fail(shell, name, format_args!("{n}: loop count out of range"), 1);
    }
    let depth = shell.frame().loop_depth;
    if depth == 0 {
        return fail(shell, name, "only meaningful in a `for', `while', or `until' loop", 1);
    }
    shell.frame_mut().pending_flow = Some(make((n as usize).min(depth)));
    0
}

pub fn break_(shell: &mut Shell, args: &[String]) -> i32 {
    loop_flow(shell, args, Flow::Break)
}

pub fn continue_(shell: &mut Shell, args: &[String]) -> i32 {
    loop_flow(shell, args, Flow::Continue)
}

/// `return [n]`。関数か `.` スクリプトの中でのみ有効。
pub fn return_(shell: &mut Shell, args: &[String]) -> i32 {
    let status = match count_arg(shell, "return", args.get(1)) {
        Ok(n) => n.map_or(shell.status(), |n| n.rem_euclid(256) as i32),
        Err(status) => return status,
    };
    if !shell.frames.can_return() {
        return fail(shell, "return", "can only `return' from a function or sourced script", 1);
    }
    shell.frame_mut().pending_flow = Some(Flow::Return(status));
    status
}

pub fn exit(shell: &mut Shell, args: &[String]) -> i32 {
    let status = match count_arg(shell, "exit", args.get(1)) {
        Ok(n) => n.map_or(shell.status(), |n| n.rem_euclid(256) as i32),
        Err(status) => status,
    };
    shell.frame_mut().pending_flow = Some(Flow::Exit(status));
    status
}

// ── trap ─────────────────────────────────────────────────────────────

fn signal_label(sig: i32) -> String {
    if sig == traps::EXIT {
        "EXIT".to_string()
    } else {
        signals::name_of(sig).map_or_else(|| sig.to_string(), str::to_string)
    }
}

fn print_traps(shell: &Shell) -> i32 {
    let mut text = String::new();
    for (sig, action) in shell.frame().traps.borrow().iter() {
        let body = match action {
            TrapAction::Default => continue,
            TrapAction::Ignore => String::new(),
            TrapAction::Command(cmd) => cmd.clone(),
        };
        text.push_str(&format!("trap -- {} {}\n", quote(&body), signal_label(sig)));
    }
    out(&text)
}

/// `trap [-p] | -l | action sig... | sig...`
///
/// 先頭が符号なし整数なら全引数をシグナルとみなして既定に戻す。
/// 起動時に無視されていたシグナルは変更できない（黙って無視する）。
pub fn trap(shell: &mut Shell, args: &[String]) -> i32 {
    let mut rest = &args[1..];
    if rest.first().is_some_and(|a| a == "--") {
        rest = &rest[1..];
    }
    match rest.first().map(String::as_str) {
        None | Some("-p") => return print_traps(shell),
        Some("-l") => {
            let text: String = signals::all().map(|(n, name)| format!("{n}) SIG{name}\n")).collect();
            return out(&text);
        }
        _ => {}
    }

    let (action, sigs) = if rest[0].bytes().all(|b| b.is_ascii_digit()) {
        (TrapAction::Default, rest)
    } else {
        let action = match rest[0].as_str() {
            "-" => TrapAction::Default,
            "" => TrapAction::Ignore,
            cmd => TrapAction::Command(cmd.to_string()),
        };
        (action, &rest[1..])
    };
    if sigs.is_empty() {
        return fail(shell, "trap", "usage: trap [action] signal...", 2);
    }

    let mut status = 0;
    let interactive = shell.interactive;
    for spec in sigs {
        let Some(sig) = signals::number_of(spec) else {
            status = fail(shell, "trap", format_args!("{spec}: invalid signal specification"), 1);
            continue;
        };
        if sig == libc::SIGKILL || sig == libc::SIGSTOP {
            status = fail(shell, "trap", format_args!("{spec}: cannot be trapped"), 1);
            continue;
        }
        let ignored = shell.frames.ignored_at_entry();
        if sig != traps::EXIT && ignored.contains(&sig) {
            continue;
        }
        signals::apply_trap(sig, &action, ignored, interactive);
        shell.frame().traps.borrow_mut().set(sig, action.clone());
    }
    status
}
