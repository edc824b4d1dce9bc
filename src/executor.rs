//! 構文木の実行: コマンドリスト、and-or、パイプライン、単純コマンド、複合コマンド。
//!
//! - [`execute`]: コマンドリスト（`;`/`&`/改行）を順に実行し、各項目の後で終了した子の回収と保留トラップを処理
//! - [`execute_and_or`]: `&&`/`||` の短絡評価。最後以外のパイプラインは条件文脈
//! - [`execute_command`]: 単純・複合・関数定義へ振り分け
//! - [`dispatch`]: 展開済みのコマンドを特殊ビルトイン → 関数 → ビルトイン → 外部コマンドの順で実行
//!
//! 非局所脱出（`return`/`break`/`continue`/`exit`）は [`Outcome::flow`] で呼び出し元へ返し、
//! ループとフレーム境界が消費・転送・拒否を決める。errexit はパイプライン単位で判定する。

use std::rc::Rc;

use tracing::trace;

use crate::ast::{
    AndOrList, CaseTerminator, Command, CommandList, CompoundCommand, Connector, FunctionDef, Pipeline, Redirect,
    SimpleCommand, Word,
};
use crate::builtins;
use crate::error::ExpandError;
use crate::expand;
use crate::frame::{Flow, Outcome, PushArgs};
use crate::glob;
use crate::options::ShellOption;
use crate::policy::FrameKind;
use crate::process;
use crate::redirect;
use crate::shell::{self, Shell};
use crate::signals;
use crate::sys;
use crate::variables::Variable;

/// コマンドリストを実行する。
pub fn execute(shell: &mut Shell, list: &CommandList) -> Outcome {
    let mut outcome = Outcome::normal(0);
    for item in &list.items {
        outcome = if item.background {
            process::spawn_background(shell, &item.and_or, &and_or_text(&item.and_or))
        } else {
            execute_and_or(shell, &item.and_or)
        };
        shell.set_status(outcome.status);
        if outcome.interrupts() {
            return outcome;
        }
        // 保留ビットは直後の run_pending_traps が消費する
        if signals::is_pending(libc::SIGCHLD) {
            shell.reap_children();
        }
        if let Some(flow) = shell.run_pending_traps() {
            return Outcome::with_flow(outcome.status, flow);
        }
    }
    outcome
}

fn and_or_text(and_or: &AndOrList) -> String {
    let mut text = and_or.first.text.clone();
    for (connector, pipeline) in &and_or.rest {
        text.push_str(match connector {
            Connector::And => " && ",
            Connector::Or => " || ",
        });
        text.push_str(&pipeline.text);
    }
    text
}

pub fn execute_and_or(shell: &mut Shell, and_or: &AndOrList) -> Outcome {
    let mut outcome = execute_pipeline(shell, &and_or.first, and_or.rest.is_empty());
    for (i, (connector, pipeline)) in and_or.rest.iter().enumerate() {
        if outcome.interrupts() {
            return outcome;
        }
        let run = match connector {
            Connector::And => outcome.status == 0,
            Connector::Or => outcome.status != 0,
        };
        if run {
            outcome = execute_pipeline(shell, pipeline, i + 1 == and_or.rest.len());
        }
    }
    outcome
}

/// 条件文脈の中で実行する（errexit が効かない）。
fn in_condition<T>(shell: &mut Shell, f: impl FnOnce(&mut Shell) -> T) -> T {
    shell.condition_depth += 1;
    let result = f(shell);
    shell.condition_depth -= 1;
    result
}

fn errexit_active(shell: &Shell) -> bool {
    shell.option(ShellOption::ErrExit) && shell.frame().errexit_enabled() && shell.condition_depth == 0
}

/// パイプラインを実行する。`last` は and-or リストの最後のパイプラインか。
fn execute_pipeline(shell: &mut Shell, pipeline: &Pipeline, last: bool) -> Outcome {
    let exempt = pipeline.negated || !last;
    let run = |sh: &mut Shell| {
        if pipeline.commands.len() == 1 {
            execute_command(sh, &pipeline.commands[0])
        } else {
            process::run_pipeline(sh, pipeline)
        }
    };
    let outcome = if exempt { in_condition(shell, run) } else { run(shell) };
    if outcome.interrupts() {
        return outcome;
    }
    let status = if pipeline.negated { i32::from(outcome.status == 0) } else { outcome.status };
    shell.set_status(status);
    if status != 0 && !exempt && errexit_active(shell) {
        return Outcome::with_flow(status, Flow::Exit(status));
    }
    Outcome::normal(status)
}

pub fn execute_command(shell: &mut Shell, command: &Command) -> Outcome {
    match command {
        Command::Simple(cmd) => run_simple(shell, cmd),
        Command::Compound(compound, redirects) => {
            let saved = match redirect::apply(shell, redirects) {
                Ok(saved) => saved,
                Err(e) => {
                    shell.report(&e);
                    return Outcome::normal(1);
                }
            };
            let outcome = execute_compound(shell, compound);
            redirect::restore(shell, saved);
            outcome
        }
        Command::FunctionDef(def) => {
            let defined = shell.frame().functions.borrow_mut().define(def);
            match defined {
                Ok(()) => Outcome::normal(0),
                Err(e) => {
                    shell.report(&e);
                    Outcome::normal(1)
                }
            }
        }
    }
}

/// `( list )` の中身が単一の単純コマンドか。そうなら子は fork せずに exec してよい。
pub fn is_single_simple(list: &CommandList) -> bool {
    match list.items.as_slice() {
        [item] => {
            !item.background
                && item.and_or.rest.is_empty()
                && !item.and_or.first.negated
                && matches!(item.and_or.first.commands.as_slice(), [Command::Simple(_)])
        }
        _ => false,
    }
}

fn expansion_failed(shell: &mut Shell, err: &ExpandError) -> Outcome {
    shell.report(err);
    shell.set_status(1);
    Outcome::normal(1)
}

// ── 複合コマンド ─────────────────────────────────────────────────────

fn execute_compound(shell: &mut Shell, compound: &CompoundCommand) -> Outcome {
    match compound {
        CompoundCommand::BraceGroup(list) => {
            shell.push_frame(FrameKind::BraceGroup);
            let outcome = execute(shell, list);
            shell.pop_frame();
            shell.set_status(outcome.status);
            outcome
        }
        CompoundCommand::Subshell(list) => process::run_subshell(shell, list),
        CompoundCommand::If { branches, else_branch } => {
            for (condition, body) in branches {
                let tested = in_condition(shell, |sh| execute(sh, condition));
                if tested.interrupts() {
                    return tested;
                }
                if tested.status == 0 {
                    return execute(shell, body);
                }
            }
            match else_branch {
                Some(body) => execute(shell, body),
                None => Outcome::normal(0),
            }
        }
        CompoundCommand::While { condition, body } => run_loop(shell, condition, body, false),
        CompoundCommand::Until { condition, body } => run_loop(shell, condition, body, true),
        CompoundCommand::For { name, words, body } => run_for(shell, name, words.as_deref(), body),
        CompoundCommand::Case { subject, items } => {
            let subject = match expand::expand_string(shell, subject) {
                Ok(s) => s,
                Err(e) => return expansion_failed(shell, &e),
            };
            let mut matched = None;
            'items: for (i, item) in items.iter().enumerate() {
                for pattern in &item.patterns {
                    let pattern = match expand::expand_pattern(shell, pattern) {
                        Ok(p) => p,
                        Err(e) => return expansion_failed(shell, &e),
                    };
                    if glob::matches(&pattern, &subject) {
                        matched = Some(i);
                        break 'items;
                    }
                }
            }
            let Some(start) = matched else {
                return Outcome::normal(0);
            };
            let mut outcome = Outcome::normal(0);
            for item in &items[start..] {
                outcome = execute(shell, &item.body);
                if outcome.interrupts() || item.terminator == CaseTerminator::Break {
                    break;
                }
            }
            outcome
        }
    }
}

/// ループ本体の結果をどう扱うか。
enum Step {
    Next,
    Done(Outcome),
}

/// `break n`/`continue n` は 1 段消費して残りを外側へ返す。
fn loop_step(outcome: Outcome) -> Step {
    let status = outcome.status;
    match outcome.flow {
        None | Some(Flow::Continue(1)) => Step::Next,
        Some(Flow::Break(1)) => Step::Done(Outcome::normal(status)),
        Some(Flow::Break(n)) => Step::Done(Outcome::with_flow(status, Flow::Break(n - 1))),
        Some(Flow::Continue(n)) => Step::Done(Outcome::with_flow(status, Flow::Continue(n - 1))),
        Some(flow) => Step::Done(Outcome::with_flow(status, flow)),
    }
}

fn run_loop(shell: &mut Shell, condition: &CommandList, body: &CommandList, until: bool) -> Outcome {
    shell.push_frame(FrameKind::Loop);
    let mut status = 0;
    let outcome = loop {
        let tested = in_condition(shell, |sh| execute(sh, condition));
        if tested.interrupts() {
            match loop_step(tested) {
                Step::Next => continue,
                Step::Done(outcome) => break outcome,
            }
        }
        if (tested.status == 0) == until {
            break Outcome::normal(status);
        }
        let ran = execute(shell, body);
        status = ran.status;
        if let Step::Done(outcome) = loop_step(ran) {
            break outcome;
        }
    };
    shell.pop_frame();
    shell.set_status(outcome.status);
    outcome
}

fn run_for(shell: &mut Shell, name: &str, words: Option<&[Word]>, body: &CommandList) -> Outcome {
    let values = match words {
        Some(words) => match expand::expand_words(shell, words) {
            Ok(values) => values,
            Err(e) => return expansion_failed(shell, &e),
        },
        None => shell.frame().positional.borrow().params().to_vec(),
    };
    shell.push_frame(FrameKind::Loop);
    let mut outcome = Outcome::normal(0);
    for value in values {
        if let Err(e) = shell.assign(name, &value) {
            shell.report(&e);
            outcome = Outcome::normal(1);
            break;
        }
        let ran = execute(shell, body);
        outcome = Outcome::normal(ran.status);
        if let Step::Done(done) = loop_step(ran) {
            outcome = done;
            break;
        }
    }
    shell.pop_frame();
    shell.set_status(outcome.status);
    outcome
}

// ── 単純コマンド ─────────────────────────────────────────────────────

fn run_simple(shell: &mut Shell, cmd: &SimpleCommand) -> Outcome {
    // exec で置き換えてよいのは、このフレームの終わりでプロセスも終わるときだけ
    let in_place = std::mem::take(&mut shell.exec_in_place) && shell.frame().policy.exit.terminates_process;
    if cmd.line > 0 {
        shell.frame_mut().source_line = cmd.line;
    }
    shell.subst_status = None;

    let fields = match expand::expand_words(shell, &cmd.words) {
        Ok(fields) => fields,
        Err(e) => return expansion_failed(shell, &e),
    };
    let mut assigns = Vec::with_capacity(cmd.assignments.len());
    for assignment in &cmd.assignments {
        match expand::expand_string(shell, &assignment.value) {
            Ok(value) => assigns.push((assignment.name.clone(), value)),
            Err(e) => return expansion_failed(shell, &e),
        }
    }
    if shell.option(ShellOption::XTrace) {
        trace_command(shell, &assigns, &fields);
    }

    if fields.is_empty() {
        let saved = match redirect::apply(shell, &cmd.redirects) {
            Ok(saved) => saved,
            Err(e) => {
                shell.report(&e);
                return Outcome::normal(1);
            }
        };
        let mut status = shell.subst_status.unwrap_or(0);
        for (name, value) in &assigns {
            if let Err(e) = shell.assign(name, value) {
                shell.report(&e);
                status = 1;
                break;
            }
        }
        redirect::restore(shell, saved);
        return Outcome::normal(status);
    }

    let outcome = dispatch(shell, &fields, &assigns, &cmd.redirects, in_place, true);
    if let Some(last) = fields.last() {
        shell.last_arg = last.clone();
    }
    outcome
}

/// xtrace: `PS4` の展開結果に続けて、代入とフィールドを fd 2 に書く。
fn trace_command(shell: &mut Shell, assigns: &[(String, String)], fields: &[String]) {
    let ps4 = shell.var("PS4").unwrap_or_default();
    let mut line = expand::expand_prompt(shell, &ps4);
    let words = assigns
        .iter()
        .map(|(name, value)| format!("{name}={}", quote_for_trace(value)))
        .chain(fields.iter().map(|f| quote_for_trace(f)));
    line.push_str(&words.collect::<Vec<_>>().join(" "));
    line.push('\n');
    let _ = sys::write_all(libc::STDERR_FILENO, line.as_bytes());
}

fn quote_for_trace(text: &str) -> String {
    let plain = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        text.to_string()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

/// 展開済みのコマンドを実行する。`allow_functions` が偽なら関数を飛ばす（`command`）。
///
/// 前置代入は、特殊ビルトインなら恒久的に、関数と通常ビルトインなら実行中だけ、
/// 外部コマンドなら環境だけに反映する。
pub fn dispatch(
    shell: &mut Shell,
    fields: &[String],
    assigns: &[(String, String)],
    redirects: &[Redirect],
    in_place: bool,
    allow_functions: bool,
) -> Outcome {
    let name = fields[0].as_str();
    let builtin = builtins::lookup(name);
    let function = if allow_functions && !builtin.is_some_and(|b| b.special) {
        shell.frame().functions.borrow().get(name)
    } else {
        None
    };

    // `exec` に引数がなければリダイレクトはシェル自身に残る
    if name == "exec" && fields.len() == 1 {
        return match redirect::apply_permanent(shell, redirects) {
            Ok(()) => {
                for (n, v) in assigns {
                    if let Err(e) = shell.assign(n, v) {
                        shell.report(&e);
                        return Outcome::normal(1);
                    }
                }
                Outcome::normal(0)
            }
            Err(e) => {
                shell.report(&e);
                Outcome::normal(1)
            }
        };
    }

    let saved = match redirect::apply(shell, redirects) {
        Ok(saved) => saved,
        Err(e) => {
            shell.report(&e);
            return Outcome::normal(1);
        }
    };

    trace!(
        command = name,
        builtin = builtin.map(|b| if b.special { "special" } else { "regular" }),
        function = function.is_some(),
        "dispatch"
    );
    let outcome = match (builtin, function) {
        (Some(b), _) if b.special => {
            let mut failed = false;
            for (n, v) in assigns {
                if let Err(e) = shell.assign(n, v) {
                    shell.report(&e);
                    failed = true;
                    break;
                }
            }
            if failed {
                Outcome::normal(1)
            } else {
                run_builtin(shell, b, fields)
            }
        }
        (_, Some(def)) => call_function(shell, def, &fields[1..], assigns),
        (Some(b), None) => with_temporary_vars(shell, assigns, |sh| run_builtin(sh, b, fields)),
        (None, None) => process::run_external(shell, fields, assigns, in_place),
    };
    redirect::restore(shell, saved);
    shell.set_status(outcome.status);
    outcome
}

fn run_builtin(shell: &mut Shell, builtin: &builtins::Builtin, fields: &[String]) -> Outcome {
    let status = (builtin.run)(shell, fields);
    match shell.frame_mut().pending_flow.take() {
        Some(flow) => Outcome::with_flow(status, flow),
        None => Outcome::normal(status),
    }
}

/// 前置代入を一時的に設定して `f` を実行し、元に戻す。
fn with_temporary_vars(
    shell: &mut Shell,
    assigns: &[(String, String)],
    f: impl FnOnce(&mut Shell) -> Outcome,
) -> Outcome {
    let mut saved: Vec<(String, Option<Variable>)> = Vec::with_capacity(assigns.len());
    for (name, value) in assigns {
        let snapshot = shell.frame().vars.borrow().snapshot(name);
        let set = {
            let mut vars = shell.frame().vars.borrow_mut();
            vars.set(name, value.as_str()).and_then(|()| vars.set_exported(name, true))
        };
        if let Err(e) = set {
            shell.report(&e);
            restore_vars(shell, saved);
            return Outcome::normal(1);
        }
        saved.push((name.clone(), snapshot));
    }
    let outcome = f(shell);
    restore_vars(shell, saved);
    outcome
}

fn restore_vars(shell: &mut Shell, saved: Vec<(String, Option<Variable>)>) {
    let mut vars = shell.frame().vars.borrow_mut();
    for (name, snapshot) in saved.into_iter().rev() {
        vars.restore(&name, snapshot);
    }
}

/// 関数呼び出し。Function フレームを push し、`return` をここで消費する。
pub fn call_function(shell: &mut Shell, def: Rc<FunctionDef>, args: &[String], assigns: &[(String, String)]) -> Outcome {
    with_temporary_vars(shell, assigns, |sh| {
        sh.push_frame_with(FrameKind::Function, PushArgs { positional: Some(args.to_vec()), source_name: None });
        let outcome = execute_command(sh, &def.body);
        let outcome = shell::settle(sh, outcome);
        let outcome = match sh.pop_frame() {
            Some(n) => Outcome::with_flow(n, Flow::Exit(n)),
            None => outcome,
        };
        sh.set_status(outcome.status);
        outcome
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Bootstrap;
    use crate::parser;
    use crate::variables::VarStore;
    use pretty_assertions::assert_eq;

    fn shell() -> Shell {
        let mut vars = VarStore::new();
        vars.set("PATH", "/usr/bin:/bin").unwrap();
        vars.set_exported("PATH", true).unwrap();
        Shell::new(Bootstrap { vars, ..Bootstrap::default() }, false)
    }

    fn run(sh: &mut Shell, src: &str) -> Outcome {
        execute(sh, &parser::parse(src).unwrap())
    }

    fn var(sh: &Shell, name: &str) -> Option<String> {
        sh.var(name)
    }

    #[test]
    fn and_or_short_circuit() {
        let mut sh = shell();
        run(&mut sh, "true && a=y || a=n; false && b=y || b=n");
        assert_eq!(var(&sh, "a").as_deref(), Some("y"));
        assert_eq!(var(&sh, "b").as_deref(), Some("n"));
    }

    #[test]
    fn negation() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "! true").status, 1);
        assert_eq!(run(&mut sh, "! false").status, 0);
    }

    #[test]
    fn loops_with_break_and_continue() {
        let mut sh = shell();
        run(
            &mut sh,
            "out=; for i in 1 2 3 4; do if [ $i = 2 ]; then continue; fi; if [ $i = 4 ]; then break; fi; out=$out$i; done",
        );
        assert_eq!(var(&sh, "out").as_deref(), Some("13"));

        run(&mut sh, "n=0; while [ $n -lt 5 ]; do n=$((n+1)); done");
        assert_eq!(var(&sh, "n").as_deref(), Some("5"));

        run(&mut sh, "n=0; until [ $n -ge 3 ]; do n=$((n+1)); done");
        assert_eq!(var(&sh, "n").as_deref(), Some("3"));
    }

    #[test]
    fn nested_break_levels() {
        let mut sh = shell();
        run(&mut sh, "out=; for a in x y; do for b in 1 2; do out=$out$a$b; break 2; done; done");
        assert_eq!(var(&sh, "out").as_deref(), Some("x1"));
        run(&mut sh, "out=; for a in x y; do for b in 1 2; do out=$out$a$b; continue 2; done; done");
        assert_eq!(var(&sh, "out").as_deref(), Some("x1y1"));
    }

    #[test]
    fn loop_status_is_last_body_status() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "for i in a; do false; done").status, 1);
        assert_eq!(run(&mut sh, "for i in; do false; done").status, 0);
        assert_eq!(run(&mut sh, "while false; do :; done").status, 0);
    }

    #[test]
    fn case_matching_and_fallthrough() {
        let mut sh = shell();
        run(&mut sh, "x=foo.rs; case $x in *.txt) k=text;; *.rs|*.c) k=code;; *) k=other;; esac");
        assert_eq!(var(&sh, "k").as_deref(), Some("code"));
        run(&mut sh, "out=; case a in a) out=${out}1;& b) out=${out}2;; c) out=${out}3;; esac");
        assert_eq!(var(&sh, "out").as_deref(), Some("12"));
        run(&mut sh, r#"case '*' in "*") q=literal;; esac"#);
        assert_eq!(var(&sh, "q").as_deref(), Some("literal"));
    }

    #[test]
    fn functions_and_locals() {
        let mut sh = shell();
        run(&mut sh, "f() { local y=inner; r=$y; return 3; }; y=outer; f a b");
        assert_eq!(sh.status(), 3);
        assert_eq!(var(&sh, "r").as_deref(), Some("inner"));
        assert_eq!(var(&sh, "y").as_deref(), Some("outer"));
    }

    #[test]
    fn function_arguments_do_not_leak() {
        let mut sh = shell();
        run(&mut sh, "set -- outer; g() { inner=$1$#; }; g x y");
        assert_eq!(var(&sh, "inner").as_deref(), Some("x2"));
        assert_eq!(sh.frame().positional.borrow().params(), ["outer".to_string()]);
    }

    #[test]
    fn prefix_assignments_are_temporary_for_functions_and_builtins() {
        let mut sh = shell();
        run(&mut sh, "f() { seen=$v; }; v=1 f; v2=2 true");
        assert_eq!(var(&sh, "seen").as_deref(), Some("1"));
        assert_eq!(var(&sh, "v"), None);
        assert_eq!(var(&sh, "v2"), None);
        run(&mut sh, "v3=3 :");
        assert_eq!(var(&sh, "v3").as_deref(), Some("3"));
    }

    #[test]
    fn errexit_exits_on_failure() {
        let mut sh = shell();
        let outcome = run(&mut sh, "set -e; a=1; false; a=2");
        assert_eq!(outcome.flow, Some(Flow::Exit(1)));
        assert_eq!(var(&sh, "a").as_deref(), Some("1"));
    }

    #[test]
    fn errexit_ignored_in_conditions() {
        let mut sh = shell();
        let outcome = run(
            &mut sh,
            "set -e; if false; then :; fi; false || true; false && true; ! true; while false; do :; done; done=yes",
        );
        assert_eq!(outcome.flow, None);
        assert_eq!(var(&sh, "done").as_deref(), Some("yes"));
    }

    #[test]
    fn brace_group_shares_state() {
        let mut sh = shell();
        run(&mut sh, "{ x=1; y=2; }");
        assert_eq!(var(&sh, "x").as_deref(), Some("1"));
    }

    #[test]
    fn subshell_isolates_state() {
        let mut sh = shell();
        let outcome = run(&mut sh, "x=1; (x=2; exit 4)");
        assert_eq!(outcome.status, 4);
        assert_eq!(var(&sh, "x").as_deref(), Some("1"));
    }

    #[test]
    fn assignment_only_command_takes_substitution_status() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "x=$(exit 5)").status, 5);
        assert_eq!(run(&mut sh, "x=plain").status, 0);
    }

    #[test]
    fn last_argument_parameter() {
        let mut sh = shell();
        run(&mut sh, "true one two; x=$_");
        assert_eq!(var(&sh, "x").as_deref(), Some("two"));
    }

    #[test]
    fn trace_quoting() {
        assert_eq!(quote_for_trace("plain-word"), "plain-word");
        assert_eq!(quote_for_trace("two words"), "'two words'");
        assert_eq!(quote_for_trace(""), "''");
        assert_eq!(quote_for_trace("it's"), r"'it'\''s'");
    }

    #[test]
    fn single_simple_detection() {
        assert!(is_single_simple(&parser::parse("ls -l").unwrap()));
        assert!(!is_single_simple(&parser::parse("ls; ls").unwrap()));
        assert!(!is_single_simple(&parser::parse("ls | wc").unwrap()));
        assert!(!is_single_simple(&parser::parse("{ ls; }").unwrap()));
    }

    /// 終了したジョブが表から消えるまで回収を繰り返す。
    fn drain_jobs(sh: &mut Shell) {
        for _ in 0..500 {
            sh.reap_children();
            if sh.jobs.is_empty() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    #[test]
    fn finished_background_jobs_leave_the_table() {
        let mut sh = shell();
        run(&mut sh, &"true & ".repeat(40));
        drain_jobs(&mut sh);
        assert!(sh.jobs.is_empty());
    }

    #[test]
    fn retired_background_job_is_still_waitable() {
        let mut sh = shell();
        run(&mut sh, "(exit 3) &");
        let pid = sh.frame().last_bg_pid.unwrap();
        drain_jobs(&mut sh);
        assert!(sh.jobs.is_empty());
        assert_eq!(run(&mut sh, &format!("wait {pid}")).status, 3);
        assert_eq!(run(&mut sh, &format!("wait {pid}")).status, 127);

        run(&mut sh, "(exit 4) &");
        drain_jobs(&mut sh);
        assert_eq!(run(&mut sh, "wait %1").status, 4);
    }
}
