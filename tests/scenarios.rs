//! バイナリを `-c` などで起動し、標準出力・標準エラー・終了ステータスを確かめる結合テスト。

use std::io::Write;
use std::process::{Command, Stdio};

use pretty_assertions::assert_eq;

struct Run {
    stdout: String,
    stderr: String,
    status: i32,
}

fn prush_with(args: &[&str], stdin: &str) -> Run {
    let mut child = Command::new(env!("CARGO_BIN_EXE_prush"))
        .args(args)
        .env_remove("ENV")
        .env_remove("PRUSH_LOG")
        .env("PATH", "/usr/bin:/bin")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn prush");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait prush");
    Run {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code().unwrap_or(-1),
    }
}

fn prush(script: &str) -> Run {
    prush_with(&["-c", script], "")
}

/// 標準出力と終了ステータスだけを見る。
fn out(script: &str) -> (String, i32) {
    let run = prush(script);
    (run.stdout, run.status)
}

// ── 基本シナリオ ─────────────────────────────────────────────────────

#[test]
fn subshell_assignment_is_isolated() {
    assert_eq!(out("x=1; (x=2; echo $x); echo $x"), ("2\n1\n".into(), 0));
}

#[test]
fn local_variable_is_restored() {
    assert_eq!(
        out("f() { local y=inner; echo $y; }; y=outer; f; echo $y"),
        ("inner\nouter\n".into(), 0)
    );
}

#[test]
fn for_loop() {
    assert_eq!(out("for i in a b c; do echo $i; done"), ("a\nb\nc\n".into(), 0));
}

#[test]
fn and_or_lists() {
    assert_eq!(
        out("true && echo y || echo n; false && echo y || echo n"),
        ("y\nn\n".into(), 0)
    );
}

#[test]
fn failed_redirection_reports_and_continues() {
    let run = prush("echo hi > /nonexistent/out; echo $?");
    assert_eq!(run.stdout, "1\n");
    assert_eq!(run.status, 0);
    assert!(run.stderr.starts_with("prush: "), "stderr: {}", run.stderr);
    assert!(run.stderr.contains("/nonexistent/out"), "stderr: {}", run.stderr);
}

#[test]
fn brace_groups_in_a_pipeline() {
    assert_eq!(
        out(r#"{ echo one; echo two; } | { read a; read b; echo "$b $a"; }"#),
        ("two one\n".into(), 0)
    );
}

// ── 境界値 ───────────────────────────────────────────────────────────

#[test]
fn default_with_spaces_is_one_field() {
    let script = r#"set -- "${x:-default with spaces}"; echo $#"#;
    assert_eq!(out(script), ("1\n".into(), 0));
}

#[test]
fn empty_at_produces_no_fields() {
    assert_eq!(out(r#"set --; set -- "$@"; echo $#; set -- $@; echo $#"#), ("0\n0\n".into(), 0));
}

#[test]
fn command_substitution_strips_trailing_newlines() {
    assert_eq!(out(r#"x=$(echo a; echo b; echo; echo); printf '[%s]' "$x""#), ("[a\nb]".into(), 0));
}

#[test]
fn only_whitespace_splits_to_nothing() {
    assert_eq!(out("x='  \t  '; set -- $x; echo $#"), ("0\n".into(), 0));
}

#[test]
fn export_then_unset() {
    assert_eq!(out("export X=v; unset X; echo ${X-absent}"), ("absent\n".into(), 0));
}

#[test]
fn prefix_assignment_reaches_external_environment_only() {
    let script = r#"a=1 b=2 env | grep '^[ab]=' | sort; echo "[$a]""#;
    assert_eq!(out(script), ("a=1\nb=2\n[]\n".into(), 0));
}

#[test]
fn prefix_assignment_persists_for_special_builtin() {
    assert_eq!(out(r#"a=1 :; echo "[$a]""#), ("[1]\n".into(), 0));
}

#[test]
fn function_keeps_caller_positionals() {
    assert_eq!(out("set -- x y; f() { set -- 1; echo $1; }; f a b c; echo $1 $#"), ("1\nx 2\n".into(), 0));
}

#[test]
fn moved_fd_is_restored_after_command() {
    let run = prush("echo a 1>&2-; echo b >&2; echo c");
    assert_eq!((run.stdout.as_str(), run.stderr.as_str(), run.status), ("c\n", "a\nb\n", 0));
}

#[test]
#[cfg(target_os = "linux")]
fn finished_background_jobs_leave_no_zombies() {
    // 組み込みの read で子の一覧を読むので、読む側の子プロセスは数に入らない
    let script = r#"i=0
while [ $i -lt 40 ]; do true & i=$((i + 1)); done
sleep 1
:
read kids < /proc/$$/task/$$/children
echo "[$kids]"
jobs"#;
    assert_eq!(out(script), ("[]\n".into(), 0));
}

// ── errexit とステータス ────────────────────────────────────────────

#[test]
fn errexit_runs_to_completion_when_everything_succeeds() {
    assert_eq!(out("set -e; true; echo a; : ; echo b"), ("a\nb\n".into(), 0));
}

#[test]
fn errexit_stops_at_first_failure() {
    assert_eq!(out("set -e; echo a; false; echo b"), ("a\n".into(), 1));
}

#[test]
fn errexit_ignores_conditions_and_negation() {
    let script = "set -e; if false; then :; fi; false || true; ! true; while false; do :; done; echo ok";
    assert_eq!(out(script), ("ok\n".into(), 0));
}

#[test]
fn pipeline_status_and_pipefail() {
    assert_eq!(out("false | true; echo $?; ! true | false; echo $?"), ("0\n0\n".into(), 0));
    assert_eq!(out("set -o pipefail; false | true; echo $?"), ("1\n".into(), 0));
}

#[test]
fn signal_death_status() {
    assert_eq!(out("sh -c 'kill -TERM $$'; echo $?"), ("143\n".into(), 0));
}

#[test]
fn command_not_found_and_not_executable() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain");
    std::fs::write(&file, "echo no\n").unwrap();
    let script = format!("no_such_command_xyz; echo $?; {}; echo $?", file.display());
    let run = prush(&script);
    assert_eq!(run.stdout, "127\n126\n");
    assert!(run.stderr.contains("no_such_command_xyz"), "stderr: {}", run.stderr);
}

#[test]
fn exit_status_of_last_command() {
    assert_eq!(out("false").1, 1);
    assert_eq!(out("exit 42; echo no"), (String::new(), 42));
}

#[test]
fn syntax_error_exits_2() {
    let run = prush("echo ok; if then fi");
    assert_eq!(run.status, 2);
    assert!(run.stderr.starts_with("prush: "), "stderr: {}", run.stderr);
}

#[test]
fn exit_trap_runs_at_shell_exit() {
    assert_eq!(out("trap 'echo bye' EXIT; echo hi; exit 3"), ("hi\nbye\n".into(), 3));
}

#[test]
fn here_document_expands_substitutions() {
    let script = "x=world\ncat <<EOF\nhello $x $(echo sub) $((1 + 2))\nEOF\ncat <<'EOF'\n$x\nEOF";
    assert_eq!(out(script), ("hello world sub 3\n$x\n".into(), 0));
}

#[test]
fn case_with_fallthrough() {
    let script = "case b in a) echo a;; b) echo b;& c) echo c;; *) echo star;; esac";
    assert_eq!(out(script), ("b\nc\n".into(), 0));
}

// ── 起動方法 ─────────────────────────────────────────────────────────

#[test]
fn command_string_name_and_arguments() {
    let run = prush_with(&["-c", r#"echo "$0" "$@""#, "name", "a", "b"], "");
    assert_eq!(run.stdout, "name a b\n");
}

#[test]
fn plus_option_turns_off() {
    let run = prush_with(&["-e", "+e", "-c", "false; echo still"], "");
    assert_eq!((run.stdout.as_str(), run.status), ("still\n", 0));
}

#[test]
fn script_file_with_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("s.sh");
    std::fs::write(&script, "echo $# $1\nf() { return 5; }\nf\nexit $?\n").unwrap();
    let path = script.to_str().unwrap();
    let run = prush_with(&[path, "one", "two"], "");
    assert_eq!((run.stdout.as_str(), run.status), ("2 one\n", 5));
}

#[test]
fn missing_script_is_127() {
    let run = prush_with(&["/no/such/script.sh"], "");
    assert_eq!(run.status, 127);
    assert!(run.stderr.contains("/no/such/script.sh"), "stderr: {}", run.stderr);
}

#[test]
fn reads_commands_from_stdin() {
    let run = prush_with(&["-s", "a", "b"], "echo $1 $2\nread line\necho got $line\nrest of input\n");
    assert_eq!(run.stdout, "a b\ngot rest of input\n");
}
