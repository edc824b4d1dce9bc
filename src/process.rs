//! プロセスの生成と待機: fork する各フレーム（サブシェル、コマンド置換、パイプライン要素、
//! バックグラウンドジョブ）と外部コマンドの起動。
//!
//! fork した子はフレームを push して本体を実行し、pop（EXIT トラップ）してから `_exit` する。
//! 親はプロセスグループを揃え、フォアグラウンドなら待機、バックグラウンドならジョブ登録する。
//!
//! | 関数 | フレーム | プロセスグループ |
//! |------|----------|------------------|
//! | [`run_subshell`] | Subshell | 継承 |
//! | [`capture`] | CmdSubst | 継承 |
//! | [`run_pipeline`] | Pipeline + PipelineCmd | 先頭の子がリーダー |
//! | [`spawn_background`] | BackgroundJob | 新規 |
//! | [`run_external`] | – | 新規（ジョブ制御時） |

use std::io;

use libc::pid_t;
use tracing::debug;

use crate::ast::{AndOrList, Command, CommandList, Pipeline};
use crate::executor;
use crate::frame::{Flow, Outcome};
use crate::job::{self, ForegroundResult, JobTable};
use crate::options::ShellOption;
use crate::policy::{FrameKind, ProcessGroup};
use crate::shell::Shell;
use crate::signals;
use crate::spawn;
use crate::sys;

/// 子プロセスを fork し、`kind` のフレームで `body` を実行させる。親には子の PID を返す。
///
/// `leader` はパイプラインの先頭の子の PID（先頭自身なら 0）。
/// `foreground` ならジョブ制御時にターミナルを子のグループへ渡す。
pub fn fork_child<F>(shell: &mut Shell, kind: FrameKind, leader: pid_t, foreground: bool, body: F) -> io::Result<pid_t>
where
    F: FnOnce(&mut Shell) -> Outcome,
{
    let job_control = shell.job_control();
    let policy = kind.policy();
    let pgid = match policy.process.process_group {
        ProcessGroup::None => None,
        ProcessGroup::Start => Some(0),
        ProcessGroup::Pipeline => Some(leader),
    }
    .filter(|_| job_control);

    let pid = sys::fork()?;
    if pid == 0 {
        // グループとターミナルはシグナルを既定に戻す前に整える（SIGTTOU で止まらないように）
        if let Some(pgid) = pgid {
            sys::setpgid(0, pgid);
            if foreground {
                let group = if pgid == 0 { sys::getpid() } else { pgid };
                job::give_terminal_to(shell.terminal_fd, group);
            }
        }
        let traps = shell.frame().traps.borrow().clone();
        let ignored = shell.frames.ignored_at_entry().to_vec();
        signals::reset_for_child(&traps, &ignored, policy.class.background && !job_control);
        shell.jobs = JobTable::new();
        shell.in_subshell = policy.class.subshell;

        shell.push_frame(kind);
        let outcome = body(shell);
        let mut status = match outcome.flow {
            Some(Flow::Exit(n)) => n,
            _ => outcome.status,
        };
        shell.set_status(status);
        if let Some(n) = shell.pop_frame() {
            status = n;
        }
        sys::exit_now(status);
    }

    if let Some(pgid) = pgid {
        sys::setpgid(pid, if pgid == 0 { pid } else { pgid });
    }
    debug!(pid, kind = ?kind, "fork");
    Ok(pid)
}

/// フォアグラウンドのジョブを待つ。ジョブ制御時はターミナルを渡して取り戻し、
/// 停止したらジョブテーブルに Stopped として登録する。
fn wait_job(shell: &mut Shell, pids: Vec<pid_t>, pgid: pid_t, text: &str) -> ForegroundResult {
    let job_control = shell.job_control();
    if job_control {
        job::give_terminal_to(shell.terminal_fd, pgid);
    }
    let result = job::wait_foreground(&pids, job_control);
    if job_control {
        job::take_terminal_back(shell.terminal_fd, shell.shell_pgid);
    }
    if result.stopped {
        let id = shell.jobs.insert(pgid, text.to_string(), pids);
        shell.jobs.mark_stopped(id);
        eprintln!();
    }
    result
}

fn fork_error(shell: &mut Shell, err: &io::Error) -> Outcome {
    shell.report(format!("cannot fork: {err}"));
    Outcome::normal(1)
}

// ── サブシェル、コマンド置換 ─────────────────────────────────────────

/// `( list )`。
pub fn run_subshell(shell: &mut Shell, list: &CommandList) -> Outcome {
    let single = executor::is_single_simple(list);
    let pid = fork_child(shell, FrameKind::Subshell, 0, true, |sh| {
        sh.exec_in_place = single;
        executor::execute(sh, list)
    });
    match pid {
        Ok(pid) => {
            let result = job::wait_foreground(&[pid], false);
            Outcome::normal(result.statuses.first().copied().unwrap_or(1))
        }
        Err(e) => fork_error(shell, &e),
    }
}

/// `$(list)` の出力と終了ステータス。末尾の改行は取り除く。
pub fn capture(shell: &mut Shell, program: &CommandList) -> io::Result<(String, i32)> {
    let (read_end, write_end) = sys::pipe()?;
    let errexit = shell.errexit_in_subst;
    let single = executor::is_single_simple(program);
    let forked = fork_child(shell, FrameKind::CmdSubst, 0, false, |sh| {
        sys::close(read_end);
        if sys::dup2(write_end, libc::STDOUT_FILENO).is_err() {
            return Outcome::normal(1);
        }
        sys::close(write_end);
        if !errexit {
            sh.set_option(ShellOption::ErrExit, false);
        }
        sh.exec_in_place = single;
        executor::execute(sh, program)
    });
    sys::close(write_end);
    let pid = match forked {
        Ok(pid) => pid,
        Err(e) => {
            sys::close(read_end);
            return Err(e);
        }
    };
    let output = sys::read_to_end(read_end);
    sys::close(read_end);
    let status = job::wait_foreground(&[pid], false).statuses.first().copied().unwrap_or(1);
    let output = output?;
    let mut text = String::from_utf8_lossy(&output).into_owned();
    let trimmed = text.trim_end_matches('\n').len();
    text.truncate(trimmed);
    Ok((text, status))
}

// ── パイプライン ─────────────────────────────────────────────────────

/// 2 段以上のパイプライン。各段を PipelineCmd フレームの子で実行し、全員を待つ。
/// 戻り値は右端の終了ステータス（`pipefail` なら左端の非ゼロ）。`!` の反転は呼び出し側。
pub fn run_pipeline(shell: &mut Shell, pipeline: &Pipeline) -> Outcome {
    shell.push_frame(FrameKind::Pipeline);
    let mut pids = Vec::new();
    let mut leader: pid_t = 0;
    let mut prev_read: Option<i32> = None;
    let mut failure = None;
    let count = pipeline.commands.len();

    for (i, command) in pipeline.commands.iter().enumerate() {
        let (next_read, write) = if i + 1 < count {
            match sys::pipe() {
                Ok((r, w)) => (Some(r), Some(w)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        } else {
            (None, None)
        };
        let forked = fork_child(shell, FrameKind::PipelineCmd, leader, true, |sh| {
            if let Some(r) = next_read {
                sys::close(r);
            }
            if let Some(r) = prev_read {
                if sys::dup2(r, libc::STDIN_FILENO).is_err() {
                    return Outcome::normal(1);
                }
                sys::close(r);
            }
            if let Some(w) = write {
                if sys::dup2(w, libc::STDOUT_FILENO).is_err() {
                    return Outcome::normal(1);
                }
                sys::close(w);
            }
            sh.exec_in_place = matches!(command, Command::Simple(_));
            executor::execute_command(sh, command)
        });
        if let Some(r) = prev_read.take() {
            sys::close(r);
        }
        if let Some(w) = write {
            sys::close(w);
        }
        prev_read = next_read;
        match forked {
            Ok(pid) => {
                if leader == 0 {
                    leader = pid;
                }
                pids.push(pid);
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    if let Some(r) = prev_read {
        sys::close(r);
    }

    let result = wait_job(shell, pids, leader, &pipeline.text);
    let mut outcome = if let Some(e) = failure {
        fork_error(shell, &e)
    } else if result.stopped {
        Outcome::normal(128 + libc::SIGTSTP)
    } else {
        let last = result.statuses.last().copied().unwrap_or(0);
        let status = if shell.option(ShellOption::PipeFail) {
            result.statuses.iter().copied().find(|&s| s != 0).unwrap_or(0)
        } else {
            last
        };
        Outcome::normal(status)
    };
    shell.set_status(outcome.status);
    if let Some(n) = shell.pop_frame() {
        outcome = Outcome::with_flow(n, Flow::Exit(n));
    }
    outcome
}

// ── バックグラウンド ─────────────────────────────────────────────────

/// `and_or &`。ジョブとして登録し、すぐに戻る。
pub fn spawn_background(shell: &mut Shell, and_or: &AndOrList, text: &str) -> Outcome {
    let job_control = shell.job_control();
    let forked = fork_child(shell, FrameKind::BackgroundJob, 0, false, |sh| {
        if !job_control {
            if let Ok(fd) = sys::open("/dev/null", libc::O_RDONLY, 0) {
                let _ = sys::dup2(fd, libc::STDIN_FILENO);
                sys::close(fd);
            }
        }
        executor::execute_and_or(sh, and_or)
    });
    match forked {
        Ok(pid) => {
            let id = shell.jobs.insert(pid, text.to_string(), vec![pid]);
            shell.frame_mut().last_bg_pid = Some(pid);
            if shell.interactive {
                eprintln!("[{id}] {pid}");
            }
            Outcome::normal(0)
        }
        Err(e) => fork_error(shell, &e),
    }
}

/// 停止中またはバックグラウンドのジョブをフォアグラウンドで再開して待つ（`fg`）。
pub fn resume_foreground(shell: &mut Shell, id: usize) -> i32 {
    let Some(job) = shell.jobs.get(id) else {
        return 1;
    };
    let pgid = job.pgid;
    let text = job.command.clone();
    let pids: Vec<pid_t> = job
        .processes
        .iter()
        .filter(|p| !p.state.is_finished())
        .map(|p| p.pid)
        .collect();
    let _ = writeln_stdout(&text);
    shell.jobs.mark_running(id);
    let job_control = shell.job_control();
    if job_control {
        job::give_terminal_to(shell.terminal_fd, pgid);
    }
    unsafe {
        libc::kill(if job_control { -pgid } else { pgid }, libc::SIGCONT);
    }
    let result = job::wait_foreground(&pids, job_control);
    if job_control {
        job::take_terminal_back(shell.terminal_fd, shell.shell_pgid);
    }
    if result.stopped {
        shell.jobs.mark_stopped(id);
        eprintln!();
        return 128 + libc::SIGTSTP;
    }
    shell.jobs.remove(id);
    result.statuses.last().copied().unwrap_or(0)
}

fn writeln_stdout(text: &str) -> io::Result<()> {
    use std::io::Write;
    writeln!(sys::stdout(), "{text}")
}

// ── 外部コマンド ─────────────────────────────────────────────────────

/// 外部コマンドの環境: export された変数に、前置代入を上書きしたもの。
pub fn command_env(shell: &Shell, assigns: &[(String, String)]) -> Vec<String> {
    let mut env = shell.frame().vars.borrow().environ();
    for (name, value) in assigns {
        let prefix = format!("{name}=");
        env.retain(|entry| !entry.starts_with(&prefix));
        env.push(format!("{name}={value}"));
    }
    env
}

/// 外部コマンドを実行して待つ。`exec_in_place` なら fork せずに置き換える。
pub fn run_external(shell: &mut Shell, fields: &[String], assigns: &[(String, String)], in_place: bool) -> Outcome {
    let name = &fields[0];
    let path_var = shell.var("PATH");
    let Some(path) = spawn::find_in_path(name, path_var.as_deref()) else {
        shell.report(format!("{name}: command not found"));
        return Outcome::normal(127);
    };
    let env = command_env(shell, assigns);
    let sigdefault = {
        let traps = shell.frame().traps.borrow();
        signals::child_defaults(&traps, shell.frames.ignored_at_entry())
    };

    if in_place {
        let err = spawn::exec_replace(&path, fields, &env, &sigdefault);
        shell.report(&err);
        return Outcome::normal(err.exit_status());
    }

    let job_control = shell.job_control();
    let pgid = job_control.then_some(0);
    match spawn::spawn(&path, fields, &env, pgid, &sigdefault) {
        Ok(pid) => {
            let result = wait_job(shell, vec![pid], pid, &fields.join(" "));
            if result.stopped {
                return Outcome::normal(128 + libc::SIGTSTP);
            }
            Outcome::normal(result.statuses.first().copied().unwrap_or(1))
        }
        Err(err) => {
            shell.report(&err);
            Outcome::normal(err.exit_status())
        }
    }
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

    #[test]
    fn capture_strips_trailing_newlines() {
        let mut sh = shell();
        let program = parser::parse("echo a; echo b; echo; echo").unwrap();
        assert_eq!(capture(&mut sh, &program).unwrap(), ("a\nb".to_string(), 0));
    }

    #[test]
    fn capture_reports_status_and_isolates_state() {
        let mut sh = shell();
        let program = parser::parse("x=inner; exit 3").unwrap();
        assert_eq!(capture(&mut sh, &program).unwrap(), (String::new(), 3));
        assert_eq!(sh.var("x"), None);
    }

    #[test]
    fn pipeline_status_and_pipefail() {
        let mut sh = shell();
        let list = parser::parse("false | true").unwrap();
        let pipeline = &list.items[0].and_or.first;
        assert_eq!(run_pipeline(&mut sh, pipeline).status, 0);
        sh.set_option(ShellOption::PipeFail, true);
        assert_eq!(run_pipeline(&mut sh, pipeline).status, 1);
    }

    #[test]
    fn external_command_environment() {
        let mut sh = shell();
        sh.assign("HIDDEN", "1").unwrap();
        let env = command_env(&sh, &[("PATH".into(), "/x".into()), ("A".into(), "b".into())]);
        assert_eq!(env, vec!["PATH=/x".to_string(), "A=b".to_string()]);
    }

    #[test]
    fn missing_command_is_127() {
        let mut sh = shell();
        let outcome = run_external(&mut sh, &["definitely-not-a-command-xyz".to_string()], &[], false);
        assert_eq!(outcome.status, 127);
    }

    #[test]
    fn background_job_is_registered() {
        let mut sh = shell();
        let list = parser::parse("true &").unwrap();
        let outcome = spawn_background(&mut sh, &list.items[0].and_or, "true");
        assert_eq!(outcome.status, 0);
        let pid = sh.frame().last_bg_pid.unwrap();
        assert_eq!(sh.jobs.find_by_pid(pid), Some(1));
        sh.jobs.reap(true);
        assert!(sh.jobs.get(1).unwrap().state.is_finished());
    }

    #[test]
    fn background_job_without_job_control_ignores_interrupt() {
        let mut sh = shell();
        let list = parser::parse("sh -c 'kill -INT $$; exit 3' &").unwrap();
        spawn_background(&mut sh, &list.items[0].and_or, "sh");
        sh.jobs.reap(true);
        assert_eq!(sh.jobs.get(1).unwrap().exit_status(), 3);
    }
}
