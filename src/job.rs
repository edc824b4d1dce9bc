//! ジョブテーブルとジョブ制御ヘルパー。
//!
//! フォアグラウンド待機 ([`wait_foreground`])、バックグラウンド reap ([`JobTable::reap`])、
//! 状態変化の通知 ([`JobTable::notify_and_clean`])、ターミナル制御
//! ([`give_terminal_to`] / [`take_terminal_back`]) を提供する。
//! executor と builtins の両方から利用する。

use std::collections::VecDeque;
use std::io;

use libc::pid_t;
use tracing::debug;

// ── データ構造 ───────────────────────────────────────────────────────

/// プロセス・ジョブの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    /// 正常終了。
    Done,
    /// シグナルで終了。
    Terminated,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::Terminated)
    }
}

/// ジョブ内の個別プロセス。パイプライン中の各コマンドに対応する。
#[derive(Debug, Clone)]
pub struct JobProcess {
    pub pid: pid_t,
    pub state: JobState,
    /// シェル形式の終了ステータス（シグナル終了なら 128 + シグナル番号）。
    pub exit_status: i32,
}

/// ジョブ。パイプラインのプロセスグループに対応する。
#[derive(Debug, Clone)]
pub struct Job {
    /// `[N]` 形式で表示されるジョブ番号。最小未使用 ID が割り当てられる。
    pub id: usize,
    /// プロセスグループ ID。ジョブ制御無効時は最初のプロセスの PID。
    pub pgid: pid_t,
    /// 表示用コマンド文字列。
    pub command: String,
    pub processes: Vec<JobProcess>,
    pub state: JobState,
    /// 状態変化をユーザーに通知済みか。
    pub notified: bool,
}

impl Job {
    /// 個別プロセスの状態からジョブ状態を導出する。
    ///
    /// 判定優先度: Stopped > Running > 終了。
    /// 全プロセスが終了していれば最後のプロセスの状態（Done / Terminated）を使う。
    fn derive_state(&self) -> JobState {
        if self.processes.iter().any(|p| p.state == JobState::Stopped) {
            return JobState::Stopped;
        }
        if self.processes.iter().any(|p| p.state == JobState::Running) {
            return JobState::Running;
        }
        self.processes.last().map_or(JobState::Done, |p| p.state)
    }

    /// 最後のプロセスの終了ステータス。
    pub fn exit_status(&self) -> i32 {
        self.processes.last().map_or(0, |p| p.exit_status)
    }

    fn state_label(&self) -> String {
        match self.state {
            JobState::Running => "Running".to_string(),
            JobState::Stopped => "Stopped".to_string(),
            JobState::Done if self.exit_status() == 0 => "Done".to_string(),
            JobState::Done => format!("Done({})", self.exit_status()),
            JobState::Terminated => match signal_name(self.exit_status() - 128) {
                Some(name) => format!("Terminated ({name})"),
                None => "Terminated".to_string(),
            },
        }
    }
}

/// `waitpid` の raw status をシェルの終了ステータスに変換する。
pub fn decode_status(raw: i32) -> i32 {
    if libc::WIFEXITED(raw) {
        libc::WEXITSTATUS(raw)
    } else if libc::WIFSIGNALED(raw) {
        128 + libc::WTERMSIG(raw)
    } else if libc::WIFSTOPPED(raw) {
        128 + libc::WSTOPSIG(raw)
    } else {
        1
    }
}

fn signal_name(sig: i32) -> Option<&'static str> {
    crate::signals::name_of(sig)
}

/// 表から外した終了ジョブ。`wait` が後から終了ステータスを取り出せるように残す。
#[derive(Debug, Clone)]
struct Retired {
    id: usize,
    /// 各プロセスの PID と終了ステータス。
    processes: Vec<(pid_t, i32)>,
}

/// 記録しておく終了ジョブの上限。超えたら古いものから捨てる。
const RETIRED_LIMIT: usize = 1024;

// ── JobTable ─────────────────────────────────────────────────────────

/// ジョブテーブル。ジョブの追加・検索・状態更新・削除を管理する。
///
/// `current` / `previous` は POSIX の `%+` / `%-` に対応し、状態遷移のたびに更新する。
#[derive(Debug, Clone, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    current: Option<usize>,
    previous: Option<usize>,
    retired: VecDeque<Retired>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// ジョブを追加し、割り当てた ID を返す。最小未使用 ID を再利用する。
    /// 追加したジョブがカレントジョブになる。
    pub fn insert(&mut self, pgid: pid_t, cmd: String, pids: Vec<pid_t>) -> usize {
        let mut id = 1;
        while self.jobs.iter().any(|j| j.id == id) {
            id += 1;
        }

        // ID か PID が重なる古い記録は新しいジョブで上書きされる
        self.retired
            .retain(|r| r.id != id && !r.processes.iter().any(|(pid, _)| pids.contains(pid)));

        let processes = pids
            .into_iter()
            .map(|pid| JobProcess { pid, state: JobState::Running, exit_status: 0 })
            .collect();

        self.jobs.push(Job {
            id,
            pgid,
            command: cmd,
            processes,
            state: JobState::Running,
            notified: true,
        });
        self.make_current(id);
        debug!(job = id, pgid, "job registered");
        id
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn current_id(&self) -> Option<usize> {
        self.current
    }

    pub fn previous_id(&self) -> Option<usize> {
        self.previous
    }

    /// PID を含むジョブの ID。
    pub fn find_by_pid(&self, pid: pid_t) -> Option<usize> {
        self.jobs
            .iter()
            .find(|j| j.processes.iter().any(|p| p.pid == pid))
            .map(|j| j.id)
    }

    fn make_current(&mut self, id: usize) {
        if self.current != Some(id) {
            self.previous = self.current;
            self.current = Some(id);
        }
    }

    /// `current` / `previous` を残っているジョブから選び直す。停止中ジョブを優先する。
    fn fix_current(&mut self) {
        let alive = |id: Option<usize>, jobs: &[Job]| id.filter(|i| jobs.iter().any(|j| j.id == *i));
        self.current = alive(self.current, &self.jobs);
        self.previous = alive(self.previous, &self.jobs);
        if self.current.is_none() {
            self.current = self.previous.take();
        }
        let pick = |exclude: Option<usize>, jobs: &[Job]| {
            jobs.iter()
                .filter(|j| Some(j.id) != exclude)
                .max_by_key(|j| j.state == JobState::Stopped)
                .map(|j| j.id)
        };
        if self.current.is_none() {
            self.current = pick(None, &self.jobs);
        }
        if self.previous.is_none() || self.previous == self.current {
            self.previous = pick(self.current, &self.jobs);
        }
    }

    /// `waitpid` の結果でプロセスの状態を更新する。ジョブ状態が変化すれば `true`。
    pub fn mark_pid(&mut self, pid: pid_t, raw_status: i32) -> bool {
        let Some(job) = self
            .jobs
            .iter_mut()
            .find(|j| j.processes.iter().any(|p| p.pid == pid))
        else {
            return false;
        };
        if let Some(proc) = job.processes.iter_mut().find(|p| p.pid == pid) {
            proc.state = if libc::WIFSTOPPED(raw_status) {
                JobState::Stopped
            } else if libc::WIFCONTINUED(raw_status) {
                JobState::Running
            } else if libc::WIFSIGNALED(raw_status) {
                JobState::Terminated
            } else {
                JobState::Done
            };
            if !libc::WIFCONTINUED(raw_status) {
                proc.exit_status = decode_status(raw_status);
            }
        }
        let new_state = job.derive_state();
        if new_state == job.state {
            return false;
        }
        debug!(job = job.id, from = ?job.state, to = ?new_state, "job state changed");
        job.state = new_state;
        job.notified = false;
        let id = job.id;
        if new_state == JobState::Stopped {
            self.make_current(id);
        }
        true
    }

    /// 全プロセスを停止状態として記録する（フォアグラウンドジョブの Ctrl+Z 用）。
    pub fn mark_stopped(&mut self, id: usize) {
        if let Some(job) = self.get_mut(id) {
            for proc in &mut job.processes {
                if proc.state == JobState::Running {
                    proc.state = JobState::Stopped;
                }
            }
            job.state = JobState::Stopped;
            job.notified = false;
        }
        self.make_current(id);
    }

    /// `fg`/`bg` で再開したジョブを実行中に戻す。
    pub fn mark_running(&mut self, id: usize) {
        if let Some(job) = self.get_mut(id) {
            for proc in &mut job.processes {
                if proc.state == JobState::Stopped {
                    proc.state = JobState::Running;
                }
            }
            job.state = JobState::Running;
        }
    }

    /// 未終了プロセスを reap する。
    ///
    /// `blocking == false` なら `WNOHANG` で回収できるものだけ、
    /// `true` なら各プロセスが終了または停止するまで待つ。
    pub fn reap(&mut self, blocking: bool) {
        let pending: Vec<pid_t> = self
            .jobs
            .iter()
            .flat_map(|j| j.processes.iter())
            .filter(|p| !p.state.is_finished())
            .map(|p| p.pid)
            .collect();
        self.reap_pids(&pending, blocking);
    }

    /// 1 つのジョブだけを reap する（`wait %n`）。
    pub fn reap_job(&mut self, id: usize, blocking: bool) {
        let pending: Vec<pid_t> = self
            .get(id)
            .map(|j| {
                j.processes
                    .iter()
                    .filter(|p| !p.state.is_finished())
                    .map(|p| p.pid)
                    .collect()
            })
            .unwrap_or_default();
        self.reap_pids(&pending, blocking);
    }

    fn reap_pids(&mut self, pids: &[pid_t], blocking: bool) {
        let flags = libc::WUNTRACED | libc::WCONTINUED | if blocking { 0 } else { libc::WNOHANG };
        for &pid in pids {
            let mut raw_status: i32 = 0;
            let ret = loop {
                let r = unsafe { libc::waitpid(pid, &mut raw_status, flags) };
                if r < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                break r;
            };
            if ret == pid {
                self.mark_pid(pid, raw_status);
            } else if ret < 0 {
                // 既に他で回収済み（ECHILD）: 正常終了扱いにする
                self.mark_pid(pid, 0);
            }
        }
    }

    /// 状態変化を `[N]± state command` 形式で stderr に通知し、終了ジョブを削除する。
    ///
    /// `report == false`（非対話）の場合は通知せず削除だけ行う。
    pub fn notify_and_clean(&mut self, report: bool) {
        if report {
            for job in &self.jobs {
                if !job.notified {
                    eprintln!("{}", self.format_job(job, false));
                }
            }
        }
        for job in &mut self.jobs {
            job.notified = true;
        }
        self.remove_finished();
    }

    /// 通知済みの終了ジョブを削除する。
    pub fn remove_finished(&mut self) {
        self.jobs.retain(|j| !(j.notified && j.state.is_finished()));
        self.fix_current();
    }

    /// 終了ジョブを表から外し、終了ステータスだけを記録しておく。
    ///
    /// 通知をしない非対話シェルで、ジョブ表を溜め込まないために使う。
    pub fn retire_finished(&mut self) {
        let (finished, alive): (Vec<Job>, Vec<Job>) =
            std::mem::take(&mut self.jobs).into_iter().partition(|j| j.state.is_finished());
        self.jobs = alive;
        for job in finished {
            debug!(job = job.id, status = job.exit_status(), "job retired");
            self.retired.push_back(Retired {
                id: job.id,
                processes: job.processes.iter().map(|p| (p.pid, p.exit_status)).collect(),
            });
            if self.retired.len() > RETIRED_LIMIT {
                self.retired.pop_front();
            }
        }
        self.fix_current();
    }

    /// 表から外したジョブのうち PID を含むものの、そのプロセスの終了ステータスを取り出す。
    pub fn take_retired_pid(&mut self, pid: pid_t) -> Option<i32> {
        let pos = self
            .retired
            .iter()
            .position(|r| r.processes.iter().any(|(p, _)| *p == pid))?;
        let retired = self.retired.remove(pos)?;
        retired.processes.iter().find(|(p, _)| *p == pid).map(|(_, status)| *status)
    }

    /// 表から外したジョブ `id` の終了ステータス（最後のプロセスのもの）を取り出す。
    pub fn take_retired_job(&mut self, id: usize) -> Option<i32> {
        let pos = self.retired.iter().position(|r| r.id == id)?;
        let retired = self.retired.remove(pos)?;
        retired.processes.last().map(|(_, status)| *status)
    }

    /// 記録した終了ステータスをすべて捨てる（引数なしの `wait`）。
    pub fn forget_retired(&mut self) {
        self.retired.clear();
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.id == id)?;
        let job = self.jobs.remove(pos);
        self.fix_current();
        Some(job)
    }

    /// `jobs` 表示用の 1 行。`long` なら PID を含める。
    pub fn format_job(&self, job: &Job, long: bool) -> String {
        let mark = if Some(job.id) == self.current {
            '+'
        } else if Some(job.id) == self.previous {
            '-'
        } else {
            ' '
        };
        if long {
            format!("[{}]{} {} {:<24}{}", job.id, mark, job.pgid, job.state_label(), job.command)
        } else {
            format!("[{}]{}  {:<24}{}", job.id, mark, job.state_label(), job.command)
        }
    }

    /// ジョブ指定（`%1`、`%+`、`%%`、`%-`、`%name`、`%?str`）を ID に解決する。
    pub fn resolve(&self, spec: &str) -> Result<usize, String> {
        let body = spec.strip_prefix('%').unwrap_or(spec);
        let found = match body {
            "" | "+" | "%" => self.current,
            "-" => self.previous,
            _ if body.bytes().all(|b| b.is_ascii_digit()) => body
                .parse::<usize>()
                .ok()
                .filter(|id| self.get(*id).is_some()),
            _ => {
                let matches: Vec<usize> = match body.strip_prefix('?') {
                    Some(needle) => self
                        .jobs
                        .iter()
                        .filter(|j| j.command.contains(needle))
                        .map(|j| j.id)
                        .collect(),
                    None => self
                        .jobs
                        .iter()
                        .filter(|j| j.command.starts_with(body))
                        .map(|j| j.id)
                        .collect(),
                };
                if matches.len() > 1 {
                    return Err(format!("{spec}: ambiguous job spec"));
                }
                matches.first().copied()
            }
        };
        found.ok_or_else(|| format!("{spec}: no such job"))
    }
}

// ── 待機ヘルパー ─────────────────────────────────────────────────────

/// フォアグラウンド待機の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundResult {
    /// 各 PID の終了ステータス（`pids` と同じ順序）。
    pub statuses: Vec<i32>,
    /// いずれかのプロセスが停止した。
    pub stopped: bool,
}

/// フォアグラウンドのプロセス群を待機する。
///
/// `job_control` が有効なら `WUNTRACED` で停止も検出し、停止した時点で戻る。
/// `EINTR` で中断された `waitpid` は再試行する（シグナルはその後の安全点で処理される）。
pub fn wait_foreground(pids: &[pid_t], job_control: bool) -> ForegroundResult {
    let mut statuses = vec![0; pids.len()];
    let flags = if job_control { libc::WUNTRACED } else { 0 };
    for (i, &pid) in pids.iter().enumerate() {
        let mut raw_status: i32 = 0;
        let ret = loop {
            let r = unsafe { libc::waitpid(pid, &mut raw_status, flags) };
            if r < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break r;
        };
        if ret < 0 {
            continue;
        }
        statuses[i] = decode_status(raw_status);
        if libc::WIFSTOPPED(raw_status) {
            return ForegroundResult { statuses, stopped: true };
        }
    }
    ForegroundResult { statuses, stopped: false }
}

// ── ターミナル制御ヘルパー ───────────────────────────────────────────

/// `tcsetpgrp` でターミナルのフォアグラウンドプロセスグループを `pgid` に設定する。
///
/// シェルが SIGTTOU を無視しているため、バックグラウンドからの呼び出しでもブロックしない。
pub fn give_terminal_to(terminal_fd: i32, pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(terminal_fd, pgid);
    }
}

/// `tcsetpgrp` でターミナルのフォアグラウンドプロセスグループをシェルに戻す。
pub fn take_terminal_back(terminal_fd: i32, shell_pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(terminal_fd, shell_pgid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    #[test]
    fn ids_are_reused() {
        let mut t = JobTable::new();
        let a = t.insert(100, "a".into(), vec![100]);
        let b = t.insert(200, "b".into(), vec![200]);
        assert_eq!((a, b), (1, 2));
        t.remove(a);
        assert_eq!(t.insert(300, "c".into(), vec![300]), 1);
    }

    #[test]
    fn job_done_only_when_all_processes_finish() {
        let mut t = JobTable::new();
        let id = t.insert(10, "a | b".into(), vec![10, 11]);
        assert!(!t.mark_pid(10, exited(0)));
        assert_eq!(t.get(id).unwrap().state, JobState::Running);
        assert!(t.mark_pid(11, exited(3)));
        let job = t.get(id).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.exit_status(), 3);
    }

    #[test]
    fn signaled_last_process_is_terminated() {
        let mut t = JobTable::new();
        let id = t.insert(10, "sleep".into(), vec![10]);
        t.mark_pid(10, libc::SIGTERM);
        let job = t.get(id).unwrap();
        assert_eq!(job.state, JobState::Terminated);
        assert_eq!(job.exit_status(), 128 + libc::SIGTERM);
    }

    #[test]
    fn current_and_previous_follow_insertions() {
        let mut t = JobTable::new();
        let a = t.insert(1, "a".into(), vec![1]);
        let b = t.insert(2, "b".into(), vec![2]);
        assert_eq!(t.current_id(), Some(b));
        assert_eq!(t.previous_id(), Some(a));
        t.remove(b);
        assert_eq!(t.current_id(), Some(a));
        assert_eq!(t.previous_id(), None);
    }

    #[test]
    fn stopped_job_becomes_current() {
        let mut t = JobTable::new();
        let a = t.insert(1, "a".into(), vec![1]);
        let _b = t.insert(2, "b".into(), vec![2]);
        t.mark_pid(1, 0x137f); // WIFSTOPPED, SIGSTOP
        assert_eq!(t.current_id(), Some(a));
    }

    #[test]
    fn finished_jobs_are_cleaned_after_notification() {
        let mut t = JobTable::new();
        let id = t.insert(1, "a".into(), vec![1]);
        t.mark_pid(1, exited(0));
        assert!(!t.get(id).unwrap().notified);
        t.notify_and_clean(false);
        assert!(t.is_empty());
    }

    #[test]
    fn retired_jobs_leave_the_table_but_keep_status() {
        let mut t = JobTable::new();
        let a = t.insert(10, "a | b".into(), vec![10, 11]);
        let b = t.insert(20, "c".into(), vec![20]);
        let running = t.insert(30, "d".into(), vec![30]);
        t.mark_pid(10, exited(4));
        t.mark_pid(11, exited(5));
        t.mark_pid(20, exited(6));
        t.retire_finished();
        assert_eq!(t.iter().map(|j| j.id).collect::<Vec<_>>(), vec![running]);
        assert_eq!(t.current_id(), Some(running));
        assert_eq!(t.take_retired_pid(10), Some(4));
        // 取り出した記録は消える
        assert_eq!(t.take_retired_pid(11), None);
        assert_eq!(t.take_retired_job(b), Some(6));
        assert_eq!(t.take_retired_job(a), None);
    }

    #[test]
    fn reused_job_id_drops_retired_record() {
        let mut t = JobTable::new();
        let id = t.insert(10, "a".into(), vec![10]);
        t.mark_pid(10, exited(1));
        t.retire_finished();
        assert!(t.is_empty());
        assert_eq!(t.insert(20, "b".into(), vec![20]), id);
        assert_eq!(t.take_retired_job(id), None);
    }

    #[test]
    fn retired_records_are_bounded() {
        let mut t = JobTable::new();
        let last = RETIRED_LIMIT as pid_t + 10;
        for pid in 1..=last {
            t.insert(pid, "true".into(), vec![pid]);
            t.mark_pid(pid, exited(0));
        }
        t.retire_finished();
        assert!(t.is_empty());
        assert_eq!(t.retired.len(), RETIRED_LIMIT);
        assert_eq!(t.take_retired_pid(1), None);
        assert_eq!(t.take_retired_pid(last), Some(0));
    }

    #[test]
    fn resolve_job_specs() {
        let mut t = JobTable::new();
        let a = t.insert(1, "sleep 10".into(), vec![1]);
        let b = t.insert(2, "cat file".into(), vec![2]);
        assert_eq!(t.resolve("%1"), Ok(a));
        assert_eq!(t.resolve("%+"), Ok(b));
        assert_eq!(t.resolve("%%"), Ok(b));
        assert_eq!(t.resolve("%-"), Ok(a));
        assert_eq!(t.resolve("%sle"), Ok(a));
        assert_eq!(t.resolve("%?file"), Ok(b));
        assert!(t.resolve("%9").is_err());
    }

    #[test]
    fn decode_exit_and_signal() {
        assert_eq!(decode_status(exited(42)), 42);
        assert_eq!(decode_status(libc::SIGKILL), 128 + libc::SIGKILL);
    }
}
