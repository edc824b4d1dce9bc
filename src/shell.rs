//! シェルの実行状態と入力ソースの駆動。
//!
//! 変数・関数・トラップ等のストアはすべてフレームスタック（[`FrameStack`]）が持ち、
//! ここではプロセス単位の状態（ジョブテーブル、プロセスグループ、ターミナル）と
//! フレームをまたぐ実行文脈（条件文脈の深さ、`$_`）だけを保持する。
//!
//! 入力ソース（文字列、fd）は [`Shell::run_source`] が 1 コマンドずつ構文解析して実行する。

use std::fmt;

use libc::pid_t;
use tracing::debug;

use crate::error::StoreError;
use crate::executor;
use crate::expand;
use crate::frame::{Bootstrap, Flow, Frame, FrameStack, Outcome, PushArgs, Settled};
use crate::job::{self, JobTable};
use crate::options::ShellOption;
use crate::parser::Parser;
use crate::policy::FrameKind;
use crate::signals;
use crate::sys;
use crate::traps::{self, TrapAction};

/// 診断メッセージの接頭辞。
pub const NAME: &str = "prush";

/// 入力ソース。
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// `-c` の文字列、スクリプトファイル、`eval`、トラップ本体。`line` は先頭行の行番号。
    Text { text: &'a str, line: usize },
    /// 1 行ずつ読む fd（標準入力、対話モード）。
    Fd(i32),
}

/// シェルの実行状態。
pub struct Shell {
    pub frames: FrameStack,
    /// ジョブテーブル。バックグラウンド/停止ジョブを管理する。
    pub jobs: JobTable,
    pub interactive: bool,
    /// `$$`。サブシェルでも変わらない。
    pub pid: pid_t,
    /// シェル自身のプロセスグループ ID。
    pub shell_pgid: pid_t,
    /// ターミナルのファイルディスクリプタ（通常 STDIN_FILENO）。
    pub terminal_fd: i32,
    /// fork した子プロセスの中か。ジョブ制御はトップレベルのシェルだけが行う。
    pub in_subshell: bool,
    /// 次の外部コマンドを fork せずに exec してよいか（パイプライン要素、サブシェル末尾）。
    pub exec_in_place: bool,
    /// コマンド置換の中でも errexit を有効にするか。
    pub errexit_in_subst: bool,
    /// if/while/until 条件や `&&`/`||` 左辺の深さ。0 より大きい間 errexit は効かない。
    pub condition_depth: usize,
    /// `$_`。直前の単純コマンドの最後の引数。
    pub last_arg: String,
    /// 直前のコマンド置換の終了ステータス。コマンド語のない単純コマンドの `$?` になる。
    pub subst_status: Option<i32>,
    running_trap: bool,
}

impl Shell {
    pub fn new(boot: Bootstrap, interactive: bool) -> Self {
        Self {
            frames: FrameStack::new(boot),
            jobs: JobTable::new(),
            interactive,
            pid: sys::getpid(),
            shell_pgid: sys::getpgrp(),
            terminal_fd: libc::STDIN_FILENO,
            in_subshell: false,
            exec_in_place: false,
            errexit_in_subst: true,
            condition_depth: 0,
            last_arg: String::new(),
            subst_status: None,
            running_trap: false,
        }
    }

    // ── 現在のフレームへの近道 ──────────────────────────────────────

    pub fn frame(&self) -> &Frame {
        self.frames.current()
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frames.current_mut()
    }

    /// `$?`。
    pub fn status(&self) -> i32 {
        self.frame().last_exit_status
    }

    pub fn set_status(&mut self, status: i32) {
        self.frame_mut().last_exit_status = status;
    }

    pub fn option(&self, opt: ShellOption) -> bool {
        self.frame().option(opt)
    }

    pub fn set_option(&mut self, opt: ShellOption, on: bool) {
        self.frame().options.borrow_mut().set(opt, on);
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.frame().vars.borrow().get(name).map(str::to_string)
    }

    /// 変数に代入する。`allexport` なら export もする。
    pub fn assign(&mut self, name: &str, value: &str) -> Result<(), StoreError> {
        let allexport = self.option(ShellOption::AllExport);
        let mut vars = self.frame().vars.borrow_mut();
        vars.set(name, value)?;
        if allexport {
            vars.set_exported(name, true)?;
        }
        Ok(())
    }

    /// ジョブ制御を行うか。
    pub fn job_control(&self) -> bool {
        self.option(ShellOption::Monitor) && !self.in_subshell
    }

    /// 診断を fd 2 に出す。非対話ならソース名と行番号を付ける。
    pub fn report(&self, msg: impl fmt::Display) {
        let frame = self.frame();
        let mut prefix = format!("{NAME}: ");
        if !self.interactive {
            if let Some(name) = &frame.source_name {
                prefix.push_str(&format!("{name}: "));
            }
            if frame.source_line > 0 {
                prefix.push_str(&format!("line {}: ", frame.source_line));
            }
        }
        eprintln!("{prefix}{msg}");
    }

    // ── フレーム ─────────────────────────────────────────────────────

    pub fn push_frame(&mut self, kind: FrameKind) {
        self.frames.push(kind);
    }

    pub fn push_frame_with(&mut self, kind: FrameKind, args: PushArgs) {
        self.frames.push_with(kind, args);
    }

    /// 現在のフレームを pop する。ポリシーが EXIT トラップの実行を求めていれば先に実行し、
    /// トラップが `exit n` したらその `n` を返す。
    pub fn pop_frame(&mut self) -> Option<i32> {
        let exit = if self.frame().policy.traps.exit_trap_runs_on_pop {
            self.run_exit_trap()
        } else {
            None
        };
        self.frames.pop();
        exit
    }

    /// EXIT トラップを 1 度だけ実行する。
    pub fn run_exit_trap(&mut self) -> Option<i32> {
        let command = self.frame().traps.borrow().command(traps::EXIT).map(str::to_string)?;
        self.frame().traps.borrow_mut().set(traps::EXIT, TrapAction::Default);
        match self.run_trap(&command) {
            Some(Flow::Exit(n)) => Some(n),
            _ => None,
        }
    }

    // ── トラップ ─────────────────────────────────────────────────────

    /// トラップ本体を Trap フレームで実行する。`$?` は保たれる。
    /// 本体が `exit` したら `Exit` を返す。
    pub fn run_trap(&mut self, command: &str) -> Option<Flow> {
        let saved = self.status();
        self.push_frame(FrameKind::Trap);
        let outcome = self.run_source(Input::Text { text: command, line: 0 }, false);
        self.frames.pop();
        self.set_status(saved);
        match outcome.flow {
            Some(Flow::Exit(n)) => Some(Flow::Exit(n)),
            _ => None,
        }
    }

    /// 終了した子を回収する。通知をしない非対話シェルでは終了ジョブを表から外す。
    pub fn reap_children(&mut self) {
        self.jobs.reap(false);
        if !self.interactive {
            self.jobs.retire_finished();
        }
    }

    /// 保留中のシグナルのトラップを実行する。安全点（単純コマンドの後、プロンプト前）で呼ぶ。
    pub fn run_pending_traps(&mut self) -> Option<Flow> {
        if self.running_trap || !signals::any_pending() {
            return None;
        }
        self.running_trap = true;
        let mut flow = None;
        for sig in signals::take_pending() {
            let command = self.frame().traps.borrow().command(sig).map(str::to_string);
            if let Some(command) = command {
                debug!(signal = sig, "trap dispatch");
                if let Some(f) = self.run_trap(&command) {
                    flow = Some(f);
                    break;
                }
            }
        }
        self.running_trap = false;
        flow
    }

    // ── 入力ソースの実行 ─────────────────────────────────────────────

    /// ソースを 1 コマンドずつ解析して実行する。
    ///
    /// `fatal_syntax` なら構文エラーで `Exit(2)` を返す（スクリプト本体）。
    /// 偽ならステータス 2 で戻る（`eval`、`.`、トラップ）。
    /// 対話モードではエラーを報告して次の入力へ進む。
    pub fn run_source(&mut self, input: Input<'_>, fatal_syntax: bool) -> Outcome {
        let (mut parser, fd) = match input {
            Input::Text { text, line } => (Parser::with_line(text, line.max(1)), None),
            Input::Fd(fd) => (Parser::incremental(), Some(fd)),
        };
        let mut status = 0;
        let mut continuation = false;
        let mut eof_count = 0;
        loop {
            let aliases = self.frame().aliases.borrow().clone();
            match parser.parse_next(&aliases) {
                Ok(Some(list)) => {
                    continuation = false;
                    if self.option(ShellOption::Verbose) {
                        eprintln!("{}", parser.last_text());
                    }
                    if let Some(first) = list.items.first() {
                        self.frame_mut().source_line = first.and_or.first.line;
                    }
                    if self.option(ShellOption::NoExec) && !self.interactive {
                        continue;
                    }
                    let outcome = executor::execute(self, &list);
                    status = outcome.status;
                    if let Some(flow) = outcome.flow {
                        if !self.interactive || matches!(flow, Flow::Exit(_)) {
                            return outcome;
                        }
                    }
                    continue;
                }
                Ok(None) if fd.is_none() || parser.is_finished() => break,
                Ok(None) => {}
                Err(e) if e.is_incomplete() && fd.is_some() && !parser.is_finished() => {
                    continuation = true;
                }
                Err(e) => {
                    self.frame_mut().source_line = e.line();
                    self.report(&e);
                    status = 2;
                    self.set_status(2);
                    if self.interactive {
                        parser.discard();
                        continuation = false;
                        continue;
                    }
                    if fatal_syntax {
                        return Outcome::with_flow(2, Flow::Exit(2));
                    }
                    return Outcome::normal(2);
                }
            }

            let Some(fd) = fd else { break };
            if self.interactive {
                self.jobs.reap(false);
                self.jobs.notify_and_clean(true);
                if let Some(flow) = self.run_pending_traps() {
                    if let Flow::Exit(n) = flow {
                        return Outcome::with_flow(n, flow);
                    }
                }
                let prompt = if continuation { "PS2" } else { "PS1" };
                let text = self.var(prompt).unwrap_or_default();
                let text = expand::expand_prompt(self, &text);
                let _ = sys::write_all(libc::STDERR_FILENO, text.as_bytes());
            }
            match read_line(fd) {
                Ok(Some(line)) => {
                    eof_count = 0;
                    parser.feed(&line);
                }
                Ok(None) => {
                    if self.interactive && self.option(ShellOption::IgnoreEof) && !continuation && eof_count < 10 {
                        eof_count += 1;
                        eprintln!("Use \"exit\" to leave the shell.");
                        continue;
                    }
                    if self.interactive && !continuation {
                        eprintln!();
                    }
                    parser.finish();
                }
                Err(e) if e.raw_os_error() == Some(libc::EINTR) && self.interactive => {
                    eprintln!();
                    parser.discard();
                    continuation = false;
                    self.set_status(130);
                }
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => {
                    self.report(format!("read error: {e}"));
                    parser.finish();
                }
            }
        }
        Outcome::normal(status)
    }

    /// トップレベルの終了処理。EXIT トラップを実行し、最終的な終了ステータスを返す。
    pub fn finish(&mut self, status: i32) -> i32 {
        self.set_status(status);
        let status = self.run_exit_trap().unwrap_or(status);
        debug!(status, "shell exit");
        status
    }

    /// `. file [args]`。DotScript フレームで実行し、`return` を消費する。
    pub fn run_dot(&mut self, path: &str, text: &str, args: Option<Vec<String>>) -> Outcome {
        self.push_frame_with(
            FrameKind::DotScript,
            PushArgs { positional: args, source_name: Some(path.to_string()) },
        );
        let outcome = self.run_source(Input::Text { text, line: 1 }, false);
        let outcome = settle(self, outcome);
        let exit = self.pop_frame();
        let outcome = match exit {
            Some(n) => Outcome::with_flow(n, Flow::Exit(n)),
            None => outcome,
        };
        self.set_status(outcome.status);
        outcome
    }

    /// 対話シェルのジョブ制御を準備する: フォアグラウンドになるまで待ち、
    /// 自分のプロセスグループを作ってターミナルを取る。
    pub fn init_job_control(&mut self) {
        let fd = self.terminal_fd;
        if !sys::isatty(fd) {
            return;
        }
        loop {
            let fg = unsafe { libc::tcgetpgrp(fd) };
            let own = sys::getpgrp();
            if fg == own || fg < 0 {
                break;
            }
            unsafe {
                libc::kill(-own, libc::SIGTTIN);
            }
        }
        signals::setup_interactive(self.frames.ignored_at_entry());
        sys::setpgid(0, 0);
        self.shell_pgid = sys::getpid();
        job::give_terminal_to(fd, self.shell_pgid);
        debug!(pgid = self.shell_pgid, "job control enabled");
    }
}

/// フレーム境界で非局所脱出を決着させる。拒否された脱出はステータス 1 になる。
pub fn settle(shell: &mut Shell, outcome: Outcome) -> Outcome {
    let Some(flow) = outcome.flow else {
        return outcome;
    };
    match shell.frames.settle(flow) {
        Settled::Consumed(status) => Outcome::normal(status),
        Settled::Forward(flow) => Outcome::with_flow(outcome.status, flow),
        Settled::Rejected(_) => Outcome::normal(1),
    }
}

/// 改行までの 1 行を読む（改行を含む）。入力末尾で何も読めなければ `None`。
///
/// 後続のコマンドが同じ fd から読めるよう、1 バイトずつ読む。
fn read_line(fd: i32) -> std::io::Result<Option<String>> {
    let mut bytes = Vec::new();
    loop {
        match sys::read_byte(fd)? {
            Some(b) => {
                bytes.push(b);
                if b == b'\n' {
                    break;
                }
            }
            None if bytes.is_empty() => return Ok(None),
            None => break,
        }
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
