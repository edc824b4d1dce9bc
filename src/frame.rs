//! 実行フレームのスタック。
//!
//! 各ストアは `Rc<RefCell<_>>` のハンドルとして持ち、
//! [`policy`](crate::policy) の `Scope` に従って push 時に解決する。
//!
//! - `Own`: 新規作成（トップレベルは起動時データを移動）
//! - `Copy`: 親の中身を複製した新しいハンドル
//! - `Share`: 親と同じハンドル（`Rc::ptr_eq` が真）
//!
//! 親へのポインタは持たない。スタック上の 1 つ下が親。

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::aliases::AliasStore;
use crate::fd_table::FdTable;
use crate::functions::FunctionStore;
use crate::options::{Options, ShellOption};
use crate::params::Positional;
use crate::policy::{Arg0Rule, FlowBehavior, FrameKind, FramePolicy, PositionalInit, Scope};
use crate::traps::TrapStore;
use crate::variables::{VarStore, Variable};

// ── 制御フロー ───────────────────────────────────────────────────────

/// 非局所脱出。コマンドの終了ステータスと一緒に呼び出し元へ返される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Return(i32),
    /// 残りの脱出段数（1 以上）。
    Break(usize),
    Continue(usize),
    Exit(i32),
}

/// コマンド実行の結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: i32,
    pub flow: Option<Flow>,
}

impl Outcome {
    pub fn normal(status: i32) -> Self {
        Self { status, flow: None }
    }

    pub fn with_flow(status: i32, flow: Flow) -> Self {
        Self { status, flow: Some(flow) }
    }

    /// 後続のコマンドを実行せずに戻るべきか。
    pub fn interrupts(&self) -> bool {
        self.flow.is_some()
    }
}

// ── フレーム ─────────────────────────────────────────────────────────

pub type Handle<T> = Rc<RefCell<T>>;

fn handle<T>(value: T) -> Handle<T> {
    Rc::new(RefCell::new(value))
}

fn resolve<T: Clone + Default>(scope: Scope, parent: &Handle<T>) -> Handle<T> {
    match scope {
        Scope::Share => Rc::clone(parent),
        Scope::Copy => handle(parent.borrow().clone()),
        Scope::Own => handle(T::default()),
    }
}

#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    pub policy: &'static FramePolicy,
    pub vars: Handle<VarStore>,
    pub positional: Handle<Positional>,
    pub functions: Handle<FunctionStore>,
    pub aliases: Handle<AliasStore>,
    pub traps: Handle<TrapStore>,
    pub fds: Handle<FdTable>,
    pub options: Handle<Options>,
    /// このフレームから見える、囲んでいるループの数。
    pub loop_depth: usize,
    pub last_exit_status: i32,
    pub last_bg_pid: Option<i32>,
    /// ビルトイン（`return`、`break` 等）が要求した非局所脱出。
    pub pending_flow: Option<Flow>,
    pub source_name: Option<Rc<str>>,
    pub source_line: usize,
    pub in_trap_handler: bool,
    /// `local` で上書きした変数の元の状態。pop 時に逆順で書き戻す。
    saved_locals: Vec<(String, Option<Variable>)>,
    /// `. file args` で一時的に差し替えた位置パラメータの元の値。
    saved_positional: Option<Positional>,
}

impl Frame {
    /// このフレームで errexit が効くか（オプション自体の値は見ない）。
    pub fn errexit_enabled(&self) -> bool {
        self.policy.options.errexit_enabled && !self.in_trap_handler
    }

    pub fn option(&self, opt: ShellOption) -> bool {
        self.options.borrow().get(opt)
    }
}

/// トップレベルフレームへ移動する起動時データ。
#[derive(Debug, Default)]
pub struct Bootstrap {
    pub vars: VarStore,
    pub positional: Positional,
    pub options: Options,
    pub source_name: Option<String>,
    /// 起動時に無視されていたシグナル。
    pub ignored_at_entry: Vec<i32>,
}

/// push 時の追加入力。
#[derive(Debug, Default)]
pub struct PushArgs {
    /// 関数呼び出しの引数、または `. file args` の引数。
    pub positional: Option<Vec<String>>,
    /// ドットスクリプトのファイル名。
    pub source_name: Option<String>,
}

/// 非局所脱出がフレーム境界に到達したときの扱い。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// このフレームで消費された。値は新しい終了ステータス。
    Consumed(i32),
    /// 親へ転送する。
    Forward(Flow),
    /// このフレームでは許されない。
    Rejected(Flow),
}

#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
    ignored_at_entry: Vec<i32>,
}

impl FrameStack {
    /// 起動時データを移動してトップレベルフレームだけを持つスタックを作る。
    pub fn new(boot: Bootstrap) -> Self {
        let policy = FrameKind::TopLevel.policy();
        let mut positional = boot.positional;
        if policy.positional.arg0 == Arg0Rule::FromShellOrScript {
            if let Some(script) = &boot.source_name {
                positional.arg0 = script.clone();
            }
        }
        let top = Frame {
            kind: FrameKind::TopLevel,
            policy,
            vars: handle(boot.vars),
            positional: handle(positional),
            functions: handle(FunctionStore::new()),
            aliases: handle(AliasStore::new()),
            traps: handle(TrapStore::new()),
            fds: handle(FdTable::with_std_streams()),
            options: handle(boot.options),
            loop_depth: 0,
            last_exit_status: 0,
            last_bg_pid: None,
            pending_flow: None,
            source_name: boot.source_name.map(Rc::from),
            source_line: 0,
            in_trap_handler: false,
            saved_locals: Vec::new(),
            saved_positional: None,
        };
        Self { frames: vec![top], ignored_at_entry: boot.ignored_at_entry }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> &Frame {
        // トップレベルは pop されないため常に 1 つ以上ある
        &self.frames[self.frames.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn ignored_at_entry(&self) -> &[i32] {
        &self.ignored_at_entry
    }

    pub fn push(&mut self, kind: FrameKind) {
        self.push_with(kind, PushArgs::default());
    }

    /// ポリシーに従って各ストアを解決し、新しいフレームを現在のフレームにする。
    pub fn push_with(&mut self, kind: FrameKind, args: PushArgs) {
        let policy = kind.policy();
        let parent = self.current();

        let vars = resolve(policy.variables.scope, &parent.vars);
        let functions = resolve(policy.functions, &parent.functions);
        let aliases = resolve(policy.aliases, &parent.aliases);
        let fds = resolve(policy.fds, &parent.fds);
        let options = resolve(policy.options.scope, &parent.options);

        let traps = resolve(policy.traps.scope, &parent.traps);
        if policy.traps.resets_non_ignored {
            traps.borrow_mut().reset_non_ignored(&self.ignored_at_entry);
        }

        let mut saved_positional = None;
        let positional = match (policy.positional.scope, policy.positional.init) {
            (Scope::Own, PositionalInit::CallArgs) => {
                let arg0 = parent.positional.borrow().arg0.clone();
                handle(Positional::new(arg0, args.positional.clone().unwrap_or_default()))
            }
            (scope, _) => resolve(scope, &parent.positional),
        };
        if policy.positional.can_override {
            let mut pos = positional.borrow_mut();
            if let Some(params) = args.positional {
                saved_positional = Some(pos.clone());
                // 上限超過はドットスクリプト側で事前に検査済み
                let _ = pos.set(params);
            }
        }

        let loop_depth = if policy.flow.is_loop {
            parent.loop_depth + 1
        } else if policy.flow.loop_control == FlowBehavior::Disallowed {
            0
        } else {
            parent.loop_depth
        };

        let source_name = match args.source_name {
            Some(name) if policy.tracks_location => Some(Rc::from(name)),
            _ => parent.source_name.clone(),
        };

        let frame = Frame {
            kind,
            policy,
            vars,
            positional,
            functions,
            aliases,
            traps,
            fds,
            options,
            loop_depth,
            last_exit_status: parent.last_exit_status,
            last_bg_pid: parent.last_bg_pid,
            pending_flow: None,
            source_name,
            source_line: parent.source_line,
            in_trap_handler: parent.in_trap_handler || kind == FrameKind::Trap,
            saved_locals: Vec::new(),
            saved_positional,
        };
        self.frames.push(frame);
        debug!(kind = ?kind, depth = self.frames.len(), "frame push");
    }

    /// 現在のフレームを破棄する。トップレベルは pop できない。
    ///
    /// `local` と位置パラメータの上書きを書き戻し、ポリシーが許せば
    /// 終了ステータスと `$!` を親へ伝える。EXIT トラップの実行は呼び出し側の責務。
    pub fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() <= 1 {
            return None;
        }
        let mut frame = self.frames.pop()?;
        debug!(kind = ?frame.kind, depth = self.frames.len() + 1, "frame pop");

        {
            let mut vars = frame.vars.borrow_mut();
            for (name, saved) in frame.saved_locals.drain(..).rev() {
                vars.restore(&name, saved);
            }
        }
        if let Some(saved) = frame.saved_positional.take() {
            *frame.positional.borrow_mut() = saved;
        }

        let parent = self.current_mut();
        if frame.policy.exit.affects_parent_status {
            parent.last_exit_status = frame.last_exit_status;
        }
        if !frame.policy.process.forks {
            parent.last_bg_pid = frame.last_bg_pid;
        }
        Some(frame)
    }

    /// `local name` の対象になるフレーム（最も内側の関数フレーム）に元の値を記録する。
    /// 関数の外なら `false`。
    pub fn record_local(&mut self, name: &str) -> bool {
        let Some(frame) = self.frames.iter_mut().rev().find(|f| f.policy.variables.has_locals)
        else {
            return false;
        };
        if frame.saved_locals.iter().any(|(n, _)| n == name) {
            return true;
        }
        let saved = frame.vars.borrow().snapshot(name);
        frame.saved_locals.push((name.to_string(), saved));
        true
    }

    /// `return` が有効か: 上から辿って `Target` に着く前に `Disallowed` に当たらないこと。
    pub fn can_return(&self) -> bool {
        for frame in self.frames.iter().rev() {
            match frame.policy.flow.return_behavior {
                FlowBehavior::Target => return true,
                FlowBehavior::Disallowed => return false,
                FlowBehavior::Transparent => {}
            }
        }
        false
    }

    /// 非局所脱出が現在のフレームの境界に到達したときの扱いを決める。
    /// ループの `break`/`continue` はループ実行側で処理するため、ここでは転送か拒否のみ。
    pub fn settle(&self, flow: Flow) -> Settled {
        let policy = self.current().policy;
        match flow {
            Flow::Exit(_) => Settled::Forward(flow),
            Flow::Return(n) => match policy.flow.return_behavior {
                FlowBehavior::Target => Settled::Consumed(n),
                FlowBehavior::Transparent => Settled::Forward(flow),
                FlowBehavior::Disallowed => Settled::Rejected(flow),
            },
            Flow::Break(_) | Flow::Continue(_) => match policy.flow.loop_control {
                FlowBehavior::Disallowed => Settled::Rejected(flow),
                _ => Settled::Forward(flow),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stack() -> FrameStack {
        let mut vars = VarStore::new();
        vars.set("X", "top").unwrap();
        FrameStack::new(Bootstrap {
            vars,
            positional: Positional::new("prush", vec!["a".into(), "b".into()]),
            ignored_at_entry: vec![libc::SIGQUIT],
            ..Bootstrap::default()
        })
    }

    #[test]
    fn share_aliases_parent_store() {
        let mut s = stack();
        s.push(FrameKind::BraceGroup);
        let top = s.iter().next().unwrap();
        let cur = s.current();
        assert!(Rc::ptr_eq(&top.vars, &cur.vars));
        assert!(Rc::ptr_eq(&top.traps, &cur.traps));
        cur.vars.borrow_mut().set("X", "inner").unwrap();
        s.pop();
        assert_eq!(s.current().vars.borrow().get("X"), Some("inner"));
    }

    #[test]
    fn copy_is_independent() {
        let mut s = stack();
        s.push(FrameKind::Subshell);
        {
            let top = s.iter().next().unwrap();
            let cur = s.current();
            assert!(!Rc::ptr_eq(&top.vars, &cur.vars));
            cur.vars.borrow_mut().set("X", "sub").unwrap();
            cur.positional.borrow_mut().set(vec![]).unwrap();
        }
        s.pop();
        assert_eq!(s.current().vars.borrow().get("X"), Some("top"));
        assert_eq!(s.current().positional.borrow().len(), 2);
    }

    #[test]
    fn function_positional_is_restored() {
        let mut s = stack();
        s.push_with(
            FrameKind::Function,
            PushArgs { positional: Some(vec!["x".into()]), ..PushArgs::default() },
        );
        assert_eq!(s.current().positional.borrow().params(), &["x".to_string()]);
        assert_eq!(s.current().positional.borrow().arg0, "prush");
        s.pop();
        assert_eq!(s.current().positional.borrow().params(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn dot_script_override_is_undone() {
        let mut s = stack();
        s.push_with(
            FrameKind::DotScript,
            PushArgs { positional: Some(vec!["z".into()]), source_name: Some("lib.sh".into()) },
        );
        assert_eq!(s.current().positional.borrow().get(1), Some("z"));
        assert_eq!(s.current().source_name.as_deref(), Some("lib.sh"));
        assert_eq!(s.current().positional.borrow().arg0, "prush");
        s.pop();
        assert_eq!(s.current().positional.borrow().get(1), Some("a"));
    }

    #[test]
    fn script_name_becomes_arg0() {
        let s = FrameStack::new(Bootstrap {
            positional: Positional::new("prush", vec![]),
            source_name: Some("run.sh".into()),
            ..Bootstrap::default()
        });
        assert_eq!(s.current().positional.borrow().arg0, "run.sh");
    }

    #[test]
    fn locals_are_restored_on_pop() {
        let mut s = stack();
        s.push(FrameKind::Function);
        s.push(FrameKind::BraceGroup);
        assert!(s.record_local("X"));
        assert!(s.record_local("NEW"));
        s.current().vars.borrow_mut().set("X", "local").unwrap();
        s.current().vars.borrow_mut().set("NEW", "1").unwrap();
        s.pop();
        assert_eq!(s.current().vars.borrow().get("X"), Some("local"));
        s.pop();
        assert_eq!(s.current().vars.borrow().get("X"), Some("top"));
        assert!(!s.current().vars.borrow().is_set("NEW"));
    }

    #[test]
    fn local_outside_function_is_rejected() {
        let mut s = stack();
        assert!(!s.record_local("X"));
    }

    #[test]
    fn status_propagation_follows_policy() {
        let mut s = stack();
        s.push(FrameKind::BraceGroup);
        s.current_mut().last_exit_status = 3;
        s.pop();
        assert_eq!(s.current().last_exit_status, 3);

        s.push(FrameKind::Trap);
        s.current_mut().last_exit_status = 9;
        s.pop();
        assert_eq!(s.current().last_exit_status, 3);
    }

    #[test]
    fn loop_depth_resets_at_function() {
        let mut s = stack();
        s.push(FrameKind::Loop);
        s.push(FrameKind::Loop);
        assert_eq!(s.current().loop_depth, 2);
        s.push(FrameKind::BraceGroup);
        assert_eq!(s.current().loop_depth, 2);
        s.push(FrameKind::Function);
        assert_eq!(s.current().loop_depth, 0);
    }

    #[test]
    fn return_validity() {
        let mut s = stack();
        assert!(!s.can_return());
        s.push(FrameKind::Function);
        s.push(FrameKind::Loop);
        assert!(s.can_return());
        s.push(FrameKind::Subshell);
        assert!(!s.can_return());
    }

    #[test]
    fn settle_return() {
        let mut s = stack();
        s.push(FrameKind::Function);
        assert_eq!(s.settle(Flow::Return(4)), Settled::Consumed(4));
        s.push(FrameKind::Eval);
        assert_eq!(s.settle(Flow::Return(4)), Settled::Forward(Flow::Return(4)));
        assert_eq!(s.settle(Flow::Exit(1)), Settled::Forward(Flow::Exit(1)));
    }

    #[test]
    fn subshell_traps_keep_entry_ignored() {
        use crate::traps::TrapAction;
        let mut s = stack();
        s.current().traps.borrow_mut().set(libc::SIGINT, TrapAction::Command("x".into()));
        s.push(FrameKind::Subshell);
        assert_eq!(s.current().traps.borrow().get(libc::SIGINT), &TrapAction::Default);
        assert_eq!(s.current().traps.borrow().get(libc::SIGQUIT), &TrapAction::Ignore);
        s.pop();
        assert!(s.current().traps.borrow().command(libc::SIGINT).is_some());
    }

    #[test]
    fn trap_frame_disables_errexit_for_nested_frames() {
        let mut s = stack();
        assert!(s.current().errexit_enabled());
        s.push(FrameKind::Trap);
        s.push(FrameKind::Function);
        assert!(!s.current().errexit_enabled());
    }
}
