//! フレームポリシー表。
//!
//! フレーム種別ごとに「各ストアを親とどう関係づけるか」と
//! 振る舞いの軸（fork、制御フロー、トラップ、終了）を静的に定める。
//! [`frame`](crate::frame) は push/pop 時にこの表だけを見て初期化・後始末を行う。
//!
//! | 種別 | fork | 変数 | 位置パラメータ | トラップ | return | break/continue |
//! |------|------|------|----------------|----------|--------|----------------|
//! | TopLevel | – | Own | Own(argv) | Own, EXIT 実行 | Disallowed | Disallowed |
//! | Subshell / CmdSubst | ○ | Copy | Copy | Copy, リセット, EXIT 実行 | Disallowed | Disallowed |
//! | BraceGroup | – | Share | Share | Share | Transparent | Transparent |
//! | Function | – | Share + local | Own(CallArgs) | Share | Target | Disallowed |
//! | Loop | – | Share | Share | Share | Transparent | Target |
//! | Trap | – | Share | Share | Share, errexit 無効 | Disallowed | Disallowed |
//! | BackgroundJob | ○ | Copy | Copy | Copy, リセット | Disallowed | Disallowed |
//! | Pipeline | – | Share | Share | Share | Transparent | Transparent |
//! | PipelineCmd | ○ | Copy | Copy | Copy, リセット | Disallowed | Disallowed |
//! | DotScript | – | Share | Share(+上書き) | Share | Target | Disallowed |
//! | Eval | – | Share | Share | Share | Transparent | Transparent |

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    TopLevel,
    Subshell,
    CmdSubst,
    BraceGroup,
    Function,
    Loop,
    Trap,
    BackgroundJob,
    Pipeline,
    PipelineCmd,
    DotScript,
    Eval,
}

/// ストアと親フレームの関係。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// 新規（またはエンジンの起動時データから移動）。
    Own,
    /// 親を複製。変更は親に影響しない。
    Copy,
    /// 親と共有。変更は親から見える。
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionalInit {
    Argv,
    CallArgs,
    NotApplicable,
}

/// `$0` の決め方。`.` でも `$0` は変わらない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg0Rule {
    FromShellOrScript,
    Inherit,
}

/// fork した子のプロセスグループ。`Pipeline` はパイプラインの要素であることも表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessGroup {
    None,
    Start,
    Pipeline,
}

/// 非局所制御フロー（return / break / continue）に対するフレームの振る舞い。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowBehavior {
    /// このフレームで消費する。
    Target,
    /// 親へそのまま転送する。
    Transparent,
    /// エラーに変換する。
    Disallowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarPolicy {
    pub scope: Scope,
    pub has_locals: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionalPolicy {
    pub scope: Scope,
    pub init: PositionalInit,
    pub arg0: Arg0Rule,
    /// `. file args` のように一時的な上書きを許すか。
    pub can_override: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessPolicy {
    pub forks: bool,
    pub process_group: ProcessGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicy {
    pub return_behavior: FlowBehavior,
    pub loop_control: FlowBehavior,
    pub is_loop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapPolicy {
    pub scope: Scope,
    pub resets_non_ignored: bool,
    pub exit_trap_runs_on_pop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsPolicy {
    pub scope: Scope,
    pub errexit_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPolicy {
    /// フレームの終わりでプロセスも終わる。最後の外部コマンドを fork せずに exec してよい。
    pub terminates_process: bool,
    pub affects_parent_status: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// 子プロセスで動くサブシェル環境。ジョブ制御はここで止まる。
    pub subshell: bool,
    /// 非同期リスト。ジョブ制御なしなら SIGINT/SIGQUIT を無視する。
    pub background: bool,
}

/// 1 行分のポリシー。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePolicy {
    pub kind: FrameKind,
    pub variables: VarPolicy,
    pub positional: PositionalPolicy,
    pub functions: Scope,
    pub aliases: Scope,
    pub fds: Scope,
    pub traps: TrapPolicy,
    pub options: OptionsPolicy,
    pub process: ProcessPolicy,
    pub flow: FlowPolicy,
    pub exit: ExitPolicy,
    pub tracks_location: bool,
    pub class: Classification,
}

// ── 行テンプレート ─────────────────────────────────────────────────

const SHARED_POSITIONAL: PositionalPolicy = PositionalPolicy {
    scope: Scope::Share,
    init: PositionalInit::NotApplicable,
    arg0: Arg0Rule::Inherit,
    can_override: false,
};

const COPIED_POSITIONAL: PositionalPolicy =
    PositionalPolicy { scope: Scope::Copy, ..SHARED_POSITIONAL };

const SHARED_TRAPS: TrapPolicy =
    TrapPolicy { scope: Scope::Share, resets_non_ignored: false, exit_trap_runs_on_pop: false };

const SUBSHELL_TRAPS: TrapPolicy =
    TrapPolicy { scope: Scope::Copy, resets_non_ignored: true, exit_trap_runs_on_pop: true };

const NO_FORK: ProcessPolicy = ProcessPolicy { forks: false, process_group: ProcessGroup::None };

const TRANSPARENT: FlowPolicy = FlowPolicy {
    return_behavior: FlowBehavior::Transparent,
    loop_control: FlowBehavior::Transparent,
    is_loop: false,
};

const DISALLOWED: FlowPolicy = FlowPolicy {
    return_behavior: FlowBehavior::Disallowed,
    loop_control: FlowBehavior::Disallowed,
    is_loop: false,
};

const INLINE_EXIT: ExitPolicy = ExitPolicy { terminates_process: false, affects_parent_status: true };
const CHILD_EXIT: ExitPolicy = ExitPolicy { terminates_process: true, affects_parent_status: false };

const NOT_CLASSIFIED: Classification = Classification { subshell: false, background: false };
const SUBSHELL_CLASS: Classification = Classification { subshell: true, background: false };

/// 親とすべて共有する非 fork フレーム（ブレースグループ、パイプライン統括、eval）。
const SHARED: FramePolicy = FramePolicy {
    kind: FrameKind::BraceGroup,
    variables: VarPolicy { scope: Scope::Share, has_locals: false },
    positional: SHARED_POSITIONAL,
    functions: Scope::Share,
    aliases: Scope::Share,
    fds: Scope::Share,
    traps: SHARED_TRAPS,
    options: OptionsPolicy { scope: Scope::Share, errexit_enabled: true },
    process: NO_FORK,
    flow: TRANSPARENT,
    exit: INLINE_EXIT,
    tracks_location: false,
    class: NOT_CLASSIFIED,
};

/// 親を複製して fork するフレーム（サブシェル、コマンド置換、パイプライン要素）。
const FORKED: FramePolicy = FramePolicy {
    kind: FrameKind::Subshell,
    variables: VarPolicy { scope: Scope::Copy, has_locals: false },
    positional: COPIED_POSITIONAL,
    functions: Scope::Copy,
    aliases: Scope::Copy,
    fds: Scope::Copy,
    traps: SUBSHELL_TRAPS,
    options: OptionsPolicy { scope: Scope::Copy, errexit_enabled: true },
    process: ProcessPolicy { forks: true, process_group: ProcessGroup::None },
    flow: DISALLOWED,
    exit: CHILD_EXIT,
    tracks_location: false,
    class: SUBSHELL_CLASS,
};

// ── ポリシー表 ────────────────────────────────────────────────────

pub static TOP_LEVEL: FramePolicy = FramePolicy {
    kind: FrameKind::TopLevel,
    variables: VarPolicy { scope: Scope::Own, has_locals: false },
    positional: PositionalPolicy {
        scope: Scope::Own,
        init: PositionalInit::Argv,
        arg0: Arg0Rule::FromShellOrScript,
        can_override: false,
    },
    functions: Scope::Own,
    aliases: Scope::Own,
    fds: Scope::Own,
    traps: TrapPolicy { scope: Scope::Own, resets_non_ignored: false, exit_trap_runs_on_pop: true },
    options: OptionsPolicy { scope: Scope::Own, errexit_enabled: true },
    process: NO_FORK,
    flow: DISALLOWED,
    exit: ExitPolicy { terminates_process: true, affects_parent_status: false },
    tracks_location: true,
    class: NOT_CLASSIFIED,
};

pub static SUBSHELL: FramePolicy = FORKED;

pub static CMD_SUBST: FramePolicy = FramePolicy { kind: FrameKind::CmdSubst, ..FORKED };

pub static BRACE_GROUP: FramePolicy = SHARED;

pub static FUNCTION: FramePolicy = FramePolicy {
    kind: FrameKind::Function,
    variables: VarPolicy { scope: Scope::Share, has_locals: true },
    positional: PositionalPolicy {
        scope: Scope::Own,
        init: PositionalInit::CallArgs,
        arg0: Arg0Rule::Inherit,
        can_override: false,
    },
    flow: FlowPolicy {
        return_behavior: FlowBehavior::Target,
        loop_control: FlowBehavior::Disallowed,
        is_loop: false,
    },
    tracks_location: true,
    ..SHARED
};

pub static LOOP: FramePolicy = FramePolicy {
    kind: FrameKind::Loop,
    flow: FlowPolicy {
        return_behavior: FlowBehavior::Transparent,
        loop_control: FlowBehavior::Target,
        is_loop: true,
    },
    ..SHARED
};

pub static TRAP: FramePolicy = FramePolicy {
    kind: FrameKind::Trap,
    options: OptionsPolicy { scope: Scope::Share, errexit_enabled: false },
    flow: DISALLOWED,
    exit: ExitPolicy { terminates_process: false, affects_parent_status: false },
    ..SHARED
};

pub static BACKGROUND_JOB: FramePolicy = FramePolicy {
    kind: FrameKind::BackgroundJob,
    process: ProcessPolicy { forks: true, process_group: ProcessGroup::Start },
    class: Classification { subshell: true, background: true },
    ..FORKED
};

pub static PIPELINE: FramePolicy = FramePolicy { kind: FrameKind::Pipeline, ..SHARED };

pub static PIPELINE_CMD: FramePolicy = FramePolicy {
    kind: FrameKind::PipelineCmd,
    process: ProcessPolicy { forks: true, process_group: ProcessGroup::Pipeline },
    ..FORKED
};

pub static DOT_SCRIPT: FramePolicy = FramePolicy {
    kind: FrameKind::DotScript,
    positional: PositionalPolicy {
        scope: Scope::Share,
        init: PositionalInit::NotApplicable,
        arg0: Arg0Rule::Inherit,
        can_override: true,
    },
    flow: FlowPolicy {
        return_behavior: FlowBehavior::Target,
        loop_control: FlowBehavior::Disallowed,
        is_loop: false,
    },
    tracks_location: true,
    ..SHARED
};

pub static EVAL: FramePolicy = FramePolicy { kind: FrameKind::Eval, ..SHARED };

impl FrameKind {
    /// この種別のポリシー行。
    pub fn policy(self) -> &'static FramePolicy {
        match self {
            Self::TopLevel => &TOP_LEVEL,
            Self::Subshell => &SUBSHELL,
            Self::CmdSubst => &CMD_SUBST,
            Self::BraceGroup => &BRACE_GROUP,
            Self::Function => &FUNCTION,
            Self::Loop => &LOOP,
            Self::Trap => &TRAP,
            Self::BackgroundJob => &BACKGROUND_JOB,
            Self::Pipeline => &PIPELINE,
            Self::PipelineCmd => &PIPELINE_CMD,
            Self::DotScript => &DOT_SCRIPT,
            Self::Eval => &EVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FrameKind; 12] = [
        FrameKind::TopLevel,
        FrameKind::Subshell,
        FrameKind::CmdSubst,
        FrameKind::BraceGroup,
        FrameKind::Function,
        FrameKind::Loop,
        FrameKind::Trap,
        FrameKind::BackgroundJob,
        FrameKind::Pipeline,
        FrameKind::PipelineCmd,
        FrameKind::DotScript,
        FrameKind::Eval,
    ];

    #[test]
    fn every_row_is_labelled_with_its_kind() {
        for kind in ALL {
            assert_eq!(kind.policy().kind, kind);
        }
    }

    #[test]
    fn forking_frames_copy_and_never_share() {
        for kind in ALL {
            let p = kind.policy();
            if p.process.forks {
                assert_eq!(p.variables.scope, Scope::Copy, "{kind:?}");
                assert_eq!(p.traps.scope, Scope::Copy, "{kind:?}");
                assert!(p.traps.resets_non_ignored, "{kind:?}");
                assert!(p.class.subshell, "{kind:?}");
                assert!(p.exit.terminates_process, "{kind:?}");
            }
        }
    }

    #[test]
    fn only_background_jobs_are_classified_background() {
        for kind in ALL {
            assert_eq!(kind.policy().class.background, kind == FrameKind::BackgroundJob, "{kind:?}");
        }
        assert_eq!(FrameKind::PipelineCmd.policy().process.process_group, ProcessGroup::Pipeline);
        assert!(FrameKind::TopLevel.policy().exit.terminates_process);
        assert!(!FrameKind::Trap.policy().exit.terminates_process);
    }

    #[test]
    fn flow_targets() {
        assert_eq!(FrameKind::Function.policy().flow.return_behavior, FlowBehavior::Target);
        assert_eq!(FrameKind::DotScript.policy().flow.return_behavior, FlowBehavior::Target);
        assert_eq!(FrameKind::Loop.policy().flow.loop_control, FlowBehavior::Target);
        assert!(FrameKind::Loop.policy().flow.is_loop);
        assert_eq!(FrameKind::Function.policy().flow.loop_control, FlowBehavior::Disallowed);
        assert_eq!(FrameKind::Eval.policy().flow.return_behavior, FlowBehavior::Transparent);
    }

    #[test]
    fn only_trap_frames_disable_errexit() {
        for kind in ALL {
            assert_eq!(kind.policy().options.errexit_enabled, kind != FrameKind::Trap);
        }
    }

    #[test]
    fn function_positional_is_private() {
        let p = FrameKind::Function.policy();
        assert_eq!(p.positional.scope, Scope::Own);
        assert_eq!(p.positional.init, PositionalInit::CallArgs);
        assert!(p.variables.has_locals);
        assert!(FrameKind::DotScript.policy().positional.can_override);
    }
}
