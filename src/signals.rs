//! シグナル: 名前表、ハンドラ、保留ビット集合。
//!
//! ハンドラは保留ビットを立てるだけで、トラップ本体は安全点
//! （単純コマンドの後、プロンプト前、待機の中断後）で
//! [`Shell::run_pending_traps`](crate::shell::Shell::run_pending_traps) が実行する。
//! プロセス全体で共有する状態は [`PENDING`] と [`ASYNC_IGNORED`] だけ。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::traps::{TrapAction, TrapStore};

static PENDING: AtomicU64 = AtomicU64::new(0);
/// ジョブ制御なしのバックグラウンドジョブとして INT/QUIT を無視している子プロセスか。
static ASYNC_IGNORED: AtomicBool = AtomicBool::new(false);

/// `trap -l` / `kill -l` の表示順を兼ねる。
const NAMES: &[(i32, &str)] = &[
    (libc::SIGHUP, "HUP"),
    (libc::SIGINT, "INT"),
    (libc::SIGQUIT, "QUIT"),
    (libc::SIGILL, "ILL"),
    (libc::SIGTRAP, "TRAP"),
    (libc::SIGABRT, "ABRT"),
    (libc::SIGBUS, "BUS"),
    (libc::SIGFPE, "FPE"),
    (libc::SIGKILL, "KILL"),
    (libc::SIGUSR1, "USR1"),
    (libc::SIGSEGV, "SEGV"),
    (libc::SIGUSR2, "USR2"),
    (libc::SIGPIPE, "PIPE"),
    (libc::SIGALRM, "ALRM"),
    (libc::SIGTERM, "TERM"),
    (libc::SIGCHLD, "CHLD"),
    (libc::SIGCONT, "CONT"),
    (libc::SIGSTOP, "STOP"),
    (libc::SIGTSTP, "TSTP"),
    (libc::SIGTTIN, "TTIN"),
    (libc::SIGTTOU, "TTOU"),
    (libc::SIGURG, "URG"),
    (libc::SIGXCPU, "XCPU"),
    (libc::SIGXFSZ, "XFSZ"),
    (libc::SIGVTALRM, "VTALRM"),
    (libc::SIGPROF, "PROF"),
    (libc::SIGWINCH, "WINCH"),
    (libc::SIGSYS, "SYS"),
];

/// 対話シェルが自身のために無視するシグナル。子プロセスでは既定に戻す。
pub const JOB_CONTROL_SIGNALS: [i32; 4] = [libc::SIGQUIT, libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU];

pub fn name_of(sig: i32) -> Option<&'static str> {
    NAMES.iter().find(|(n, _)| *n == sig).map(|(_, name)| *name)
}

/// `INT`、`SIGINT`、`int`、`2`、`EXIT`、`0` のいずれの形式も受け付ける。
pub fn number_of(spec: &str) -> Option<i32> {
    if let Ok(n) = spec.parse::<i32>() {
        return (n == 0 || name_of(n).is_some()).then_some(n);
    }
    let upper = spec.to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    if bare == "EXIT" {
        return Some(0);
    }
    NAMES.iter().find(|(_, name)| *name == bare).map(|(n, _)| *n)
}

pub fn all() -> impl Iterator<Item = (i32, &'static str)> {
    NAMES.iter().copied()
}

// ── ハンドラと保留集合 ───────────────────────────────────────────────

extern "C" fn on_signal(sig: libc::c_int) {
    if (0..64).contains(&sig) {
        PENDING.fetch_or(1 << sig, Ordering::SeqCst);
    }
}

fn install(sig: i32, handler: libc::sighandler_t, flags: libc::c_int) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = flags;
        libc::sigaction(sig, &action, std::ptr::null_mut());
    }
}

/// ハンドラを設定し、受信時に保留ビットを立てる。
///
/// SA_RESTART は SIGCHLD にだけ付ける。他のシグナルでは対話入力の read を
/// EINTR で中断させたいが、子の終了のたびに入力やパイプの読み書きが切れては困る。
pub fn catch(sig: i32) {
    let flags = if sig == libc::SIGCHLD { libc::SA_RESTART } else { 0 };
    install(sig, on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t, flags);
}

pub fn ignore(sig: i32) {
    install(sig, libc::SIG_IGN, 0);
}

pub fn set_default(sig: i32) {
    install(sig, libc::SIG_DFL, 0);
}

/// 子プロセスの終了を保留ビットで知らせるよう SIGCHLD を捕捉する。
/// 起動時に無視されていれば触らない。
pub fn watch_children(ignored_at_entry: &[i32]) {
    if !ignored_at_entry.contains(&libc::SIGCHLD) {
        catch(libc::SIGCHLD);
    }
}

/// 保留中のシグナルを取り出して集合を空にする。番号の小さい順。
pub fn take_pending() -> Vec<i32> {
    let bits = PENDING.swap(0, Ordering::SeqCst);
    (1..64).filter(|sig| bits & (1 << sig) != 0).collect()
}

/// 取り出さずに、指定シグナルが保留中か調べる。
pub fn is_pending(sig: i32) -> bool {
    PENDING.load(Ordering::SeqCst) & (1 << sig) != 0
}

pub fn any_pending() -> bool {
    PENDING.load(Ordering::SeqCst) != 0
}

/// 起動時点で `SIG_IGN` になっているシグナルの一覧。
pub fn ignored_at_startup() -> Vec<i32> {
    NAMES
        .iter()
        .map(|(sig, _)| *sig)
        .filter(|&sig| sig != libc::SIGKILL && sig != libc::SIGSTOP)
        .filter(|&sig| unsafe {
            let mut old: libc::sigaction = std::mem::zeroed();
            libc::sigaction(sig, std::ptr::null(), &mut old) == 0 && old.sa_sigaction == libc::SIG_IGN
        })
        .collect()
}

/// トラップ設定をカーネルの処理方法に反映する。
/// `ignored_at_entry` に含まれるシグナルは触らない。
pub fn apply_trap(sig: i32, action: &TrapAction, ignored_at_entry: &[i32], interactive: bool) {
    if sig == 0 || ignored_at_entry.contains(&sig) {
        return;
    }
    match action {
        TrapAction::Command(_) => catch(sig),
        // SIG_IGN の SIGCHLD は子を自動回収させ、waitpid が終了ステータスを取れなくなる
        TrapAction::Ignore if sig == libc::SIGCHLD => catch(sig),
        TrapAction::Ignore => ignore(sig),
        TrapAction::Default => restore_shell_default(sig, interactive),
    }
}

/// トラップなしのときのシェル自身の処理方法。
fn restore_shell_default(sig: i32, interactive: bool) {
    if sig == libc::SIGCHLD {
        catch(sig);
    } else if interactive && sig == libc::SIGINT {
        catch(sig);
    } else if interactive && JOB_CONTROL_SIGNALS.contains(&sig) {
        ignore(sig);
    } else {
        set_default(sig);
    }
}

/// 対話シェルの起動時設定: SIGINT は捕捉、ジョブ制御系は無視。
pub fn setup_interactive(ignored_at_entry: &[i32]) {
    if !ignored_at_entry.contains(&libc::SIGINT) {
        catch(libc::SIGINT);
    }
    for sig in JOB_CONTROL_SIGNALS {
        if !ignored_at_entry.contains(&sig) {
            ignore(sig);
        }
    }
}

/// fork 直後の子プロセスでの設定。
///
/// コマンド付きトラップとシェル自身の設定は既定に戻し、
/// `Ignore` のトラップと起動時に無視されていたシグナルはそのまま残す。
/// ジョブ制御なしのバックグラウンドジョブでは SIGINT と SIGQUIT を無視する。
/// SIGCHLD の捕捉はサブシェルが自分のジョブを回収するために残す。
pub fn reset_for_child(traps: &TrapStore, ignored_at_entry: &[i32], async_without_job_control: bool) {
    let mut candidates: Vec<i32> = vec![libc::SIGINT];
    candidates.extend(JOB_CONTROL_SIGNALS);
    candidates.extend(
        traps
            .iter()
            .map(|(sig, _)| sig)
            .filter(|&sig| sig != 0 && sig != libc::SIGCHLD),
    );
    for sig in candidates {
        if ignored_at_entry.contains(&sig) || *traps.get(sig) == TrapAction::Ignore {
            continue;
        }
        set_default(sig);
    }
    if async_without_job_control {
        for sig in [libc::SIGINT, libc::SIGQUIT] {
            ignore(sig);
        }
    }
    ASYNC_IGNORED.store(async_without_job_control, Ordering::SeqCst);
    PENDING.store(0, Ordering::SeqCst);
}

/// fork せずに起動する外部コマンド（posix_spawn）で既定に戻すシグナル。
///
/// 捕捉中のシグナルは exec で自動的に既定へ戻るが、シェル自身の都合で
/// 無視しているもの（対話シェルのジョブ制御シグナル）はここで明示的に戻す。
pub fn child_defaults(traps: &TrapStore, ignored_at_entry: &[i32]) -> Vec<i32> {
    let async_ignored = ASYNC_IGNORED.load(Ordering::SeqCst);
    std::iter::once(libc::SIGINT)
        .chain(JOB_CONTROL_SIGNALS)
        .filter(|sig| !ignored_at_entry.contains(sig))
        .filter(|&sig| *traps.get(sig) != TrapAction::Ignore)
        .filter(|&sig| !(async_ignored && (sig == libc::SIGINT || sig == libc::SIGQUIT)))
        .collect()
}
