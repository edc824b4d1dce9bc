//! 外部コマンドの起動: `posix_spawn()` の安全な Rust ラッパーと `execve` 置き換え、`$PATH` 検索。
//!
//! ## 構成
//!
//! | 型・関数 | 役割 |
//! |-----|------|
//! | [`SpawnAttr`] | `posix_spawnattr_t` の RAII ラッパー（プロセスグループ、シグナル設定） |
//! | [`CStringVec`] | argv/envp 用の NULL 終端ポインタ配列 |
//! | [`find_in_path`] | `$PATH` からコマンドのパスを探す |
//! | [`spawn`] | fork せずに子プロセスを起動する |
//! | [`exec_replace`] | 現在のプロセス（fork 済みの子）をコマンドで置き換える |
//!
//! fd の付け替えはリダイレクト適用済みの現在の fd をそのまま継承させるため、
//! ファイルアクションは使わない。

use std::ffi::CString;
use std::fmt;

use libc::pid_t;
use tracing::debug;

// ── エラー型 ──────────────────────────────────────────────────────

/// 起動の失敗。
#[derive(Debug)]
pub struct SpawnError {
    /// errno 値。
    pub errno: i32,
    /// コマンド名（エラーメッセージ用）。
    pub command: String,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self.errno {
            libc::ENOENT if !self.command.contains('/') => "command not found".to_string(),
            libc::ENOEXEC => "cannot execute: exec format error".to_string(),
            errno => std::io::Error::from_raw_os_error(errno).to_string(),
        };
        write!(f, "{}: {}", self.command, msg)
    }
}

impl SpawnError {
    /// エラーに対応する終了ステータスを返す。
    /// 127 = 見つからない、126 = 見つかったが実行できない。
    pub fn exit_status(&self) -> i32 {
        match self.errno {
            libc::ENOENT | libc::ENOTDIR => 127,
            _ => 126,
        }
    }
}

// ── SpawnAttr ─────────────────────────────────────────────────────

/// `posix_spawnattr_t` の RAII ラッパー。Drop で自動 destroy。
struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    fn new() -> Self {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            libc::posix_spawnattr_init(&mut attr);
            Self { inner: attr }
        }
    }

    fn add_flags(&mut self, extra: libc::c_int) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= extra as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);
        }
    }

    /// `pgid == 0` の場合、子の PID がグループリーダーになる。
    fn set_pgroup(&mut self, pgid: pid_t) {
        self.add_flags(libc::POSIX_SPAWN_SETPGROUP);
        unsafe {
            libc::posix_spawnattr_setpgroup(&mut self.inner, pgid);
        }
    }

    /// 指定シグナルを子で `SIG_DFL` にする。
    fn set_sigdefault(&mut self, signals: &[i32]) {
        self.add_flags(libc::POSIX_SPAWN_SETSIGDEF);
        unsafe {
            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            for &sig in signals {
                libc::sigaddset(&mut sigset, sig);
            }
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &sigset);
        }
    }

    /// シェルのシグナルマスクを引き継がないよう空にする。
    fn clear_sigmask(&mut self) {
        self.add_flags(libc::POSIX_SPAWN_SETSIGMASK);
        unsafe {
            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            libc::posix_spawnattr_setsigmask(&mut self.inner, &sigset);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv/envp 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    /// NUL を含む要素は空文字列になる。
    fn from_args(args: &[String]) -> Self {
        let strings: Vec<CString> = args
            .iter()
            .map(|s| CString::new(s.as_str()).unwrap_or_default())
            .collect();
        let mut ptrs: Vec<*mut libc::c_char> = strings
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(std::ptr::null_mut()); // NULL 終端
        Self {
            _strings: strings,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── PATH 検索 ─────────────────────────────────────────────────────

fn is_executable(path: &str) -> bool {
    let Ok(c_path) = CString::new(path) else {
        return false;
    };
    crate::sys::is_regular_file(path) && unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

/// コマンド名を実行ファイルのパスに解決する。
///
/// `/` を含む名前はそのまま返す。`$PATH` の空要素はカレントディレクトリ。
/// 実行可能なものがなく、存在だけするファイルがあればそれを返す（実行時に 126 になる）。
pub fn find_in_path(name: &str, path_var: Option<&str>) -> Option<String> {
    if name.contains('/') {
        return Some(name.to_string());
    }
    let path_var = path_var.unwrap_or("/usr/local/bin:/usr/bin:/bin");
    let mut fallback = None;
    for dir in path_var.split(':') {
        let dir = if dir.is_empty() { "." } else { dir };
        let candidate = format!("{dir}/{name}");
        if is_executable(&candidate) {
            return Some(candidate);
        }
        if fallback.is_none() && crate::sys::is_regular_file(&candidate) {
            fallback = Some(candidate);
        }
    }
    fallback
}

// ── 起動 ──────────────────────────────────────────────────────────

/// `posix_spawn` で子プロセスを起動する。成功時は子 PID を返す。
///
/// - `path`: 実行ファイル（[`find_in_path`] で解決済み）
/// - `argv`: `argv[0]` はコマンド名
/// - `pgid`: `Some` ならプロセスグループを設定する（0 なら子がリーダー）
/// - `sigdefault`: 子で既定に戻すシグナル
pub fn spawn(
    path: &str,
    argv: &[String],
    envp: &[String],
    pgid: Option<pid_t>,
    sigdefault: &[i32],
) -> Result<pid_t, SpawnError> {
    let error = |errno| SpawnError { errno, command: argv.first().cloned().unwrap_or_default() };
    let c_path = CString::new(path).map_err(|_| error(libc::ENOENT))?;
    let argv_c = CStringVec::from_args(argv);
    let envp_c = CStringVec::from_args(envp);

    let mut attr = SpawnAttr::new();
    if let Some(pgid) = pgid {
        attr.set_pgroup(pgid);
    }
    attr.set_sigdefault(sigdefault);
    attr.clear_sigmask();

    let mut pid: pid_t = 0;
    let ret = unsafe {
        libc::posix_spawn(
            &mut pid,
            c_path.as_ptr(),
            std::ptr::null(),
            attr.as_ptr(),
            argv_c.as_ptr(),
            envp_c.as_ptr(),
        )
    };
    if ret != 0 {
        return Err(error(ret));
    }
    debug!(pid, path, "spawn");
    Ok(pid)
}

/// 現在のプロセスをコマンドで置き換える。戻ってきたら失敗。
pub fn exec_replace(path: &str, argv: &[String], envp: &[String], sigdefault: &[i32]) -> SpawnError {
    let error = |errno| SpawnError { errno, command: argv.first().cloned().unwrap_or_default() };
    let Ok(c_path) = CString::new(path) else {
        return error(libc::ENOENT);
    };
    let argv_c = CStringVec::from_args(argv);
    let envp_c = CStringVec::from_args(envp);
    for &sig in sigdefault {
        crate::signals::set_default(sig);
    }
    debug!(path, "exec");
    unsafe {
        libc::execve(c_path.as_ptr(), argv_c.as_ptr() as *const *const libc::c_char, envp_c.as_ptr() as *const *const libc::c_char);
    }
    error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::ENOEXEC))
}
