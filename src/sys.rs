//! libc の薄いラッパー: fd 操作、fork、ユーザーデータベース、バッファなし fd 書き込み。
//!
//! シェルは fd をリダイレクトで頻繁に差し替えるため、ビルトインの出力は
//! `std::io::Stdout` のバッファを通さず [`FdWriter`] で直接 `write(2)` する。

use std::ffi::{CStr, CString};
use std::io;

use libc::pid_t;

fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn interrupted(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINTR)
}

// ── fd ───────────────────────────────────────────────────────────────

/// close-on-exec 付きのパイプ。`(読み端, 書き端)` を返す。
pub fn pipe() -> io::Result<(i32, i32)> {
    let mut fds = [0; 2];
    check(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    for fd in fds {
        if let Err(e) = set_cloexec(fd, true) {
            close(fds[0]);
            close(fds[1]);
            return Err(e);
        }
    }
    Ok((fds[0], fds[1]))
}

pub fn set_cloexec(fd: i32, on: bool) -> io::Result<()> {
    let flags = check(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    let flags = if on { flags | libc::FD_CLOEXEC } else { flags & !libc::FD_CLOEXEC };
    check(unsafe { libc::fcntl(fd, libc::F_SETFD, flags) })?;
    Ok(())
}

pub fn dup2(from: i32, to: i32) -> io::Result<()> {
    loop {
        match check(unsafe { libc::dup2(from, to) }) {
            Err(e) if interrupted(&e) => continue,
            other => return other.map(|_| ()),
        }
    }
}

/// `floor` 以上の空き番号へ close-on-exec 付きで複製する。
pub fn dup_above(fd: i32, floor: i32) -> io::Result<i32> {
    check(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) })
}

pub fn close(fd: i32) {
    unsafe {
        libc::close(fd);
    }
}

pub fn is_open(fd: i32) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

pub fn isatty(fd: i32) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

pub fn open(path: &str, flags: libc::c_int, mode: libc::mode_t) -> io::Result<i32> {
    let c_path = CString::new(path).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    loop {
        match check(unsafe { libc::open(c_path.as_ptr(), flags, mode as libc::c_uint) }) {
            Err(e) if interrupted(&e) => continue,
            other => return other,
        }
    }
}

/// `path` が通常ファイルか。
pub fn is_regular_file(path: &str) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

pub fn write_all(fd: i32, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if interrupted(&err) {
                continue;
            }
            return Err(err);
        }
        bytes = &bytes[n as usize..];
    }
    Ok(())
}

/// 1 バイト読む。入力末尾なら `None`。
///
/// `EINTR` はそのまま `Interrupted` として返す（呼び出し側でトラップを処理するため）。
pub fn read_byte(fd: i32) -> io::Result<Option<u8>> {
    let mut byte = 0u8;
    let n = unsafe { libc::read(fd, (&mut byte as *mut u8).cast(), 1) };
    match n {
        0 => Ok(None),
        n if n < 0 => Err(io::Error::last_os_error()),
        _ => Ok(Some(byte)),
    }
}

/// 入力末尾まで読む。`EINTR` は再試行する。
pub fn read_to_end(fd: i32) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if interrupted(&err) {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
}

/// バッファを持たない `io::Write`。ビルトインの出力に使う。
#[derive(Debug, Clone, Copy)]
pub struct FdWriter(pub i32);

impl io::Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let n = unsafe { libc::write(self.0, buf.as_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if !interrupted(&err) {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn stdout() -> FdWriter {
    FdWriter(libc::STDOUT_FILENO)
}

// ── プロセス ─────────────────────────────────────────────────────────

pub fn fork() -> io::Result<pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(pid)
    }
}

/// atexit ハンドラもバッファのフラッシュも行わずに終了する。fork した子で使う。
pub fn exit_now(status: i32) -> ! {
    unsafe { libc::_exit(status & 0xff) }
}

pub fn getpid() -> pid_t {
    unsafe { libc::getpid() }
}

pub fn getppid() -> pid_t {
    unsafe { libc::getppid() }
}

pub fn getpgrp() -> pid_t {
    unsafe { libc::getpgrp() }
}

pub fn setpgid(pid: pid_t, pgid: pid_t) {
    unsafe {
        libc::setpgid(pid, pgid);
    }
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// ホームディレクトリ。`user` が `None` なら実行ユーザー。
pub fn home_dir(user: Option<&str>) -> Option<String> {
    let pw = match user {
        Some(name) => {
            let c_name = CString::new(name).ok()?;
            unsafe { libc::getpwnam(c_name.as_ptr()) }
        }
        None => unsafe { libc::getpwuid(libc::getuid()) },
    };
    if pw.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr((*pw).pw_dir) }.to_str().ok().map(str::to_string)
}
