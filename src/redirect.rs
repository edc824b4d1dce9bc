//! リダイレクトの適用と復元。
//!
//! 左から順に適用し、書き換える前の fd を [`BACKUP_FD_FLOOR`](crate::fd_table::BACKUP_FD_FLOOR)
//! 以上へ退避する。途中で失敗したら、それまでに適用した分を逆順に戻してからエラーを返す。
//! `exec` のように恒久的に適用する場合は退避しない。

use tracing::trace;

use crate::ast::{FileMode, RedirKind, Redirect};
use crate::error::RedirError;
use crate::expand;
use crate::fd_table::{FdEntry, FdOrigin};
use crate::job;
use crate::options::ShellOption;
use crate::shell::Shell;
use crate::sys;

/// この長さを超えるヒアドキュメントは子プロセスに書かせる（パイプバッファで詰まらないように）。
const HEREDOC_INLINE_LIMIT: usize = 4096;

#[derive(Debug)]
struct Saved {
    fd: i32,
    /// 元の fd の複製。元々閉じていたなら `None`。
    backup: Option<i32>,
    entry: Option<FdEntry>,
}

/// 復元情報。[`restore`] に渡して元に戻す。
#[derive(Debug, Default)]
pub struct SavedFds {
    saved: Vec<Saved>,
}

impl SavedFds {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

/// 展開済みのリダイレクト先。
enum Target {
    File { path: String, mode: FileMode },
    Dup { from: i32, close_source: bool },
    Close,
    Here(String),
}

/// 一時的に適用する。失敗時は適用済みの分を戻してからエラーを返す。
pub fn apply(shell: &mut Shell, redirects: &[Redirect]) -> Result<SavedFds, RedirError> {
    let mut saved = SavedFds::default();
    for redirect in redirects {
        if let Err(e) = apply_one(shell, redirect, Some(&mut saved)) {
            restore(shell, saved);
            mark_line(shell, redirect);
            return Err(e);
        }
    }
    Ok(saved)
}

/// 復元せずに適用する（`exec` のリダイレクト、fork 後の子）。
pub fn apply_permanent(shell: &mut Shell, redirects: &[Redirect]) -> Result<(), RedirError> {
    for redirect in redirects {
        if let Err(e) = apply_one(shell, redirect, None) {
            mark_line(shell, redirect);
            return Err(e);
        }
    }
    Ok(())
}

fn mark_line(shell: &mut Shell, redirect: &Redirect) {
    if redirect.line > 0 {
        shell.frame_mut().source_line = redirect.line;
    }
}

/// 退避した fd を逆順に書き戻す。
pub fn restore(shell: &mut Shell, saved: SavedFds) {
    let fds = std::rc::Rc::clone(&shell.frame().fds);
    let mut table = fds.borrow_mut();
    for Saved { fd, backup, entry } in saved.saved.into_iter().rev() {
        match backup {
            Some(b) => {
                let _ = sys::dup2(b, fd);
                sys::close(b);
                table.remove(b);
            }
            None => sys::close(fd),
        }
        match entry {
            Some(e) => table.insert(fd, e),
            None => {
                table.remove(fd);
            }
        }
        trace!(fd, "redirect restore");
    }
}

fn resolve(shell: &mut Shell, redirect: &Redirect) -> Result<Target, RedirError> {
    Ok(match &redirect.kind {
        RedirKind::File { mode, target } => {
            let path = expand::expand_string(shell, target)?;
            if path.is_empty() {
                return Err(RedirError::Ambiguous(target.unquoted_text()));
            }
            Target::File { path, mode: *mode }
        }
        RedirKind::Dup { target, .. } => {
            let text = expand::expand_string(shell, target)?;
            if text == "-" {
                Target::Close
            } else {
                let (digits, close_source) = match text.strip_suffix('-') {
                    Some(rest) => (rest, true),
                    None => (text.as_str(), false),
                };
                let from = digits.parse::<i32>().map_err(|_| RedirError::Ambiguous(text.clone()))?;
                Target::Dup { from, close_source }
            }
        }
        RedirKind::HereDoc(doc) => {
            let body = doc.body.get().cloned().unwrap_or_default();
            let text = if doc.expand {
                expand::expand_string(shell, &body)?
            } else {
                body.unquoted_text()
            };
            Target::Here(text)
        }
    })
}

fn apply_one(shell: &mut Shell, redirect: &Redirect, saved: Option<&mut SavedFds>) -> Result<(), RedirError> {
    let fd = redirect.fd.unwrap_or_else(|| redirect.kind.default_fd());
    let target = resolve(shell, redirect)?;

    // 元の fd と同じ番号への dup は何もしない（退避も不要）。
    if let Target::Dup { from, close_source: false } = target {
        if from == fd {
            if !sys::is_open(fd) {
                return Err(RedirError::BadFd(from));
            }
            return Ok(());
        }
    }

    let mut saved = saved;
    if let Some(saved) = saved.as_deref_mut() {
        save(shell, fd, saved)?;
    }

    let fds = std::rc::Rc::clone(&shell.frame().fds);
    match target {
        Target::File { path, mode } => {
            let opened = open_target(shell, &path, mode)?;
            if opened != fd {
                let result = sys::dup2(opened, fd);
                sys::close(opened);
                result.map_err(|source| RedirError::Open { path: path.clone(), source })?;
            } else {
                sys::set_cloexec(fd, false).map_err(|source| RedirError::Open { path: path.clone(), source })?;
            }
            trace!(fd, path = %path, "redirect file");
            fds.borrow_mut().insert(fd, FdEntry::redirect(Some(path)));
        }
        Target::Dup { from, close_source } => {
            if !sys::is_open(from) || is_backup(shell, from) {
                return Err(RedirError::BadFd(from));
            }
            sys::dup2(from, fd).map_err(|_| RedirError::BadFd(from))?;
            trace!(fd, from, "redirect dup");
            let path = fds.borrow().get(from).and_then(|e| e.path.clone());
            fds.borrow_mut().insert(fd, FdEntry::redirect(path));
            // `n>&m-`: 移動元も閉じる。一時適用なら移動元も退避して復元できるようにする
            if close_source && from != fd {
                if let Some(saved) = saved {
                    save(shell, from, saved)?;
                }
                sys::close(from);
                fds.borrow_mut().remove(from);
            }
        }
        Target::Close => {
            sys::close(fd);
            fds.borrow_mut().remove(fd);
            trace!(fd, "redirect close");
        }
        Target::Here(body) => {
            let read_end = here_document(&body)?;
            let result = sys::dup2(read_end, fd);
            sys::close(read_end);
            result.map_err(RedirError::HereDoc)?;
            trace!(fd, len = body.len(), "redirect heredoc");
            fds.borrow_mut().insert(fd, FdEntry::redirect(None));
        }
    }
    Ok(())
}

fn is_backup(shell: &Shell, fd: i32) -> bool {
    shell
        .frame()
        .fds
        .borrow()
        .get(fd)
        .is_some_and(|e| e.origin == FdOrigin::Backup)
}

fn save(shell: &mut Shell, fd: i32, saved: &mut SavedFds) -> Result<(), RedirError> {
    if saved.saved.iter().any(|s| s.fd == fd) {
        return Ok(());
    }
    let fds = std::rc::Rc::clone(&shell.frame().fds);
    let entry = fds.borrow().get(fd).cloned();
    let backup = if sys::is_open(fd) {
        let floor = fds.borrow().backup_floor();
        let b = sys::dup_above(fd, floor).map_err(|source| RedirError::Save { fd, source })?;
        fds.borrow_mut().insert(b, FdEntry::backup(fd));
        Some(b)
    } else {
        None
    };
    trace!(fd, ?backup, "redirect save");
    saved.saved.push(Saved { fd, backup, entry });
    Ok(())
}

fn open_target(shell: &Shell, path: &str, mode: FileMode) -> Result<i32, RedirError> {
    let flags = match mode {
        FileMode::Read => libc::O_RDONLY,
        FileMode::Write | FileMode::Clobber => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        FileMode::Append => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
        FileMode::ReadWrite => libc::O_RDWR | libc::O_CREAT,
    };
    if mode == FileMode::Write && shell.option(ShellOption::NoClobber) && sys::is_regular_file(path) {
        return Err(RedirError::Clobber(path.to_string()));
    }
    sys::open(path, flags | libc::O_CLOEXEC, 0o666)
        .map_err(|source| RedirError::Open { path: path.to_string(), source })
}

/// 本体を書き込んだパイプの読み端を返す。
fn here_document(body: &str) -> Result<i32, RedirError> {
    let (read_end, write_end) = sys::pipe().map_err(RedirError::HereDoc)?;
    if body.len() <= HEREDOC_INLINE_LIMIT {
        let result = sys::write_all(write_end, body.as_bytes());
        sys::close(write_end);
        if let Err(e) = result {
            sys::close(read_end);
            return Err(RedirError::HereDoc(e));
        }
        return Ok(read_end);
    }
    // 中間の子がすぐ終了し、孫が書き込む。孫は init に引き取られるので回収は要らない。
    match sys::fork() {
        Ok(0) => {
            sys::close(read_end);
            if let Ok(0) = sys::fork() {
                let status = i32::from(sys::write_all(write_end, body.as_bytes()).is_err());
                sys::exit_now(status);
            }
            sys::exit_now(0);
        }
        Ok(pid) => {
            sys::close(write_end);
            job::wait_foreground(&[pid], false);
            Ok(read_end)
        }
        Err(e) => {
            sys::close(read_end);
            sys::close(write_end);
            Err(RedirError::HereDoc(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Command;
    use crate::frame::Bootstrap;
    use crate::parser;
    use std::io::Read;

    fn redirects(src: &str) -> Vec<Redirect> {
        let list = parser::parse(src).unwrap();
        match &list.items[0].and_or.first.commands[0] {
            Command::Simple(cmd) => cmd.redirects.clone(),
            other => panic!("{other:?}"),
        }
    }

    /// テスト用の高い fd 番号に対するリダイレクトで標準 fd に触れないようにする。
    #[test]
    fn file_redirect_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut sh = Shell::new(Bootstrap::default(), false);
        let std_before = sh.frame().fds.borrow().std_view();

        let saved = apply(&mut sh, &redirects(&format!("true 7>{}", path.display()))).unwrap();
        assert!(sys::is_open(7));
        sys::write_all(7, b"hello").unwrap();
        restore(&mut sh, saved);
        assert!(!sys::is_open(7));
        assert_eq!(sh.frame().fds.borrow().std_view(), std_before);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn failure_restores_earlier_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok");
        let mut sh = Shell::new(Bootstrap::default(), false);
        let src = format!("true 8>{} 9</nonexistent/file", ok.display());
        let err = apply(&mut sh, &redirects(&src)).unwrap_err();
        assert!(matches!(err, RedirError::Open { .. }));
        assert!(!sys::is_open(8));
        assert!(!sys::is_open(9));
    }

    #[test]
    fn noclobber_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists");
        std::fs::write(&path, "keep").unwrap();
        let mut sh = Shell::new(Bootstrap::default(), false);
        sh.set_option(ShellOption::NoClobber, true);

        let err = apply(&mut sh, &redirects(&format!("true 7>{}", path.display()))).unwrap_err();
        assert!(matches!(err, RedirError::Clobber(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep");

        let saved = apply(&mut sh, &redirects(&format!("true 7>|{}", path.display()))).unwrap();
        restore(&mut sh, saved);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn bad_dup_source() {
        let mut sh = Shell::new(Bootstrap::default(), false);
        let err = apply(&mut sh, &redirects("true 7>&55")).unwrap_err();
        assert!(matches!(err, RedirError::BadFd(55)));
    }

    #[test]
    fn moved_fd_source_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moved");
        let mut sh = Shell::new(Bootstrap::default(), false);
        let file = sys::open(path.to_str().unwrap(), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        sys::dup2(file, 6).unwrap();
        sys::close(file);

        let saved = apply(&mut sh, &redirects("true 5>&6-")).unwrap();
        assert!(sys::is_open(5));
        assert!(!sys::is_open(6));
        sys::write_all(5, b"moved ").unwrap();
        restore(&mut sh, saved);
        assert!(!sys::is_open(5));
        assert!(sys::is_open(6));
        sys::write_all(6, b"back").unwrap();
        sys::close(6);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "moved back");
    }

    #[test]
    fn here_document_feeds_pipe() {
        let mut sh = Shell::new(Bootstrap::default(), false);
        sh.assign("name", "world").unwrap();
        let saved = apply(&mut sh, &redirects("cat 7<<EOF\nhello $name\nEOF\n")).unwrap();
        let mut file = unsafe { <std::fs::File as std::os::fd::FromRawFd>::from_raw_fd(libc::dup(7)) };
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world\n");
        restore(&mut sh, saved);
        assert!(!sys::is_open(7));
    }

    #[test]
    fn large_here_document() {
        let mut sh = Shell::new(Bootstrap::default(), false);
        let body = "x".repeat(HEREDOC_INLINE_LIMIT * 4);
        let saved = apply(&mut sh, &redirects(&format!("cat 7<<'EOF'\n{body}\nEOF\n"))).unwrap();
        let read = sys::read_to_end(7).unwrap();
        assert_eq!(read.len(), body.len() + 1);
        restore(&mut sh, saved);
    }
}
