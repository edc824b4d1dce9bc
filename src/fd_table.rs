//! fd テーブル。シェルが把握しているファイルディスクリプタの記録。
//!
//! どの fd が close-on-exec か、リダイレクトで作られたか、
//! リダイレクト終了後に復元するためのバックアップかを追跡する。
//! カーネル上の fd そのものは [`redirect`](crate::redirect) が操作する。

use std::collections::BTreeMap;

/// バックアップ fd を置く下限。ユーザーが `exec 3>file` 等で使う 0〜9 を避ける。
pub const BACKUP_FD_FLOOR: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdOrigin {
    /// 起動時から開いていた fd（0, 1, 2 など）。
    Inherited,
    /// リダイレクトで開いた fd。
    Redirect,
    /// リダイレクト前の fd を退避した複製。
    Backup,
    /// パイプの端。
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdEntry {
    pub cloexec: bool,
    pub origin: FdOrigin,
    pub path: Option<String>,
    /// `origin == Backup` のとき、退避元の fd。
    pub backup_of: Option<i32>,
}

impl FdEntry {
    pub fn inherited() -> Self {
        Self { cloexec: false, origin: FdOrigin::Inherited, path: None, backup_of: None }
    }

    pub fn redirect(path: Option<String>) -> Self {
        Self { cloexec: false, origin: FdOrigin::Redirect, path, backup_of: None }
    }

    pub fn backup(of: i32) -> Self {
        Self { cloexec: true, origin: FdOrigin::Backup, path: None, backup_of: Some(of) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdTable {
    entries: BTreeMap<i32, FdEntry>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 標準入出力の 3 つを継承 fd として登録したテーブル。
    pub fn with_std_streams() -> Self {
        let mut t = Self::new();
        for fd in 0..3 {
            t.insert(fd, FdEntry::inherited());
        }
        t
    }

    pub fn insert(&mut self, fd: i32, entry: FdEntry) {
        self.entries.insert(fd, entry);
    }

    pub fn remove(&mut self, fd: i32) -> Option<FdEntry> {
        self.entries.remove(&fd)
    }

    pub fn get(&self, fd: i32) -> Option<&FdEntry> {
        self.entries.get(&fd)
    }

    /// 把握している最大の fd。
    pub fn highest(&self) -> Option<i32> {
        self.entries.keys().next_back().copied()
    }

    /// 新しいバックアップ fd の探索開始位置: 既知の全 fd より上、かつ [`BACKUP_FD_FLOOR`] 以上。
    pub fn backup_floor(&self) -> i32 {
        self.highest().map_or(BACKUP_FD_FLOOR, |h| (h + 1).max(BACKUP_FD_FLOOR))
    }

    /// 標準の 3 fd に限った状態。リダイレクトブロック前後の比較に使う。
    pub fn std_view(&self) -> Vec<(i32, FdEntry)> {
        self.entries
            .range(0..3)
            .map(|(fd, entry)| (*fd, entry.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &FdEntry)> {
        self.entries.iter().map(|(fd, e)| (*fd, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_floor_is_above_everything() {
        let mut t = FdTable::with_std_streams();
        assert_eq!(t.backup_floor(), BACKUP_FD_FLOOR);
        t.insert(12, FdEntry::backup(1));
        assert_eq!(t.backup_floor(), 13);
    }

    #[test]
    fn std_view_ignores_high_fds() {
        let mut t = FdTable::with_std_streams();
        let before = t.std_view();
        t.insert(5, FdEntry::redirect(Some("f".into())));
        assert_eq!(t.std_view(), before);
        t.insert(1, FdEntry::redirect(Some("out".into())));
        assert_ne!(t.std_view(), before);
    }
}
