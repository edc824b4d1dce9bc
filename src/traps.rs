//! トラップストア。シグナル番号（0 = EXIT）→ 動作。
//!
//! 起動時に無視されていたシグナルはどのサブシェルでも無視のまま保たれる。
//! その集合自体は [`signals`](crate::signals) が保持し、ここでは引数として受け取る。

use std::collections::BTreeMap;

/// EXIT 疑似シグナルの番号。
pub const EXIT: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapAction {
    Default,
    Ignore,
    /// トラップ発火時に実行するコマンド文字列。
    Command(String),
}

#[derive(Debug, Clone, Default)]
pub struct TrapStore {
    traps: BTreeMap<i32, TrapAction>,
}

impl TrapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signal: i32) -> &TrapAction {
        self.traps.get(&signal).unwrap_or(&TrapAction::Default)
    }

    pub fn set(&mut self, signal: i32, action: TrapAction) {
        if action == TrapAction::Default {
            self.traps.remove(&signal);
        } else {
            self.traps.insert(signal, action);
        }
    }

    /// コマンド付きトラップの本体。EXIT トラップの実行判定に使う。
    pub fn command(&self, signal: i32) -> Option<&str> {
        match self.traps.get(&signal) {
            Some(TrapAction::Command(cmd)) => Some(cmd),
            _ => None,
        }
    }

    /// サブシェル突入時の初期化: コマンド付きトラップを既定に戻す。
    /// `ignored_at_entry` に含まれるシグナルは常に Ignore にする。
    pub fn reset_non_ignored(&mut self, ignored_at_entry: &[i32]) {
        self.traps.retain(|_, action| *action == TrapAction::Ignore);
        for &sig in ignored_at_entry {
            self.traps.insert(sig, TrapAction::Ignore);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &TrapAction)> {
        self.traps.iter().map(|(sig, action)| (*sig, action))
    }
}
