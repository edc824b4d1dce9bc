//! 変数ストア。
//!
//! 名前 → `{値, export 属性, readonly 属性}` のマップ。
//! `std::env` は使わず、外部コマンド起動時に [`VarStore::environ`] で
//! export 済み変数から環境変数リストを組み立てる。

use std::collections::HashMap;

use crate::error::StoreError;

/// 1 つのシェル変数。
///
/// `value` が `None` の変数は「属性だけ持つ未設定変数」（`export X` で X 未定義の場合など）。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variable {
    pub value: Option<String>,
    pub exported: bool,
    pub read_only: bool,
}

impl Variable {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: Some(value.into()), exported: false, read_only: false }
    }

    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }
}

/// 変数名として有効か: `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Default)]
pub struct VarStore {
    vars: HashMap<String, Variable>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 環境変数リストから export 済み変数として取り込む。名前が不正なものは無視する。
    pub fn from_environ<I, K, V>(env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut store = Self::new();
        for (k, v) in env {
            let k = k.into();
            if is_valid_name(&k) {
                store.vars.insert(k, Variable::new(v).exported());
            }
        }
        store
    }

    /// 設定済み変数の値。未設定なら `None`。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(|v| v.value.as_deref())
    }

    pub fn get_var(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 値を設定する。readonly 変数なら `ReadOnly`、名前が不正なら `InvalidName`。
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        match self.vars.get_mut(name) {
            Some(var) if var.read_only => Err(StoreError::ReadOnly(name.to_string())),
            Some(var) => {
                var.value = Some(value.into());
                Ok(())
            }
            None => {
                self.vars.insert(name.to_string(), Variable::new(value));
                Ok(())
            }
        }
    }

    pub fn unset(&mut self, name: &str) -> Result<(), StoreError> {
        match self.vars.get(name) {
            Some(var) if var.read_only => Err(StoreError::ReadOnly(name.to_string())),
            Some(_) => {
                self.vars.remove(name);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// export 属性を切り替える。readonly 変数でも変更できる。
    pub fn set_exported(&mut self, name: &str, exported: bool) -> Result<(), StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        self.vars.entry(name.to_string()).or_default().exported = exported;
        Ok(())
    }

    pub fn set_read_only(&mut self, name: &str) -> Result<(), StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        self.vars.entry(name.to_string()).or_default().read_only = true;
        Ok(())
    }

    /// `local` 用: 現在の変数をそのまま取り出す（属性込み）。
    pub fn snapshot(&self, name: &str) -> Option<Variable> {
        self.vars.get(name).cloned()
    }

    /// `local` 用: スナップショットを書き戻す。readonly 検査は行わない。
    pub fn restore(&mut self, name: &str, saved: Option<Variable>) {
        match saved {
            Some(var) => {
                self.vars.insert(name.to_string(), var);
            }
            None => {
                self.vars.remove(name);
            }
        }
    }

    pub fn for_each<F: FnMut(&str, &Variable)>(&self, mut f: F) {
        for (name, var) in &self.vars {
            f(name, var);
        }
    }

    /// 名前順にソートした一覧。`set`/`export -p` の出力用。
    pub fn sorted(&self) -> Vec<(&str, &Variable)> {
        let mut list: Vec<(&str, &Variable)> =
            self.vars.iter().map(|(k, v)| (k.as_str(), v)).collect();
        list.sort_by(|a, b| a.0.cmp(b.0));
        list
    }

    /// export 済みかつ値を持つ変数を `NAME=value` 形式で返す。
    pub fn environ(&self) -> Vec<String> {
        let mut env = Vec::new();
        self.for_each(|name, var| {
            if let (true, Some(value)) = (var.exported, var.value.as_deref()) {
                env.push(format!("{name}={value}"));
            }
        });
        env.sort();
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_name("x"));
        assert!(is_valid_name("_a1"));
        assert!(!is_valid_name("1a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a-b"));
    }

    #[test]
    fn set_and_get() {
        let mut s = VarStore::new();
        s.set("X", "1").unwrap();
        assert_eq!(s.get("X"), Some("1"));
        assert_eq!(s.set("1X", "v"), Err(StoreError::InvalidName("1X".into())));
    }

    #[test]
    fn read_only_value_is_immutable_but_export_toggles() {
        let mut s = VarStore::new();
        s.set("R", "v").unwrap();
        s.set_read_only("R").unwrap();
        assert_eq!(s.set("R", "w"), Err(StoreError::ReadOnly("R".into())));
        assert_eq!(s.unset("R"), Err(StoreError::ReadOnly("R".into())));
        s.set_exported("R", true).unwrap();
        assert!(s.get_var("R").unwrap().exported);
        assert_eq!(s.get("R"), Some("v"));
    }

    #[test]
    fn export_then_unset_leaves_nothing() {
        let mut s = VarStore::new();
        s.set("X", "v").unwrap();
        s.set_exported("X", true).unwrap();
        s.unset("X").unwrap();
        assert!(!s.is_set("X"));
        assert!(s.environ().is_empty());
    }

    #[test]
    fn export_without_value_is_not_in_environ() {
        let mut s = VarStore::new();
        s.set_exported("E", true).unwrap();
        assert!(!s.is_set("E"));
        assert!(s.environ().is_empty());
        s.set("E", "1").unwrap();
        assert_eq!(s.environ(), vec!["E=1".to_string()]);
    }

    #[test]
    fn from_environ_marks_exported() {
        let s = VarStore::from_environ(vec![("HOME", "/h"), ("BAD-NAME", "x")]);
        assert!(s.get_var("HOME").unwrap().exported);
        assert!(s.get_var("BAD-NAME").is_none());
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let mut s = VarStore::new();
        s.set("L", "outer").unwrap();
        let saved = s.snapshot("L");
        s.set("L", "inner").unwrap();
        s.restore("L", saved);
        assert_eq!(s.get("L"), Some("outer"));
        s.restore("L", None);
        assert!(!s.is_set("L"));
    }
}
