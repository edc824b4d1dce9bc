//! エイリアスストア。名前 → 置換テキスト。
//!
//! パーサーがコマンド位置の次のワードを読むときだけ参照する。

use std::collections::HashMap;

use crate::error::StoreError;

/// エイリアス名として有効か。POSIX のポータブル文字集合から引用符・メタ文字を除いたもの。
pub fn is_valid_alias_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '!' | '%' | ',' | '@' | '.' | '-'))
}

#[derive(Debug, Clone, Default)]
pub struct AliasStore {
    aliases: HashMap<String, String>,
}

impl AliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), StoreError> {
        if !is_valid_alias_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        self.aliases.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|s| s.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), StoreError> {
        self.aliases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn clear(&mut self) {
        self.aliases.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut list: Vec<(&str, &str)> =
            self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        list.sort_unstable();
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let mut a = AliasStore::new();
        a.set("ll", "ls -l").unwrap();
        assert_eq!(a.get("ll"), Some("ls -l"));
        a.remove("ll").unwrap();
        assert!(a.get("ll").is_none());
        assert!(a.remove("ll").is_err());
    }

    #[test]
    fn invalid_alias_names() {
        let mut a = AliasStore::new();
        assert!(a.set("a=b", "x").is_err());
        assert!(a.set("a b", "x").is_err());
        assert!(a.set("", "x").is_err());
    }
}
