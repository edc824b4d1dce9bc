//! 関数ストア。名前 → 関数定義の構文木。
//!
//! 関数は定義元のファイル（ドットスクリプト等）の構文木より長生きするため、
//! 挿入時に定義を複製してストア側で所有する。

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::FunctionDef;
use crate::error::StoreError;
use crate::variables::is_valid_name;

#[derive(Debug, Clone, Default)]
pub struct FunctionStore {
    funcs: HashMap<String, Rc<FunctionDef>>,
}

impl FunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: &FunctionDef) -> Result<(), StoreError> {
        if !is_valid_name(&def.name) {
            return Err(StoreError::InvalidName(def.name.clone()));
        }
        self.funcs.insert(def.name.clone(), Rc::new(def.clone()));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Rc<FunctionDef>> {
        self.funcs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Result<(), StoreError> {
        self.funcs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
