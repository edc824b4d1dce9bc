//! 位置パラメータ（`$0`、`$1`〜`$N`）。
//!
//! 変更されるのは `shift`、`set --`、関数呼び出し、引数付きドットスクリプトのみ。

use crate::error::StoreError;

/// 位置パラメータ数の上限。
pub const MAX_PARAMS: usize = 1 << 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Positional {
    /// `$0`
    pub arg0: String,
    params: Vec<String>,
}

impl Positional {
    pub fn new(arg0: impl Into<String>, params: Vec<String>) -> Self {
        Self { arg0: arg0.into(), params }
    }

    /// `$n`（1 始まり）。`n == 0` なら `$0`。
    pub fn get(&self, n: usize) -> Option<&str> {
        if n == 0 {
            Some(&self.arg0)
        } else {
            self.params.get(n - 1).map(|s| s.as_str())
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// `set -- args...`
    pub fn set(&mut self, params: Vec<String>) -> Result<(), StoreError> {
        if params.len() > MAX_PARAMS {
            return Err(StoreError::StorageFailure(format!(
                "too many positional parameters ({})",
                params.len()
            )));
        }
        self.params = params;
        Ok(())
    }

    /// `shift [n]`。`n` がパラメータ数を超えればエラーで何も変更しない。
    pub fn shift(&mut self, n: usize) -> Result<(), StoreError> {
        if n > self.params.len() {
            return Err(StoreError::StorageFailure(format!("{n}: shift count out of range")));
        }
        self.params.drain(..n);
        Ok(())
    }
}
