//! エラー型。
//!
//! レイヤーごとに 1 つの enum を持つ（ストア、パーサー、展開、リダイレクト）。
//! どのエラーも最終的には executor で終了ステータスに畳み込まれ、
//! シェルの外へ例外として漏れることはない。

use std::io;

use thiserror::Error;

use crate::arith::ArithError;

/// ストア操作（変数、関数、エイリアス、トラップ）のエラー。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{0}: is read only")]
    ReadOnly(String),
    #[error("{0}: bad variable name")]
    InvalidName(String),
    #[error("{0}")]
    StorageFailure(String),
}

/// 構文エラー。`line` は 1 始まりの入力行番号。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: syntax error: unexpected {found}")]
    Unexpected { found: String, line: usize },
    #[error("line {line}: syntax error: unexpected end of file")]
    UnexpectedEof { line: usize },
    #[error("line {line}: unexpected EOF while looking for matching `{quote}`")]
    UnterminatedQuote { quote: char, line: usize },
    #[error("line {line}: here-document delimited by end-of-file (wanted `{delimiter}`)")]
    HereDocEof { delimiter: String, line: usize },
    #[error("line {line}: bad substitution")]
    BadSubstitution { line: usize },
    #[error("line {line}: {message}")]
    Invalid { message: String, line: usize },
}

impl ParseError {
    /// 入力を追加すれば解消しうるエラーか。対話モードで `PS2` 継続行を読むかの判定に使う。
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof { .. } | Self::UnterminatedQuote { .. } | Self::HereDocEof { .. }
        )
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Unexpected { line, .. }
            | Self::UnexpectedEof { line }
            | Self::UnterminatedQuote { line, .. }
            | Self::HereDocEof { line, .. }
            | Self::BadSubstitution { line }
            | Self::Invalid { line, .. } => *line,
        }
    }
}

/// ワード展開のエラー。
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("{0}: parameter not set")]
    Unset(String),
    #[error("{name}: {message}")]
    NullOrUnset { name: String, message: String },
    #[error("{0}: bad substitution")]
    BadSubstitution(String),
    #[error("arithmetic expression: {0}")]
    Arith(#[from] ArithError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot fork: {0}")]
    Fork(io::Error),
}

/// リダイレクト適用のエラー。
#[derive(Debug, Error)]
pub enum RedirError {
    #[error("{path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}: cannot overwrite existing file")]
    Clobber(String),
    #[error("{0}: bad file descriptor")]
    BadFd(i32),
    #[error("{0}: ambiguous redirect")]
    Ambiguous(String),
    #[error("cannot create here-document: {0}")]
    HereDoc(io::Error),
    #[error("cannot save file descriptor {fd}: {source}")]
    Save {
        fd: i32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Expand(#[from] ExpandError),
}

/// シェル全体のエラー。各レイヤーのエラーを `?` で持ち上げるための傘。
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error(transparent)]
    Redir(#[from] RedirError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ShellError {
    /// このエラーが引き起こすコマンドの終了ステータス。
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Parse(_) => 2,
            _ => 1,
        }
    }
}
