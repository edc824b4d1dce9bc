//! 構文木。パーサーが生成し、executor が借用して実行する。
//!
//! ノード種別ごとに 1 つの variant を持つ直和型で表現し、
//! executor は `match` で分岐する。関数定義だけは定義元のソースより長生きするため
//! [`FunctionStore`](crate::functions::FunctionStore) が本体を複製して所有する。

use std::cell::OnceCell;
use std::rc::Rc;

// ── コマンド ────────────────────────────────────────────────────────

/// コマンドリスト: and-or リストを `;`、`&`、改行で並べたもの。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandList {
    pub items: Vec<ListItem>,
}

impl CommandList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// リスト内の 1 要素。
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub and_or: AndOrList,
    /// 末尾が `&` ならバックグラウンドで実行する。
    pub background: bool,
}

/// `p1 && p2 || p3` 形式の短絡評価リスト。
#[derive(Debug, Clone, PartialEq)]
pub struct AndOrList {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

/// パイプライン間の接続子。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// `&&`: 直前が成功した場合のみ次を実行
    And,
    /// `||`: 直前が失敗した場合のみ次を実行
    Or,
}

/// `[!] cmd1 | cmd2 | ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
    pub line: usize,
    /// ソース上のテキスト。ジョブ一覧の表示に使う。
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Simple(SimpleCommand),
    /// 複合コマンドと、その全体に掛かる末尾リダイレクト。
    Compound(CompoundCommand, Vec<Redirect>),
    FunctionDef(FunctionDef),
}

/// 単純コマンド: 前置代入、ワード、リダイレクト。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    pub line: usize,
}

/// `name=value`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompoundCommand {
    BraceGroup(CommandList),
    Subshell(CommandList),
    If {
        /// `if`/`elif` の (条件, 本体) の並び。
        branches: Vec<(CommandList, CommandList)>,
        else_branch: Option<CommandList>,
    },
    While {
        condition: CommandList,
        body: CommandList,
    },
    Until {
        condition: CommandList,
        body: CommandList,
    },
    For {
        name: String,
        /// `in` 句がなければ `None`（`"$@"` を走査する）。
        words: Option<Vec<Word>>,
        body: CommandList,
    },
    Case {
        subject: Word,
        items: Vec<CaseItem>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseItem {
    pub patterns: Vec<Word>,
    pub body: CommandList,
    pub terminator: CaseTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTerminator {
    /// `;;`
    Break,
    /// `;&`: 次の項目の本体も実行する
    FallThrough,
}

/// `name() compound-command [redirections]`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Rc<Command>,
    pub line: usize,
}

// ── リダイレクト ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    /// 明示された fd（`2>` の `2`）。省略時は種別ごとの既定値を使う。
    pub fd: Option<i32>,
    pub kind: RedirKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedirKind {
    File { mode: FileMode, target: Word },
    /// `n<&word` / `n>&word`。ワードは `m`、`m-`、`-` のいずれかに展開される。
    Dup { output: bool, target: Word },
    HereDoc(HereDoc),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// `<`
    Read,
    /// `>`
    Write,
    /// `>|`
    Clobber,
    /// `>>`
    Append,
    /// `<>`
    ReadWrite,
}

impl RedirKind {
    /// fd 省略時の既定 fd。読み込み系とヒアドキュメントは 0、書き込み系は 1。
    pub fn default_fd(&self) -> i32 {
        match self {
            Self::File { mode: FileMode::Read | FileMode::ReadWrite, .. } => 0,
            Self::File { .. } => 1,
            Self::Dup { output, .. } => i32::from(*output),
            Self::HereDoc(_) => 0,
        }
    }
}

/// ヒアドキュメント。本体は区切り行の後で読まれるため、構文木構築後に埋める。
#[derive(Debug, Clone, PartialEq)]
pub struct HereDoc {
    pub delimiter: String,
    /// `<<-` なら行頭タブを除去する。
    pub strip_tabs: bool,
    /// 区切り語がクォートされていなければ本体を展開する。
    pub expand: bool,
    pub body: Rc<OnceCell<Word>>,
}

// ── ワード ──────────────────────────────────────────────────────────

/// 1 つのワードトークン。展開前のパーツ列を持つ。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Unquoted,
    /// シングルクォートまたはバックスラッシュエスケープ。展開されない。
    Single,
    /// ダブルクォート内。展開はされるが分割・glob はされない。
    Double,
}

impl Quote {
    pub fn is_quoted(self) -> bool {
        self != Quote::Unquoted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    Literal { text: String, quote: Quote },
    Parameter { param: ParamExpansion, quote: Quote },
    CommandSubst { program: Rc<CommandList>, quote: Quote },
    Arithmetic { expr: Word, quote: Quote },
    /// `~user` のユーザー名部分（`~` 単独なら空文字列）。
    Tilde(String),
}

impl WordPart {
    fn quote(&self) -> Quote {
        match self {
            Self::Literal { quote, .. }
            | Self::Parameter { quote, .. }
            | Self::CommandSubst { quote, .. }
            | Self::Arithmetic { quote, .. } => *quote,
            Self::Tilde(_) => Quote::Unquoted,
        }
    }
}

impl Word {
    pub fn literal(text: &str) -> Self {
        Self {
            parts: vec![WordPart::Literal { text: text.to_string(), quote: Quote::Unquoted }],
        }
    }

    /// リテラル以外のパーツを含むか。
    pub fn needs_expansion(&self) -> bool {
        self.parts.iter().any(|p| !matches!(p, WordPart::Literal { .. }))
    }

    /// クォートされていない展開を含むか（フィールド分割の対象）。
    pub fn needs_field_splitting(&self) -> bool {
        self.parts.iter().any(|p| {
            matches!(
                p,
                WordPart::Parameter { .. } | WordPart::CommandSubst { .. } | WordPart::Arithmetic { .. }
            ) && !p.quote().is_quoted()
        })
    }

    /// クォートされていない glob 文字、または展開結果を含むか。
    pub fn needs_pathname_expansion(&self) -> bool {
        self.needs_field_splitting()
            || self.parts.iter().any(|p| match p {
                WordPart::Literal { text, quote: Quote::Unquoted } => {
                    text.contains(|c: char| matches!(c, '*' | '?' | '['))
                }
                _ => false,
            })
    }

    /// クォートを含むか。ヒアドキュメント区切り語の判定に使う。
    pub fn has_quotes(&self) -> bool {
        self.parts.iter().any(|p| p.quote().is_quoted())
    }

    /// 展開なしで確定するリテラル文字列。展開を含めば `None`。
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }

    /// クォートを取り除いた生のテキスト（ヒアドキュメント区切り語、予約語判定用）。
    pub fn unquoted_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } => out.push_str(text),
                WordPart::Tilde(user) => {
                    out.push('~');
                    out.push_str(user);
                }
                _ => {}
            }
        }
        out
    }
}

/// `$name` / `${name op word}`
#[derive(Debug, Clone, PartialEq)]
pub struct ParamExpansion {
    pub name: String,
    pub op: ParamOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    Plain,
    /// `${#name}`
    Length,
    /// `${!name}`
    Indirect,
    /// `${name-word}` / `${name:-word}`
    Default { colon: bool, word: Word },
    /// `${name=word}` / `${name:=word}`
    Assign { colon: bool, word: Word },
    /// `${name?word}` / `${name:?word}`
    Error { colon: bool, word: Word },
    /// `${name+word}` / `${name:+word}`
    Alternative { colon: bool, word: Word },
    /// `${name#pat}` / `${name##pat}`
    TrimPrefix { longest: bool, pattern: Word },
    /// `${name%pat}` / `${name%%pat}`
    TrimSuffix { longest: bool, pattern: Word },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, quote: Quote) -> WordPart {
        WordPart::Parameter {
            param: ParamExpansion { name: name.into(), op: ParamOp::Plain },
            quote,
        }
    }

    #[test]
    fn literal_word_needs_nothing() {
        let w = Word::literal("hello");
        assert!(!w.needs_expansion());
        assert!(!w.needs_field_splitting());
        assert!(!w.needs_pathname_expansion());
        assert_eq!(w.as_literal().as_deref(), Some("hello"));
    }

    #[test]
    fn glob_literal_needs_pathname_only() {
        let w = Word::literal("*.rs");
        assert!(!w.needs_field_splitting());
        assert!(w.needs_pathname_expansion());
    }

    #[test]
    fn quoted_parameter_is_not_split() {
        let w = Word { parts: vec![param("x", Quote::Double)] };
        assert!(w.needs_expansion());
        assert!(!w.needs_field_splitting());
        assert!(w.has_quotes());
    }

    #[test]
    fn unquoted_parameter_is_split() {
        let w = Word { parts: vec![param("x", Quote::Unquoted)] };
        assert!(w.needs_field_splitting());
        assert!(w.needs_pathname_expansion());
        assert_eq!(w.as_literal(), None);
    }

    #[test]
    fn default_fds() {
        let read = RedirKind::File { mode: FileMode::Read, target: Word::literal("f") };
        let append = RedirKind::File { mode: FileMode::Append, target: Word::literal("f") };
        let dup_out = RedirKind::Dup { output: true, target: Word::literal("2") };
        assert_eq!(read.default_fd(), 0);
        assert_eq!(append.default_fd(), 1);
        assert_eq!(dup_out.default_fd(), 1);
    }
}
