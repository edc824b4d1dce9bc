//! 構文解析: 入力文字列から構文木（[`crate::ast`]）を構築する。
//!
//! 文字単位の再帰下降パーサー。トークナイザを別に持たず、
//! 文脈に応じてその場で演算子・ワード・予約語を切り出す。
//!
//! ## 対応構文
//!
//! - リスト: `;`、`&`、改行、`&&`、`||`、パイプライン `|`、`!`
//! - 複合コマンド: `( )`、`{ }`、`if`、`while`、`until`、`for`、`case`（`;;` と `;&`）
//! - 関数定義: `name() compound [redirections]`
//! - リダイレクト: `<`、`>`、`>|`、`>>`、`<>`、`<&`、`>&`、`<<`、`<<-`（fd 番号付き）
//! - ワード: クォート、`$name`、`${...}`、`$( )`、`` `...` ``、`$(( ))`、チルダ
//! - エイリアス: コマンド位置のワードを置換（再帰防止、末尾空白で次のワードも対象）
//!
//! [`Parser::parse_next`] は完結したコマンドを 1 つずつ返す。前のコマンドで定義した
//! エイリアスが次のコマンドの解析に効くよう、呼び出し側は実行と解析を交互に行う。

use std::cell::OnceCell;
use std::rc::Rc;

use crate::aliases::AliasStore;
use crate::ast::{
    AndOrList, Assignment, CaseItem, CaseTerminator, Command, CommandList, CompoundCommand,
    Connector, FileMode, FunctionDef, HereDoc, ListItem, ParamExpansion, ParamOp, Pipeline, Quote,
    RedirKind, Redirect, SimpleCommand, Word, WordPart,
};
use crate::error::ParseError;
use crate::variables::is_valid_name;

type PResult<T> = Result<T, ParseError>;

const RESERVED: &[&str] = &[
    "!", "{", "}", "case", "do", "done", "elif", "else", "esac", "fi", "for", "if", "in", "then",
    "until", "while",
];

/// コマンドの始まりには置けず、複合リストを終わらせる予約語。
const LIST_END: &[&str] = &["}", "do", "done", "elif", "else", "esac", "fi", "then"];

const TWO_CHAR_OPS: &[&str] = &["&&", "||", ";;", ";&", "<<", ">>", "<&", ">&", "<>", ">|"];

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>')
}

fn push_literal(parts: &mut Vec<WordPart>, c: char, quote: Quote) {
    if let Some(WordPart::Literal { text, quote: q }) = parts.last_mut() {
        if *q == quote {
            text.push(c);
            return;
        }
    }
    parts.push(WordPart::Literal { text: c.to_string(), quote });
}

struct PendingHereDoc {
    delimiter: String,
    strip_tabs: bool,
    expand: bool,
    body: Rc<OnceCell<Word>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// コマンドのワード。メタ文字で終わる。
    Normal,
    /// `${name op word}` の `word`。`}` で終わる。
    Param { in_double: bool },
}

pub struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// これ以上入力が来ないか。偽なら入力末尾での不完全エラーは巻き戻して追加入力を待つ。
    eof: bool,
    aliases: AliasStore,
    /// 展開中のエイリアスと、その置換テキストの終端位置。
    alias_spans: Vec<(String, usize)>,
    alias_next: bool,
    heredocs: Vec<PendingHereDoc>,
    /// 現在のコマンドの開始位置と行。
    start: usize,
    start_line: usize,
    /// エイリアス置換前の入力（巻き戻し用）。
    backup: Option<Vec<char>>,
    last_text: String,
}

/// 入力全体を構文解析する（エイリアスなし）。
pub fn parse(input: &str) -> PResult<CommandList> {
    let mut parser = Parser::new(input);
    let aliases = AliasStore::new();
    let mut program = CommandList::default();
    while let Some(list) = parser.parse_next(&aliases)? {
        program.items.extend(list.items);
    }
    Ok(program)
}

/// ヒアドキュメント本体と同じ規則（`$`、`` ` ``、`\` だけが特別）でテキストを解析する。
/// `PS1`/`PS4` の展開に使う。
pub fn parse_text(text: &str) -> PResult<Word> {
    Parser::new(text).expanding_text()
}

impl Parser {
    /// 入力全体が揃っているソース用。
    pub fn new(input: &str) -> Self {
        Self::with_line(input, 1)
    }

    pub fn with_line(input: &str, line: usize) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line,
            eof: true,
            aliases: AliasStore::new(),
            alias_spans: Vec::new(),
            alias_next: false,
            heredocs: Vec::new(),
            start: 0,
            start_line: line,
            backup: None,
            last_text: String::new(),
        }
    }

    /// 行単位で入力を追加していくソース用（標準入力、対話モード）。
    pub fn incremental() -> Self {
        Self { eof: false, ..Self::new("") }
    }

    pub fn feed(&mut self, text: &str) {
        self.chars.extend(text.chars());
    }

    /// 入力の終わりを通知する。
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// [`finish`](Self::finish) 済みか。
    pub fn is_finished(&self) -> bool {
        self.eof
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// 直前に返したコマンドのソーステキスト（`set -v` 用）。
    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    /// 構文エラーの後、残りのバッファを捨てる。
    pub fn discard(&mut self) {
        self.pos = self.chars.len();
        self.heredocs.clear();
        self.alias_spans.clear();
        self.backup = None;
    }

    /// 完結したコマンドを 1 つ読む。入力が尽きていれば `None`。
    ///
    /// 追加入力で解消しうるエラーのうち、まだ入力が続く場合は位置を巻き戻してからエラーを返す。
    /// 呼び出し側は [`feed`](Self::feed) してから再度呼べばよい。
    pub fn parse_next(&mut self, aliases: &AliasStore) -> PResult<Option<CommandList>> {
        self.compact();
        self.aliases = aliases.clone();
        self.alias_spans.clear();
        self.heredocs.clear();
        self.backup = None;
        self.start = self.pos;
        self.start_line = self.line;

        let result = self.complete_command();
        match &result {
            Err(e) if e.is_incomplete() && !self.eof => self.rewind(),
            Ok(Some(_)) => {
                let text: String = self.chars[self.start..self.pos].iter().collect();
                self.last_text = text.trim_end_matches('\n').to_string();
            }
            _ => {}
        }
        result
    }

    fn compact(&mut self) {
        if self.pos > 0 && self.pos * 2 >= self.chars.len() {
            self.chars.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn rewind(&mut self) {
        if let Some(tail) = self.backup.take() {
            self.chars.truncate(self.start);
            self.chars.extend(tail);
        }
        self.pos = self.start;
        self.line = self.start_line;
        self.heredocs.clear();
        self.alias_spans.clear();
    }

    // ── 文字単位の操作 ──────────────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn eof_error(&self) -> ParseError {
        ParseError::UnexpectedEof { line: self.line }
    }

    /// 空白、行継続、コメントを読み飛ばす。改行は残す。
    fn skip_blanks(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    /// 改行トークンを 1 つ消費し、保留中のヒアドキュメント本体を読む。
    fn newline(&mut self) -> PResult<()> {
        self.bump();
        if !self.heredocs.is_empty() {
            self.read_heredoc_bodies()?;
        }
        Ok(())
    }

    fn skip_linebreaks(&mut self) -> PResult<()> {
        loop {
            self.skip_blanks();
            if self.peek() == Some('\n') {
                self.newline()?;
            } else {
                return Ok(());
            }
        }
    }

    /// クォートや展開を含まない次のワード。
    fn peek_plain_word(&self) -> Option<String> {
        let mut i = self.pos;
        while let Some(&c) = self.chars.get(i) {
            if is_meta(c) {
                break;
            }
            if matches!(c, '\'' | '"' | '\\' | '$' | '`') {
                return None;
            }
            i += 1;
        }
        (i > self.pos).then(|| self.chars[self.pos..i].iter().collect())
    }

    fn peek_reserved(&self) -> Option<String> {
        self.peek_plain_word().filter(|w| RESERVED.contains(&w.as_str()))
    }

    fn expect_reserved(&mut self, word: &str) -> PResult<()> {
        self.skip_blanks();
        if self.peek_reserved().as_deref() == Some(word) {
            self.pos += word.len();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_char(&mut self, c: char) -> PResult<()> {
        self.skip_blanks();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ParseError {
        let line = self.line;
        let found = match self.peek() {
            None => return self.eof_error(),
            Some('\n') => "newline".to_string(),
            Some(c) => {
                let two: String = self.chars[self.pos..(self.pos + 2).min(self.chars.len())].iter().collect();
                if TWO_CHAR_OPS.contains(&two.as_str()) {
                    format!("`{two}'")
                } else if let Some(word) = self.peek_plain_word() {
                    format!("`{word}'")
                } else {
                    format!("`{c}'")
                }
            }
        };
        ParseError::Unexpected { found, line }
    }

    // ── エイリアス ──────────────────────────────────────────────────

    /// コマンド位置のワードがエイリアスなら置換テキストを入力に差し込む。
    /// 置換テキストが空白で終わっていれば `true`（次のワードも置換対象）。
    fn expand_aliases(&mut self) -> bool {
        let mut trailing_blank = false;
        loop {
            self.skip_blanks();
            let pos = self.pos;
            self.alias_spans.retain(|(_, end)| pos < *end);
            let Some(word) = self.peek_plain_word() else {
                break;
            };
            if RESERVED.contains(&word.as_str()) || self.alias_spans.iter().any(|(n, _)| *n == word) {
                break;
            }
            let Some(value) = self.aliases.get(&word).map(str::to_string) else {
                break;
            };

            if self.backup.is_none() {
                self.backup = Some(self.chars[self.start..].to_vec());
            }
            let start = self.pos;
            let end = start + word.chars().count();
            let replacement: Vec<char> = value.chars().collect();
            let delta = replacement.len() as isize - (end - start) as isize;
            for (_, e) in &mut self.alias_spans {
                if *e >= end {
                    *e = (*e as isize + delta) as usize;
                }
            }
            let span_end = start + replacement.len();
            self.chars.splice(start..end, replacement);
            self.alias_spans.push((word, span_end));
            trailing_blank = value.ends_with([' ', '\t']);
        }
        trailing_blank
    }

    // ── リスト ──────────────────────────────────────────────────────

    fn complete_command(&mut self) -> PResult<Option<CommandList>> {
        self.skip_linebreaks()?;
        if self.at_end() {
            return Ok(None);
        }
        self.start = self.pos;
        self.start_line = self.line;

        let list = self.list()?;
        self.skip_blanks();
        match self.peek() {
            Some('\n') => self.newline()?,
            None if self.eof => {
                if let Some(doc) = self.heredocs.first() {
                    return Err(ParseError::HereDocEof {
                        delimiter: doc.delimiter.clone(),
                        line: self.line,
                    });
                }
            }
            None => return Err(self.eof_error()),
            Some(_) => return Err(self.unexpected()),
        }
        Ok(Some(list))
    }

    /// トップレベルのリスト。改行か入力末尾で終わる。
    fn list(&mut self) -> PResult<CommandList> {
        let mut items = Vec::new();
        loop {
            let and_or = self.and_or()?;
            self.skip_blanks();
            let background = match (self.peek(), self.peek_at(1)) {
                (Some('&'), next) if next != Some('&') => {
                    self.pos += 1;
                    true
                }
                (Some(';'), next) if !matches!(next, Some(';' | '&')) => {
                    self.pos += 1;
                    false
                }
                _ => {
                    items.push(ListItem { and_or, background: false });
                    break;
                }
            };
            items.push(ListItem { and_or, background });
            self.skip_blanks();
            if matches!(self.peek(), None | Some('\n')) {
                break;
            }
        }
        Ok(CommandList { items })
    }

    fn at_list_end(&self) -> bool {
        match (self.peek(), self.peek_at(1)) {
            (Some(')'), _) => true,
            (Some(';'), Some(';' | '&')) => true,
            _ => self.peek_reserved().is_some_and(|w| LIST_END.contains(&w.as_str())),
        }
    }

    /// 複合コマンド内のリスト。改行をまたぎ、終端の予約語・`)`・`;;` の手前で止まる。
    fn compound_list(&mut self) -> PResult<CommandList> {
        let mut items = Vec::new();
        loop {
            self.skip_linebreaks()?;
            if self.at_end() {
                return Err(self.eof_error());
            }
            if self.at_list_end() {
                break;
            }
            let and_or = self.and_or()?;
            self.skip_blanks();
            let background = match (self.peek(), self.peek_at(1)) {
                (Some('&'), next) if next != Some('&') => {
                    self.pos += 1;
                    true
                }
                (Some(';'), next) if !matches!(next, Some(';' | '&')) => {
                    self.pos += 1;
                    false
                }
                (Some('\n'), _) => {
                    self.newline()?;
                    false
                }
                _ => {
                    items.push(ListItem { and_or, background: false });
                    break;
                }
            };
            items.push(ListItem { and_or, background });
        }
        if items.is_empty() {
            return Err(self.unexpected());
        }
        Ok(CommandList { items })
    }

    fn and_or(&mut self) -> PResult<AndOrList> {
        let first = self.pipeline()?;
        let mut rest = Vec::new();
        loop {
            self.skip_blanks();
            let connector = match (self.peek(), self.peek_at(1)) {
                (Some('&'), Some('&')) => Connector::And,
                (Some('|'), Some('|')) => Connector::Or,
                _ => break,
            };
            self.pos += 2;
            self.skip_linebreaks()?;
            rest.push((connector, self.pipeline()?));
        }
        Ok(AndOrList { first, rest })
    }

    fn pipeline(&mut self) -> PResult<Pipeline> {
        self.skip_blanks();
        let start = self.pos;
        let line = self.line;
        let negated = self.peek_reserved().as_deref() == Some("!");
        if negated {
            self.pos += 1;
        }
        let mut commands = vec![self.command()?];
        loop {
            self.skip_blanks();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                self.pos += 1;
                self.skip_linebreaks()?;
                commands.push(self.command()?);
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        Ok(Pipeline { negated, commands, line, text: text.trim().to_string() })
    }

    // ── コマンド ────────────────────────────────────────────────────

    fn command(&mut self) -> PResult<Command> {
        self.alias_next = self.expand_aliases();
        let compound = if self.peek() == Some('(') {
            self.pos += 1;
            let body = self.compound_list()?;
            self.expect_char(')')?;
            Some(CompoundCommand::Subshell(body))
        } else {
            match self.peek_reserved().as_deref() {
                Some("{") => {
                    self.pos += 1;
                    let body = self.compound_list()?;
                    self.expect_reserved("}")?;
                    Some(CompoundCommand::BraceGroup(body))
                }
                Some("if") => Some(self.if_clause()?),
                Some("while") => Some(self.loop_clause(true)?),
                Some("until") => Some(self.loop_clause(false)?),
                Some("for") => Some(self.for_clause()?),
                Some("case") => Some(self.case_clause()?),
                Some(w) if LIST_END.contains(&w) || w == "!" => return Err(self.unexpected()),
                _ => None,
            }
        };
        match compound {
            Some(c) => {
                let redirects = self.redirect_list()?;
                Ok(Command::Compound(c, redirects))
            }
            None => self.simple_command(),
        }
    }

    fn redirect_list(&mut self) -> PResult<Vec<Redirect>> {
        let mut redirects = Vec::new();
        loop {
            self.skip_blanks();
            match self.try_redirect()? {
                Some(r) => redirects.push(r),
                None => return Ok(redirects),
            }
        }
    }

    fn simple_command(&mut self) -> PResult<Command> {
        let mut cmd = SimpleCommand { line: self.line, ..SimpleCommand::default() };
        loop {
            if cmd.words.is_empty() || self.alias_next {
                self.alias_next = self.expand_aliases();
            }
            self.skip_blanks();
            match self.peek() {
                None => break,
                Some(c) if is_meta(c) && c != '<' && c != '>' => break,
                _ => {}
            }
            if let Some(redirect) = self.try_redirect()? {
                cmd.redirects.push(redirect);
                continue;
            }
            self.reject_named_fd()?;
            let word = self.word()?;
            if cmd.words.is_empty() {
                if let Some(assignment) = split_assignment(&word) {
                    cmd.assignments.push(assignment);
                    continue;
                }
                if cmd.assignments.is_empty() && cmd.redirects.is_empty() {
                    if let [WordPart::Literal { text, quote: Quote::Unquoted }] = word.parts.as_slice() {
                        self.skip_blanks();
                        if self.peek() == Some('(') && is_valid_name(text) {
                            let name = text.clone();
                            return self.function_def(name, cmd.line);
                        }
                    }
                }
            }
            cmd.words.push(word);
        }
        if cmd.words.is_empty() && cmd.assignments.is_empty() && cmd.redirects.is_empty() {
            return Err(self.unexpected());
        }
        Ok(Command::Simple(cmd))
    }

    fn function_def(&mut self, name: String, line: usize) -> PResult<Command> {
        self.pos += 1;
        self.expect_char(')')?;
        self.skip_linebreaks()?;
        let body = self.command()?;
        if !matches!(body, Command::Compound(..)) {
            return Err(ParseError::Invalid {
                message: format!("{name}: function body must be a compound command"),
                line,
            });
        }
        Ok(Command::FunctionDef(FunctionDef { name, body: Rc::new(body), line }))
    }

    /// `{fd}>file` 形式の動的 fd 割り当ては未対応としてエラーにする。
    fn reject_named_fd(&self) -> PResult<()> {
        if self.peek() != Some('{') {
            return Ok(());
        }
        let mut i = self.pos + 1;
        while self.chars.get(i).is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
            i += 1;
        }
        if i > self.pos + 1
            && self.chars.get(i) == Some(&'}')
            && matches!(self.chars.get(i + 1), Some('<' | '>'))
        {
            let name: String = self.chars[self.pos..=i].iter().collect();
            return Err(ParseError::Invalid {
                message: format!("{name}: named file descriptors are not supported"),
                line: self.line,
            });
        }
        Ok(())
    }

    fn try_redirect(&mut self) -> PResult<Option<Redirect>> {
        let mut i = self.pos;
        while self.chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        let fd = if i > self.pos && matches!(self.chars.get(i), Some('<' | '>')) {
            let digits: String = self.chars[self.pos..i].iter().collect();
            let fd = digits.parse::<i32>().map_err(|_| ParseError::Invalid {
                message: format!("{digits}: bad file descriptor"),
                line: self.line,
            })?;
            self.pos = i;
            Some(fd)
        } else if matches!(self.peek(), Some('<' | '>')) {
            None
        } else {
            return Ok(None);
        };

        let line = self.line;
        let op: String = {
            let three: String = self.chars[self.pos..(self.pos + 3).min(self.chars.len())].iter().collect();
            if three == "<<-" {
                three
            } else {
                let two: String = three.chars().take(2).collect();
                if ["<<", ">>", "<&", ">&", "<>", ">|"].contains(&two.as_str()) {
                    two
                } else {
                    three.chars().take(1).collect()
                }
            }
        };
        self.pos += op.len();
        self.skip_blanks();
        let target = self.word()?;
        if target.parts.is_empty() {
            return Err(self.unexpected());
        }

        let kind = match op.as_str() {
            "<<" | "<<-" => {
                let body = Rc::new(OnceCell::new());
                let expand = !target.has_quotes();
                let delimiter = target.unquoted_text();
                self.heredocs.push(PendingHereDoc {
                    delimiter: delimiter.clone(),
                    strip_tabs: op == "<<-",
                    expand,
                    body: Rc::clone(&body),
                });
                RedirKind::HereDoc(HereDoc { delimiter, strip_tabs: op == "<<-", expand, body })
            }
            "<&" => RedirKind::Dup { output: false, target },
            ">&" => RedirKind::Dup { output: true, target },
            "<" => RedirKind::File { mode: FileMode::Read, target },
            ">" => RedirKind::File { mode: FileMode::Write, target },
            ">|" => RedirKind::File { mode: FileMode::Clobber, target },
            ">>" => RedirKind::File { mode: FileMode::Append, target },
            _ => RedirKind::File { mode: FileMode::ReadWrite, target },
        };
        Ok(Some(Redirect { fd, kind, line }))
    }

    fn read_heredoc_bodies(&mut self) -> PResult<()> {
        for doc in std::mem::take(&mut self.heredocs) {
            let body_line = self.line;
            let mut body = String::new();
            loop {
                if self.at_end() {
                    return Err(ParseError::HereDocEof { delimiter: doc.delimiter, line: self.line });
                }
                let mut text = String::new();
                let mut terminated = false;
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        terminated = true;
                        break;
                    }
                    text.push(c);
                }
                if !terminated && !self.eof {
                    return Err(ParseError::HereDocEof { delimiter: doc.delimiter, line: self.line });
                }
                let text = if doc.strip_tabs { text.trim_start_matches('\t') } else { text.as_str() };
                if text == doc.delimiter {
                    break;
                }
                body.push_str(text);
                body.push('\n');
            }
            let word = if doc.expand {
                let mut sub = Parser::with_line(&body, body_line);
                sub.aliases = self.aliases.clone();
                sub.expanding_text()?
            } else {
                Word { parts: vec![WordPart::Literal { text: body, quote: Quote::Single }] }
            };
            let _ = doc.body.set(word);
        }
        Ok(())
    }

    // ── 複合コマンド ────────────────────────────────────────────────

    fn if_clause(&mut self) -> PResult<CompoundCommand> {
        self.pos += 2;
        let mut branches = Vec::new();
        let condition = self.compound_list()?;
        self.expect_reserved("then")?;
        branches.push((condition, self.compound_list()?));
        let mut else_branch = None;
        loop {
            self.skip_blanks();
            match self.peek_reserved().as_deref() {
                Some("elif") => {
                    self.pos += 4;
                    let condition = self.compound_list()?;
                    self.expect_reserved("then")?;
                    branches.push((condition, self.compound_list()?));
                }
                Some("else") => {
                    self.pos += 4;
                    else_branch = Some(self.compound_list()?);
                    self.expect_reserved("fi")?;
                    break;
                }
                Some("fi") => {
                    self.pos += 2;
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }
        Ok(CompoundCommand::If { branches, else_branch })
    }

    fn loop_clause(&mut self, is_while: bool) -> PResult<CompoundCommand> {
        self.pos += 5;
        let condition = self.compound_list()?;
        self.expect_reserved("do")?;
        let body = self.compound_list()?;
        self.expect_reserved("done")?;
        Ok(if is_while {
            CompoundCommand::While { condition, body }
        } else {
            CompoundCommand::Until { condition, body }
        })
    }

    fn for_clause(&mut self) -> PResult<CompoundCommand> {
        self.pos += 3;
        self.skip_blanks();
        let name = match self.peek_plain_word() {
            Some(name) if is_valid_name(&name) => name,
            Some(name) => {
                return Err(ParseError::Invalid {
                    message: format!("`{name}': not a valid identifier"),
                    line: self.line,
                })
            }
            None => return Err(self.unexpected()),
        };
        self.pos += name.len();

        self.skip_linebreaks()?;
        let mut words = None;
        if self.peek_reserved().as_deref() == Some("in") {
            self.pos += 2;
            let mut list = Vec::new();
            loop {
                self.skip_blanks();
                match self.peek() {
                    Some(';') => {
                        self.pos += 1;
                        break;
                    }
                    Some('\n') => {
                        self.newline()?;
                        break;
                    }
                    None => return Err(self.eof_error()),
                    Some(c) if is_meta(c) => return Err(self.unexpected()),
                    _ => list.push(self.word()?),
                }
            }
            words = Some(list);
        } else if self.peek() == Some(';') {
            self.pos += 1;
        }
        self.skip_linebreaks()?;
        self.expect_reserved("do")?;
        let body = self.compound_list()?;
        self.expect_reserved("done")?;
        Ok(CompoundCommand::For { name, words, body })
    }

    fn case_clause(&mut self) -> PResult<CompoundCommand> {
        self.pos += 4;
        self.skip_blanks();
        let subject = self.word()?;
        if subject.parts.is_empty() {
            return Err(self.unexpected());
        }
        self.skip_linebreaks()?;
        self.expect_reserved("in")?;

        let mut items = Vec::new();
        loop {
            self.skip_linebreaks()?;
            if self.peek_reserved().as_deref() == Some("esac") {
                self.pos += 4;
                break;
            }
            if self.at_end() {
                return Err(self.eof_error());
            }
            if self.peek() == Some('(') {
                self.pos += 1;
            }
            let mut patterns = Vec::new();
            loop {
                self.skip_blanks();
                let pattern = self.word()?;
                if pattern.parts.is_empty() {
                    return Err(self.unexpected());
                }
                patterns.push(pattern);
                self.skip_blanks();
                if self.peek() == Some('|') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            self.expect_char(')')?;
            self.skip_linebreaks()?;
            let body = if self.at_end() {
                return Err(self.eof_error());
            } else if self.at_list_end() {
                CommandList::default()
            } else {
                self.compound_list()?
            };
            self.skip_blanks();
            let terminator = match (self.peek(), self.peek_at(1)) {
                (Some(';'), Some(';')) => {
                    self.pos += 2;
                    CaseTerminator::Break
                }
                (Some(';'), Some('&')) => {
                    self.pos += 2;
                    CaseTerminator::FallThrough
                }
                _ if self.peek_reserved().as_deref() == Some("esac") => CaseTerminator::Break,
                _ => return Err(self.unexpected()),
            };
            items.push(CaseItem { patterns, body, terminator });
        }
        Ok(CompoundCommand::Case { subject, items })
    }

    // ── ワード ──────────────────────────────────────────────────────

    fn word(&mut self) -> PResult<Word> {
        let word = self.read_word(Mode::Normal)?;
        Ok(Word { parts: apply_tilde(word.parts, false) })
    }

    fn read_word(&mut self, mode: Mode) -> PResult<Word> {
        let mut parts = Vec::new();
        let literal_quote = match mode {
            Mode::Param { in_double: true } => Quote::Double,
            _ => Quote::Unquoted,
        };
        loop {
            let Some(c) = self.peek() else {
                if let Mode::Param { .. } = mode {
                    return Err(ParseError::UnterminatedQuote { quote: '}', line: self.line });
                }
                break;
            };
            match mode {
                Mode::Normal if is_meta(c) => break,
                Mode::Param { .. } if c == '}' => break,
                _ => {}
            }
            match c {
                '\'' if literal_quote == Quote::Unquoted => self.single_quoted(&mut parts)?,
                '"' => self.double_quoted(&mut parts)?,
                '\\' => match self.peek_at(1) {
                    Some('\n') => {
                        self.pos += 2;
                        self.line += 1;
                    }
                    Some(n) if literal_quote == Quote::Unquoted || matches!(n, '$' | '`' | '"' | '\\' | '}') => {
                        self.pos += 2;
                        push_literal(&mut parts, n, Quote::Single);
                    }
                    _ => {
                        self.pos += 1;
                        push_literal(&mut parts, '\\', literal_quote);
                    }
                },
                '$' => self.dollar(literal_quote, &mut parts)?,
                '`' => {
                    let part = self.backquote(literal_quote)?;
                    parts.push(part);
                }
                _ => {
                    self.bump();
                    push_literal(&mut parts, c, literal_quote);
                }
            }
        }
        Ok(Word { parts })
    }

    fn single_quoted(&mut self, parts: &mut Vec<WordPart>) -> PResult<()> {
        let line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\'') => break,
                Some(c) => text.push(c),
                None => return Err(ParseError::UnterminatedQuote { quote: '\'', line }),
            }
        }
        parts.push(WordPart::Literal { text, quote: Quote::Single });
        Ok(())
    }

    fn double_quoted(&mut self, parts: &mut Vec<WordPart>) -> PResult<()> {
        let line = self.line;
        self.pos += 1;
        let before = parts.len();
        loop {
            match self.peek() {
                None => return Err(ParseError::UnterminatedQuote { quote: '"', line }),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => match self.peek_at(1) {
                    Some('\n') => {
                        self.pos += 2;
                        self.line += 1;
                    }
                    Some(n @ ('$' | '`' | '"' | '\\')) => {
                        self.pos += 2;
                        push_literal(parts, n, Quote::Double);
                    }
                    _ => {
                        self.pos += 1;
                        push_literal(parts, '\\', Quote::Double);
                    }
                },
                Some('$') => self.dollar(Quote::Double, parts)?,
                Some('`') => {
                    let part = self.backquote(Quote::Double)?;
                    parts.push(part);
                }
                Some(c) => {
                    self.bump();
                    push_literal(parts, c, Quote::Double);
                }
            }
        }
        if parts.len() == before {
            parts.push(WordPart::Literal { text: String::new(), quote: Quote::Double });
        }
        Ok(())
    }

    /// ヒアドキュメント本体と算術式: `$`、`` ` ``、`\` だけが特別な文字。
    fn expanding_text(&mut self) -> PResult<Word> {
        let mut parts = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '\\' => match self.peek_at(1) {
                    Some(n @ ('$' | '`' | '\\')) => {
                        self.pos += 2;
                        push_literal(&mut parts, n, Quote::Single);
                    }
                    Some('\n') => {
                        self.pos += 2;
                        self.line += 1;
                    }
                    _ => {
                        self.pos += 1;
                        push_literal(&mut parts, '\\', Quote::Double);
                    }
                },
                '$' => self.dollar(Quote::Double, &mut parts)?,
                '`' => {
                    let part = self.backquote(Quote::Double)?;
                    parts.push(part);
                }
                _ => {
                    self.bump();
                    push_literal(&mut parts, c, Quote::Double);
                }
            }
        }
        Ok(Word { parts })
    }

    fn dollar(&mut self, quote: Quote, parts: &mut Vec<WordPart>) -> PResult<()> {
        match self.peek_at(1) {
            Some('(') if self.peek_at(2) == Some('(') && self.arith_end(self.pos + 3).is_some() => {
                let end = self.arith_end(self.pos + 3).unwrap_or(self.pos + 3);
                let text: String = self.chars[self.pos + 3..end].iter().collect();
                let line = self.line;
                self.line += text.matches('\n').count();
                self.pos = end + 2;
                let mut sub = Parser::with_line(&text, line);
                sub.aliases = self.aliases.clone();
                let expr = sub.expanding_text()?;
                parts.push(WordPart::Arithmetic { expr, quote });
            }
            Some('(') => {
                self.pos += 2;
                self.skip_linebreaks()?;
                let program = if self.peek() == Some(')') {
                    CommandList::default()
                } else {
                    self.compound_list()?
                };
                self.skip_linebreaks()?;
                match self.peek() {
                    Some(')') => self.pos += 1,
                    None => return Err(self.eof_error()),
                    Some(_) => return Err(self.unexpected()),
                }
                parts.push(WordPart::CommandSubst { program: Rc::new(program), quote });
            }
            Some('{') => {
                self.pos += 2;
                let param = self.braced_param(quote)?;
                parts.push(WordPart::Parameter { param, quote });
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.pos += 1;
                let name = self.read_name();
                parts.push(WordPart::Parameter { param: ParamExpansion { name, op: ParamOp::Plain }, quote });
            }
            Some(c) if c.is_ascii_digit() || "@*#?-$!".contains(c) => {
                self.pos += 2;
                parts.push(WordPart::Parameter {
                    param: ParamExpansion { name: c.to_string(), op: ParamOp::Plain },
                    quote,
                });
            }
            _ => {
                self.pos += 1;
                push_literal(parts, '$', quote);
            }
        }
        Ok(())
    }

    /// `$((` の直後から対応する `))` を探し、最初の `)` の位置を返す。
    fn arith_end(&self, from: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = from;
        loop {
            match *self.chars.get(i)? {
                '(' => depth += 1,
                ')' if depth == 0 => return (self.chars.get(i + 1) == Some(&')')).then_some(i),
                ')' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// `${` の直後から。名前は英数字名、数字列、特殊パラメータ 1 文字のいずれか。
    fn read_param_name(&mut self) -> Option<String> {
        match self.peek()? {
            c if c.is_ascii_alphabetic() || c == '_' => Some(self.read_name()),
            c if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                Some(self.chars[start..self.pos].iter().collect())
            }
            c if "@*#?-$!".contains(c) => {
                self.pos += 1;
                Some(c.to_string())
            }
            _ => None,
        }
    }

    fn braced_param(&mut self, quote: Quote) -> PResult<ParamExpansion> {
        let line = self.line;
        let bad = || ParseError::BadSubstitution { line };

        // ${#name}: `#` の後に名前と `}` が続く場合だけ長さ
        if self.peek() == Some('#') && !matches!(self.peek_at(1), Some('}') | None) {
            let save = self.pos;
            self.pos += 1;
            if let Some(name) = self.read_param_name() {
                if self.peek() == Some('}') {
                    self.pos += 1;
                    return Ok(ParamExpansion { name, op: ParamOp::Length });
                }
            }
            self.pos = save;
        }
        if self.peek() == Some('!') && self.peek_at(1).is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            self.pos += 1;
            let name = self.read_name();
            if self.peek() != Some('}') {
                return Err(bad());
            }
            self.pos += 1;
            return Ok(ParamExpansion { name, op: ParamOp::Indirect });
        }

        let name = self.read_param_name().ok_or_else(bad)?;
        let colon = self.peek() == Some(':');
        if colon {
            self.pos += 1;
        }
        let in_double = quote == Quote::Double;
        let op_char = match self.peek() {
            Some('}') if !colon => {
                self.pos += 1;
                return Ok(ParamExpansion { name, op: ParamOp::Plain });
            }
            Some(c @ ('-' | '=' | '?' | '+')) => c,
            Some(c @ ('#' | '%')) if !colon => c,
            None => return Err(ParseError::UnterminatedQuote { quote: '}', line }),
            _ => return Err(bad()),
        };
        self.pos += 1;
        let longest = matches!(op_char, '#' | '%') && self.peek() == Some(op_char);
        if longest {
            self.pos += 1;
        }
        // パターンは外側のダブルクォートに関係なくパターンとして扱う
        let mode = Mode::Param { in_double: in_double && !matches!(op_char, '#' | '%') };
        let word = self.read_word(mode)?;
        self.pos += 1;
        let op = match op_char {
            '-' => ParamOp::Default { colon, word },
            '=' => ParamOp::Assign { colon, word },
            '?' => ParamOp::Error { colon, word },
            '+' => ParamOp::Alternative { colon, word },
            '#' => ParamOp::TrimPrefix { longest, pattern: word },
            _ => ParamOp::TrimSuffix { longest, pattern: word },
        };
        Ok(ParamExpansion { name, op })
    }

    fn backquote(&mut self, quote: Quote) -> PResult<WordPart> {
        let line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::UnterminatedQuote { quote: '`', line }),
                Some('`') => break,
                Some('\\') => match self.peek() {
                    Some(n @ ('$' | '`' | '\\')) => {
                        self.pos += 1;
                        text.push(n);
                    }
                    Some('"') if quote == Quote::Double => {
                        self.pos += 1;
                        text.push('"');
                    }
                    _ => text.push('\\'),
                },
                Some(c) => text.push(c),
            }
        }
        let mut sub = Parser::with_line(&text, line);
        let mut program = CommandList::default();
        let aliases = self.aliases.clone();
        while let Some(list) = sub.parse_next(&aliases)? {
            program.items.extend(list.items);
        }
        Ok(WordPart::CommandSubst { program: Rc::new(program), quote })
    }
}

/// `NAME=value` 形式のワードを代入に分解する。
fn split_assignment(word: &Word) -> Option<Assignment> {
    let Some(WordPart::Literal { text, quote: Quote::Unquoted }) = word.parts.first() else {
        return None;
    };
    let eq = text.find('=')?;
    let name = &text[..eq];
    if !is_valid_name(name) {
        return None;
    }
    let mut parts = Vec::new();
    let rest = &text[eq + 1..];
    if !rest.is_empty() {
        parts.push(WordPart::Literal { text: rest.to_string(), quote: Quote::Unquoted });
    }
    parts.extend(word.parts[1..].iter().cloned());
    Some(Assignment { name: name.to_string(), value: Word { parts: apply_tilde(parts, true) } })
}

/// 先頭（代入値では `:` の直後も）のクォートされていない `~name` をチルダ展開パーツにする。
fn apply_tilde(parts: Vec<WordPart>, in_assignment: bool) -> Vec<WordPart> {
    let has_tilde = parts.iter().any(
        |p| matches!(p, WordPart::Literal { text, quote: Quote::Unquoted } if text.contains('~')),
    );
    if !has_tilde {
        return parts;
    }
    let count = parts.len();
    let mut out = Vec::with_capacity(count + 1);
    for (index, part) in parts.into_iter().enumerate() {
        let WordPart::Literal { text, quote: Quote::Unquoted } = part else {
            out.push(part);
            continue;
        };
        let is_last = index + 1 == count;
        let mut literal = String::new();
        let mut rest = text.as_str();
        let mut at_start = index == 0;
        loop {
            let prefix_ok = at_start || (in_assignment && literal.ends_with(':'));
            if prefix_ok && rest.starts_with('~') {
                let stop = rest[1..].find(|c| c == '/' || (in_assignment && c == ':'));
                let name_end = stop.map_or(rest.len(), |s| s + 1);
                // 名前がパーツ末尾まで続き、次に展開が来るならチルダ接頭辞ではない
                if stop.is_some() || is_last {
                    if !literal.is_empty() {
                        out.push(WordPart::Literal { text: std::mem::take(&mut literal), quote: Quote::Unquoted });
                    }
                    out.push(WordPart::Tilde(rest[1..name_end].to_string()));
                    rest = &rest[name_end..];
                    at_start = false;
                    continue;
                }
            }
            at_start = false;
            let mut chars = rest.chars();
            match chars.next() {
                Some(c) => {
                    literal.push(c);
                    rest = chars.as_str();
                    if !in_assignment {
                        literal.push_str(rest);
                        break;
                    }
                }
                None => break,
            }
        }
        if !literal.is_empty() {
            out.push(WordPart::Literal { text: literal, quote: Quote::Unquoted });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(input: &str) -> CommandList {
        parse(input).unwrap_or_else(|e| panic!("{input:?}: {e}"))
    }

    fn simple(list: &CommandList, item: usize) -> &SimpleCommand {
        match &list.items[item].and_or.first.commands[0] {
            Command::Simple(cmd) => cmd,
            other => panic!("not simple: {other:?}"),
        }
    }

    fn literal_words(cmd: &SimpleCommand) -> Vec<String> {
        cmd.words.iter().map(|w| w.unquoted_text()).collect()
    }

    #[test]
    fn simple_command_words() {
        let list = parse_ok("echo hello world");
        assert_eq!(literal_words(simple(&list, 0)), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn lists_and_connectors() {
        let list = parse_ok("a && b || c; d & e");
        assert_eq!(list.items.len(), 3);
        assert_eq!(list.items[0].and_or.rest.len(), 2);
        assert_eq!(list.items[0].and_or.rest[0].0, Connector::And);
        assert_eq!(list.items[0].and_or.rest[1].0, Connector::Or);
        assert!(list.items[1].background);
        assert!(!list.items[2].background);
    }

    #[test]
    fn pipeline_with_negation() {
        let list = parse_ok("! a | b | c");
        let p = &list.items[0].and_or.first;
        assert!(p.negated);
        assert_eq!(p.commands.len(), 3);
        assert_eq!(p.text, "! a | b | c");
    }

    #[test]
    fn assignments_and_redirects() {
        let list = parse_ok("A=1 B=x cmd arg 2>err >out <in");
        let cmd = simple(&list, 0);
        assert_eq!(cmd.assignments.len(), 2);
        assert_eq!(cmd.assignments[0].name, "A");
        assert_eq!(cmd.redirects.len(), 3);
        assert_eq!(cmd.redirects[0].fd, Some(2));
        assert_eq!(cmd.redirects[1].kind.default_fd(), 1);
        assert_eq!(literal_words(cmd), vec!["cmd", "arg"]);
    }

    #[test]
    fn assignment_after_command_word_is_a_word() {
        let list = parse_ok("echo A=1");
        let cmd = simple(&list, 0);
        assert!(cmd.assignments.is_empty());
        assert_eq!(literal_words(cmd), vec!["echo", "A=1"]);
    }

    #[test]
    fn quoting() {
        let list = parse_ok(r#"echo 'a b' "c $x" d\ e"#);
        let cmd = simple(&list, 0);
        assert_eq!(cmd.words.len(), 4);
        assert_eq!(
            cmd.words[1].parts,
            vec![WordPart::Literal { text: "a b".into(), quote: Quote::Single }]
        );
        assert!(matches!(
            &cmd.words[2].parts[1],
            WordPart::Parameter { quote: Quote::Double, .. }
        ));
        assert_eq!(cmd.words[3].unquoted_text(), "d e");
    }

    #[test]
    fn empty_double_quotes_make_a_part() {
        let list = parse_ok(r#"echo """#);
        assert_eq!(
            simple(&list, 0).words[1].parts,
            vec![WordPart::Literal { text: String::new(), quote: Quote::Double }]
        );
    }

    #[test]
    fn parameter_operators() {
        let list = parse_ok("echo ${x:-d} ${y=v} ${#z} ${p##*/} ${q%.c} ${!r} $1 $@ ${10}");
        let ops: Vec<ParamOp> = simple(&list, 0).words[1..]
            .iter()
            .map(|w| match &w.parts[0] {
                WordPart::Parameter { param, .. } => param.op.clone(),
                other => panic!("{other:?}"),
            })
            .collect();
        assert!(matches!(ops[0], ParamOp::Default { colon: true, .. }));
        assert!(matches!(ops[1], ParamOp::Assign { colon: false, .. }));
        assert_eq!(ops[2], ParamOp::Length);
        assert!(matches!(ops[3], ParamOp::TrimPrefix { longest: true, .. }));
        assert!(matches!(ops[4], ParamOp::TrimSuffix { longest: false, .. }));
        assert_eq!(ops[5], ParamOp::Indirect);
        assert_eq!(ops[6], ParamOp::Plain);
    }

    #[test]
    fn bad_substitution() {
        assert!(matches!(parse("echo ${x^}"), Err(ParseError::BadSubstitution { .. })));
    }

    #[test]
    fn command_substitutions() {
        let list = parse_ok("echo $(echo a; echo b) `echo c` $((1 + 2))");
        let words = &simple(&list, 0).words;
        match &words[1].parts[0] {
            WordPart::CommandSubst { program, .. } => assert_eq!(program.items.len(), 2),
            other => panic!("{other:?}"),
        }
        assert!(matches!(&words[2].parts[0], WordPart::CommandSubst { .. }));
        match &words[3].parts[0] {
            WordPart::Arithmetic { expr, .. } => assert_eq!(expr.unquoted_text(), "1 + 2"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn subshell_inside_command_substitution() {
        let list = parse_ok("echo $( (echo x) )");
        assert!(matches!(&simple(&list, 0).words[1].parts[0], WordPart::CommandSubst { .. }));
    }

    #[test]
    fn compound_commands() {
        let list = parse_ok(
            "if a; then b; elif c; then d; else e; fi\n\
             while x; do y; done\n\
             until x; do y; done\n\
             for i in 1 2 3; do echo $i; done\n\
             for j; do :; done\n\
             { a; b; } > out\n\
             (c)",
        );
        assert_eq!(list.items.len(), 7);
        match &list.items[0].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::If { branches, else_branch }, _) => {
                assert_eq!(branches.len(), 2);
                assert!(else_branch.is_some());
            }
            other => panic!("{other:?}"),
        }
        match &list.items[3].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::For { name, words, .. }, _) => {
                assert_eq!(name, "i");
                assert_eq!(words.as_ref().map(Vec::len), Some(3));
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(
            &list.items[4].and_or.first.commands[0],
            Command::Compound(CompoundCommand::For { words: None, .. }, _)
        ));
        match &list.items[5].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::BraceGroup(body), redirects) => {
                assert_eq!(body.items.len(), 2);
                assert_eq!(redirects.len(), 1);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn case_with_fallthrough() {
        let list = parse_ok("case $x in\n a|b) echo ab ;&\n (c) echo c ;;\n *) ;;\nesac");
        match &list.items[0].and_or.first.commands[0] {
            Command::Compound(CompoundCommand::Case { items, .. }, _) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].patterns.len(), 2);
                assert_eq!(items[0].terminator, CaseTerminator::FallThrough);
                assert_eq!(items[1].terminator, CaseTerminator::Break);
                assert!(items[2].body.is_empty());
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn function_definition() {
        let list = parse_ok("greet() { echo hi; } 2>/dev/null");
        match &list.items[0].and_or.first.commands[0] {
            Command::FunctionDef(def) => {
                assert_eq!(def.name, "greet");
                assert!(matches!(&*def.body, Command::Compound(_, r) if r.len() == 1));
            }
            other => panic!("{other:?}"),
        }
        assert!(parse("f() echo hi").is_err());
    }

    #[test]
    fn here_documents() {
        let list = parse_ok("cat <<EOF; cat <<-'END'\nhello $name\nEOF\n\tliteral $x\n\tEND\necho after");
        assert_eq!(list.items.len(), 3);
        let first = simple(&list, 0);
        match &first.redirects[0].kind {
            RedirKind::HereDoc(doc) => {
                assert!(doc.expand);
                let body = doc.body.get().unwrap();
                assert!(body.parts.iter().any(|p| matches!(p, WordPart::Parameter { .. })));
            }
            other => panic!("{other:?}"),
        }
        match &simple(&list, 1).redirects[0].kind {
            RedirKind::HereDoc(doc) => {
                assert!(!doc.expand);
                assert_eq!(doc.body.get().unwrap().unquoted_text(), "literal $x\n");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn dup_and_close_redirects() {
        let list = parse_ok("cmd 2>&1 3<&- 4<>f >|g");
        let r = &simple(&list, 0).redirects;
        assert!(matches!(&r[0].kind, RedirKind::Dup { output: true, .. }));
        assert_eq!(r[0].fd, Some(2));
        assert!(matches!(&r[1].kind, RedirKind::Dup { output: false, target } if target.unquoted_text() == "-"));
        assert!(matches!(&r[2].kind, RedirKind::File { mode: FileMode::ReadWrite, .. }));
        assert!(matches!(&r[3].kind, RedirKind::File { mode: FileMode::Clobber, .. }));
    }

    #[test]
    fn named_fd_is_rejected() {
        assert!(matches!(parse("exec {fd}>file"), Err(ParseError::Invalid { .. })));
    }

    #[test]
    fn tilde_prefixes() {
        let list = parse_ok("echo ~ ~user/x a~ '~'\nP=~/bin:~/lib");
        let words = &simple(&list, 0).words;
        assert_eq!(words[1].parts, vec![WordPart::Tilde(String::new())]);
        assert_eq!(words[2].parts[0], WordPart::Tilde("user".into()));
        assert!(!words[3].parts.iter().any(|p| matches!(p, WordPart::Tilde(_))));
        assert!(!words[4].parts.iter().any(|p| matches!(p, WordPart::Tilde(_))));
        let assign = &simple(&list, 1).assignments[0];
        let tildes = assign.value.parts.iter().filter(|p| matches!(p, WordPart::Tilde(_))).count();
        assert_eq!(tildes, 2);
    }

    #[test]
    fn comments_and_continuations() {
        let list = parse_ok("echo a # comment\necho \\\n b");
        assert_eq!(list.items.len(), 2);
        assert_eq!(literal_words(simple(&list, 1)), vec!["echo", "b"]);
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(parse("if true; then"), Err(ParseError::UnexpectedEof { .. })));
        assert!(matches!(parse("echo 'abc"), Err(ParseError::UnterminatedQuote { quote: '\'', .. })));
        assert!(matches!(parse("fi"), Err(ParseError::Unexpected { .. })));
        assert!(matches!(parse("a && "), Err(ParseError::UnexpectedEof { .. })));
        assert!(matches!(parse("cat <<EOF\nno end"), Err(ParseError::HereDocEof { .. })));
        assert!(matches!(parse("echo )"), Err(ParseError::Unexpected { .. })));
    }

    #[test]
    fn line_numbers() {
        let list = parse_ok("a\n\nb\nc");
        assert_eq!(list.items[2].and_or.first.line, 4);
        assert_eq!(simple(&list, 1).line, 3);
    }

    #[test]
    fn aliases_apply_in_command_position() {
        let mut aliases = AliasStore::new();
        aliases.set("ll", "ls -l").unwrap();
        aliases.set("ls", "ls -F").unwrap();
        aliases.set("nice", "command ").unwrap();
        let mut p = Parser::new("ll dir; echo ll\nnice ll");
        let first = p.parse_next(&aliases).unwrap().unwrap();
        assert_eq!(literal_words(simple(&first, 0)), vec!["ls", "-F", "-l", "dir"]);
        assert_eq!(literal_words(simple(&first, 1)), vec!["echo", "ll"]);
        let second = p.parse_next(&aliases).unwrap().unwrap();
        assert_eq!(literal_words(simple(&second, 0)), vec!["command", "ls", "-F", "-l"]);
        assert!(p.parse_next(&aliases).unwrap().is_none());
    }

    #[test]
    fn incremental_input_waits_for_more() {
        let aliases = AliasStore::new();
        let mut p = Parser::incremental();
        p.feed("if true\n");
        assert!(p.parse_next(&aliases).unwrap_err().is_incomplete());
        p.feed("then echo yes\n");
        assert!(p.parse_next(&aliases).unwrap_err().is_incomplete());
        p.feed("fi\n");
        let list = p.parse_next(&aliases).unwrap().unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(p.last_text(), "if true\nthen echo yes\nfi");
        assert!(p.parse_next(&aliases).unwrap().is_none());

        p.feed("cat <<E\n");
        assert!(p.parse_next(&aliases).unwrap_err().is_incomplete());
        p.feed("body\nE\n");
        assert!(p.parse_next(&aliases).unwrap().is_some());
    }

    #[test]
    fn incremental_line_without_newline_needs_finish() {
        let aliases = AliasStore::new();
        let mut p = Parser::incremental();
        p.feed("echo a");
        assert!(p.parse_next(&aliases).is_err());
        p.finish();
        assert!(p.parse_next(&aliases).unwrap().is_some());
    }
}
