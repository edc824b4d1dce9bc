//! ワード展開: チルダ、パラメータ、コマンド置換、算術、フィールド分割、パス名展開、クォート除去。
//!
//! 展開結果はいったん「文字 + 属性」の列（[`Piece`]）として組み立て、
//! 用途に応じて仕上げる。
//!
//! | 関数 | 用途 | 分割 | glob |
//! |------|------|------|------|
//! | [`expand_words`] | コマンドワード、`for` のリスト | ○ | ○ |
//! | [`expand_string`] | 代入値、リダイレクト先、ヒアドキュメント、`case` の対象 | – | – |
//! | [`expand_pattern`] | `case` のパターン、`${x#pat}` | – | パターンとして返す |
//!
//! クォートされていた文字は分割・glob の対象にならない。

use crate::arith::{self, Variables};
use crate::ast::{CommandList, ParamExpansion, ParamOp, Quote, Word, WordPart};
use crate::error::ExpandError;
use crate::glob;
use crate::options::ShellOption;
use crate::parser;
use crate::process;
use crate::shell::Shell;
use crate::sys;
use crate::variables::is_valid_name;

type EResult<T> = Result<T, ExpandError>;

pub const DEFAULT_IFS: &str = " \t\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    Ch { c: char, quoted: bool, splittable: bool },
    /// `"$@"` の要素境界。常にフィールドを区切る。
    Break,
    /// 空でも 1 フィールドとして残す（`""`、`"$empty"`）。
    Keep,
}

fn push_str(out: &mut Vec<Piece>, text: &str, quoted: bool, splittable: bool) {
    out.extend(text.chars().map(|c| Piece::Ch { c, quoted, splittable }));
}

/// 展開結果の値を追加する。クォートされていなければ分割対象。
fn push_value(out: &mut Vec<Piece>, text: &str, quote: Quote) {
    let quoted = quote.is_quoted();
    if quoted && text.is_empty() {
        out.push(Piece::Keep);
    }
    push_str(out, text, quoted, !quoted);
}

// ── 公開 API ─────────────────────────────────────────────────────────

/// コマンドワードを全段階で展開する。
pub fn expand_words(shell: &mut Shell, words: &[Word]) -> EResult<Vec<String>> {
    let mut fields = Vec::new();
    for word in words {
        if !word.needs_expansion() && !word.needs_pathname_expansion() {
            if let Some(text) = word.as_literal() {
                fields.push(text);
                continue;
            }
        }
        let mut pieces = Vec::new();
        expand_parts(shell, word, &mut pieces)?;
        let ifs = shell.var("IFS").unwrap_or_else(|| DEFAULT_IFS.to_string());
        let noglob = shell.option(ShellOption::NoGlob);
        for field in split_fields(&pieces, &ifs) {
            glob_field(field, noglob, &mut fields);
        }
    }
    Ok(fields)
}

/// 分割も glob もせずに 1 つの文字列へ展開する。
pub fn expand_string(shell: &mut Shell, word: &Word) -> EResult<String> {
    if let (false, Some(text)) = (word.needs_expansion(), word.as_literal()) {
        return Ok(text);
    }
    let mut pieces = Vec::new();
    expand_parts(shell, word, &mut pieces)?;
    Ok(pieces
        .iter()
        .filter_map(|p| match p {
            Piece::Ch { c, .. } => Some(*c),
            Piece::Break => Some(' '),
            Piece::Keep => None,
        })
        .collect())
}

/// パターンとして展開する。クォートされていた文字はエスケープされる。
pub fn expand_pattern(shell: &mut Shell, word: &Word) -> EResult<String> {
    let mut pieces = Vec::new();
    expand_parts(shell, word, &mut pieces)?;
    let mut pattern = String::new();
    for piece in pieces {
        match piece {
            Piece::Ch { c, quoted: true, .. } => pattern.push_str(&glob::escape(&c.to_string())),
            Piece::Ch { c, .. } => pattern.push(c),
            Piece::Break => pattern.push(' '),
            Piece::Keep => {}
        }
    }
    Ok(pattern)
}

/// `PS1`/`PS2`/`PS4` を展開する。失敗したら元のテキストを使う。
pub fn expand_prompt(shell: &mut Shell, text: &str) -> String {
    match parser::parse_text(text) {
        Ok(word) => expand_string(shell, &word).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}

// ── パーツの展開 ─────────────────────────────────────────────────────

fn expand_parts(shell: &mut Shell, word: &Word, out: &mut Vec<Piece>) -> EResult<()> {
    for part in &word.parts {
        match part {
            WordPart::Literal { text, quote } => {
                if text.is_empty() && quote.is_quoted() {
                    out.push(Piece::Keep);
                }
                push_str(out, text, quote.is_quoted(), false);
            }
            WordPart::Tilde(user) => match tilde(shell, user) {
                Some(home) => {
                    if home.is_empty() {
                        out.push(Piece::Keep);
                    }
                    push_str(out, &home, true, false);
                }
                None => {
                    push_str(out, "~", true, false);
                    push_str(out, user, false, false);
                }
            },
            WordPart::Parameter { param, quote } => expand_param(shell, param, *quote, out)?,
            WordPart::CommandSubst { program, quote } => {
                let text = command_subst(shell, program)?;
                push_value(out, &text, *quote);
            }
            WordPart::Arithmetic { expr, quote } => {
                let value = arithmetic(shell, expr)?;
                push_value(out, &value.to_string(), *quote);
            }
        }
    }
    Ok(())
}

fn tilde(shell: &Shell, user: &str) -> Option<String> {
    match user {
        "" => shell.var("HOME").or_else(|| sys::home_dir(None)),
        "+" => shell.var("PWD"),
        "-" => shell.var("OLDPWD"),
        name => sys::home_dir(Some(name)),
    }
}

/// パラメータの値。未設定なら `None`。
pub fn lookup(shell: &Shell, name: &str) -> Option<String> {
    let frame = shell.frame();
    match name {
        "?" => Some(frame.last_exit_status.to_string()),
        "$" => Some(shell.pid.to_string()),
        "!" => frame.last_bg_pid.map(|pid| pid.to_string()),
        "#" => Some(frame.positional.borrow().len().to_string()),
        "-" => Some(frame.options.borrow().flags_string(shell.interactive)),
        "_" => Some(shell.last_arg.clone()),
        "@" | "*" => {
            let positional = frame.positional.borrow();
            (!positional.is_empty()).then(|| positional.params().join(" "))
        }
        n if n.bytes().all(|b| b.is_ascii_digit()) => {
            let index = n.parse::<usize>().ok()?;
            frame.positional.borrow().get(index).map(str::to_string)
        }
        _ => shell.var(name),
    }
}

fn require(shell: &Shell, name: &str, value: Option<String>) -> EResult<String> {
    match value {
        Some(v) => Ok(v),
        None if shell.option(ShellOption::NoUnset) && name != "@" && name != "*" => {
            Err(ExpandError::Unset(name.to_string()))
        }
        None => Ok(String::new()),
    }
}

/// `op` の `word` 側を使うか: 未設定、または `:` 付きで空。
fn use_word(value: &Option<String>, colon: bool) -> bool {
    match value {
        None => true,
        Some(v) => colon && v.is_empty(),
    }
}

fn expand_param(shell: &mut Shell, param: &ParamExpansion, quote: Quote, out: &mut Vec<Piece>) -> EResult<()> {
    let name = param.name.as_str();
    if param.op == ParamOp::Plain && (name == "@" || name == "*") {
        expand_all_params(shell, name, quote.is_quoted(), out);
        return Ok(());
    }
    let value = lookup(shell, name);
    match &param.op {
        ParamOp::Plain => {
            let value = require(shell, name, value)?;
            push_value(out, &value, quote);
        }
        ParamOp::Length => {
            let length = if name == "@" || name == "*" {
                shell.frame().positional.borrow().len()
            } else {
                require(shell, name, value)?.chars().count()
            };
            push_value(out, &length.to_string(), quote);
        }
        ParamOp::Indirect => {
            let target = require(shell, name, value)?;
            let value = lookup(shell, &target);
            let value = require(shell, &target, value)?;
            push_value(out, &value, quote);
        }
        ParamOp::Default { colon, word } => {
            if use_word(&value, *colon) {
                if quote.is_quoted() {
                    out.push(Piece::Keep);
                }
                expand_parts(shell, word, out)?;
            } else {
                push_value(out, value.as_deref().unwrap_or_default(), quote);
            }
        }
        ParamOp::Assign { colon, word } => {
            let value = if use_word(&value, *colon) {
                if !is_valid_name(name) {
                    return Err(ExpandError::BadSubstitution(format!("${name}: cannot assign in this way")));
                }
                let assigned = expand_string(shell, word)?;
                shell.assign(name, &assigned)?;
                assigned
            } else {
                value.unwrap_or_default()
            };
            push_value(out, &value, quote);
        }
        ParamOp::Error { colon, word } => {
            if use_word(&value, *colon) {
                let message = if word.parts.is_empty() {
                    if value.is_none() { "parameter not set" } else { "parameter null or not set" }.to_string()
                } else {
                    expand_string(shell, word)?
                };
                return Err(ExpandError::NullOrUnset { name: name.to_string(), message });
            }
            push_value(out, value.as_deref().unwrap_or_default(), quote);
        }
        ParamOp::Alternative { colon, word } => {
            if quote.is_quoted() {
                out.push(Piece::Keep);
            }
            if !use_word(&value, *colon) {
                expand_parts(shell, word, out)?;
            }
        }
        ParamOp::TrimPrefix { longest, pattern } => {
            let value = require(shell, name, value)?;
            let pattern = expand_pattern(shell, pattern)?;
            push_value(out, glob::trim_prefix(&value, &pattern, *longest), quote);
        }
        ParamOp::TrimSuffix { longest, pattern } => {
            let value = require(shell, name, value)?;
            let pattern = expand_pattern(shell, pattern)?;
            push_value(out, glob::trim_suffix(&value, &pattern, *longest), quote);
        }
    }
    Ok(())
}

/// `$@` と `$*`。`"$@"` は要素ごとに 1 フィールド、`"$*"` は IFS の先頭文字で連結した 1 フィールド。
/// 位置パラメータがなければ `"$@"` は何も生まない。
fn expand_all_params(shell: &Shell, name: &str, quoted: bool, out: &mut Vec<Piece>) {
    let params = shell.frame().positional.borrow().params().to_vec();
    if name == "*" && quoted {
        let separator = match shell.var("IFS") {
            None => " ".to_string(),
            Some(ifs) => ifs.chars().next().map(String::from).unwrap_or_default(),
        };
        out.push(Piece::Keep);
        push_str(out, &params.join(&separator), true, false);
        return;
    }
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(Piece::Break);
        }
        if quoted {
            out.push(Piece::Keep);
        }
        push_str(out, param, quoted, !quoted);
    }
}

fn command_subst(shell: &mut Shell, program: &CommandList) -> EResult<String> {
    let (output, status) = process::capture(shell, program).map_err(ExpandError::Fork)?;
    shell.subst_status = Some(status);
    shell.set_status(status);
    Ok(output)
}

struct ShellVars<'a>(&'a mut Shell);

impl Variables for ShellVars<'_> {
    fn get(&self, name: &str) -> Option<String> {
        self.0.var(name)
    }

    fn set(&mut self, name: &str, value: i64) -> Result<(), String> {
        self.0.assign(name, &value.to_string()).map_err(|e| e.to_string())
    }
}

/// 算術展開。評価に失敗したら診断を出し、ステータス 1 を記録して 0 を返す。
fn arithmetic(shell: &mut Shell, expr: &Word) -> EResult<i64> {
    let text = expand_string(shell, expr)?;
    match arith::evaluate(&text, &mut ShellVars(shell)) {
        Ok(value) => Ok(value),
        Err(e) => {
            shell.report(&ExpandError::Arith(e).to_string());
            shell.set_status(1);
            Ok(0)
        }
    }
}

// ── フィールド分割とパス名展開 ───────────────────────────────────────

fn is_ifs_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

/// IFS でフィールドに分割する。各文字はクォートされていたかを保持する。
///
/// IFS 空白の連続は 1 つの区切り（先頭と末尾では何も生まない）、
/// 空白以外の IFS 文字は 1 つごとに区切りになり、連続すれば空フィールドを生む。
fn split_fields(pieces: &[Piece], ifs: &str) -> Vec<Vec<(char, bool)>> {
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut active = false;
    let mut after_whitespace = false;
    for &piece in pieces {
        match piece {
            Piece::Ch { c, splittable: true, .. } if ifs.contains(c) => {
                if is_ifs_whitespace(c) {
                    if active {
                        fields.push(std::mem::take(&mut current));
                        active = false;
                        after_whitespace = true;
                    }
                } else {
                    if active {
                        fields.push(std::mem::take(&mut current));
                        active = false;
                    } else if !after_whitespace {
                        fields.push(Vec::new());
                    }
                    after_whitespace = false;
                }
            }
            Piece::Ch { c, quoted, .. } => {
                current.push((c, quoted));
                active = true;
                after_whitespace = false;
            }
            Piece::Keep => {
                active = true;
                after_whitespace = false;
            }
            Piece::Break => {
                if active {
                    fields.push(std::mem::take(&mut current));
                    active = false;
                }
                after_whitespace = false;
            }
        }
    }
    if active {
        fields.push(current);
    }
    fields
}

fn glob_field(field: Vec<(char, bool)>, noglob: bool, out: &mut Vec<String>) {
    let text: String = field.iter().map(|(c, _)| *c).collect();
    let has_pattern = field.iter().any(|&(c, quoted)| !quoted && matches!(c, '*' | '?' | '['));
    if noglob || !has_pattern {
        out.push(text);
        return;
    }
    let mut pattern = String::new();
    for (c, quoted) in field {
        if quoted {
            pattern.push_str(&glob::escape(&c.to_string()));
        } else {
            pattern.push(c);
        }
    }
    let matches = glob::expand(&pattern);
    if matches.is_empty() {
        out.push(text);
    } else {
        out.extend(matches);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Command;
    use crate::frame::Bootstrap;
    use crate::params::Positional;
    use pretty_assertions::assert_eq;

    fn shell_with(params: &[&str]) -> Shell {
        Shell::new(
            Bootstrap {
                positional: Positional::new("prush", params.iter().map(|s| s.to_string()).collect()),
                ..Bootstrap::default()
            },
            false,
        )
    }

    /// `echo <src>` を解析して引数ワードを取り出す。
    fn words(src: &str) -> Vec<Word> {
        let list = parser::parse(&format!("echo {src}")).unwrap();
        match &list.items[0].and_or.first.commands[0] {
            Command::Simple(cmd) => cmd.words[1..].to_vec(),
            other => panic!("{other:?}"),
        }
    }

    fn fields(shell: &mut Shell, src: &str) -> Vec<String> {
        expand_words(shell, &words(src)).unwrap()
    }

    fn split(text: &str, ifs: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        push_str(&mut pieces, text, false, true);
        split_fields(&pieces, ifs)
            .into_iter()
            .map(|f| f.into_iter().map(|(c, _)| c).collect())
            .collect()
    }

    #[test]
    fn whitespace_only_yields_no_fields() {
        assert!(split("  \t\n ", DEFAULT_IFS).is_empty());
        assert_eq!(split("  a  b ", DEFAULT_IFS), vec!["a", "b"]);
    }

    #[test]
    fn hard_separators_make_empty_fields() {
        assert_eq!(split("a::b", ":"), vec!["a", "", "b"]);
        assert_eq!(split(":a", ":"), vec!["", "a"]);
        assert_eq!(split("a:", ":"), vec!["a"]);
        assert_eq!(split("a : b", " :"), vec!["a", "b"]);
        assert_eq!(split(" :a", " :"), vec!["", "a"]);
    }

    #[test]
    fn quoted_at_with_no_params_is_empty() {
        let mut sh = shell_with(&[]);
        assert!(fields(&mut sh, r#""$@""#).is_empty());
        assert!(fields(&mut sh, "$@").is_empty());
        assert_eq!(fields(&mut sh, r#""$*""#), vec![""]);
    }

    #[test]
    fn quoted_at_keeps_each_param() {
        let mut sh = shell_with(&["a b", "", "c"]);
        assert_eq!(fields(&mut sh, r#""$@""#), vec!["a b", "", "c"]);
        assert_eq!(fields(&mut sh, "$@"), vec!["a", "b", "c"]);
        assert_eq!(fields(&mut sh, r#""x$@y""#), vec!["xa b", "", "cy"]);
        assert_eq!(fields(&mut sh, r#""$*""#), vec!["a b  c"]);
    }

    #[test]
    fn default_with_spaces_is_one_field_when_quoted() {
        let mut sh = shell_with(&[]);
        assert_eq!(fields(&mut sh, r#""${x:-default with spaces}""#), vec!["default with spaces"]);
        assert_eq!(fields(&mut sh, "${x:-default with spaces}"), vec!["default", "with", "spaces"]);
    }

    #[test]
    fn empty_quotes_and_empty_variables() {
        let mut sh = shell_with(&[]);
        sh.assign("e", "").unwrap();
        assert_eq!(fields(&mut sh, r#""" "$e" $e"#), vec!["", ""]);
    }

    #[test]
    fn parameter_operators() {
        let mut sh = shell_with(&["one", "two"]);
        sh.assign("path", "/usr/local/lib.tar.gz").unwrap();
        sh.assign("empty", "").unwrap();
        assert_eq!(fields(&mut sh, "${path##*/}"), vec!["lib.tar.gz"]);
        assert_eq!(fields(&mut sh, "${path#*/}"), vec!["usr/local/lib.tar.gz"]);
        assert_eq!(fields(&mut sh, "${path%.*}"), vec!["/usr/local/lib.tar"]);
        assert_eq!(fields(&mut sh, "${path%%.*}"), vec!["/usr/local/lib"]);
        assert_eq!(fields(&mut sh, "${#path}"), vec!["21"]);
        assert_eq!(fields(&mut sh, "${#}"), vec!["2"]);
        assert_eq!(fields(&mut sh, "$2"), vec!["two"]);
        assert_eq!(fields(&mut sh, "${empty-unset}"), Vec::<String>::new());
        assert_eq!(fields(&mut sh, "${empty:-null}"), vec!["null"]);
        assert_eq!(fields(&mut sh, "${empty:+alt}"), Vec::<String>::new());
        assert_eq!(fields(&mut sh, "${path:+alt}"), vec!["alt"]);
    }

    #[test]
    fn quoted_pattern_is_literal() {
        let mut sh = shell_with(&[]);
        sh.assign("v", "a*b").unwrap();
        assert_eq!(fields(&mut sh, r#"${v#"a*"}"#), vec!["b"]);
        assert_eq!(fields(&mut sh, r#"${v#'*'}"#), vec!["a*b"]);
    }

    #[test]
    fn assign_operator_sets_variable() {
        let mut sh = shell_with(&[]);
        assert_eq!(fields(&mut sh, "${x:=set}"), vec!["set"]);
        assert_eq!(sh.var("x").as_deref(), Some("set"));
    }

    #[test]
    fn error_operator_and_nounset() {
        let mut sh = shell_with(&[]);
        let err = expand_words(&mut sh, &words("${x:?custom message}")).unwrap_err();
        assert!(matches!(err, ExpandError::NullOrUnset { ref message, .. } if message == "custom message"));

        sh.frame().options.borrow_mut().set(ShellOption::NoUnset, true);
        assert!(matches!(
            expand_words(&mut sh, &words("$missing")),
            Err(ExpandError::Unset(_))
        ));
        assert!(expand_words(&mut sh, &words("${missing-ok}")).is_ok());
        assert!(expand_words(&mut sh, &words("\"$@\"")).is_ok());
    }

    #[test]
    fn indirect_expansion() {
        let mut sh = shell_with(&[]);
        sh.assign("target", "value").unwrap();
        sh.assign("ref", "target").unwrap();
        assert_eq!(fields(&mut sh, "${!ref}"), vec!["value"]);
    }

    #[test]
    fn arithmetic_expansion() {
        let mut sh = shell_with(&[]);
        sh.assign("n", "4").unwrap();
        assert_eq!(fields(&mut sh, "$((n * 2 + 1))"), vec!["9"]);
        assert_eq!(fields(&mut sh, "$((m = n + 1))"), vec!["5"]);
        assert_eq!(sh.var("m").as_deref(), Some("5"));
        assert_eq!(fields(&mut sh, "$((1 / 0))"), vec!["0"]);
        assert_eq!(sh.status(), 1);
    }

    #[test]
    fn tilde_uses_home() {
        let mut sh = shell_with(&[]);
        sh.assign("HOME", "/home/me").unwrap();
        assert_eq!(fields(&mut sh, "~/x"), vec!["/home/me/x"]);
        assert_eq!(fields(&mut sh, "'~'"), vec!["~"]);
    }

    #[test]
    fn custom_ifs() {
        let mut sh = shell_with(&[]);
        sh.assign("IFS", ":").unwrap();
        sh.assign("v", "a:b::c").unwrap();
        assert_eq!(fields(&mut sh, "$v"), vec!["a", "b", "", "c"]);
        sh.assign("IFS", "").unwrap();
        assert_eq!(fields(&mut sh, "$v"), vec!["a:b::c"]);
    }

    #[test]
    fn pathname_expansion() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.rs", "b.rs", "c.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let base = dir.path().to_str().unwrap();
        let mut sh = shell_with(&[]);
        assert_eq!(
            fields(&mut sh, &format!("{base}/*.rs")),
            vec![format!("{base}/a.rs"), format!("{base}/b.rs")]
        );
        assert_eq!(fields(&mut sh, &format!("{base}/*.none")), vec![format!("{base}/*.none")]);
        assert_eq!(fields(&mut sh, &format!("'{base}/*.rs'")), vec![format!("{base}/*.rs")]);
        sh.frame().options.borrow_mut().set(ShellOption::NoGlob, true);
        assert_eq!(fields(&mut sh, &format!("{base}/*.rs")), vec![format!("{base}/*.rs")]);
    }

    #[test]
    fn string_expansion_joins_without_splitting() {
        let mut sh = shell_with(&["a", "b"]);
        sh.assign("v", "x  y").unwrap();
        let word = &words("$v-$@")[0];
        assert_eq!(expand_string(&mut sh, word).unwrap(), "x  y-a b");
    }

    #[test]
    fn prompt_expansion() {
        let mut sh = shell_with(&[]);
        sh.assign("USER", "me").unwrap();
        assert_eq!(expand_prompt(&mut sh, "$USER> "), "me> ");
    }
}
