//! シェルパターン照合とパス名展開。
//!
//! ## 対応パターン
//!
//! - `*`: 0 文字以上の任意の文字にマッチ
//! - `?`: 任意の 1 文字にマッチ
//! - `[abc]` / `[a-z]` / `[[:alpha:]]`: 文字クラス
//! - `[!...]` / `[^...]`: 否定文字クラス
//! - `\c`: `c` をリテラルとして扱う
//!
//! クォートされた文字は展開側で `\` エスケープしてから渡される。
//! `case`、`${x#pat}`、パス名展開の 3 箇所がこのモジュールを共有する。
//! パス名展開では `.` で始まる名前はパターン側も `.` で始まる場合のみマッチする。

use std::fs;

// ── パターン ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum ClassItem {
    Char(char),
    Range(char, char),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Char(char),
    Any,
    Star,
    Class { negate: bool, items: Vec<ClassItem> },
}

/// パターンにエスケープされていない `*`、`?`、`[` が含まれるか。
pub fn has_glob_chars(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// パターン中で特別な意味を持つ文字をエスケープする。
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '!' | '^' | '-') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// エスケープを取り除いたリテラル文字列。
pub fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn compile(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                tokens.push(Token::Char(chars[i + 1]));
                i += 2;
            }
            '*' => {
                // 連続する * は 1 つにまとめる
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::Any);
                i += 1;
            }
            '[' => match compile_class(&chars, i + 1) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    // 閉じ括弧がない → リテラルの `[`
                    tokens.push(Token::Char('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Char(c));
                i += 1;
            }
        }
    }
    tokens
}

/// `[` の直後から文字クラスを読む。成功すれば (トークン, `]` の次の位置)。
fn compile_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start;
    let negate = matches!(chars.get(i), Some('!' | '^'));
    if negate {
        i += 1;
    }
    let mut items = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        if c == ']' && !first {
            return Some((Token::Class { negate, items }, i + 1));
        }
        first = false;
        if c == '[' && chars.get(i + 1) == Some(&':') {
            let rest = &chars[i + 2..];
            if let Some(end) = rest.windows(2).position(|w| w == [':', ']']) {
                items.push(ClassItem::Named(rest[..end].iter().collect()));
                i += 2 + end + 2;
                continue;
            }
        }
        let (lo, after) = if c == '\\' && i + 1 < chars.len() {
            (chars[i + 1], i + 2)
        } else {
            (c, i + 1)
        };
        if chars.get(after) == Some(&'-') && chars.get(after + 1).is_some_and(|&n| n != ']') {
            let (hi, next) = if chars[after + 1] == '\\' && after + 2 < chars.len() {
                (chars[after + 2], after + 3)
            } else {
                (chars[after + 1], after + 2)
            };
            items.push(ClassItem::Range(lo, hi));
            i = next;
        } else {
            items.push(ClassItem::Char(lo));
            i = after;
        }
    }
}

fn class_matches(name: &str, c: char) -> bool {
    match name {
        "alnum" => c.is_alphanumeric(),
        "alpha" => c.is_alphabetic(),
        "blank" => c == ' ' || c == '\t',
        "cntrl" => c.is_control(),
        "digit" => c.is_ascii_digit(),
        "graph" => !c.is_whitespace() && !c.is_control(),
        "lower" => c.is_lowercase(),
        "print" => !c.is_control(),
        "punct" => c.is_ascii_punctuation(),
        "space" => c.is_whitespace(),
        "upper" => c.is_uppercase(),
        "xdigit" => c.is_ascii_hexdigit(),
        _ => false,
    }
}

fn token_matches(token: &Token, c: char) -> bool {
    match token {
        Token::Char(p) => *p == c,
        Token::Any => true,
        Token::Star => true,
        Token::Class { negate, items } => {
            let hit = items.iter().any(|item| match item {
                ClassItem::Char(p) => *p == c,
                ClassItem::Range(lo, hi) => *lo <= c && c <= *hi,
                ClassItem::Named(name) => class_matches(name, c),
            });
            hit != *negate
        }
    }
}

/// トークン列が文字列全体にマッチするか。`*` はバックトラックで処理する。
fn match_tokens(tokens: &[Token], text: &[char]) -> bool {
    let (mut ti, mut ci) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ci < text.len() {
        match tokens.get(ti) {
            Some(Token::Star) => {
                star = Some((ti, ci));
                ti += 1;
            }
            Some(token) if token_matches(token, text[ci]) => {
                ti += 1;
                ci += 1;
            }
            _ => match star {
                Some((st, sc)) => {
                    ti = st + 1;
                    ci = sc + 1;
                    star = Some((st, sc + 1));
                }
                None => return false,
            },
        }
    }
    tokens[ti..].iter().all(|t| *t == Token::Star)
}

/// パターンが文字列全体にマッチするか。
pub fn matches(pattern: &str, text: &str) -> bool {
    let tokens = compile(pattern);
    let chars: Vec<char> = text.chars().collect();
    match_tokens(&tokens, &chars)
}

/// `${x#pat}` / `${x##pat}`: 前方一致を取り除いた残り。
pub fn trim_prefix<'a>(text: &'a str, pattern: &str, longest: bool) -> &'a str {
    let tokens = compile(pattern);
    let chars: Vec<char> = text.chars().collect();
    let mut cut = None;
    for n in 0..=chars.len() {
        if match_tokens(&tokens, &chars[..n]) {
            cut = Some(n);
            if !longest {
                break;
            }
        }
    }
    match cut {
        Some(n) => &text[byte_offset(text, n)..],
        None => text,
    }
}

/// `${x%pat}` / `${x%%pat}`: 後方一致を取り除いた残り。
pub fn trim_suffix<'a>(text: &'a str, pattern: &str, longest: bool) -> &'a str {
    let tokens = compile(pattern);
    let chars: Vec<char> = text.chars().collect();
    let mut cut = None;
    for start in (0..=chars.len()).rev() {
        if match_tokens(&tokens, &chars[start..]) {
            cut = Some(start);
            if !longest {
                break;
            }
        }
    }
    match cut {
        Some(n) => &text[..byte_offset(text, n)],
        None => text,
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}

// ── パス名展開 ──────────────────────────────────────────────────────

/// パターンを展開し、マッチするパスをソート済みで返す。マッチなしなら空。
pub fn expand(pattern: &str) -> Vec<String> {
    let absolute = pattern.starts_with('/');
    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Vec::new();
    }

    let mut paths: Vec<String> = vec![if absolute { "/".to_string() } else { String::new() }];
    let last = components.len() - 1;
    for (i, component) in components.iter().enumerate() {
        let mut next = Vec::new();
        for base in &paths {
            if has_glob_chars(component) {
                next.extend(expand_in_dir(base, component));
            } else {
                next.push(join(base, &unescape(component)));
            }
        }
        // 途中の要素はディレクトリでなければならない
        if i < last {
            next.retain(|p| fs::metadata(p).map(|m| m.is_dir()).unwrap_or(false));
        }
        if next.is_empty() {
            return Vec::new();
        }
        paths = next;
    }

    paths.retain(|p| fs::symlink_metadata(p).is_ok());
    if pattern.ends_with('/') {
        for p in &mut paths {
            p.push('/');
        }
    }
    paths.sort();
    paths
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// 指定ディレクトリ内でファイル名パターンにマッチするエントリを返す。
fn expand_in_dir(base: &str, component: &str) -> Vec<String> {
    let dir = if base.is_empty() { "." } else { base };
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    let tokens = compile(component);
    let explicit_dot = tokens.first() == Some(&Token::Char('.'));

    let mut matches = Vec::new();
    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') && !explicit_dot {
            continue;
        }
        let chars: Vec<char> = name.chars().collect();
        if match_tokens(&tokens, &chars) {
            matches.push(join(base, &name));
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pattern_star_suffix() {
        assert!(matches("*.txt", "hello.txt"));
        assert!(!matches("*.txt", "hello.rs"));
    }

    #[test]
    fn pattern_question_mark() {
        assert!(matches("h?llo", "hello"));
        assert!(!matches("h?llo", "hllo"));
    }

    #[test]
    fn pattern_star_in_middle() {
        assert!(matches("foo*bar", "foobazbar"));
        assert!(matches("foo*bar", "foobar"));
        assert!(!matches("foo*bar", "foobaz"));
        assert!(matches("*a*b*", "xxaxxbxx"));
    }

    #[test]
    fn pattern_empty() {
        assert!(matches("", ""));
        assert!(!matches("", "a"));
        assert!(matches("*", ""));
    }

    #[test]
    fn escaped_chars_are_literal() {
        assert!(matches("\\*", "*"));
        assert!(!matches("\\*", "x"));
        assert!(matches("a\\?", "a?"));
        assert!(!has_glob_chars("\\*\\?"));
        assert!(has_glob_chars("a\\*b*"));
        assert_eq!(escape("a*b"), "a\\*b");
        assert_eq!(unescape("a\\*b"), "a*b");
    }

    #[test]
    fn brackets() {
        assert!(matches("[abc]", "b"));
        assert!(!matches("[abc]", "d"));
        assert!(matches("[a-z]", "m"));
        assert!(!matches("[a-z]", "A"));
        assert!(matches("[!abc]", "d"));
        assert!(!matches("[^0-9]", "5"));
        assert!(matches("[]]", "]"));
        assert!(matches("[a-]", "-"));
        assert!(matches("[", "["));
    }

    #[test]
    fn named_classes() {
        assert!(matches("[[:digit:]]*", "7up"));
        assert!(!matches("[[:digit:]]*", "up"));
        assert!(matches("[[:upper:][:digit:]]", "Q"));
        assert!(matches("[![:space:]]", "x"));
    }

    #[test]
    fn trims() {
        assert_eq!(trim_prefix("a/b/c", "*/", false), "b/c");
        assert_eq!(trim_prefix("a/b/c", "*/", true), "c");
        assert_eq!(trim_suffix("file.tar.gz", ".*", false), "file.tar");
        assert_eq!(trim_suffix("file.tar.gz", ".*", true), "file");
        assert_eq!(trim_suffix("abc", "x", true), "abc");
        assert_eq!(trim_prefix("äöü", "?", false), "öü");
    }

    #[test]
    fn expand_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.rs", "a.rs", ".hidden.rs", "c.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/x.rs"), "").unwrap();
        let base = dir.path().to_str().unwrap();

        let got = expand(&format!("{base}/*.rs"));
        assert_eq!(got, vec![format!("{base}/a.rs"), format!("{base}/b.rs")]);

        let dotted = expand(&format!("{base}/.*.rs"));
        assert_eq!(dotted, vec![format!("{base}/.hidden.rs")]);

        let nested = expand(&format!("{base}/*/x.rs"));
        assert_eq!(nested, vec![format!("{base}/sub/x.rs")]);

        assert!(expand(&format!("{base}/*.zzz")).is_empty());
    }
}
