//! 起動設定: コマンドライン `prush [-abCefimnsuvx] [-o name]... [+o name]... [-c string | file] [args...]`。
//!
//! `+o name` や `+x` のような `+` 形式は clap が扱えないため、
//! 最初のオペランドより前にあるものを先に取り除いてから clap に渡す。

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use crate::options::ShellOption;
use crate::sys;

#[derive(Parser, Debug)]
#[command(name = "prush", version, about = "POSIX command shell")]
struct Cli {
    /// 最初のオペランドをコマンド文字列として実行する
    #[arg(short = 'c')]
    command: bool,
    /// 標準入力からコマンドを読む
    #[arg(short = 's')]
    stdin: bool,
    /// 対話モードを強制する
    #[arg(short = 'i')]
    interactive: bool,
    #[arg(short = 'a')]
    allexport: bool,
    #[arg(short = 'C')]
    noclobber: bool,
    #[arg(short = 'e')]
    errexit: bool,
    #[arg(short = 'f')]
    noglob: bool,
    #[arg(short = 'm')]
    monitor: bool,
    #[arg(short = 'n')]
    noexec: bool,
    #[arg(short = 'u')]
    nounset: bool,
    #[arg(short = 'v')]
    verbose: bool,
    #[arg(short = 'x')]
    xtrace: bool,
    /// `set -o name` と同じ
    #[arg(short = 'o', value_name = "NAME")]
    set_o: Vec<String>,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    operands: Vec<String>,
}

/// コマンドの読み込み元。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Command(String),
    Script(String),
    Stdin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub source: Source,
    /// `$0`
    pub arg0: String,
    pub params: Vec<String>,
    pub interactive: bool,
    /// 起動時に設定するオプション（後勝ち）。
    pub options: Vec<(ShellOption, bool)>,
}

/// `+` 形式の引数を取り除く。戻り値は (clap に渡す引数, 無効にするオプション)。
fn split_plus_forms(args: &[String]) -> Result<(Vec<String>, Vec<String>, Vec<char>), String> {
    let mut rest = Vec::with_capacity(args.len());
    let mut off_names = Vec::new();
    let mut off_letters = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--" || !(arg.starts_with('-') || arg.starts_with('+')) || arg == "-" || arg == "+" {
            break;
        }
        if arg == "+o" {
            let name = args.get(i + 1).ok_or("+o: option requires an argument")?;
            off_names.push(name.clone());
            i += 2;
            continue;
        }
        if let Some(letters) = arg.strip_prefix('+') {
            off_letters.extend(letters.chars());
            i += 1;
            continue;
        }
        rest.push(arg.clone());
        // `-c` の後はコマンド文字列
        if arg.contains('c') {
            i += 1;
            break;
        }
        // `-o name`: 値も飛ばす
        if arg.ends_with('o') {
            if let Some(value) = args.get(i + 1) {
                rest.push(value.clone());
                i += 1;
            }
        }
        i += 1;
    }
    rest.extend(args[i..].iter().cloned());
    Ok((rest, off_names, off_letters))
}

impl ShellConfig {
    /// `argv`（先頭はプログラム名）から設定を作る。
    pub fn from_args(argv: Vec<String>) -> Result<Self, clap::Error> {
        let program = argv.first().cloned().unwrap_or_else(|| "prush".to_string());
        let usage = |msg: String| Cli::command().error(ErrorKind::InvalidValue, msg);

        let (rest, off_names, off_letters) = split_plus_forms(argv.get(1..).unwrap_or_default()).map_err(|m| usage(m.to_string()))?;
        let cli = Cli::try_parse_from(std::iter::once(program.clone()).chain(rest))?;

        let mut options = Vec::new();
        let letters = [
            (cli.allexport, 'a'),
            (cli.noclobber, 'C'),
            (cli.errexit, 'e'),
            (cli.noglob, 'f'),
            (cli.monitor, 'm'),
            (cli.noexec, 'n'),
            (cli.nounset, 'u'),
            (cli.verbose, 'v'),
            (cli.xtrace, 'x'),
        ];
        for (on, letter) in letters {
            if let (true, Some(opt)) = (on, ShellOption::from_letter(letter)) {
                options.push((opt, true));
            }
        }
        for name in &cli.set_o {
            let opt = ShellOption::from_name(name).ok_or_else(|| usage(format!("{name}: invalid option name")))?;
            options.push((opt, true));
        }
        for name in &off_names {
            let opt = ShellOption::from_name(name).ok_or_else(|| usage(format!("{name}: invalid option name")))?;
            options.push((opt, false));
        }
        for letter in off_letters {
            let opt = ShellOption::from_letter(letter).ok_or_else(|| usage(format!("+{letter}: invalid option")))?;
            options.push((opt, false));
        }

        let mut operands = cli.operands.into_iter();
        let (source, arg0) = if cli.command {
            let text = operands
                .next()
                .ok_or_else(|| Cli::command().error(ErrorKind::MissingRequiredArgument, "-c: option requires an argument"))?;
            (Source::Command(text), operands.next().unwrap_or(program))
        } else if cli.stdin {
            (Source::Stdin, program)
        } else {
            match operands.next() {
                Some(path) => (Source::Script(path.clone()), path),
                None => (Source::Stdin, program),
            }
        };
        let params: Vec<String> = operands.collect();

        let interactive = cli.interactive
            || (source == Source::Stdin && sys::isatty(libc::STDIN_FILENO) && sys::isatty(libc::STDERR_FILENO));
        if interactive && !options.contains(&(ShellOption::Monitor, false)) {
            options.insert(0, (ShellOption::Monitor, true));
        }
        Ok(Self { source, arg0, params, interactive, options })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> ShellConfig {
        let argv = std::iter::once("prush").chain(args.iter().copied()).map(str::to_string).collect();
        ShellConfig::from_args(argv).unwrap()
    }

    #[test]
    fn command_string_with_name_and_args() {
        let c = parse(&["-c", "echo $0 $1", "name", "one"]);
        assert_eq!(c.source, Source::Command("echo $0 $1".into()));
        assert_eq!(c.arg0, "name");
        assert_eq!(c.params, vec!["one".to_string()]);
    }

    #[test]
    fn script_operand() {
        let c = parse(&["-e", "script.sh", "-x", "a"]);
        assert_eq!(c.source, Source::Script("script.sh".into()));
        assert_eq!(c.arg0, "script.sh");
        assert_eq!(c.params, vec!["-x".to_string(), "a".to_string()]);
        assert_eq!(c.options, vec![(ShellOption::ErrExit, true)]);
    }

    #[test]
    fn plus_forms_and_long_names() {
        let c = parse(&["-eu", "-o", "pipefail", "+o", "nounset", "+e", "-c", ":"]);
        assert_eq!(
            c.options,
            vec![
                (ShellOption::ErrExit, true),
                (ShellOption::NoUnset, true),
                (ShellOption::PipeFail, true),
                (ShellOption::NoUnset, false),
                (ShellOption::ErrExit, false),
            ]
        );
    }

    #[test]
    fn missing_command_string_is_an_error() {
        let argv = vec!["prush".to_string(), "-c".to_string()];
        assert!(ShellConfig::from_args(argv).is_err());
    }

    #[test]
    fn bad_option_name() {
        let argv = ["prush", "-o", "bogus", "-c", ":"].map(str::to_string).to_vec();
        assert!(ShellConfig::from_args(argv).is_err());
    }
}
