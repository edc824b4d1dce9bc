//! prush: フレームポリシーで実行文脈を管理する POSIX シェル
//!
//! 起動: コマンドライン解析 → 初期変数・オプション → (対話なら) ジョブ制御と
//! 起動ファイル → コマンドソースの実行 → EXIT トラップ → 終了

use std::io;

use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use prush::config::{ShellConfig, Source};
use prush::error::ShellError;
use prush::expand;
use prush::frame::{Bootstrap, Flow};
use prush::options::Options;
use prush::params::Positional;
use prush::parser;
use prush::shell::{self, Input, Shell};
use prush::signals;
use prush::sys;
use prush::variables::VarStore;

/// `PRUSH_LOG` で絞り込む tracing を標準エラーへ出す。未設定なら何も出さない。
fn init_tracing() {
    let filter = EnvFilter::try_from_env("PRUSH_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

/// 環境から変数ストアを作り、シェルが持つべき既定値を補う。
fn initial_vars() -> VarStore {
    let mut vars = VarStore::from_environ(std::env::vars_os().map(|(k, v)| {
        (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned())
    }));
    let mut defaults = vec![
        ("IFS", " \t\n".to_string(), true),
        ("PPID", sys::getppid().to_string(), true),
        ("OPTIND", "1".to_string(), true),
        ("PS1", if sys::is_root() { "# " } else { "$ " }.to_string(), false),
        ("PS2", "> ".to_string(), false),
        ("PS4", "+ ".to_string(), false),
    ];
    if let Ok(cwd) = std::env::current_dir() {
        let cwd = cwd.to_string_lossy().into_owned();
        // 環境の PWD が実際のカレントディレクトリを指していなければ置き換える
        let keep = vars.get("PWD").is_some_and(|pwd| {
            pwd.starts_with('/') && same_file(pwd, &cwd)
        });
        if !keep {
            defaults.push(("PWD", cwd, true));
        }
    }
    for (name, value, force) in defaults {
        if force || !vars.is_set(name) {
            let _ = vars.set(name, value);
        }
    }
    vars
}

fn same_file(a: &str, b: &str) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(x), Ok(y)) => x.dev() == y.dev() && x.ino() == y.ino(),
        _ => false,
    }
}

/// 対話シェルの起動ファイル。存在しないファイルは黙って飛ばす。
fn startup_files(shell: &mut Shell) -> Vec<String> {
    let mut files = vec!["/etc/prushrc".to_string()];
    match shell.var("ENV") {
        Some(env) => {
            let expanded = parser::parse_text(&env)
                .ok()
                .and_then(|word| expand::expand_string(shell, &word).ok());
            if let Some(path) = expanded.filter(|p| !p.is_empty()) {
                files.push(path);
            }
        }
        None => {
            if let Some(home) = shell.var("HOME") {
                files.push(format!("{home}/.prushrc"));
            }
        }
    }
    files
}

/// 起動ファイルを順に `.` する。`exit` されたらその終了ステータスを返す。
fn run_startup(shell: &mut Shell) -> Option<i32> {
    for path in startup_files(shell) {
        let Ok(text) = std::fs::read_to_string(&path) else { continue };
        debug!(path = %path, "startup file");
        if let Some(Flow::Exit(n)) = shell.run_dot(&path, &text, None).flow {
            return Some(n);
        }
    }
    None
}

/// スクリプトファイルを読む。見つからなければ 127、読めなければ 126。
fn read_script(path: &str) -> Result<String, (ShellError, i32)> {
    std::fs::read_to_string(path).map_err(|e| {
        let status = if e.kind() == io::ErrorKind::NotFound { 127 } else { 126 };
        (ShellError::Io(e), status)
    })
}

fn run(shell: &mut Shell, source: &Source) -> i32 {
    let outcome = match source {
        Source::Command(text) => shell.run_source(Input::Text { text: text.as_str(), line: 1 }, true),
        Source::Script(path) => match read_script(path) {
            Ok(text) => shell.run_source(Input::Text { text: &text, line: 1 }, true),
            Err((e, status)) => {
                eprintln!("{}: {path}: {e}", shell::NAME);
                return status;
            }
        },
        Source::Stdin => shell.run_source(Input::Fd(libc::STDIN_FILENO), true),
    };
    match outcome.flow {
        Some(Flow::Exit(n)) => n,
        _ => outcome.status,
    }
}

fn main() {
    init_tracing();

    // Rust ランタイムは SIGPIPE を無視に設定するため、子に引き継がれる前に既定へ戻す
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let argv: Vec<String> = std::env::args_os().map(|a| a.to_string_lossy().into_owned()).collect();
    let config = match ShellConfig::from_args(argv) {
        Ok(config) => config,
        Err(e) => e.exit(),
    };
    debug!(source = ?config.source, interactive = config.interactive, "startup");

    let mut options = Options::default();
    for &(opt, on) in &config.options {
        options.set(opt, on);
    }
    let source_name = match &config.source {
        Source::Script(path) => Some(path.clone()),
        _ => None,
    };
    let boot = Bootstrap {
        vars: initial_vars(),
        positional: Positional::new(config.arg0.clone(), config.params.clone()),
        options,
        source_name,
        ignored_at_entry: signals::ignored_at_startup(),
    };
    let mut shell = Shell::new(boot, config.interactive);
    signals::watch_children(shell.frames.ignored_at_entry());

    if config.interactive {
        if shell.job_control() {
            shell.init_job_control();
        } else {
            signals::setup_interactive(shell.frames.ignored_at_entry());
        }
        if let Some(status) = run_startup(&mut shell) {
            std::process::exit(shell.finish(status));
        }
    }

    let status = run(&mut shell, &config.source);
    let status = shell.finish(status);
    std::process::exit(status);
}
