//! prush ライブラリ: バイナリ、ベンチマーク、結合テストからモジュールを使うために公開する。
//!
//! バイナリ本体は `main.rs`（起動処理とコマンドソースの実行）。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`config`] | コマンドライン解析（clap derive、`+o`/`+x` 形式の前処理、対話判定） |
//! | [`ast`] | 構文木（コマンドリスト、and-or、パイプライン、複合コマンド、ワード部品、リダイレクト） |
//! | [`parser`] | 構文解析（再帰下降、ヒアドキュメント、エイリアス置換、1 コマンドずつの逐次解析） |
//! | [`shell`] | 実行状態と入力ソースの駆動（プロンプト、構文エラー方針、トラップの配送） |
//! | [`frame`] | 実行フレームのスタック（ストアの共有/複製/独立、非局所脱出の決着） |
//! | [`policy`] | フレーム種別ごとのポリシー表（スコープ、fork、EXIT トラップ、脱出の可否） |
//! | [`executor`] | AST の解釈（and-or、否定、複合コマンド、関数呼び出し、errexit、xtrace） |
//! | [`process`] | パイプライン、サブシェル、コマンド置換、バックグラウンドジョブ、外部コマンド |
//! | [`expand`] | ワード展開（チルダ、パラメータ、コマンド置換、算術、フィールド分割、パス名、クォート除去） |
//! | [`arith`] | 算術式 `$(( ))` の評価（C 演算子と代入） |
//! | [`glob`] | パターン照合とパス名展開（`*`, `?`, `[...]`） |
//! | [`redirect`] | リダイレクトの適用と復元（noclobber、ヒアドキュメント、fd 複製/クローズ） |
//! | [`builtins`] | ビルトイン表（特殊/通常）と各ビルトインの実装 |
//! | [`variables`] | 変数ストア（export/readonly 属性、スナップショットと復元） |
//! | [`params`] | 位置パラメータ |
//! | [`options`] | シェルオプション（`set -e` 等） |
//! | [`functions`] | 関数定義ストア |
//! | [`aliases`] | エイリアスストア |
//! | [`traps`] | トラップストア |
//! | [`fd_table`] | シェルが使う fd の記録 |
//! | [`signals`] | シグナルの処理方法の設定と保留シグナル |
//! | [`job`] | ジョブテーブル（状態遷移、reap、通知、ジョブ指定の解決、フォアグラウンド化） |
//! | [`spawn`] | `posix_spawn` / `execve` による外部コマンド起動 |
//! | [`sys`] | libc の薄いラッパー（fd、fork、プロセスグループ） |
//! | [`error`] | レイヤーごとのエラー型（thiserror） |

pub mod aliases;
pub mod arith;
pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod expand;
pub mod fd_table;
pub mod frame;
pub mod functions;
pub mod glob;
pub mod job;
pub mod options;
pub mod params;
pub mod parser;
pub mod policy;
pub mod process;
pub mod redirect;
pub mod shell;
pub mod signals;
pub mod spawn;
pub mod sys;
pub mod traps;
pub mod variables;
