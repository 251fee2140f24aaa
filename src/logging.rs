/// ログ・トレーシング基盤
///
/// tracingを使用した統一的なログ出力。
///
/// # ビルドモードとパフォーマンス
/// - **Release ビルド**: ログ関連コードが完全にコンパイルアウトされ、ゼロランタイムオーバーヘッドを実現
/// - **Debug ビルド**: 非同期ログ（tracing-appender）で入力処理スレッドへの影響を最小化
///
/// # 設計意図
/// 2ms/3ms周期のホットループを持つため、ログ出力が変換レイテンシに影響しないように実装しています。

#[cfg(debug_assertions)]
use std::path::PathBuf;
#[cfg(debug_assertions)]
use tracing::info;
#[cfg(debug_assertions)]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログシステムを初期化
///
/// # ビルドモード別の動作
/// - **Release ビルド**: この関数自体が空関数にコンパイル最適化され、ゼロオーバーヘッド
/// - **Debug ビルド**: tracing-appenderで非同期ファイル出力（メインスレッドはメモリコピーのみ）
///
/// # Arguments
/// - `log_level`: ログレベル（"info", "debug", "trace"等）
/// - `json_format`: JSON形式で出力するか
/// - `log_dir`: ログファイル出力先（None = 標準出力）
///
/// # Returns
/// - Debug: `Some(WorkerGuard)` - プログラム終了まで保持必須（Drop時にログスレッド終了）
/// - Release: `None` - オーバーヘッドなし
///
/// # 重要
/// Debugビルドでは戻り値の`WorkerGuard`をmain関数終了まで保持する必要があります。
#[cfg(debug_assertions)]
pub fn init_logging(
    log_level: &str,
    json_format: bool,
    log_dir: Option<PathBuf>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_dir {
        Some(dir) => {
            // ファイル出力（非同期）
            std::fs::create_dir_all(&dir).expect("Failed to create log directory");

            let file_appender = tracing_appender::rolling::daily(dir, "zeds_dead_pad.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let subscriber = tracing_subscriber::registry().with(env_filter);

            let result = if json_format {
                subscriber
                    .with(fmt::layer().json().with_writer(non_blocking))
                    .try_init()
            } else {
                subscriber
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_line_number(true)
                            .with_ansi(false) // ファイル出力時はANSIエスケープ無効
                            .with_writer(non_blocking),
                    )
                    .try_init()
            };

            if result.is_err() {
                return None;
            }

            info!(
                "Logging initialized (async file): level={}, format={}",
                log_level,
                if json_format { "json" } else { "text" }
            );
            Some(guard)
        }
        None => {
            // 標準出力（デバッグ用）
            let subscriber = tracing_subscriber::registry().with(env_filter);

            let result = if json_format {
                subscriber.with(fmt::layer().json()).try_init()
            } else {
                subscriber
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_line_number(true),
                    )
                    .try_init()
            };

            if result.is_ok() {
                info!(
                    "Logging initialized (stdout): level={}, format={}",
                    log_level,
                    if json_format { "json" } else { "text" }
                );
            }
            None
        }
    }
}

/// Release ビルド時のスタブ実装
#[cfg(not(debug_assertions))]
pub fn init_logging(
    _log_level: &str,
    _json_format: bool,
    _log_dir: Option<std::path::PathBuf>,
) -> Option<()> {
    // Release ビルド時は何もしない（ランタイムオーバーヘッドなし）
    None
}
