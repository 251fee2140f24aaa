/// エラー型定義
///
/// Domain層の統一エラー型。thiserrorを使用して型安全なエラー処理を提供します。
///
/// # 設計方針
/// - unwrap()の使用を禁止し、明示的なエラーハンドリングを強制
/// - Result型でエラー伝播を明示化
/// - 回復可能性をエラー型で表現（DeviceNotAvailable vs LoopHalted）
use thiserror::Error;

/// Domain層の統一エラー型
#[allow(dead_code)]
#[derive(Error, Debug)]
pub enum DomainError {
    /// 物理コントローラ読み取りのエラー
    #[error("Physical pad error: {0}")]
    PhysicalPad(String),

    /// 仮想コントローラシンクのエラー
    #[error("Virtual pad error: {0}")]
    VirtualPad(String),

    /// 設定関連のエラー
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// プロファイル・パターン永続化のエラー
    #[error("Profile store error: {0}")]
    ProfileStore(String),

    /// モード遷移の失敗（検証却下・ハンドラエラー）
    ///
    /// 遷移は拒否またはロールバックされ、プロセスは前のモードで継続する。
    #[error("Mode transition failed: {0}")]
    ModeTransition(String),

    /// デバイス一時不可（Recoverable）
    ///
    /// スロットからデータが取れない等、次回ポーリングで復旧し得るエラー。
    #[error("Device temporarily unavailable")]
    DeviceNotAvailable,

    /// ポーリングループの停止（連続エラー上限超過）
    ///
    /// ループは停止し切断として報告されるが、ホストプロセスは継続する。
    #[error("Polling loop halted after {0} consecutive errors")]
    LoopHalted(u32),

    /// リソース不足エラー（キュー満杯等）
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// その他のエラー
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Domain層の統一Result型
pub type DomainResult<T> = Result<T, DomainError>;
