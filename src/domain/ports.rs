/// Port定義（Clean Architectureのインターフェース）
///
/// Domain層が外部実装に依存するための抽象trait。
/// Infrastructure層がこれらを実装し、Application層がDIで注入する。
/// ネットワークやワイヤプロトコルは存在せず、すべてin-processの契約。
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::domain::config::{AntiRecoilConfig, ProfileRecord, StickCurveConfig};
use crate::domain::{DomainResult, Mode, PadButton, Pattern, PhysicalPadState, TriggerSide,
    VirtualSnapshot};

/// 物理コントローラ照会ポート: プラットフォームのコントローラAPIを抽象化
pub trait PhysicalPadPort: Send + Sync {
    /// 指定スロットがAPIレベルで接続されているか
    ///
    /// # Arguments
    /// - `slot`: スロット番号（0-3）
    fn is_connected(&self, slot: u8) -> bool;

    /// スロットの全状態を取得する
    ///
    /// # Returns
    /// - `Ok(Some(state))`: 取得成功
    /// - `Ok(None)`: データなし（未接続・ポーリング空振り。次回ポーリングで再試行）
    /// - `Err(DomainError)`: 読み取りエラー
    fn try_get_state(&self, slot: u8) -> DomainResult<Option<PhysicalPadState>>;
}

/// 仮想コントローラシンクポート: エミュレートされたコントローラへの書き込みを抽象化
///
/// フィールド書き込みはすべて保留され、`submit()`でアトミックに反映される。
/// `snapshot()`は最後にsubmitされた軸・トリガー状態を返し、
/// ControllerArbitratorの自己検出除外にのみ使われる。
pub trait VirtualPadPort: Send {
    /// シンクへ接続する
    fn connect(&mut self) -> DomainResult<()>;

    /// シンクから切断する
    fn disconnect(&mut self);

    /// 接続状態を確認
    fn is_connected(&self) -> bool;

    /// ボタン状態を保留書き込み
    fn set_button(&mut self, button: PadButton, pressed: bool);

    /// トリガー値を保留書き込み（0-255）
    fn set_trigger(&mut self, side: TriggerSide, value: u8);

    /// 左スティックを保留書き込み
    fn set_left_stick(&mut self, x: i16, y: i16);

    /// 右スティックを保留書き込み
    fn set_right_stick(&mut self, x: i16, y: i16);

    /// 保留中のフィールド書き込みをまとめて反映する
    fn submit(&mut self) -> DomainResult<()>;

    /// 最後にsubmitされた軸・トリガー状態のスナップショット
    fn snapshot(&self) -> VirtualSnapshot;
}

/// 共有仮想シンク
///
/// 唯一の共有可変リソース。書き込みは常にロック下のbatch-then-submitで行い、
/// 同一モードで書き込むループは1つだけ（PassthroughLoopまたはtickコンシューマ）。
pub type SharedVirtualPad = Arc<Mutex<dyn VirtualPadPort>>;

/// クロックポート: 時刻取得を抽象化
///
/// ティック周期・遅延・減衰のロジックを実時間待ちなしでテストするための注入点。
pub trait ClockPort: Send + Sync {
    fn now(&self) -> Instant;
}

/// プロファイル/パターン永続化ポート
///
/// コアは純粋なget/setとして扱い、ロードされた値は使用前に必ず
/// `repair()`でクランプされる。修復後も検証に失敗するレコードはスキップされる。
pub trait ProfileStorePort: Send {
    /// 名前でプロファイルを取得する
    fn load_profile(&self, name: &str) -> DomainResult<Option<ProfileRecord>>;

    /// プロファイルを保存する（同名は上書き）
    fn save_profile(&mut self, profile: &ProfileRecord) -> DomainResult<()>;

    /// 保存済みパターンをすべて取得する
    fn load_patterns(&self) -> DomainResult<Vec<Pattern>>;

    /// パターンを保存する（同名は上書き）
    fn save_pattern(&mut self, pattern: &Pattern) -> DomainResult<()>;

    /// パターンを削除する
    ///
    /// # Returns
    /// 存在して削除された場合は true
    fn delete_pattern(&mut self, name: &str) -> DomainResult<bool>;
}

/// モード遷移の提案
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: Option<Mode>,
    pub to: Mode,
}

/// 遷移検証の指摘レベル
///
/// Errorのみが遷移をブロックする。Warningはログに残して続行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// 遷移検証の指摘
#[derive(Debug, Clone)]
pub struct TransitionIssue {
    pub severity: IssueSeverity,
    pub message: String,
}

impl TransitionIssue {
    #[allow(dead_code)]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            message: message.into(),
        }
    }

    #[allow(dead_code)]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == IssueSeverity::Error
    }
}

/// 検証用のシステム状態スナップショット
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSnapshot {
    /// ネイティブ入力の抑制フラグ
    pub suppression_active: bool,
    /// 仮想シンクの接続状態
    pub virtual_pad_connected: bool,
    /// 物理コントローラの存在
    pub physical_pad_present: bool,
}

/// モード遷移検証ポート（オプション）
pub trait ModeValidatorPort: Send {
    /// 提案された遷移を検証し、指摘のリストを返す
    fn validate(&self, transition: &ModeTransition, snapshot: &SystemSnapshot)
        -> Vec<TransitionIssue>;
}

/// プロファイル切り替え時に適用される設定ペア
#[derive(Debug, Clone, Copy)]
pub struct ActiveProfile {
    pub curve: StickCurveConfig,
    pub anti_recoil: AntiRecoilConfig,
}

impl From<&ProfileRecord> for ActiveProfile {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            curve: record.curve,
            anti_recoil: record.anti_recoil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_severity_blocking() {
        assert!(TransitionIssue::error("no sink").is_blocking());
        assert!(!TransitionIssue::warning("no pad yet").is_blocking());
    }

    #[test]
    fn test_active_profile_from_record() {
        let record = ProfileRecord {
            name: "default".to_string(),
            curve: StickCurveConfig::default(),
            anti_recoil: AntiRecoilConfig::default(),
        };
        let active = ActiveProfile::from(&record);
        assert_eq!(active.curve, record.curve);
        assert_eq!(active.anti_recoil, record.anti_recoil);
    }
}
