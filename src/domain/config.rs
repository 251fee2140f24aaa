//! 設定管理
//!
//! TOML設定ファイルの読み込みとDomain型への変換。
//! すべての数値フィールドは代入時（ロード時・セッター）にクランプされ、
//! 読み取り時には検証しない。修復しきれないプロファイルはスキップされる。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::{DomainError, DomainResult, Mode};

/// f32フィールドを範囲内にクランプし、修復した場合はカウントする
fn clamp_field(value: &mut f32, min: f32, max: f32, repaired: &mut u32) {
    let clamped = if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    };
    if clamped != *value {
        *value = clamped;
        *repaired += 1;
    }
}

/// アプリケーション設定のルート構造
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AppConfig {
    /// 起動時のモード
    #[serde(default = "default_startup_mode")]
    pub startup_mode: Mode,
    /// カーブマッピング設定（アクティブプロファイル）
    #[serde(default)]
    pub curve: StickCurveConfig,
    /// アンチリコイル設定
    #[serde(default)]
    pub anti_recoil: AntiRecoilConfig,
    /// 入力オーケストレータ設定
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// 物理パススルーループ設定
    #[serde(default)]
    pub passthrough: PassthroughConfig,
    /// コントローラ判別設定
    #[serde(default)]
    pub arbitrator: ArbitratorConfig,
}

fn default_startup_mode() -> Mode {
    Mode::Native
}

/// カーブマッピング設定
///
/// マウスデルタ → 正規化スティックベクトル変換のパラメータ。
/// アクティブプロファイルごとの不変値であり、明示的なプロファイル
/// 切り替えでのみ置き換えられる。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StickCurveConfig {
    /// 感度（50で等倍: 入力は sensitivity/50 でスケールされる）
    pub sensitivity: f32,

    /// Expoカーブ係数 [0, 1]
    ///
    /// 0で線形。大きいほど中心付近の微調整を残しつつ端へ加速する。
    pub expo: f32,

    /// アンチデッドゾーン [0, 1]
    ///
    /// 非ゼロ入力に対する正規化出力の下駄。
    pub anti_deadzone: f32,

    /// フル倒し込みに対応する速度（counts/tick）
    pub max_speed: f32,

    /// EMA平滑化係数 [0, 1]（1で平滑化なし）
    pub smoothing_alpha: f32,

    /// 速度ゲイン（radial速度変化に対する増幅率）
    pub velocity_gain: f32,

    /// 速度ゲインの入力上限
    pub velocity_cap: f32,

    /// ジッタ床（radial振幅がこれ未満なら入力をゼロ扱い）
    pub jitter_floor: f32,

    /// X軸スケール
    pub scale_x: f32,

    /// Y軸スケール
    pub scale_y: f32,
}

impl StickCurveConfig {
    pub const DEFAULT_SENSITIVITY: f32 = 50.0;
    pub const DEFAULT_EXPO: f32 = 0.35;
    pub const DEFAULT_ANTI_DEADZONE: f32 = 0.06;
    pub const DEFAULT_MAX_SPEED: f32 = 350.0;
    pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.45;
    pub const DEFAULT_VELOCITY_GAIN: f32 = 0.012;
    pub const DEFAULT_VELOCITY_CAP: f32 = 80.0;
    pub const DEFAULT_JITTER_FLOOR: f32 = 0.4;

    /// 範囲外のフィールドをクランプ修復する
    ///
    /// # Returns
    /// 修復されたフィールド数
    pub fn repair(&mut self) -> u32 {
        let mut repaired = 0;
        clamp_field(&mut self.sensitivity, 1.0, 500.0, &mut repaired);
        clamp_field(&mut self.expo, 0.0, 1.0, &mut repaired);
        clamp_field(&mut self.anti_deadzone, 0.0, 1.0, &mut repaired);
        clamp_field(&mut self.max_speed, 1.0, 100_000.0, &mut repaired);
        clamp_field(&mut self.smoothing_alpha, 0.0, 1.0, &mut repaired);
        clamp_field(&mut self.velocity_gain, 0.0, 10.0, &mut repaired);
        clamp_field(&mut self.velocity_cap, 0.0, 10_000.0, &mut repaired);
        clamp_field(&mut self.jitter_floor, 0.0, 1_000.0, &mut repaired);
        clamp_field(&mut self.scale_x, 0.01, 10.0, &mut repaired);
        clamp_field(&mut self.scale_y, 0.01, 10.0, &mut repaired);
        repaired
    }
}

impl Default for StickCurveConfig {
    fn default() -> Self {
        Self {
            sensitivity: Self::DEFAULT_SENSITIVITY,
            expo: Self::DEFAULT_EXPO,
            anti_deadzone: Self::DEFAULT_ANTI_DEADZONE,
            max_speed: Self::DEFAULT_MAX_SPEED,
            smoothing_alpha: Self::DEFAULT_SMOOTHING_ALPHA,
            velocity_gain: Self::DEFAULT_VELOCITY_GAIN,
            velocity_cap: Self::DEFAULT_VELOCITY_CAP,
            jitter_floor: Self::DEFAULT_JITTER_FLOOR,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// アンチリコイル設定
///
/// 係数はすべて代入時にクランプされる（読み取り時には検証しない）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AntiRecoilConfig {
    /// 補正を有効にするか
    pub enabled: bool,

    /// 補正強度 [0, 1]
    pub strength: f32,

    /// 射撃開始から補正開始までの遅延（ミリ秒）
    pub activation_delay_ms: u64,

    /// 垂直方向の補正対象閾値（これ以下のdyは補正しない）
    pub vertical_threshold: f32,

    /// 水平補正比率 [0, 1]
    pub horizontal_ratio: f32,

    /// 適応補正（直近の垂直移動平均で強度をスケール）
    pub adaptive: bool,

    /// 1ティックあたりの補正上限
    pub max_tick_compensation: f32,

    /// セッション累積補正の上限
    pub max_total_compensation: f32,

    /// 補正適用後のクールダウン（ミリ秒）
    pub cooldown_ms: u64,

    /// 非補正時の累積減衰量（1ミリ秒あたり）
    pub decay_per_ms: f32,
}

impl AntiRecoilConfig {
    pub const DEFAULT_STRENGTH: f32 = 0.5;
    pub const DEFAULT_ACTIVATION_DELAY_MS: u64 = 80;
    pub const DEFAULT_VERTICAL_THRESHOLD: f32 = 2.0;
    pub const DEFAULT_HORIZONTAL_RATIO: f32 = 0.15;
    pub const DEFAULT_MAX_TICK_COMPENSATION: f32 = 12.0;
    pub const DEFAULT_MAX_TOTAL_COMPENSATION: f32 = 480.0;
    pub const DEFAULT_DECAY_PER_MS: f32 = 0.05;

    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// 強度を設定（[0, 1]にクランプ）
    #[allow(dead_code)]
    pub fn set_strength(&mut self, value: f32) {
        self.strength = sanitize(value).clamp(0.0, 1.0);
    }

    /// 水平補正比率を設定（[0, 1]にクランプ）
    #[allow(dead_code)]
    pub fn set_horizontal_ratio(&mut self, value: f32) {
        self.horizontal_ratio = sanitize(value).clamp(0.0, 1.0);
    }

    /// 垂直閾値を設定（非負にクランプ）
    #[allow(dead_code)]
    pub fn set_vertical_threshold(&mut self, value: f32) {
        self.vertical_threshold = sanitize(value).max(0.0);
    }

    /// ティック上限を設定（非負にクランプ）
    #[allow(dead_code)]
    pub fn set_max_tick_compensation(&mut self, value: f32) {
        self.max_tick_compensation = sanitize(value).max(0.0);
    }

    /// 累積上限を設定（非負にクランプ）
    #[allow(dead_code)]
    pub fn set_max_total_compensation(&mut self, value: f32) {
        self.max_total_compensation = sanitize(value).max(0.0);
    }

    /// 減衰率を設定（非負にクランプ）
    #[allow(dead_code)]
    pub fn set_decay_per_ms(&mut self, value: f32) {
        self.decay_per_ms = sanitize(value).max(0.0);
    }

    /// 範囲外のフィールドをクランプ修復する
    ///
    /// # Returns
    /// 修復されたフィールド数
    pub fn repair(&mut self) -> u32 {
        let mut repaired = 0;
        clamp_field(&mut self.strength, 0.0, 1.0, &mut repaired);
        clamp_field(&mut self.vertical_threshold, 0.0, 1_000.0, &mut repaired);
        clamp_field(&mut self.horizontal_ratio, 0.0, 1.0, &mut repaired);
        clamp_field(
            &mut self.max_tick_compensation,
            0.0,
            10_000.0,
            &mut repaired,
        );
        clamp_field(
            &mut self.max_total_compensation,
            0.0,
            1_000_000.0,
            &mut repaired,
        );
        clamp_field(&mut self.decay_per_ms, 0.0, 100.0, &mut repaired);
        repaired
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl Default for AntiRecoilConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: Self::DEFAULT_STRENGTH,
            activation_delay_ms: Self::DEFAULT_ACTIVATION_DELAY_MS,
            vertical_threshold: Self::DEFAULT_VERTICAL_THRESHOLD,
            horizontal_ratio: Self::DEFAULT_HORIZONTAL_RATIO,
            adaptive: true,
            max_tick_compensation: Self::DEFAULT_MAX_TICK_COMPENSATION,
            max_total_compensation: Self::DEFAULT_MAX_TOTAL_COMPENSATION,
            cooldown_ms: 0,
            decay_per_ms: Self::DEFAULT_DECAY_PER_MS,
        }
    }
}

/// 入力オーケストレータ設定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct OrchestratorConfig {
    /// 入力イベントキューの容量（満杯時は最古を破棄）
    pub queue_capacity: usize,

    /// ティック間隔（ミリ秒）
    ///
    /// デフォルト: 2ms = 500Hz
    pub tick_interval_ms: u64,

    /// 入力アイドルでカーブ平滑化をリセットするまでの時間（ミリ秒）
    pub idle_reset_ms: u64,
}

impl OrchestratorConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 2;
    pub const DEFAULT_IDLE_RESET_MS: u64 = 500;

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_reset(&self) -> Duration {
        Duration::from_millis(self.idle_reset_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            tick_interval_ms: Self::DEFAULT_TICK_INTERVAL_MS,
            idle_reset_ms: Self::DEFAULT_IDLE_RESET_MS,
        }
    }
}

/// 物理パススルーループ設定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct PassthroughConfig {
    /// ポーリング間隔（ミリ秒）
    ///
    /// デフォルト: 3ms ≈ 300Hz
    pub poll_interval_ms: u64,

    /// データなし時の待機時間（ミリ秒）
    pub no_data_interval_ms: u64,

    /// エラー時の待機時間（ミリ秒）
    pub error_interval_ms: u64,

    /// 連続エラー上限（超過でループ停止・切断報告）
    pub max_consecutive_errors: u32,

    /// 仮想シンク接続リトライの待機時間（ミリ秒）
    pub connect_retry_delay_ms: u64,

    /// 仮想シンク接続リトライ回数
    pub connect_retry_count: u32,

    /// 停止時のjoin待機上限（ミリ秒）
    pub join_timeout_ms: u64,
}

impl PassthroughConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3;
    pub const DEFAULT_NO_DATA_INTERVAL_MS: u64 = 150;
    pub const DEFAULT_ERROR_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;
    pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 250;
    pub const DEFAULT_CONNECT_RETRY_COUNT: u32 = 4;
    pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 1_000;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn no_data_interval(&self) -> Duration {
        Duration::from_millis(self.no_data_interval_ms)
    }

    pub fn error_interval(&self) -> Duration {
        Duration::from_millis(self.error_interval_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            no_data_interval_ms: Self::DEFAULT_NO_DATA_INTERVAL_MS,
            error_interval_ms: Self::DEFAULT_ERROR_INTERVAL_MS,
            max_consecutive_errors: Self::DEFAULT_MAX_CONSECUTIVE_ERRORS,
            connect_retry_delay_ms: Self::DEFAULT_CONNECT_RETRY_DELAY_MS,
            connect_retry_count: Self::DEFAULT_CONNECT_RETRY_COUNT,
            join_timeout_ms: Self::DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

/// コントローラ判別設定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct ArbitratorConfig {
    /// 追跡スロット喪失時に自動選択するか
    pub auto_select: bool,

    /// 「最近アクティブ」とみなす右スティック操作の時間窓（ミリ秒）
    pub activity_window_ms: u64,
}

impl ArbitratorConfig {
    pub const DEFAULT_ACTIVITY_WINDOW_MS: u64 = 2_000;

    pub fn activity_window(&self) -> Duration {
        Duration::from_millis(self.activity_window_ms)
    }
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            auto_select: true,
            activity_window_ms: Self::DEFAULT_ACTIVITY_WINDOW_MS,
        }
    }
}

/// 名前付きプロファイルのレコード（ストア経由でJSON永続化される形）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileRecord {
    pub name: String,
    pub curve: StickCurveConfig,
    pub anti_recoil: AntiRecoilConfig,
}

impl ProfileRecord {
    /// ロードした値をフィールド単位でクランプ修復する
    pub fn repair(&mut self) -> u32 {
        self.curve.repair() + self.anti_recoil.repair()
    }
}

impl AppConfig {
    /// TOMLファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> DomainResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DomainError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content)
            .map_err(|e| DomainError::Configuration(format!("Failed to parse config file: {}", e)))
    }

    /// デフォルト設定をTOMLファイルに書き出す
    #[allow(dead_code)]
    pub fn write_default<P: AsRef<Path>>(path: P) -> DomainResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config).map_err(|e| {
            DomainError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content)
            .map_err(|e| DomainError::Configuration(format!("Failed to write config file: {}", e)))
    }

    /// 範囲外の値をフィールド単位でクランプ修復する
    ///
    /// # Returns
    /// 修復されたフィールド数
    pub fn repair(&mut self) -> u32 {
        self.curve.repair() + self.anti_recoil.repair()
    }

    /// 設定の妥当性を検証
    ///
    /// repair()後にも成立しない構造的な問題のみエラーにする。
    pub fn validate(&self) -> DomainResult<()> {
        if self.orchestrator.queue_capacity == 0 {
            return Err(DomainError::Configuration(
                "Orchestrator queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.orchestrator.tick_interval_ms == 0 {
            return Err(DomainError::Configuration(
                "Orchestrator tick interval must be greater than 0".to_string(),
            ));
        }
        if self.passthrough.poll_interval_ms == 0 {
            return Err(DomainError::Configuration(
                "Passthrough poll interval must be greater than 0".to_string(),
            ));
        }
        if self.passthrough.max_consecutive_errors == 0 {
            return Err(DomainError::Configuration(
                "Passthrough max consecutive errors must be greater than 0".to_string(),
            ));
        }
        if self.curve.max_speed <= 0.0 {
            return Err(DomainError::Configuration(
                "Curve max speed must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
