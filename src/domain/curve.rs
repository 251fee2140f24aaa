//! カーブマッピング
//!
//! 生のマウスデルタ → 正規化スティックベクトル変換。
//! 純粋な数値変換と、インスタンス1つ分の平滑化メモリのみを持つ。
//! エラー条件は存在しない。

use crate::domain::config::StickCurveConfig;
use crate::domain::types::STICK_MAX;

/// マッパー1つが排他所有する平滑化メモリ
///
/// モード終了時および入力アイドルタイムアウト時にリセットされる。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CurveSmoothingState {
    /// EMA平滑化の前回値（X）
    pub ema_x: f32,
    /// EMA平滑化の前回値（Y）
    pub ema_y: f32,
    /// 前回のradial振幅（速度ゲイン計算用）
    pub last_r: f32,
}

/// マウスデルタ → スティックベクトル変換器
#[derive(Debug, Clone)]
pub struct StickCurveMapper {
    config: StickCurveConfig,
    state: CurveSmoothingState,
}

impl StickCurveMapper {
    pub fn new(config: StickCurveConfig) -> Self {
        Self {
            config,
            state: CurveSmoothingState::default(),
        }
    }

    /// 現在のカーブ設定
    pub fn config(&self) -> &StickCurveConfig {
        &self.config
    }

    /// カーブ設定を置き換える（プロファイル切り替え）
    ///
    /// 平滑化メモリは保持する。モード内での切り替えで出力が飛ばないようにするため。
    pub fn set_config(&mut self, config: StickCurveConfig) {
        self.config = config;
    }

    /// 平滑化メモリをゼロクリアする
    ///
    /// モード終了時・入力アイドル時に呼び出し、残留ドリフトを防ぐ。
    pub fn reset_smoothing(&mut self) {
        self.state = CurveSmoothingState::default();
    }

    /// 生のマウスデルタをスティック座標へ変換する
    ///
    /// # 変換ステップ（順序固定）
    /// 1. 感度・軸スケール適用
    /// 2. radial振幅を計算し、ジッタ床未満ならゼロ化
    /// 3. 速度ゲイン（radial速度変化に比例した増幅）
    /// 4. 正規化 + Expoカーブ（ease-out）
    /// 5. アンチデッドゾーン
    /// 6. 単位ベクトルから再構成
    /// 7. ゼロ入力時はlast_rもゼロ化
    /// 8. EMA平滑化（radial分岐をスキップした場合も常に適用）
    /// 9. 円形クランプ（振幅 <= max_speed）
    /// 10. signed 16-bitへ量子化。Y軸の符号反転はここでのみ行う
    pub fn to_stick(&mut self, dx: f32, dy: f32) -> (i16, i16) {
        let cfg = self.config;
        let sens = cfg.sensitivity / 50.0;

        let mut x = dx * sens * cfg.scale_x;
        let mut y = dy * sens * cfg.scale_y;

        let mut r = (x * x + y * y).sqrt();
        if r < cfg.jitter_floor {
            x = 0.0;
            y = 0.0;
            r = 0.0;
        }

        if r > 0.0 {
            let ux = x / r;
            let uy = y / r;

            let velocity = (r - self.state.last_r).abs();
            let gain = 1.0 + cfg.velocity_gain * velocity.clamp(0.0, cfg.velocity_cap);
            r *= gain;
            self.state.last_r = r;

            let mut rn = (r / cfg.max_speed).clamp(0.0, 1.0);
            if cfg.expo > 0.0 {
                // ease-out: 中心付近の精密エイムを残し、端へ向けて加速する
                rn = rn.powf(1.0 - cfg.expo);
            }

            if rn > 0.0 {
                rn = cfg.anti_deadzone + (1.0 - cfg.anti_deadzone) * rn;
            }

            x = ux * rn * cfg.max_speed;
            y = uy * rn * cfg.max_speed;
        } else {
            self.state.last_r = 0.0;
        }

        // EMAはゼロ入力でも常に適用（減衰して中心へ戻るため）
        self.state.ema_x += cfg.smoothing_alpha * (x - self.state.ema_x);
        self.state.ema_y += cfg.smoothing_alpha * (y - self.state.ema_y);
        let mut out_x = self.state.ema_x;
        let mut out_y = self.state.ema_y;

        let magnitude = (out_x * out_x + out_y * out_y).sqrt();
        if magnitude > cfg.max_speed {
            let scale = cfg.max_speed / magnitude;
            out_x *= scale;
            out_y *= scale;
        }

        (
            quantize(out_x, cfg.max_speed),
            quantize(-out_y, cfg.max_speed),
        )
    }
}

/// 正規化してsigned 16-bitスティックレンジへ量子化する
fn quantize(value: f32, max_speed: f32) -> i16 {
    let normalized = (value / max_speed).clamp(-1.0, 1.0);
    (normalized * STICK_MAX as f32).round() as i16
}
