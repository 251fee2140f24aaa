//! アンチリコイル補正エンジン
//!
//! 射撃セッション中の垂直マウス移動を設定された上限の下で補正する。
//! セッションは Idle → Armed（発動遅延待ち） → Active（補正中） → Idle を遷移する。
//! 補正の数理はロック下のread-modify-writeで完結し、通知はチャネル経由で
//! ロック外のハンドラに届く。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::domain::{
    AntiRecoilConfig, ClockPort, DomainResult, Pattern, PatternSample, ProfileStorePort,
};

/// セッションの非アクティブタイムアウト（最終移動サンプルからの経過）
const SESSION_TIMEOUT: Duration = Duration::from_millis(1_000);

/// 適応平均用リングバッファの容量
const ADAPTIVE_BUFFER_CAP: usize = 10;

/// 適応スケールが効き始める最小サンプル数
const ADAPTIVE_MIN_SAMPLES: usize = 3;

/// 適応スケールの上限
const ADAPTIVE_MAX_SCALE: f32 = 2.0;

/// 垂直移動テレメトリリングの容量（診断表示用）
const TELEMETRY_CAP: usize = 120;

/// 水平補正が効き始める最小デルタ
const HORIZONTAL_MIN_DX: f32 = 1.0;

/// 補正適用通知
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompensationEvent {
    /// 適用された垂直補正量
    pub vertical: f32,
    /// 適用された水平補正量
    pub horizontal: f32,
    /// セッション累積補正量（適用後）
    pub accumulated: f32,
}

/// 進行中のパターン記録
struct PatternRecording {
    name: String,
    samples: Vec<PatternSample>,
}

/// シミュレーションの1サンプル結果
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSample {
    pub input: PatternSample,
    pub output: PatternSample,
    pub compensation: f32,
}

/// パターンシミュレーションの結果
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct PatternSimulation {
    pub samples: Vec<SimulationSample>,
    pub total_compensation: f32,
    pub compensated_samples: usize,
}

/// アンチリコイル補正エンジン
pub struct AntiRecoilEngine {
    config: AntiRecoilConfig,
    clock: Arc<dyn ClockPort>,
    store: Option<Box<dyn ProfileStorePort>>,

    // セッション状態（停止・無効化でリセット）
    shooting: bool,
    compensating: bool,
    session_started_at: Option<Instant>,
    last_movement_at: Option<Instant>,
    last_compensation_at: Option<Instant>,
    last_decay_at: Option<Instant>,
    accumulated: f32,
    last_applied: f32,
    adaptive_buffer: VecDeque<f32>,

    telemetry: VecDeque<f32>,
    recording: Option<PatternRecording>,
    subscribers: Vec<Sender<CompensationEvent>>,
}

impl AntiRecoilEngine {
    pub fn new(config: AntiRecoilConfig, clock: Arc<dyn ClockPort>) -> Self {
        let mut config = config;
        config.repair();
        Self {
            config,
            clock,
            store: None,
            shooting: false,
            compensating: false,
            session_started_at: None,
            last_movement_at: None,
            last_compensation_at: None,
            last_decay_at: None,
            accumulated: 0.0,
            last_applied: 0.0,
            adaptive_buffer: VecDeque::with_capacity(ADAPTIVE_BUFFER_CAP),
            telemetry: VecDeque::with_capacity(TELEMETRY_CAP),
            recording: None,
            subscribers: Vec::new(),
        }
    }

    /// パターン永続化先を設定する
    pub fn with_store(mut self, store: Box<dyn ProfileStorePort>) -> Self {
        self.store = Some(store);
        self
    }

    #[allow(dead_code)]
    pub fn config(&self) -> &AntiRecoilConfig {
        &self.config
    }

    /// 設定を置き換える（代入時クランプ）
    pub fn set_config(&mut self, mut config: AntiRecoilConfig) {
        config.repair();
        let was_enabled = self.config.enabled;
        self.config = config;
        if was_enabled && !self.config.enabled {
            self.reset_session();
        }
    }

    /// 有効/無効を切り替える。無効化でセッションは全リセットされる。
    #[allow(dead_code)]
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled && !enabled {
            self.reset_session();
        }
        self.config.enabled = enabled;
    }

    /// 補正適用通知の購読チャネルを登録する
    #[allow(dead_code)]
    pub fn subscribe(&mut self) -> Receiver<CompensationEvent> {
        let (tx, rx) = bounded(64);
        self.subscribers.push(tx);
        rx
    }

    /// 射撃セッション開始
    pub fn on_shooting_started(&mut self) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        self.shooting = true;
        self.compensating = false;
        self.session_started_at = Some(now);
        self.last_movement_at = Some(now);
        self.last_compensation_at = None;
        self.last_decay_at = None;
        self.accumulated = 0.0;
        self.last_applied = 0.0;
        self.adaptive_buffer.clear();
        tracing::debug!("Anti-recoil session started");
    }

    /// 射撃セッション終了
    ///
    /// 累積補正はクリアしない（時間経過で減衰させる）。
    pub fn on_shooting_stopped(&mut self) {
        self.shooting = false;
        self.compensating = false;
        tracing::debug!(
            "Anti-recoil session stopped (accumulated: {:.1})",
            self.accumulated
        );
    }

    #[allow(dead_code)]
    pub fn is_shooting(&self) -> bool {
        self.shooting
    }

    /// 直近の呼び出しで実際に補正が適用されたか
    #[allow(dead_code)]
    pub fn is_compensating(&self) -> bool {
        self.compensating
    }

    #[allow(dead_code)]
    pub fn accumulated_compensation(&self) -> f32 {
        self.accumulated
    }

    #[allow(dead_code)]
    pub fn last_applied_compensation(&self) -> f32 {
        self.last_applied
    }

    /// 直近の垂直移動テレメトリ（診断表示用、最大120サンプル）
    #[allow(dead_code)]
    pub fn vertical_telemetry(&self) -> Vec<f32> {
        self.telemetry.iter().copied().collect()
    }

    /// マウス移動を処理し、補正後のデルタを返す
    ///
    /// 判定順序は固定: 記録 → 無効 → テレメトリ → セッションタイムアウト →
    /// 発動遅延 → クールダウン → 減衰 → 適応バッファ → 閾値 → 補正。
    /// 減衰が閾値判定より先に来ることで、境界サンプルの扱いが決まる。
    pub fn process_mouse_movement(&mut self, dx: f32, dy: f32) -> (f32, f32) {
        // パターン記録は有効/無効に関わらず生デルタを取り込む
        if let Some(recording) = self.recording.as_mut() {
            if recording.samples.len() < Pattern::MAX_SAMPLES {
                recording.samples.push(PatternSample { dx, dy });
            }
        }

        if !self.config.enabled {
            return (dx, dy);
        }

        push_capped(&mut self.telemetry, dy, TELEMETRY_CAP);

        let now = self.clock.now();

        if !self.shooting {
            return (dx, dy);
        }

        // 最終移動サンプルから1000ms超でセッション失効
        if let Some(last) = self.last_movement_at {
            if now.duration_since(last) > SESSION_TIMEOUT {
                self.shooting = false;
                self.compensating = false;
                tracing::debug!("Anti-recoil session expired after inactivity");
                return (dx, dy);
            }
        }
        self.last_movement_at = Some(now);

        // Armed: 発動遅延を待つ
        if let Some(started) = self.session_started_at {
            if now.duration_since(started) < self.config.activation_delay() {
                return (dx, dy);
            }
        }

        // クールダウン中は素通し
        if self.config.cooldown_ms > 0 {
            if let Some(last) = self.last_compensation_at {
                if now.duration_since(last) < self.config.cooldown() {
                    return (dx, dy);
                }
            }
        }

        // 非補正中の経過時間に比例して累積を減衰
        self.apply_decay(now);

        push_capped(&mut self.adaptive_buffer, dy, ADAPTIVE_BUFFER_CAP);

        if dy <= self.config.vertical_threshold {
            return (dx, dy);
        }

        let mut v_comp = dy * self.config.strength;

        if self.config.adaptive && self.adaptive_buffer.len() >= ADAPTIVE_MIN_SAMPLES {
            let avg: f32 =
                self.adaptive_buffer.iter().sum::<f32>() / self.adaptive_buffer.len() as f32;
            if self.config.vertical_threshold > 0.0 {
                let scale = (avg / self.config.vertical_threshold).min(ADAPTIVE_MAX_SCALE);
                v_comp *= scale.max(0.0);
            }
        }

        v_comp = v_comp.min(self.config.max_tick_compensation);
        v_comp = v_comp.min(self.config.max_total_compensation - self.accumulated);
        v_comp = v_comp.max(0.0);

        let h_comp = if dx.abs() > HORIZONTAL_MIN_DX && self.config.horizontal_ratio > 0.0 {
            dx * self.config.horizontal_ratio
        } else {
            0.0
        };

        self.accumulated += v_comp;
        self.last_applied = v_comp;
        self.last_compensation_at = Some(now);
        self.last_decay_at = Some(now);
        self.compensating = true;

        self.emit(CompensationEvent {
            vertical: v_comp,
            horizontal: h_comp,
            accumulated: self.accumulated,
        });

        (dx - h_comp, dy - v_comp)
    }

    /// パターン記録を開始する
    ///
    /// # Returns
    /// 既に記録中の場合は false
    #[allow(dead_code)]
    pub fn start_pattern_recording(&mut self, name: &str) -> bool {
        if self.recording.is_some() {
            return false;
        }
        self.recording = Some(PatternRecording {
            name: name.to_string(),
            samples: Vec::new(),
        });
        tracing::info!("Pattern recording started: {}", name);
        true
    }

    #[allow(dead_code)]
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// パターン記録を終了し、Patternとして確定する
    ///
    /// # Arguments
    /// - `save`: trueの場合、ストアへ保存する（同名は上書き）
    ///
    /// # Returns
    /// 記録中でなかった場合は `Ok(None)`
    #[allow(dead_code)]
    pub fn stop_pattern_recording(&mut self, save: bool) -> DomainResult<Option<Pattern>> {
        let Some(recording) = self.recording.take() else {
            return Ok(None);
        };
        let pattern = Pattern::new(recording.name, recording.samples);
        tracing::info!(
            "Pattern recording stopped: {} ({} samples, save={})",
            pattern.name,
            pattern.samples.len(),
            save
        );
        if save {
            if let Some(store) = self.store.as_mut() {
                store.save_pattern(&pattern)?;
            }
        }
        Ok(Some(pattern))
    }

    /// パターンを現在の設定で再生シミュレーションする
    ///
    /// ライブセッション状態には一切触れない。記録サンプルは時刻を持たないため、
    /// 発動遅延・クールダウン・減衰は適用せず、振幅系のみを評価する
    /// （閾値 → 強度 → 適応 → ティック上限 → 累積上限 → 水平補正）。
    #[allow(dead_code)]
    pub fn simulate_pattern(&self, pattern: &Pattern) -> PatternSimulation {
        let mut samples = Vec::with_capacity(pattern.samples.len());
        let mut adaptive: VecDeque<f32> = VecDeque::with_capacity(ADAPTIVE_BUFFER_CAP);
        let mut accumulated = 0.0f32;
        let mut compensated = 0usize;

        for &input in &pattern.samples {
            push_capped(&mut adaptive, input.dy, ADAPTIVE_BUFFER_CAP);

            let mut v_comp = 0.0f32;
            let mut h_comp = 0.0f32;

            if self.config.enabled && input.dy > self.config.vertical_threshold {
                v_comp = input.dy * self.config.strength;
                if self.config.adaptive && adaptive.len() >= ADAPTIVE_MIN_SAMPLES {
                    let avg: f32 = adaptive.iter().sum::<f32>() / adaptive.len() as f32;
                    if self.config.vertical_threshold > 0.0 {
                        let scale = (avg / self.config.vertical_threshold).min(ADAPTIVE_MAX_SCALE);
                        v_comp *= scale.max(0.0);
                    }
                }
                v_comp = v_comp.min(self.config.max_tick_compensation);
                v_comp = v_comp.min(self.config.max_total_compensation - accumulated);
                v_comp = v_comp.max(0.0);

                if input.dx.abs() > HORIZONTAL_MIN_DX && self.config.horizontal_ratio > 0.0 {
                    h_comp = input.dx * self.config.horizontal_ratio;
                }

                accumulated += v_comp;
                if v_comp > 0.0 {
                    compensated += 1;
                }
            }

            samples.push(SimulationSample {
                input,
                output: PatternSample {
                    dx: input.dx - h_comp,
                    dy: input.dy - v_comp,
                },
                compensation: v_comp,
            });
        }

        PatternSimulation {
            samples,
            total_compensation: accumulated,
            compensated_samples: compensated,
        }
    }

    fn apply_decay(&mut self, now: Instant) {
        if self.accumulated <= 0.0 || self.config.decay_per_ms <= 0.0 {
            return;
        }
        let anchor = self.last_decay_at.or(self.last_compensation_at);
        if let Some(anchor) = anchor {
            let idle_ms = now.duration_since(anchor).as_secs_f32() * 1_000.0;
            if idle_ms > 0.0 {
                self.accumulated =
                    (self.accumulated - idle_ms * self.config.decay_per_ms).max(0.0);
                self.last_decay_at = Some(now);
            }
        }
    }

    fn reset_session(&mut self) {
        self.shooting = false;
        self.compensating = false;
        self.session_started_at = None;
        self.last_movement_at = None;
        self.last_compensation_at = None;
        self.last_decay_at = None;
        self.accumulated = 0.0;
        self.last_applied = 0.0;
        self.adaptive_buffer.clear();
    }

    fn emit(&self, event: CompensationEvent) {
        for tx in &self.subscribers {
            // ノンブロッキング送信。受信側が詰まっていても補正処理は止めない
            let _ = tx.try_send(event);
        }
    }
}

fn push_capped(buffer: &mut VecDeque<f32>, value: f32, cap: usize) {
    if buffer.len() >= cap {
        buffer.pop_front();
    }
    buffer.push_back(value);
}
