//! 入力オーケストレータ
//!
//! キャプチャスレッド（プロデューサ）からの生入力イベントを容量制限付き
//! キューで受け、1つのコンシューマがカーブ変換とアンチリコイル補正を適用して
//! 保留バッチへ蓄積する。固定レートのティック（既定2ms = 500Hz）がWASD由来の
//! 左スティックを再計算し、1ティックにつき1回のbatch-then-submitで仮想シンクへ
//! 反映する。バッチへの変更とフラッシュは同一ロック下で行われ、ティックが
//! 書きかけのバッチを観測することはない。

use std::collections::HashSet;
use std::f32::consts::FRAC_1_SQRT_2;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::application::recoil::AntiRecoilEngine;
use crate::domain::{
    ActiveProfile, ClockPort, ControllerStateBatch, DomainError, DomainResult, InputEvent,
    KeyCode, MouseButton, OrchestratorConfig, PadButton, SharedVirtualPad, StickCurveConfig,
    StickCurveMapper, TriggerSide, STICK_MAX,
};

/// コンシューマの受信待ちタイムアウト（停止フラグ確認の周期）
const CONSUMER_RECV_TIMEOUT: Duration = Duration::from_millis(10);

/// ホイール入力によるD-Pad押下の保持時間
const WHEEL_HOLD: Duration = Duration::from_millis(50);

/// ドロップ警告ログの間引き間隔
const DROP_LOG_INTERVAL: u64 = 1_000;

/// キーコード → コントローラボタンの対応（WASDは左スティック扱いで対象外）
fn button_for_key(key: KeyCode) -> Option<PadButton> {
    match key {
        KeyCode::Space => Some(PadButton::A),
        KeyCode::R => Some(PadButton::X),
        KeyCode::F => Some(PadButton::Y),
        KeyCode::E => Some(PadButton::B),
        KeyCode::Q => Some(PadButton::LeftShoulder),
        KeyCode::Tab => Some(PadButton::Back),
        KeyCode::ShiftLeft => Some(PadButton::LeftThumb),
        KeyCode::CtrlLeft => Some(PadButton::RightThumb),
        KeyCode::W | KeyCode::A | KeyCode::S | KeyCode::D => None,
    }
}

/// コンシューマとティックが共有する可変状態
///
/// バッチ・マッパー・押下キー集合は常にこのロック下でのみ変更される。
struct OrchestratorShared {
    batch: ControllerStateBatch,
    mapper: StickCurveMapper,
    held_keys: HashSet<KeyCode>,
    last_input_at: Option<Instant>,
    wheel_release: Option<(PadButton, Instant)>,
}

/// 入力イベントのプロデューサハンドル
///
/// キュー満杯時は最古のイベントを1つ破棄してから再送する。
/// プロデューサをブロックしない。
#[derive(Clone)]
pub struct InputSender {
    tx: Sender<InputEvent>,
    rx: Receiver<InputEvent>,
    dropped: Arc<AtomicU64>,
}

impl InputSender {
    pub fn send(&self, event: InputEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            let _ = self.rx.try_recv();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % DROP_LOG_INTERVAL == 0 {
                tracing::warn!("Input queue full, dropped {} event(s) so far", dropped);
            }
            let _ = self.tx.try_send(event);
        }
    }
}

/// 入力オーケストレータ
pub struct InputOrchestrator {
    config: OrchestratorConfig,
    shared: Arc<Mutex<OrchestratorShared>>,
    recoil: Arc<Mutex<AntiRecoilEngine>>,
    virtual_pad: SharedVirtualPad,
    clock: Arc<dyn ClockPort>,
    sender: InputSender,
    queue_rx: Receiver<InputEvent>,
    stop_flag: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl InputOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        curve: StickCurveConfig,
        recoil: Arc<Mutex<AntiRecoilEngine>>,
        virtual_pad: SharedVirtualPad,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let (tx, rx) = bounded(config.queue_capacity);
        let sender = InputSender {
            tx,
            rx: rx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        Self {
            config,
            shared: Arc::new(Mutex::new(OrchestratorShared {
                batch: ControllerStateBatch::default(),
                mapper: StickCurveMapper::new(curve),
                held_keys: HashSet::new(),
                last_input_at: None,
                wheel_release: None,
            })),
            recoil,
            virtual_pad,
            clock,
            sender,
            queue_rx: rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
            consumer: None,
            ticker: None,
        }
    }

    /// プロデューサハンドルを取得する（capture側スレッドへ渡す）
    pub fn sender(&self) -> InputSender {
        self.sender.clone()
    }

    /// これまでにドロップされたイベント数
    #[allow(dead_code)]
    pub fn dropped_events(&self) -> u64 {
        self.sender.dropped.load(Ordering::Relaxed)
    }

    /// 現在のカーブ設定のスナップショット
    #[allow(dead_code)]
    pub fn curve_config(&self) -> StickCurveConfig {
        *self.shared.lock().unwrap().mapper.config()
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.consumer.is_some()
    }

    /// プロファイルをアトミックに適用する
    ///
    /// カーブ設定はバッチと同じロック下で置き換わるため、
    /// 切り替え前後の設定が混ざったティックは発生しない。
    #[allow(dead_code)]
    pub fn apply_profile(&self, profile: &ActiveProfile) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.mapper.set_config(profile.curve);
        }
        self.recoil.lock().unwrap().set_config(profile.anti_recoil);
        tracing::info!("Profile applied");
    }

    /// コンシューマとティックのスレッドを開始する
    pub fn start(&mut self) -> DomainResult<()> {
        if self.consumer.is_some() {
            tracing::warn!("Input orchestrator already running");
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let consumer = {
            let shared = self.shared.clone();
            let recoil = self.recoil.clone();
            let clock = self.clock.clone();
            let rx = self.queue_rx.clone();
            let stop = self.stop_flag.clone();
            thread::Builder::new()
                .name("input-consumer".to_string())
                .spawn(move || {
                    consumer_loop(&rx, &shared, &recoil, &clock, &stop);
                })
                .map_err(|e| {
                    DomainError::ResourceUnavailable(format!(
                        "Failed to spawn consumer thread: {}",
                        e
                    ))
                })?
        };

        let ticker = {
            let shared = self.shared.clone();
            let virtual_pad = self.virtual_pad.clone();
            let clock = self.clock.clone();
            let stop = self.stop_flag.clone();
            let config = self.config;
            thread::Builder::new()
                .name("orchestrator-tick".to_string())
                .spawn(move || {
                    tick_loop(&config, &shared, &virtual_pad, &clock, &stop);
                })
                .map_err(|e| {
                    DomainError::ResourceUnavailable(format!("Failed to spawn tick thread: {}", e))
                })?
        };

        self.consumer = Some(consumer);
        self.ticker = Some(ticker);
        tracing::info!(
            "Input orchestrator started (queue: {}, tick: {}ms)",
            self.config.queue_capacity,
            self.config.tick_interval_ms
        );
        Ok(())
    }

    /// 両スレッドを協調停止する
    ///
    /// 各ループは10ms以下の周期で停止フラグを確認するため、joinは短時間で返る。
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
        // 残留入力をクリアして中立へ戻す
        {
            let mut shared = self.shared.lock().unwrap();
            shared.batch = ControllerStateBatch::default();
            shared.held_keys.clear();
            shared.mapper.reset_smoothing();
            shared.wheel_release = None;
        }
        tracing::info!("Input orchestrator stopped");
    }
}

impl Drop for InputOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consumer_loop(
    rx: &Receiver<InputEvent>,
    shared: &Arc<Mutex<OrchestratorShared>>,
    recoil: &Arc<Mutex<AntiRecoilEngine>>,
    clock: &Arc<dyn ClockPort>,
    stop: &Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(CONSUMER_RECV_TIMEOUT) {
            Ok(event) => process_event(event, shared, recoil, clock),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("Input consumer exiting");
}

fn process_event(
    event: InputEvent,
    shared: &Arc<Mutex<OrchestratorShared>>,
    recoil: &Arc<Mutex<AntiRecoilEngine>>,
    clock: &Arc<dyn ClockPort>,
) {
    let now = clock.now();
    match event {
        InputEvent::Key { key, pressed } => {
            let mut guard = shared.lock().unwrap();
            guard.last_input_at = Some(now);
            match button_for_key(key) {
                Some(button) => guard.batch.set_button(button, pressed),
                // WASDは押下集合で管理し、ティックで左スティックへ合成する
                None => {
                    if pressed {
                        guard.held_keys.insert(key);
                    } else {
                        guard.held_keys.remove(&key);
                    }
                }
            }
        }
        InputEvent::MouseMove { dx, dy } => {
            // 補正はバッチロックの外で行う（補正側は自前のロックで完結する）
            let (cdx, cdy) = recoil.lock().unwrap().process_mouse_movement(dx, dy);
            let mut guard = shared.lock().unwrap();
            guard.last_input_at = Some(now);
            let (x, y) = guard.mapper.to_stick(cdx, cdy);
            guard.batch.right_x = x;
            guard.batch.right_y = y;
        }
        InputEvent::MouseButton { button, pressed } => {
            match button {
                MouseButton::Left => {
                    // 射撃: 右トリガー + 補正セッションの開始/終了
                    {
                        let mut engine = recoil.lock().unwrap();
                        if pressed {
                            engine.on_shooting_started();
                        } else {
                            engine.on_shooting_stopped();
                        }
                    }
                    let mut guard = shared.lock().unwrap();
                    guard.last_input_at = Some(now);
                    guard.batch.right_trigger = if pressed { u8::MAX } else { 0 };
                }
                MouseButton::Right => {
                    let mut guard = shared.lock().unwrap();
                    guard.last_input_at = Some(now);
                    guard.batch.left_trigger = if pressed { u8::MAX } else { 0 };
                }
                MouseButton::Middle => {
                    let mut guard = shared.lock().unwrap();
                    guard.last_input_at = Some(now);
                    guard.batch.set_button(PadButton::RightThumb, pressed);
                }
            }
        }
        InputEvent::Wheel { delta } => {
            if delta == 0 {
                return;
            }
            let button = if delta > 0 {
                PadButton::DpadUp
            } else {
                PadButton::DpadDown
            };
            let mut guard = shared.lock().unwrap();
            guard.last_input_at = Some(now);
            // 一定時間押下し、ティック側で解放する
            if let Some((previous, _)) = guard.wheel_release.take() {
                guard.batch.set_button(previous, false);
            }
            guard.batch.set_button(button, true);
            guard.wheel_release = Some((button, now + WHEEL_HOLD));
        }
    }
}

fn tick_loop(
    config: &OrchestratorConfig,
    shared: &Arc<Mutex<OrchestratorShared>>,
    virtual_pad: &SharedVirtualPad,
    clock: &Arc<dyn ClockPort>,
    stop: &Arc<AtomicBool>,
) {
    let mut consecutive_errors: u32 = 0;
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(config.tick_interval());
        let now = clock.now();

        // バッチの再計算とフラッシュを1つのロック区間で行う
        let mut guard = shared.lock().unwrap();

        let (lx, ly) = left_stick_from_keys(&guard.held_keys);
        guard.batch.left_x = lx;
        guard.batch.left_y = ly;

        if let Some((button, release_at)) = guard.wheel_release {
            if now >= release_at {
                guard.batch.set_button(button, false);
                guard.wheel_release = None;
            }
        }

        // 入力アイドルで平滑化メモリをリセットし、右スティックを中立へ戻す
        if let Some(last) = guard.last_input_at {
            if now.duration_since(last) >= config.idle_reset() {
                guard.mapper.reset_smoothing();
                guard.batch.right_x = 0;
                guard.batch.right_y = 0;
            }
        }

        let batch = guard.batch;
        let result = {
            let mut pad = virtual_pad.lock().unwrap();
            for button in PadButton::ALL {
                pad.set_button(button, batch.is_pressed(button));
            }
            pad.set_trigger(TriggerSide::Left, batch.left_trigger);
            pad.set_trigger(TriggerSide::Right, batch.right_trigger);
            pad.set_left_stick(batch.left_x, batch.left_y);
            pad.set_right_stick(batch.right_x, batch.right_y);
            pad.submit()
        };
        drop(guard);

        match result {
            Ok(()) => consecutive_errors = 0,
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors == 1 || consecutive_errors % 500 == 0 {
                    tracing::warn!(
                        "Tick submit failed (consecutive: {}): {}",
                        consecutive_errors,
                        e
                    );
                }
            }
        }
    }
    tracing::debug!("Orchestrator tick exiting");
}

/// WASD押下集合から左スティックベクトルを合成する
///
/// 斜め移動は正規化してフルスケールを超えないようにする。
fn left_stick_from_keys(held: &HashSet<KeyCode>) -> (i16, i16) {
    let mut x = 0.0f32;
    let mut y = 0.0f32;
    if held.contains(&KeyCode::W) {
        y += 1.0;
    }
    if held.contains(&KeyCode::S) {
        y -= 1.0;
    }
    if held.contains(&KeyCode::D) {
        x += 1.0;
    }
    if held.contains(&KeyCode::A) {
        x -= 1.0;
    }
    if x != 0.0 && y != 0.0 {
        x *= FRAC_1_SQRT_2;
        y *= FRAC_1_SQRT_2;
    }
    (
        (x * STICK_MAX as f32) as i16,
        (y * STICK_MAX as f32) as i16,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AntiRecoilConfig;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::mock_pad::{MockVirtualPad, MockVirtualProbe};

    fn plain_curve() -> StickCurveConfig {
        StickCurveConfig {
            sensitivity: 50.0,
            expo: 0.0,
            anti_deadzone: 0.0,
            max_speed: 100.0,
            smoothing_alpha: 1.0,
            velocity_gain: 0.0,
            velocity_cap: 0.0,
            jitter_floor: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    fn setup(
        config: OrchestratorConfig,
        recoil_config: AntiRecoilConfig,
    ) -> (InputOrchestrator, MockVirtualProbe, Arc<Mutex<AntiRecoilEngine>>) {
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
        let mock_virtual = MockVirtualPad::new();
        let probe = mock_virtual.probe();
        let virtual_pad: SharedVirtualPad = Arc::new(Mutex::new(mock_virtual));
        virtual_pad.lock().unwrap().connect().unwrap();
        let recoil = Arc::new(Mutex::new(AntiRecoilEngine::new(
            recoil_config,
            clock.clone(),
        )));
        let orchestrator = InputOrchestrator::new(
            config,
            plain_curve(),
            recoil.clone(),
            virtual_pad,
            clock,
        );
        (orchestrator, probe, recoil)
    }

    fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
        for _ in 0..200 {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_wasd_drives_left_stick() {
        let (mut orchestrator, probe, _) =
            setup(OrchestratorConfig::default(), AntiRecoilConfig::default());
        orchestrator.start().unwrap();
        assert!(orchestrator.is_running());
        let sender = orchestrator.sender();

        sender.send(InputEvent::Key {
            key: KeyCode::W,
            pressed: true,
        });
        assert!(wait_for(|| probe.submitted().left_y == STICK_MAX));
        assert_eq!(probe.submitted().left_x, 0);

        // W+Dの斜めは正規化される
        sender.send(InputEvent::Key {
            key: KeyCode::D,
            pressed: true,
        });
        let diagonal = (FRAC_1_SQRT_2 * STICK_MAX as f32) as i16;
        assert!(wait_for(|| probe.submitted().left_x == diagonal));
        assert_eq!(probe.submitted().left_y, diagonal);

        sender.send(InputEvent::Key {
            key: KeyCode::W,
            pressed: false,
        });
        sender.send(InputEvent::Key {
            key: KeyCode::D,
            pressed: false,
        });
        assert!(wait_for(|| probe.submitted().left_x == 0
            && probe.submitted().left_y == 0));

        orchestrator.stop();
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_mouse_move_drives_right_stick() {
        let (mut orchestrator, probe, _) =
            setup(OrchestratorConfig::default(), AntiRecoilConfig::default());
        orchestrator.start().unwrap();
        let sender = orchestrator.sender();

        // dx=50, max_speed=100 → ハーフスケール
        sender.send(InputEvent::MouseMove { dx: 50.0, dy: 0.0 });
        let expected = (0.5 * STICK_MAX as f32).round() as i16;
        assert!(wait_for(|| probe.submitted().right_x == expected));

        orchestrator.stop();
    }

    #[test]
    fn test_mouse_left_button_fires_trigger_and_session() {
        let (mut orchestrator, probe, recoil) = setup(
            OrchestratorConfig::default(),
            AntiRecoilConfig {
                enabled: true,
                ..Default::default()
            },
        );
        orchestrator.start().unwrap();
        let sender = orchestrator.sender();

        sender.send(InputEvent::MouseButton {
            button: MouseButton::Left,
            pressed: true,
        });
        assert!(wait_for(|| probe.submitted().right_trigger == u8::MAX));
        assert!(wait_for(|| recoil.lock().unwrap().is_shooting()));

        sender.send(InputEvent::MouseButton {
            button: MouseButton::Left,
            pressed: false,
        });
        assert!(wait_for(|| probe.submitted().right_trigger == 0));
        assert!(wait_for(|| !recoil.lock().unwrap().is_shooting()));

        orchestrator.stop();
    }

    #[test]
    fn test_key_bindings_set_buttons() {
        let (mut orchestrator, probe, _) =
            setup(OrchestratorConfig::default(), AntiRecoilConfig::default());
        orchestrator.start().unwrap();
        let sender = orchestrator.sender();

        sender.send(InputEvent::Key {
            key: KeyCode::Space,
            pressed: true,
        });
        sender.send(InputEvent::Key {
            key: KeyCode::ShiftLeft,
            pressed: true,
        });
        assert!(wait_for(|| {
            let batch = probe.submitted();
            batch.is_pressed(PadButton::A) && batch.is_pressed(PadButton::LeftThumb)
        }));

        sender.send(InputEvent::Key {
            key: KeyCode::Space,
            pressed: false,
        });
        assert!(wait_for(|| !probe.submitted().is_pressed(PadButton::A)));

        orchestrator.stop();
    }

    #[test]
    fn test_wheel_pulses_dpad() {
        let (mut orchestrator, probe, _) =
            setup(OrchestratorConfig::default(), AntiRecoilConfig::default());
        orchestrator.start().unwrap();
        let sender = orchestrator.sender();

        sender.send(InputEvent::Wheel { delta: 1 });
        assert!(wait_for(|| probe.submitted().is_pressed(PadButton::DpadUp)));
        // 保持時間経過後に解放される
        assert!(wait_for(|| !probe.submitted().is_pressed(PadButton::DpadUp)));

        orchestrator.stop();
    }

    #[test]
    fn test_queue_overflow_drops_oldest_without_blocking() {
        let config = OrchestratorConfig {
            queue_capacity: 4,
            ..Default::default()
        };
        // コンシューマを起動しないままキューを溢れさせる
        let (orchestrator, _, _) = setup(config, AntiRecoilConfig::default());
        let sender = orchestrator.sender();
        for i in 0..20 {
            sender.send(InputEvent::MouseMove {
                dx: i as f32,
                dy: 0.0,
            });
        }
        assert!(orchestrator.dropped_events() >= 16);
    }

    #[test]
    fn test_idle_reset_returns_right_stick_to_neutral() {
        let config = OrchestratorConfig {
            idle_reset_ms: 30,
            ..Default::default()
        };
        let (mut orchestrator, probe, _) = setup(config, AntiRecoilConfig::default());
        orchestrator.start().unwrap();
        let sender = orchestrator.sender();

        sender.send(InputEvent::MouseMove { dx: 50.0, dy: 0.0 });
        assert!(wait_for(|| probe.submitted().right_x != 0));

        // 入力が止まるとアイドルリセットで中立へ戻る
        assert!(wait_for(|| probe.submitted().right_x == 0));

        orchestrator.stop();
    }

    #[test]
    fn test_apply_profile_swaps_curve_atomically() {
        let (orchestrator, _, recoil) =
            setup(OrchestratorConfig::default(), AntiRecoilConfig::default());
        let profile = ActiveProfile {
            curve: StickCurveConfig {
                sensitivity: 80.0,
                ..plain_curve()
            },
            anti_recoil: AntiRecoilConfig {
                enabled: true,
                strength: 0.9,
                ..Default::default()
            },
        };
        orchestrator.apply_profile(&profile);
        assert_eq!(orchestrator.curve_config().sensitivity, 80.0);
        let engine = recoil.lock().unwrap();
        assert!(engine.config().enabled);
        assert_eq!(engine.config().strength, 0.9);
    }
}
