//! 変換パイプライン統合テスト
//!
//! モックアダプタで入力イベント → 補正 → カーブ変換 → 仮想シンクの
//! 流れ全体を検証する。実デバイスは不要。

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ZedsDeadPad::application::arbitrator::ControllerArbitrator;
use ZedsDeadPad::application::orchestrator::InputOrchestrator;
use ZedsDeadPad::application::passthrough::PassthroughLoop;
use ZedsDeadPad::application::recoil::AntiRecoilEngine;
use ZedsDeadPad::domain::config::{
    AntiRecoilConfig, ArbitratorConfig, OrchestratorConfig, PassthroughConfig, StickCurveConfig,
};
use ZedsDeadPad::domain::ports::{ClockPort, ProfileStorePort, SharedVirtualPad};
use ZedsDeadPad::domain::types::{
    InputEvent, MouseButton, PadButton, Pattern, PatternSample, PhysicalPadState, STICK_MAX,
};
use ZedsDeadPad::infrastructure::clock::{ManualClock, SystemClock};
use ZedsDeadPad::infrastructure::mock_pad::{MockPhysicalPad, MockVirtualPad, MockVirtualProbe};
use ZedsDeadPad::infrastructure::profile_store::JsonProfileStore;

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

fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
    for _ in 0..200 {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn connected_virtual() -> (SharedVirtualPad, MockVirtualProbe) {
    let mock = MockVirtualPad::new();
    let probe = mock.probe();
    let pad: SharedVirtualPad = Arc::new(Mutex::new(mock));
    pad.lock().unwrap().connect().unwrap();
    (pad, probe)
}

#[test]
fn test_shooting_session_compensates_right_stick_output() {
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
    let (virtual_pad, probe) = connected_virtual();
    let recoil = Arc::new(Mutex::new(AntiRecoilEngine::new(
        AntiRecoilConfig {
            enabled: true,
            strength: 0.5,
            activation_delay_ms: 0,
            vertical_threshold: 2.0,
            horizontal_ratio: 0.0,
            adaptive: false,
            max_tick_compensation: 100.0,
            max_total_compensation: 1_000.0,
            cooldown_ms: 0,
            decay_per_ms: 0.0,
        },
        clock.clone(),
    )));
    let mut orchestrator = InputOrchestrator::new(
        OrchestratorConfig::default(),
        plain_curve(),
        recoil.clone(),
        virtual_pad,
        clock,
    );
    orchestrator.start().unwrap();
    let sender = orchestrator.sender();

    // 射撃開始 → dy=10が補正されてdy'=5になり、Y反転で負のスティック値になる
    sender.send(InputEvent::MouseButton {
        button: MouseButton::Left,
        pressed: true,
    });
    assert!(wait_for(|| recoil.lock().unwrap().is_shooting()));

    sender.send(InputEvent::MouseMove { dx: 0.0, dy: 10.0 });
    let expected = -(0.05 * STICK_MAX as f32).round() as i16;
    assert!(
        wait_for(|| probe.submitted().right_y == expected),
        "expected right_y {} got {}",
        expected,
        probe.submitted().right_y
    );
    {
        let engine = recoil.lock().unwrap();
        assert!((engine.last_applied_compensation() - 5.0).abs() < 1e-3);
        assert!((engine.accumulated_compensation() - 5.0).abs() < 1e-3);
    }

    orchestrator.stop();
}

#[test]
fn test_pattern_recording_roundtrips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let clock: Arc<dyn ClockPort> = Arc::new(ManualClock::new());
    let store = JsonProfileStore::new(dir.path()).unwrap();
    let mut engine = AntiRecoilEngine::new(AntiRecoilConfig::default(), clock)
        .with_store(Box::new(store));

    assert!(engine.start_pattern_recording("spray"));
    for i in 0..50 {
        engine.process_mouse_movement(i as f32 * 0.1, 3.0 + i as f32);
    }
    let recorded = engine
        .stop_pattern_recording(true)
        .expect("stop should succeed")
        .expect("pattern should exist");
    assert_eq!(recorded.samples.len(), 50);

    // ストアから読み戻すと同一の順序付きサンプル列が得られる
    let store = JsonProfileStore::new(dir.path()).unwrap();
    let loaded = store.load_patterns().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name, "spray");
    assert_eq!(loaded[0].samples, recorded.samples);
}

#[test]
fn test_simulation_respects_caps_for_any_strength() {
    let clock: Arc<dyn ClockPort> = Arc::new(ManualClock::new());
    let samples: Vec<PatternSample> = (0..200)
        .map(|i| PatternSample {
            dx: 0.0,
            dy: 5.0 + (i % 7) as f32,
        })
        .collect();
    let pattern = Pattern::new("burst", samples);

    for strength in [0.0, 0.3, 0.7, 1.0] {
        let engine = AntiRecoilEngine::new(
            AntiRecoilConfig {
                enabled: true,
                strength,
                vertical_threshold: 2.0,
                adaptive: true,
                max_tick_compensation: 4.0,
                max_total_compensation: 50.0,
                activation_delay_ms: 0,
                horizontal_ratio: 0.0,
                cooldown_ms: 0,
                decay_per_ms: 0.0,
            },
            clock.clone(),
        );
        let result = engine.simulate_pattern(&pattern);
        for sample in &result.samples {
            assert!(sample.compensation <= 4.0 + 1e-3);
        }
        assert!(result.total_compensation <= 50.0 + 1e-3);
    }
}

#[test]
fn test_arbitrator_classification_scenarios() {
    let physical = Arc::new(MockPhysicalPad::new());
    let clock = Arc::new(SystemClock);
    let (virtual_pad, _probe) = connected_virtual();
    let mut arbitrator =
        ControllerArbitrator::new(ArbitratorConfig::default(), physical.clone(), clock);
    arbitrator.set_virtual_pad(Some(virtual_pad));

    // 全ゼロの仮想スナップショットと全ゼロの物理読み取りが一致 → 仮想
    physical.set_connected(0, true);
    physical.set_state(0, PhysicalPadState::default());
    assert!(!arbitrator.is_physical(0));

    // 非ゼロの不一致 → 物理
    physical.set_state(
        0,
        PhysicalPadState {
            right_y: -3_000,
            ..Default::default()
        },
    );
    assert!(arbitrator.is_physical(0));
}

#[test]
fn test_passthrough_mirrors_selected_slot_end_to_end() {
    let physical = Arc::new(MockPhysicalPad::new());
    let clock = Arc::new(SystemClock);
    let (virtual_pad, probe) = connected_virtual();

    let mut arbitrator =
        ControllerArbitrator::new(ArbitratorConfig::default(), physical.clone(), clock);
    arbitrator.set_virtual_pad(Some(virtual_pad.clone()));
    let arbitrator = Arc::new(Mutex::new(arbitrator));

    let mut state = PhysicalPadState {
        left_x: 2_500,
        right_y: -7_000,
        right_trigger: 180,
        packet: 1,
        ..Default::default()
    };
    state.buttons = PadButton::B.bit();
    physical.set_connected(1, true);
    physical.set_state(1, state);

    let mut pass_loop = PassthroughLoop::new(
        PassthroughConfig {
            poll_interval_ms: 1,
            no_data_interval_ms: 1,
            error_interval_ms: 1,
            ..Default::default()
        },
        physical.clone(),
        virtual_pad,
        arbitrator.clone(),
    );
    pass_loop.start().unwrap();

    assert!(wait_for(|| probe.submitted().left_x == 2_500));
    let submitted = probe.submitted();
    assert_eq!(submitted.right_y, -7_000);
    assert_eq!(submitted.right_trigger, 180);
    assert!(submitted.is_pressed(PadButton::B));
    assert_eq!(arbitrator.lock().unwrap().selected(), Some(1));

    pass_loop.stop();
}
