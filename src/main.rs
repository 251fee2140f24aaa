mod application;
mod domain;
mod infrastructure;
mod logging;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::arbitrator::ControllerArbitrator;
use crate::application::mode::{
    ConvertMode, ModeContext, ModeCoordinator, ModeEvent, NativeMode, PassthroughMode,
};
use crate::application::orchestrator::InputOrchestrator;
use crate::application::passthrough::PassthroughLoop;
use crate::application::recoil::AntiRecoilEngine;
use crate::domain::config::AppConfig;
use crate::domain::ports::{ClockPort, PhysicalPadPort, SharedVirtualPad};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::mock_pad::{MockPhysicalPad, MockVirtualPad};
use crate::infrastructure::profile_store::JsonProfileStore;
use crate::logging::init_logging;

/// コーディネータのtick周期（モードハンドラの定期処理用、ホットループとは別）
const COORDINATOR_TICK: Duration = Duration::from_millis(100);

fn main() {
    // ログシステムの初期化（非同期ファイル出力）
    let log_dir = PathBuf::from("logs");
    let _guard = init_logging("info", false, Some(log_dir));
    // 注意: _guardはmain終了まで保持する必要がある（Dropでログスレッドが終了）

    tracing::info!("ZedsDeadPad starting...");

    match run() {
        Ok(_) => {
            tracing::info!("ZedsDeadPad terminated gracefully.");
        }
        Err(e) => {
            tracing::error!("Fatal error: {:?}", e);
            std::process::exit(1);
        }
    }
}

/// アプリケーションのメイン処理
fn run() -> Result<(), Box<dyn std::error::Error>> {
    // 設定ファイルの読み込み（存在しない場合はデフォルト設定を使用）
    let mut config = match AppConfig::from_file("config.toml") {
        Ok(config) => {
            tracing::info!("Loaded configuration from config.toml");
            config
        }
        Err(e) => {
            tracing::warn!("Failed to load config.toml: {:?}, using defaults", e);
            AppConfig::default()
        }
    };

    // 範囲外の値はフィールド単位で修復してから検証する
    let repaired = config.repair();
    if repaired > 0 {
        tracing::warn!("Repaired {} out-of-range configuration field(s)", repaired);
    }
    config.validate()?;

    tracing::info!("Configuration validated successfully");
    tracing::info!(
        "Curve: sensitivity={}, expo={}, max_speed={}",
        config.curve.sensitivity,
        config.curve.expo,
        config.curve.max_speed
    );
    tracing::info!(
        "Anti-recoil: enabled={}, strength={}, threshold={}",
        config.anti_recoil.enabled,
        config.anti_recoil.strength,
        config.anti_recoil.vertical_threshold
    );
    tracing::info!(
        "Orchestrator: queue={}, tick={}ms / Passthrough: poll={}ms",
        config.orchestrator.queue_capacity,
        config.orchestrator.tick_interval_ms,
        config.passthrough.poll_interval_ms
    );

    // モックアダプタの初期化（実際のコントローラAPIは未実装）
    tracing::info!("Initializing mock controller adapters...");
    let physical: Arc<dyn PhysicalPadPort> = Arc::new(MockPhysicalPad::new());
    let virtual_pad: SharedVirtualPad = Arc::new(Mutex::new(MockVirtualPad::new()));
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);

    // プロファイル/パターン永続化
    let store = JsonProfileStore::new("data")?;

    // アンチリコイルエンジン
    let recoil = Arc::new(Mutex::new(
        AntiRecoilEngine::new(config.anti_recoil, clock.clone()).with_store(Box::new(store)),
    ));

    // 変換モード: 入力オーケストレータ
    let orchestrator = InputOrchestrator::new(
        config.orchestrator,
        config.curve,
        recoil.clone(),
        virtual_pad.clone(),
        clock.clone(),
    );

    // パススルーモード: 判別器 + ポーリングループ
    let mut arbitrator =
        ControllerArbitrator::new(config.arbitrator, physical.clone(), clock.clone());
    arbitrator.set_virtual_pad(Some(virtual_pad.clone()));
    let arbitrator = Arc::new(Mutex::new(arbitrator));
    let pass_loop = PassthroughLoop::new(
        config.passthrough,
        physical.clone(),
        virtual_pad.clone(),
        arbitrator.clone(),
    );

    // モードコーディネータの組み立て
    let context = ModeContext {
        suppress_native_input: false,
        virtual_pad,
        physical,
        clock,
    };
    let mut coordinator = ModeCoordinator::new(context);
    coordinator.register_mode(Box::new(NativeMode));
    coordinator.register_mode(Box::new(ConvertMode::new(orchestrator)));
    coordinator.register_mode(Box::new(PassthroughMode::new(pass_loop, arbitrator)));
    let mode_rx = coordinator.subscribe();

    tracing::info!("Switching to startup mode: {}", config.startup_mode.as_str());
    if !coordinator.switch_mode(config.startup_mode) {
        return Err(format!(
            "Failed to enter startup mode: {}",
            config.startup_mode.as_str()
        )
        .into());
    }

    // メインループ（入力キャプチャはプラットフォーム層から注入される想定）
    loop {
        coordinator.tick();
        while let Ok(event) = mode_rx.try_recv() {
            match event {
                ModeEvent::Changed { from, to } => {
                    tracing::info!(
                        "Mode event: {} -> {}",
                        from.map(|m| m.as_str()).unwrap_or("none"),
                        to.as_str()
                    );
                }
                ModeEvent::Rejected { target, issues } => {
                    tracing::warn!(
                        "Mode transition rejected: {} ({})",
                        target.as_str(),
                        issues.join("; ")
                    );
                }
            }
        }
        std::thread::sleep(COORDINATOR_TICK);
    }
}
