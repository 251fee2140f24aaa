//! 物理コントローラパススルーループ
//!
//! 選択されたスロットをポーリングし、仮想シンクへミラーする専用スレッド。
//! 約300Hz（3ms）で回り、データなし時は150ms、エラー時は100msへ落とす。
//! パケットシーケンス番号が前回と同じ場合は書き込みをスキップする。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::application::arbitrator::ControllerArbitrator;
use crate::domain::{
    DomainError, DomainResult, PadButton, PassthroughConfig, PhysicalPadPort, SharedVirtualPad,
    TriggerSide,
};

/// エラーログの間引き間隔（連続エラー時に毎回出さない）
const ERROR_LOG_INTERVAL: u32 = 50;

/// ループの状態通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughStatus {
    /// ループ開始
    Started,
    /// 連続エラー上限超過で停止（切断として報告）
    Halted { consecutive_errors: u32 },
    /// 協調停止
    Stopped,
}

/// パススルーループ
pub struct PassthroughLoop {
    config: PassthroughConfig,
    physical: Arc<dyn PhysicalPadPort>,
    virtual_pad: SharedVirtualPad,
    arbitrator: Arc<Mutex<ControllerArbitrator>>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exit_rx: Option<Receiver<()>>,
    subscribers: Vec<Sender<PassthroughStatus>>,
}

impl PassthroughLoop {
    pub fn new(
        config: PassthroughConfig,
        physical: Arc<dyn PhysicalPadPort>,
        virtual_pad: SharedVirtualPad,
        arbitrator: Arc<Mutex<ControllerArbitrator>>,
    ) -> Self {
        Self {
            config,
            physical,
            virtual_pad,
            arbitrator,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
            exit_rx: None,
            subscribers: Vec::new(),
        }
    }

    /// 状態通知の購読チャネルを登録する（start前に呼ぶこと）
    #[allow(dead_code)]
    pub fn subscribe(&mut self) -> Receiver<PassthroughStatus> {
        let (tx, rx) = bounded(16);
        self.subscribers.push(tx);
        rx
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// ループスレッドを開始する
    ///
    /// 仮想シンクが未接続の場合は設定回数だけ接続を試み、
    /// すべて失敗したら開始を拒否する。
    pub fn start(&mut self) -> DomainResult<()> {
        if self.handle.is_some() {
            tracing::warn!("Passthrough loop already running");
            return Ok(());
        }

        self.ensure_virtual_connected()?;

        self.stop_flag.store(false, Ordering::SeqCst);
        let (exit_tx, exit_rx) = bounded(1);
        self.exit_rx = Some(exit_rx);

        let worker = Worker {
            config: self.config,
            physical: self.physical.clone(),
            virtual_pad: self.virtual_pad.clone(),
            arbitrator: self.arbitrator.clone(),
            stop_flag: self.stop_flag.clone(),
            subscribers: self.subscribers.clone(),
        };

        let handle = thread::Builder::new()
            .name("passthrough-loop".to_string())
            .spawn(move || {
                worker.run();
                let _ = exit_tx.send(());
            })
            .map_err(|e| {
                DomainError::ResourceUnavailable(format!(
                    "Failed to spawn passthrough thread: {}",
                    e
                ))
            })?;

        self.handle = Some(handle);
        self.broadcast(PassthroughStatus::Started);
        tracing::info!(
            "Passthrough loop started ({}ms poll interval)",
            self.config.poll_interval_ms
        );
        Ok(())
    }

    /// ループを協調停止する
    ///
    /// joinは設定された上限時間で打ち切り、間に合わなければログのみ残す。
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let Some(handle) = self.handle.take() else {
            return;
        };
        let exited = self
            .exit_rx
            .take()
            .map(|rx| rx.recv_timeout(self.config.join_timeout()).is_ok())
            .unwrap_or(false);

        if exited {
            let _ = handle.join();
            tracing::info!("Passthrough loop stopped");
        } else {
            // joinで無期限ブロックしない。スレッドは放棄してログのみ
            tracing::error!(
                "Passthrough loop did not exit within {}ms, abandoning thread",
                self.config.join_timeout_ms
            );
        }
        self.broadcast(PassthroughStatus::Stopped);
    }

    fn ensure_virtual_connected(&self) -> DomainResult<()> {
        for attempt in 0..=self.config.connect_retry_count {
            {
                let mut guard = self.virtual_pad.lock().unwrap();
                if guard.is_connected() {
                    return Ok(());
                }
                match guard.connect() {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(
                            "Virtual pad connect attempt {}/{} failed: {}",
                            attempt + 1,
                            self.config.connect_retry_count + 1,
                            e
                        );
                    }
                }
            }
            if attempt < self.config.connect_retry_count {
                thread::sleep(self.config.connect_retry_delay());
            }
        }
        Err(DomainError::VirtualPad(
            "Virtual pad unavailable, refusing to start passthrough".to_string(),
        ))
    }

    fn broadcast(&self, status: PassthroughStatus) {
        for tx in &self.subscribers {
            let _ = tx.try_send(status);
        }
    }
}

impl Drop for PassthroughLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// ループスレッド本体の所有物
struct Worker {
    config: PassthroughConfig,
    physical: Arc<dyn PhysicalPadPort>,
    virtual_pad: SharedVirtualPad,
    arbitrator: Arc<Mutex<ControllerArbitrator>>,
    stop_flag: Arc<AtomicBool>,
    subscribers: Vec<Sender<PassthroughStatus>>,
}

impl Worker {
    fn run(&self) {
        let mut last_packet: Option<u32> = None;
        let mut consecutive_errors: u32 = 0;

        while !self.stop_flag.load(Ordering::SeqCst) {
            let slot = {
                let mut arbitrator = self.arbitrator.lock().unwrap();
                arbitrator.poll();
                arbitrator.selected()
            };

            let Some(slot) = slot else {
                last_packet = None;
                thread::sleep(self.config.no_data_interval());
                continue;
            };

            match self.physical.try_get_state(slot) {
                Ok(Some(state)) => {
                    consecutive_errors = 0;
                    // パケット未変化なら冗長な書き込みを省く
                    if last_packet == Some(state.packet) {
                        thread::sleep(self.config.poll_interval());
                        continue;
                    }
                    match self.mirror(&state) {
                        Ok(()) => {
                            last_packet = Some(state.packet);
                            thread::sleep(self.config.poll_interval());
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            self.log_error(consecutive_errors, &e);
                            if consecutive_errors > self.config.max_consecutive_errors {
                                self.halt(consecutive_errors);
                                return;
                            }
                            thread::sleep(self.config.error_interval());
                        }
                    }
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    last_packet = None;
                    thread::sleep(self.config.no_data_interval());
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.log_error(consecutive_errors, &e);
                    if consecutive_errors > self.config.max_consecutive_errors {
                        self.halt(consecutive_errors);
                        return;
                    }
                    thread::sleep(self.config.error_interval());
                }
            }
        }
        tracing::debug!("Passthrough loop exiting cooperatively");
    }

    /// 全ボタン・両軸・両トリガーを仮想シンクへ写し、1回のsubmitで確定する
    fn mirror(&self, state: &crate::domain::PhysicalPadState) -> DomainResult<()> {
        let mut pad = self.virtual_pad.lock().unwrap();
        for button in PadButton::ALL {
            pad.set_button(button, state.is_pressed(button));
        }
        pad.set_trigger(TriggerSide::Left, state.left_trigger);
        pad.set_trigger(TriggerSide::Right, state.right_trigger);
        pad.set_left_stick(state.left_x, state.left_y);
        pad.set_right_stick(state.right_x, state.right_y);
        pad.submit()
    }

    fn log_error(&self, consecutive: u32, error: &DomainError) {
        // 連続エラーは間引いてログする
        if consecutive == 1 || consecutive % ERROR_LOG_INTERVAL == 0 {
            tracing::warn!(
                "Passthrough error (consecutive: {}): {}",
                consecutive,
                error
            );
        }
    }

    fn halt(&self, consecutive_errors: u32) {
        tracing::error!(
            "Passthrough loop halted after {} consecutive errors, reporting disconnected",
            consecutive_errors
        );
        for tx in &self.subscribers {
            let _ = tx.try_send(PassthroughStatus::Halted { consecutive_errors });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArbitratorConfig, PadButton, PhysicalPadState};
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::mock_pad::{MockPhysicalPad, MockVirtualPad, MockVirtualProbe};
    use std::time::Duration;

    fn fast_config() -> PassthroughConfig {
        PassthroughConfig {
            poll_interval_ms: 1,
            no_data_interval_ms: 1,
            error_interval_ms: 1,
            max_consecutive_errors: 3,
            connect_retry_delay_ms: 1,
            connect_retry_count: 1,
            join_timeout_ms: 1_000,
        }
    }

    fn setup(
        config: PassthroughConfig,
    ) -> (PassthroughLoop, Arc<MockPhysicalPad>, MockVirtualProbe) {
        let physical = Arc::new(MockPhysicalPad::new());
        let mock_virtual = MockVirtualPad::new();
        let probe = mock_virtual.probe();
        let virtual_pad: SharedVirtualPad = Arc::new(Mutex::new(mock_virtual));
        let arbitrator = Arc::new(Mutex::new(ControllerArbitrator::new(
            ArbitratorConfig::default(),
            physical.clone(),
            Arc::new(SystemClock),
        )));
        let pass_loop =
            PassthroughLoop::new(config, physical.clone(), virtual_pad, arbitrator);
        (pass_loop, physical, probe)
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
    fn test_refuses_to_start_without_virtual_sink() {
        let (mut pass_loop, _, probe) = setup(fast_config());
        probe.set_fail_connect(true);
        assert!(pass_loop.start().is_err());
        assert!(!pass_loop.is_running());
    }

    #[test]
    fn test_mirrors_physical_state() {
        let (mut pass_loop, physical, probe) = setup(fast_config());
        physical.set_connected(0, true);
        let mut state = PhysicalPadState {
            left_x: 1_234,
            right_y: -4_321,
            left_trigger: 100,
            right_trigger: 200,
            packet: 1,
            ..Default::default()
        };
        state.buttons = PadButton::A.bit() | PadButton::LeftShoulder.bit();
        physical.set_state(0, state);

        pass_loop.start().unwrap();
        assert!(wait_for(|| probe.submitted().left_x == 1_234));

        let submitted = probe.submitted();
        assert_eq!(submitted.right_y, -4_321);
        assert_eq!(submitted.left_trigger, 100);
        assert_eq!(submitted.right_trigger, 200);
        assert!(submitted.is_pressed(PadButton::A));
        assert!(submitted.is_pressed(PadButton::LeftShoulder));
        assert!(!submitted.is_pressed(PadButton::B));

        // パケット更新で新しい状態が反映される
        physical.set_state(
            0,
            PhysicalPadState {
                left_x: 9_000,
                packet: 2,
                ..Default::default()
            },
        );
        assert!(wait_for(|| probe.submitted().left_x == 9_000));

        pass_loop.stop();
        assert!(!pass_loop.is_running());
    }

    #[test]
    fn test_unchanged_packet_skips_submit() {
        let (mut pass_loop, physical, probe) = setup(fast_config());
        physical.set_connected(0, true);
        physical.set_state(
            0,
            PhysicalPadState {
                left_x: 10,
                packet: 7,
                ..Default::default()
            },
        );

        pass_loop.start().unwrap();
        assert!(wait_for(|| probe.submit_count() >= 1));

        let count = probe.submit_count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            count,
            probe.submit_count(),
            "same packet must not be re-submitted"
        );

        pass_loop.stop();
    }

    #[test]
    fn test_halts_after_max_consecutive_errors() {
        let (mut pass_loop, physical, _) = setup(fast_config());
        let status_rx = pass_loop.subscribe();
        physical.set_connected(0, true);
        physical.set_state(
            0,
            PhysicalPadState {
                left_x: 10,
                packet: 1,
                ..Default::default()
            },
        );
        pass_loop.start().unwrap();
        assert_eq!(status_rx.recv_timeout(Duration::from_secs(1)), Ok(PassthroughStatus::Started));

        // 読み取りを恒久的に失敗させる
        physical.set_fail_reads(0, true);

        let halted = wait_for(|| {
            matches!(
                status_rx.try_recv(),
                Ok(PassthroughStatus::Halted { .. })
            )
        });
        assert!(halted, "loop should halt and report disconnection");

        pass_loop.stop();
    }

    #[test]
    fn test_stop_joins_within_timeout() {
        let (mut pass_loop, physical, _) = setup(fast_config());
        physical.set_connected(0, true);
        physical.set_state(
            0,
            PhysicalPadState {
                left_x: 1,
                packet: 1,
                ..Default::default()
            },
        );
        pass_loop.start().unwrap();

        let start = std::time::Instant::now();
        pass_loop.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!pass_loop.is_running());
    }
}
