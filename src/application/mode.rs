//! モード状態機械
//!
//! {ネイティブ, マウス→コントローラ変換, 物理パススルー} のうち
//! 常に1つだけをアクティブにし、入力・ライフサイクルイベントを
//! アクティブなハンドラへルーティングする。
//!
//! 抑制フラグはプロセスワイドの静的変数ではなく、全ハンドラ呼び出しに
//! 渡される共有コンテキストの明示的なフィールドとして持つ。
//! モード集合はコンパイル時に閉じている。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::application::arbitrator::ControllerArbitrator;
use crate::application::orchestrator::{InputOrchestrator, InputSender};
use crate::application::passthrough::PassthroughLoop;
use crate::domain::{
    ClockPort, DomainResult, InputEvent, Mode, ModeTransition, ModeValidatorPort,
    PhysicalPadPort, SharedVirtualPad, SystemSnapshot, SLOT_COUNT,
};

/// 全ハンドラ呼び出しに渡される共有コンテキスト
pub struct ModeContext {
    /// ネイティブ入力の抑制フラグ（変換モード中のみtrue）
    pub suppress_native_input: bool,
    pub virtual_pad: SharedVirtualPad,
    pub physical: Arc<dyn PhysicalPadPort>,
    pub clock: Arc<dyn ClockPort>,
}

/// モードハンドラ
///
/// on_enter/on_exitの失敗は回復可能なエラーとして扱われ、
/// コーディネータ側でロールバックまたは続行が決まる。
pub trait ModeHandler: Send {
    fn mode(&self) -> Mode;

    fn on_enter(&mut self, ctx: &mut ModeContext, from: Option<Mode>) -> DomainResult<()>;

    fn on_exit(&mut self, ctx: &mut ModeContext, to: Mode) -> DomainResult<()>;

    fn on_input(&mut self, _ctx: &mut ModeContext, _event: InputEvent) {}

    fn on_controller_connected(&mut self, _ctx: &mut ModeContext, _slot: u8) {}

    fn tick(&mut self, _ctx: &mut ModeContext) {}
}

/// モード遷移の結果通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEvent {
    Changed {
        from: Option<Mode>,
        to: Mode,
    },
    Rejected {
        target: Mode,
        issues: Vec<String>,
    },
}

/// モードコーディネータ
pub struct ModeCoordinator {
    handlers: HashMap<Mode, Box<dyn ModeHandler>>,
    current: Option<Mode>,
    context: ModeContext,
    validator: Option<Box<dyn ModeValidatorPort>>,
    subscribers: Vec<Sender<ModeEvent>>,
}

impl ModeCoordinator {
    pub fn new(context: ModeContext) -> Self {
        Self {
            handlers: HashMap::new(),
            current: None,
            context,
            validator: None,
            subscribers: Vec::new(),
        }
    }

    /// 遷移バリデータを設定する（任意）
    #[allow(dead_code)]
    pub fn set_validator(&mut self, validator: Box<dyn ModeValidatorPort>) {
        self.validator = Some(validator);
    }

    /// モードハンドラを登録する（同一モードは上書き）
    pub fn register_mode(&mut self, handler: Box<dyn ModeHandler>) {
        let mode = handler.mode();
        if self.handlers.insert(mode, handler).is_some() {
            tracing::warn!("Mode handler replaced: {}", mode.as_str());
        }
    }

    /// 遷移通知の購読チャネルを登録する
    pub fn subscribe(&mut self) -> Receiver<ModeEvent> {
        let (tx, rx) = bounded(16);
        self.subscribers.push(tx);
        rx
    }

    #[allow(dead_code)]
    pub fn current_mode(&self) -> Option<Mode> {
        self.current
    }

    /// 抑制フラグの現在値
    #[allow(dead_code)]
    pub fn suppression_active(&self) -> bool {
        self.context.suppress_native_input
    }

    /// モードを切り替える
    ///
    /// 検証失敗・ハンドラ失敗は回復可能として扱う。遷移は拒否または
    /// ロールバックされ、プロセスは以前のモードのまま動き続ける。
    pub fn switch_mode(&mut self, target: Mode) -> bool {
        if !self.handlers.contains_key(&target) {
            tracing::warn!("Mode not registered: {}", target.as_str());
            return false;
        }
        if self.current == Some(target) {
            return true;
        }

        let transition = ModeTransition {
            from: self.current,
            to: target,
        };
        if let Some(validator) = &self.validator {
            let snapshot = self.system_snapshot();
            let issues = validator.validate(&transition, &snapshot);
            let mut blocking = Vec::new();
            for issue in &issues {
                if issue.is_blocking() {
                    tracing::error!("Transition blocked: {}", issue.message);
                    blocking.push(issue.message.clone());
                } else {
                    tracing::warn!("Transition warning: {}", issue.message);
                }
            }
            if !blocking.is_empty() {
                self.notify(ModeEvent::Rejected {
                    target,
                    issues: blocking,
                });
                return false;
            }
        }

        let previous = self.current;

        // 退出失敗はログのみで遷移は続行する
        if let Some(old_mode) = previous {
            if let Some(handler) = self.handlers.get_mut(&old_mode) {
                if let Err(e) = handler.on_exit(&mut self.context, target) {
                    tracing::warn!("Mode exit failed ({}): {}", old_mode.as_str(), e);
                }
            }
        }

        self.current = Some(target);
        let enter_result = self
            .handlers
            .get_mut(&target)
            .map(|handler| handler.on_enter(&mut self.context, previous))
            .unwrap_or(Ok(()));

        if let Err(e) = enter_result {
            tracing::error!("Mode enter failed ({}): {}", target.as_str(), e);
            self.rollback(previous, target);
            self.notify(ModeEvent::Rejected {
                target,
                issues: vec![e.to_string()],
            });
            return false;
        }

        tracing::info!(
            "Mode changed: {} -> {}",
            previous.map(|m| m.as_str()).unwrap_or("none"),
            target.as_str()
        );
        self.notify(ModeEvent::Changed {
            from: previous,
            to: target,
        });
        true
    }

    /// 入力イベントをアクティブなハンドラへ渡す
    #[allow(dead_code)]
    pub fn dispatch_input(&mut self, event: InputEvent) {
        if let Some(handler) = self.current.and_then(|m| self.handlers.get_mut(&m)) {
            handler.on_input(&mut self.context, event);
        }
    }

    /// コントローラ接続イベントをアクティブなハンドラへ渡す
    #[allow(dead_code)]
    pub fn notify_controller_connected(&mut self, slot: u8) {
        if let Some(handler) = self.current.and_then(|m| self.handlers.get_mut(&m)) {
            handler.on_controller_connected(&mut self.context, slot);
        }
    }

    /// 定期処理をアクティブなハンドラへ渡す
    pub fn tick(&mut self) {
        if let Some(handler) = self.current.and_then(|m| self.handlers.get_mut(&m)) {
            handler.tick(&mut self.context);
        }
    }

    /// 進入失敗時のロールバック
    ///
    /// 以前のハンドラを現在として復元し、on_enterを再実行して
    /// 想定状態へ戻す。再実行も失敗した場合はこの遷移については
    /// 致命としてログに残すが、プロセスは殺さない。
    fn rollback(&mut self, previous: Option<Mode>, failed: Mode) {
        self.current = previous;
        let Some(old_mode) = previous else {
            return;
        };
        let result = self
            .handlers
            .get_mut(&old_mode)
            .map(|handler| handler.on_enter(&mut self.context, Some(failed)))
            .unwrap_or(Ok(()));
        if let Err(e) = result {
            tracing::error!(
                "Rollback to {} failed, mode state is indeterminate: {}",
                old_mode.as_str(),
                e
            );
        } else {
            tracing::info!("Rolled back to {}", old_mode.as_str());
        }
    }

    fn system_snapshot(&self) -> SystemSnapshot {
        let virtual_pad_connected = self.context.virtual_pad.lock().unwrap().is_connected();
        let physical_pad_present =
            (0..SLOT_COUNT).any(|slot| self.context.physical.is_connected(slot));
        SystemSnapshot {
            suppression_active: self.context.suppress_native_input,
            virtual_pad_connected,
            physical_pad_present,
        }
    }

    /// 購読者への通知（ロック外・失敗してもよい）
    fn notify(&self, event: ModeEvent) {
        for tx in &self.subscribers {
            let _ = tx.try_send(event.clone());
        }
    }
}

/// ネイティブモード: 入力を変換せずOSに流す
pub struct NativeMode;

impl ModeHandler for NativeMode {
    fn mode(&self) -> Mode {
        Mode::Native
    }

    fn on_enter(&mut self, ctx: &mut ModeContext, _from: Option<Mode>) -> DomainResult<()> {
        ctx.suppress_native_input = false;
        Ok(())
    }

    fn on_exit(&mut self, _ctx: &mut ModeContext, _to: Mode) -> DomainResult<()> {
        Ok(())
    }
}

/// 変換モード: マウス/キーボードを仮想コントローラへ変換する
pub struct ConvertMode {
    orchestrator: InputOrchestrator,
    sender: InputSender,
}

impl ConvertMode {
    pub fn new(orchestrator: InputOrchestrator) -> Self {
        let sender = orchestrator.sender();
        Self {
            orchestrator,
            sender,
        }
    }
}

impl ModeHandler for ConvertMode {
    fn mode(&self) -> Mode {
        Mode::ConvertToController
    }

    fn on_enter(&mut self, ctx: &mut ModeContext, _from: Option<Mode>) -> DomainResult<()> {
        {
            let mut pad = ctx.virtual_pad.lock().unwrap();
            if !pad.is_connected() {
                pad.connect()?;
            }
        }
        self.orchestrator.start()?;
        // 変換モード中のみネイティブ入力を抑制する
        ctx.suppress_native_input = true;
        Ok(())
    }

    fn on_exit(&mut self, ctx: &mut ModeContext, _to: Mode) -> DomainResult<()> {
        self.orchestrator.stop();
        ctx.suppress_native_input = false;
        Ok(())
    }

    fn on_input(&mut self, _ctx: &mut ModeContext, event: InputEvent) {
        self.sender.send(event);
    }
}

/// パススルーモード: 物理コントローラを仮想シンクへミラーする
pub struct PassthroughMode {
    pass_loop: PassthroughLoop,
    arbitrator: Arc<Mutex<ControllerArbitrator>>,
}

impl PassthroughMode {
    pub fn new(pass_loop: PassthroughLoop, arbitrator: Arc<Mutex<ControllerArbitrator>>) -> Self {
        Self {
            pass_loop,
            arbitrator,
        }
    }
}

impl ModeHandler for PassthroughMode {
    fn mode(&self) -> Mode {
        Mode::ControllerPassthrough
    }

    fn on_enter(&mut self, ctx: &mut ModeContext, _from: Option<Mode>) -> DomainResult<()> {
        ctx.suppress_native_input = false;
        self.pass_loop.start()
    }

    fn on_exit(&mut self, _ctx: &mut ModeContext, _to: Mode) -> DomainResult<()> {
        self.pass_loop.stop();
        Ok(())
    }

    fn on_controller_connected(&mut self, _ctx: &mut ModeContext, slot: u8) {
        tracing::info!("Controller connected on slot {}", slot);
        self.arbitrator.lock().unwrap().poll();
    }
}
