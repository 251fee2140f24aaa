//! 物理/仮想コントローラ判別
//!
//! 自前の仮想コントローラ出力を物理コントローラと誤認しないための
//! ヒューリスティック。完全な判別は原理的に不可能（全軸ゼロで静止した
//! 物理コントローラは仮想と区別できない）ため、迷ったら物理側に倒す。

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::domain::{
    ArbitratorConfig, ClockPort, PhysicalPadPort, SharedVirtualPad, SLOT_COUNT,
};

/// 接続状態/選択スロットの変化通知
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// 現在選択されているスロット
    pub selected: Option<u8>,
    /// 各スロットのAPIレベル接続状態
    pub connected: [bool; SLOT_COUNT as usize],
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotTracker {
    connected: bool,
    last_activity: Option<Instant>,
}

/// コントローラ判別器
pub struct ControllerArbitrator {
    config: ArbitratorConfig,
    physical: Arc<dyn PhysicalPadPort>,
    virtual_pad: Option<SharedVirtualPad>,
    clock: Arc<dyn ClockPort>,
    slots: [SlotTracker; SLOT_COUNT as usize],
    selected: Option<u8>,
    subscribers: Vec<Sender<ConnectionEvent>>,
}

impl ControllerArbitrator {
    pub fn new(
        config: ArbitratorConfig,
        physical: Arc<dyn PhysicalPadPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            config,
            physical,
            virtual_pad: None,
            clock,
            slots: [SlotTracker::default(); SLOT_COUNT as usize],
            selected: None,
            subscribers: Vec::new(),
        }
    }

    /// 自己検出除外に使う仮想シンク参照を設定する
    pub fn set_virtual_pad(&mut self, virtual_pad: Option<SharedVirtualPad>) {
        self.virtual_pad = virtual_pad;
    }

    /// 変化通知の購読チャネルを登録する
    #[allow(dead_code)]
    pub fn subscribe(&mut self) -> Receiver<ConnectionEvent> {
        let (tx, rx) = bounded(16);
        self.subscribers.push(tx);
        rx
    }

    /// 現在選択されているスロット
    pub fn selected(&self) -> Option<u8> {
        self.selected
    }

    /// スロットを明示的に選択する（Noneで自動選択に戻す）
    #[allow(dead_code)]
    pub fn set_selected(&mut self, slot: Option<u8>) {
        let slot = slot.filter(|s| *s < SLOT_COUNT);
        if slot != self.selected {
            self.selected = slot;
            self.notify();
        }
    }

    /// スロットが物理コントローラかを判定する
    ///
    /// 仮想スナップショットと全フィールド一致し、かつスナップショットが
    /// 中立（全軸・全トリガーゼロ）の場合のみ仮想と分類する。
    /// 不一致、読み取り不能、非中立一致はすべて物理扱い。
    pub fn is_physical(&self, slot: u8) -> bool {
        if slot >= SLOT_COUNT {
            return false;
        }
        if !self.physical.is_connected(slot) {
            return false;
        }

        let Some(virtual_pad) = &self.virtual_pad else {
            // 除外対象がなければ物理とみなす
            return true;
        };
        let snapshot = {
            let guard = virtual_pad.lock().unwrap();
            if !guard.is_connected() {
                return true;
            }
            guard.snapshot()
        };

        match self.physical.try_get_state(slot) {
            Ok(Some(state)) => !(snapshot.matches(&state) && snapshot.is_neutral()),
            // 読めないスロットは物理側に倒す
            Ok(None) | Err(_) => true,
        }
    }

    /// 接続・アクティビティ・選択スロットを更新する（定期呼び出し）
    pub fn poll(&mut self) {
        let now = self.clock.now();
        let mut changed = false;

        for slot in 0..SLOT_COUNT {
            let tracker = &mut self.slots[slot as usize];
            let connected = self.physical.is_connected(slot);
            if connected != tracker.connected {
                tracker.connected = connected;
                changed = true;
            }
            if !connected {
                tracker.last_activity = None;
                continue;
            }
            if let Ok(Some(state)) = self.physical.try_get_state(slot) {
                if state.right_stick_active() {
                    tracker.last_activity = Some(now);
                }
            }
        }

        let tracked_is_physical = self
            .selected
            .map(|slot| self.is_physical(slot))
            .unwrap_or(false);

        if !tracked_is_physical && self.config.auto_select {
            let new_selection = self.auto_select(now);
            if new_selection != self.selected {
                tracing::info!(
                    "Controller selection changed: {:?} -> {:?}",
                    self.selected,
                    new_selection
                );
                self.selected = new_selection;
                changed = true;
            }
        }

        if changed {
            self.notify();
        }
    }

    /// 自動選択: 最近アクティブな物理スロット → 最小インデックスの物理スロット → なし
    fn auto_select(&self, now: Instant) -> Option<u8> {
        let window = self.config.activity_window();
        let mut recent: Option<(u8, Instant)> = None;
        let mut lowest: Option<u8> = None;

        for slot in 0..SLOT_COUNT {
            if !self.is_physical(slot) {
                continue;
            }
            if lowest.is_none() {
                lowest = Some(slot);
            }
            if let Some(at) = self.slots[slot as usize].last_activity {
                if now.duration_since(at) <= window
                    && recent.map(|(_, best)| at > best).unwrap_or(true)
                {
                    recent = Some((slot, at));
                }
            }
        }

        recent.map(|(slot, _)| slot).or(lowest)
    }

    fn notify(&self) {
        let event = ConnectionEvent {
            selected: self.selected,
            connected: [
                self.slots[0].connected,
                self.slots[1].connected,
                self.slots[2].connected,
                self.slots[3].connected,
            ],
        };
        for tx in &self.subscribers {
            let _ = tx.try_send(event);
        }
    }
}
