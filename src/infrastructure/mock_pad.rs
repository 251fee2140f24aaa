//! モックコントローラアダプタ
//!
//! 実デバイスなしで全パイプラインを動かすためのPhysicalPadPort/VirtualPadPort実装。
//! テストとデバッグ実行の両方で使用する。

use std::sync::{Arc, Mutex};

use crate::domain::{
    ControllerStateBatch, DomainError, DomainResult, PadButton, PhysicalPadPort, PhysicalPadState,
    TriggerSide, VirtualPadPort, VirtualSnapshot, SLOT_COUNT,
};

#[derive(Debug, Clone, Copy, Default)]
struct MockSlot {
    connected: bool,
    state: PhysicalPadState,
    fail_reads: bool,
}

/// スクリプト可能な物理コントローラモック
///
/// Arc共有前提で、テスト側から&selfのままスロット状態を書き換えられる。
pub struct MockPhysicalPad {
    slots: Mutex<[MockSlot; SLOT_COUNT as usize]>,
}

impl MockPhysicalPad {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([MockSlot::default(); SLOT_COUNT as usize]),
        }
    }

    /// スロットの接続状態を設定する
    #[allow(dead_code)]
    pub fn set_connected(&self, slot: u8, connected: bool) {
        if let Some(entry) = self.slots.lock().unwrap().get_mut(slot as usize) {
            entry.connected = connected;
        }
    }

    /// スロットの状態を設定する
    #[allow(dead_code)]
    pub fn set_state(&self, slot: u8, state: PhysicalPadState) {
        if let Some(entry) = self.slots.lock().unwrap().get_mut(slot as usize) {
            entry.state = state;
        }
    }

    /// スロットの読み取りを失敗させる（エラーパス検証用）
    #[allow(dead_code)]
    pub fn set_fail_reads(&self, slot: u8, fail: bool) {
        if let Some(entry) = self.slots.lock().unwrap().get_mut(slot as usize) {
            entry.fail_reads = fail;
        }
    }
}

impl Default for MockPhysicalPad {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalPadPort for MockPhysicalPad {
    fn is_connected(&self, slot: u8) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(slot as usize)
            .map(|entry| entry.connected)
            .unwrap_or(false)
    }

    fn try_get_state(&self, slot: u8) -> DomainResult<Option<PhysicalPadState>> {
        let slots = self.slots.lock().unwrap();
        let Some(entry) = slots.get(slot as usize) else {
            return Ok(None);
        };
        if entry.fail_reads {
            return Err(DomainError::PhysicalPad(format!(
                "mock read failure on slot {}",
                slot
            )));
        }
        if !entry.connected {
            return Ok(None);
        }
        Ok(Some(entry.state))
    }
}

#[derive(Debug, Default)]
struct VirtualPadInner {
    connected: bool,
    fail_connect: bool,
    fail_submit: bool,
    pending: ControllerStateBatch,
    submitted: ControllerStateBatch,
    submit_count: u64,
}

/// 記録型の仮想コントローラモック
///
/// フィールド書き込みは保留バッチに蓄積され、`submit()`で確定する。
/// 内部状態はArc共有なので、`probe()`で取り出したハンドルから
/// trait objectに包んだ後でも検査・操作できる。
pub struct MockVirtualPad {
    inner: Arc<Mutex<VirtualPadInner>>,
}

/// MockVirtualPadの検査用ハンドル
#[allow(dead_code)]
#[derive(Clone)]
pub struct MockVirtualProbe {
    inner: Arc<Mutex<VirtualPadInner>>,
}

impl MockVirtualPad {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualPadInner::default())),
        }
    }

    /// 検査用ハンドルを取得する
    #[allow(dead_code)]
    pub fn probe(&self) -> MockVirtualProbe {
        MockVirtualProbe {
            inner: self.inner.clone(),
        }
    }
}

impl Default for MockVirtualPad {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl MockVirtualProbe {
    /// connect()を失敗させる（リトライパス検証用）
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.lock().unwrap().fail_connect = fail;
    }

    /// submit()を失敗させる（連続エラーパス検証用）
    pub fn set_fail_submit(&self, fail: bool) {
        self.inner.lock().unwrap().fail_submit = fail;
    }

    /// 最後にsubmitで確定した全状態
    pub fn submitted(&self) -> ControllerStateBatch {
        self.inner.lock().unwrap().submitted
    }

    /// submitの累計回数
    pub fn submit_count(&self) -> u64 {
        self.inner.lock().unwrap().submit_count
    }
}

impl VirtualPadPort for MockVirtualPad {
    fn connect(&mut self) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_connect {
            return Err(DomainError::VirtualPad("mock connect failure".to_string()));
        }
        inner.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.pending = ControllerStateBatch::default();
        inner.submitted = ControllerStateBatch::default();
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    fn set_button(&mut self, button: PadButton, pressed: bool) {
        self.inner.lock().unwrap().pending.set_button(button, pressed);
    }

    fn set_trigger(&mut self, side: TriggerSide, value: u8) {
        let mut inner = self.inner.lock().unwrap();
        match side {
            TriggerSide::Left => inner.pending.left_trigger = value,
            TriggerSide::Right => inner.pending.right_trigger = value,
        }
    }

    fn set_left_stick(&mut self, x: i16, y: i16) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.left_x = x;
        inner.pending.left_y = y;
    }

    fn set_right_stick(&mut self, x: i16, y: i16) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.right_x = x;
        inner.pending.right_y = y;
    }

    fn submit(&mut self) -> DomainResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(DomainError::VirtualPad("not connected".to_string()));
        }
        if inner.fail_submit {
            return Err(DomainError::VirtualPad("mock submit failure".to_string()));
        }
        inner.submitted = inner.pending;
        inner.submit_count += 1;
        Ok(())
    }

    fn snapshot(&self) -> VirtualSnapshot {
        let inner = self.inner.lock().unwrap();
        VirtualSnapshot {
            left_x: inner.submitted.left_x,
            left_y: inner.submitted.left_y,
            right_x: inner.submitted.right_x,
            right_y: inner.submitted.right_y,
            left_trigger: inner.submitted.left_trigger,
            right_trigger: inner.submitted.right_trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_mock_connection_and_state() {
        let pad = MockPhysicalPad::new();
        assert!(!pad.is_connected(0));
        assert_eq!(pad.try_get_state(0).unwrap(), None);

        pad.set_connected(0, true);
        pad.set_state(
            0,
            PhysicalPadState {
                right_x: 500,
                packet: 1,
                ..Default::default()
            },
        );
        assert!(pad.is_connected(0));
        assert_eq!(pad.try_get_state(0).unwrap().unwrap().right_x, 500);

        // 範囲外スロットはデータなし
        assert!(!pad.is_connected(9));
        assert_eq!(pad.try_get_state(9).unwrap(), None);
    }

    #[test]
    fn test_physical_mock_read_failure() {
        let pad = MockPhysicalPad::new();
        pad.set_connected(1, true);
        pad.set_fail_reads(1, true);
        assert!(pad.try_get_state(1).is_err());
    }

    #[test]
    fn test_virtual_mock_batches_until_submit() {
        let mut pad = MockVirtualPad::new();
        let probe = pad.probe();
        pad.connect().unwrap();

        pad.set_right_stick(1_000, -2_000);
        pad.set_trigger(TriggerSide::Right, 255);
        // submit前のスナップショットは未反映
        assert!(pad.snapshot().is_neutral());

        pad.submit().unwrap();
        let snapshot = pad.snapshot();
        assert_eq!(snapshot.right_x, 1_000);
        assert_eq!(snapshot.right_y, -2_000);
        assert_eq!(snapshot.right_trigger, 255);
        assert_eq!(probe.submit_count(), 1);
        assert_eq!(probe.submitted().right_x, 1_000);
    }

    #[test]
    fn test_virtual_mock_submit_requires_connection() {
        let mut pad = MockVirtualPad::new();
        assert!(pad.submit().is_err());
    }

    #[test]
    fn test_virtual_mock_connect_failure() {
        let mut pad = MockVirtualPad::new();
        pad.probe().set_fail_connect(true);
        assert!(pad.connect().is_err());
        assert!(!pad.is_connected());
    }
}
