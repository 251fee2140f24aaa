//! クロック実装
//!
//! 本番はシステムクロック、テストは手動で進められるManualClockを注入する。
//! ティック周期・発動遅延・減衰の検証を実時間待ちなしで行うための分離。

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::ClockPort;

/// システムクロック（本番用）
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手動クロック（テスト用）
///
/// `advance()`で任意の時間を進められる。Arc共有前提で&selfのまま操作できる。
#[allow(dead_code)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// クロックを指定時間だけ進める
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}
