/// コア型定義
///
/// Domain層の中心となるデータ構造。
/// 入力イベント、コントローラ状態、記録パターンなど、全コンポーネントで共有される型。
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// スティック出力の最大値（signed 16-bit フルスケール）
pub const STICK_MAX: i16 = i16::MAX;

/// 物理コントローラスロットの数（XInput準拠: 0-3）
pub const SLOT_COUNT: u8 = 4;

/// 動作モード
///
/// 排他的に1つだけアクティブになる。ModeCoordinatorが所有する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// 直接パススルー（入力を変換せずOSに流す）
    #[default]
    Native,
    /// マウス/キーボード → 仮想コントローラ変換
    ConvertToController,
    /// 物理コントローラ → 仮想コントローラパススルー
    ControllerPassthrough,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::ConvertToController => "convert-to-controller",
            Self::ControllerPassthrough => "controller-passthrough",
        }
    }
}

/// コントローラボタン（XInput準拠のビット割り当て）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadButton {
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    Start,
    Back,
    LeftThumb,
    RightThumb,
    LeftShoulder,
    RightShoulder,
    A,
    B,
    X,
    Y,
}

impl PadButton {
    /// 全ボタンの列挙（パススルーのミラー処理用）
    pub const ALL: [PadButton; 14] = [
        Self::DpadUp,
        Self::DpadDown,
        Self::DpadLeft,
        Self::DpadRight,
        Self::Start,
        Self::Back,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::A,
        Self::B,
        Self::X,
        Self::Y,
    ];

    /// ボタンのビットマスクを取得
    pub fn bit(&self) -> u16 {
        match self {
            Self::DpadUp => 0x0001,
            Self::DpadDown => 0x0002,
            Self::DpadLeft => 0x0004,
            Self::DpadRight => 0x0008,
            Self::Start => 0x0010,
            Self::Back => 0x0020,
            Self::LeftThumb => 0x0040,
            Self::RightThumb => 0x0080,
            Self::LeftShoulder => 0x0100,
            Self::RightShoulder => 0x0200,
            Self::A => 0x1000,
            Self::B => 0x2000,
            Self::X => 0x4000,
            Self::Y => 0x8000,
        }
    }
}

/// トリガーの左右
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSide {
    Left,
    Right,
}

/// 物理コントローラの全状態（1回のポーリングで取得）
///
/// `packet`はXInputのパケットシーケンス番号に相当し、
/// 前回と同値なら状態未変化としてスキップできる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalPadState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
    pub packet: u32,
}

impl PhysicalPadState {
    /// 指定ボタンが押下されているか
    pub fn is_pressed(&self, button: PadButton) -> bool {
        self.buttons & button.bit() != 0
    }

    /// 右スティックに非ゼロの入力があるか（アクティビティ検出用）
    pub fn right_stick_active(&self) -> bool {
        self.right_x != 0 || self.right_y != 0
    }
}

/// 仮想シンクに最後に書き込まれた状態のスナップショット
///
/// ControllerArbitratorが自己検出除外のためだけに読み取る。
/// シンク側ラッパーが所有し、アービトレータからは読み取り専用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualSnapshot {
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

impl VirtualSnapshot {
    /// 全軸・全トリガーがゼロか
    pub fn is_neutral(&self) -> bool {
        self.left_x == 0
            && self.left_y == 0
            && self.right_x == 0
            && self.right_y == 0
            && self.left_trigger == 0
            && self.right_trigger == 0
    }

    /// 物理スロットの生の軸・トリガー状態と全フィールド一致するか
    pub fn matches(&self, state: &PhysicalPadState) -> bool {
        self.left_x == state.left_x
            && self.left_y == state.left_y
            && self.right_x == state.right_x
            && self.right_y == state.right_y
            && self.left_trigger == state.left_trigger
            && self.right_trigger == state.right_trigger
    }
}

/// 仮想シンクへ書き込む保留バッチ
///
/// InputOrchestratorのコンシューマが蓄積し、ティックごとに
/// 1回のbatch-then-submitで反映される。ロック下でのみ変更される。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStateBatch {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
}

impl ControllerStateBatch {
    /// ボタンビットを設定/解除
    pub fn set_button(&mut self, button: PadButton, pressed: bool) {
        if pressed {
            self.buttons |= button.bit();
        } else {
            self.buttons &= !button.bit();
        }
    }

    /// 指定ボタンが押下状態か
    pub fn is_pressed(&self, button: PadButton) -> bool {
        self.buttons & button.bit() != 0
    }
}

/// 記録されたマウス移動の1サンプル（生のdx, dy）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSample {
    pub dx: f32,
    pub dy: f32,
}

/// 記録パターン
///
/// 名前付き・タイムスタンプ付きの順序付き生サンプル列。
/// 記録で作成され、シミュレーション/エクスポートで消費される。保存後は不変。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub created_at: SystemTime,
    pub samples: Vec<PatternSample>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Pattern {
    /// 1パターンあたりの最大サンプル数
    pub const MAX_SAMPLES: usize = 5_000;

    pub fn new(name: impl Into<String>, samples: Vec<PatternSample>) -> Self {
        Self {
            name: name.into(),
            created_at: SystemTime::now(),
            samples,
            notes: String::new(),
            tags: Vec::new(),
        }
    }
}

/// キーコード（バインディング対象の閉集合）
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    W,
    A,
    S,
    D,
    Space,
    ShiftLeft,
    CtrlLeft,
    Tab,
    Q,
    E,
    R,
    F,
}

/// マウスボタン
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// キャプチャスレッドから流入する生入力イベント
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key { key: KeyCode, pressed: bool },
    MouseMove { dx: f32, dy: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    Wheel { delta: i32 },
}
