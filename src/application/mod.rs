//! Application層: ユースケースの組み立て
//!
//! Domainのポートとロジックを束ね、スレッド・キュー・モード遷移を駆動する。

pub mod arbitrator;
pub mod mode;
pub mod orchestrator;
pub mod passthrough;
pub mod recoil;

pub use arbitrator::{ConnectionEvent, ControllerArbitrator};
pub use mode::{
    ConvertMode, ModeContext, ModeCoordinator, ModeEvent, ModeHandler, NativeMode,
    PassthroughMode,
};
pub use orchestrator::{InputOrchestrator, InputSender};
pub use passthrough::{PassthroughLoop, PassthroughStatus};
pub use recoil::{AntiRecoilEngine, CompensationEvent, PatternSimulation, SimulationSample};
