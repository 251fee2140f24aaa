//! Infrastructure層: Domainのポートに対する具体実装
//!
//! モックアダプタ、クロック、JSON永続化。
//! プラットフォーム固有のコントローラAPIはここに差し込まれる。

pub mod clock;
pub mod mock_pad;
pub mod profile_store;

pub use clock::{ManualClock, SystemClock};
pub use mock_pad::{MockPhysicalPad, MockVirtualPad, MockVirtualProbe};
pub use profile_store::{JsonProfileStore, MemoryProfileStore};
