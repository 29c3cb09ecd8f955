//! Ephemeral message storage.
//!
//! Messages are held until they are read once or their time-to-live passes,
//! whichever comes first. A background [`ExpirySweeper`] removes the ones
//! nobody read.

mod clock;
mod error;
mod store;
mod sweeper;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use store::MessageStore;
pub use sweeper::{spawn_sweeper, ExpirySweeper, SweepConfig, SweepPhase, SweepReport, SweeperHandle};
pub use types::*;
