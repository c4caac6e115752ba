pub mod execution;
pub mod pipeline;
pub mod preview;

pub use execution::{Clearance, PendingApproval};
pub use pipeline::{Guard, GuardDeps, BATCH_ABORTED};
