pub mod bounded;
pub mod director;
pub mod mediator;

pub use bounded::{fault_barrier, panic_message, run_bounded};
pub use director::{Director, DirectorStatus, RunSummary};
pub use mediator::{Mediator, PassOutcome};
