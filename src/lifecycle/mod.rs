pub mod finalize;
pub mod health;
pub mod locks;
pub mod queue;
pub mod repair;
pub mod status;

pub use finalize::{run_finalize, FinalizeReport};
pub use locks::{JobLockManager, Lease, LockOutcome};
