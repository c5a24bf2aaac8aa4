//! Per-pair setup and teardown.
//!
//! Each (client, share) pair owns a [`ResourceStateMachine`]. The
//! [`Provisioner`] moves every machine into its own task, drives it to a
//! settled state and collects it back; the [`TeardownCoordinator`] takes the
//! same machines and unwinds whatever each one reached.

pub mod machine;
pub mod provision;
pub mod state;
pub mod teardown;

pub use machine::{LifecyclePolicy, ResourceStateMachine, ShareOps};
pub use provision::{ProvisionReport, Provisioner};
pub use state::{ResourceState, Stage, StageFailure};
pub use teardown::{TeardownCoordinator, TeardownOps, TeardownPolicy, TeardownReport};
