pub mod poller;
pub mod state_machine;

pub use poller::{DeploymentPoller, PollError};
pub use state_machine::DeploymentPhase;
