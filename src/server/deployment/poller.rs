use std::time::Duration;

use thiserror::Error;

use super::state_machine::{is_terminal, is_valid_transition, DeploymentPhase};
use crate::server::platform::{PlatformClient, PlatformError};

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("deployment did not finish within {timeout:?} (last phase {last})")]
    Timeout {
        timeout: Duration,
        last: DeploymentPhase,
    },
}

/// Polls a deployment until it reaches a terminal phase
pub struct DeploymentPoller {
    platform: PlatformClient,
    interval: Duration,
    timeout: Duration,
}

impl DeploymentPoller {
    pub fn new(platform: PlatformClient, interval: Duration, timeout: Duration) -> Self {
        Self {
            platform,
            interval,
            timeout,
        }
    }

    pub async fn wait(
        &self,
        token: &str,
        app_id: &str,
        deployment_id: &str,
        initial: DeploymentPhase,
    ) -> Result<DeploymentPhase, PollError> {
        if is_terminal(&initial) {
            return Ok(initial);
        }

        let mut last = initial;
        let poll = async {
            loop {
                tokio::time::sleep(self.interval).await;

                let deployment = self
                    .platform
                    .get_deployment(token, app_id, deployment_id)
                    .await?;
                let phase = DeploymentPhase::parse(&deployment.phase);

                if phase != last {
                    if !is_valid_transition(&last, &phase) {
                        tracing::warn!(
                            deployment_id = %deployment_id,
                            from = %last,
                            to = %phase,
                            "Unexpected deployment phase change"
                        );
                    }
                    tracing::info!(deployment_id = %deployment_id, phase = %phase, "Deployment phase changed");
                    last = phase;
                }

                if is_terminal(&phase) {
                    return Ok::<_, PollError>(phase);
                }
            }
        };

        let outcome = tokio::time::timeout(self.timeout, poll).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(PollError::Timeout {
                timeout: self.timeout,
                last,
            }),
        }
    }
}
