use serde::{Deserialize, Serialize};

/// Phase of a platform deployment, as reported by the apps API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentPhase {
    PendingBuild,
    Building,
    PendingDeploy,
    Deploying,
    Active,
    Superseded,
    Error,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl DeploymentPhase {
    pub fn parse(phase: &str) -> Self {
        match phase.trim().to_ascii_uppercase().as_str() {
            "PENDING_BUILD" => Self::PendingBuild,
            "BUILDING" => Self::Building,
            "PENDING_DEPLOY" => Self::PendingDeploy,
            "DEPLOYING" => Self::Deploying,
            "ACTIVE" => Self::Active,
            "SUPERSEDED" => Self::Superseded,
            "ERROR" => Self::Error,
            "FAILED" => Self::Failed,
            "CANCELED" | "CANCELLED" => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingBuild => "PENDING_BUILD",
            Self::Building => "BUILDING",
            Self::PendingDeploy => "PENDING_DEPLOY",
            Self::Deploying => "DEPLOYING",
            Self::Active => "ACTIVE",
            Self::Superseded => "SUPERSEDED",
            Self::Error => "ERROR",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if a deployment phase is terminal (no further transitions expected)
pub fn is_terminal(phase: &DeploymentPhase) -> bool {
    matches!(
        phase,
        DeploymentPhase::Active
            | DeploymentPhase::Superseded
            | DeploymentPhase::Error
            | DeploymentPhase::Failed
            | DeploymentPhase::Canceled
    )
}

/// Check if a terminal phase means the deployment did not go live
pub fn is_failed(phase: &DeploymentPhase) -> bool {
    matches!(
        phase,
        DeploymentPhase::Error | DeploymentPhase::Failed | DeploymentPhase::Canceled
    )
}

/// Position along the build/deploy path, for in-progress phases
fn progress(phase: &DeploymentPhase) -> Option<u8> {
    match phase {
        DeploymentPhase::PendingBuild => Some(0),
        DeploymentPhase::Building => Some(1),
        DeploymentPhase::PendingDeploy => Some(2),
        DeploymentPhase::Deploying => Some(3),
        _ => None,
    }
}

/// Check if an observed phase change is one the platform is expected to make
pub fn is_valid_transition(from: &DeploymentPhase, to: &DeploymentPhase) -> bool {
    use DeploymentPhase::*;

    match (from, to) {
        (a, b) if a == b => true,

        // A live deployment can only be replaced
        (Active, Superseded) => true,
        (from, _) if is_terminal(from) => false,

        (_, Unknown) | (Unknown, _) => true,

        // Any in-progress phase can fail or be canceled
        (_, Error | Failed | Canceled) => true,
        (_, Active) => true,

        // Build/Deploy path only moves forward (steps may be skipped between polls)
        (from, to) => match (progress(from), progress(to)) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        },
    }
}
