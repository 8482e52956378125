use std::fmt;
use std::str::FromStr;

/// Environment variable read by [`RepositoryConfig::from_env`].
pub const ROLLBACK_POLICY_ENV: &str = "INSERT_ROLLBACK_POLICY";

/// How an insert undoes work when a step after the root row fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Roll back the whole transaction, root row included.
    #[default]
    Full,
    /// Roll back to a savepoint taken after the root row, and hand the root
    /// row's fate to the caller.
    Savepoint,
}

impl fmt::Display for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackPolicy::Full => f.write_str("full"),
            RollbackPolicy::Savepoint => f.write_str("savepoint"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown rollback policy '{0}', expected 'full' or 'savepoint'")]
    UnknownRollbackPolicy(String),
}

impl FromStr for RollbackPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(RollbackPolicy::Full),
            "savepoint" => Ok(RollbackPolicy::Savepoint),
            _ => Err(ConfigError::UnknownRollbackPolicy(s.to_string())),
        }
    }
}

/// Settings shared by every insert a repository performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub rollback_policy: RollbackPolicy,
}

impl RepositoryConfig {
    pub fn new(rollback_policy: RollbackPolicy) -> Self {
        Self { rollback_policy }
    }

    /// Reads the policy from `INSERT_ROLLBACK_POLICY`, falling back to the
    /// default when the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(ROLLBACK_POLICY_ENV) {
            Ok(value) => Ok(Self::new(value.parse()?)),
            Err(_) => Ok(Self::default()),
        }
    }
}
