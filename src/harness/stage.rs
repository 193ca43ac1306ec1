//! Setup stages and the error that names the failing one

use std::fmt;

use crate::errors::Error;

/// Stages of [`super::Env::set_up`], in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupStage {
    Ports,
    Credentials,
    AuthBackend,
    TokenExchange,
    Readiness,
    Discovery,
    Proxy,
}

impl SetupStage {
    pub const ALL: [SetupStage; 7] = [
        SetupStage::Ports,
        SetupStage::Credentials,
        SetupStage::AuthBackend,
        SetupStage::TokenExchange,
        SetupStage::Readiness,
        SetupStage::Discovery,
        SetupStage::Proxy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Ports => "ports",
            SetupStage::Credentials => "credentials",
            SetupStage::AuthBackend => "auth-backend",
            SetupStage::TokenExchange => "token-exchange",
            SetupStage::Readiness => "readiness",
            SetupStage::Discovery => "discovery",
            SetupStage::Proxy => "proxy",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A setup failure, tagged with the stage that produced it
#[derive(Debug, thiserror::Error)]
#[error("STS flow setup failed at stage '{stage}': {source}")]
pub struct SetupError {
    pub stage: SetupStage,
    #[source]
    pub source: Error,
}

impl SetupError {
    pub fn new(stage: SetupStage, source: impl Into<Error>) -> Self {
        Self { stage, source: source.into() }
    }
}

/// Tag a result's error with a setup stage
pub(crate) trait StageExt<T> {
    fn at_stage(self, stage: SetupStage) -> Result<T, SetupError>;
}

impl<T, E: Into<Error>> StageExt<T> for Result<T, E> {
    fn at_stage(self, stage: SetupStage) -> Result<T, SetupError> {
        self.map_err(|e| SetupError::new(stage, e))
    }
}
