use std::path::PathBuf;

use super::build_error::BuildError;

/// The single terminal result of a build.
#[derive(Debug)]
pub enum BuildOutcome {
    Success(PathBuf),
    Failure(BuildError),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<PathBuf, BuildError> {
        match self {
            BuildOutcome::Success(path) => Ok(path),
            BuildOutcome::Failure(err) => Err(err),
        }
    }
}
