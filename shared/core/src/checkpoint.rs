use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheme prefix for checkpoint references that cross a job boundary. The
/// control plane expands these at load time; clients never touch storage.
pub const CROSS_JOB_SCHEME: &str = "cross_job://";

/// Identity of a saved checkpoint: the job that produced it plus the name it
/// was saved under. Checkpoints are immutable; a new save always produces a
/// new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId {
    pub job: String,
    pub name: String,
}

impl CheckpointId {
    pub fn new(job: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job, self.name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointRefError {
    #[error("job id {0:?} contains '/', which would make a cross-job reference ambiguous")]
    SlashInJobId(String),
    #[error("checkpoint name is empty")]
    EmptyName,
}

/// Turns checkpoint names into references the consuming job's deployment can
/// load. Pure string transform: no storage or network access, deterministic.
#[derive(Debug, Clone)]
pub struct CheckpointRefResolver {
    consuming_job: String,
}

impl CheckpointRefResolver {
    pub fn new(consuming_job: impl Into<String>) -> Self {
        Self {
            consuming_job: consuming_job.into(),
        }
    }

    /// Resolves `name` into a loadable reference.
    ///
    /// Fully-qualified references (anything with a scheme or an absolute
    /// path) pass through unchanged, so resolution is idempotent. Same-job
    /// names pass through too. Only a name owned by a different job becomes
    /// a `cross_job://` token.
    pub fn resolve(
        &self,
        name: &str,
        source_job: Option<&str>,
    ) -> Result<String, CheckpointRefError> {
        if name.is_empty() {
            return Err(CheckpointRefError::EmptyName);
        }
        if is_fully_qualified(name) {
            return Ok(name.to_string());
        }
        match source_job {
            None => Ok(name.to_string()),
            Some(job) if job == self.consuming_job => Ok(name.to_string()),
            Some(job) => {
                if job.contains('/') {
                    return Err(CheckpointRefError::SlashInJobId(job.to_string()));
                }
                Ok(format!("{CROSS_JOB_SCHEME}{job}/{name}"))
            }
        }
    }

    /// Resolves a full checkpoint identity from the consuming job's side.
    pub fn resolve_id(&self, checkpoint: &CheckpointId) -> Result<String, CheckpointRefError> {
        self.resolve(&checkpoint.name, Some(&checkpoint.job))
    }
}

fn is_fully_qualified(name: &str) -> bool {
    name.contains("://") || name.starts_with('/')
}

/// Inverse of cross-job resolution: splits a `cross_job://` token back into
/// `(job, name)`. Returns `None` for anything else.
pub fn parse_cross_job(reference: &str) -> Option<(&str, &str)> {
    let rest = reference.strip_prefix(CROSS_JOB_SCHEME)?;
    let (job, name) = rest.split_once('/')?;
    (!job.is_empty() && !name.is_empty()).then_some((job, name))
}
