use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

static SUBJECT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9:._-]{0,127}$").expect("valid subject id regex")
});

/// The kind of protected resource an approval governs.
///
/// The workflow treats the kind purely as a partition key; no behavior
/// differs between kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A managed endpoint (client machine).
    Endpoint,
    /// A batch investigative job (hunt).
    Job,
    /// A scheduled job (cron job).
    ScheduledJob,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 3] = [
        SubjectKind::Endpoint,
        SubjectKind::Job,
        SubjectKind::ScheduledJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Endpoint => "endpoint",
            SubjectKind::Job => "job",
            SubjectKind::ScheduledJob => "scheduled_job",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = AppError;

    /// Accepts the canonical names as well as the legacy `client`, `hunt`
    /// and `cron` path segments.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "endpoint" | "client" => Ok(SubjectKind::Endpoint),
            "job" | "hunt" => Ok(SubjectKind::Job),
            "scheduled_job" | "scheduled-job" | "cron" | "cron_job" => {
                Ok(SubjectKind::ScheduledJob)
            }
            other => Err(AppError::InvalidArgument(format!(
                "unknown subject kind: {:?}",
                other
            ))),
        }
    }
}

/// A protected resource: kind tag plus opaque identifier.
///
/// Deserialization runs the same id check as [`Subject::new`]. Values
/// built field-by-field are re-checked by the workflow via
/// [`Subject::validate`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSubject")]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
}

#[derive(Deserialize)]
struct RawSubject {
    kind: SubjectKind,
    id: String,
}

impl TryFrom<RawSubject> for Subject {
    type Error = AppError;

    fn try_from(raw: RawSubject) -> Result<Self, Self::Error> {
        Self::new(raw.kind, raw.id)
    }
}

impl Subject {
    pub fn new(kind: SubjectKind, id: impl Into<String>) -> Result<Self, AppError> {
        let subject = Self {
            kind,
            id: id.into(),
        };
        subject.validate()?;
        Ok(subject)
    }

    /// `InvalidArgument` unless the id is well-formed.
    pub fn validate(&self) -> Result<(), AppError> {
        if SUBJECT_ID_RE.is_match(&self.id) {
            return Ok(());
        }
        Err(AppError::InvalidArgument(format!(
            "malformed {} id: {:?}",
            self.kind, self.id
        )))
    }

    pub fn endpoint(id: impl Into<String>) -> Result<Self, AppError> {
        Self::new(SubjectKind::Endpoint, id)
    }

    pub fn job(id: impl Into<String>) -> Result<Self, AppError> {
        Self::new(SubjectKind::Job, id)
    }

    pub fn scheduled_job(id: impl Into<String>) -> Result<Self, AppError> {
        Self::new(SubjectKind::ScheduledJob, id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}
