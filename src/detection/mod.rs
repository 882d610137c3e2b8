pub mod crop;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a crop was judged not to come from the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// One of the images has no detectable keypoints.
    InsufficientFeatures,
    /// Too few matches survived the ratio test.
    InsufficientMatches { good: usize, required: usize },
    /// No geometrically consistent transform explains the matches.
    HomographyNotFound,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientFeatures => write!(f, "no distinguishable features"),
            RejectReason::InsufficientMatches { good, required } => write!(
                f,
                "insufficient good matches ({good} found, {required} required)"
            ),
            RejectReason::HomographyNotFound => write!(f, "no consistent geometric transform"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Belongs,
    DoesNotBelong(RejectReason),
}

impl Verdict {
    pub fn belongs(&self) -> bool {
        matches!(self, Verdict::Belongs)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Belongs => None,
            Verdict::DoesNotBelong(reason) => Some(*reason),
        }
    }

    /// Short tag: `BELONGS` or `DOES_NOT_BELONG`.
    pub fn tag(&self) -> &'static str {
        match self {
            Verdict::Belongs => "BELONGS",
            Verdict::DoesNotBelong(_) => "DOES_NOT_BELONG",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Belongs => write!(f, "BELONGS"),
            Verdict::DoesNotBelong(reason) => write!(f, "DOES_NOT_BELONG ({reason})"),
        }
    }
}

/// Pipeline checkpoints, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    ImagesLoaded,
    FeaturesExtracted,
    Matched,
    Estimated,
    Confirmed,
}

/// Ordered, human-readable trail of a verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationLog {
    lines: Vec<String>,
}

impl VerificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::debug!("{line}");
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl fmt::Display for VerificationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_tags() {
        assert_eq!(Verdict::Belongs.tag(), "BELONGS");
        let rejected = Verdict::DoesNotBelong(RejectReason::HomographyNotFound);
        assert_eq!(rejected.tag(), "DOES_NOT_BELONG");
        assert_eq!(rejected.reason(), Some(RejectReason::HomographyNotFound));
        assert!(!rejected.belongs());
    }

    #[test]
    fn test_reason_reports_counts() {
        let reason = RejectReason::InsufficientMatches { good: 4, required: 10 };
        assert_eq!(
            reason.to_string(),
            "insufficient good matches (4 found, 10 required)"
        );
    }

    #[test]
    fn test_log_keeps_order() {
        let mut log = VerificationLog::new();
        log.push("first");
        log.push(String::from("second"));

        assert_eq!(log.lines(), ["first", "second"]);
        assert_eq!(log.to_string(), "first\nsecond");
        assert!(log.contains("sec"));
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(Stage::ImagesLoaded < Stage::FeaturesExtracted);
        assert!(Stage::Estimated < Stage::Confirmed);
    }
}
