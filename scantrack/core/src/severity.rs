use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity bucket of a report, from worst to best.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    None,
    Unknown,
}

/// The summary count fields checked, in priority order. The first nonzero
/// bucket determines the report's severity.
const BUCKETS: &[(&str, Severity)] = &[
    ("criticalCount", Severity::Critical),
    ("highCount", Severity::High),
    ("mediumCount", Severity::Medium),
    ("lowCount", Severity::Low),
    ("noneCount", Severity::None),
];

impl Severity {
    /// Derives a severity from a report object by inspecting its nested
    /// summary counts.
    ///
    /// The operator nests the summary differently per report kind
    /// (`.report.summary`, `.status.summary`, or top-level `.summary`);
    /// the first structure present is used.
    pub fn from_report(data: &Value) -> Self {
        let summary = data
            .pointer("/report/summary")
            .or_else(|| data.pointer("/status/summary"))
            .or_else(|| data.pointer("/summary"));

        match summary {
            Some(summary) => Self::from_summary(summary),
            None => Self::Unknown,
        }
    }

    /// Derives a severity from a summary-count object.
    pub fn from_summary(summary: &Value) -> Self {
        for (field, severity) in BUCKETS {
            if summary.get(field).and_then(Value::as_u64).unwrap_or(0) > 0 {
                return *severity;
            }
        }
        Self::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_nonzero_bucket_wins() {
        let summary = json!({
            "criticalCount": 0,
            "highCount": 2,
            "mediumCount": 7,
            "lowCount": 1,
        });
        assert_eq!(Severity::from_summary(&summary), Severity::High);
    }

    #[test]
    fn critical_dominates() {
        let summary = json!({"criticalCount": 1, "highCount": 100});
        assert_eq!(Severity::from_summary(&summary), Severity::Critical);
    }

    #[test]
    fn all_zero_is_unknown() {
        let summary = json!({"criticalCount": 0, "highCount": 0});
        assert_eq!(Severity::from_summary(&summary), Severity::Unknown);
    }

    #[test]
    fn none_bucket_wins_over_unknown() {
        let summary = json!({"criticalCount": 0, "noneCount": 3});
        assert_eq!(Severity::from_summary(&summary), Severity::None);
    }

    #[test]
    fn vulnerability_report_shape() {
        let report = json!({
            "report": {
                "summary": {"criticalCount": 0, "highCount": 0, "mediumCount": 4},
            },
        });
        assert_eq!(Severity::from_report(&report), Severity::Medium);
    }

    #[test]
    fn status_summary_shape() {
        let report = json!({
            "status": {"summary": {"criticalCount": 1}},
        });
        assert_eq!(Severity::from_report(&report), Severity::Critical);
    }

    #[test]
    fn missing_summary_is_unknown() {
        assert_eq!(Severity::from_report(&json!({"spec": {}})), Severity::Unknown);
    }

    #[test]
    fn buckets_are_ordered_worst_first() {
        assert!(Severity::Critical < Severity::High);
        assert!(Severity::Low < Severity::None);
        assert!(Severity::None < Severity::Unknown);
    }
}
