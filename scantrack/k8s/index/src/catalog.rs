//! Static vocabulary of the report kinds the scanning operator publishes.
//!
//! The catalog seeds short names for discovered kinds and answers lookups
//! while discovery has never succeeded (a fresh process pointed at an
//! RBAC-restricted cluster still needs to name its kinds). The live
//! registry, not the catalog, decides whether a kind is actually installed.

use scantrack_core::{ReportKind, REPORTS_API_VERSION};
use std::collections::HashMap;

/// plural name, short name, Kind, namespaced
const KINDS: &[(&str, &str, &str, bool)] = &[
    ("vulnerabilityreports", "vuln", "VulnerabilityReport", true),
    ("configauditreports", "configaudit", "ConfigAuditReport", true),
    ("exposedsecretreports", "exposedsecret", "ExposedSecretReport", true),
    ("sbomreports", "sbom", "SbomReport", true),
    ("infraassessmentreports", "infraassessment", "InfraAssessmentReport", true),
    ("rbacassessmentreports", "rbacassessment", "RbacAssessmentReport", true),
    ("clustervulnerabilityreports", "", "ClusterVulnerabilityReport", false),
    ("clusterconfigauditreports", "", "ClusterConfigAuditReport", false),
    ("clusterrbacassessmentreports", "", "ClusterRbacAssessmentReport", false),
    ("clusterinfraassessmentreports", "", "ClusterInfraAssessmentReport", false),
    ("clustersbomreports", "", "ClusterSbomReport", false),
    ("clustercompliancereports", "compliance", "ClusterComplianceReport", false),
];

#[derive(Debug)]
pub struct ReportKindCatalog {
    kinds: Vec<ReportKind>,
    by_name: HashMap<String, usize>,
}

impl Default for ReportKindCatalog {
    fn default() -> Self {
        let kinds: Vec<ReportKind> = KINDS
            .iter()
            .map(|&(name, short_name, kind, namespaced)| ReportKind {
                name: name.to_string(),
                short_name: short_name.to_string(),
                api_version: REPORTS_API_VERSION.to_string(),
                namespaced,
                kind: kind.to_string(),
            })
            .collect();

        let mut by_name = HashMap::new();
        for (i, kind) in kinds.iter().enumerate() {
            by_name.insert(kind.name.clone(), i);
            if !kind.short_name.is_empty() {
                by_name.insert(kind.short_name.clone(), i);
            }
        }
        Self { kinds, by_name }
    }
}

impl ReportKindCatalog {
    pub fn all(&self) -> &[ReportKind] {
        &self.kinds
    }

    /// Looks a kind up by plural name or operator short name.
    pub fn get(&self, name: &str) -> Option<&ReportKind> {
        self.by_name.get(name).map(|&i| &self.kinds[i])
    }
}
