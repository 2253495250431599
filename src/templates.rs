//! Phase template registry.
//!
//! Holds the ordered, immutable catalog of phase definitions used to seed
//! every project. The catalog is either the built-in design-control
//! lifecycle or a JSON file supplied at startup; in both cases it is
//! validated before the server binds, so a broken catalog is a startup
//! failure rather than something discovered mid-workflow.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::WorkflowError;

/// A single phase template, before it is assigned a database id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub name: String,
    /// 1-based position in the lifecycle. Must be dense and unique across
    /// the template set.
    pub sort_order: i64,
    pub entry_criteria: String,
    pub exit_criteria: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

/// The full ordered template catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSet {
    pub templates: Vec<PhaseTemplate>,
}

impl TemplateSet {
    /// Load a template catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read templates file: {}", path.display()))?;
        let set: TemplateSet = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse templates JSON: {}", path.display()))?;
        Ok(set)
    }

    /// Save the catalog to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize templates to JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write templates file: {}", path.display()))?;
        Ok(())
    }

    /// The default design-control lifecycle.
    pub fn builtin() -> Self {
        let t = |name: &str, sort_order: i64, entry: &str, exit: &str, deliverables: &[&str]| {
            PhaseTemplate {
                name: name.to_string(),
                sort_order,
                entry_criteria: entry.to_string(),
                exit_criteria: exit.to_string(),
                deliverables: deliverables.iter().map(|d| d.to_string()).collect(),
            }
        };
        Self {
            templates: vec![
                t(
                    "Planning",
                    1,
                    "Project charter approved",
                    "Design and development plan reviewed and signed off",
                    &["Design and development plan", "Risk management plan"],
                ),
                t(
                    "Design Inputs",
                    2,
                    "Design plan gate passed",
                    "Input requirements complete, unambiguous, and non-conflicting",
                    &["Design input requirements", "Traceability matrix (inputs)"],
                ),
                t(
                    "Design Outputs",
                    3,
                    "Design inputs gate passed",
                    "Outputs traceable to inputs; essential outputs identified",
                    &["Specifications", "Drawings", "Traceability matrix (outputs)"],
                ),
                t(
                    "Verification",
                    4,
                    "Design outputs gate passed",
                    "Outputs verified against input requirements",
                    &["Verification protocols", "Verification reports"],
                ),
                t(
                    "Validation",
                    5,
                    "Verification gate passed",
                    "Product validated against user needs and intended use",
                    &["Validation protocols", "Validation reports"],
                ),
                t(
                    "Transfer",
                    6,
                    "Validation gate passed",
                    "Design transferred to production specifications",
                    &["Device master record", "Transfer checklist"],
                ),
            ],
        }
    }

    /// Templates in lifecycle order.
    pub fn ordered(&self) -> Vec<&PhaseTemplate> {
        let mut out: Vec<&PhaseTemplate> = self.templates.iter().collect();
        out.sort_by_key(|t| t.sort_order);
        out
    }

    /// Reject an empty catalog or a sort order with gaps or duplicates.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.templates.is_empty() {
            return Err(WorkflowError::Configuration(
                "template catalog is empty".to_string(),
            ));
        }
        let mut orders: Vec<i64> = self.templates.iter().map(|t| t.sort_order).collect();
        orders.sort_unstable();
        for (i, order) in orders.iter().enumerate() {
            let expected = (i + 1) as i64;
            if *order != expected {
                return Err(WorkflowError::Configuration(format!(
                    "sort_order must be dense and 1-based: expected {} at position {}, found {}",
                    expected,
                    i + 1,
                    order
                )));
            }
        }
        for t in &self.templates {
            if t.name.trim().is_empty() {
                return Err(WorkflowError::Configuration(format!(
                    "template at sort_order {} has an empty name",
                    t.sort_order
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let set = TemplateSet::builtin();
        set.validate().unwrap();
        assert_eq!(set.templates.len(), 6);
        let ordered = set.ordered();
        assert_eq!(ordered[0].name, "Planning");
        assert_eq!(ordered[5].name, "Transfer");
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let set = TemplateSet { templates: vec![] };
        let err = set.validate().unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[test]
    fn gap_in_sort_order_is_rejected() {
        let mut set = TemplateSet::builtin();
        set.templates.retain(|t| t.sort_order != 3);
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("dense"));
    }

    #[test]
    fn duplicate_sort_order_is_rejected() {
        let mut set = TemplateSet::builtin();
        set.templates[1].sort_order = 1;
        assert!(set.validate().is_err());
    }

    #[test]
    fn zero_based_sort_order_is_rejected() {
        let mut set = TemplateSet::builtin();
        for t in &mut set.templates {
            t.sort_order -= 1;
        }
        assert!(set.validate().is_err());
    }

    #[test]
    fn load_save_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        let set = TemplateSet::builtin();
        set.save(&path).unwrap();
        let loaded = TemplateSet::load(&path).unwrap();
        assert_eq!(loaded.templates, set.templates);
    }

    #[test]
    fn load_missing_file_errors() {
        let err = TemplateSet::load(Path::new("/nonexistent/templates.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
