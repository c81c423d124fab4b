//! Workflow definitions
//!
//! A workflow is an ordered list of stages for one entity type. The built-in
//! catalog carries the tendering, courier, EMD and operation workflows; config
//! files can replace any of them by code or add new ones.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::identity::EntityType;
use crate::core::timer::MAX_DURATION_MS;

/// One stage of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stage key, unique within the workflow (e.g. "tender_info")
    pub key: String,
    pub name: String,
    /// Nominal budget; steps without one must be started with an explicit allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_hours: Option<f64>,
    /// Count the budget in business hours only
    #[serde(default)]
    pub business_hours_only: bool,
    /// Only optional steps can be skipped
    #[serde(default)]
    pub optional: bool,
    /// Anchor the deadline to the run's due date, e.g. -72 for three days before it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_offset_hours: Option<f64>,
}

impl StepDefinition {
    fn timed(key: &str, name: &str, hours: f64, business_hours_only: bool) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            allocated_hours: Some(hours),
            business_hours_only,
            optional: false,
            deadline_offset_hours: None,
        }
    }

    fn untimed(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            allocated_hours: None,
            business_hours_only: false,
            optional: false,
            deadline_offset_hours: None,
        }
    }

    fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Due `hours` before the run's due date
    fn before_due(mut self, hours: f64) -> Self {
        self.deadline_offset_hours = Some(-hours);
        self
    }

    /// Nominal budget in milliseconds
    pub fn allocated_ms(&self) -> Option<i64> {
        self.allocated_hours
            .map(|h| (h * 3_600_000.0).round() as i64)
            .filter(|ms| *ms > 0)
    }

    pub fn allocated(&self) -> Option<Duration> {
        self.allocated_ms().map(Duration::milliseconds)
    }

    /// Offset from the run's due date in milliseconds
    pub fn deadline_offset_ms(&self) -> Option<i64> {
        self.deadline_offset_hours
            .map(|h| (h * 3_600_000.0).round() as i64)
    }
}

/// An ordered stage list for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow code (e.g. "TENDERING_WF")
    pub code: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Check the definition is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("workflow code must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return Err(format!("workflow {} has no steps", self.code));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.key.trim().is_empty() {
                return Err(format!("workflow {}: step {} has an empty key", self.code, i + 1));
            }
            if self.steps[..i].iter().any(|s| s.key == step.key) {
                return Err(format!(
                    "workflow {}: duplicate step key '{}'",
                    self.code, step.key
                ));
            }
            if let Some(hours) = step.allocated_hours {
                if !hours.is_finite() || hours <= 0.0 || hours * 3_600_000.0 > MAX_DURATION_MS as f64
                {
                    return Err(format!(
                        "workflow {}: step '{}' must have a positive allocation of at most ten years (got {})",
                        self.code, step.key, hours
                    ));
                }
            }
            if let Some(hours) = step.deadline_offset_hours {
                if !hours.is_finite() || hours.abs() * 3_600_000.0 > MAX_DURATION_MS as f64 {
                    return Err(format!(
                        "workflow {}: step '{}' has an out-of-range deadline offset ({})",
                        self.code, step.key, hours
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn step(&self, key: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.key == key)
    }
}

/// Workflow definitions by code
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// The built-in definitions, with `overrides` replacing or extending them by code
    pub fn new(overrides: &[WorkflowDefinition]) -> Self {
        let mut workflows: BTreeMap<String, WorkflowDefinition> = builtin()
            .into_iter()
            .map(|wf| (wf.code.clone(), wf))
            .collect();
        for wf in overrides {
            workflows.insert(wf.code.clone(), wf.clone());
        }
        Self { workflows }
    }

    pub fn get(&self, code: &str) -> Option<&WorkflowDefinition> {
        self.workflows
            .get(code)
            .or_else(|| self.workflows.values().find(|wf| wf.code.eq_ignore_ascii_case(code)))
    }

    pub fn all(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }

    /// Definitions applicable to an entity type
    pub fn for_entity(&self, entity_type: EntityType) -> Vec<&WorkflowDefinition> {
        self.workflows
            .values()
            .filter(|wf| wf.entity_type == entity_type)
            .collect()
    }
}

/// Built-in workflow definitions
pub fn builtin() -> Vec<WorkflowDefinition> {
    use StepDefinition as S;

    vec![
        WorkflowDefinition {
            code: "TENDERING_WF".to_string(),
            name: "Tendering Workflow".to_string(),
            entity_type: EntityType::Tender,
            description: Some("Complete workflow for tender management".to_string()),
            steps: vec![
                S::timed("tender_info", "Tender Info", 72.0, true),
                S::timed("tender_approval", "Tender Approval", 24.0, true),
                S::timed("rfq_sent", "RFQ Sent", 24.0, true),
                S::untimed("rfq_dashboard", "RFQ Dashboard").optional(),
                S::timed("emd_requested", "EMD Requested", 24.0, true).optional(),
                S::timed("physical_docs", "Physical Docs", 48.0, true),
                S::timed("document_checklist", "Document Checklist", 72.0, false).before_due(72.0),
                S::timed("costing_sheets", "Costing Sheets", 72.0, false).before_due(72.0),
                S::timed("costing_approval", "Costing Approval", 48.0, false).before_due(48.0),
                S::timed("bid_submission", "Bid Submission", 24.0, false).before_due(24.0),
                S::untimed("tq_replied", "TQ Replied").optional(),
                S::untimed("ra_approved", "RA Approved").optional(),
                S::untimed("tender_result", "Tender Result").optional(),
            ],
        },
        WorkflowDefinition {
            code: "COURIER_WF".to_string(),
            name: "Courier Workflow".to_string(),
            entity_type: EntityType::Courier,
            description: Some("Courier dispatch tracking".to_string()),
            steps: vec![
                S::untimed("courier_created", "Courier Created"),
                S::timed("courier_dispatched", "Courier Dispatched", 2.0, true),
            ],
        },
        WorkflowDefinition {
            code: "EMD_WF".to_string(),
            name: "EMD Workflow".to_string(),
            entity_type: EntityType::Emd,
            description: Some("Earnest money deposit instruments".to_string()),
            steps: vec![
                S::untimed("pop_acc_form", "Pay on Portal").optional(),
                S::untimed("bt_acc_form", "Bank Transfer").optional(),
                S::untimed("cheque_acc_form", "Cheque").optional(),
                S::timed("dd_acc_form", "Demand Draft", 3.0, true).optional(),
                S::timed("fdr_acc_form", "FDR", 3.0, true).optional(),
                S::untimed("bg_acc_form", "Bank Guarantee").optional(),
            ],
        },
        WorkflowDefinition {
            code: "OPERATION_WF".to_string(),
            name: "Operation Workflow".to_string(),
            entity_type: EntityType::OperationKickoff,
            description: Some("Work order acceptance and kickoff".to_string()),
            steps: vec![
                S::untimed("wo_details", "WO Details"),
                S::untimed("wo_acceptance", "WO Acceptance"),
                S::untimed("kickoff_meeting", "Kickoff Meeting"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_definitions_are_valid() {
        for wf in builtin() {
            wf.validate().unwrap();
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = WorkflowCatalog::new(&[]);
        let wf = catalog.get("TENDERING_WF").unwrap();
        assert_eq!(wf.entity_type, EntityType::Tender);
        assert_eq!(wf.steps[0].key, "tender_info");
        assert_eq!(wf.steps[0].allocated_ms(), Some(72 * 3_600_000));
        assert!(catalog.get("tendering_wf").is_some());
        assert!(catalog.get("NOPE").is_none());
        assert_eq!(catalog.for_entity(EntityType::Courier).len(), 1);
    }

    #[test]
    fn test_override_replaces_builtin() {
        let custom = WorkflowDefinition {
            code: "COURIER_WF".to_string(),
            name: "Express Courier".to_string(),
            entity_type: EntityType::Courier,
            description: None,
            steps: vec![StepDefinition::timed("courier_dispatched", "Dispatch", 1.0, false)],
        };
        let catalog = WorkflowCatalog::new(&[custom]);
        let wf = catalog.get("COURIER_WF").unwrap();
        assert_eq!(wf.name, "Express Courier");
        assert_eq!(wf.steps.len(), 1);
        assert!(catalog.get("EMD_WF").is_some());
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let mut wf = builtin().remove(1);
        wf.steps.push(wf.steps[0].clone());
        assert!(wf.validate().unwrap_err().contains("duplicate"));

        let mut wf = builtin().remove(1);
        wf.steps[1].allocated_hours = Some(0.0);
        assert!(wf.validate().is_err());

        let mut wf = builtin().remove(1);
        wf.steps.clear();
        assert!(wf.validate().is_err());

        let mut wf = builtin().remove(1);
        wf.steps[1].allocated_hours = Some(1e9);
        assert!(wf.validate().is_err());

        let mut wf = builtin().remove(1);
        wf.steps[1].deadline_offset_hours = Some(f64::NAN);
        assert!(wf.validate().is_err());
    }

    #[test]
    fn test_countdown_stages_anchor_to_due_date() {
        let catalog = WorkflowCatalog::new(&[]);
        let wf = catalog.get("TENDERING_WF").unwrap();
        let offsets: Vec<_> = wf
            .steps
            .iter()
            .filter_map(|s| s.deadline_offset_hours.map(|h| (s.key.as_str(), h)))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("document_checklist", -72.0),
                ("costing_sheets", -72.0),
                ("costing_approval", -48.0),
                ("bid_submission", -24.0),
            ]
        );
        assert_eq!(
            wf.step("bid_submission").unwrap().deadline_offset_ms(),
            Some(-24 * 3_600_000)
        );
    }

    #[test]
    fn test_definition_yaml_shape() {
        let yaml = r#"
code: AMC_WF
name: AMC Visits
entity_type: SERVICE_AMC
steps:
  - key: visit_scheduled
    name: Visit Scheduled
    allocated_hours: 16
    business_hours_only: true
  - key: report_filed
    name: Report Filed
  - key: visit_closed
    name: Visit Closed
    allocated_hours: 8
    deadline_offset_hours: -24
    optional: true
"#;
        let wf: WorkflowDefinition = serde_yml::from_str(yaml).unwrap();
        wf.validate().unwrap();
        assert_eq!(wf.entity_type, EntityType::ServiceAmc);
        assert_eq!(wf.steps[1].allocated_ms(), None);
        assert!(!wf.steps[1].optional);
        assert!(wf.steps[2].optional);
        assert_eq!(wf.steps[2].deadline_offset_ms(), Some(-24 * 3_600_000));
    }
}
