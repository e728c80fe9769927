//! Desync Diagnostics
//!
//! Field-level comparison of a local snapshot against the authority's.
//! The report is for operators and logs only - the consensus path ships
//! hashes and whole snapshots, never diffs.

use serde::{Deserialize, Serialize};

use crate::input::history::InputRecord;
use crate::store::component::ComponentDef;
use crate::store::snapshot::Snapshot;

/// One diverging field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Raw entity id.
    pub entity: u32,
    /// Component name.
    pub component: String,
    /// Field name.
    pub field: String,
    /// Local raw bits.
    pub local: u32,
    /// Authority raw bits.
    pub authority: u32,
}

/// Structured report produced on entering DESYNC.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DesyncReport {
    /// Frame of the local snapshot.
    pub local_frame: u32,
    /// Frame of the authority snapshot.
    pub authority_frame: u32,
    /// Entities absent on the authority (ids).
    pub only_local: Vec<u32>,
    /// Entities absent locally (ids).
    pub only_authority: Vec<u32>,
    /// Entities present on both sides with different types.
    pub type_mismatches: Vec<u32>,
    /// Diverging fields of entities present on both sides.
    pub field_diffs: Vec<FieldDiff>,
    /// Fields compared across common entities.
    pub fields_compared: usize,
    /// Recent input records for root-cause analysis.
    pub recent_inputs: Vec<InputRecord>,
}

impl DesyncReport {
    /// Fraction of compared fields that diverge, in per-mille. Entities
    /// missing on either side count as fully diverged.
    pub fn magnitude_permille(&self) -> u32 {
        let missing_penalty = (self.only_local.len()
            + self.only_authority.len()
            + self.type_mismatches.len())
            * 1000;
        if self.fields_compared == 0 {
            return if missing_penalty > 0 { 1000 } else { 0 };
        }
        let field_part = self.field_diffs.len() * 1000 / self.fields_compared;
        (field_part + missing_penalty / self.fields_compared.max(1)).min(1000) as u32
    }

    /// Whether the two snapshots agreed completely.
    pub fn is_clean(&self) -> bool {
        self.only_local.is_empty()
            && self.only_authority.is_empty()
            && self.type_mismatches.is_empty()
            && self.field_diffs.is_empty()
    }

    /// Render as JSON for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Compare two snapshots field by field.
///
/// Both snapshots must have been produced against the same registered
/// schema (`components` in registration order).
pub fn diff_snapshots(
    local: &Snapshot,
    authority: &Snapshot,
    components: &[ComponentDef],
    recent_inputs: Vec<InputRecord>,
) -> DesyncReport {
    let mut report = DesyncReport {
        local_frame: local.frame,
        authority_frame: authority.frame,
        recent_inputs,
        ..DesyncReport::default()
    };

    // merge-walk both ascending entity lists
    let mut li = 0;
    let mut ai = 0;
    while li < local.entities.len() || ai < authority.entities.len() {
        match (local.entities.get(li), authority.entities.get(ai)) {
            (Some(l), Some(a)) if l.id == a.id => {
                if l.type_idx != a.type_idx {
                    report.type_mismatches.push(l.id);
                } else {
                    diff_entity_fields(local, authority, components, li, ai, l.id, &mut report);
                }
                li += 1;
                ai += 1;
            }
            (Some(l), Some(a)) if l.id < a.id => {
                report.only_local.push(l.id);
                li += 1;
            }
            (Some(_), Some(a)) => {
                report.only_authority.push(a.id);
                ai += 1;
            }
            (Some(l), None) => {
                report.only_local.push(l.id);
                li += 1;
            }
            (None, Some(a)) => {
                report.only_authority.push(a.id);
                ai += 1;
            }
            (None, None) => break,
        }
    }

    report
}

fn diff_entity_fields(
    local: &Snapshot,
    authority: &Snapshot,
    components: &[ComponentDef],
    local_pos: usize,
    authority_pos: usize,
    entity: u32,
    report: &mut DesyncReport,
) {
    for (comp_idx, component) in components.iter().enumerate() {
        for (field_idx, field) in component.fields.iter().enumerate() {
            let lv = local.columns[comp_idx][field_idx][local_pos].bits();
            let av = authority.columns[comp_idx][field_idx][authority_pos].bits();
            report.fields_compared += 1;
            if lv != av {
                report.field_diffs.push(FieldDiff {
                    entity,
                    component: component.name.clone(),
                    field: field.name.clone(),
                    local: lv,
                    authority: av,
                });
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
