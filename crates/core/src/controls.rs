//! Control checklist evaluation.
//!
//! Permit types carry their checklists as configuration, so the resolver is
//! stateless and never special-cases a type by name.

use std::collections::BTreeMap;

use crate::domain::permit_type::{ControlPhase, PermitType, RequiredControl};

#[derive(Clone, Debug, Default)]
pub struct ControlChecklistResolver;

impl ControlChecklistResolver {
    pub fn new() -> Self {
        Self
    }

    /// Ids of `required == true` controls of the given phase that are absent
    /// or unchecked in the completion map. Optional controls stay visible
    /// for record-keeping but never block.
    pub fn missing_controls(
        &self,
        permit_type: &PermitType,
        completions: &BTreeMap<String, bool>,
        phase: ControlPhase,
    ) -> Vec<String> {
        permit_type
            .controls_for_phase(phase)
            .filter(|control| control.required)
            .filter(|control| !completions.get(&control.id).copied().unwrap_or(false))
            .map(|control| control.id.clone())
            .collect()
    }

    pub fn is_phase_complete(
        &self,
        permit_type: &PermitType,
        completions: &BTreeMap<String, bool>,
        phase: ControlPhase,
    ) -> bool {
        self.missing_controls(permit_type, completions, phase).is_empty()
    }

    /// Looks a control up in the type configuration; used to reject
    /// completion of control ids the type does not define.
    pub fn find_control<'a>(
        &self,
        permit_type: &'a PermitType,
        control_id: &str,
    ) -> Option<&'a RequiredControl> {
        permit_type.controls.iter().find(|control| control.id == control_id)
    }
}
