use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermitTypeId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPhase {
    PreWork,
    DuringWork,
    CloseOut,
}

impl ControlPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreWork => "pre_work",
            Self::DuringWork => "during_work",
            Self::CloseOut => "close_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pre_work" => Some(Self::PreWork),
            "during_work" => Some(Self::DuringWork),
            "close_out" => Some(Self::CloseOut),
            _ => None,
        }
    }
}

/// One checklist line of a permit type. `required == false` controls are
/// informational and never block a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredControl {
    pub id: String,
    pub description: String,
    pub phase: ControlPhase,
    pub required: bool,
}

/// Read-mostly permit type configuration, managed outside the lifecycle
/// engine. Controls are data so new types never require a code change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitType {
    pub id: PermitTypeId,
    pub code: String,
    pub name: String,
    pub icon: Option<String>,
    pub default_validity_hours: u32,
    pub requires_approval: bool,
    pub controls: Vec<RequiredControl>,
}

impl PermitType {
    pub fn controls_for_phase(&self, phase: ControlPhase) -> impl Iterator<Item = &RequiredControl> {
        self.controls.iter().filter(move |control| control.phase == phase)
    }
}
