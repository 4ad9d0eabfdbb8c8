//! Device catalog attributes: what kind of equipment it is and what shape
//! it arrived in. Neither attribute affects the lifecycle; both drive
//! marketplace filters and analytics charts.

use serde::{Deserialize, Serialize};

use crate::device::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    OxygenConcentrator,
    Ventilator,
    Monitor,
    Wheelchair,
    Other,
}

impl DeviceCategory {
    pub const ALL: [DeviceCategory; 5] = [
        Self::OxygenConcentrator,
        Self::Ventilator,
        Self::Monitor,
        Self::Wheelchair,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OxygenConcentrator => "oxygen_concentrator",
            Self::Ventilator => "ventilator",
            Self::Monitor => "monitor",
            Self::Wheelchair => "wheelchair",
            Self::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OxygenConcentrator => "Oxygen Concentrator",
            Self::Ventilator => "Ventilator",
            Self::Monitor => "Patient Monitor",
            Self::Wheelchair => "Wheelchair",
            Self::Other => "Other",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceCategory {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DeviceError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCondition {
    New,
    Good,
    NeedsRepair,
}

impl DeviceCondition {
    pub const ALL: [DeviceCondition; 3] = [Self::New, Self::Good, Self::NeedsRepair];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Good => "good",
            Self::NeedsRepair => "needs_repair",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Good => "Good",
            Self::NeedsRepair => "Needs Repair",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for DeviceCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceCondition {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| DeviceError::UnknownCondition(s.to_string()))
    }
}
