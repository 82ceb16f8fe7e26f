//! The closed set of processing steps that can create a project snapshot.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of processing that produced a snapshot.
///
/// Persisted by its `as_str` form; `parse` validates at the boundary so no
/// unrecognized value ever enters the version tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    Import,
    WeightCorrection,
    VolumeCorrection,
    DfCorrection,
    DriftCorrection,
    CrmCheck,
    RmCheck,
    EmptyRowRemoval,
    ManualEdit,
    Optimization,
}

impl ProcessingType {
    pub const ALL: [ProcessingType; 10] = [
        Self::Import,
        Self::WeightCorrection,
        Self::VolumeCorrection,
        Self::DfCorrection,
        Self::DriftCorrection,
        Self::CrmCheck,
        Self::RmCheck,
        Self::EmptyRowRemoval,
        Self::ManualEdit,
        Self::Optimization,
    ];

    /// Stable storage/wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::WeightCorrection => "weight_correction",
            Self::VolumeCorrection => "volume_correction",
            Self::DfCorrection => "df_correction",
            Self::DriftCorrection => "drift_correction",
            Self::CrmCheck => "crm_check",
            Self::RmCheck => "rm_check",
            Self::EmptyRowRemoval => "empty_row_removal",
            Self::ManualEdit => "manual_edit",
            Self::Optimization => "optimization",
        }
    }

    /// Human-readable label, as shown in version descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Import => "Import",
            Self::WeightCorrection => "Weight Correction",
            Self::VolumeCorrection => "Volume Correction",
            Self::DfCorrection => "DF Correction",
            Self::DriftCorrection => "Drift Correction",
            Self::CrmCheck => "CRM Check",
            Self::RmCheck => "RM Check",
            Self::EmptyRowRemoval => "Empty Row Removal",
            Self::ManualEdit => "Manual Edit",
            Self::Optimization => "Optimization",
        }
    }
}

impl core::fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ProcessingType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown processing type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_storage_form() {
        for t in ProcessingType::ALL {
            assert_eq!(t.as_str().parse::<ProcessingType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_values_are_rejected_at_the_boundary() {
        assert!("WeightCorrection".parse::<ProcessingType>().is_err());
        assert!("".parse::<ProcessingType>().is_err());
    }
}
