//! FHIR specification versions a ViewDefinition can declare.

use std::fmt;

use crate::error::SofError;

/// FHIR versions accepted in `ViewDefinition.fhirVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirVersion {
    Dstu3,
    R4,
    R4B,
    R5,
}

impl FhirVersion {
    /// Maps a `fhirVersion` entry to a version by its numeric prefix:
    /// `3.0` is DSTU3, `4.0` is R4, `4.3` is R4B, `5.0` is R5. Anything
    /// else is rejected.
    pub fn from_version_string(version: &str) -> Result<Self, SofError> {
        match version.get(0..3) {
            Some("3.0") => Ok(FhirVersion::Dstu3),
            Some("4.0") => Ok(FhirVersion::R4),
            Some("4.3") => Ok(FhirVersion::R4B),
            Some("5.0") => Ok(FhirVersion::R5),
            _ => Err(SofError::UnsupportedFhirVersion(version.to_string())),
        }
    }

    /// Parses the release code used on the command line (`R4`, `R4B`, ...).
    pub fn from_code(code: &str) -> Result<Self, SofError> {
        match code.to_ascii_uppercase().as_str() {
            "DSTU3" => Ok(FhirVersion::Dstu3),
            "R4" => Ok(FhirVersion::R4),
            "R4B" => Ok(FhirVersion::R4B),
            "R5" => Ok(FhirVersion::R5),
            _ => Err(SofError::UnsupportedFhirVersion(code.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FhirVersion::Dstu3 => "DSTU3",
            FhirVersion::R4 => "R4",
            FhirVersion::R4B => "R4B",
            FhirVersion::R5 => "R5",
        }
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
