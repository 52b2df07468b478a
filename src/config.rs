//! Organization identifiers written into file headers and detail records.
//!
//! Values come from an optional TOML file. Any key left out keeps the value
//! of the default deployment.
//!
//! ```toml
//! organization_name = "APAE DE COLINAS DO TOCANTINS"
//! cnes = "2560372"
//! destination_indicator = "M"
//! ```

use crate::error::{ExportError, Result};
use serde::Deserialize;
use std::path::Path;

/// Identifiers of the submitting health unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Responsible organization (header, 30 columns)
    pub organization_name: String,

    /// Organization acronym (header, 6 columns)
    pub organization_acronym: String,

    /// CNPJ/CPF of the organization (header, 14 digits)
    pub cnpj: String,

    /// Destination body for BPA files
    pub bpa_destination: String,

    /// Destination body for APAC files
    pub apac_destination: String,

    /// BPA destination indicator: `M` (municipal) or `E` (state)
    pub destination_indicator: String,

    /// APAC destination indicator
    pub apac_destination_indicator: String,

    /// System version written in BPA headers
    pub system_version: String,

    /// System version written in APAC headers
    pub apac_system_version: String,

    /// Health unit CNES code (7 digits)
    pub cnes: String,

    /// Team identifier (INE) written when the source has none
    pub default_ine: String,

    /// IBGE state code written in APAC bodies
    pub uf_code: String,

    /// Check digit appended to every 12-digit APAC number
    pub apac_check_digit: char,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            organization_name: "APAE DE COLINAS DO TOCANTINS".to_string(),
            organization_acronym: "APAE".to_string(),
            cnpj: "25062282000182".to_string(),
            bpa_destination: "SESAU TO".to_string(),
            apac_destination: "SECRETARIA MUNICIPAL DE SAUDE".to_string(),
            destination_indicator: "E".to_string(),
            apac_destination_indicator: "M".to_string(),
            system_version: "V04.10".to_string(),
            apac_system_version: "V04.10-APAC".to_string(),
            cnes: "2560372".to_string(),
            default_ine: String::new(),
            uf_code: "27".to_string(),
            apac_check_digit: '1',
        }
    }
}

impl ExportConfig {
    /// Loads a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the fixed-width fields cannot carry.
    pub fn validate(&self) -> Result<()> {
        if !self.apac_check_digit.is_ascii_digit() {
            return Err(ExportError::InvalidSetting {
                key: "apac_check_digit",
                message: format!("'{}' is not a digit", self.apac_check_digit),
            });
        }
        Ok(())
    }
}
