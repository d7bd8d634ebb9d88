// ⚙️ Validator Configuration - Settings as Data
// Every field has a default so an empty `{}` file (or no file) is valid.

use crate::error::ConfigError;
use anyhow::{Context as AnyhowContext, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// SAT code for ISR (income tax) in `cfdi:Retencion/@Impuesto`.
pub const INCOME_TAX_CODE: &str = "001";

/// Archive prefix written by macOS Finder ("resource forks").
pub const RESOURCE_FORK_PREFIX: &str = "__MACOSX";

pub const DOCUMENT_EXTENSION: &str = ".xml";

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Absolute difference under which two amounts reconcile (strict `<`)
    pub tolerance: Decimal,

    /// Withholding `Impuesto` code treated as income tax
    pub income_tax_code: String,

    /// Archive entries under this prefix are skipped without a record
    pub ignored_prefix: String,

    /// Candidate document suffix, matched case-insensitively
    pub document_extension: String,

    /// Emit the extra "IVA exento" finding during reconciliation
    pub check_vat_exemption: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            tolerance: dec!(0.01),
            income_tax_code: INCOME_TAX_CODE.to_string(),
            ignored_prefix: RESOURCE_FORK_PREFIX.to_string(),
            document_extension: DOCUMENT_EXTENSION.to_string(),
            check_vat_exemption: false,
        }
    }
}

impl ValidatorConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ValidatorConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.tolerance <= Decimal::ZERO {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        if self.income_tax_code.trim().is_empty() {
            return Err(ConfigError::Empty("income_tax_code"));
        }
        if self.document_extension.trim().is_empty() {
            return Err(ConfigError::Empty("document_extension"));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
