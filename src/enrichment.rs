//! Classification and enrichment of raw transactions.
//!
//! The engine resolves each transaction's procedure rule, applies provider
//! overrides, resolves the diagnosis code and computes the billed quantity.
//! It performs no I/O and holds only shared references, so one engine can
//! serve concurrent exports.

use crate::rules::{
    Category, ProcedureRule, RuleTables, AGE_RULE_MIN_AGE, AGE_RULE_REPLACEMENT,
    AGE_RULE_TRIGGER, DEFAULT_BILLING_CODE, DEFAULT_QUANTITY, DEFAULT_REQUIRED_CID, FIXED_DOSES,
    HOSPITAL_DEFAULT_CID, UNMAPPED_MODALITY,
};
use crate::transaction::RawTransaction;
use chrono::{Datelike, NaiveDate};
use log::debug;
use std::fmt;

/// Width of every diagnosis field.
const CID_LENGTH: usize = 4;

/// How a diagnosis code is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosisPolicy {
    /// Transaction CID, then chart CID, then the suggested CID, then the
    /// default when the procedure requires one
    #[default]
    Standard,
    /// Transaction CID only when it looks like ICD-10, else the suggested CID,
    /// else the hospital default
    Hospital,
}

/// A procedure that could not be mapped to a rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MissingMapping {
    /// Short code, or `ID_BD:<procedure id>` when the row had none
    pub code: String,
    pub procedure_id: String,
}

impl fmt::Display for MissingMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Short code '{}' (procedure id {}) has no procedure mapping",
            self.code, self.procedure_id
        )
    }
}

/// Enrichment result for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Rule in effect after substitutions, `None` when unmapped
    pub rule: Option<ProcedureRule>,
    pub billing_code: &'static str,
    pub service: &'static str,
    pub classification: &'static str,
    pub category: Category,
    pub modality: &'static str,
    pub cbo: Option<String>,
    pub cid: String,
    pub quantity: u64,
    pub missing: Option<MissingMapping>,
}

impl Classification {
    pub fn is_mapped(&self) -> bool {
        self.rule.is_some()
    }
}

/// Applies the rule tables to raw transactions.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationEngine<'a> {
    rules: &'a RuleTables,
    reference_date: NaiveDate,
}

impl<'a> ClassificationEngine<'a> {
    /// Creates an engine computing ages as of `reference_date`.
    pub fn new(rules: &'a RuleTables, reference_date: NaiveDate) -> Self {
        ClassificationEngine {
            rules,
            reference_date,
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn rules(&self) -> &'a RuleTables {
        self.rules
    }

    /// Classifies one transaction. Never fails: an unmapped procedure yields
    /// a primary-batch classification with the default billing code and a
    /// [`MissingMapping`] attached.
    pub fn classify(&self, tx: &RawTransaction, policy: DiagnosisPolicy) -> Classification {
        let provider = self.rules.providers.get(&tx.provider_id);

        let (mut rule, missing) = match self.resolve_rule(tx) {
            Ok(rule) => (Some(*rule), None),
            Err(missing) => {
                debug!(
                    "Transaction {}: {}, defaulting to {}",
                    tx.transaction_id, missing, DEFAULT_BILLING_CODE
                );
                (None, Some(missing))
            }
        };

        if let (Some(current), Some(substitution)) = (rule, provider.and_then(|p| p.substitution))
        {
            if current.billing_code == substitution.from_billing_code {
                if let Some(replacement) = self.rules.procedures.get(substitution.to_short_code) {
                    debug!(
                        "Transaction {}: procedure {} of provider {} replaced by {}",
                        tx.transaction_id,
                        current.billing_code,
                        tx.provider_id,
                        replacement.billing_code
                    );
                    rule = Some(*replacement);
                }
            }
        }

        let cbo = match provider.and_then(|p| p.forced_cbo) {
            Some(forced) => {
                debug!(
                    "Transaction {}: CBO forced to {} for provider {}",
                    tx.transaction_id, forced, tx.provider_id
                );
                Some(forced.to_string())
            }
            None => non_blank(tx.professional_cbo.as_deref()).map(str::to_string),
        };

        let (mut service, mut classification) = rule
            .map(|r| (r.service, r.classification))
            .unwrap_or(("", ""));
        if service.is_empty() && classification.is_empty() {
            if let Some((fallback_service, fallback_class)) = provider.and_then(|p| p.fallback) {
                debug!(
                    "Transaction {}: service/classification {}/{} taken from provider {}",
                    tx.transaction_id, fallback_service, fallback_class, tx.provider_id
                );
                service = fallback_service;
                classification = fallback_class;
            }
        }

        let billing_code = rule.map_or(DEFAULT_BILLING_CODE, |r| r.billing_code);

        Classification {
            rule,
            billing_code,
            service,
            classification,
            category: rule.map_or(Category::Bpa, |r| r.category),
            modality: rule.map_or(UNMAPPED_MODALITY, |r| r.modality.label()),
            cbo,
            cid: resolve_cid(tx, rule.as_ref(), policy),
            quantity: quantity_for(billing_code),
            missing,
        }
    }

    /// Looks up the rule for the transaction's short code.
    pub fn resolve_rule(&self, tx: &RawTransaction) -> Result<&'a ProcedureRule, MissingMapping> {
        let procedure_id = tx.procedure_id.trim().to_string();
        match non_blank(tx.procedure_code.as_deref()) {
            Some(code) => self.rules.procedures.get(code).ok_or_else(|| MissingMapping {
                code: code.to_string(),
                procedure_id,
            }),
            None => Err(MissingMapping {
                code: format!("ID_BD:{}", procedure_id),
                procedure_id,
            }),
        }
    }

    /// Age in whole years as of the reference date.
    pub fn age_of(&self, birth_date: NaiveDate) -> i32 {
        age_on(birth_date, self.reference_date)
    }

    /// Rewrites the rehabilitation code for patients under the minimum age.
    /// Returns `true` if the classification changed.
    ///
    /// Runs on already-deduplicated records only.
    pub fn apply_age_rule(
        &self,
        classification: &mut Classification,
        birth_date: Option<NaiveDate>,
    ) -> bool {
        if classification.billing_code != AGE_RULE_TRIGGER {
            return false;
        }
        let Some(birth_date) = birth_date else {
            return false;
        };
        let age = self.age_of(birth_date);
        if age >= AGE_RULE_MIN_AGE {
            return false;
        }
        debug!(
            "Patient aged {}: procedure {} replaced by {}",
            age, AGE_RULE_TRIGGER, AGE_RULE_REPLACEMENT
        );
        classification.billing_code = AGE_RULE_REPLACEMENT;
        true
    }
}

/// Whole years between `birth_date` and `on`, comparing month and day.
pub fn age_on(birth_date: NaiveDate, on: NaiveDate) -> i32 {
    let before_birthday = (on.month(), on.day()) < (birth_date.month(), birth_date.day());
    on.year() - birth_date.year() - i32::from(before_birthday)
}

/// Quantity billed for a procedure.
pub fn quantity_for(billing_code: &str) -> u64 {
    FIXED_DOSES
        .iter()
        .find(|(code, _)| *code == billing_code)
        .map_or(DEFAULT_QUANTITY, |(_, quantity)| *quantity)
}

/// Upper-cases, strips punctuation and whitespace, and truncates to the
/// diagnosis field width.
pub fn normalize_cid(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .take(CID_LENGTH)
        .collect()
}

/// Chooses the diagnosis code for a transaction.
pub fn resolve_cid(
    tx: &RawTransaction,
    rule: Option<&ProcedureRule>,
    policy: DiagnosisPolicy,
) -> String {
    let suggested = rule.and_then(|r| r.suggested_cid);
    match policy {
        DiagnosisPolicy::Standard => {
            let explicit = [tx.transaction_cid.as_deref(), tx.ficha_cid.as_deref()]
                .into_iter()
                .flatten()
                .map(normalize_cid)
                .find(|cid| !cid.is_empty());
            if let Some(cid) = explicit {
                return cid;
            }
            if let Some(cid) = suggested {
                return normalize_cid(cid);
            }
            if rule.is_some_and(|r| r.cid_required) {
                return DEFAULT_REQUIRED_CID.to_string();
            }
            String::new()
        }
        DiagnosisPolicy::Hospital => {
            let own = normalize_cid(tx.transaction_cid.as_deref().unwrap_or_default());
            let looks_like_icd10 =
                own.chars().count() >= 3 && own.chars().next().is_some_and(char::is_alphabetic);
            if looks_like_icd10 {
                own
            } else if let Some(cid) = suggested {
                normalize_cid(cid)
            } else {
                HOSPITAL_DEFAULT_CID.to_string()
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tx(provider: &str, code: Option<&str>) -> RawTransaction {
        RawTransaction {
            transaction_id: 1,
            provider_id: provider.to_string(),
            procedure_id: "900".to_string(),
            procedure_code: code.map(str::to_string),
            ..Default::default()
        }
    }

    fn with_engine<F: FnOnce(ClassificationEngine<'_>)>(f: F) {
        let rules = RuleTables::builtin().unwrap();
        f(ClassificationEngine::new(&rules, date(2024, 6, 15)));
    }

    #[test]
    fn test_mapped_procedure() {
        with_engine(|engine| {
            let c = engine.classify(&tx("16", Some("48")), DiagnosisPolicy::Standard);
            assert!(c.is_mapped());
            assert_eq!(c.billing_code, "0301010048");
            assert_eq!((c.service, c.classification), ("135", "005"));
            assert_eq!(c.category, Category::Bpa);
            assert_eq!(c.modality, "Área Comum");
            assert_eq!(c.quantity, 1);
            assert!(c.missing.is_none());
        });
    }

    #[test]
    fn test_unmapped_code_defaults_to_primary() {
        with_engine(|engine| {
            let c = engine.classify(&tx("16", Some("999")), DiagnosisPolicy::Standard);
            assert!(!c.is_mapped());
            assert_eq!(c.category, Category::Bpa);
            assert_eq!(c.billing_code, DEFAULT_BILLING_CODE);
            assert_eq!(c.modality, UNMAPPED_MODALITY);
            let missing = c.missing.unwrap();
            assert_eq!(missing.code, "999");
            assert!(missing.to_string().contains("999"));
            // provider 16 fallback fills the empty service pair
            assert_eq!((c.service, c.classification), ("135", "002"));
        });
    }

    #[test]
    fn test_missing_short_code_uses_internal_id() {
        with_engine(|engine| {
            let c = engine.classify(&tx("16", None), DiagnosisPolicy::Standard);
            assert_eq!(c.missing.unwrap().code, "ID_BD:900");
        });
    }

    #[test]
    fn test_provider_substitution() {
        with_engine(|engine| {
            let c = engine.classify(&tx("35", Some("75")), DiagnosisPolicy::Standard);
            assert_eq!(c.billing_code, "0301010072");
            assert_eq!(c.rule.unwrap().short_code, "72");
            assert_eq!(c.classification, "003");

            let other = engine.classify(&tx("16", Some("75")), DiagnosisPolicy::Standard);
            assert_eq!(other.billing_code, "0301070075");
        });
    }

    #[test]
    fn test_forced_cbo() {
        with_engine(|engine| {
            let mut row = tx("4", Some("48"));
            row.professional_cbo = Some("223605".to_string());
            let c = engine.classify(&row, DiagnosisPolicy::Standard);
            assert_eq!(c.cbo.as_deref(), Some("225275"));

            let mut row = tx("16", Some("48"));
            row.professional_cbo = Some(" 223605 ".to_string());
            let c = engine.classify(&row, DiagnosisPolicy::Standard);
            assert_eq!(c.cbo.as_deref(), Some("223605"));
        });
    }

    #[test]
    fn test_standard_cid_priority() {
        with_engine(|engine| {
            let mut row = tx("16", Some("40"));
            row.transaction_cid = Some("f84.5".to_string());
            row.ficha_cid = Some("G80".to_string());
            assert_eq!(engine.classify(&row, DiagnosisPolicy::Standard).cid, "F845");

            row.transaction_cid = None;
            assert_eq!(engine.classify(&row, DiagnosisPolicy::Standard).cid, "G80");

            row.ficha_cid = Some("  ".to_string());
            assert_eq!(engine.classify(&row, DiagnosisPolicy::Standard).cid, "F840");
        });
    }

    #[test]
    fn test_required_cid_default() {
        with_engine(|engine| {
            // 1151 requires a CID and suggests none
            let c = engine.classify(&tx("16", Some("1151")), DiagnosisPolicy::Standard);
            assert_eq!(c.cid, DEFAULT_REQUIRED_CID);

            let c = engine.classify(&tx("16", Some("48")), DiagnosisPolicy::Standard);
            assert_eq!(c.cid, "");
        });
    }

    #[test]
    fn test_hospital_cid_policy() {
        with_engine(|engine| {
            let mut row = tx("16", Some("40"));
            row.transaction_cid = Some("G80.9".to_string());
            assert_eq!(engine.classify(&row, DiagnosisPolicy::Hospital).cid, "G809");

            row.transaction_cid = Some("12".to_string());
            assert_eq!(engine.classify(&row, DiagnosisPolicy::Hospital).cid, "F840");

            let mut unmapped = tx("16", Some("999"));
            unmapped.transaction_cid = Some("123".to_string());
            assert_eq!(
                engine.classify(&unmapped, DiagnosisPolicy::Hospital).cid,
                HOSPITAL_DEFAULT_CID
            );
        });
    }

    #[test]
    fn test_fixed_dose_quantity() {
        with_engine(|engine| {
            let c = engine.classify(&tx("16", Some("520")), DiagnosisPolicy::Standard);
            assert_eq!(c.quantity, 30);
            assert_eq!(c.modality, "Ostomizados");
        });
    }

    #[test]
    fn test_age_rule() {
        with_engine(|engine| {
            let mut minor = engine.classify(&tx("16", Some("300")), DiagnosisPolicy::Standard);
            assert!(engine.apply_age_rule(&mut minor, Some(date(2006, 6, 16))));
            assert_eq!(minor.billing_code, AGE_RULE_REPLACEMENT);

            let mut adult = engine.classify(&tx("16", Some("300")), DiagnosisPolicy::Standard);
            assert!(!engine.apply_age_rule(&mut adult, Some(date(2006, 6, 15))));
            assert_eq!(adult.billing_code, AGE_RULE_TRIGGER);

            let mut unknown = engine.classify(&tx("16", Some("300")), DiagnosisPolicy::Standard);
            assert!(!engine.apply_age_rule(&mut unknown, None));

            let mut other = engine.classify(&tx("16", Some("48")), DiagnosisPolicy::Standard);
            assert!(!engine.apply_age_rule(&mut other, Some(date(2020, 1, 1))));
        });
    }

    #[test]
    fn test_age_on_birthday_boundaries() {
        assert_eq!(age_on(date(2000, 2, 29), date(2024, 2, 28)), 23);
        assert_eq!(age_on(date(2000, 2, 29), date(2024, 2, 29)), 24);
        assert_eq!(age_on(date(2010, 12, 31), date(2024, 1, 1)), 13);
    }

    #[test]
    fn test_normalize_cid() {
        assert_eq!(normalize_cid(" z00.0 "), "Z000");
        assert_eq!(normalize_cid("F84.01"), "F840");
        assert_eq!(normalize_cid(""), "");
    }
}
