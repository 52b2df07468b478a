//! Business rule tables.
//!
//! Procedure rules map the short internal procedure code to its billing
//! (SIGTAP) code and classification; provider rules carry per-professional
//! overrides. Both are compiled-in tables, validated once when built and
//! read-only afterwards.

use crate::error::{ExportError, Result};
use std::collections::HashMap;
use std::fmt;

/// Billing code used when a procedure has no mapping.
pub const DEFAULT_BILLING_CODE: &str = "0301010048";

/// Diagnosis written when a procedure requires one and none is known.
pub const DEFAULT_REQUIRED_CID: &str = "Z000";

/// Diagnosis written by the hospital policy when nothing better is known.
pub const HOSPITAL_DEFAULT_CID: &str = "R688";

/// Billing code rewritten for patients under [`AGE_RULE_MIN_AGE`].
pub const AGE_RULE_TRIGGER: &str = "0301070300";

/// Replacement for [`AGE_RULE_TRIGGER`].
pub const AGE_RULE_REPLACEMENT: &str = "0301010048";

pub const AGE_RULE_MIN_AGE: i32 = 18;

/// Quantity written for every procedure without a fixed dose.
pub const DEFAULT_QUANTITY: u64 = 1;

/// Procedures billed with a fixed quantity.
pub const FIXED_DOSES: &[(&str, u64)] = &[("0701050020", 30)];

/// Batch a procedure is billed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Primary batch (BPA-I)
    Bpa,
    /// Authorization batch (APAC), never written to the BPA file
    Apac,
}

/// Rehabilitation modality, used for production counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modality {
    Physical,
    Intellectual,
    Visual,
    Auditory,
    Ostomy,
    Common,
    Authorization,
}

impl Modality {
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Physical => "Reabilitação Física",
            Modality::Intellectual => "Reabilitação Intelectual",
            Modality::Visual => "Reabilitação Visual",
            Modality::Auditory => "Reabilitação Auditiva",
            Modality::Ostomy => "Ostomizados",
            Modality::Common => "Área Comum",
            Modality::Authorization => "APAC",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Modality::Authorization => Category::Apac,
            _ => Category::Bpa,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label used in counters for rows without a procedure mapping.
pub const UNMAPPED_MODALITY: &str = "Não Mapeado";

/// One row of the static procedure table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureEntry {
    pub short_code: &'static str,
    pub billing_code: &'static str,
    pub service: &'static str,
    pub classification: &'static str,
    pub suggested_cid: &'static str,
    pub cid_required: bool,
    pub modality: Modality,
}

impl ProcedureEntry {
    pub const fn new(
        short_code: &'static str,
        billing_code: &'static str,
        service: &'static str,
        classification: &'static str,
        suggested_cid: &'static str,
        cid_required: bool,
        modality: Modality,
    ) -> Self {
        ProcedureEntry {
            short_code,
            billing_code,
            service,
            classification,
            suggested_cid,
            cid_required,
            modality,
        }
    }
}

/// A validated procedure rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureRule {
    pub short_code: &'static str,
    /// 10-digit SIGTAP code
    pub billing_code: &'static str,
    /// 3-digit service code, empty when the procedure has none
    pub service: &'static str,
    /// 3-digit classification code, empty when the procedure has none
    pub classification: &'static str,
    pub category: Category,
    pub modality: Modality,
    pub suggested_cid: Option<&'static str>,
    pub cid_required: bool,
}

/// Procedure rules keyed by short code.
#[derive(Debug, Clone)]
pub struct ProcedureTable {
    rules: HashMap<&'static str, ProcedureRule>,
}

impl ProcedureTable {
    /// Validates and indexes a set of entries. Any malformed entry or
    /// duplicate short code rejects the whole table.
    pub fn from_entries(entries: &[ProcedureEntry]) -> Result<Self> {
        let mut rules = HashMap::with_capacity(entries.len());
        for entry in entries {
            let rule = validate_procedure(entry)?;
            if rules.insert(entry.short_code, rule).is_some() {
                return Err(invalid_rule(entry.short_code, "duplicate short code"));
            }
        }
        Ok(ProcedureTable { rules })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_entries(PROCEDURES)
    }

    pub fn get(&self, short_code: &str) -> Option<&ProcedureRule> {
        self.rules.get(short_code.trim())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn validate_procedure(entry: &ProcedureEntry) -> Result<ProcedureRule> {
    let key = entry.short_code;
    if key.is_empty() || !is_digits(key) {
        return Err(invalid_rule(key, "short code must be numeric"));
    }
    if entry.billing_code.len() != 10 || !is_digits(entry.billing_code) {
        return Err(invalid_rule(key, "billing code must have 10 digits"));
    }
    check_optional_code(key, "service", entry.service)?;
    check_optional_code(key, "classification", entry.classification)?;
    if entry.suggested_cid.len() > 4
        || !entry.suggested_cid.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(invalid_rule(key, "suggested CID must be up to 4 letters or digits"));
    }

    Ok(ProcedureRule {
        short_code: entry.short_code,
        billing_code: entry.billing_code,
        service: entry.service,
        classification: entry.classification,
        category: entry.modality.category(),
        modality: entry.modality,
        suggested_cid: Some(entry.suggested_cid).filter(|cid| !cid.is_empty()),
        cid_required: entry.cid_required,
    })
}

/// Conditional procedure substitution for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Substitution {
    /// Billing code that triggers the substitution
    pub from_billing_code: &'static str,
    /// Short code whose rule replaces the original one
    pub to_short_code: &'static str,
}

/// Everything the rule tables say about one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderOverride {
    /// CBO forced regardless of the procedure
    pub forced_cbo: Option<&'static str>,
    /// (service, classification) used when the procedure has neither
    pub fallback: Option<(&'static str, &'static str)>,
    pub substitution: Option<Substitution>,
}

/// Provider overrides keyed by provider id.
#[derive(Debug, Clone, Default)]
pub struct ProviderRules {
    providers: HashMap<&'static str, ProviderOverride>,
}

impl ProviderRules {
    /// Builds the provider table from its three static sources.
    pub fn from_tables(
        forced_cbo: &[(&'static str, &'static str)],
        fallback: &[(&'static str, &'static str, &'static str)],
        substitutions: &[(&'static str, &'static str, &'static str)],
    ) -> Result<Self> {
        let mut providers: HashMap<&'static str, ProviderOverride> = HashMap::new();

        for &(provider, cbo) in forced_cbo {
            if cbo.len() != 6 || !is_digits(cbo) {
                return Err(invalid_rule(provider, "forced CBO must have 6 digits"));
            }
            providers.entry(provider).or_default().forced_cbo = Some(cbo);
        }

        for &(provider, service, classification) in fallback {
            if service.is_empty() {
                return Err(invalid_rule(provider, "fallback service is empty"));
            }
            check_optional_code(provider, "service", service)?;
            check_optional_code(provider, "classification", classification)?;
            providers.entry(provider).or_default().fallback = Some((service, classification));
        }

        for &(provider, from_billing_code, to_short_code) in substitutions {
            if from_billing_code.len() != 10 || !is_digits(from_billing_code) {
                return Err(invalid_rule(provider, "substituted billing code must have 10 digits"));
            }
            providers.entry(provider).or_default().substitution = Some(Substitution {
                from_billing_code,
                to_short_code,
            });
        }

        Ok(ProviderRules { providers })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_tables(FORCED_CBO, FALLBACK_SERVICES, SUBSTITUTIONS)
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderOverride> {
        self.providers.get(provider_id.trim())
    }

    /// Providers with a fallback service pair. CIHA exports are limited to them.
    pub fn has_fallback(&self, provider_id: &str) -> bool {
        self.get(provider_id).is_some_and(|p| p.fallback.is_some())
    }
}

/// All rule tables an export needs, validated together.
#[derive(Debug, Clone)]
pub struct RuleTables {
    pub procedures: ProcedureTable,
    pub providers: ProviderRules,
}

impl RuleTables {
    /// Combines the tables, rejecting substitutions that point at unknown
    /// procedures.
    pub fn new(procedures: ProcedureTable, providers: ProviderRules) -> Result<Self> {
        for (provider, rules) in &providers.providers {
            if let Some(substitution) = rules.substitution {
                if procedures.get(substitution.to_short_code).is_none() {
                    return Err(invalid_rule(
                        provider,
                        &format!(
                            "substitution target '{}' is not a known procedure",
                            substitution.to_short_code
                        ),
                    ));
                }
            }
        }
        Ok(RuleTables {
            procedures,
            providers,
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(ProcedureTable::builtin()?, ProviderRules::builtin()?)
    }
}

fn check_optional_code(key: &str, what: &str, code: &str) -> Result<()> {
    if !code.is_empty() && (code.len() != 3 || !is_digits(code)) {
        return Err(invalid_rule(key, &format!("{} code must have 3 digits", what)));
    }
    Ok(())
}

fn is_digits(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_digit())
}

fn invalid_rule(key: &str, message: &str) -> ExportError {
    ExportError::InvalidRule {
        key: key.to_string(),
        message: message.to_string(),
    }
}

const PROCEDURES: &[ProcedureEntry] = &[
    ProcedureEntry::new("14", "0302060014", "135", "003", "G968", true, Modality::Physical),
    ProcedureEntry::new("15", "0211030015", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("19", "0302050019", "135", "003", "M968", true, Modality::Physical),
    ProcedureEntry::new("22", "0302060022", "135", "003", "M968", true, Modality::Physical),
    ProcedureEntry::new("23", "0211030023", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("27", "0302050027", "135", "003", "M998", true, Modality::Physical),
    ProcedureEntry::new("29", "0301070229", "135", "003", "U099", true, Modality::Physical),
    ProcedureEntry::new("30", "0302060030", "135", "003", "G839", true, Modality::Physical),
    ProcedureEntry::new("31", "0211030031", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("45", "0701010045", "164", "001", "R268", true, Modality::Physical),
    ProcedureEntry::new("49", "0302060049", "135", "003", "F849", true, Modality::Physical),
    ProcedureEntry::new("56", "0302040056", "135", "003", "I988", true, Modality::Physical),
    ProcedureEntry::new("57", "0302060057", "135", "003", "Q878", true, Modality::Physical),
    ProcedureEntry::new("63", "0301100063", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("74", "0211030074", "135", "003", "M797", true, Modality::Physical),
    ProcedureEntry::new("105", "0301070105", "135", "003", "M638", true, Modality::Physical),
    ProcedureEntry::new("118", "0701010118", "164", "001", "R268", true, Modality::Physical),
    ProcedureEntry::new("121", "0301070121", "135", "003", "G979", true, Modality::Physical),
    ProcedureEntry::new("129", "0701010029", "164", "001", "R268", true, Modality::Physical),
    ProcedureEntry::new("134", "0701010134", "164", "001", "R268", true, Modality::Physical),
    ProcedureEntry::new("172", "0701020172", "164", "001", "G838", true, Modality::Physical),
    ProcedureEntry::new("180", "0301080160", "164", "001", "", false, Modality::Physical),
    ProcedureEntry::new("210", "0301070210", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("229", "0701020229", "164", "001", "Q898", false, Modality::Physical),
    ProcedureEntry::new("237", "0301070237", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("340", "0211030040", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("530", "0309050030", "135", "003", "", false, Modality::Physical),
    ProcedureEntry::new("1105", "0701020105", "135", "003", "G728", true, Modality::Physical),
    ProcedureEntry::new("2210", "0701020210", "164", "001", "G718", true, Modality::Physical),
    ProcedureEntry::new("2237", "0701020237", "164", "001", "G718", true, Modality::Physical),
    ProcedureEntry::new("2245", "0701020229", "164", "001", "G718", true, Modality::Physical),
    ProcedureEntry::new("13", "0211100013", "135", "002", "", false, Modality::Intellectual),
    ProcedureEntry::new("40", "0301070040", "135", "002", "F840", true, Modality::Intellectual),
    ProcedureEntry::new("59", "0301070059", "135", "002", "F840", true, Modality::Intellectual),
    ProcedureEntry::new("67", "0301070067", "135", "002", "", false, Modality::Intellectual),
    ProcedureEntry::new("75", "0301070075", "135", "002", "F83", false, Modality::Intellectual),
    ProcedureEntry::new("113", "0301070113", "135", "002", "H919", true, Modality::Intellectual),
    ProcedureEntry::new("124", "0301070024", "135", "002", "F840", true, Modality::Intellectual),
    ProcedureEntry::new("261", "0301070261", "135", "002", "", false, Modality::Intellectual),
    ProcedureEntry::new("296", "0301070296", "135", "002", "", false, Modality::Intellectual),
    ProcedureEntry::new("300", "0301070300", "135", "002", "", false, Modality::Intellectual),
    ProcedureEntry::new("18", "0302030018", "135", "001", "H542", true, Modality::Visual),
    ProcedureEntry::new("20", "0211060020", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("38", "0211060038", "131", "001", "", false, Modality::Visual),
    ProcedureEntry::new("54", "0211060054", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("100", "0211060100", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("148", "0301070148", "135", "001", "H540", true, Modality::Visual),
    ProcedureEntry::new("151", "0211060151", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("156", "0301070156", "135", "001", "H542", true, Modality::Visual),
    ProcedureEntry::new("164", "0301070164", "135", "001", "H542", true, Modality::Visual),
    ProcedureEntry::new("224", "0211060224", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("232", "0211060232", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("245", "0301070245", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("259", "0211060259", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("1127", "0211060127", "135", "001", "", false, Modality::Visual),
    ProcedureEntry::new("25", "0211070025", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("26", "0302030026", "135", "001", "H519", true, Modality::Auditory),
    ProcedureEntry::new("33", "0211070033", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("41", "0211070041", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("50", "0211070050", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("68", "0211070068", "135", "002", "", false, Modality::Auditory),
    ProcedureEntry::new("76", "0211070076", "135", "002", "", false, Modality::Auditory),
    ProcedureEntry::new("84", "0211070084", "135", "002", "", false, Modality::Auditory),
    ProcedureEntry::new("114", "0211070114", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("149", "0211070149", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("157", "0211070157", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("203", "0211070203", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("211", "0211070211", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("246", "0211070246", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("253", "0301070253", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("262", "0211070262", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("270", "0211070270", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("338", "0701030038", "135", "005", "H919", true, Modality::Auditory),
    ProcedureEntry::new("354", "0701030054", "135", "005", "H919", true, Modality::Auditory),
    ProcedureEntry::new("1113", "0211050113", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("7424", "0211070424", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("7432", "0211070432", "135", "005", "", false, Modality::Auditory),
    ProcedureEntry::new("512", "0701050012", "135", "012", "Z933", true, Modality::Ostomy),
    ProcedureEntry::new("520", "0701050020", "135", "012", "Z933", true, Modality::Ostomy),
    ProcedureEntry::new("28", "0101010028", "135", "002", "", false, Modality::Common),
    ProcedureEntry::new("36", "0301040036", "135", "002", "", false, Modality::Common),
    ProcedureEntry::new("39", "0301100039", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("44", "0301040044", "135", "002", "", false, Modality::Common),
    ProcedureEntry::new("48", "0301010048", "135", "005", "", false, Modality::Common),
    ProcedureEntry::new("72", "0301010072", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("79", "0301040079", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("95", "0301040095", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("160", "0301080160", "135", "002", "", false, Modality::Common),
    ProcedureEntry::new("173", "0211070173", "135", "005", "", false, Modality::Common),
    ProcedureEntry::new("276", "0301100276", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("284", "0301100284", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("288", "0301070288", "135", "002", "", false, Modality::Common),
    ProcedureEntry::new("424", "0101040024", "135", "003", "", false, Modality::Common),
    ProcedureEntry::new("32", "0301070032", "135", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("37", "0701010240", "164", "001", "G969", true, Modality::Authorization),
    ProcedureEntry::new("46", "0701030046", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("62", "0701030062", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("70", "0701030070", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("89", "0701030089", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("92", "0211070092", "135", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("106", "0211070106", "135", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("127", "0701030127", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("135", "0701030135", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("143", "0701030143", "164", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("207", "0701010207", "164", "001", "G969", true, Modality::Authorization),
    ProcedureEntry::new("215", "0701010215", "164", "001", "G969", true, Modality::Authorization),
    ProcedureEntry::new("223", "0701010223", "164", "001", "G128", true, Modality::Authorization),
    ProcedureEntry::new("231", "0701010231", "164", "001", "Q748", true, Modality::Authorization),
    ProcedureEntry::new("240", "0701010240", "164", "001", "G969", true, Modality::Authorization),
    ProcedureEntry::new("258", "0701010258", "164", "001", "G969", true, Modality::Authorization),
    ProcedureEntry::new("319", "0211070319", "135", "005", "H919", true, Modality::Authorization),
    ProcedureEntry::new("1151", "0701030151", "164", "005", "", true, Modality::Authorization),
];

const FORCED_CBO: &[(&str, &str)] = &[
    ("43", "225133"),
    ("4", "225275"),
    ("68", "225265"),
    ("67", "225125"),
    ("76", "225133"),
    ("81", "225265"),
    ("33", "225275"),
    ("70", "225270"),
    ("35", "225133"),
    ("86", "225160"),
    ("89", "225125"),
];

const FALLBACK_SERVICES: &[(&str, &str, &str)] = &[
    ("16", "135", "002"),
    ("13", "135", "003"),
    ("19", "135", "005"),
    ("10", "135", "002"),
    ("20", "135", "003"),
    ("12", "135", "002"),
    ("17", "135", "005"),
    ("26", "135", "002"),
    ("31", "135", "003"),
    ("15", "135", "002"),
    ("7", "135", "002"),
    ("28", "135", "005"),
    ("9", "135", "002"),
    ("11", "135", "002"),
    ("24", "135", "002"),
    ("5", "135", "002"),
    ("29", "135", "002"),
    ("14", "135", "002"),
    ("21", "135", "002"),
    ("3", "135", "002"),
    ("43", "135", "002"),
    ("38", "135", "002"),
    ("4", "135", "005"),
    ("22", "135", "002"),
    ("46", "135", "002"),
    ("47", "135", "002"),
    ("48", "135", "002"),
    ("49", "135", "003"),
    ("52", "135", "003"),
    ("51", "135", "003"),
    ("2", "135", "002"),
    ("53", "135", "003"),
    ("55", "135", "003"),
    ("56", "135", "003"),
    ("57", "135", "003"),
    ("58", "135", "001"),
    ("59", "135", "003"),
    ("60", "135", "003"),
    ("61", "135", "003"),
    ("62", "135", "003"),
    ("63", "135", "003"),
    ("64", "135", "003"),
    ("66", "135", "003"),
    ("68", "135", "001"),
    ("71", "135", "003"),
    ("72", "135", "003"),
    ("67", "135", "002"),
    ("40", "135", "002"),
    ("41", "135", "002"),
    ("32", "135", "002"),
    ("69", "135", "002"),
    ("18", "135", "002"),
    ("8", "135", "002"),
    ("39", "135", "002"),
    ("44", "135", "005"),
    ("54", "135", "003"),
    ("73", "135", "002"),
    ("75", "135", "002"),
    ("76", "135", "002"),
    ("34", "135", "003"),
    ("78", "135", "002"),
    ("80", "135", "002"),
    ("81", "135", "003"),
    ("33", "135", "005"),
    ("83", "135", "002"),
    ("70", "135", "003"),
    ("84", "135", "003"),
    ("85", "135", "002"),
    ("35", "135", "002"),
    ("86", "135", "003"),
    ("88", "135", "002"),
    ("89", "135", "003"),
    ("87", "135", "003"),
    ("79", "135", "002"),
    ("6", "135", "002"),
    ("94", "135", "002"),
];

const SUBSTITUTIONS: &[(&str, &str, &str)] = &[("35", "0301070075", "72")];
