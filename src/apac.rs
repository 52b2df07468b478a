//! APAC: high-complexity procedure authorizations.
//!
//! One `01` header (137 columns), then for every patient one `14` body line
//! (533 columns) followed by one `13` procedure line (97 columns) per
//! procedure, all CR-LF terminated.

use crate::assembler::control_field;
use crate::config::ExportConfig;
use crate::enrichment::Classification;
use crate::error::{ExportError, Result};
use crate::layout::{FieldDef, RecordType};
use crate::period::ReportingPeriod;
use crate::record::{FieldValue, LogicalRecord};
use crate::transaction::RawTransaction;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

pub const HEADER_LENGTH: usize = 137;
pub const BODY_LENGTH: usize = 533;
pub const PROCEDURE_LENGTH: usize = 97;

pub const HEADER_COUNT_FIELD: &str = "cbc_lin";

/// Largest running number that fits in front of the check digit.
pub const MAX_RUNNING_NUMBER: u64 = 999_999_999_999;

/// Days an authorization stays valid after its start date.
pub const VALIDITY_DAYS: i64 = 90;

/// Below this age the mother is named as the patient's responsible.
const MINOR_AGE: i32 = 18;

pub const HEADER_FIELDS: &[FieldDef] = &[
    FieldDef::num("cbc_hdr_1", 1, 2).fixed("01").required(),
    FieldDef::alpha("cbc_hdr_2", 3, 5).fixed("#APAC").required(),
    FieldDef::num("cbc_mvm", 8, 6).required(),
    FieldDef::num("cbc_lin", 14, 6).required(),
    FieldDef::num("cbc_smt_vrf", 20, 4).required(),
    FieldDef::alpha("cbc_rsp", 24, 30).required(),
    FieldDef::alpha("cbc_sgl", 54, 6).required(),
    FieldDef::num("cbc_cgccpf", 60, 14).required(),
    FieldDef::alpha("cbc_dst", 74, 40).required(),
    FieldDef::alpha("cbc_dst_in", 114, 1).one_of(&["M", "E"]).required(),
    FieldDef::num("cbc_dt_ger", 115, 8).required(),
    FieldDef::alpha("cbc_versao", 123, 15).required(),
];

pub const BODY_FIELDS: &[FieldDef] = &[
    FieldDef::num("apa_ident", 1, 2).fixed("14").required(),
    FieldDef::num("apa_cmp", 3, 6).required(),
    FieldDef::num("apa_num", 9, 13).required(),
    FieldDef::num("apa_uf", 22, 2).required(),
    FieldDef::num("apa_cnes", 24, 7).required(),
    FieldDef::num("apa_dtproc", 31, 8).required(),
    FieldDef::num("apa_dtinic", 39, 8).required(),
    FieldDef::num("apa_dtfim", 47, 8).required(),
    FieldDef::num("apa_tpate", 55, 2).fixed("01").required(),
    FieldDef::num("apa_tpapac", 57, 1).fixed("1").required(),
    FieldDef::alpha("apa_nmpac", 58, 30).required(),
    FieldDef::alpha("apa_nmmae", 88, 30),
    FieldDef::alpha("apa_logpac", 118, 30),
    FieldDef::alpha("apa_numpac", 148, 5),
    FieldDef::alpha("apa_cplpac", 153, 10),
    FieldDef::num("apa_ceppac", 163, 8),
    FieldDef::num("apa_munpac", 171, 7),
    FieldDef::num("apa_datanasc", 178, 8).required(),
    FieldDef::alpha("apa_sexopac", 186, 1).one_of(&["M", "F"]).required(),
    FieldDef::alpha("apa_nomeresp", 187, 30),
    FieldDef::num("apa_procprinc", 217, 10).required(),
    FieldDef::num("apa_motsaida", 227, 2).fixed("01").required(),
    FieldDef::alpha("apa_dtobito", 229, 8),
    FieldDef::alpha("apa_nomediretor", 237, 30),
    FieldDef::num("apa_cnspac", 267, 15),
    FieldDef::num("apa_cnsresp", 282, 15),
    FieldDef::num("apa_cnsdir", 297, 15),
    FieldDef::alpha("apa_cidca", 312, 4),
    FieldDef::alpha("apa_npront", 316, 10),
    FieldDef::alpha("apa_codsol", 326, 7),
    FieldDef::num("apa_datasol", 333, 8).required(),
    FieldDef::num("apa_dataaut", 341, 8).required(),
    FieldDef::alpha("apa_codemis", 349, 10).fixed("010101"),
    FieldDef::num("apa_carate", 359, 2).fixed("01").required(),
    FieldDef::alpha("apa_apacant", 361, 13),
    FieldDef::num("apa_racacor", 374, 2),
    FieldDef::alpha("apa_nomerespac", 376, 30),
    FieldDef::num("apa_nacpac", 406, 3),
    FieldDef::num("apa_etnia", 409, 4),
    FieldDef::alpha("apa_cdlogr", 413, 3),
    FieldDef::alpha("apa_bairro", 416, 30),
    FieldDef::alpha("apa_ddtel", 446, 2),
    FieldDef::alpha("apa_tel", 448, 9),
    FieldDef::alpha("apa_email", 457, 40),
    FieldDef::num("apa_cnsexec", 497, 15),
    FieldDef::alpha("apa_cpfpac", 512, 11),
    FieldDef::alpha("apa_ine", 523, 10),
    FieldDef::alpha("apa_strua", 533, 1).one_of(&["N", "S"]),
];

pub const PROCEDURE_FIELDS: &[FieldDef] = &[
    FieldDef::num("prc_ident", 1, 2).fixed("13").required(),
    FieldDef::num("prc_cmp", 3, 6).required(),
    FieldDef::num("prc_num", 9, 13).required(),
    FieldDef::num("prc_pa", 22, 10).required(),
    FieldDef::num("prc_cbo", 32, 6),
    FieldDef::num("prc_qtd", 38, 7).required(),
    FieldDef::alpha("prc_cgc", 45, 14),
    FieldDef::alpha("prc_nf", 59, 6),
    FieldDef::alpha("prc_cidp", 65, 4),
    FieldDef::alpha("prc_cids", 69, 4),
    FieldDef::num("prc_srv", 73, 3),
    FieldDef::num("prc_clf", 76, 3),
    FieldDef::alpha("prc_seq_equipe", 79, 8),
    FieldDef::alpha("prc_area_equipe", 87, 4),
    FieldDef::alpha("prc_filler", 91, 7).free(),
];

/// Caller-supplied numbering and validity of an APAC batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApacOptions {
    /// Running number of the first authorization, up to 12 digits
    pub start_number: u64,
    pub validity_start: NaiveDate,
}

impl ApacOptions {
    pub fn validity_end(&self) -> NaiveDate {
        self.validity_start + Duration::days(VALIDITY_DAYS)
    }
}

/// All procedures of one patient, in input order.
#[derive(Debug, Clone)]
pub struct PatientGroup {
    pub key: String,
    pub procedures: Vec<(RawTransaction, Classification)>,
}

impl PatientGroup {
    /// The row holding patient data: the first procedure of the group.
    pub fn principal(&self) -> Option<&(RawTransaction, Classification)> {
        self.procedures.first()
    }
}

/// Groups classified rows by patient, groups ordered by first appearance.
pub fn group_by_patient(rows: Vec<(RawTransaction, Classification)>) -> Vec<PatientGroup> {
    let mut groups: Vec<PatientGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (tx, classification) in rows {
        let key = tx.patient_key();
        match index.get(&key) {
            Some(&position) => groups[position].procedures.push((tx, classification)),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(PatientGroup {
                    key,
                    procedures: vec![(tx, classification)],
                });
            }
        }
    }

    groups
}

/// 12-digit running number followed by the check digit.
fn apac_number(running: u64, check_digit: char) -> String {
    format!("{:012}{}", running, check_digit)
}

/// Running numbers for `count` authorizations starting at `start`.
///
/// Fails when the last number leaves the 12-digit range or the check digit
/// is not a decimal digit.
pub fn running_numbers(start: u64, count: usize, check_digit: char) -> Result<Vec<String>> {
    if !check_digit.is_ascii_digit() {
        return Err(ExportError::InvalidApacNumber(format!(
            "check digit '{}' is not a digit",
            check_digit
        )));
    }
    let Some(last_offset) = (count as u64).checked_sub(1) else {
        return Ok(Vec::new());
    };
    match start.checked_add(last_offset) {
        Some(last) if last <= MAX_RUNNING_NUMBER => Ok((start..=last)
            .map(|running| apac_number(running, check_digit))
            .collect()),
        _ => Err(ExportError::InvalidApacNumber(format!(
            "{} authorizations starting at {} exceed {}",
            count, start, MAX_RUNNING_NUMBER
        ))),
    }
}

/// Builds the `14` body line of one authorization.
///
/// `age` is the patient's age on the reference date; it only decides who is
/// named responsible for the patient.
pub fn body_record(
    group: &PatientGroup,
    number: &str,
    config: &ExportConfig,
    period: ReportingPeriod,
    options: &ApacOptions,
    processed_on: NaiveDate,
    age: Option<i32>,
) -> Option<LogicalRecord> {
    let (patient, principal) = group.principal()?;

    let responsible = match age {
        Some(age) if age < MINOR_AGE => patient.mother_name.as_deref(),
        _ => patient.patient_name.as_deref(),
    };
    let doctor = FieldValue::opt_text(patient.professional_name.as_deref());
    let doctor_cns = FieldValue::opt_text(patient.professional_cns.as_deref());

    Some(
        LogicalRecord::new(RecordType::ApacBody)
            .with("apa_cmp", period.to_string())
            .with("apa_num", number)
            .with("apa_uf", config.uf_code.as_str())
            .with("apa_cnes", config.cnes.as_str())
            .with("apa_dtproc", processed_on)
            .with("apa_dtinic", options.validity_start)
            .with("apa_dtfim", options.validity_end())
            .with("apa_nmpac", FieldValue::opt_text(patient.patient_name.as_deref()))
            .with("apa_nmmae", FieldValue::opt_text(patient.mother_name.as_deref()))
            .with("apa_logpac", FieldValue::opt_text(patient.street.as_deref()))
            .with("apa_numpac", FieldValue::opt_text(patient.street_number.as_deref()))
            .with("apa_ceppac", FieldValue::opt_text(patient.cep.as_deref()))
            .with("apa_munpac", FieldValue::opt_text(patient.ibge_code.as_deref()))
            .with("apa_datanasc", FieldValue::opt_date(patient.birth_date))
            .with("apa_sexopac", crate::bpa::sex_code(patient.sex.as_deref()))
            .with("apa_nomeresp", doctor.clone())
            .with("apa_procprinc", principal.billing_code)
            .with("apa_nomediretor", doctor)
            .with("apa_cnspac", FieldValue::opt_text(patient.patient_cns.as_deref()))
            .with("apa_cnsresp", doctor_cns.clone())
            .with("apa_cnsdir", doctor_cns.clone())
            .with("apa_datasol", options.validity_start)
            .with("apa_dataaut", options.validity_start)
            .with("apa_racacor", FieldValue::opt_text(patient.race.as_deref()))
            .with("apa_nomerespac", FieldValue::opt_text(responsible))
            .with("apa_nacpac", FieldValue::opt_text(patient.nationality.as_deref()))
            .with("apa_etnia", FieldValue::opt_text(patient.ethnicity.as_deref()))
            .with("apa_bairro", FieldValue::opt_text(patient.district.as_deref()))
            .with("apa_cnsexec", doctor_cns)
            .with("apa_strua", "N"),
    )
}

/// Builds one `13` procedure line.
///
/// The billed quantity is the whole-unit source quantity, or the rule's
/// quantity when the row carries none.
pub fn procedure_record(
    tx: &RawTransaction,
    classification: &Classification,
    number: &str,
    period: ReportingPeriod,
) -> LogicalRecord {
    let quantity = tx
        .quantity
        .map_or(classification.quantity, |q| q.whole_units());

    LogicalRecord::new(RecordType::ApacProcedure)
        .with("prc_cmp", period.to_string())
        .with("prc_num", number)
        .with("prc_pa", classification.billing_code)
        .with("prc_cbo", FieldValue::opt_text(classification.cbo.as_deref()))
        .with("prc_qtd", quantity)
        .with("prc_cidp", classification.cid.as_str())
        .with("prc_srv", classification.service)
        .with("prc_clf", classification.classification)
}

/// Builds the header; the count is the number of authorizations and the
/// control field covers every procedure line.
pub fn header_record(
    apac_count: usize,
    procedures: &[LogicalRecord],
    config: &ExportConfig,
    period: ReportingPeriod,
    generated_on: NaiveDate,
) -> LogicalRecord {
    let control = control_field(procedures.iter().map(|procedure| {
        (
            procedure.value("prc_pa").as_u64().unwrap_or(0),
            procedure.value("prc_qtd").as_u64().unwrap_or(0),
        )
    }));

    LogicalRecord::new(RecordType::ApacHeader)
        .with("cbc_mvm", period.to_string())
        .with("cbc_lin", apac_count as u64)
        .with("cbc_smt_vrf", control)
        .with("cbc_rsp", config.organization_name.as_str())
        .with("cbc_sgl", config.organization_acronym.as_str())
        .with("cbc_cgccpf", config.cnpj.as_str())
        .with("cbc_dst", config.apac_destination.as_str())
        .with("cbc_dst_in", config.apac_destination_indicator.as_str())
        .with("cbc_dt_ger", generated_on)
        .with("cbc_versao", config.apac_system_version.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_record;
    use crate::enrichment::{ClassificationEngine, DiagnosisPolicy};
    use crate::layout::LayoutRegistry;
    use crate::quantity::Quantity;
    use crate::rules::RuleTables;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(id: u64, patient: &str, code: &str) -> RawTransaction {
        RawTransaction {
            transaction_id: id,
            provider_id: "16".to_string(),
            procedure_id: "1".to_string(),
            procedure_code: Some(code.to_string()),
            patient_id: Some(patient.to_string()),
            patient_name: Some(format!("PACIENTE {}", patient)),
            mother_name: Some(format!("MAE {}", patient)),
            professional_name: Some("DR HOUSE".to_string()),
            professional_cns: Some("700000000000009".to_string()),
            sex: Some("2".to_string()),
            birth_date: Some(date(2012, 1, 1)),
            ..Default::default()
        }
    }

    fn classified(rows: Vec<RawTransaction>) -> Vec<(RawTransaction, Classification)> {
        let rules = RuleTables::builtin().unwrap();
        let engine = ClassificationEngine::new(&rules, date(2024, 3, 1));
        rows.into_iter()
            .map(|tx| {
                let c = engine.classify(&tx, DiagnosisPolicy::Standard);
                (tx, c)
            })
            .collect()
    }

    fn options() -> ApacOptions {
        ApacOptions {
            start_number: 1_700_000_000,
            validity_start: date(2024, 3, 1),
        }
    }

    #[test]
    fn test_apac_number() {
        assert_eq!(apac_number(42, '1'), "0000000000421");
        assert_eq!(apac_number(1_700_000_000, '7').len(), 13);
    }

    #[test]
    fn test_validity_window() {
        assert_eq!(options().validity_end(), date(2024, 5, 30));
    }

    #[test]
    fn test_grouping_keeps_first_appearance() {
        let groups = group_by_patient(classified(vec![
            row(1, "B", "1151"),
            row(2, "A", "1151"),
            row(3, "B", "1151"),
        ]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "B");
        assert_eq!(groups[0].procedures.len(), 2);
        assert_eq!(groups[1].key, "A");
    }

    #[test]
    fn test_body_line() {
        let groups = group_by_patient(classified(vec![row(1, "A", "1151")]));
        let number = apac_number(options().start_number, '1');
        let body = body_record(
            &groups[0],
            &number,
            &ExportConfig::default(),
            "202403".parse().unwrap(),
            &options(),
            date(2024, 3, 15),
            Some(12),
        )
        .unwrap();

        let registry = LayoutRegistry::new().unwrap();
        let line = encode_record(&body, registry.layout(RecordType::ApacBody).unwrap());
        let slice = |start: usize, len: usize| -> String {
            line.chars().skip(start - 1).take(len).collect()
        };

        assert_eq!(line.chars().count(), BODY_LENGTH);
        assert_eq!(slice(1, 2), "14");
        assert_eq!(slice(9, 13), "0017000000001");
        assert_eq!(slice(39, 16), "2024030120240530");
        assert_eq!(slice(186, 1), "F");
        assert_eq!(slice(217, 10), "0701030151");
        // minors are represented by their mother
        assert_eq!(slice(376, 30).trim_end(), "MAE A");
        assert_eq!(slice(533, 1), "N");
    }

    #[test]
    fn test_adult_is_own_responsible() {
        let groups = group_by_patient(classified(vec![row(1, "A", "1151")]));
        let body = body_record(
            &groups[0],
            "0000000000011",
            &ExportConfig::default(),
            "202403".parse().unwrap(),
            &options(),
            date(2024, 3, 15),
            Some(40),
        )
        .unwrap();
        assert_eq!(body.value("apa_nomerespac"), &FieldValue::text("PACIENTE A"));
    }

    #[test]
    fn test_procedure_quantity_in_whole_units() {
        let mut tx = row(1, "A", "1151");
        tx.quantity = Some(Quantity::from_units(3));
        let rows = classified(vec![tx]);
        let (tx, c) = &rows[0];
        let record = procedure_record(tx, c, "0000000000011", "202403".parse().unwrap());
        assert_eq!(record.value("prc_qtd"), &FieldValue::Number(3));

        let registry = LayoutRegistry::new().unwrap();
        let line = encode_record(&record, registry.layout(RecordType::ApacProcedure).unwrap());
        assert_eq!(line.chars().count(), PROCEDURE_LENGTH);
        assert!(line.starts_with("132024030000000000011"));
    }

    #[test]
    fn test_running_numbers() {
        let numbers = running_numbers(998, 3, '4').unwrap();
        assert_eq!(numbers, vec!["0000000009984", "0000000009994", "0000000010004"]);
        assert!(running_numbers(7, 0, '1').unwrap().is_empty());
    }

    #[test]
    fn test_running_numbers_up_to_twelve_digits() {
        let numbers = running_numbers(MAX_RUNNING_NUMBER, 1, '1').unwrap();
        assert_eq!(numbers, vec!["9999999999991"]);

        let err = running_numbers(MAX_RUNNING_NUMBER, 2, '1').unwrap_err();
        assert!(matches!(err, ExportError::InvalidApacNumber(_)));
        let err = running_numbers(1_000_000_000_000, 1, '1').unwrap_err();
        assert!(matches!(err, ExportError::InvalidApacNumber(_)));
        let err = running_numbers(u64::MAX, 2, '1').unwrap_err();
        assert!(matches!(err, ExportError::InvalidApacNumber(_)));
    }

    #[test]
    fn test_check_digit_must_be_numeric() {
        let err = running_numbers(1, 1, 'X').unwrap_err();
        assert!(matches!(err, ExportError::InvalidApacNumber(_)));
    }

    #[test]
    fn test_number_fills_the_body_field() {
        let number = running_numbers(MAX_RUNNING_NUMBER, 1, '7').unwrap().remove(0);
        let registry = LayoutRegistry::new().unwrap();
        let layout = registry.layout(RecordType::ApacBody).unwrap();
        let line = encode_record(
            &LogicalRecord::new(RecordType::ApacBody).with("apa_num", number.as_str()),
            layout,
        );
        let spec = layout.field("apa_num").unwrap();
        let field: String = line.chars().skip(spec.start - 1).take(spec.length).collect();
        assert_eq!(field, number);
    }
}
