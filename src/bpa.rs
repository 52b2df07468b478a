//! BPA-I: individualized outpatient production.
//!
//! One `01` header line of 130 columns followed by `03` detail lines of 350
//! columns, CR-LF terminated.

use crate::assembler::control_field;
use crate::config::ExportConfig;
use crate::enrichment::Classification;
use crate::layout::{FieldDef, RecordType};
use crate::period::ReportingPeriod;
use crate::record::{FieldValue, LogicalRecord};
use crate::sequencer::SequenceFields;
use crate::transaction::RawTransaction;

pub const HEADER_LENGTH: usize = 130;
pub const DETAIL_LENGTH: usize = 350;

pub const HEADER_COUNT_FIELD: &str = "cbc_lin";
pub const HEADER_PAGE_FIELD: &str = "cbc_flh";
pub const DETAIL_PAGE_FIELD: &str = "prd_flh";

/// Details are numbered per professional, in service-date order.
pub const SEQUENCE_FIELDS: SequenceFields = SequenceFields {
    group: "prd_cnsmed",
    order: "prd_dtaten",
    page: DETAIL_PAGE_FIELD,
    sequence: "prd_seq",
};

const DEFAULT_RACE: &str = "99";
/// Ethnicity is only reported for this race code.
const INDIGENOUS_RACE: &str = "05";
const NATIONALITY: &str = "010";
const CARE_TYPE: &str = "01";
const DEFAULT_HOUSE_NUMBER: &str = "00000";
const MAX_AGE: i32 = 130;

pub const HEADER_FIELDS: &[FieldDef] = &[
    FieldDef::num("cbc_hdr_1", 1, 2).fixed("01").required(),
    FieldDef::alpha("cbc_hdr_2", 3, 5).fixed("#BPA#").required(),
    FieldDef::num("cbc_mvm", 8, 6).required(),
    FieldDef::num("cbc_lin", 14, 6).required(),
    FieldDef::num("cbc_flh", 20, 6).required(),
    FieldDef::num("cbc_smt_vrf", 26, 4).required(),
    FieldDef::alpha("cbc_rsp", 30, 30).required(),
    FieldDef::alpha("cbc_sgl", 60, 6).required(),
    FieldDef::num("cbc_cgccpf", 66, 14).required(),
    FieldDef::alpha("cbc_dst", 80, 40).required(),
    FieldDef::alpha("cbc_dst_in", 120, 1).one_of(&["M", "E"]).required(),
    FieldDef::alpha("cbc_versao", 121, 10).required(),
];

pub const DETAIL_FIELDS: &[FieldDef] = &[
    FieldDef::num("prd_ident", 1, 2).fixed("03").required(),
    FieldDef::num("prd_cnes", 3, 7).required(),
    FieldDef::num("prd_cmp", 10, 6).required(),
    FieldDef::num("prd_cnsmed", 16, 15).required(),
    FieldDef::alpha("prd_cbo", 31, 6).required(),
    FieldDef::num("prd_dtaten", 37, 8).required(),
    FieldDef::num("prd_flh", 45, 3).required(),
    FieldDef::num("prd_seq", 48, 2).required(),
    FieldDef::num("prd_pa", 50, 10).required(),
    FieldDef::num("prd_cnspac", 60, 15),
    FieldDef::alpha("prd_sexo", 75, 1).one_of(&["M", "F"]).required(),
    FieldDef::num("prd_ibge", 76, 6),
    FieldDef::alpha("prd_cid", 82, 4).required(),
    FieldDef::num("prd_ldade", 86, 3).required(),
    FieldDef::num("prd_qt", 89, 6).required(),
    FieldDef::num("prd_caten", 95, 2),
    FieldDef::num("prd_naut", 97, 13),
    FieldDef::alpha("prd_org", 110, 3).fixed("BPA").required(),
    FieldDef::alpha("prd_nmpac", 113, 30).required(),
    FieldDef::num("prd_dtnasc", 143, 8).required(),
    FieldDef::num("prd_raca", 151, 2).required(),
    FieldDef::num("prd_etnia", 153, 4),
    FieldDef::num("prd_nac", 157, 3),
    FieldDef::num("prd_srv", 160, 3),
    FieldDef::num("prd_clf", 163, 3),
    FieldDef::num("prd_equipe_seq", 166, 8),
    FieldDef::num("prd_equipe_area", 174, 4),
    FieldDef::num("prd_cnpj", 178, 14),
    FieldDef::num("prd_cep_pcnte", 192, 8),
    FieldDef::num("prd_lograd_pcnte", 200, 3),
    FieldDef::alpha("prd_end_pcnte", 203, 30),
    FieldDef::alpha("prd_compl_pcnte", 233, 10),
    FieldDef::alpha("prd_num_pcnte", 243, 5),
    FieldDef::alpha("prd_bairro_pcnte", 248, 30),
    FieldDef::num("prd_ddtel_pcnte", 278, 11),
    FieldDef::alpha("prd_email_pcnte", 289, 40),
    FieldDef::num("prd_ine", 329, 10).required(),
    FieldDef::num("prd_cpf_pcnte", 339, 11),
    FieldDef::alpha("prd_situacao_rua", 350, 1).one_of(&["N", "S"]),
];

/// Builds the detail record for one classified transaction.
///
/// Page and sequence are left for the sequencer. `age` is the patient's age
/// on the reference date, `None` when the birth date is unknown.
pub fn detail_record(
    tx: &RawTransaction,
    classification: &Classification,
    config: &ExportConfig,
    period: ReportingPeriod,
    age: Option<i32>,
) -> LogicalRecord {
    let service_date = tx.service_date.unwrap_or_else(|| period.first_day());
    let race = race_code(tx.race.as_deref());
    let ethnicity = if race == INDIGENOUS_RACE {
        FieldValue::opt_text(tx.ethnicity.as_deref())
    } else {
        FieldValue::Absent
    };
    let house_number = match FieldValue::opt_text(tx.street_number.as_deref()) {
        FieldValue::Absent => FieldValue::text(DEFAULT_HOUSE_NUMBER),
        number => number,
    };

    LogicalRecord::new(RecordType::BpaDetail)
        .with("prd_cnes", config.cnes.as_str())
        .with("prd_cmp", period.to_string())
        .with("prd_cnsmed", FieldValue::opt_text(tx.professional_cns.as_deref()))
        .with("prd_cbo", FieldValue::opt_text(classification.cbo.as_deref()))
        .with("prd_dtaten", service_date)
        .with("prd_pa", classification.billing_code)
        .with("prd_cnspac", FieldValue::opt_text(tx.patient_cns.as_deref()))
        .with("prd_sexo", sex_code(tx.sex.as_deref()))
        .with("prd_ibge", FieldValue::opt_text(tx.ibge_code.as_deref()))
        .with("prd_cid", classification.cid.as_str())
        .with("prd_ldade", clamp_age(age))
        .with("prd_qt", classification.quantity)
        .with("prd_caten", CARE_TYPE)
        .with("prd_nmpac", FieldValue::opt_text(tx.patient_name.as_deref()))
        .with("prd_dtnasc", FieldValue::opt_date(tx.birth_date))
        .with("prd_raca", race)
        .with("prd_etnia", ethnicity)
        .with("prd_nac", NATIONALITY)
        .with("prd_srv", classification.service)
        .with("prd_clf", classification.classification)
        .with("prd_cep_pcnte", FieldValue::opt_text(tx.cep.as_deref()))
        .with("prd_lograd_pcnte", FieldValue::opt_text(tx.street_type_code.as_deref()))
        .with("prd_end_pcnte", FieldValue::opt_text(tx.street.as_deref()))
        .with("prd_compl_pcnte", FieldValue::opt_text(tx.complement.as_deref()))
        .with("prd_num_pcnte", house_number)
        .with("prd_bairro_pcnte", FieldValue::opt_text(tx.district.as_deref()))
        .with("prd_ine", config.default_ine.as_str())
}

/// Builds the header from the final, sequenced detail list.
pub fn header_record(
    details: &[LogicalRecord],
    pages: u64,
    config: &ExportConfig,
    period: ReportingPeriod,
) -> LogicalRecord {
    let control = control_field(details.iter().map(|detail| {
        (
            detail.value("prd_pa").as_u64().unwrap_or(0),
            detail.value("prd_qt").as_u64().unwrap_or(0),
        )
    }));

    LogicalRecord::new(RecordType::BpaHeader)
        .with("cbc_mvm", period.to_string())
        .with("cbc_lin", details.len() as u64)
        .with("cbc_flh", pages)
        .with("cbc_smt_vrf", control)
        .with("cbc_rsp", config.organization_name.as_str())
        .with("cbc_sgl", config.organization_acronym.as_str())
        .with("cbc_cgccpf", config.cnpj.as_str())
        .with("cbc_dst", config.bpa_destination.as_str())
        .with("cbc_dst_in", config.destination_indicator.as_str())
        .with("cbc_versao", config.system_version.as_str())
}

/// Source sex code `1` is male, anything else female.
pub fn sex_code(source: Option<&str>) -> &'static str {
    match source.map(str::trim) {
        Some("1") => "M",
        _ => "F",
    }
}

fn race_code(source: Option<&str>) -> String {
    let race = source.map(str::trim).filter(|r| !r.is_empty()).unwrap_or(DEFAULT_RACE);
    format!("{:0>2}", race)
}

fn clamp_age(age: Option<i32>) -> u64 {
    age.unwrap_or(0).clamp(0, MAX_AGE) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_record;
    use crate::enrichment::{ClassificationEngine, DiagnosisPolicy};
    use crate::layout::LayoutRegistry;
    use crate::rules::RuleTables;
    use chrono::NaiveDate;

    fn period() -> ReportingPeriod {
        "202403".parse().unwrap()
    }

    fn transaction() -> RawTransaction {
        RawTransaction {
            transaction_id: 10,
            provider_id: "16".to_string(),
            procedure_id: "900".to_string(),
            procedure_code: Some("40".to_string()),
            professional_cns: Some("700000000000001".to_string()),
            patient_name: Some("José da Silva".to_string()),
            birth_date: NaiveDate::from_ymd_opt(2015, 4, 2),
            sex: Some("1".to_string()),
            ..Default::default()
        }
    }

    fn classify(tx: &RawTransaction) -> Classification {
        let rules = RuleTables::builtin().unwrap();
        let engine =
            ClassificationEngine::new(&rules, NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());
        engine.classify(tx, DiagnosisPolicy::Standard)
    }

    fn slice(line: &str, start: usize, length: usize) -> String {
        line.chars().skip(start - 1).take(length).collect()
    }

    #[test]
    fn test_detail_line_layout() {
        let tx = transaction();
        let record = detail_record(
            &tx,
            &classify(&tx),
            &ExportConfig::default(),
            period(),
            Some(8),
        );
        let registry = LayoutRegistry::new().unwrap();
        let line = encode_record(&record, registry.layout(RecordType::BpaDetail).unwrap());

        assert_eq!(line.chars().count(), DETAIL_LENGTH);
        assert_eq!(slice(&line, 1, 2), "03");
        assert_eq!(slice(&line, 3, 7), "2560372");
        assert_eq!(slice(&line, 10, 6), "202403");
        // no service date: first day of the period
        assert_eq!(slice(&line, 37, 8), "20240301");
        assert_eq!(slice(&line, 50, 10), "0301070040");
        assert_eq!(slice(&line, 75, 1), "M");
        assert_eq!(slice(&line, 82, 4), "F840");
        assert_eq!(slice(&line, 86, 3), "008");
        assert_eq!(slice(&line, 89, 6), "000001");
        assert_eq!(slice(&line, 110, 3), "BPA");
        assert_eq!(slice(&line, 113, 30), format!("{:<30}", "José da Silva"));
        assert_eq!(slice(&line, 151, 2), "99");
        assert_eq!(slice(&line, 153, 4), "0000");
        assert_eq!(slice(&line, 157, 3), "010");
        assert_eq!(slice(&line, 160, 6), "135002");
        assert_eq!(slice(&line, 243, 5), "00000");
    }

    #[test]
    fn test_race_and_ethnicity() {
        let mut tx = transaction();
        tx.race = Some("5".to_string());
        tx.ethnicity = Some("12".to_string());
        let record = detail_record(&tx, &classify(&tx), &ExportConfig::default(), period(), None);
        assert_eq!(record.value("prd_raca"), &FieldValue::text("05"));
        assert_eq!(record.value("prd_etnia"), &FieldValue::text("12"));
        assert_eq!(record.value("prd_ldade"), &FieldValue::Number(0));

        tx.race = Some("01".to_string());
        let record = detail_record(&tx, &classify(&tx), &ExportConfig::default(), period(), None);
        assert!(record.value("prd_etnia").is_absent());
    }

    #[test]
    fn test_sex_and_age_clamp() {
        assert_eq!(sex_code(Some(" 1 ")), "M");
        assert_eq!(sex_code(Some("2")), "F");
        assert_eq!(sex_code(None), "F");
        assert_eq!(clamp_age(Some(-3)), 0);
        assert_eq!(clamp_age(Some(150)), 130);
    }

    #[test]
    fn test_header_totals_and_control() {
        let details = vec![
            LogicalRecord::new(RecordType::BpaDetail)
                .with("prd_pa", "0301010048")
                .with("prd_qt", 1u64),
            LogicalRecord::new(RecordType::BpaDetail)
                .with("prd_pa", "0701050020")
                .with("prd_qt", 30u64),
        ];
        let header = header_record(&details, 1, &ExportConfig::default(), period());
        assert_eq!(header.value("cbc_lin"), &FieldValue::Number(2));
        assert_eq!(header.value("cbc_flh"), &FieldValue::Number(1));

        let expected = (301010048u64 + 701050020 + 31) % 1111 + 1111;
        assert_eq!(header.value("cbc_smt_vrf"), &FieldValue::Number(expected));

        let registry = LayoutRegistry::new().unwrap();
        let line = encode_record(&header, registry.layout(RecordType::BpaHeader).unwrap());
        assert_eq!(line.chars().count(), HEADER_LENGTH);
        assert!(line.starts_with("01#BPA#202403000002000001"));
        assert_eq!(slice(&line, 120, 1), "E");
    }
}
