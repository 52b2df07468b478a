//! CIHA: hospital and outpatient admission communication.
//!
//! Detail lines only, 450 columns, LF terminated, no header and no record
//! discriminator. Dates are written day first.

use crate::config::ExportConfig;
use crate::enrichment::Classification;
use crate::layout::{FieldDef, RecordType};
use crate::period::ReportingPeriod;
use crate::record::{FieldValue, LogicalRecord};
use crate::transaction::RawTransaction;
use log::{debug, warn};

pub const DETAIL_LENGTH: usize = 450;

const DEFAULT_HOUSE_NUMBER: &str = "S/N";

pub const DETAIL_FIELDS: &[FieldDef] = &[
    FieldDef::num("ciha_cmp", 1, 6).required(),
    FieldDef::num("ciha_cnes", 7, 7).required(),
    FieldDef::alpha("ciha_modalidade", 14, 1).fixed("I").required(),
    FieldDef::num("ciha_proc", 15, 10).required(),
    FieldDef::num("ciha_qtd", 25, 6).required(),
    FieldDef::num("ciha_tipo", 31, 2).fixed("11").required(),
    FieldDef::num("ciha_aih", 33, 8),
    FieldDef::num("ciha_dt_admissao", 41, 8).day_first().required(),
    FieldDef::num("ciha_dt_saida", 49, 8).day_first().required(),
    FieldDef::num("ciha_carater", 57, 2).fixed("01").required(),
    FieldDef::num("ciha_motivo", 59, 2).fixed("12").required(),
    FieldDef::num("ciha_reserva_1", 61, 2),
    FieldDef::alpha("ciha_cid", 63, 4).required(),
    FieldDef::alpha("ciha_cid_sec", 67, 4),
    FieldDef::num("ciha_reserva_2", 71, 11),
    FieldDef::num("ciha_reserva_3", 82, 11),
    FieldDef::alpha("ciha_reserva_4", 93, 30),
    FieldDef::num("ciha_reserva_5", 123, 13),
    FieldDef::alpha("ciha_reserva_6", 136, 15),
    FieldDef::alpha("ciha_prontuario", 151, 17),
    FieldDef::num("ciha_cns", 168, 15),
    FieldDef::alpha("ciha_nome", 183, 70).required(),
    FieldDef::num("ciha_dt_nasc", 253, 8).day_first(),
    FieldDef::alpha("ciha_sexo", 261, 1).one_of(&["M", "F"]).required(),
    FieldDef::alpha("ciha_logradouro", 262, 25),
    FieldDef::alpha("ciha_numero", 287, 5),
    FieldDef::alpha("ciha_complemento", 292, 15),
    FieldDef::num("ciha_cep", 307, 8),
    FieldDef::num("ciha_municipio", 315, 7),
    FieldDef::alpha("ciha_uf", 322, 2),
    FieldDef::num("ciha_seq", 324, 1).required(),
    FieldDef::alpha("ciha_filler", 325, 126).free(),
];

/// Per-procedure caps on the number of exported records.
///
/// Parsed from lines of the form `CODE[ - description] = N`, where `CODE` is
/// a 10-digit billing code. Lines without `=` and codes that are not 10
/// digits are ignored; a repeated code updates the earlier entry. A count
/// that is not a number discards the whole filter, so every record is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaFilter {
    quotas: Vec<(String, usize)>,
}

impl QuotaFilter {
    pub fn parse(text: &str) -> Self {
        let mut filter = QuotaFilter::default();
        for line in text.lines() {
            let Some((code_part, limit_part)) = line.split_once('=') else {
                continue;
            };
            let code = code_part.split('-').next().unwrap_or_default().trim();
            let limit = limit_part.split_whitespace().next().unwrap_or_default();
            let Ok(limit) = limit.parse::<usize>() else {
                warn!(
                    "Invalid quota count in '{}', exporting all records",
                    line.trim()
                );
                return QuotaFilter::default();
            };

            if code.len() == 10 && code.bytes().all(|b| b.is_ascii_digit()) {
                filter.insert(code, limit);
            } else {
                debug!("Ignoring quota line '{}'", line.trim());
            }
        }
        if filter.is_empty() && !text.trim().is_empty() {
            warn!("No valid quota line found, exporting all records");
        }
        filter
    }

    fn insert(&mut self, code: &str, limit: usize) {
        match self.quotas.iter_mut().find(|(c, _)| c == code) {
            Some(entry) => entry.1 = limit,
            None => self.quotas.push((code.to_string(), limit)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }

    pub fn quota(&self, code: &str) -> Option<usize> {
        self.quotas.iter().find(|(c, _)| c == code).map(|(_, n)| *n)
    }

    /// Keeps at most the quota of items per code, grouped in filter order and
    /// in input order within a code. Items whose code is not listed are
    /// dropped. An empty filter keeps everything.
    pub fn apply<T, F>(&self, items: Vec<T>, code: F) -> Vec<T>
    where
        F: Fn(&T) -> Option<&str>,
    {
        if self.is_empty() {
            return items;
        }

        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
        let mut kept = Vec::new();
        for (quota_code, limit) in &self.quotas {
            let mut taken = 0;
            for slot in slots.iter_mut() {
                if taken == *limit {
                    break;
                }
                let matches =
                    slot.as_ref().and_then(|item| code(item)) == Some(quota_code.as_str());
                if matches {
                    if let Some(item) = slot.take() {
                        kept.push(item);
                        taken += 1;
                    }
                }
            }
        }
        kept
    }
}

/// Billing code the quota filter matches on; unmapped rows have none.
pub fn quota_code(classification: &Classification) -> Option<&'static str> {
    classification
        .is_mapped()
        .then_some(classification.billing_code)
}

/// Orders rows by patient name, then transaction id.
pub fn sort_rows(rows: &mut [(RawTransaction, Classification)]) {
    rows.sort_by(|(a, _), (b, _)| {
        (a.patient_name.as_deref(), a.transaction_id)
            .cmp(&(b.patient_name.as_deref(), b.transaction_id))
    });
}

/// Builds one detail line without its sequence digit.
pub fn detail_record(
    tx: &RawTransaction,
    classification: &Classification,
    config: &ExportConfig,
    period: ReportingPeriod,
) -> LogicalRecord {
    let procedure = match quota_code(classification) {
        Some(code) => FieldValue::text(code),
        None => FieldValue::text(tx.procedure_id.as_str()),
    };
    let quantity = tx
        .quantity
        .map_or(classification.quantity, |q| q.whole_units());
    let house_number = match FieldValue::opt_text(tx.street_number.as_deref()) {
        FieldValue::Absent => FieldValue::text(DEFAULT_HOUSE_NUMBER),
        number => number,
    };

    LogicalRecord::new(RecordType::CihaDetail)
        .with("ciha_cmp", period.to_string())
        .with("ciha_cnes", config.cnes.as_str())
        .with("ciha_proc", procedure)
        .with("ciha_qtd", quantity)
        .with("ciha_dt_admissao", FieldValue::opt_date(tx.service_date))
        .with("ciha_dt_saida", FieldValue::opt_date(tx.service_date))
        .with("ciha_cid", classification.cid.as_str())
        .with("ciha_prontuario", FieldValue::opt_text(tx.chart_number.as_deref()))
        .with("ciha_cns", FieldValue::opt_text(tx.patient_cns.as_deref()))
        .with("ciha_nome", FieldValue::opt_text(tx.patient_name.as_deref()))
        .with("ciha_dt_nasc", FieldValue::opt_date(tx.birth_date))
        .with("ciha_sexo", crate::bpa::sex_code(tx.sex.as_deref()))
        .with("ciha_logradouro", FieldValue::opt_text(tx.street.as_deref()))
        .with("ciha_numero", house_number)
        .with("ciha_complemento", FieldValue::opt_text(tx.complement.as_deref()))
        .with("ciha_cep", FieldValue::opt_text(tx.cep.as_deref()))
        .with("ciha_municipio", FieldValue::opt_text(tx.municipality.as_deref()))
        .with("ciha_uf", FieldValue::opt_text(tx.uf.as_deref()))
}

/// Writes the trailing sequence digit: line number (from 1) mod 10.
pub fn number_lines(records: &mut [LogicalRecord]) {
    for (idx, record) in records.iter_mut().enumerate() {
        record.set("ciha_seq", ((idx + 1) % 10) as u64);
    }
}
