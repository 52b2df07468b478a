//! Raw transaction rows handed over by the data source.

use crate::error::Result;
use crate::quantity::Quantity;
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::io::Read;

/// One billable transaction as read from CSV.
///
/// Only `transaction_id`, `provider_id` and `procedure_id` are mandatory;
/// every other column may be empty or missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTransaction {
    /// Source transaction id, the deduplication key
    pub transaction_id: u64,

    /// Provider (professional) id, key of the provider rules
    pub provider_id: String,

    /// Internal procedure id
    pub procedure_id: String,

    /// Short procedure code, key of the procedure rules
    pub procedure_code: Option<String>,

    pub quantity: Option<Quantity>,

    #[serde(default, deserialize_with = "deserialize_date")]
    pub service_date: Option<NaiveDate>,

    pub professional_cns: Option<String>,
    pub professional_cbo: Option<String>,
    pub professional_name: Option<String>,

    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub mother_name: Option<String>,
    pub patient_cns: Option<String>,

    #[serde(default, deserialize_with = "deserialize_date")]
    pub birth_date: Option<NaiveDate>,

    /// Source sex code, `1` is male
    pub sex: Option<String>,
    pub race: Option<String>,
    pub ethnicity: Option<String>,
    pub nationality: Option<String>,

    pub ibge_code: Option<String>,
    pub cep: Option<String>,
    pub street_type_code: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub municipality: Option<String>,
    pub uf: Option<String>,

    pub chart_number: Option<String>,

    /// Diagnosis recorded on the transaction
    pub transaction_cid: Option<String>,

    /// Diagnosis recorded on the patient's chart (ficha)
    pub ficha_cid: Option<String>,
}

impl RawTransaction {
    /// Grouping key for per-patient records; falls back to the patient name.
    pub fn patient_key(&self) -> String {
        self.patient_id
            .clone()
            .or_else(|| self.patient_name.clone())
            .unwrap_or_default()
    }
}

/// Reads every well-formed row from a CSV source.
///
/// Rows that fail to deserialize are logged at warn level and skipped.
pub fn read_transactions<R: Read>(reader: R) -> Result<Vec<RawTransaction>> {
    let mut csv_reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut transactions = Vec::new();
    for (row_idx, result) in csv_reader.deserialize::<RawTransaction>().enumerate() {
        let row_num = row_idx + 2; // 1-indexed, accounting for header row

        match result {
            Ok(tx) => transactions.push(tx),
            Err(e) => warn!("Row {}: CSV parse error: {}", row_num, e),
        }
    }

    info!("Read {} transaction rows", transactions.len());
    Ok(transactions)
}

/// Accepts `YYYY-MM-DD`, `DD/MM/YYYY` and `YYYYMMDD`; empty means no date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn deserialize_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_date(value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{}'", value))),
    }
}
