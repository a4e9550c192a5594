use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A cell as produced by spreadsheet parsing with type inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Flag(bool),
    Number(f64),
    Text(String),
    /// A cell of a shape no column can use, such as a nested JSON array.
    Unrecognized,
}

impl RawValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Types a CSV cell. Only `true`/`false` literals and plain finite
    /// decimals are converted; everything else, including `NaN` and
    /// `Infinity`, stays text. Empty cells are absent.
    pub fn infer(cell: &str) -> Option<RawValue> {
        if cell.is_empty() {
            return None;
        }
        let value = match cell {
            "true" | "True" | "TRUE" => RawValue::Flag(true),
            "false" | "False" | "FALSE" => RawValue::Flag(false),
            _ => match looks_decimal(cell).then(|| cell.trim().parse::<f64>()) {
                Some(Ok(number)) if number.is_finite() => RawValue::Number(number),
                _ => RawValue::Text(cell.to_string()),
            },
        };
        Some(value)
    }
}

// `-?(digits[.digits] | .digits)([eE][+-]?digits)?`, surrounding whitespace allowed.
fn looks_decimal(cell: &str) -> bool {
    let cell = cell.trim();
    let body = cell.strip_prefix('-').unwrap_or(cell);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(at) => (&body[..at], Some(&body[at + 1..])),
        None => (body, None),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok =
        digits(whole) && digits(fraction) && !(whole.is_empty() && fraction.is_empty());

    let exponent_ok = exponent.map_or(true, |exp| {
        let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        !exp.is_empty() && digits(exp)
    });
    mantissa_ok && exponent_ok
}

impl<'de> Deserialize<'de> for RawValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(RawValueVisitor)
    }
}

struct RawValueVisitor;

impl<'de> serde::de::Visitor<'de> for RawValueVisitor {
    type Value = RawValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a spreadsheet cell")
    }

    fn visit_bool<E>(self, value: bool) -> Result<RawValue, E> {
        Ok(RawValue::Flag(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<RawValue, E> {
        Ok(RawValue::Number(value as f64))
    }

    fn visit_u64<E>(self, value: u64) -> Result<RawValue, E> {
        Ok(RawValue::Number(value as f64))
    }

    fn visit_f64<E>(self, value: f64) -> Result<RawValue, E> {
        if value.is_finite() {
            Ok(RawValue::Number(value))
        } else {
            Ok(RawValue::Unrecognized)
        }
    }

    fn visit_str<E>(self, value: &str) -> Result<RawValue, E> {
        Ok(RawValue::Text(value.to_string()))
    }

    fn visit_string<E>(self, value: String) -> Result<RawValue, E> {
        Ok(RawValue::Text(value))
    }

    fn visit_bytes<E>(self, value: &[u8]) -> Result<RawValue, E> {
        Ok(RawValue::Text(String::from_utf8_lossy(value).into_owned()))
    }

    fn visit_unit<E>(self) -> Result<RawValue, E> {
        Ok(RawValue::Unrecognized)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<RawValue, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        while seq.next_element::<serde::de::IgnoredAny>()?.is_some() {}
        Ok(RawValue::Unrecognized)
    }

    fn visit_map<A>(self, mut map: A) -> Result<RawValue, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        while map
            .next_entry::<serde::de::IgnoredAny, serde::de::IgnoredAny>()?
            .is_some()
        {}
        Ok(RawValue::Unrecognized)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Flag(value) => write!(f, "{value}"),
            // Whole numbers print without a fractional part so identifiers
            // read back as they were typed.
            RawValue::Number(value)
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 =>
            {
                write!(f, "{}", *value as i64)
            }
            RawValue::Number(value) => write!(f, "{value}"),
            RawValue::Text(value) => f.write_str(value),
            RawValue::Unrecognized => Ok(()),
        }
    }
}

/// One row of the certificate spreadsheet export, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    #[serde(rename = "Nome")]
    pub name: Option<RawValue>,
    #[serde(rename = "CPF")]
    pub cpf: Option<RawValue>,
    #[serde(rename = "Curso")]
    pub course: Option<RawValue>,
    #[serde(rename = "Turma")]
    pub class: Option<RawValue>,
    #[serde(rename = "Status Inscrição")]
    pub enrollment_status: Option<RawValue>,
    #[serde(rename = "Data Início")]
    pub start_date: Option<RawValue>,
    #[serde(rename = "Financeiro")]
    pub financial: Option<RawValue>,
    #[serde(rename = "Avaliação")]
    pub evaluation: Option<RawValue>,
    #[serde(rename = "Tempo mínimo")]
    pub minimum_time: Option<RawValue>,
    #[serde(rename = "Documentos")]
    pub documents: Option<RawValue>,
    #[serde(rename = "Disciplinas")]
    pub disciplines: Option<RawValue>,
    #[serde(rename = "Cobranças")]
    pub charges: Option<RawValue>,
    #[serde(rename = "Data Solic. Digital")]
    pub digital_request_date: Option<RawValue>,
    #[serde(rename = "Tipo Cert. Digital")]
    pub digital_certificate_type: Option<RawValue>,
    #[serde(rename = "Status Cert. Digital")]
    pub digital_certificate_status: Option<RawValue>,
    #[serde(rename = "Data Solic. Impresso")]
    pub printed_request_date: Option<RawValue>,
    #[serde(rename = "Tipo Cert. Impresso")]
    pub printed_certificate_type: Option<RawValue>,
    #[serde(rename = "Status Cert. Impresso")]
    pub printed_certificate_status: Option<RawValue>,
}

impl RawRecord {
    /// The cell slot for a spreadsheet column header, if the column is known.
    pub fn column_mut(&mut self, column: &str) -> Option<&mut Option<RawValue>> {
        let slot = match column {
            "Nome" => &mut self.name,
            "CPF" => &mut self.cpf,
            "Curso" => &mut self.course,
            "Turma" => &mut self.class,
            "Status Inscrição" => &mut self.enrollment_status,
            "Data Início" => &mut self.start_date,
            "Financeiro" => &mut self.financial,
            "Avaliação" => &mut self.evaluation,
            "Tempo mínimo" => &mut self.minimum_time,
            "Documentos" => &mut self.documents,
            "Disciplinas" => &mut self.disciplines,
            "Cobranças" => &mut self.charges,
            "Data Solic. Digital" => &mut self.digital_request_date,
            "Tipo Cert. Digital" => &mut self.digital_certificate_type,
            "Status Cert. Digital" => &mut self.digital_certificate_status,
            "Data Solic. Impresso" => &mut self.printed_request_date,
            "Tipo Cert. Impresso" => &mut self.printed_certificate_type,
            "Status Cert. Impresso" => &mut self.printed_certificate_status,
            _ => return None,
        };
        Some(slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PillarStatus {
    Complete,
    Incomplete,
    Unknown,
}

impl PillarStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PillarStatus::Complete => "OK",
            PillarStatus::Incomplete => "Pendente",
            PillarStatus::Unknown => "N/A",
        }
    }
}

/// A count/total ratio expressed as a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Progress {
    Percent(f64),
    NotApplicable,
}

impl Progress {
    pub fn percent(&self) -> Option<f64> {
        match self {
            Progress::Percent(value) => Some(*value),
            Progress::NotApplicable => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Percent(value) => write!(f, "{value:.1}%"),
            Progress::NotApplicable => f.write_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub name: Option<String>,
    pub cpf: Option<String>,
    pub course: Option<String>,
    pub class: Option<String>,
    pub enrollment_status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub financial: PillarStatus,
    pub evaluation: PillarStatus,
    pub minimum_time: PillarStatus,
    pub documents: PillarStatus,
    pub disciplines: Option<String>,
    pub discipline_progress: Progress,
    pub charges: Option<String>,
    pub charge_progress: Progress,
    pub digital_request_date: Option<NaiveDate>,
    pub digital_certificate_type: Option<String>,
    pub digital_certificate_status: Option<String>,
    pub printed_request_date: Option<NaiveDate>,
    pub printed_certificate_type: Option<String>,
    pub printed_certificate_status: Option<String>,
}

impl NormalizedRecord {
    pub fn status(&self, field: StatusField) -> PillarStatus {
        match field {
            StatusField::Financial => self.financial,
            StatusField::Evaluation => self.evaluation,
            StatusField::MinimumTime => self.minimum_time,
            StatusField::Documents => self.documents,
        }
    }

    /// `"<Curso> - <Turma>"`, used to group records per class.
    pub fn group_key(&self) -> String {
        format!(
            "{} - {}",
            self.course.as_deref().unwrap_or("Sem Curso"),
            self.class.as_deref().unwrap_or("Sem Turma")
        )
    }
}

/// The four completion pillars tracked for every student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StatusField {
    #[serde(rename = "Financeiro")]
    Financial,
    #[serde(rename = "Avaliação")]
    Evaluation,
    #[serde(rename = "Tempo mínimo")]
    MinimumTime,
    #[serde(rename = "Documentos")]
    Documents,
}

impl StatusField {
    pub const ALL: [StatusField; 4] = [
        StatusField::Financial,
        StatusField::Evaluation,
        StatusField::MinimumTime,
        StatusField::Documents,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            StatusField::Financial => "Financeiro",
            StatusField::Evaluation => "Avaliação",
            StatusField::MinimumTime => "Tempo mínimo",
            StatusField::Documents => "Documentos",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DelinquencyCategory {
    #[serde(rename = "Em dia")]
    OnTime,
    #[serde(rename = "Atraso leve")]
    SlightDelay,
    #[serde(rename = "Atraso médio")]
    ModerateDelay,
    #[serde(rename = "Inadimplente grave")]
    SevereDelinquency,
    #[serde(rename = "NA")]
    NotApplicable,
}

impl DelinquencyCategory {
    pub const ALL: [DelinquencyCategory; 5] = [
        DelinquencyCategory::OnTime,
        DelinquencyCategory::SlightDelay,
        DelinquencyCategory::ModerateDelay,
        DelinquencyCategory::SevereDelinquency,
        DelinquencyCategory::NotApplicable,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DelinquencyCategory::OnTime => "Em dia",
            DelinquencyCategory::SlightDelay => "Atraso leve",
            DelinquencyCategory::ModerateDelay => "Atraso médio",
            DelinquencyCategory::SevereDelinquency => "Inadimplente grave",
            DelinquencyCategory::NotApplicable => "NA",
        }
    }

    pub fn is_delinquent(&self) -> bool {
        matches!(
            self,
            DelinquencyCategory::SlightDelay
                | DelinquencyCategory::ModerateDelay
                | DelinquencyCategory::SevereDelinquency
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusTally {
    pub complete: usize,
    pub incomplete: usize,
    pub unknown: usize,
    pub complete_percent: f64,
    pub incomplete_percent: f64,
    pub unknown_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    pub digital: usize,
    pub printed: usize,
}

impl TimelineBucket {
    pub fn total(&self) -> usize {
        self.digital + self.printed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisciplineProgress {
    pub overall_average: f64,
    pub by_group: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupDelinquency {
    pub total: usize,
    pub delinquent: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_records: usize,
    pub status: BTreeMap<StatusField, StatusTally>,
    pub delinquency: BTreeMap<DelinquencyCategory, f64>,
    pub enrollment_status: BTreeMap<String, f64>,
    pub delinquency_by_enrollment_status: BTreeMap<String, BTreeMap<DelinquencyCategory, f64>>,
    pub discipline_progress: DisciplineProgress,
    pub delinquency_by_group: BTreeMap<String, GroupDelinquency>,
    pub timeline_window_days: u32,
    pub certificate_timeline: BTreeMap<NaiveDate, TimelineBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    pub total_students: usize,
    pub percent_on_time: f64,
    pub percent_delinquent: f64,
    pub avg_discipline_progress: f64,
    pub percent_documents_complete: f64,
    pub certificate_requests_7d: usize,
    pub certificate_requests_30d: usize,
    pub certificate_requests_90d: usize,
    pub as_of: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Option<RawValue> {
        Some(RawValue::Text(value.to_string()))
    }

    #[test]
    fn infers_only_plain_decimals_as_numbers() {
        assert_eq!(RawValue::infer("12345678901"), Some(RawValue::Number(12345678901.0)));
        assert_eq!(RawValue::infer("-2.5"), Some(RawValue::Number(-2.5)));
        assert_eq!(RawValue::infer(".5"), Some(RawValue::Number(0.5)));
        assert_eq!(RawValue::infer("1e3"), Some(RawValue::Number(1000.0)));
        assert_eq!(RawValue::infer("TRUE"), Some(RawValue::Flag(true)));
        assert_eq!(RawValue::infer(""), None);
    }

    #[test]
    fn non_decimal_words_stay_text() {
        let cells = [
            "Nan", "NaN", "Infinity", "inf", "1e999", "8/10", "2024-03-05", "1.2.3", "-", "e5",
        ];
        for cell in cells {
            assert_eq!(RawValue::infer(cell), text(cell), "cell {cell:?}");
        }
        assert_eq!(RawValue::infer("Nan").unwrap().to_string(), "Nan");
    }

    #[test]
    fn nested_json_cells_are_unrecognized() {
        let record: RawRecord =
            serde_json::from_str(r#"{"Nome": "Bia", "Financeiro": ["OK"], "Documentos": {"a": 1}}"#)
                .unwrap();
        assert_eq!(record.name, text("Bia"));
        assert_eq!(record.financial, Some(RawValue::Unrecognized));
        assert_eq!(record.documents, Some(RawValue::Unrecognized));
        assert_eq!(RawValue::Unrecognized.to_string(), "");
    }

    #[test]
    fn known_columns_map_to_slots() {
        let mut record = RawRecord::default();
        *record.column_mut("Status Inscrição").unwrap() = text("Ativo");
        assert_eq!(record.enrollment_status, text("Ativo"));
        assert!(record.column_mut("Observações").is_none());
    }
}
