//! Field normalization for raw spreadsheet rows.
//!
//! Every parser here is total: malformed input degrades to a sentinel
//! (`None` for dates, `PillarStatus::Unknown`, `Progress::NotApplicable`)
//! instead of rejecting the row.

use chrono::{Duration, NaiveDate};

use crate::models::{NormalizedRecord, PillarStatus, Progress, RawRecord, RawValue};

pub const NOT_REQUESTED: &str = "Não Solicitado";

pub fn normalize(records: &[RawRecord]) -> Vec<NormalizedRecord> {
    records.iter().map(normalize_record).collect()
}

pub fn normalize_record(raw: &RawRecord) -> NormalizedRecord {
    NormalizedRecord {
        name: text(raw.name.as_ref()),
        cpf: coerce_identifier(raw.cpf.as_ref()),
        course: text(raw.course.as_ref()),
        class: text(raw.class.as_ref()),
        enrollment_status: text(raw.enrollment_status.as_ref()),
        start_date: parse_date(raw.start_date.as_ref()),
        financial: normalize_status(raw.financial.as_ref()),
        evaluation: normalize_status(raw.evaluation.as_ref()),
        minimum_time: normalize_status(raw.minimum_time.as_ref()),
        documents: normalize_status(raw.documents.as_ref()),
        disciplines: text(raw.disciplines.as_ref()),
        discipline_progress: parse_ratio(raw.disciplines.as_ref()),
        charges: text(raw.charges.as_ref()),
        charge_progress: parse_ratio(raw.charges.as_ref()),
        digital_request_date: parse_date(raw.digital_request_date.as_ref()),
        digital_certificate_type: text(raw.digital_certificate_type.as_ref()),
        digital_certificate_status: text(raw.digital_certificate_status.as_ref()),
        printed_request_date: parse_date(raw.printed_request_date.as_ref()),
        printed_certificate_type: text(raw.printed_certificate_type.as_ref()),
        printed_certificate_status: text(raw.printed_certificate_status.as_ref()),
    }
}

/// Parses `YYYY-MM-DD` or `DD/MM/YYYY`.
///
/// The layout is picked by the length of the first token. Out-of-range
/// months and days roll over into the neighbouring month or year rather
/// than being rejected, so `2024-13-01` reads as 2025-01-01.
pub fn parse_date(value: Option<&RawValue>) -> Option<NaiveDate> {
    let text = value?.as_text()?;
    if text.is_empty() || text == NOT_REQUESTED {
        return None;
    }

    let parts: Vec<&str> = text.split(['-', '/']).collect();
    let [first, second, third] = parts.as_slice() else {
        return None;
    };

    let (year, month, day) = if first.len() == 4 {
        (*first, *second, *third)
    } else {
        (*third, *second, *first)
    };

    calendar_date(
        year.trim().parse().ok()?,
        month.trim().parse().ok()?,
        day.trim().parse().ok()?,
    )
}

fn calendar_date(year: i64, month: i64, day: i64) -> Option<NaiveDate> {
    let months = year.checked_mul(12)?.checked_add(month.checked_sub(1)?)?;
    let year = i32::try_from(months.div_euclid(12)).ok()?;
    let month = u32::try_from(months.rem_euclid(12) + 1).ok()?;
    let first_of_month = NaiveDate::from_ymd_opt(year, month, 1)?;
    first_of_month.checked_add_signed(Duration::try_days(day.checked_sub(1)?)?)
}

pub fn normalize_status(value: Option<&RawValue>) -> PillarStatus {
    let Some(text) = value.and_then(RawValue::as_text) else {
        return PillarStatus::Unknown;
    };

    match text.to_lowercase().as_str() {
        "ok" => PillarStatus::Complete,
        "x" => PillarStatus::Incomplete,
        _ => PillarStatus::Unknown,
    }
}

/// Turns a `"done/total"` string into a percentage. Not clamped: `12/10`
/// yields 120.
pub fn parse_ratio(value: Option<&RawValue>) -> Progress {
    let Some(text) = value.and_then(RawValue::as_text) else {
        return Progress::NotApplicable;
    };
    let Some((numerator, denominator)) = text.split_once('/') else {
        return Progress::NotApplicable;
    };
    if denominator.contains('/') {
        return Progress::NotApplicable;
    }

    match (leading_integer(numerator), leading_integer(denominator)) {
        (Some(_), Some(0)) | (None, _) | (_, None) => Progress::NotApplicable,
        (Some(numerator), Some(denominator)) => {
            Progress::Percent(numerator as f64 / denominator as f64 * 100.0)
        }
    }
}

// Leading digits only: " 8 aulas" reads as 8.
fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (sign, rest) = match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    rest[..digits_end].parse::<i64>().ok().map(|value| sign * value)
}

pub fn coerce_identifier(value: Option<&RawValue>) -> Option<String> {
    value.map(ToString::to_string)
}

fn text(value: Option<&RawValue>) -> Option<String> {
    value.map(ToString::to_string).filter(|text| !text.is_empty())
}
