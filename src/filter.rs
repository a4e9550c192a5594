use chrono::NaiveDate;

use crate::models::NormalizedRecord;

/// Narrows the record set before metrics run. Unset criteria match
/// everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub course: Option<String>,
    pub class: Option<String>,
    pub enrollment_status: Option<String>,
    /// Matches either the digital or the printed certificate type.
    pub certificate_type: Option<String>,
    pub start_from: Option<NaiveDate>,
    pub start_to: Option<NaiveDate>,
    /// Case-insensitive fragment of the student name, or a fragment of the CPF.
    pub search: Option<String>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        *self == RecordFilter::default()
    }

    pub fn matches(&self, record: &NormalizedRecord) -> bool {
        if !field_matches(&self.course, &record.course)
            || !field_matches(&self.class, &record.class)
            || !field_matches(&self.enrollment_status, &record.enrollment_status)
        {
            return false;
        }

        if let Some(wanted) = self.certificate_type.as_deref() {
            let digital = record.digital_certificate_type.as_deref() == Some(wanted);
            let printed = record.printed_certificate_type.as_deref() == Some(wanted);
            if !digital && !printed {
                return false;
            }
        }

        if let Some(term) = self.search.as_deref().map(str::trim) {
            if !term.is_empty() && !search_matches(term, record) {
                return false;
            }
        }

        // Records without a start date are never excluded by the range.
        if let Some(start) = record.start_date {
            if self.start_from.is_some_and(|from| start < from) {
                return false;
            }
            if self.start_to.is_some_and(|to| start > to) {
                return false;
            }
        }

        true
    }

    pub fn apply(&self, records: &[NormalizedRecord]) -> Vec<NormalizedRecord> {
        records
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect()
    }

    /// Short human label for report headers.
    pub fn describe(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(course) = &self.course {
            parts.push(format!("course {course}"));
        }
        if let Some(class) = &self.class {
            parts.push(format!("class {class}"));
        }
        if let Some(status) = &self.enrollment_status {
            parts.push(format!("enrollment status {status}"));
        }
        if let Some(kind) = &self.certificate_type {
            parts.push(format!("certificate type {kind}"));
        }
        match (self.start_from, self.start_to) {
            (Some(from), Some(to)) => parts.push(format!("started {from} to {to}")),
            (Some(from), None) => parts.push(format!("started on or after {from}")),
            (None, Some(to)) => parts.push(format!("started on or before {to}")),
            (None, None) => {}
        }
        if let Some(term) = &self.search {
            parts.push(format!("search \"{term}\""));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted {
        Some(wanted) => actual.as_deref() == Some(wanted.as_str()),
        None => true,
    }
}

fn search_matches(term: &str, record: &NormalizedRecord) -> bool {
    let needle = term.to_lowercase();
    let name = record
        .name
        .as_deref()
        .is_some_and(|name| name.to_lowercase().contains(&needle));
    let cpf = record.cpf.as_deref().is_some_and(|cpf| cpf.contains(term));
    name || cpf
}
