use chrono::NaiveDate;

use crate::metrics::{self, total_requests};
use crate::models::{DelinquencyCategory, KpiSummary, NormalizedRecord, StatusField};

pub const REQUEST_WINDOWS: [u32; 3] = [7, 30, 90];

pub fn aggregate(records: &[NormalizedRecord]) -> KpiSummary {
    aggregate_as_of(records, metrics::today())
}

/// Rolls the calculators up into the dashboard summary. Recomputed from
/// scratch on every call.
pub fn aggregate_as_of(records: &[NormalizedRecord], today: NaiveDate) -> KpiSummary {
    let delinquency = metrics::delinquency_distribution(records);
    let share = |category: DelinquencyCategory| {
        delinquency.get(&category).copied().unwrap_or(0.0)
    };
    let percent_delinquent: f64 = DelinquencyCategory::ALL
        .iter()
        .filter(|category| category.is_delinquent())
        .map(|category| share(*category))
        .sum();

    let documents = metrics::status_tally(records, &[StatusField::Documents]);
    let percent_documents_complete = documents
        .get(&StatusField::Documents)
        .map(|tally| tally.complete_percent)
        .unwrap_or(0.0);

    let [week, month, quarter] = REQUEST_WINDOWS
        .map(|days| total_requests(&metrics::certificate_timeline_as_of(records, days, today)));

    KpiSummary {
        total_students: records.len(),
        percent_on_time: share(DelinquencyCategory::OnTime),
        percent_delinquent,
        avg_discipline_progress: metrics::discipline_progress(records).overall_average,
        percent_documents_complete,
        certificate_requests_7d: week,
        certificate_requests_30d: month,
        certificate_requests_90d: quarter,
        as_of: today,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::metrics::tests::record;
    use crate::models::{PillarStatus, Progress};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    #[test]
    fn empty_collection_summarizes_to_zero() {
        let summary = aggregate_as_of(&[], today());
        assert_eq!(summary.total_students, 0);
        assert_eq!(summary.percent_on_time, 0.0);
        assert_eq!(summary.percent_delinquent, 0.0);
        assert_eq!(summary.avg_discipline_progress, 0.0);
        assert_eq!(summary.percent_documents_complete, 0.0);
        assert_eq!(summary.certificate_requests_90d, 0);
        assert_eq!(summary.as_of, today());
    }

    #[test]
    fn combines_calculator_outputs() {
        let records = vec![
            NormalizedRecord {
                charge_progress: Progress::Percent(100.0),
                discipline_progress: Progress::Percent(100.0),
                documents: PillarStatus::Complete,
                digital_request_date: Some(today()),
                printed_request_date: Some(today() - Duration::days(10)),
                ..record()
            },
            NormalizedRecord {
                charge_progress: Progress::Percent(90.0),
                discipline_progress: Progress::Percent(50.0),
                digital_request_date: Some(today() - Duration::days(60)),
                ..record()
            },
            NormalizedRecord {
                charge_progress: Progress::Percent(20.0),
                printed_request_date: Some(today() - Duration::days(120)),
                ..record()
            },
            record(),
        ];

        let summary = aggregate_as_of(&records, today());
        assert_eq!(summary.total_students, 4);
        assert_eq!(summary.percent_on_time, 25.0);
        assert_eq!(summary.percent_delinquent, 50.0);
        assert_eq!(summary.avg_discipline_progress, 75.0);
        assert_eq!(summary.percent_documents_complete, 25.0);
        assert_eq!(summary.certificate_requests_7d, 1);
        assert_eq!(summary.certificate_requests_30d, 2);
        assert_eq!(summary.certificate_requests_90d, 3);
    }

    #[test]
    fn total_matches_input_length() {
        for len in [0usize, 1, 17] {
            let records = vec![record(); len];
            assert_eq!(aggregate_as_of(&records, today()).total_students, len);
        }
    }
}
