use std::collections::BTreeMap;

use chrono::{Duration, Local, NaiveDate};

use crate::models::{
    DelinquencyCategory, DisciplineProgress, GroupDelinquency, MetricsSnapshot, NormalizedRecord,
    PillarStatus, Progress, StatusField, StatusTally, TimelineBucket,
};

pub const UNSPECIFIED_STATUS: &str = "Não informado";

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// `count / total * 100`, or 0 for an empty collection.
pub fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

pub fn status_tally(
    records: &[NormalizedRecord],
    fields: &[StatusField],
) -> BTreeMap<StatusField, StatusTally> {
    let total = records.len();
    fields
        .iter()
        .map(|field| {
            let mut tally = StatusTally::default();
            for record in records {
                match record.status(*field) {
                    PillarStatus::Complete => tally.complete += 1,
                    PillarStatus::Incomplete => tally.incomplete += 1,
                    PillarStatus::Unknown => tally.unknown += 1,
                }
            }
            tally.complete_percent = percent(tally.complete, total);
            tally.incomplete_percent = percent(tally.incomplete, total);
            tally.unknown_percent = percent(tally.unknown, total);
            (*field, tally)
        })
        .collect()
}

/// Buckets the share of charges already paid.
///
/// Lower bounds are inclusive: 100 is on time, 80 is a slight delay, 50 a
/// moderate one. Ratios above 100 fall through to `NotApplicable`.
pub fn categorize_delinquency(paid: Progress) -> DelinquencyCategory {
    let Progress::Percent(ratio) = paid else {
        return DelinquencyCategory::NotApplicable;
    };

    if ratio == 100.0 {
        DelinquencyCategory::OnTime
    } else if (80.0..100.0).contains(&ratio) {
        DelinquencyCategory::SlightDelay
    } else if (50.0..80.0).contains(&ratio) {
        DelinquencyCategory::ModerateDelay
    } else if ratio < 50.0 {
        DelinquencyCategory::SevereDelinquency
    } else {
        DelinquencyCategory::NotApplicable
    }
}

pub fn delinquency_distribution(
    records: &[NormalizedRecord],
) -> BTreeMap<DelinquencyCategory, f64> {
    let mut counts: BTreeMap<DelinquencyCategory, usize> = DelinquencyCategory::ALL
        .iter()
        .map(|category| (*category, 0))
        .collect();

    for record in records {
        *counts
            .entry(categorize_delinquency(record.charge_progress))
            .or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(category, count)| (category, percent(count, records.len())))
        .collect()
}

pub fn enrollment_status_distribution(records: &[NormalizedRecord]) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        let status = record
            .enrollment_status
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_STATUS.to_string());
        *counts.entry(status).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(status, count)| (status, percent(count, records.len())))
        .collect()
}

/// Financial situation split per enrollment status. Each inner distribution
/// is relative to the students holding that status.
pub fn delinquency_by_enrollment_status(
    records: &[NormalizedRecord],
) -> BTreeMap<String, BTreeMap<DelinquencyCategory, f64>> {
    let mut groups: BTreeMap<String, Vec<NormalizedRecord>> = BTreeMap::new();
    for record in records {
        let status = record
            .enrollment_status
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_STATUS.to_string());
        groups.entry(status).or_default().push(record.clone());
    }

    groups
        .into_iter()
        .map(|(status, members)| (status, delinquency_distribution(&members)))
        .collect()
}

/// Mean discipline progress, overall and per course/class group. Records
/// whose progress is not applicable are left out entirely.
pub fn discipline_progress(records: &[NormalizedRecord]) -> DisciplineProgress {
    let mut total = 0.0;
    let mut counted = 0usize;
    let mut groups: BTreeMap<String, (f64, usize)> = BTreeMap::new();

    for record in records {
        let Some(progress) = record.discipline_progress.percent() else {
            continue;
        };
        total += progress;
        counted += 1;

        let entry = groups.entry(record.group_key()).or_insert((0.0, 0));
        entry.0 += progress;
        entry.1 += 1;
    }

    DisciplineProgress {
        overall_average: if counted == 0 { 0.0 } else { total / counted as f64 },
        by_group: groups
            .into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect(),
    }
}

pub fn delinquency_by_group(records: &[NormalizedRecord]) -> BTreeMap<String, GroupDelinquency> {
    let mut groups: BTreeMap<String, GroupDelinquency> = BTreeMap::new();

    for record in records {
        let entry = groups.entry(record.group_key()).or_default();
        entry.total += 1;
        if categorize_delinquency(record.charge_progress).is_delinquent() {
            entry.delinquent += 1;
        }
    }

    for group in groups.values_mut() {
        group.rate = percent(group.delinquent, group.total);
    }
    groups
}

pub fn certificate_timeline(
    records: &[NormalizedRecord],
    window_days: u32,
) -> BTreeMap<NaiveDate, TimelineBucket> {
    certificate_timeline_as_of(records, window_days, today())
}

/// One zero-filled bucket per day from `today - (window_days - 1)` through
/// `today`. Requests are matched to buckets by calendar date.
pub fn certificate_timeline_as_of(
    records: &[NormalizedRecord],
    window_days: u32,
    today: NaiveDate,
) -> BTreeMap<NaiveDate, TimelineBucket> {
    let mut timeline: BTreeMap<NaiveDate, TimelineBucket> = (0..i64::from(window_days))
        .filter_map(|offset| today.checked_sub_signed(Duration::days(offset)))
        .map(|day| (day, TimelineBucket::default()))
        .collect();

    for record in records {
        if let Some(bucket) = record
            .digital_request_date
            .and_then(|date| timeline.get_mut(&date))
        {
            bucket.digital += 1;
        }
        if let Some(bucket) = record
            .printed_request_date
            .and_then(|date| timeline.get_mut(&date))
        {
            bucket.printed += 1;
        }
    }

    timeline
}

pub fn total_requests(timeline: &BTreeMap<NaiveDate, TimelineBucket>) -> usize {
    timeline.values().map(TimelineBucket::total).sum()
}

pub fn metrics_snapshot_as_of(
    records: &[NormalizedRecord],
    window_days: u32,
    today: NaiveDate,
) -> MetricsSnapshot {
    MetricsSnapshot {
        total_records: records.len(),
        status: status_tally(records, &StatusField::ALL),
        delinquency: delinquency_distribution(records),
        enrollment_status: enrollment_status_distribution(records),
        delinquency_by_enrollment_status: delinquency_by_enrollment_status(records),
        discipline_progress: discipline_progress(records),
        delinquency_by_group: delinquency_by_group(records),
        timeline_window_days: window_days,
        certificate_timeline: certificate_timeline_as_of(records, window_days, today),
    }
}
