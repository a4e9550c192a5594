//! Normalization and metrics for student certificate/enrollment exports.
//!
//! Raw spreadsheet rows go through [`normalize::normalize`], optionally a
//! [`filter::RecordFilter`], and then the calculators in [`metrics`] and the
//! roll-up in [`kpi`]. Everything after acquisition is synchronous and pure.

pub mod filter;
pub mod kpi;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod report;
pub mod source;

pub use filter::RecordFilter;
pub use kpi::{aggregate, aggregate_as_of};
pub use models::{
    DelinquencyCategory, KpiSummary, MetricsSnapshot, NormalizedRecord, PillarStatus, Progress,
    RawRecord, RawValue, StatusField,
};
pub use normalize::normalize;
pub use source::{fetch_raw, DataSource, SessionCache, SourceError};
