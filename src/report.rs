use std::fmt::Write;
use std::io;

use chrono::NaiveDate;

use crate::metrics::categorize_delinquency;
use crate::models::{
    DelinquencyCategory, KpiSummary, MetricsSnapshot, NormalizedRecord, StatusField,
};

const TABLE_HEADERS: [&str; 21] = [
    "Nome",
    "CPF",
    "Curso",
    "Turma",
    "Status Inscrição",
    "Data Início",
    "Financeiro",
    "Avaliação",
    "Tempo Mínimo",
    "Documentos",
    "Disciplinas",
    "Disciplinas %",
    "Cobranças",
    "Cobranças %",
    "Situação Financeira",
    "Data Solic. Digital",
    "Tipo Cert. Digital",
    "Status Cert. Digital",
    "Data Solic. Impresso",
    "Tipo Cert. Impresso",
    "Status Cert. Impresso",
];

pub fn build_report(
    scope: Option<&str>,
    summary: &KpiSummary,
    snapshot: &MetricsSnapshot,
    records: &[NormalizedRecord],
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Certificate Dashboard Report");
    let _ = writeln!(
        output,
        "Generated for {} as of {} ({} records)",
        scope_label, summary.as_of, summary.total_students
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Indicators");
    let _ = writeln!(output, "- Students: {}", summary.total_students);
    let _ = writeln!(output, "- On time: {:.1}%", summary.percent_on_time);
    let _ = writeln!(output, "- Delinquent: {:.1}%", summary.percent_delinquent);
    let _ = writeln!(
        output,
        "- Average discipline progress: {:.1}%",
        summary.avg_discipline_progress
    );
    let _ = writeln!(
        output,
        "- Documents complete: {:.1}%",
        summary.percent_documents_complete
    );
    let _ = writeln!(
        output,
        "- Certificate requests: {} (7d), {} (30d), {} (90d)",
        summary.certificate_requests_7d,
        summary.certificate_requests_30d,
        summary.certificate_requests_90d
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pillar Status");
    for field in StatusField::ALL {
        if let Some(tally) = snapshot.status.get(&field) {
            let _ = writeln!(
                output,
                "- {}: {} OK ({:.1}%), {} pending ({:.1}%), {} unknown ({:.1}%)",
                field.column(),
                tally.complete,
                tally.complete_percent,
                tally.incomplete,
                tally.incomplete_percent,
                tally.unknown,
                tally.unknown_percent
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Financial Situation");
    for (category, share) in &snapshot.delinquency {
        let _ = writeln!(output, "- {}: {:.1}%", category.label(), share);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Enrollment Status");
    if snapshot.enrollment_status.is_empty() {
        let _ = writeln!(output, "No students in this selection.");
    } else {
        for (status, share) in &snapshot.enrollment_status {
            let _ = writeln!(output, "- {}: {:.1}%", status, share);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Financial Situation by Enrollment Status");
    if snapshot.delinquency_by_enrollment_status.is_empty() {
        let _ = writeln!(output, "No students in this selection.");
    } else {
        for (status, distribution) in &snapshot.delinquency_by_enrollment_status {
            let shares: Vec<String> = distribution
                .iter()
                .filter(|(category, _)| **category != DelinquencyCategory::NotApplicable)
                .map(|(category, share)| format!("{} {:.1}%", category.label(), share))
                .collect();
            let _ = writeln!(output, "- {}: {}", status, shares.join(", "));
        }
    }

    let mut groups: Vec<_> = snapshot.delinquency_by_group.iter().collect();
    groups.sort_by(|a, b| {
        b.1.rate
            .partial_cmp(&a.1.rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## Delinquency by Class");
    if groups.is_empty() {
        let _ = writeln!(output, "No students in this selection.");
    } else {
        for (group, delinquency) in groups {
            let progress = snapshot
                .discipline_progress
                .by_group
                .get(group)
                .map(|value| format!("{value:.1}%"))
                .unwrap_or_else(|| "N/A".to_string());
            let _ = writeln!(
                output,
                "- {}: {} of {} delinquent ({:.1}%), discipline progress {}",
                group, delinquency.delinquent, delinquency.total, delinquency.rate, progress
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");
    if records.is_empty() {
        let _ = writeln!(output, "No students in this selection.");
    } else {
        let _ = writeln!(
            output,
            "| Nome | CPF | Curso | Status | Situação Financeira | Disciplinas | Cobranças |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for record in records {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                cell(&record.name),
                cell(&record.cpf),
                cell(&record.course),
                cell(&record.enrollment_status),
                categorize_delinquency(record.charge_progress).label(),
                cell(&record.disciplines),
                cell(&record.charges)
            );
        }
    }

    output
}

fn cell(value: &Option<String>) -> String {
    value.as_deref().unwrap_or("").replace('|', "\\|")
}

/// Writes the student table with derived columns, one row per record.
pub fn write_table_csv<W: io::Write>(writer: W, records: &[NormalizedRecord]) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(TABLE_HEADERS)?;

    for record in records {
        writer.write_record([
            text(&record.name),
            text(&record.cpf),
            text(&record.course),
            text(&record.class),
            text(&record.enrollment_status),
            date(record.start_date),
            record.financial.as_str().to_string(),
            record.evaluation.as_str().to_string(),
            record.minimum_time.as_str().to_string(),
            record.documents.as_str().to_string(),
            text(&record.disciplines),
            record.discipline_progress.to_string(),
            text(&record.charges),
            record.charge_progress.to_string(),
            categorize_delinquency(record.charge_progress).label().to_string(),
            date(record.digital_request_date),
            text(&record.digital_certificate_type),
            text(&record.digital_certificate_status),
            date(record.printed_request_date),
            text(&record.printed_certificate_type),
            text(&record.printed_certificate_status),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes the indicator sheet: one `KPI,Valor` row per indicator.
pub fn write_kpis_csv<W: io::Write>(writer: W, summary: &KpiSummary) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    let rows = [
        ("Total de Alunos", summary.total_students.to_string()),
        ("% Em Dia", format!("{:.1}%", summary.percent_on_time)),
        ("% Inadimplentes", format!("{:.1}%", summary.percent_delinquent)),
        (
            "Progresso Médio Disciplinas",
            format!("{:.1}%", summary.avg_discipline_progress),
        ),
        (
            "% Docs Completos",
            format!("{:.1}%", summary.percent_documents_complete),
        ),
        ("Certificados (7d)", summary.certificate_requests_7d.to_string()),
        ("Certificados (30d)", summary.certificate_requests_30d.to_string()),
        ("Certificados (90d)", summary.certificate_requests_90d.to_string()),
        ("Data de Referência", summary.as_of.to_string()),
    ];

    writer.write_record(["KPI", "Valor"])?;
    for (label, value) in rows {
        writer.write_record([label, value.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn date(value: Option<NaiveDate>) -> String {
    value.map(|date| date.to_string()).unwrap_or_default()
}
