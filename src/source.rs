//! Acquisition of raw spreadsheet rows.
//!
//! A [`DataSource`] names a primary export and an optional local fallback.
//! Raw rows are kept in a caller-owned [`SessionCache`]; nothing derived
//! from them is cached.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{RawRecord, RawValue};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV in {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to parse JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} contains no records")]
    Empty { path: PathBuf },
    #[error("primary source failed ({primary}) and fallback failed ({fallback})")]
    Exhausted {
        primary: Box<SourceError>,
        fallback: Box<SourceError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub primary: PathBuf,
    pub fallback: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct CachedFetch {
    records: Vec<RawRecord>,
    fetched_at: DateTime<Utc>,
}

/// Session-scoped cache of the last successful raw fetch.
#[derive(Debug, Clone)]
pub struct SessionCache {
    max_age: Duration,
    entry: Option<CachedFetch>,
}

impl SessionCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entry: None,
        }
    }

    pub fn get(&self, now: DateTime<Utc>) -> Option<&[RawRecord]> {
        self.entry
            .as_ref()
            .filter(|entry| now - entry.fetched_at < self.max_age)
            .map(|entry| entry.records.as_slice())
    }

    pub fn set(&mut self, records: Vec<RawRecord>, now: DateTime<Utc>) {
        self.entry = Some(CachedFetch {
            records,
            fetched_at: now,
        });
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.entry.as_ref().map(|entry| entry.fetched_at)
    }
}

pub async fn fetch_raw(
    source: &DataSource,
    cache: &mut SessionCache,
    force_refresh: bool,
) -> Result<Vec<RawRecord>, SourceError> {
    let now = Utc::now();
    // A forced refresh skips the cached entry but only replaces it on success.
    if let Some(records) = cache.get(now).filter(|_| !force_refresh) {
        debug!(count = records.len(), "serving raw records from session cache");
        return Ok(records.to_vec());
    }

    let records = match read_records(&source.primary).await {
        Ok(records) => records,
        Err(primary) => {
            let Some(fallback) = source.fallback.as_deref() else {
                return Err(primary);
            };
            warn!(
                error = %primary,
                fallback = %fallback.display(),
                "primary source unavailable, using fallback"
            );
            read_records(fallback)
                .await
                .map_err(|fallback| SourceError::Exhausted {
                    primary: Box::new(primary),
                    fallback: Box::new(fallback),
                })?
        }
    };

    info!(count = records.len(), "loaded raw records");
    cache.set(records.clone(), now);
    Ok(records)
}

/// Reads one export. `.json` files hold an array of row objects; anything
/// else is treated as CSV with a header row.
pub async fn read_records(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes.as_slice());

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let records = if is_json {
        parse_json(bytes).map_err(|source| SourceError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        parse_csv(bytes).map_err(|source| SourceError::Csv {
            path: path.to_path_buf(),
            source,
        })?
    };

    if records.is_empty() {
        return Err(SourceError::Empty {
            path: path.to_path_buf(),
        });
    }
    debug!(path = %path.display(), count = records.len(), "parsed export");
    Ok(records)
}

/// Reads CSV rows cell by cell. Invalid UTF-8 is replaced rather than
/// rejected, and unknown columns are ignored.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|header| String::from_utf8_lossy(header).trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.byte_records() {
        let row = row?;
        let mut record = RawRecord::default();
        for (header, cell) in headers.iter().zip(row.iter()) {
            if let Some(slot) = record.column_mut(header) {
                *slot = RawValue::infer(&String::from_utf8_lossy(cell));
            }
        }
        records.push(record);
    }
    Ok(records)
}

pub fn parse_json(bytes: &[u8]) -> Result<Vec<RawRecord>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV_EXPORT: &str = "\
Nome,CPF,Curso,Turma,Status Inscrição,Data Início,Financeiro,Avaliação,Tempo mínimo,Documentos,Disciplinas,Cobranças,Data Solic. Digital,Tipo Cert. Digital,Status Cert. Digital,Data Solic. Impresso,Tipo Cert. Impresso,Status Cert. Impresso
Ana Souza,12345678901,Pedagogia,2024A,Ativo,01/02/2024,OK,X,OK,Não encontrado,6/8,10/10,2024-09-10,Conclusão,Emitido,Não Solicitado,,
Bruno Lima,,Letras,T1,Cancelado,,X,,,,0/0,3/10,,,,,,
";

    const JSON_EXPORT: &str = r#"[
  {"Nome": "Carla Dias", "CPF": 11122233344, "Curso": "Letras", "Financeiro": "ok", "Disciplinas": "2/4"},
  {"Nome": "Davi Reis", "CPF": null, "Documentos": "X"}
]"#;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parses_csv_with_inferred_types() {
        let records = parse_csv(CSV_EXPORT.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let ana = &records[0];
        assert_eq!(ana.name, Some(RawValue::Text("Ana Souza".to_string())));
        assert_eq!(ana.cpf, Some(RawValue::Number(12345678901.0)));
        assert_eq!(ana.disciplines, Some(RawValue::Text("6/8".to_string())));
        assert_eq!(ana.printed_certificate_type, None);

        let bruno = &records[1];
        assert_eq!(bruno.cpf, None);
        assert_eq!(bruno.start_date, None);
    }

    #[test]
    fn parses_json_rows_with_missing_columns() {
        let records = parse_json(JSON_EXPORT.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cpf, Some(RawValue::Number(11122233344.0)));
        assert_eq!(records[1].cpf, None);
        assert_eq!(records[1].course, None);
    }

    #[tokio::test]
    async fn reads_primary_and_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "export.csv", &format!("\u{feff}{CSV_EXPORT}"));

        let records = read_records(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, Some(RawValue::Text("Ana Souza".to_string())));
    }

    #[tokio::test]
    async fn falls_back_when_primary_missing_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = write(&dir, "data.json", JSON_EXPORT);
        let empty = write(&dir, "empty.csv", "Nome,CPF\n");

        for primary in [dir.path().join("missing.csv"), empty] {
            let source = DataSource {
                primary,
                fallback: Some(fallback.clone()),
            };
            let mut cache = SessionCache::new(Duration::minutes(15));
            let records = fetch_raw(&source, &mut cache, false).await.unwrap();
            assert_eq!(records.len(), 2);
        }
    }

    #[tokio::test]
    async fn reports_both_failures() {
        let dir = tempfile::tempdir().unwrap();
        let source = DataSource {
            primary: dir.path().join("missing.csv"),
            fallback: Some(dir.path().join("missing.json")),
        };
        let mut cache = SessionCache::new(Duration::minutes(15));

        let err = fetch_raw(&source, &mut cache, false).await.unwrap_err();
        assert!(matches!(err, SourceError::Exhausted { .. }));
        assert!(cache.fetched_at().is_none());
    }

    #[tokio::test]
    async fn cache_serves_until_forced() {
        let dir = tempfile::tempdir().unwrap();
        let primary = write(&dir, "export.csv", CSV_EXPORT);
        let source = DataSource {
            primary: primary.clone(),
            fallback: None,
        };
        let mut cache = SessionCache::new(Duration::minutes(15));

        assert_eq!(fetch_raw(&source, &mut cache, false).await.unwrap().len(), 2);
        std::fs::remove_file(&primary).unwrap();

        assert_eq!(fetch_raw(&source, &mut cache, false).await.unwrap().len(), 2);

        let fetched_at = cache.fetched_at();
        let err = fetch_raw(&source, &mut cache, true).await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
        assert_eq!(cache.fetched_at(), fetched_at);
        assert_eq!(fetch_raw(&source, &mut cache, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn forced_refresh_replaces_cached_rows() {
        let dir = tempfile::tempdir().unwrap();
        let primary = write(&dir, "export.csv", "Nome\nAna\n");
        let source = DataSource {
            primary: primary.clone(),
            fallback: None,
        };
        let mut cache = SessionCache::new(Duration::minutes(15));

        assert_eq!(fetch_raw(&source, &mut cache, false).await.unwrap().len(), 1);
        std::fs::write(&primary, "Nome\nAna\nBia\n").unwrap();
        assert_eq!(fetch_raw(&source, &mut cache, false).await.unwrap().len(), 1);
        assert_eq!(fetch_raw(&source, &mut cache, true).await.unwrap().len(), 2);
    }

    #[test]
    fn latin1_cells_do_not_drop_the_file() {
        let records = parse_csv(b"Nome,CPF,Financeiro\nAna,1,OK\nJo\xe3o,2,OK\nBia,3,X\n").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].name, Some(RawValue::Text("Jo\u{fffd}o".to_string())));
        assert_eq!(records[1].financial, Some(RawValue::Text("OK".to_string())));
        assert_eq!(records[2].financial, Some(RawValue::Text("X".to_string())));
    }

    #[test]
    fn csv_keeps_word_cells_as_text() {
        let records = parse_csv(b"Nome,Extra\nNan,1\nInfinity\n").unwrap();
        let names: Vec<_> = records.iter().map(|record| record.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                Some(RawValue::Text("Nan".to_string())),
                Some(RawValue::Text("Infinity".to_string())),
            ]
        );
    }

    #[test]
    fn json_rows_survive_nested_cells() {
        let json = r#"[{"Nome": "Ana", "Financeiro": "OK"}, {"Nome": "Bia", "Financeiro": ["OK"]}]"#;
        let records = parse_json(json.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, Some(RawValue::Text("Bia".to_string())));
        assert_eq!(records[1].financial, Some(RawValue::Unrecognized));
        assert_eq!(
            crate::normalize::normalize(&records)[1].financial,
            crate::models::PillarStatus::Unknown
        );
    }

    #[test]
    fn cache_entries_expire() {
        let mut cache = SessionCache::new(Duration::minutes(15));
        let start = Utc::now();
        cache.set(vec![RawRecord::default()], start);

        assert_eq!(cache.get(start + Duration::minutes(14)).map(<[_]>::len), Some(1));
        assert!(cache.get(start + Duration::minutes(15)).is_none());

        cache.invalidate();
        assert!(cache.get(start).is_none());
    }
}
