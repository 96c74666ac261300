use crate::core::{Initialization, MessageEvent, Problem, SourceError, Time};
use crate::source::{BackfillArgs, Batch, BatchLimit, IterableSource, IteratorArgs, MemorySource};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reference `IterableSource` for CSV-recorded logs.
///
/// Supports flexible column layouts, detected from the header row:
/// - time,topic,schema,data
/// - timestamp,channel,type,payload
/// - t,topic,data (schema defaults to "unknown")
///
/// Timestamps are relative seconds from the start of the log; payloads are
/// hex strings. Rows that fail to parse are skipped and reported as problems
/// attached to the initialization, not as open failures. A missing header or
/// unrecognized columns fail `initialize` outright.
pub struct CsvLogSource {
    path: PathBuf,
    inner: Option<MemorySource>,
}

impl CsvLogSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), inner: None }
    }

    fn load(&self) -> Result<(Vec<MessageEvent>, Vec<Problem>), SourceError> {
        let mut rdr = csv::Reader::from_path(&self.path)
            .map_err(|e| SourceError::Open(format!("{}: {e}", self.path.display())))?;

        let headers = rdr
            .headers()
            .map_err(|e| SourceError::Open(format!("failed to read CSV header: {e}")))?;
        let columns = detect_columns(headers)?;

        let mut events = Vec::new();
        let mut bad_rows = 0usize;
        for (row, result) in rdr.records().enumerate() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    debug!("skipping unreadable CSV row {}: {}", row + 2, e);
                    bad_rows += 1;
                    continue;
                }
            };
            match parse_row(&record, &columns) {
                Ok(event) => events.push(event),
                Err(e) => {
                    debug!("skipping malformed CSV row {}: {}", row + 2, e);
                    bad_rows += 1;
                }
            }
        }

        let mut problems = Vec::new();
        if bad_rows > 0 {
            warn!("{} malformed rows skipped in {}", bad_rows, self.path.display());
            problems.push(
                Problem::warn(format!("{bad_rows} malformed rows were skipped"))
                    .with_detail(self.path.display().to_string()),
            );
        }
        Ok((events, problems))
    }
}

impl IterableSource for CsvLogSource {
    fn initialize(&mut self) -> Result<Initialization, SourceError> {
        let (events, problems) = self.load()?;
        info!("loaded {} messages from {}", events.len(), self.path.display());

        let mut inner = MemorySource::new(events);
        let mut init = inner.initialize()?;
        init.problems.extend(problems);
        self.inner = Some(inner);
        Ok(init)
    }

    fn seek_iterator(&mut self, args: IteratorArgs) -> Result<(), SourceError> {
        self.inner
            .as_mut()
            .ok_or_else(|| SourceError::InvalidState("source not initialized".into()))?
            .seek_iterator(args)
    }

    fn next_batch(&mut self, limit: BatchLimit) -> Result<Batch, SourceError> {
        self.inner
            .as_mut()
            .ok_or_else(|| SourceError::InvalidState("source not initialized".into()))?
            .next_batch(limit)
    }

    fn backfill(&mut self, args: BackfillArgs) -> Result<Vec<MessageEvent>, SourceError> {
        self.inner
            .as_mut()
            .ok_or_else(|| SourceError::InvalidState("source not initialized".into()))?
            .backfill(args)
    }
}

struct Columns {
    time: usize,
    topic: usize,
    schema: Option<usize>,
    data: usize,
}

/// Detect column indices from CSV headers
fn detect_columns(headers: &csv::StringRecord) -> Result<Columns, SourceError> {
    Ok(Columns {
        time: find_column(headers, &["time", "timestamp", "t", "ts"])?,
        topic: find_column(headers, &["topic", "channel", "name"])?,
        schema: find_column(headers, &["schema", "type", "datatype", "msgtype"]).ok(),
        data: find_column(headers, &["data", "payload", "hex", "bytes"])?,
    })
}

/// Find a column by checking possible names
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize, SourceError> {
    for (idx, header) in headers.iter().enumerate() {
        let header_lower = header.to_lowercase();
        if names.iter().any(|&name| header_lower == name) {
            return Ok(idx);
        }
    }
    Err(SourceError::Open(format!("could not find column with names: {names:?}")))
}

fn parse_row(record: &csv::StringRecord, columns: &Columns) -> anyhow::Result<MessageEvent> {
    use anyhow::Context;

    let secs: f64 = record
        .get(columns.time)
        .context("missing time column")?
        .parse()
        .context("failed to parse timestamp")?;
    let topic = record.get(columns.topic).context("missing topic column")?;
    if topic.is_empty() {
        anyhow::bail!("empty topic");
    }
    let schema = columns
        .schema
        .and_then(|idx| record.get(idx))
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown");
    let hex = record.get(columns.data).context("missing data column")?;
    let payload = MessageEvent::parse_hex(hex)?;

    Ok(MessageEvent::new(topic, schema, Time::from_secs_f64(secs), payload))
}
