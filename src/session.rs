use crate::lookup::{render_table, InferenceTable, LookupOutcome, Query};
use crate::query_log::{await_append, spawn_append, QueryLogEntry, QueryLogError, QueryLogSink};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;

/// What happened to one submitted query.
#[derive(Debug)]
pub struct SubmitReport {
    pub outcome: LookupOutcome,
    pub logged: Result<(), QueryLogError>,
}

/// Serves queries against one loaded table and records each of them.
pub struct PredictionSession {
    table: InferenceTable,
    sink: Arc<QueryLogSink>,
}

impl PredictionSession {
    pub fn new(table: InferenceTable, sink: QueryLogSink) -> Self {
        Self {
            table,
            sink: Arc::new(sink),
        }
    }

    pub fn table(&self) -> &InferenceTable {
        &self.table
    }

    /// Shows the matching colleges, then logs the query. The results are
    /// written and flushed before the log append starts, and the append runs
    /// even when the output could not be written.
    pub async fn submit<W: Write>(&self, query: Query, out: &mut W) -> Result<SubmitReport> {
        let outcome = self.table.lookup(&query);
        let shown = write_outcome(out, query.rank, &outcome).and_then(|()| out.flush());

        let handle = spawn_append(Arc::clone(&self.sink), QueryLogEntry::from_query(&query));
        let logged = await_append(handle).await;

        if let Err(err) = shown {
            tracing::warn!(rank = query.rank, error = %err, "results could not be written");
            return Err(err).context("failed to write prediction results");
        }

        match (&logged, self.sink.as_ref()) {
            (Ok(()), QueryLogSink::Disabled) => {}
            (Ok(()), _) => writeln!(out, "✅ Your query was logged successfully.")?,
            (Err(err), _) => writeln!(out, "⚠️  Failed to log query: {}", err)?,
        }

        Ok(SubmitReport { outcome, logged })
    }
}

pub fn write_outcome<W: Write>(out: &mut W, rank: u32, outcome: &LookupOutcome) -> std::io::Result<()> {
    writeln!(out, "\n🎯 Matching Colleges for Rank {}", rank)?;
    match outcome {
        LookupOutcome::NoMatches => {
            writeln!(out, "   ⚠️  No matching colleges found for the selected criteria.")
        }
        LookupOutcome::Matches(rows) => {
            writeln!(out, "   ✅ {} college set(s) found\n", rows.len())?;
            write!(out, "{}", render_table(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AggregatedGroup;

    fn table() -> InferenceTable {
        InferenceTable::from_groups(vec![AggregatedGroup {
            college: "7. GANDHI MEDICAL COLLEGE".to_string(),
            candidate_category: "OPEN".to_string(),
            gender: "GEN".to_string(),
            entry_channel: "GEN".to_string(),
            count: 4,
            min_rank: 900,
            max_rank: 4200,
            percentile_40th: 1800.0,
            probable_round: "1".to_string(),
        }])
    }

    #[tokio::test]
    async fn disabled_sink_prints_results_without_log_line() {
        let session = PredictionSession::new(table(), QueryLogSink::Disabled);
        let query = session
            .table()
            .query(1000, session.table().default_selection().unwrap())
            .unwrap();

        let mut out = Vec::new();
        let report = session.submit(query, &mut out).await.unwrap();
        assert!(report.logged.is_ok());
        assert!(matches!(report.outcome, LookupOutcome::Matches(ref rows) if rows.len() == 1));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("GANDHI MEDICAL COLLEGE"));
        assert!(!text.contains("7. GANDHI"));
        assert!(!text.contains("logged"));
    }

    /// Output that has gone away, like stdout piped into a closed reader.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[tokio::test]
    async fn query_is_logged_even_when_results_cannot_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("query_log.csv");
        let session = PredictionSession::new(table(), QueryLogSink::File(log.clone()));
        let query = session
            .table()
            .query(1000, session.table().default_selection().unwrap())
            .unwrap();

        let err = session.submit(query, &mut ClosedPipe).await.unwrap_err();
        assert!(err.to_string().contains("failed to write prediction results"));

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.trim_end().ends_with(",1000,OPEN,GEN,GEN"), "{}", logged);
    }

    #[tokio::test]
    async fn empty_result_is_reported_as_no_matches() {
        let session = PredictionSession::new(table(), QueryLogSink::Disabled);
        let query = session
            .table()
            .query(5000, session.table().default_selection().unwrap())
            .unwrap();

        let mut out = Vec::new();
        let report = session.submit(query, &mut out).await.unwrap();
        assert_eq!(report.outcome, LookupOutcome::NoMatches);
        assert!(String::from_utf8(out).unwrap().contains("No matching colleges"));
    }
}
