use crate::models::{RawAllotmentRecord, RestSlots, RAW_COLUMNS, REST_SLOTS};
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Everything pulled out of one report: parsed rows plus the lines that did
/// not fit the row layout.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<RawAllotmentRecord>,
    pub skipped: Vec<String>,
}

impl Extraction {
    pub fn candidate_lines(&self) -> usize {
        self.records.len() + self.skipped.len()
    }

    pub fn write_records_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV: {}", path.display()))?;

        writer.write_record(RAW_COLUMNS)?;
        for record in &self.records {
            writer.write_record(record.to_row())?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn write_skipped<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.skipped.join("\n"))
            .with_context(|| format!("Failed to write skipped rows: {}", path.display()))?;
        Ok(())
    }
}

pub struct ReportExtractor {
    block_delimiter: Regex,
    candidate_line: Regex,
    record_line: Regex,
}

impl ReportExtractor {
    pub fn new() -> Self {
        Self {
            block_delimiter: Regex::new(r"\nCOLL\s+::\s+").unwrap(),
            candidate_line: Regex::new(r"^\d{3,6}\s+\d{10}").unwrap(),
            record_line: Regex::new(
                r"^(?P<rank>\d{3,6})\s+(?P<roll>\d{10})\s+(?P<name>.+?)\s{2,}(?P<rest>.+)$",
            )
            .unwrap(),
        }
    }

    pub fn extract_file<P: AsRef<Path>>(&self, file_path: P) -> Result<Extraction> {
        let file_path = file_path.as_ref();
        let content = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read report: {}", file_path.display()))?;

        Ok(self.parse_report(&content))
    }

    pub fn parse_report(&self, text: &str) -> Extraction {
        let mut extraction = Extraction::default();

        // The segment before the first college header is the report preamble.
        for block in self.block_delimiter.split(text).skip(1) {
            let block = block.trim();
            let Some(college) = report_lines(block)
                .next()
                .map(str::trim)
                .filter(|name| !name.is_empty())
            else {
                tracing::debug!("skipping empty college block");
                continue;
            };

            for line in report_lines(block) {
                if !self.candidate_line.is_match(line) {
                    continue;
                }
                let line = line.trim();
                match self.parse_record_line(college, line) {
                    Some(record) => extraction.records.push(record),
                    None => extraction.skipped.push(format!("[{}] -> {}", college, line)),
                }
            }
        }

        tracing::debug!(
            records = extraction.records.len(),
            skipped = extraction.skipped.len(),
            "report parsed"
        );
        extraction
    }

    fn parse_record_line(&self, college: &str, line: &str) -> Option<RawAllotmentRecord> {
        let caps = self.record_line.captures(line)?;
        let rank = caps["rank"].parse::<u32>().ok()?;
        let rest = caps["rest"].split_whitespace().map(str::to_string).collect();

        Some(RawAllotmentRecord {
            college: college.to_string(),
            rank,
            roll_no: caps["roll"].to_string(),
            student_name: caps["name"].trim().to_string(),
            slots: RestSlots::from_fitted(fit_rest_tokens::<REST_SLOTS>(rest)),
        })
    }
}

impl Default for ReportExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps the whitespace-separated tokens after the name onto `N` positional
/// slots. Short rows are padded with `None`; tokens beyond `N` are dropped.
pub fn fit_rest_tokens<const N: usize>(tokens: Vec<String>) -> [Option<String>; N] {
    let mut tokens = tokens.into_iter();
    std::array::from_fn(|_| tokens.next())
}

/// Line splitting that also breaks on the form feeds PDF text dumps put
/// between pages.
fn report_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| {
        matches!(
            c,
            '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
        )
    })
}
