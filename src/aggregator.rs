use crate::models::{AggregatedGroup, AllotmentRow, DEFAULT_ENTRY_CHANNEL, UNKNOWN_ROUND};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Header names the summary table is written with.
pub const GROUP_COLUMNS: [&str; 9] = [
    "College",
    "Candidate Category",
    "Gender",
    "Entry Channel",
    "Count",
    "Min_Rank",
    "Max_Rank",
    "Percentile_40th",
    "Probable_Round",
];

const PERCENTILE: f64 = 40.0;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("required column '{0}' is missing from the allotment table")]
    MissingColumn(&'static str),
    #[error("row {row}: rank '{value}' is not a whole number")]
    InvalidRank { row: usize, value: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Positions of the six source columns the summary is built from.
struct ColumnMap {
    college: usize,
    rank: usize,
    candidate_category: usize,
    gender: usize,
    entry_channel: usize,
    allocation_round: usize,
}

impl ColumnMap {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, AggregateError> {
        let required = |name: &'static str| {
            headers
                .iter()
                .position(|header| header.trim() == name)
                .ok_or(AggregateError::MissingColumn(name))
        };

        Ok(Self {
            college: required("College")?,
            rank: required("Rank")?,
            candidate_category: required("Allotted Category")?,
            gender: required("Gender Reservation")?,
            entry_channel: required("Entry Channel")?,
            allocation_round: required("Allocation Round")?,
        })
    }
}

pub fn read_allotments_file<P: AsRef<Path>>(path: P) -> Result<Vec<AllotmentRow>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open allotment table: {}", path.display()))?;
    let rows = read_allotments(file)
        .with_context(|| format!("Failed to read allotment table: {}", path.display()))?;
    Ok(rows)
}

/// Reads allotment rows and renames their columns to the grouping names.
pub fn read_allotments<R: Read>(reader: R) -> Result<Vec<AllotmentRow>, AggregateError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = ColumnMap::resolve(csv_reader.headers()?)?;
    let mut rows = Vec::new();

    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or_default();
        let non_empty = |i: usize| {
            Some(field(i))
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let rank_text = field(columns.rank);
        let rank = parse_rank(rank_text).ok_or_else(|| AggregateError::InvalidRank {
            // header is line 1
            row: index + 2,
            value: rank_text.to_string(),
        })?;

        rows.push(AllotmentRow {
            college: field(columns.college).to_string(),
            candidate_category: field(columns.candidate_category).to_string(),
            gender: field(columns.gender).to_string(),
            entry_channel: non_empty(columns.entry_channel)
                .unwrap_or_else(|| DEFAULT_ENTRY_CHANNEL.to_string()),
            rank,
            allocation_round: non_empty(columns.allocation_round),
        });
    }

    Ok(rows)
}

/// Accepts `1234` as well as the `1234.0` spreadsheet exports produce.
fn parse_rank(value: &str) -> Option<u32> {
    if let Ok(rank) = value.parse::<u32>() {
        return Some(rank);
    }
    let float = value.parse::<f64>().ok()?;
    if float.fract() == 0.0 && float >= 0.0 && float <= u32::MAX as f64 {
        Some(float as u32)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    college: String,
    candidate_category: String,
    gender: String,
    entry_channel: String,
}

#[derive(Debug, Default)]
struct GroupMembers {
    ranks: Vec<u32>,
    rounds: Vec<String>,
}

/// Groups rows by college, category, gender and entry channel. Groups come
/// out in key order so repeated runs produce identical tables.
pub fn aggregate(rows: &[AllotmentRow]) -> Vec<AggregatedGroup> {
    let mut groups: BTreeMap<GroupKey, GroupMembers> = BTreeMap::new();

    for row in rows {
        let key = GroupKey {
            college: row.college.clone(),
            candidate_category: row.candidate_category.clone(),
            gender: row.gender.clone(),
            entry_channel: row.entry_channel.clone(),
        };
        let members = groups.entry(key).or_default();
        members.ranks.push(row.rank);
        if let Some(round) = &row.allocation_round {
            members.rounds.push(round.clone());
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| summarize(key, members))
        .collect()
}

fn summarize(key: GroupKey, members: GroupMembers) -> AggregatedGroup {
    let mut ranks = members.ranks;
    ranks.sort_unstable();

    AggregatedGroup {
        college: key.college,
        candidate_category: key.candidate_category,
        gender: key.gender,
        entry_channel: key.entry_channel,
        count: ranks.len(),
        min_rank: ranks.first().copied().unwrap_or_default(),
        max_rank: ranks.last().copied().unwrap_or_default(),
        percentile_40th: percentile_linear(&ranks, PERCENTILE).unwrap_or_default(),
        probable_round: mode_first_seen(&members.rounds)
            .unwrap_or(UNKNOWN_ROUND)
            .to_string(),
    }
}

/// Percentile `q` (0-100) of sorted values, interpolating linearly between
/// the two nearest order statistics.
pub fn percentile_linear(sorted: &[u32], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = (sorted.len() - 1) as f64 * q / 100.0;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let low = f64::from(sorted[lower]);
    let high = f64::from(sorted[upper]);
    Some(low + (high - low) * (position - lower as f64))
}

/// Most frequent value. On a tie the value seen first wins.
pub fn mode_first_seen(values: &[String]) -> Option<&str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value.as_str()) {
            Some((_, count)) => *count += 1,
            None => counts.push((value.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

pub fn write_groups_csv<W: Write>(groups: &[AggregatedGroup], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);

    writer.write_record(GROUP_COLUMNS)?;
    for group in groups {
        writer.write_record(&[
            group.college.clone(),
            group.candidate_category.clone(),
            group.gender.clone(),
            group.entry_channel.clone(),
            group.count.to_string(),
            group.min_rank.to_string(),
            group.max_rank.to_string(),
            format_percentile(group.percentile_40th),
            group.probable_round.clone(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_groups_file<P: AsRef<Path>>(groups: &[AggregatedGroup], path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create inference table: {}", path.display()))?;
    write_groups_csv(groups, file)
}

/// Keeps a trailing `.0` on whole numbers so the column reads as real-valued.
pub fn format_percentile(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
