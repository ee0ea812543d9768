use crate::aggregator::format_percentile;
use crate::models::AggregatedGroup;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// Header row of the prediction table shown to the user.
pub const DISPLAY_COLUMNS: [&str; 7] = [
    "College",
    "Candidate Category",
    "Min_Rank",
    "Max_Rank",
    "no of Students allotted",
    "40th Percentile Rank",
    "Round",
];

/// Read-only snapshot of the inference table plus the selector options
/// derived from it. Built once at startup and shared by every query.
#[derive(Debug, Clone)]
pub struct InferenceTable {
    groups: Vec<AggregatedGroup>,
    categories: Vec<String>,
    genders: Vec<String>,
    entry_channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub category: String,
    pub gender: String,
    pub entry_channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub rank: u32,
    pub category: String,
    pub gender: String,
    pub entry_channel: String,
    pub submitted_at: DateTime<Local>,
}

/// One row of the prediction table, with the college name cleaned for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub college: String,
    pub candidate_category: String,
    pub min_rank: u32,
    pub max_rank: u32,
    pub students_allotted: usize,
    pub percentile_40th: f64,
    pub round: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    NoMatches,
    Matches(Vec<PredictionRow>),
}

impl InferenceTable {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open inference table: {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Failed to parse inference table: {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut groups = Vec::new();
        for group in csv_reader.deserialize::<AggregatedGroup>() {
            groups.push(group?);
        }
        Ok(Self::from_groups(groups))
    }

    pub fn from_groups(groups: Vec<AggregatedGroup>) -> Self {
        let distinct = |select: fn(&AggregatedGroup) -> &str| -> Vec<String> {
            groups
                .iter()
                .map(select)
                .filter(|value| !value.is_empty())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(str::to_string)
                .collect()
        };

        let categories = distinct(|g| g.candidate_category.as_str());
        let genders = distinct(|g| g.gender.as_str());
        let entry_channels = distinct(|g| g.entry_channel.as_str());

        Self {
            groups,
            categories,
            genders,
            entry_channels,
        }
    }

    pub fn groups(&self) -> &[AggregatedGroup] {
        &self.groups
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn genders(&self) -> &[String] {
        &self.genders
    }

    pub fn entry_channels(&self) -> &[String] {
        &self.entry_channels
    }

    /// `OPEN` / `GEN` / `GEN` when the data has them, else the first option.
    /// `None` only for an empty table.
    pub fn default_selection(&self) -> Option<Selection> {
        let pick = |options: &[String], preferred: &str| {
            options
                .iter()
                .find(|option| option.as_str() == preferred)
                .or_else(|| options.first())
                .cloned()
        };

        Some(Selection {
            category: pick(&self.categories, "OPEN")?,
            gender: pick(&self.genders, "GEN")?,
            entry_channel: pick(&self.entry_channels, "GEN")?,
        })
    }

    /// Builds a query, rejecting ranks below 1 and selector values the
    /// table never mentions.
    pub fn query(&self, rank: u32, selection: Selection) -> Result<Query> {
        if rank < 1 {
            bail!("rank must be at least 1");
        }
        check_option("category", &selection.category, &self.categories)?;
        check_option("gender", &selection.gender, &self.genders)?;
        check_option("entry channel", &selection.entry_channel, &self.entry_channels)?;

        Ok(Query {
            rank,
            category: selection.category,
            gender: selection.gender,
            entry_channel: selection.entry_channel,
            submitted_at: Local::now(),
        })
    }

    /// Groups whose category, gender and channel equal the query's and whose
    /// highest allotted rank reaches the query rank, most competitive first.
    pub fn lookup(&self, query: &Query) -> LookupOutcome {
        let mut matches: Vec<&AggregatedGroup> = self
            .groups
            .iter()
            .filter(|group| {
                group.candidate_category == query.category
                    && group.gender == query.gender
                    && group.entry_channel == query.entry_channel
                    && group.max_rank >= query.rank
            })
            .collect();

        if matches.is_empty() {
            return LookupOutcome::NoMatches;
        }

        matches.sort_by(|a, b| a.percentile_40th.total_cmp(&b.percentile_40th));
        LookupOutcome::Matches(matches.into_iter().map(PredictionRow::from_group).collect())
    }
}

fn check_option(label: &str, value: &str, options: &[String]) -> Result<()> {
    if options.iter().any(|option| option == value) {
        Ok(())
    } else {
        bail!(
            "unknown {} '{}' (expected one of: {})",
            label,
            value,
            options.join(", ")
        )
    }
}

impl PredictionRow {
    fn from_group(group: &AggregatedGroup) -> Self {
        Self {
            college: display_college(&group.college).to_string(),
            candidate_category: group.candidate_category.clone(),
            min_rank: group.min_rank,
            max_rank: group.max_rank,
            students_allotted: group.count,
            percentile_40th: group.percentile_40th,
            round: group.probable_round.clone(),
        }
    }

    fn cells(&self) -> [String; 7] {
        [
            self.college.clone(),
            self.candidate_category.clone(),
            self.min_rank.to_string(),
            self.max_rank.to_string(),
            self.students_allotted.to_string(),
            format_percentile(self.percentile_40th),
            self.round.clone(),
        ]
    }
}

/// Drops the `12. ` list numbering the report puts in front of college names.
pub fn display_college(name: &str) -> &str {
    static ORDINAL: OnceLock<Regex> = OnceLock::new();
    let ordinal = ORDINAL.get_or_init(|| Regex::new(r"^\d+\.\s*").unwrap());
    match ordinal.find(name) {
        Some(prefix) => &name[prefix.end()..],
        None => name,
    }
}

/// Plain-text table with every column padded to its widest cell.
pub fn render_table(rows: &[PredictionRow]) -> String {
    let cells: Vec<[String; 7]> = rows.iter().map(PredictionRow::cells).collect();
    let mut widths = DISPLAY_COLUMNS.map(|header| header.chars().count());
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    out.push_str(&format_line(DISPLAY_COLUMNS.iter().copied(), &widths));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&format_line(row.iter().map(String::as_str), &widths));
        out.push('\n');
    }
    out
}

fn format_line<'a>(values: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    values
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", value, width = *width))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(college: &str, count: usize, min: u32, max: u32, p40: f64, round: &str) -> AggregatedGroup {
        AggregatedGroup {
            college: college.to_string(),
            candidate_category: "OPEN".to_string(),
            gender: "GEN".to_string(),
            entry_channel: "GEN".to_string(),
            count,
            min_rank: min,
            max_rank: max,
            percentile_40th: p40,
            probable_round: round.to_string(),
        }
    }

    fn sample_table() -> InferenceTable {
        InferenceTable::from_groups(vec![
            group("CollegeA", 5, 100, 500, 300.0, "1"),
            group("CollegeB", 3, 50, 200, 120.0, "2"),
        ])
    }

    fn open_gen(table: &InferenceTable, rank: u32) -> Query {
        table
            .query(rank, table.default_selection().unwrap())
            .unwrap()
    }

    #[test]
    fn matching_groups_are_sorted_by_percentile() {
        let table = sample_table();
        let outcome = table.lookup(&open_gen(&table, 150));

        let LookupOutcome::Matches(rows) = outcome else {
            panic!("expected matches");
        };
        let colleges: Vec<_> = rows.iter().map(|r| r.college.as_str()).collect();
        assert_eq!(colleges, vec!["CollegeB", "CollegeA"]);
    }

    #[test]
    fn rank_beyond_every_group_is_no_matches() {
        let table = sample_table();
        assert_eq!(table.lookup(&open_gen(&table, 600)), LookupOutcome::NoMatches);
    }

    #[test]
    fn max_rank_bound_is_inclusive() {
        let table = sample_table();
        let LookupOutcome::Matches(rows) = table.lookup(&open_gen(&table, 200)) else {
            panic!("expected matches");
        };
        assert_eq!(rows.len(), 2);
        let LookupOutcome::Matches(rows) = table.lookup(&open_gen(&table, 201)) else {
            panic!("expected matches");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].college, "CollegeA");
    }

    #[test]
    fn selector_values_compare_case_sensitively() {
        let mut lower = group("CollegeC", 1, 10, 900, 10.0, "1");
        lower.candidate_category = "open".to_string();
        let table = InferenceTable::from_groups(vec![group("CollegeA", 5, 100, 500, 300.0, "1"), lower]);

        let LookupOutcome::Matches(rows) = table.lookup(&open_gen(&table, 150)) else {
            panic!("expected matches");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].college, "CollegeA");
    }

    #[test]
    fn ordinal_prefix_is_stripped_only_for_display() {
        let table = InferenceTable::from_groups(vec![group("12. ABC College", 2, 10, 90, 40.0, "1")]);
        let LookupOutcome::Matches(rows) = table.lookup(&open_gen(&table, 20)) else {
            panic!("expected matches");
        };
        assert_eq!(rows[0].college, "ABC College");
        assert_eq!(table.groups()[0].college, "12. ABC College");
    }

    #[test]
    fn display_college_leaves_other_names_alone() {
        assert_eq!(display_college("3.GANDHI MEDICAL"), "GANDHI MEDICAL");
        assert_eq!(display_college("ABC 12. College"), "ABC 12. College");
        assert_eq!(display_college("2023 College"), "2023 College");
    }

    #[test]
    fn options_are_sorted_distinct_values() {
        let mut sc = group("X", 1, 1, 1, 1.0, "1");
        sc.candidate_category = "SC".to_string();
        sc.gender = "FEMALE".to_string();
        let table = InferenceTable::from_groups(vec![sc, sample_table().groups()[0].clone()]);

        assert_eq!(table.categories(), ["OPEN".to_string(), "SC".to_string()]);
        assert_eq!(table.genders(), ["FEMALE".to_string(), "GEN".to_string()]);
        assert_eq!(table.entry_channels(), ["GEN".to_string()]);
    }

    #[test]
    fn default_selection_falls_back_to_first_option() {
        let mut bc = group("X", 1, 1, 1, 1.0, "1");
        bc.candidate_category = "BC-A".to_string();
        let table = InferenceTable::from_groups(vec![bc]);
        let selection = table.default_selection().unwrap();
        assert_eq!(selection.category, "BC-A");
        assert_eq!(selection.gender, "GEN");
        assert!(InferenceTable::from_groups(Vec::new()).default_selection().is_none());
    }

    #[test]
    fn query_rejects_zero_rank_and_unknown_options() {
        let table = sample_table();
        assert!(table.query(0, table.default_selection().unwrap()).is_err());

        let mut selection = table.default_selection().unwrap();
        selection.gender = "gen".to_string();
        assert!(table.query(10, selection).is_err());
    }

    #[test]
    fn loads_table_written_by_aggregator() {
        let csv = "College,Candidate Category,Gender,Entry Channel,Count,Min_Rank,Max_Rank,Percentile_40th,Probable_Round\n\
\"1. ABC, Hyderabad\",OPEN,GEN,GEN,4,120,880,412.8,2\n";
        let table = InferenceTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.groups()[0].college, "1. ABC, Hyderabad");
        assert_eq!(table.groups()[0].percentile_40th, 412.8);
    }

    #[test]
    fn displayed_percentile_matches_the_stored_value() {
        let table = InferenceTable::from_groups(vec![
            group("CollegeA", 4, 120, 880, 412.75, "2"),
            group("CollegeB", 2, 100, 900, 500.0, "1"),
        ]);
        let LookupOutcome::Matches(rows) = table.lookup(&open_gen(&table, 100)) else {
            panic!("expected matches");
        };
        let rendered = render_table(&rows);
        assert!(rendered.contains("| 412.75 "), "{}", rendered);
        assert!(!rendered.contains("412.8"));
        assert!(rendered.contains("| 500.0 "), "{}", rendered);
    }

    #[test]
    fn rendered_table_has_display_headers() {
        let table = sample_table();
        let LookupOutcome::Matches(rows) = table.lookup(&open_gen(&table, 150)) else {
            panic!("expected matches");
        };
        let rendered = render_table(&rows);
        let mut lines = rendered.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("College "));
        assert!(header.contains("no of Students allotted"));
        assert!(header.ends_with("Round"));
        assert!(lines.next().unwrap().starts_with("---"));
        assert!(lines.next().unwrap().starts_with("CollegeB"));
    }
}
