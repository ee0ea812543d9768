use serde::{Deserialize, Serialize};

/// Column headers of the raw allotment CSV, in the order records are written.
pub const RAW_COLUMNS: [&str; 15] = [
    "College",
    "Rank",
    "Roll No",
    "Student Name",
    "Category",
    "Sex",
    "Minority",
    "PH",
    "NCC",
    "CAP",
    "PMC",
    "ANG",
    "SCL",
    "EWS",
    "Admission Details",
];

/// Number of positional slots that follow College, Rank, Roll No and Name.
pub const REST_SLOTS: usize = RAW_COLUMNS.len() - 4;

/// Entry channel used when the source row leaves it blank.
pub const DEFAULT_ENTRY_CHANNEL: &str = "GEN";

/// Probable round reported for a group without any round values.
pub const UNKNOWN_ROUND: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub paths: PathsConfig,
    pub query_log: QueryLogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Text dump of the allotment report.
    pub report: String,
    pub raw_csv: String,
    pub skipped: String,
    /// Allotment CSV fed to the aggregator (usually a cleaned copy of `raw_csv`).
    pub aggregate_input: String,
    pub inference_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLogConfig {
    pub mode: QueryLogMode,
    pub endpoint: Option<String>,
    pub spreadsheet: String,
    pub worksheet: String,
    pub file_path: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryLogMode {
    #[serde(rename = "sheet")]
    Sheet,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "disabled")]
    Disabled,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            paths: PathsConfig::default(),
            query_log: QueryLogConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            report: "data.txt".to_string(),
            raw_csv: "telangana_mopup_allocations.csv".to_string(),
            skipped: "skipped_rows.txt".to_string(),
            aggregate_input: "cleaned_data.csv".to_string(),
            inference_table: "inference_aggregated.csv".to_string(),
        }
    }
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            mode: QueryLogMode::File,
            endpoint: None,
            spreadsheet: "Neet_Predictor_log_Streamlit".to_string(),
            worksheet: "Sheet2".to_string(),
            file_path: "query_log.csv".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

/// One student-seat assignment read from the allotment report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAllotmentRecord {
    pub college: String,
    pub rank: u32,
    pub roll_no: String,
    pub student_name: String,
    pub slots: RestSlots,
}

/// The positional columns after the student name. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestSlots {
    pub category: Option<String>,
    pub sex: Option<String>,
    pub minority: Option<String>,
    pub ph: Option<String>,
    pub ncc: Option<String>,
    pub cap: Option<String>,
    pub pmc: Option<String>,
    pub ang: Option<String>,
    pub scl: Option<String>,
    pub ews: Option<String>,
    pub admission_details: Option<String>,
}

impl RestSlots {
    /// Fills the slots in column order from exactly `REST_SLOTS` values.
    pub fn from_fitted(values: [Option<String>; REST_SLOTS]) -> Self {
        let [category, sex, minority, ph, ncc, cap, pmc, ang, scl, ews, admission_details] = values;
        Self {
            category,
            sex,
            minority,
            ph,
            ncc,
            cap,
            pmc,
            ang,
            scl,
            ews,
            admission_details,
        }
    }

    pub fn as_array(&self) -> [Option<&str>; REST_SLOTS] {
        [
            self.category.as_deref(),
            self.sex.as_deref(),
            self.minority.as_deref(),
            self.ph.as_deref(),
            self.ncc.as_deref(),
            self.cap.as_deref(),
            self.pmc.as_deref(),
            self.ang.as_deref(),
            self.scl.as_deref(),
            self.ews.as_deref(),
            self.admission_details.as_deref(),
        ]
    }
}

impl RawAllotmentRecord {
    /// CSV row in `RAW_COLUMNS` order; missing slots become empty fields.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.college.clone(),
            self.rank.to_string(),
            self.roll_no.clone(),
            self.student_name.clone(),
        ];
        row.extend(
            self.slots
                .as_array()
                .iter()
                .map(|slot| slot.unwrap_or_default().to_string()),
        );
        row
    }
}

/// An allotment row as the aggregator sees it, after column renaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllotmentRow {
    pub college: String,
    pub candidate_category: String,
    pub gender: String,
    pub entry_channel: String,
    pub rank: u32,
    pub allocation_round: Option<String>,
}

/// Summary statistics for one (college, category, gender, entry channel) set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedGroup {
    #[serde(rename = "College")]
    pub college: String,
    #[serde(rename = "Candidate Category")]
    pub candidate_category: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "Entry Channel")]
    pub entry_channel: String,
    #[serde(rename = "Count")]
    pub count: usize,
    #[serde(rename = "Min_Rank")]
    pub min_rank: u32,
    #[serde(rename = "Max_Rank")]
    pub max_rank: u32,
    #[serde(rename = "Percentile_40th")]
    pub percentile_40th: f64,
    #[serde(rename = "Probable_Round")]
    pub probable_round: String,
}
