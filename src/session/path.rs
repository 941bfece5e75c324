//! Deterministic destination paths
//!
//! `{base}/{Amazon-<marketplace>}/Session_NNN_<start>_to_<end>_<label>/<YYYY-MM_Month>`

use super::naming::sanitize_segment;
use chrono::{Datelike, NaiveDate};

pub const DEFAULT_BASE_FOLDER: &str = "Amazon_Invoices";

/// Placeholder month directory for items without a usable date
pub const UNKNOWN_MONTH: &str = "Unknown_Month";

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Session-level inputs shared by every item of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPath {
    pub base_folder: String,
    pub marketplace: String,
    pub start_date: String,
    pub end_date: String,
    pub range_label: String,
    pub session_number: u32,
}

impl SessionPath {
    pub fn new(
        marketplace: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
        range_label: impl Into<String>,
        session_number: u32,
    ) -> Self {
        Self {
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            marketplace: marketplace.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            range_label: range_label.into(),
            session_number,
        }
    }

    pub fn with_base_folder(mut self, base_folder: impl Into<String>) -> Self {
        self.base_folder = base_folder.into();
        self
    }

    pub fn marketplace_folder(&self) -> String {
        sanitize_segment(&format!("Amazon-{}", self.marketplace.trim()))
    }

    pub fn session_folder(&self) -> String {
        let mut name = format!(
            "Session_{:03}_{}_to_{}",
            self.session_number, self.start_date, self.end_date
        );
        let label = self.range_label.trim();
        if !label.is_empty() {
            name.push('_');
            name.push_str(label);
        }
        sanitize_segment(&name)
    }

    /// Folder segments below the base folder, in order
    pub fn segments(&self, item_date: Option<NaiveDate>) -> Vec<String> {
        vec![
            sanitize_segment(&self.base_folder),
            self.marketplace_folder(),
            self.session_folder(),
            month_folder(item_date),
        ]
    }

    pub fn folder_for(&self, item_date: Option<NaiveDate>) -> String {
        self.segments(item_date).join("/")
    }
}

/// `YYYY-MM_MonthName`, or the unknown-month placeholder
pub fn month_folder(item_date: Option<NaiveDate>) -> String {
    match item_date {
        Some(date) => format!(
            "{}-{:02}_{}",
            date.year(),
            date.month(),
            MONTH_NAMES[date.month0() as usize]
        ),
        None => UNKNOWN_MONTH.to_string(),
    }
}

/// Parse a `YYYY-MM-DD` date, tolerating surrounding whitespace
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Destination folder for one item under the default base folder
///
/// An absent or unparseable `item_date` lands in `Unknown_Month`.
pub fn build_path(
    marketplace: &str,
    start_date: &str,
    end_date: &str,
    range_label: &str,
    session_number: u32,
    item_date: Option<&str>,
) -> String {
    SessionPath::new(marketplace, start_date, end_date, range_label, session_number)
        .folder_for(item_date.and_then(parse_date))
}
