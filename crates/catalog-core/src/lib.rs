//! Canonical course record shared by every catalog source.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "catalog-core";

/// Divisional distribution codes that survive normalization.
pub const DIVISIONAL_AREAS: [&str; 3] = ["A&H", "SCI", "SOC"];

/// One normalized row of catalog data, built once by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    /// Unique within one merged dataset.
    pub id: String,
    /// Non-unique upstream course id, 0 when unknown.
    pub external_id: u32,
    /// Legacy Q guide id, 0 when unknown.
    pub q_guide_id: u32,
    pub title: String,
    pub subject: String,
    pub subject_description: String,
    pub catalog_number: String,
    pub level: CourseLevel,
    pub academic_group: String,
    /// Human form, e.g. "Spring 2021".
    pub semester: String,
    pub academic_year: u32,
    pub class_section: String,
    pub component: String,
    /// Sanitized HTML subset.
    pub description: String,
    pub instructors: Vec<Instructor>,
    pub meeting_patterns: Vec<MeetingPattern>,
    /// Empty when the course is not general education.
    #[serde(default)]
    pub gen_ed_area: Vec<String>,
    #[serde(default)]
    pub divisional_dist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructor {
    pub name: String,
    /// Empty when unknown.
    #[serde(default)]
    pub email: String,
}

impl Instructor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CourseLevel {
    Intro,
    Undergrad,
    Graduate,
    Research,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl CourseLevel {
    /// Maps an upstream level code. Total: unknown codes become `N/A`.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "PRIMUGRD" | "INTRO" => Self::Intro,
            "UGRDGRAD" => Self::Undergrad,
            "PRIMGRAD" => Self::Graduate,
            "GRADCOURSE" => Self::Research,
            _ => Self::NotApplicable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intro => "Intro",
            Self::Undergrad => "Undergrad",
            Self::Graduate => "Graduate",
            Self::Research => "Research",
            Self::NotApplicable => "N/A",
        }
    }
}

/// Weekday flags of a meeting pattern, flattened into its JSON form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Weekdays {
    #[serde(rename = "meetsOnMonday")]
    pub monday: bool,
    #[serde(rename = "meetsOnTuesday")]
    pub tuesday: bool,
    #[serde(rename = "meetsOnWednesday")]
    pub wednesday: bool,
    #[serde(rename = "meetsOnThursday")]
    pub thursday: bool,
    #[serde(rename = "meetsOnFriday")]
    pub friday: bool,
    #[serde(rename = "meetsOnSaturday")]
    pub saturday: bool,
    #[serde(rename = "meetsOnSunday")]
    pub sunday: bool,
}

impl Weekdays {
    pub fn any(&self) -> bool {
        self.monday
            || self.tuesday
            || self.wednesday
            || self.thursday
            || self.friday
            || self.saturday
            || self.sunday
    }
}

/// A regular meeting schedule. Times are "HH:MM" (24-hour) or empty, dates
/// are "YYYY-MM-DD".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingPattern {
    pub start_time: String,
    pub end_time: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(flatten)]
    pub weekdays: Weekdays,
}

impl MeetingPattern {
    /// Returns `None` when no weekday flag is set; such patterns are never kept.
    pub fn new(
        (start_time, end_time): (String, String),
        (start_date, end_date): (String, String),
        weekdays: Weekdays,
    ) -> Option<Self> {
        if !weekdays.any() {
            return None;
        }
        Some(Self {
            start_time,
            end_time,
            start_date,
            end_date,
            weekdays,
        })
    }
}

pub fn is_divisional_area(value: &str) -> bool {
    DIVISIONAL_AREAS.contains(&value)
}

/// Keeps only allowed divisional codes, preserving input order.
pub fn filter_divisional<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter(|v| is_divisional_area(v.as_ref()))
        .map(|v| v.as_ref().to_string())
        .collect()
}
