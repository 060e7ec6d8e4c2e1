//! Live adapter: the interactive search API for current and upcoming terms.

use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::{filter_divisional, Course, CourseLevel, Instructor, MeetingPattern, Weekdays};
use catalog_storage::HttpFetcher;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::normalize::{is_yes, string_list, OneOrMany};
use crate::{iso_date, reverse_semester_order, stable_id, to_24hr, AdapterError, Sanitizer, SourceAdapter};

pub const DEFAULT_LIVE_ENDPOINT: &str = "https://courses.my.harvard.edu/psc/courses/EMPLOYEE/EMPL/s/WEBLIB_IS_SCL.ISCRIPT1.FieldFormula.IScript_Search";

/// The upstream clamps anything larger, so this is the only size we ask for.
pub const LIVE_PAGE_SIZE: u32 = 25;

/// Academic year -> (fall term code, spring term code).
const TERM_TABLE: &[(u32, &str, &str)] = &[
    (2023, "2228", "2232"),
    (2024, "2238", "2242"),
    (2025, "2248", "2252"),
    (2026, "2258", "2262"),
    (2027, "2268", "2272"),
];

pub const SUPPORTED_LIVE_YEARS: [u32; 5] = [2023, 2024, 2025, 2026, 2027];

// Stable ordering; the default relevance sort repeats and skips rows across pages.
const SORT_KEY: &str = "IS_SCL_SUBJ_CAT";
const SCHOOL_FACET: &str = "IS_SCL_DESCR_IS_SCL_DESCRI:Faculty of Arts & Sciences:School";
const CATEGORY: &str = "HU_SCL_SCHEDULED_BRACKETED_COURSES";
const FORM_FIELD: &str = "SearchReqJSON";

pub fn term_codes(year: u32) -> Option<(&'static str, &'static str)> {
    TERM_TABLE
        .iter()
        .find(|(y, _, _)| *y == year)
        .map(|(_, fall, spring)| (*fall, *spring))
}

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub endpoint: String,
    pub year: u32,
}

pub struct LiveAdapter {
    http: Arc<HttpFetcher>,
    sanitizer: Arc<Sanitizer>,
    endpoint: String,
    year: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SearchRequest {
    exclude_bracketed: bool,
    exclude300: bool,
    page_number: u32,
    page_size: String,
    sort_order: [&'static str; 1],
    facets: [&'static str; 1],
    category: &'static str,
    search_properties_in_results: bool,
    facets_in_results: bool,
    save_recent: bool,
    top_n: &'static str,
    deep_link: bool,
    search_text: String,
}

/// Builds the JSON search document for one page of one academic year.
pub fn search_request(year: u32, page: u32, page_size: u32) -> Result<String, AdapterError> {
    let (fall, spring) = term_codes(year).ok_or_else(|| {
        AdapterError::Configuration(format!(
            "live catalog has no term codes for academic year {year} (supported: {SUPPORTED_LIVE_YEARS:?})"
        ))
    })?;
    let request = SearchRequest {
        exclude_bracketed: true,
        exclude300: true,
        page_number: page,
        page_size: page_size.to_string(),
        sort_order: [SORT_KEY],
        facets: [SCHOOL_FACET],
        category: CATEGORY,
        search_properties_in_results: true,
        facets_in_results: false,
        save_recent: false,
        top_n: "",
        deep_link: false,
        search_text: format!("(STRM:\"{fall}\" | STRM:\"{spring}\")"),
    };
    serde_json::to_string(&request)
        .map_err(|e| AdapterError::Configuration(format!("serializing search request: {e}")))
}

#[derive(Debug, Deserialize)]
struct SearchProperties {
    #[serde(rename = "PageSize")]
    page_size: u32,
    #[serde(rename = "HitCount", default)]
    hit_count: i64,
}

#[derive(Debug, Deserialize)]
struct ResultsBlock {
    #[serde(rename = "ResultsCollection", default)]
    results: Vec<LiveRow>,
}

#[derive(Debug)]
struct SearchPage {
    hit_count: i64,
    rows: Vec<LiveRow>,
}

#[derive(Debug, Deserialize)]
struct LiveRow {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "CRSE_ID")]
    course_id: Option<String>,
    #[serde(rename = "SUBJECT")]
    subject: Option<String>,
    #[serde(rename = "IS_SCL_DESCR_IS_SCL_DESCRD")]
    subject_description: Option<String>,
    #[serde(rename = "CATALOG_NBR")]
    catalog_number: Option<String>,
    #[serde(rename = "CRSE_ATTR_VALUE_HU_LEVL_ATTR")]
    level: Option<String>,
    #[serde(rename = "ACAD_CAREER")]
    academic_group: Option<String>,
    /// "2022 Fall"
    #[serde(rename = "IS_SCL_DESCR_IS_SCL_DESCRH")]
    term: Option<String>,
    #[serde(rename = "ACAD_YEAR")]
    academic_year: Option<String>,
    #[serde(rename = "CLASS_SECTION")]
    class_section: Option<String>,
    #[serde(rename = "SSR_COMPONENTDESCR")]
    component: Option<String>,
    #[serde(rename = "IS_SCL_DESCR")]
    description: Option<String>,
    #[serde(rename = "IS_SCL_DESCR_IS_SCL_DESCRL")]
    instructors: Option<OneOrMany>,
    #[serde(rename = "CRSE_ATTR_VALUE_HU_GE_ATTR")]
    gen_ed: Option<OneOrMany>,
    #[serde(rename = "CRSE_ATTR_VALUE_HU_LDD_ATTR")]
    divisional: Option<OneOrMany>,
    #[serde(rename = "MultiSection")]
    multi_section: Option<Vec<LiveSection>>,

    // Single-section schedule; no Sunday field in this shape.
    #[serde(rename = "MON")]
    mon: Option<OneOrMany>,
    #[serde(rename = "TUES")]
    tues: Option<OneOrMany>,
    #[serde(rename = "WED")]
    wed: Option<OneOrMany>,
    #[serde(rename = "THURS")]
    thurs: Option<OneOrMany>,
    #[serde(rename = "FRI")]
    fri: Option<OneOrMany>,
    #[serde(rename = "SAT")]
    sat: Option<OneOrMany>,
    #[serde(rename = "IS_SCL_TIME_START")]
    time_start: Option<OneOrMany>,
    #[serde(rename = "IS_SCL_TIME_END")]
    time_end: Option<OneOrMany>,
    #[serde(rename = "START_DT")]
    start_date: Option<OneOrMany>,
    #[serde(rename = "END_DT")]
    end_date: Option<OneOrMany>,
}

#[derive(Debug, Default, Deserialize)]
struct LiveSection {
    #[serde(rename = "Mo")]
    mo: Option<String>,
    #[serde(rename = "Tu")]
    tu: Option<String>,
    #[serde(rename = "We")]
    we: Option<String>,
    #[serde(rename = "Th")]
    th: Option<String>,
    #[serde(rename = "Fr")]
    fr: Option<String>,
    #[serde(rename = "Sa")]
    sa: Option<String>,
    #[serde(rename = "Su")]
    su: Option<String>,
    #[serde(rename = "IS_SCL_TIME_START")]
    time_start: Option<String>,
    #[serde(rename = "IS_SCL_TIME_END")]
    time_end: Option<String>,
    #[serde(rename = "START_DT")]
    start_date: Option<String>,
    #[serde(rename = "END_DT")]
    end_date: Option<String>,
}

fn expect_key(element: &JsonValue, expected: &str) -> Result<(), AdapterError> {
    match element.get("Key").and_then(JsonValue::as_str) {
        Some(key) if key == expected => Ok(()),
        Some(key) => Err(AdapterError::Protocol(format!(
            "expected key {expected:?}, got {key:?}"
        ))),
        None => Err(AdapterError::Protocol(format!(
            "expected key {expected:?}, but the element has no Key"
        ))),
    }
}

/// Validates the `[Results, Facets, SearchProperties]` envelope.
fn parse_search_response(
    elements: Vec<JsonValue>,
    requested_page_size: u32,
) -> Result<SearchPage, AdapterError> {
    let [results, _facets, properties]: [JsonValue; 3] =
        elements.try_into().map_err(|elements: Vec<JsonValue>| {
            AdapterError::Protocol(format!(
                "expected 3 elements in search response, got {}",
                elements.len()
            ))
        })?;

    expect_key(&properties, "SearchProperties")?;
    expect_key(&results, "Results")?;

    let properties: SearchProperties = serde_json::from_value(properties)
        .map_err(|e| AdapterError::decoding("search properties", e))?;
    if properties.page_size != requested_page_size {
        return Err(AdapterError::Protocol(format!(
            "requested page size {requested_page_size}, but received page size {}",
            properties.page_size
        )));
    }

    let results: ResultsBlock =
        serde_json::from_value(results).map_err(|e| AdapterError::decoding("search results", e))?;
    Ok(SearchPage {
        hit_count: properties.hit_count,
        rows: results.results,
    })
}

fn opt_at(field: &Option<OneOrMany>, index: usize) -> Option<&str> {
    field.as_ref().and_then(|f| f.at(index))
}

fn build_pattern(
    weekdays: Weekdays,
    (time_start, time_end): (Option<&str>, Option<&str>),
    (start_date, end_date): (Option<&str>, Option<&str>),
) -> Result<Option<MeetingPattern>, AdapterError> {
    // Flags decide first so malformed times on unscheduled rows never matter.
    if !weekdays.any() {
        return Ok(None);
    }
    Ok(MeetingPattern::new(
        (
            to_24hr(time_start.unwrap_or_default())?,
            to_24hr(time_end.unwrap_or_default())?,
        ),
        (
            iso_date(start_date.unwrap_or_default())?,
            iso_date(end_date.unwrap_or_default())?,
        ),
        weekdays,
    ))
}

fn single_section_patterns(row: &LiveRow) -> Result<Vec<MeetingPattern>, AdapterError> {
    let fields = [
        &row.mon,
        &row.tues,
        &row.wed,
        &row.thurs,
        &row.fri,
        &row.sat,
        &row.time_start,
        &row.time_end,
        &row.start_date,
        &row.end_date,
    ];
    let width = fields
        .iter()
        .filter_map(|f| f.as_ref().map(OneOrMany::width))
        .max()
        .unwrap_or(0);

    let mut patterns = Vec::new();
    for i in 0..width {
        let weekdays = Weekdays {
            monday: is_yes(opt_at(&row.mon, i)),
            tuesday: is_yes(opt_at(&row.tues, i)),
            wednesday: is_yes(opt_at(&row.wed, i)),
            thursday: is_yes(opt_at(&row.thurs, i)),
            friday: is_yes(opt_at(&row.fri, i)),
            saturday: is_yes(opt_at(&row.sat, i)),
            sunday: false,
        };
        if let Some(pattern) = build_pattern(
            weekdays,
            (opt_at(&row.time_start, i), opt_at(&row.time_end, i)),
            (opt_at(&row.start_date, i), opt_at(&row.end_date, i)),
        )? {
            patterns.push(pattern);
        }
    }
    Ok(patterns)
}

fn section_pattern(section: &LiveSection) -> Result<Option<MeetingPattern>, AdapterError> {
    let weekdays = Weekdays {
        monday: is_yes(section.mo.as_deref()),
        tuesday: is_yes(section.tu.as_deref()),
        wednesday: is_yes(section.we.as_deref()),
        thursday: is_yes(section.th.as_deref()),
        friday: is_yes(section.fr.as_deref()),
        saturday: is_yes(section.sa.as_deref()),
        sunday: is_yes(section.su.as_deref()),
    };
    build_pattern(
        weekdays,
        (section.time_start.as_deref(), section.time_end.as_deref()),
        (section.start_date.as_deref(), section.end_date.as_deref()),
    )
}

fn meeting_patterns(row: &LiveRow) -> Result<Vec<MeetingPattern>, AdapterError> {
    match &row.multi_section {
        Some(sections) => {
            let mut patterns = Vec::new();
            for section in sections {
                if let Some(pattern) = section_pattern(section)? {
                    patterns.push(pattern);
                }
            }
            Ok(patterns)
        }
        None => single_section_patterns(row),
    }
}

fn parse_number(field: &str, value: Option<&str>) -> Result<u32, AdapterError> {
    match value.map(str::trim) {
        None | Some("") => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|e| AdapterError::decoding(field, format!("{v:?}: {e}"))),
    }
}

impl LiveAdapter {
    /// Fails with a configuration error when `year` has no known term codes.
    pub fn new(
        http: Arc<HttpFetcher>,
        sanitizer: Arc<Sanitizer>,
        options: LiveOptions,
    ) -> Result<Self, AdapterError> {
        search_request(options.year, 1, LIVE_PAGE_SIZE)?;
        Ok(Self {
            http,
            sanitizer,
            endpoint: options.endpoint,
            year: options.year,
        })
    }

    pub fn year(&self) -> u32 {
        self.year
    }

    async fn search(&self, page: u32) -> Result<SearchPage, AdapterError> {
        let payload = search_request(self.year, page, LIVE_PAGE_SIZE)?;
        let resp = self
            .http
            .post_form(&self.endpoint, &[(FORM_FIELD, payload.as_str())])
            .await?;
        let elements: Vec<JsonValue> = resp
            .json()
            .map_err(|e| AdapterError::decoding(format!("live page {page}"), e))?;
        parse_search_response(elements, LIVE_PAGE_SIZE)
    }

    fn normalize(&self, row: LiveRow) -> Result<Course, AdapterError> {
        let meeting_patterns = meeting_patterns(&row)?;
        let semester = match row.term.as_deref().map(str::trim) {
            None | Some("") => String::new(),
            Some(term) => reverse_semester_order(term)?,
        };

        Ok(Course {
            id: stable_id(&row.key),
            external_id: parse_number("CRSE_ID", row.course_id.as_deref())?,
            // Not exposed by the live API.
            q_guide_id: 0,
            title: self
                .sanitizer
                .strip_tags(row.title.as_deref().unwrap_or_default()),
            subject: row.subject.unwrap_or_default(),
            subject_description: row.subject_description.unwrap_or_default(),
            catalog_number: row.catalog_number.unwrap_or_default().trim().to_string(),
            level: CourseLevel::from_code(row.level.as_deref().unwrap_or_default()),
            academic_group: row.academic_group.unwrap_or_default(),
            semester,
            academic_year: parse_number("ACAD_YEAR", row.academic_year.as_deref())?,
            class_section: row.class_section.unwrap_or_default(),
            component: row.component.unwrap_or_default(),
            description: self
                .sanitizer
                .sanitize_rich(row.description.as_deref().unwrap_or_default()),
            instructors: string_list(row.instructors)
                .into_iter()
                .map(Instructor::named)
                .collect(),
            meeting_patterns,
            gen_ed_area: string_list(row.gen_ed),
            divisional_dist: filter_divisional(string_list(row.divisional)),
        })
    }
}

fn with_row_context(err: AdapterError, key: &str) -> AdapterError {
    match err {
        AdapterError::Decoding { context, message } => AdapterError::Decoding {
            context: format!("live row {key:?}: {context}"),
            message,
        },
        other => other,
    }
}

#[async_trait]
impl SourceAdapter for LiveAdapter {
    fn source_id(&self) -> &'static str {
        "live"
    }

    fn page_size(&self) -> u32 {
        LIVE_PAGE_SIZE
    }

    async fn total_count(&self) -> Result<i64, AdapterError> {
        Ok(self.search(1).await?.hit_count)
    }

    async fn fetch(&self, page: u32) -> Result<Vec<Course>, AdapterError> {
        let rows = self.search(page).await?.rows;
        let mut courses = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.key.clone();
            courses.push(self.normalize(row).map_err(|e| with_row_context(e, &key))?);
        }
        debug!(page, year = self.year, rows = courses.len(), "live page normalized");
        Ok(courses)
    }
}
