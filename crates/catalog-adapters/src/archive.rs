//! Archive adapter: GraphQL catalog covering historical academic years.

use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::{filter_divisional, Course, CourseLevel, Instructor, MeetingPattern, Weekdays};
use catalog_storage::HttpFetcher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AdapterError, Sanitizer, SourceAdapter};

pub const DEFAULT_ARCHIVE_ENDPOINT: &str = "https://curricle.berkman.harvard.edu/graphql";

const ARCHIVE_QUERY: &str = include_str!("../queries/archive_courses.graphql");
const OPERATION_NAME: &str = "getCourses";

const GEN_ED_ATTRIBUTE: &str = "LGE";
const DIVISIONAL_ATTRIBUTE: &str = "LDD";

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub endpoint: String,
    /// First calendar year of the academic window; the window ends a year later.
    pub year: u32,
    pub per_page: u32,
}

pub struct ArchiveAdapter {
    http: Arc<HttpFetcher>,
    sanitizer: Arc<Sanitizer>,
    options: ArchiveOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GqlRequest<'a> {
    operation_name: &'a str,
    query: &'a str,
    variables: GqlVariables,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GqlVariables {
    per_page: u32,
    page: u32,
    year_start: u32,
    year_end: u32,
}

#[derive(Debug, Deserialize)]
struct GqlResponse {
    data: Option<GqlData>,
    #[serde(default)]
    errors: Vec<GqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GqlErrorMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlData {
    courses_connection: CoursesConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoursesConnection {
    #[serde(default)]
    total_count: i64,
    #[serde(default)]
    nodes: Vec<ArchiveNode>,
}

/// One upstream row. Every field is optional; absent values default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveNode {
    id: Option<String>,
    external_course_id: Option<u32>,
    q_guide_course_id: Option<u32>,
    title: Option<String>,
    subject: Option<String>,
    subject_description: Option<String>,
    catalog_number: Option<String>,
    course_level: Option<String>,
    academic_group: Option<String>,
    semester: Option<String>,
    academic_year: Option<u32>,
    class_section: Option<String>,
    component: Option<String>,
    course_description_long: Option<String>,
    course_instructors: Option<Vec<ArchiveInstructor>>,
    course_meeting_patterns: Option<Vec<ArchiveMeetingPattern>>,
    course_attributes: Option<Vec<ArchiveAttribute>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveInstructor {
    display_name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveMeetingPattern {
    meeting_time_start_tod: Option<String>,
    meeting_time_end_tod: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    meets_on_monday: Option<bool>,
    meets_on_tuesday: Option<bool>,
    meets_on_wednesday: Option<bool>,
    meets_on_thursday: Option<bool>,
    meets_on_friday: Option<bool>,
    meets_on_saturday: Option<bool>,
    meets_on_sunday: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveAttribute {
    crse_attribute: Option<String>,
    crse_attr_value: Option<String>,
}

impl ArchiveAdapter {
    pub fn new(http: Arc<HttpFetcher>, sanitizer: Arc<Sanitizer>, options: ArchiveOptions) -> Self {
        Self {
            http,
            sanitizer,
            options,
        }
    }

    fn request_body(&self, page: u32) -> GqlRequest<'static> {
        GqlRequest {
            operation_name: OPERATION_NAME,
            query: ARCHIVE_QUERY,
            variables: GqlVariables {
                per_page: self.options.per_page,
                page,
                year_start: self.options.year,
                year_end: self.options.year + 1,
            },
        }
    }

    async fn request(&self, page: u32) -> Result<CoursesConnection, AdapterError> {
        let resp = self
            .http
            .post_json(&self.options.endpoint, &self.request_body(page))
            .await?;
        let decoded: GqlResponse = resp
            .json()
            .map_err(|e| AdapterError::decoding(format!("archive page {page}"), e))?;

        match decoded.data {
            Some(data) => Ok(data.courses_connection),
            None => {
                let messages = decoded
                    .errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(AdapterError::Protocol(format!(
                    "archive page {page} returned no data: {messages}"
                )))
            }
        }
    }

    fn normalize(&self, node: ArchiveNode) -> Result<Course, AdapterError> {
        let id = node
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AdapterError::decoding("archive row", "missing id"))?;

        let instructors = node
            .course_instructors
            .unwrap_or_default()
            .into_iter()
            .map(|i| Instructor {
                name: i.display_name.unwrap_or_default(),
                email: i.email.unwrap_or_default(),
            })
            .collect();

        let meeting_patterns = node
            .course_meeting_patterns
            .unwrap_or_default()
            .into_iter()
            .filter_map(meeting_pattern)
            .collect();

        let attributes = node.course_attributes.unwrap_or_default();
        let gen_ed_area = attribute_values(&attributes, GEN_ED_ATTRIBUTE);
        let divisional_dist = filter_divisional(attribute_values(&attributes, DIVISIONAL_ATTRIBUTE));

        Ok(Course {
            id,
            external_id: node.external_course_id.unwrap_or_default(),
            q_guide_id: node.q_guide_course_id.unwrap_or_default(),
            title: node.title.unwrap_or_default(),
            subject: node.subject.unwrap_or_default(),
            subject_description: node.subject_description.unwrap_or_default(),
            catalog_number: node.catalog_number.unwrap_or_default(),
            level: CourseLevel::from_code(node.course_level.as_deref().unwrap_or_default()),
            academic_group: node.academic_group.unwrap_or_default(),
            semester: node.semester.unwrap_or_default(),
            academic_year: node.academic_year.unwrap_or_default(),
            class_section: node.class_section.unwrap_or_default(),
            component: node.component.unwrap_or_default(),
            description: self
                .sanitizer
                .sanitize_rich(node.course_description_long.as_deref().unwrap_or_default()),
            instructors,
            meeting_patterns,
            gen_ed_area,
            divisional_dist,
        })
    }
}

// Archive times are already 24-hour and dates already ISO.
fn meeting_pattern(raw: ArchiveMeetingPattern) -> Option<MeetingPattern> {
    MeetingPattern::new(
        (
            raw.meeting_time_start_tod.unwrap_or_default(),
            raw.meeting_time_end_tod.unwrap_or_default(),
        ),
        (
            raw.start_date.unwrap_or_default(),
            raw.end_date.unwrap_or_default(),
        ),
        Weekdays {
            monday: raw.meets_on_monday.unwrap_or(false),
            tuesday: raw.meets_on_tuesday.unwrap_or(false),
            wednesday: raw.meets_on_wednesday.unwrap_or(false),
            thursday: raw.meets_on_thursday.unwrap_or(false),
            friday: raw.meets_on_friday.unwrap_or(false),
            saturday: raw.meets_on_saturday.unwrap_or(false),
            sunday: raw.meets_on_sunday.unwrap_or(false),
        },
    )
}

fn attribute_values(attributes: &[ArchiveAttribute], kind: &str) -> Vec<String> {
    attributes
        .iter()
        .filter(|a| a.crse_attribute.as_deref() == Some(kind))
        .filter_map(|a| a.crse_attr_value.clone())
        .collect()
}

#[async_trait]
impl SourceAdapter for ArchiveAdapter {
    fn source_id(&self) -> &'static str {
        "archive"
    }

    fn page_size(&self) -> u32 {
        self.options.per_page
    }

    async fn total_count(&self) -> Result<i64, AdapterError> {
        Ok(self.request(1).await?.total_count)
    }

    async fn fetch(&self, page: u32) -> Result<Vec<Course>, AdapterError> {
        let connection = self.request(page).await?;
        let courses = connection
            .nodes
            .into_iter()
            .map(|node| self.normalize(node))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(page, rows = courses.len(), "archive page normalized");
        Ok(courses)
    }
}
