use std::sync::Arc;

use catalog_adapters::{AdapterError, ArchiveAdapter, ArchiveOptions, Sanitizer, SourceAdapter};
use catalog_core::CourseLevel;
use catalog_storage::{FetchError, HttpClientConfig, HttpFetcher};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(server: &MockServer) -> ArchiveAdapter {
    ArchiveAdapter::new(
        Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
        Arc::new(Sanitizer::new()),
        ArchiveOptions {
            endpoint: format!("{}/graphql", server.uri()),
            year: 2019,
            per_page: 2,
        },
    )
}

fn page(total: i64, nodes: serde_json::Value) -> serde_json::Value {
    json!({"data": {"coursesConnection": {"totalCount": total, "nodes": nodes}}})
}

#[tokio::test]
async fn total_count_and_pages_come_from_graphql() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({
            "operationName": "getCourses",
            "variables": {"page": 1, "perPage": 2, "yearStart": 2019, "yearEnd": 2020}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(3, json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"page": 2}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            3,
            json!([{
                "id": "151019",
                "externalCourseId": 118803,
                "title": "Ancient Greek Philosophy",
                "subject": "PHIL",
                "catalogNumber": "101",
                "courseLevel": "UGRDGRAD",
                "semester": "Fall 2019",
                "academicYear": 2020,
                "courseDescriptionLong": "<p>Plato &amp; <iframe src=x></iframe>Aristotle</p>",
                "courseMeetingPatterns": [{
                    "meetingTimeStartTod": "10:30",
                    "meetingTimeEndTod": "11:45",
                    "startDate": "2019-09-03",
                    "endDate": "2019-12-04",
                    "meetsOnMonday": true,
                    "meetsOnWednesday": true
                }]
            }]),
        )))
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    assert_eq!(adapter.page_size(), 2);
    assert_eq!(adapter.total_count().await.unwrap(), 3);

    let courses = adapter.fetch(2).await.unwrap();
    assert_eq!(courses.len(), 1);
    let course = &courses[0];
    assert_eq!(course.id, "151019");
    assert_eq!(course.level, CourseLevel::Undergrad);
    assert_eq!(course.description, "<p>Plato &amp; Aristotle</p>");
    assert_eq!(course.meeting_patterns.len(), 1);
    assert!(course.meeting_patterns[0].weekdays.wednesday);
}

#[tokio::test]
async fn non_success_status_is_an_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = adapter(&server).fetch(1).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Upstream(FetchError::HttpStatus { status: 502, .. })
    ));
}

#[tokio::test]
async fn graphql_errors_without_data_are_protocol_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "perPage must be at most 1000"}]
        })))
        .mount(&server)
        .await;

    let err = adapter(&server).total_count().await.unwrap_err();
    match err {
        AdapterError::Protocol(message) => assert!(message.contains("perPage must be at most 1000")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unparseable_body_is_a_decoding_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = adapter(&server).fetch(1).await.unwrap_err();
    assert!(matches!(err, AdapterError::Decoding { .. }));
}
