//! End-to-end runs of the pipeline against an in-memory database.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use violation_pipeline::config::{PollSettings, FAST_LANE_QUEUE, PERSISTENCE_QUEUE};
use violation_pipeline::db::{self, ViolationStore};
use violation_pipeline::detector::Detector;
use violation_pipeline::error::Result;
use violation_pipeline::metadata::MetadataStore;
use violation_pipeline::notifier::{Notifier, Publisher};
use violation_pipeline::ocr::TextDetector;
use violation_pipeline::orchestrator::Orchestrator;
use violation_pipeline::persister::Persister;
use violation_pipeline::queue::{MessageQueue, SqliteQueue};
use violation_pipeline::reader::PlateReader;
use violation_pipeline::reference::{JsonReferenceSource, ReferenceResolver, XmlReferenceSource};
use violation_pipeline::router::{Route, Router};
use violation_pipeline::types::{ImageMetadata, TextDetection, UNKNOWN};
use violation_pipeline::webhook;
use violation_pipeline::worker::{Poll, Worker};

const DMV_JSON: &str = r#"{"dmv": {"vehicle": [
    {"_plate": "8ABC123", "owner": {"name": "Jane Doe", "contact": "jane@example.com"},
     "color": "Red", "make": "Toyota", "model": "Camry"}]}}"#;

const DMV_XML: &str = r#"<dmv>
    <vehicle plate="5XYZ789">
        <owner><name>John Smith</name><contact>john@example.com</contact></owner>
        <color>Black</color><make>Honda</make><model>Civic</model>
    </vehicle>
</dmv>"#;

/// Stand-in OCR service answering with fixed text per image.
struct FixedText(Vec<(&'static str, Vec<TextDetection>)>);

#[async_trait]
impl TextDetector for FixedText {
    async fn detect_text(&self, image_ref: &str) -> Vec<TextDetection> {
        self.0
            .iter()
            .find(|(image, _)| *image == image_ref)
            .map(|(_, detections)| detections.clone())
            .unwrap_or_default()
    }
}

struct FixedMetadata;

#[async_trait]
impl MetadataStore for FixedMetadata {
    async fn lookup(&self, image_ref: &str) -> ImageMetadata {
        if image_ref.starts_with("missing/") {
            return ImageMetadata::default();
        }
        ImageMetadata {
            captured_at: format!("2025-02-01 10:00 ({})", image_ref),
            location: "Main St & 1st Ave".to_string(),
            violation_type: "Red Light".to_string(),
            fine_amount: "$100".to_string(),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingPublisher(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, _topic: &str, _subject: &str, message: &str) -> Result<()> {
        self.0.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

fn detection(text: &str, confidence: f64, width: f64, height: f64) -> TextDetection {
    serde_json::from_value(json!({
        "DetectedText": text,
        "Confidence": confidence,
        "Geometry": {"BoundingBox": {"Width": width, "Height": height, "Left": 0.0, "Top": 0.0}}
    }))
    .unwrap()
}

struct Pipeline {
    reader: Arc<PlateReader>,
    fast_lane: Arc<SqliteQueue>,
    orchestrator: Worker<Orchestrator>,
    persister: Worker<Persister>,
    store: ViolationStore,
    published: RecordingPublisher,
}

fn pipeline(ocr: FixedText) -> Pipeline {
    let conn = db::open_in_memory().unwrap();
    let visibility = Duration::from_secs(30);
    let fast_lane = Arc::new(SqliteQueue::new(conn.clone(), FAST_LANE_QUEUE, visibility));
    let persistence = Arc::new(SqliteQueue::new(conn.clone(), PERSISTENCE_QUEUE, visibility));
    let store = ViolationStore::new(conn);
    let resolver = Arc::new(ReferenceResolver::new(vec![
        Box::new(JsonReferenceSource::from_contents(DMV_JSON)),
        Box::new(XmlReferenceSource::from_contents(DMV_XML)),
    ]));
    let published = RecordingPublisher::default();
    let settings = PollSettings {
        wait: Duration::from_millis(0),
        backoff: Duration::from_millis(10),
    };

    let reader = Arc::new(PlateReader::new(
        Detector::new("CALIFORNIA"),
        Arc::new(ocr),
        Arc::new(FixedMetadata),
        Router::new("CALIFORNIA", fast_lane.clone(), store.clone()),
    ));
    let orchestrator = Worker::new(
        fast_lane.clone(),
        Orchestrator::new(resolver, persistence.clone()),
        settings,
    );
    let persister = Worker::new(
        persistence,
        Persister::new(
            store.clone(),
            Notifier::new(Box::new(published.clone()), "violations"),
        ),
        settings,
    );
    Pipeline {
        reader,
        fast_lane,
        orchestrator,
        persister,
        store,
        published,
    }
}

#[tokio::test]
async fn home_plate_is_enriched_stored_and_notified() {
    let p = pipeline(FixedText(vec![(
        "cam1/0001.jpg",
        vec![
            detection("CALIFORNIA", 99.0, 0.6, 0.1),
            detection("8ABC123", 98.0, 0.4, 0.2),
        ],
    )]));

    let outcome = p.reader.process_image("cam1/0001.jpg", None).await.unwrap();
    assert_eq!(outcome.candidate.text, "8ABC123");
    assert_eq!(outcome.candidate.jurisdiction(), "CALIFORNIA");
    assert!(matches!(outcome.route, Route::FastLane { .. }));

    assert_eq!(p.orchestrator.poll_once().await.unwrap(), Poll::Acknowledged);
    assert_eq!(p.persister.poll_once().await.unwrap(), Poll::Acknowledged);

    let rows = p.store.violations_for_plate("8ABC123").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner, "Jane Doe");
    assert_eq!(rows[0].email, "jane@example.com");
    assert_eq!(rows[0].vehicle, "Red Toyota Camry");
    assert_eq!(rows[0].location, "Main St & 1st Ave");
    assert_eq!(rows[0].image_ref, "cam1/0001.jpg");

    let published = p.published.0.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert!(published[0].contains("License Plate: 8ABC123"));
    assert!(published[0].contains("Vehicle: Red Toyota Camry"));
}

#[tokio::test]
async fn out_of_state_plate_goes_to_slow_lane() {
    let p = pipeline(FixedText(vec![(
        "cam1/0002.jpg",
        vec![detection("XYZ99", 90.0, 0.3, 0.1), detection("TEXAS", 95.0, 0.2, 0.1)],
    )]));

    let outcome = p.reader.process_image("cam1/0002.jpg", None).await.unwrap();
    assert_eq!(outcome.candidate.text, "XYZ99");
    assert_eq!(outcome.candidate.jurisdiction(), "TEXAS");
    assert!(matches!(outcome.route, Route::SlowLane { .. }));

    let rows = p.store.out_of_state_for_plate("XYZ99").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].detected_text, "XYZ99 TEXAS");
    assert_eq!(rows[0].metadata.violation_type, "Red Light");
    assert_eq!(p.orchestrator.poll_once().await.unwrap(), Poll::Idle);
}

#[tokio::test]
async fn home_name_inside_other_text_is_not_the_home_jurisdiction() {
    let p = pipeline(FixedText(vec![(
        "cam3/0008.jpg",
        vec![
            detection("ABC1234", 90.0, 0.3, 0.1),
            detection("Visit California Parks", 95.0, 0.6, 0.1),
        ],
    )]));

    let outcome = p.reader.process_image("cam3/0008.jpg", None).await.unwrap();
    assert_eq!(outcome.candidate.jurisdiction(), "VISIT CALIFORNIA PARKS");
    assert!(matches!(outcome.route, Route::SlowLane { .. }));
    assert_eq!(p.orchestrator.poll_once().await.unwrap(), Poll::Idle);
}

#[tokio::test]
async fn image_without_text_gets_synthetic_plate() {
    let p = pipeline(FixedText(vec![]));
    let outcome = p.reader.process_image("missing/0003.jpg", None).await.unwrap();
    let plate = outcome.candidate.text.clone();
    assert!(plate.starts_with("UNKNOWN-"));
    assert!(plate["UNKNOWN-".len()..].chars().all(|c| c.is_ascii_digit()));
    assert_eq!(outcome.candidate.jurisdiction(), "unknown");

    let rows = p.store.out_of_state_for_plate(&plate).await.unwrap();
    assert_eq!(rows[0].jurisdiction, "unknown");
    assert_eq!(rows[0].metadata, ImageMetadata::default());
}

#[tokio::test]
async fn plate_only_in_hierarchical_dataset_is_resolved() {
    let p = pipeline(FixedText(vec![]));
    let detections = vec![detection("5XYZ789", 97.0, 0.3, 0.1)];
    p.reader
        .process_image("cam2/0004.jpg", Some(detections))
        .await
        .unwrap();
    p.orchestrator.poll_once().await.unwrap();
    p.persister.poll_once().await.unwrap();

    let rows = p.store.violations_for_plate("5XYZ789").await.unwrap();
    assert_eq!(rows[0].owner, "John Smith");
    assert_eq!(rows[0].vehicle, "Black Honda Civic");
}

#[tokio::test]
async fn unknown_owner_still_produces_a_record() {
    let p = pipeline(FixedText(vec![]));
    let detections = vec![detection("1QQQ111", 97.0, 0.3, 0.1)];
    p.reader
        .process_image("cam2/0005.jpg", Some(detections))
        .await
        .unwrap();
    assert_eq!(p.orchestrator.poll_once().await.unwrap(), Poll::Acknowledged);
    assert_eq!(p.persister.poll_once().await.unwrap(), Poll::Acknowledged);

    let rows = p.store.violations_for_plate("1QQQ111").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner, UNKNOWN);
    assert_eq!(rows[0].email, UNKNOWN);
    assert_eq!(rows[0].vehicle, UNKNOWN);
    assert_eq!(p.published.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn redelivered_fast_lane_message_stores_one_row() {
    let p = pipeline(FixedText(vec![]));
    let detections = vec![detection("8ABC123", 97.0, 0.3, 0.1)];
    p.reader
        .process_image("cam1/0006.jpg", Some(detections))
        .await
        .unwrap();

    // Simulate redelivery by duplicating the queued event.
    let message = p.fast_lane.receive(Duration::from_millis(0)).await.unwrap().unwrap();
    p.fast_lane.send(&message.body).await.unwrap();
    p.fast_lane.send(&message.body).await.unwrap();
    p.fast_lane.acknowledge(&message.delivery_token).await.unwrap();

    for _ in 0..2 {
        assert_eq!(p.orchestrator.poll_once().await.unwrap(), Poll::Acknowledged);
        assert_eq!(p.persister.poll_once().await.unwrap(), Poll::Acknowledged);
    }

    let rows = p.store.violations_for_plate("8ABC123").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner, "Jane Doe");
    assert_eq!(p.published.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn webhook_routes_posted_image() {
    let p = pipeline(FixedText(vec![]));
    let filter = webhook::routes(p.reader.clone(), p.store.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/webhook")
        .json(&json!({
            "image": "cam1/0007.jpg",
            "detections": [
                {"DetectedText": "8ABC123", "Confidence": 98.0},
                {"DetectedText": "CALIFORNIA", "Confidence": 99.0}
            ]
        }))
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["plate"], "8ABC123");
    assert_eq!(body["jurisdiction"], "CALIFORNIA");
    assert_eq!(body["lane"], "fastLane");
    assert!(body["messageId"].is_string());
}

#[tokio::test]
async fn stored_violations_are_listed_by_plate() {
    let p = pipeline(FixedText(vec![]));
    let filter = webhook::routes(p.reader.clone(), p.store.clone());
    p.reader
        .process_image("cam1/0009.jpg", Some(vec![detection("8ABC123", 97.0, 0.3, 0.1)]))
        .await
        .unwrap();
    p.orchestrator.poll_once().await.unwrap();
    p.persister.poll_once().await.unwrap();
    p.reader
        .process_image("cam1/0010.jpg", Some(vec![detection("XYZ99", 97.0, 0.3, 0.1)]))
        .await
        .unwrap();

    let response = warp::test::request()
        .method("GET")
        .path("/violations/8ABC123")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["plate"], "8ABC123");
    assert_eq!(body["violations"][0]["owner"], "Jane Doe");
    assert_eq!(body["outOfState"].as_array().unwrap().len(), 0);

    let response = warp::test::request()
        .method("GET")
        .path("/violations/XYZ99")
        .reply(&filter)
        .await;
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["violations"].as_array().unwrap().len(), 0);
    assert_eq!(body["outOfState"][0]["jurisdiction"], "unknown");
    assert_eq!(body["outOfState"][0]["location"], "Main St & 1st Ave");
}

#[tokio::test]
async fn webhook_rejects_malformed_upload() {
    let p = pipeline(FixedText(vec![]));
    let filter = webhook::routes(p.reader.clone(), p.store.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/webhook")
        .body("{\"no_image\": true}")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 400);

    let response = warp::test::request()
        .method("GET")
        .path("/webhook")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), 405);
}
