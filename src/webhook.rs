use crate::db::ViolationStore;
use crate::reader::PlateReader;
use crate::router::Route;
use crate::types::{CanonicalViolationRecord, OutOfStateRecord, TextDetection};
use log::error;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

#[derive(Debug)]
struct HandleImageError;

impl warp::reject::Reject for HandleImageError {}

#[derive(Debug)]
struct LookupError;

impl warp::reject::Reject for LookupError {}

/// Body posted when an image is uploaded.
#[derive(Debug, Deserialize)]
pub struct ImageUpload {
    pub image: String,
    /// Text already detected by the uploader, if any.
    pub detections: Option<Vec<TextDetection>>,
}

#[derive(Debug, Serialize)]
struct ImageResult {
    plate: String,
    jurisdiction: String,
    #[serde(flatten)]
    route: Route,
}

/// Everything stored for one plate, both lanes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlateHistory {
    plate: String,
    violations: Vec<CanonicalViolationRecord>,
    out_of_state: Vec<OutOfStateRecord>,
}

/// `POST /webhook` for uploads and `GET /violations/{plate}` for review.
pub fn routes(
    reader: Arc<PlateReader>,
    store: ViolationStore,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let upload = warp::post()
        .and(warp::path!("webhook"))
        .and(warp::body::json())
        .and(with_reader(reader))
        .and_then(|upload: ImageUpload, reader: Arc<PlateReader>| async move {
            match reader.process_image(&upload.image, upload.detections).await {
                Ok(outcome) => Ok(warp::reply::json(&ImageResult {
                    jurisdiction: outcome.candidate.jurisdiction().to_string(),
                    plate: outcome.candidate.text,
                    route: outcome.route,
                })),
                Err(e) => {
                    error!("Error handling image {}: {}", upload.image, e);
                    Err(warp::reject::custom(HandleImageError))
                }
            }
        });

    let history = warp::get()
        .and(warp::path!("violations" / String))
        .and(warp::any().map(move || store.clone()))
        .and_then(|plate: String, store: ViolationStore| async move {
            let violations = store.violations_for_plate(&plate).await;
            let out_of_state = store.out_of_state_for_plate(&plate).await;
            match (violations, out_of_state) {
                (Ok(violations), Ok(out_of_state)) => Ok(warp::reply::json(&PlateHistory {
                    plate,
                    violations,
                    out_of_state,
                })),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Error reading violations for plate {}: {}", plate, e);
                    Err(warp::reject::custom(LookupError))
                }
            }
        });

    upload.or(history).recover(handle_rejection)
}

fn with_reader(
    reader: Arc<PlateReader>,
) -> impl Filter<Extract = (Arc<PlateReader>,), Error = Infallible> + Clone {
    warp::any().map(move || reader.clone())
}

async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let status = if err.find::<HandleImageError>().is_some() || err.find::<LookupError>().is_some() {
        warp::http::StatusCode::INTERNAL_SERVER_ERROR
    } else if err.is_not_found() {
        warp::http::StatusCode::NOT_FOUND
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        warp::http::StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        warp::http::StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        warp::http::StatusCode::METHOD_NOT_ALLOWED
    } else {
        warp::http::StatusCode::BAD_REQUEST
    };
    Ok(warp::reply::with_status(
        status.canonical_reason().unwrap_or("error"),
        status,
    ))
}

pub async fn run(reader: Arc<PlateReader>, store: ViolationStore, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    warp::serve(routes(reader, store)).run(addr).await;
}
