/// Integration tests for the plate service HTTP API
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use common::plates::{ApiInfo, BoundingBox, TextCandidate, UploadResponse};
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use plate_service::extractor::TextRecognizer;
use plate_service::localizer::PlateClassifier;
use plate_service::normalizer::ImageNormalizer;
use plate_service::{api, PlatePipeline, PlateServiceState};
use std::io::Cursor;
use std::sync::Arc;

struct StubClassifier(Vec<BoundingBox>);

impl PlateClassifier for StubClassifier {
    fn detect(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
        self.0.clone()
    }
}

struct StubRecognizer(Vec<TextCandidate>);

impl TextRecognizer for StubRecognizer {
    fn recognize(&self, _image: &RgbImage) -> anyhow::Result<Vec<TextCandidate>> {
        Ok(self.0.clone())
    }
}

/// Helper function to create a test service around stub models
fn setup_test_service(
    normalizer: ImageNormalizer,
    boxes: Vec<BoundingBox>,
    texts: &[(&str, f32)],
) -> (TestServer, PlateServiceState) {
    let pipeline = PlatePipeline::new(
        normalizer,
        Arc::new(StubClassifier(boxes)),
        Arc::new(StubRecognizer(
            texts.iter().map(|(t, c)| TextCandidate::new(*t, *c)).collect(),
        )),
    );
    let state = PlateServiceState::new("test-node".to_string(), pipeline);
    let server = TestServer::new(api::router(state.clone())).unwrap();

    (server, state)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([100, 110, 120]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

fn upload_form(bytes: Vec<u8>, mime: &str) -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(bytes).file_name("car.jpg").mime_type(mime),
    )
}

#[tokio::test]
async fn test_health() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "License Plate OCR API");
}

#[tokio::test]
async fn test_readyz_follows_shutdown() {
    let (server, state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    assert_eq!(server.get("/readyz").await.status_code(), 200);
    state.shutdown();
    assert_eq!(server.get("/readyz").await.status_code(), 503);
}

#[tokio::test]
async fn test_api_info() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    let response = server.get("/api/info").await;
    assert_eq!(response.status_code(), 200);

    let info: ApiInfo = response.json();
    assert_eq!(info.name, "License Plate OCR API");
    assert_eq!(info.version, "1.0.0");
    assert_eq!(info.max_file_size, "10MB");
    assert_eq!(
        info.supported_formats,
        vec!["image/jpeg", "image/jpg", "image/png", "image/webp"]
    );
    assert!(!info.features.is_empty());
}

#[tokio::test]
async fn test_upload_success() {
    let bbox = BoundingBox::new(40, 60, 150, 40);
    let (server, _state) = setup_test_service(
        ImageNormalizer::default(),
        vec![bbox],
        &[("ka 01 ab 1234", 0.93)],
    );

    let response = server
        .post("/upload")
        .multipart(upload_form(jpeg(320, 200), "image/jpeg"))
        .await;
    assert_eq!(response.status_code(), 200);

    let body: UploadResponse = response.json();
    assert!(body.success);
    assert_eq!(body.message, "License plate successfully detected and extracted");
    assert_eq!(body.plate_text.as_deref(), Some("KA01AB1234"));
    assert!((body.confidence - 0.93).abs() < 1e-6);
    assert_eq!(body.bounding_box, Some(bbox));
    assert!(body.plate_image.unwrap().starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn test_upload_without_plate() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    let response = server
        .post("/upload")
        .multipart(upload_form(jpeg(200, 120), "image/jpeg"))
        .await;
    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No license plate detected in the image");
    assert!(body["plate_text"].is_null());
    assert_eq!(body["confidence"], 0.0);
    assert!(body["original_image"].is_string());
    assert!(body["plate_image"].is_null());
    assert!(body.get("bounding_box").is_none());
}

#[tokio::test]
async fn test_upload_plate_without_text() {
    let (server, _state) = setup_test_service(
        ImageNormalizer::default(),
        vec![BoundingBox::new(20, 20, 100, 30)],
        &[],
    );

    let response = server
        .post("/upload")
        .multipart(upload_form(jpeg(200, 120), "image/jpeg"))
        .await;
    assert_eq!(response.status_code(), 200);

    let body: UploadResponse = response.json();
    assert!(!body.success);
    assert_eq!(
        body.message,
        "License plate detected but no text could be extracted"
    );
    assert!(body.plate_text.is_none());
    assert!(body.plate_image.is_some());
}

#[tokio::test]
async fn test_upload_unsupported_format() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    let response = server
        .post("/upload")
        .multipart(upload_form(jpeg(64, 64), "image/gif"))
        .await;
    assert_eq!(response.status_code(), 400);

    let body: serde_json::Value = response.json();
    assert_eq!(
        body["detail"],
        "Unsupported format. Use: image/jpeg, image/jpg, image/png, image/webp"
    );
}

#[tokio::test]
async fn test_upload_too_large() {
    let limit = 2 * 1024 * 1024;
    let (server, _state) = setup_test_service(
        ImageNormalizer::new(limit, 1920),
        Vec::new(),
        &[],
    );

    let mut blob = jpeg(16, 16);
    blob.resize(limit + 1, 0);

    let response = server
        .post("/upload")
        .multipart(upload_form(blob, "image/jpeg"))
        .await;
    assert_eq!(response.status_code(), 400);

    let body: serde_json::Value = response.json();
    assert_eq!(body["detail"], "File size exceeds 2MB limit");
}

#[tokio::test]
async fn test_upload_over_body_limit() {
    let limit = 1024 * 1024;
    let (server, _state) = setup_test_service(
        ImageNormalizer::new(limit, 1920),
        Vec::new(),
        &[],
    );

    // Larger than the router's body limit, so multipart reading itself fails.
    let mut blob = jpeg(16, 16);
    blob.resize(5 * limit, 0);

    let response = server
        .post("/upload")
        .multipart(upload_form(blob, "image/jpeg"))
        .await;
    assert_eq!(response.status_code(), 400);

    let body: serde_json::Value = response.json();
    assert_eq!(body["detail"], "File size exceeds 1MB limit");
}

#[tokio::test]
async fn test_upload_garbage_bytes() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    let response = server
        .post("/upload")
        .multipart(upload_form(b"not an image at all".to_vec(), "image/png"))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_upload_missing_file_field() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    let form = MultipartForm::new().add_text("comment", "no file here");
    let response = server.post("/upload").multipart(form).await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_metrics_exposes_upload_counters() {
    let (server, _state) = setup_test_service(ImageNormalizer::default(), Vec::new(), &[]);

    server
        .post("/upload")
        .multipart(upload_form(jpeg(32, 32), "image/bmp"))
        .await;

    let response = server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);

    let text = response.text();
    assert!(text.contains("plate_service_uploads_total"));
    assert!(text.contains("plate_service_uploads_rejected_total"));
}
