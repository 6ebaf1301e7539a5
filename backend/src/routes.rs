use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{info, warn};
use shared::{
    Endpoints, HealthStatus, ModelInfoResponse, ScanModelInfo, ScanResponse, ServiceInfo,
};

use crate::inference::service::PredictionService;
use crate::inference::validation::{UploadLimits, UploadedFile, validate_upload};
use crate::response::{ApiError, success};

pub const SERVICE_NAME: &str = "MCD ScanVeg AI Backend";
const IMAGE_FIELD: &str = "image";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(endpoint("", web::get().to(home)))
            .service(endpoint("/", web::get().to(home)))
            .service(endpoint("/ping", web::get().to(ping)))
            .service(endpoint("/scan", web::post().to(scan)))
            .service(endpoint("/model/info", web::get().to(model_info))),
    )
    .default_service(web::to(not_found));
}

/// A known path answers other methods with an enveloped 405.
fn endpoint(path: &str, route: actix_web::Route) -> actix_web::Resource {
    web::resource(path)
        .route(route)
        .default_service(web::to(method_not_allowed))
}

async fn home() -> HttpResponse {
    success(
        ServiceInfo {
            service: SERVICE_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            status: "running".into(),
            endpoints: Endpoints {
                health: "/api/ping".into(),
                scan: "/api/scan".into(),
                model_info: "/api/model/info".into(),
            },
        },
        "Welcome to the MCD ScanVeg AI backend",
    )
}

async fn ping() -> HttpResponse {
    success(
        HealthStatus {
            status: "healthy".into(),
            service: SERVICE_NAME.into(),
        },
        "Service is running",
    )
}

async fn scan(
    service: web::Data<PredictionService>,
    limits: web::Data<UploadLimits>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let upload = read_image_field(payload, limits.max_bytes())
        .await?
        .ok_or(ApiError::MissingImageField)?;

    if let Err(reason) = validate_upload(Some(&upload), &limits) {
        warn!("Rejected upload {}: {}", upload.display_name(), reason);
        return Err(ApiError::InvalidImage(reason.to_string()));
    }

    info!(
        "Processing image for classification: {} ({} bytes)",
        upload.display_name(),
        upload.bytes.len()
    );

    let bytes = upload.bytes;
    let svc = service.clone();
    let result = web::block(move || svc.classify_bytes(&bytes)).await??;

    info!(
        "Prediction completed: {} ({}%)",
        result.prediction, result.confidence
    );

    let response = ScanResponse {
        prediction: result.prediction,
        confidence: result.confidence,
        model_info: ScanModelInfo {
            model_used: result.model_used,
            available_classes: service.labels().to_vec(),
        },
        detailed_predictions: Some(result.all_predictions),
        note: None,
    };
    Ok(success(response, "Classification completed successfully"))
}

/// Pulls the first `image` file part off the form. Parts without a `filename`
/// parameter are plain form fields and are drained and ignored like any other
/// field. At most `max_bytes + 1` bytes are kept in memory.
async fn read_image_field(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<Option<UploadedFile>, ApiError> {
    let mut upload: Option<UploadedFile> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::MalformedForm(e.to_string()))?
    {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(String::from);
        let wanted = upload.is_none() && filename.is_some() && field.name() == Some(IMAGE_FIELD);
        if !wanted {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ApiError::MalformedForm(e.to_string()))?;
            }
            continue;
        }

        let cap = max_bytes.saturating_add(1);
        let mut file = UploadedFile {
            filename,
            ..Default::default()
        };

        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| ApiError::MalformedForm(e.to_string()))?;
            if file.exceeded_limit {
                continue;
            }
            let room = cap - file.bytes.len();
            if data.len() > room {
                file.bytes.extend_from_slice(&data[..room]);
                file.exceeded_limit = true;
            } else {
                file.bytes.extend_from_slice(&data);
            }
        }
        upload = Some(file);
    }

    Ok(upload)
}

async fn model_info(service: web::Data<PredictionService>) -> Result<HttpResponse, ApiError> {
    let model_path = if service.is_loaded() {
        let path = service.model_path();
        Some(
            path.to_str()
                .ok_or_else(|| ApiError::ModelInfo(format!("non UTF-8 model path {:?}", path)))?
                .to_string(),
        )
    } else {
        None
    };

    let info = ModelInfoResponse {
        model_loaded: service.is_loaded(),
        model_path,
        available_classes: service.labels().to_vec(),
        total_classes: service.labels().len(),
    };
    Ok(success(info, "Model information retrieved successfully"))
}

async fn not_found(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound(req.path().to_string()))
}

async fn method_not_allowed(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(ApiError::MethodNotAllowed {
        method: req.method().to_string(),
        path: req.path().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::loader::tests::FixedClassifier;
    use crate::inference::preprocess::tests::sample_png;
    use actix_web::http::{StatusCode, header};
    use actix_web::{App, test};

    const BOUNDARY: &str = "scanveg-test-boundary";

    fn form(field: &str, filename: Option<&str>, bytes: &[u8]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match filename {
            Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
            None => format!("form-data; name=\"{field}\""),
        };
        body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    fn ten_way_distribution(winner: usize) -> Vec<f32> {
        let mut scores = vec![0.05; 10];
        scores[winner] = 0.55;
        scores
    }

    fn loaded(scores: Vec<f32>) -> PredictionService {
        PredictionService::loaded(Box::new(FixedClassifier(scores)), "models/vegetables.pt")
    }

    fn unavailable() -> PredictionService {
        PredictionService::unavailable("models/vegetables.pt", "artifact missing")
    }

    async fn call(
        service: PredictionService,
        max_bytes: usize,
        req: test::TestRequest,
    ) -> (StatusCode, serde_json::Value) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(service))
                .app_data(web::Data::new(UploadLimits::new(
                    ["jpg", "jpeg", "png", "gif"],
                    max_bytes,
                )))
                .configure(configure_routes),
        )
        .await;
        let resp = test::call_service(&app, req.to_request()).await;
        let status = resp.status();
        let body: serde_json::Value = test::read_body_json(resp).await;
        (status, body)
    }

    fn scan_request(field: &str, filename: Option<&str>, bytes: &[u8]) -> test::TestRequest {
        let (content_type, body) = form(field, filename, bytes);
        test::TestRequest::post()
            .uri("/api/scan")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn ping_is_healthy_without_a_model() {
        let req = test::TestRequest::get().uri("/api/ping");
        let (status, body) = call(unavailable(), 1024, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
        assert!(body.get("error_code").is_none());
    }

    #[actix_web::test]
    async fn home_lists_endpoints() {
        let req = test::TestRequest::get().uri("/api/");
        let (status, body) = call(unavailable(), 1024, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "running");
        assert_eq!(body["data"]["endpoints"]["scan"], "/api/scan");
    }

    #[actix_web::test]
    async fn model_info_reports_unloaded_state() {
        let req = test::TestRequest::get().uri("/api/model/info");
        let (status, body) = call(unavailable(), 1024, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["model_loaded"], false);
        assert!(body["data"]["model_path"].is_null());
        assert_eq!(body["data"]["total_classes"], 10);
        assert_eq!(body["data"]["available_classes"].as_array().unwrap().len(), 10);
    }

    #[actix_web::test]
    async fn model_info_reports_loaded_state() {
        let (_, body) = call(
            loaded(ten_way_distribution(0)),
            1024,
            test::TestRequest::get().uri("/api/model/info"),
        )
        .await;
        assert_eq!(body["data"]["model_loaded"], true);
        assert_eq!(body["data"]["model_path"], "models/vegetables.pt");
        assert_eq!(body["data"]["total_classes"], 10);
    }

    #[actix_web::test]
    async fn scan_classifies_a_valid_image() {
        let png = sample_png(50, 40);
        let (status, body) = call(
            loaded(ten_way_distribution(6)),
            1024 * 1024,
            scan_request("image", Some("papa.png"), &png),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        let data = &body["data"];
        assert_eq!(data["prediction"], "Papa");
        assert_eq!(data["confidence"], 55.0);
        assert_eq!(data["model_info"]["model_used"], true);
        assert_eq!(data["model_info"]["available_classes"][6], "Papa");
        let detailed = data["detailed_predictions"].as_object().unwrap();
        assert_eq!(detailed.len(), 10);
        assert_eq!(detailed["Papa"], 55.0);
        assert!(data.get("note").is_none());
    }

    #[actix_web::test]
    async fn scan_without_image_field_is_rejected() {
        let (status, body) = call(
            loaded(ten_way_distribution(0)),
            1024 * 1024,
            scan_request("file", Some("a.png"), &sample_png(4, 4)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "MISSING_IMAGE_FIELD");
        assert!(body["data"].is_null());
    }

    #[actix_web::test]
    async fn scan_with_non_multipart_body_is_rejected() {
        let req = test::TestRequest::post()
            .uri("/api/scan")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{}");
        let (status, body) = call(loaded(ten_way_distribution(0)), 1024, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "MISSING_IMAGE_FIELD");
    }

    #[actix_web::test]
    async fn scan_with_disallowed_extension_is_rejected() {
        let (status, body) = call(
            loaded(ten_way_distribution(0)),
            1024 * 1024,
            scan_request("image", Some("papa.bmp"), &sample_png(4, 4)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE_FILE");
        assert!(body["message"].as_str().unwrap().contains("Allowed extensions"));
    }

    #[actix_web::test]
    async fn scan_with_empty_filename_is_rejected() {
        let (status, body) = call(
            loaded(ten_way_distribution(0)),
            1024 * 1024,
            scan_request("image", Some(""), &sample_png(4, 4)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE_FILE");
    }

    #[actix_web::test]
    async fn scan_with_oversize_file_is_rejected() {
        let (status, body) = call(
            loaded(ten_way_distribution(0)),
            16,
            scan_request("image", Some("big.png"), &[7u8; 64]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE_FILE");
        assert!(body["message"].as_str().unwrap().contains("too large"));
    }

    #[actix_web::test]
    async fn scan_with_corrupt_image_is_rejected() {
        let (status, body) = call(
            loaded(ten_way_distribution(0)),
            1024 * 1024,
            scan_request("image", Some("fake.jpg"), b"this is not a jpeg"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_IMAGE_FILE");
    }

    #[actix_web::test]
    async fn scan_without_model_is_service_unavailable() {
        let (status, body) = call(
            unavailable(),
            1024 * 1024,
            scan_request("image", Some("tomate.png"), &sample_png(32, 32)),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "MODEL_UNAVAILABLE");
        assert!(body["data"].is_null());
    }

    #[actix_web::test]
    async fn scan_with_misshapen_model_output_is_a_prediction_error() {
        let (status, body) = call(
            loaded(vec![0.5, 0.5]),
            1024 * 1024,
            scan_request("image", Some("tomate.png"), &sample_png(32, 32)),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error_code"], "PREDICTION_SERVICE_ERROR");
    }

    #[actix_web::test]
    async fn unknown_routes_use_the_envelope() {
        let req = test::TestRequest::get().uri("/nope");
        let (status, body) = call(unavailable(), 1024, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NOT_FOUND");
    }

    #[actix_web::test]
    async fn wrong_method_on_known_path_uses_the_envelope() {
        let req = test::TestRequest::get().uri("/api/scan");
        let (status, body) = call(unavailable(), 1024, req).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "METHOD_NOT_ALLOWED");
        assert!(body["data"].is_null());

        let req = test::TestRequest::post().uri("/api/ping");
        let (status, body) = call(unavailable(), 1024, req).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error_code"], "METHOD_NOT_ALLOWED");
    }

    #[actix_web::test]
    async fn image_field_without_filename_counts_as_missing() {
        let (status, body) = call(
            loaded(ten_way_distribution(0)),
            1024 * 1024,
            scan_request("image", None, &sample_png(4, 4)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "MISSING_IMAGE_FIELD");
    }

    #[actix_web::test]
    async fn unbounded_size_limit_still_accepts_uploads() {
        let (status, body) = call(
            loaded(ten_way_distribution(3)),
            usize::MAX,
            scan_request("image", Some("lechuga.png"), &sample_png(16, 16)),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["prediction"], "Lechuga");
    }
}
