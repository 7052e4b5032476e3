use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Plate Service Metrics ====
    pub static ref PLATE_UPLOADS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_service_uploads_total",
                "Total number of processed uploads by outcome",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_UPLOADS_REJECTED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_service_uploads_rejected_total",
                "Total number of uploads rejected before recognition",
            ),
            &["reason"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_DETECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_service_detections_total",
                "Plate regions found, by the detector that found them",
            ),
            &["source"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_PIPELINE_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "plate_service_pipeline_latency_seconds",
                "Wall time of one recognition pipeline run",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_OCR_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "plate_service_ocr_inference_seconds",
                "Time spent in the recognition model (excluding pre/post processing)",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
            &["execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_MODELS_READY: IntGauge = {
        let metric = IntGauge::new(
            "plate_service_models_ready",
            "Whether the classifier and recognizer are loaded (1=ready)",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_metrics_accessible() {
        PLATE_UPLOADS.with_label_values(&["success"]).inc();
        assert!(PLATE_UPLOADS.with_label_values(&["success"]).get() >= 1);

        PLATE_MODELS_READY.set(1);
        assert_eq!(PLATE_MODELS_READY.get(), 1);
    }

    #[test]
    fn test_encode_metrics_contains_plate_series() {
        PLATE_DETECTIONS.with_label_values(&["geometry"]).inc();
        let encoded = encode_metrics().expect("metrics should encode");
        assert!(encoded.contains("plate_service_detections_total"));
    }
}
