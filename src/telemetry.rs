use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    predictions_total: Counter<u64>,
    prediction_duration: Histogram<u64>,
    frames_dropped: Counter<u64>,
    active_streams: UpDownCounter<i64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: deprecated crate to be replaced with an OTLP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("image_prediction");
        global::set_meter_provider(provider);

        let predictions_total = meter
            .u64_counter("predictions_total")
            .with_description("Total number of completed predictions")
            .build();

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
            ])
            .with_description("End-to-end duration of prediction operations in milliseconds")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped_total")
            .with_description("Frames superseded in the mailbox before being picked up")
            .build();

        let active_streams = meter
            .i64_up_down_counter("active_streams")
            .with_description("Currently open streaming connections")
            .build();

        Metrics {
            predictions_total,
            prediction_duration,
            frames_dropped,
            active_streams,
            registry,
        }
    }

    pub fn record_prediction(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.predictions_total.add(1, &attributes);
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_dropped_frame(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.frames_dropped.add(1, &attributes);
    }

    pub fn stream_opened(&self) {
        self.active_streams.add(1, &[]);
    }

    pub fn stream_closed(&self) {
        self.active_streams.add(-1, &[]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
