//! Axum middleware layers applied to the router.
//!
//! Includes request tracing (one span per request, tagged with a generated
//! request id), timeout enforcement, and response compression.

use std::time::Duration;

use axum::http::Request;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{MakeSpan, TraceLayer},
};
use tracing::Span;
use uuid::Uuid;

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the per-request span.
///
/// Only the method and path are recorded; request bodies carry plaintext and
/// are never logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            path = %request.uri().path(),
        )
    }
}

/// HTTP trace layer with [`RequestSpan`] spans.
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http().make_span_with(RequestSpan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Collects the fields of every new span as `(name, value)` pairs.
    #[derive(Clone, Default)]
    struct FieldRecorder(Arc<Mutex<Vec<(String, String)>>>);

    impl Visit for FieldRecorder {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0
                .lock()
                .unwrap()
                .push((field.name().to_owned(), format!("{value:?}")));
        }
    }

    impl<S: Subscriber> Layer<S> for FieldRecorder {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            attrs.record(&mut self.clone());
        }
    }

    impl FieldRecorder {
        fn get(&self, name: &str) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn span_records_request_id_method_and_path() {
        let recorder = FieldRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/v1/transit/encrypt?x=1")
            .body(Body::empty())
            .unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let _span = RequestSpan.make_span(&req);
        });

        let request_id = recorder.get("request_id").expect("request_id recorded");
        assert!(Uuid::parse_str(&request_id).is_ok(), "not a uuid: {request_id}");
        assert_eq!(recorder.get("method").as_deref(), Some("POST"));
        assert_eq!(recorder.get("path").as_deref(), Some("/v1/transit/encrypt"));
    }

    #[test]
    fn request_ids_are_unique() {
        let recorder = FieldRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let req = Request::builder().uri("/health").body(()).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let _a = RequestSpan.make_span(&req);
            let _b = RequestSpan.make_span(&req);
        });

        let ids: Vec<String> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == "request_id")
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
