//! Caption Client Integration Tests
//!
//! Runs the upload / call / event-stream exchange against an in-process
//! Gradio stand-in.

mod common;

use std::sync::Arc;

use captionkit::config::CaptionSettings;
use captionkit::{BackendError, Captioner, GradioCaptioner, Level, MemoryReporter};
use common::GradioBackend;

const IMAGE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 7, 7, 7];

fn captioner(endpoint: String, token: &str) -> (GradioCaptioner, Arc<MemoryReporter>) {
    let settings = CaptionSettings {
        endpoint,
        ..Default::default()
    };
    let reporter = Arc::new(MemoryReporter::new());
    let captioner = GradioCaptioner::new(&settings, token, reporter.clone()).unwrap();
    (captioner, reporter)
}

#[tokio::test]
async fn test_caption_joins_output_segments() {
    let (backend, url) = GradioBackend::default().start();
    let (captioner, reporter) = captioner(url, "hf_test");

    let caption = captioner.caption(IMAGE.to_vec(), "cat.png").await.unwrap();

    assert_eq!(caption, "a cat\nsitting on a mat");
    assert_eq!(backend.uploads(), vec!["cat.png".to_string()]);
    assert!(reporter.contains(Level::Info, "Prediction result for cat.png"));

    // the call references the uploaded file
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["data"][0]["path"], "/tmp/gradio/0f3a/cat.png");
    assert_eq!(calls[0]["data"][0]["meta"]["_type"], "gradio.FileData");
}

#[tokio::test]
async fn test_error_event_fails_the_caption() {
    let (_, url) = GradioBackend {
        error: Some("CUDA out of memory".to_string()),
        ..Default::default()
    }
    .start();
    let (captioner, reporter) = captioner(url, "hf_test");

    let err = captioner
        .caption(IMAGE.to_vec(), "cat.png")
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Remote { .. }));
    assert!(err.to_string().contains("CUDA out of memory"));
    assert!(reporter.contains(Level::Error, "cat.png"));
}

#[tokio::test]
async fn test_blank_output_is_an_empty_caption() {
    let (_, url) = GradioBackend {
        segments: vec!["  ".to_string()],
        ..Default::default()
    }
    .start();
    let (captioner, _) = captioner(url, "hf_test");

    let err = captioner
        .caption(IMAGE.to_vec(), "cat.png")
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Empty { .. }));
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let (backend, url) = GradioBackend::default().start();
    let (captioner, _) = captioner(url, "hf_wrong");

    let err = captioner
        .caption(IMAGE.to_vec(), "cat.png")
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::Status { status: 401, .. }));
    assert!(backend.uploads().is_empty());
    assert!(backend.calls().is_empty());
}
