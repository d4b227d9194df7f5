//! Tests for the claim protocol: mutual exclusion, idempotence,
//! progressive plan visibility, staleness reaping, and recovery.

mod common;

use std::time::Duration;

use declutter::job::{JobStatus, TransformOptions};
use declutter::pipeline::Disposition;
use declutter::settings::Settings;

use common::{FailingImage, FlakyImage, GatedImage, ScriptedPlan, TestHarness};

#[tokio::test]
async fn test_concurrent_claim_yields_one_generation() {
    let plan = ScriptedPlan::new("1. Clear the desk.");
    let gate = GatedImage::new();
    let harness = TestHarness::builder()
        .plan(plan.clone())
        .image(gate.clone())
        .build();

    let submitted = harness.submit_sample(TransformOptions::default());
    let id = submitted.id.clone();

    let (winner, _) = tokio::join!(harness.service.process(&id), async {
        // Once the first call is parked inside the image edit it holds
        // the claim; a contender must step aside without generating.
        gate.wait_entered().await;

        let contender = harness
            .service
            .process(&id)
            .await
            .expect("Contending process call failed");
        assert_eq!(contender.disposition, Disposition::ClaimHeld);
        assert_eq!(contender.status, JobStatus::Processing);

        gate.open();
    });

    let outcome = winner.expect("Winning process call failed");
    assert_eq!(outcome.disposition, Disposition::Generated);
    assert_eq!(outcome.status, JobStatus::Completed);

    // Exactly one full generation sequence ran.
    assert_eq!(plan.calls(), 1);
}

#[tokio::test]
async fn test_plan_visible_before_image_completes() {
    let plan = ScriptedPlan::new("1. Clear the desk.\n2. Shelve the books.");
    let gate = GatedImage::new();
    let harness = TestHarness::builder()
        .plan(plan.clone())
        .image(gate.clone())
        .build();

    let submitted = harness.submit_sample(TransformOptions::default());
    let id = submitted.id.clone();

    let (result, _) = tokio::join!(harness.service.process(&id), async {
        gate.wait_entered().await;

        // The plan was persisted before the fan-out, so a poll during
        // the slow image edit already shows it.
        let (view, _) = harness
            .service
            .status(&id, false)
            .expect("Mid-flight status read failed");
        assert_eq!(view.status, JobStatus::Processing);
        assert_eq!(
            view.plan.as_deref(),
            Some("1. Clear the desk.\n2. Shelve the books.")
        );
        assert!(view.after_image.is_none());
        assert!(view.audio.is_none());

        gate.open();
    });

    let outcome = result.expect("Process call failed");
    assert_eq!(outcome.status, JobStatus::Completed);

    let (final_view, _) = harness
        .service
        .status(&id, false)
        .expect("Final status read failed");
    assert!(final_view.after_image.is_some());
}

#[tokio::test]
async fn test_process_is_idempotent_after_completion() {
    let plan = ScriptedPlan::new("1. Clear the desk.");
    let harness = TestHarness::builder().plan(plan.clone()).build();

    let submitted = harness.submit_sample(TransformOptions::default());

    let first = harness
        .service
        .process(&submitted.id)
        .await
        .expect("First process call failed");
    assert_eq!(first.disposition, Disposition::Generated);

    let second = harness
        .service
        .process(&submitted.id)
        .await
        .expect("Second process call failed");
    assert_eq!(second.disposition, Disposition::AlreadyCompleted);
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.after_image, first.after_image);
    assert_eq!(second.plan, first.plan);

    // The repeat call performed no generation work.
    assert_eq!(plan.calls(), 1);
}

#[tokio::test]
async fn test_stale_processing_job_reaped_on_poll() {
    let harness = TestHarness::builder()
        .settings(Settings {
            processing_timeout: Duration::from_millis(50),
            ..Settings::default()
        })
        .build();

    let submitted = harness.submit_sample(TransformOptions::default());
    tokio::time::sleep(Duration::from_millis(120)).await;

    let (view, _) = harness
        .service
        .status(&submitted.id, false)
        .expect("Status read failed");
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.error.as_deref().expect("error set").contains("timed out"));

    let record = harness.record(&submitted.id);
    assert!(record.original_payload.is_none());
    assert!(record.claimed_at.is_none());
}

#[tokio::test]
async fn test_failed_job_recovers_through_retry() {
    let harness = TestHarness::builder().image(FlakyImage::new()).build();

    let submitted = harness.submit_sample(TransformOptions::default());

    let first = harness
        .service
        .process(&submitted.id)
        .await
        .expect("First process call failed");
    assert_eq!(first.disposition, Disposition::GenerationFailed);
    assert_eq!(first.status, JobStatus::Failed);

    // The payload was dropped on failure; retry rebuilds it from the
    // stored before-image and the rerun succeeds.
    let retried = harness
        .service
        .retry(&submitted.id)
        .expect("Retry failed");
    assert_eq!(retried.status, JobStatus::Processing);

    let second = harness
        .service
        .process(&submitted.id)
        .await
        .expect("Second process call failed");
    assert_eq!(second.disposition, Disposition::Generated);
    assert_eq!(second.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_failed_job_is_not_reprocessed_without_retry() {
    let plan = ScriptedPlan::new("1. Clear the desk.");
    let harness = TestHarness::builder()
        .plan(plan.clone())
        .image(FailingImage::new("render farm on fire"))
        .build();

    let submitted = harness.submit_sample(TransformOptions::default());

    let first = harness
        .service
        .process(&submitted.id)
        .await
        .expect("First process call failed");
    assert_eq!(first.disposition, Disposition::GenerationFailed);

    let second = harness
        .service
        .process(&submitted.id)
        .await
        .expect("Second process call failed");
    assert_eq!(second.disposition, Disposition::AlreadyFailed);
    assert_eq!(second.status, JobStatus::Failed);
    assert!(second
        .error
        .as_deref()
        .expect("error set")
        .contains("render farm on fire"));

    assert_eq!(plan.calls(), 1);
}
