//! End-to-end report generation through the engine.
//!
//! Guarantees exercised here:
//! - A report with a good outline ends `completed` with every section present,
//!   in outline order.
//! - Outline failures of any kind end the report in `error` with no sections.
//! - A failed section degrades to placeholder text; the report still completes
//!   and can be downloaded.
//! - Capacity bounds the active pool and frees up as reports finish.
//! - Progress observed by polling never goes backwards.

use dossier_core::{
    degraded_placeholder, ChatOptions, GenerationError, ReportError, ReportStatus, WorkerOutcome,
};
use dossier_test_utils::{
    default_section_text, outline_json, setup_engine, wait_for, wait_for_status,
    wait_until_terminal, GatedGenerator, ScriptedGenerator, EMPTY_OUTLINE, MALFORMED_OUTLINE,
    TWO_SECTION_OUTLINE,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Three sections, all succeed: completed at 100 with 3/3 sections.
#[tokio::test]
async fn three_section_report_completes() {
    let generator = Arc::new(ScriptedGenerator::new());
    let (engine, _dir) = setup_engine(generator.clone());

    let created = engine.create_report("T", "").unwrap();
    assert_eq!(created.status, "generating");

    let status = wait_until_terminal(&engine, created.report_id).await;
    assert_eq!(status.status, ReportStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.sections_completed, 3);
    assert_eq!(status.total_sections, 3);
    assert!(status.error.is_none());

    assert_eq!(generator.section_calls(), vec!["1", "2", "3"]);

    let record = engine.store().get(created.report_id).unwrap();
    let order: Vec<&str> = record.sections.keys().map(String::as_str).collect();
    assert_eq!(order, vec!["1", "2", "3"]);
    assert_eq!(record.sections["2"].content, default_section_text("2"));
    assert!(record.completed_at.is_some());
    assert!(!engine.store().is_active(created.report_id));
}

/// Unparseable outline: error status mentioning the parse failure, no sections.
#[tokio::test]
async fn malformed_outline_fails_report() {
    let generator = Arc::new(ScriptedGenerator::new().with_outline(MALFORMED_OUTLINE));
    let (engine, _dir) = setup_engine(generator.clone());

    let created = engine.create_report("T", "").unwrap();
    let status = wait_until_terminal(&engine, created.report_id).await;

    assert_eq!(status.status, ReportStatus::Error);
    assert!(status.error.as_deref().unwrap().contains("parse"));
    assert_eq!(status.sections_completed, 0);
    assert!(status.outline.is_none());
    assert!(generator.section_calls().is_empty());
    assert!(engine.store().is_active(created.report_id));
}

/// Zero sections is always `error`, never `generating_sections`.
#[tokio::test]
async fn empty_outline_fails_report() {
    let generator = Arc::new(ScriptedGenerator::new().with_outline(EMPTY_OUTLINE));
    let (engine, _dir) = setup_engine(generator);

    let (created, handle) = engine.submit("T", "").unwrap();
    assert_eq!(
        handle.await.unwrap(),
        WorkerOutcome::Failed("outline contains no sections".into())
    );

    let status = engine.status(created.report_id).unwrap();
    assert_eq!(status.status, ReportStatus::Error);
    assert!(status.outline.is_none());
}

/// Outline call failure is fatal, with no retry.
#[tokio::test]
async fn outline_call_failure_fails_report() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_outline_failure(GenerationError::Transport("connection refused".into())),
    );
    let (engine, _dir) = setup_engine(generator.clone());

    let created = engine.create_report("T", "").unwrap();
    let status = wait_until_terminal(&engine, created.report_id).await;

    assert_eq!(status.status, ReportStatus::Error);
    assert_eq!(status.error.as_deref(), Some("outline generation failed"));
    assert_eq!(generator.calls().len(), 1);
}

/// One failed section: completed, placeholder references the title, downloadable.
#[tokio::test]
async fn failed_section_degrades_without_failing_report() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_outline(TWO_SECTION_OUTLINE)
            .with_section_failure("2"),
    );
    let (engine, _dir) = setup_engine(generator);

    let created = engine.create_report("Trade", "").unwrap();
    let status = wait_until_terminal(&engine, created.report_id).await;
    assert_eq!(status.status, ReportStatus::Completed);
    assert_eq!(status.sections_completed, 2);

    let record = engine.store().get(created.report_id).unwrap();
    assert!(!record.sections["1"].failed);
    assert!(record.sections["2"].failed);
    assert_eq!(record.sections["2"].content, degraded_placeholder("Imports"));
    assert!(record.sections["2"].content.contains("Imports"));

    let artifact = engine.download(created.report_id).unwrap();
    let text = String::from_utf8(artifact.bytes).unwrap();
    assert!(text.contains(&degraded_placeholder("Imports")));
    assert_eq!(artifact.download_count, 1);
}

/// Summary counts characters over abstract and sections.
#[tokio::test]
async fn summary_reflects_generated_text() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_outline(TWO_SECTION_OUTLINE)
            .with_section_text("1", "出口增长")
            .with_section_text("2", "imports"),
    );
    let (engine, _dir) = setup_engine(generator);

    let created = engine.create_report("Trade", "").unwrap();
    wait_until_terminal(&engine, created.report_id).await;

    let view = engine.summary(created.report_id).unwrap();
    let summary = view.summary.unwrap();
    assert_eq!(summary.total_sections, 2);
    assert_eq!(
        summary.total_words,
        "Exports and imports.".chars().count() + 4 + 7
    );
    assert!(summary.generation_duration_secs.unwrap() >= 0.0);
    assert!(summary.generation_duration_formatted.unwrap().starts_with("0:00:"));
    assert_eq!(view.topic, "Trade");
    assert_eq!(view.download_count, 0);
}

/// The (limit + 1)th concurrent request is refused; finishing frees a slot.
#[tokio::test]
async fn capacity_is_enforced_and_released() {
    let inner = Arc::new(ScriptedGenerator::new().with_outline(outline_json(1)));
    let gated = Arc::new(GatedGenerator::new(inner));
    let (engine, _dir) = setup_engine(gated.clone());
    let limit = engine.config().max_active_reports;

    let mut ids = Vec::new();
    for i in 0..limit {
        ids.push(engine.create_report(&format!("topic {i}"), "").unwrap().report_id);
    }
    let err = engine.create_report("one too many", "").unwrap_err();
    assert!(matches!(err, ReportError::CapacityExceeded { max } if max == limit));
    assert!(err.is_client_error());
    assert_eq!(engine.store().count_active(), limit);

    gated.open();
    for id in &ids {
        assert_eq!(
            wait_until_terminal(&engine, *id).await.status,
            ReportStatus::Completed
        );
    }
    assert_eq!(engine.store().count_active(), 0);
    assert!(engine.create_report("now it fits", "").is_ok());
}

/// Progress seen between generation calls never decreases.
#[tokio::test]
async fn progress_is_monotone_while_polling() {
    let inner = Arc::new(ScriptedGenerator::new().with_outline(outline_json(4)));
    let gated = Arc::new(GatedGenerator::new(inner));
    let (engine, _dir) = setup_engine(gated.clone());

    let created = engine.create_report("T", "").unwrap();
    let id = created.report_id;

    let mut seen = vec![engine.status(id).unwrap().progress];
    // One outline call plus four section calls.
    for call in 1..=5 {
        gated.wait_for_arrivals(call).await;
        seen.push(engine.status(id).unwrap().progress);
        gated.release(1);
    }
    let last = wait_until_terminal(&engine, id).await;
    seen.push(last.progress);

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
    assert_eq!(last.status, ReportStatus::Completed);
}

/// While sections are generated the report is visible in `generating_sections`
/// with the outline attached.
#[tokio::test]
async fn outline_visible_during_section_generation() {
    let inner = Arc::new(ScriptedGenerator::new().with_outline(TWO_SECTION_OUTLINE));
    let gated = Arc::new(GatedGenerator::new(inner));
    let (engine, _dir) = setup_engine(gated.clone());

    let created = engine.create_report("Trade", "").unwrap();
    gated.release(1);

    let status =
        wait_for_status(&engine, created.report_id, ReportStatus::GeneratingSections).await;
    assert_eq!(status.total_sections, 2);
    assert_eq!(status.outline.unwrap().title, "Trade");
    assert!(status.progress >= 20 && status.progress < 90);

    gated.open();
    let done = wait_for(&engine, created.report_id, |s| s.progress == 100).await;
    assert_eq!(done.status, ReportStatus::Completed);
}

/// Downloads and deletes are distinguished from missing reports.
#[tokio::test]
async fn download_and_delete_errors() {
    let inner = Arc::new(ScriptedGenerator::new());
    let gated = Arc::new(GatedGenerator::new(inner));
    let (engine, _dir) = setup_engine(gated.clone());

    let created = engine.create_report("T", "").unwrap();
    let err = engine.download(created.report_id).unwrap_err();
    assert!(matches!(err, ReportError::NotCompleted { .. }));

    engine.delete(created.report_id).unwrap();
    assert!(engine.status(created.report_id).unwrap_err().is_not_found());
    assert!(engine.download(created.report_id).unwrap_err().is_not_found());
    assert!(engine.delete(created.report_id).unwrap_err().is_not_found());

    // The worker wakes to find its record gone and stops without recreating it.
    gated.open();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(engine.store().get(created.report_id).is_none());
    assert_eq!(engine.store().total_count(), 0);
}

/// Chat shares the generator and splits deliberation from the answer.
#[tokio::test]
async fn chat_round_trip() {
    let generator =
        Arc::new(ScriptedGenerator::new().with_chat_reply("<think>recall</think>GDP is output."));
    let (engine, _dir) = setup_engine(generator.clone());

    let reply = engine.chat("What is GDP?", ChatOptions::default()).await.unwrap();
    assert_eq!(reply.message, "GDP is output.");
    assert_eq!(reply.thinking.as_deref(), Some("recall"));

    let reply = engine
        .chat(
            "What is GDP?",
            ChatOptions {
                deliberation: Some(false),
                ..ChatOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(reply.thinking.is_none());
    assert!(reply.message.contains("</think>"));
}
