#![cfg(unix)]

mod common;

use common::{config, entries, fake_pdf, scratch_root};
use filemorph::manifest::PageManifest;
use filemorph::{CancelToken, ConversionRequest, Converter, ErrorKind, Format};
use std::path::Path;
use std::time::{Duration, Instant};

fn converter(work: &Path) -> Converter {
    Converter::new(config(work)).expect("valid config")
}

fn assert_no_scratch_left(work: &Path) {
    let left = entries(&scratch_root(work));
    assert!(left.is_empty(), "scratch dirs left behind: {left:?}");
}

#[test]
fn heic_to_jpg_writes_one_output() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("photo.heic");
    std::fs::write(&input, vec![7u8; 2048]).unwrap();
    let output = work.path().join("out/photo.jpg");

    let outcome = converter(work.path()).convert(&input, "heic", "jpg", &output);

    assert!(outcome.succeeded, "{outcome:?}");
    assert_eq!(outcome.output_paths, vec![output.clone()]);
    assert!(std::fs::metadata(&output).unwrap().len() > 0);
    assert!(outcome.elapsed > Duration::ZERO);
    assert!(outcome.error_kind.is_none());
    assert_no_scratch_left(work.path());
}

#[test]
fn tool_failure_is_translated_and_leaves_no_output() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("broken.png");
    std::fs::write(&input, "FAIL").unwrap();
    let output = work.path().join("out/broken.webp");

    let outcome = converter(work.path()).convert(&input, "png", "webp", &output);

    assert!(!outcome.succeeded);
    assert_eq!(outcome.error_kind, Some(ErrorKind::ProcessExitedNonZero));
    assert!(outcome.error_message.unwrap().contains("corrupt image"));
    assert!(outcome.output_paths.is_empty());
    assert!(!output.exists());
}

#[test]
fn partial_write_before_failure_never_reaches_the_output() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("torn.png");
    std::fs::write(&input, "TRUNCATE").unwrap();
    let output = work.path().join("out/torn.jpg");

    let outcome = converter(work.path()).convert(&input, "png", "jpg", &output);

    assert_eq!(outcome.error_kind, Some(ErrorKind::ProcessExitedNonZero));
    assert!(!output.exists());
    assert_no_scratch_left(work.path());
}

#[test]
fn hung_image_tool_times_out_without_leaving_a_partial_file() {
    let work = tempfile::tempdir().unwrap();
    let mut cfg = config(work.path());
    cfg.timeouts.image_seconds = 1;
    let input = work.path().join("stuck.png");
    std::fs::write(&input, "HANG").unwrap();
    let output = work.path().join("out/stuck.webp");

    let started = Instant::now();
    let outcome = Converter::new(cfg)
        .unwrap()
        .convert(&input, "png", "webp", &output);

    assert_eq!(outcome.error_kind, Some(ErrorKind::ProcessTimedOut));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!output.exists());
    assert!(entries(&work.path().join("out")).is_empty());
    assert_no_scratch_left(work.path());
}

#[test]
fn format_the_tool_cannot_write_is_unavailable() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("photo.png");
    std::fs::write(&input, "png").unwrap();

    let output = work.path().join("photo.avif");
    let outcome = converter(work.path()).convert(&input, "png", "avif", &output);

    assert_eq!(outcome.error_kind, Some(ErrorKind::ToolUnavailable));
}

#[test]
fn missing_input_reports_input_not_found() {
    let work = tempfile::tempdir().unwrap();
    let outcome = converter(work.path()).convert(
        &work.path().join("report.docx"),
        "docx",
        "pdf",
        &work.path().join("out/report.pdf"),
    );

    assert!(!outcome.succeeded);
    assert_eq!(outcome.error_kind, Some(ErrorKind::InputNotFound));
    assert_no_scratch_left(work.path());
}

#[test]
fn missing_tools_report_tool_unavailable() {
    let work = tempfile::tempdir().unwrap();
    let mut cfg = config(work.path());
    cfg.tools.soffice = "/nonexistent/soffice".into();
    let input = work.path().join("report.docx");
    std::fs::write(&input, "doc").unwrap();

    let outcome = Converter::new(cfg)
        .unwrap()
        .convert(&input, "docx", "pdf", &work.path().join("report.pdf"));

    assert_eq!(outcome.error_kind, Some(ErrorKind::ToolUnavailable));
    assert_no_scratch_left(work.path());
}

#[test]
fn docx_to_pdf_relocates_the_artifact() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("report.docx");
    std::fs::write(&input, "quarterly numbers").unwrap();
    let output = work.path().join("out/final.pdf");

    let outcome = converter(work.path()).convert(&input, "docx", "pdf", &output);

    assert!(outcome.succeeded, "{outcome:?}");
    let body = std::fs::read_to_string(&output).unwrap();
    assert!(body.starts_with("%PDF"));
    assert!(body.contains("quarterly numbers"));
    assert_no_scratch_left(work.path());
}

#[test]
fn unexpected_artifact_name_is_found_by_scan() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("slides.pptx");
    std::fs::write(&input, "RENAME").unwrap();
    let output = work.path().join("slides.pdf");

    let outcome = converter(work.path()).convert(&input, "pptx", "pdf", &output);

    assert!(outcome.succeeded, "{outcome:?}");
    assert!(output.is_file());
    assert_no_scratch_left(work.path());
}

#[test]
fn document_tool_errors_clean_up() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("bad.odt");
    std::fs::write(&input, "BROKEN").unwrap();

    let output = work.path().join("bad.pdf");
    let outcome = converter(work.path()).convert(&input, "odt", "pdf", &output);

    assert_eq!(outcome.error_kind, Some(ErrorKind::ProcessExitedNonZero));
    assert_no_scratch_left(work.path());
}

#[test]
fn slow_document_tool_times_out_and_cleans_up() {
    let work = tempfile::tempdir().unwrap();
    let mut cfg = config(work.path());
    cfg.timeouts.document_seconds = 1;
    let input = work.path().join("huge.docx");
    std::fs::write(&input, "SLOW").unwrap();

    let started = Instant::now();
    let outcome = Converter::new(cfg)
        .unwrap()
        .convert(&input, "docx", "pdf", &work.path().join("huge.pdf"));

    assert_eq!(outcome.error_kind, Some(ErrorKind::ProcessTimedOut));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!work.path().join("huge.pdf").exists());
    assert_no_scratch_left(work.path());
}

#[test]
fn single_page_pdf_writes_exactly_the_output_path() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("flyer.pdf");
    fake_pdf(&input, 1, &[]);
    let out_dir = work.path().join("out");
    let output = out_dir.join("flyer.png");

    let outcome = converter(work.path()).convert(&input, "pdf", "png", &output);

    assert!(outcome.succeeded, "{outcome:?}");
    assert_eq!(outcome.output_paths, vec![output.clone()]);
    assert!(outcome.manifest.is_none());
    assert_eq!(entries(&out_dir), vec!["flyer.png"]);
    assert_no_scratch_left(work.path());
}

#[test]
fn multi_page_pdf_fans_out_with_manifest() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("deck.pdf");
    fake_pdf(&input, 3, &[]);
    let out_dir = work.path().join("out");

    let outcome = converter(work.path()).convert(&input, "pdf", "jpg", &out_dir.join("deck.jpg"));

    assert!(outcome.succeeded, "{outcome:?}");
    assert_eq!(
        entries(&out_dir),
        vec!["deck-manifest.json", "deck-page-001.jpg", "deck-page-002.jpg", "deck-page-003.jpg"]
    );
    assert_eq!(outcome.output_paths.len(), 4);
    assert_eq!(outcome.output_paths[0], out_dir.join("deck-page-001.jpg"));
    assert_eq!(outcome.output_paths[3], out_dir.join("deck-manifest.json"));
    for p in &outcome.output_paths {
        assert!(std::fs::metadata(p).unwrap().len() > 0);
    }

    let raw = std::fs::read_to_string(out_dir.join("deck-manifest.json")).unwrap();
    let manifest: PageManifest = serde_json::from_str(&raw).unwrap();
    assert_eq!(manifest.page_count, 3);
    assert_eq!(manifest.succeeded_pages, 3);
    assert_eq!(manifest.target_format, Format::Jpg);
    assert_eq!(manifest.pages[1].file.as_deref(), Some("deck-page-002.jpg"));
    assert_no_scratch_left(work.path());
}

#[test]
fn page_ceiling_is_inclusive() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("book.pdf");
    fake_pdf(&input, 50, &[]);
    let out_dir = work.path().join("out");

    let outcome = converter(work.path()).convert(&input, "pdf", "png", &out_dir.join("book.png"));

    assert!(outcome.succeeded, "{outcome:?}");
    assert_eq!(outcome.output_paths.len(), 51);
    assert_eq!(entries(&out_dir).len(), 51);
}

#[test]
fn exceeding_the_page_ceiling_fails_before_page_work() {
    let work = tempfile::tempdir().unwrap();
    let mut cfg = config(work.path());
    cfg.pipeline.max_pages = 5;
    let input = work.path().join("tome.pdf");
    fake_pdf(&input, 9, &[]);
    let out_dir = work.path().join("out");

    let outcome = Converter::new(cfg)
        .unwrap()
        .convert(&input, "pdf", "png", &out_dir.join("tome.png"));

    assert!(!outcome.succeeded);
    assert_eq!(outcome.error_kind, Some(ErrorKind::PageCountExceeded));
    assert!(entries(&out_dir).is_empty());
    assert_no_scratch_left(work.path());
}

#[test]
fn one_bad_page_does_not_sink_the_rest() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("scan.pdf");
    fake_pdf(&input, 3, &[2]);
    let out_dir = work.path().join("out");

    let outcome = converter(work.path()).convert(&input, "pdf", "webp", &out_dir.join("scan.webp"));

    assert!(outcome.succeeded, "{outcome:?}");
    assert_eq!(
        entries(&out_dir),
        vec!["scan-manifest.json", "scan-page-001.webp", "scan-page-003.webp"]
    );
    let manifest = outcome.manifest.expect("manifest");
    assert_eq!(manifest.page_count, 3);
    assert_eq!(manifest.failed_pages, 1);
    assert!(!manifest.pages[1].ok);
    assert!(manifest.pages[1].error.is_some());
    assert!(manifest.pages[1].file.is_none());
    assert_no_scratch_left(work.path());
}

#[test]
fn every_page_failing_fails_the_conversion() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("void.pdf");
    fake_pdf(&input, 2, &[1, 2]);
    let out_dir = work.path().join("out");

    let outcome = converter(work.path()).convert(&input, "pdf", "png", &out_dir.join("void.png"));

    assert!(!outcome.succeeded);
    assert_eq!(outcome.error_kind, Some(ErrorKind::ProcessExitedNonZero));
    assert!(entries(&out_dir).is_empty());
    assert_no_scratch_left(work.path());
}

#[test]
fn empty_pdf_produces_nothing() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("blank.pdf");
    fake_pdf(&input, 0, &[]);

    let output = work.path().join("blank.png");
    let outcome = converter(work.path()).convert(&input, "pdf", "png", &output);

    assert_eq!(outcome.error_kind, Some(ErrorKind::OutputNotProduced));
    assert_no_scratch_left(work.path());
}

#[test]
fn repeated_conversions_are_independent() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("logo.png");
    std::fs::write(&input, "pixels").unwrap();
    let conv = converter(work.path());
    let first = work.path().join("a/logo.jpg");
    let second = work.path().join("b/logo.jpg");

    let one = conv.convert(&input, "png", "jpg", &first);
    let two = conv.convert(&input, "png", "jpg", &second);

    assert!(one.succeeded && two.succeeded);
    assert_eq!(one.output_paths, vec![first.clone()]);
    assert_eq!(two.output_paths, vec![second.clone()]);
    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[test]
fn concurrent_document_conversions_do_not_collide() {
    let work = tempfile::tempdir().unwrap();
    let conv = std::sync::Arc::new(converter(work.path()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let conv = conv.clone();
            let dir = work.path().to_path_buf();
            std::thread::spawn(move || {
                let input = dir.join(format!("memo{i}.docx"));
                std::fs::write(&input, format!("memo {i}")).unwrap();
                conv.convert(&input, "docx", "pdf", &dir.join(format!("out/memo{i}.pdf")))
            })
        })
        .collect();

    for (i, h) in handles.into_iter().enumerate() {
        let outcome = h.join().unwrap();
        assert!(outcome.succeeded, "{outcome:?}");
        let body = std::fs::read_to_string(&outcome.output_paths[0]).unwrap();
        assert!(body.contains(&format!("memo {i}")));
    }
    assert_no_scratch_left(work.path());
}

#[test]
fn cancelled_request_reports_cancelled() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("deck.pdf");
    fake_pdf(&input, 2, &[]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let req = ConversionRequest {
        input,
        source: Format::Pdf,
        target: Format::Png,
        output: work.path().join("out/deck.png"),
    };
    let outcome = converter(work.path()).convert_with_cancel(&req, &cancel);

    assert_eq!(outcome.error_kind, Some(ErrorKind::Cancelled));
    assert!(entries(&work.path().join("out")).is_empty());
    assert_no_scratch_left(work.path());
}
