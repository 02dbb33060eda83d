use filemorph::Converter;
use filemorph::config::Config;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn rejected_identifiers_still_log_a_start_event() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    let work = tempfile::tempdir().unwrap();
    let converter = Converter::new(Config::default()).unwrap();
    let outcome = tracing::subscriber::with_default(subscriber, || {
        converter.convert(
            &work.path().join("a.xyz"),
            "xyz",
            "png",
            &work.path().join("a.png"),
        )
    });
    assert!(!outcome.succeeded);

    let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    let started = logs.find("conversion started").expect("start event");
    let rejected = logs.find("conversion rejected").expect("rejection event");
    assert!(started < rejected, "{logs}");
    assert!(logs.contains("source=\"xyz\"") || logs.contains("source=xyz"), "{logs}");
}
