use crate::config::Config;
use crate::format::{ConversionPair, Format};
use crate::outcome::{ConversionError, ConversionOutcome, ConversionRequest, ErrorKind};
use crate::probe::AvailabilityEntry;
use crate::process::CancelToken;
use crate::registry::StrategyRegistry;
use crate::strategy::StrategyContext;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Entry point for callers: resolves a strategy and runs it.
pub struct Converter {
    registry: StrategyRegistry,
}

impl Converter {
    pub fn new(config: Config) -> Result<Self, ConversionError> {
        config.validate()?;
        let ctx = Arc::new(StrategyContext::new(config));
        Ok(Self::with_registry(StrategyRegistry::with_defaults(ctx)))
    }

    pub fn with_registry(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn convert(
        &self,
        input: &Path,
        source: &str,
        target: &str,
        output: &Path,
    ) -> ConversionOutcome {
        let started = Instant::now();
        info!(
            source,
            target,
            input = %input.display(),
            output = %output.display(),
            "conversion started"
        );
        let parsed = Format::parse(source).zip(Format::parse(target));
        let Some((source_fmt, target_fmt)) = parsed else {
            let err = ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("unsupported conversion: {source} -> {target}"),
            );
            warn!(
                input = %input.display(),
                kind = %err.kind,
                "conversion rejected: {}",
                err.message
            );
            return ConversionOutcome::failure(err, started.elapsed());
        };
        let req = ConversionRequest {
            input: input.to_path_buf(),
            source: source_fmt,
            target: target_fmt,
            output: output.to_path_buf(),
        };
        self.run(&req, &CancelToken::new(), started)
    }

    pub fn convert_with_cancel(
        &self,
        req: &ConversionRequest,
        cancel: &CancelToken,
    ) -> ConversionOutcome {
        let started = Instant::now();
        info!(
            source = %req.source,
            target = %req.target,
            input = %req.input.display(),
            output = %req.output.display(),
            "conversion started"
        );
        self.run(req, cancel, started)
    }

    fn run(
        &self,
        req: &ConversionRequest,
        cancel: &CancelToken,
        started: Instant,
    ) -> ConversionOutcome {
        let pair = ConversionPair::new(req.source, req.target);
        let strategy = match self.registry.resolve_pair(pair) {
            Ok(s) => s,
            Err(err) => {
                warn!(%pair, kind = %err.kind, "conversion rejected: {}", err.message);
                return ConversionOutcome::failure(err, started.elapsed());
            }
        };

        let outcome = strategy.execute(&req.input, &req.output, cancel);
        if outcome.succeeded {
            info!(
                %pair,
                strategy = strategy.name(),
                outputs = outcome.output_paths.len(),
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "conversion succeeded"
            );
        } else {
            warn!(
                %pair,
                strategy = strategy.name(),
                kind = ?outcome.error_kind,
                error = outcome.error_message.as_deref().unwrap_or(""),
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "conversion failed"
            );
        }
        outcome
    }

    pub fn list_supported_conversions(&self) -> Vec<ConversionPair> {
        self.registry.list_supported()
    }

    /// Probes every tool the registry relies on and returns the cache contents.
    pub fn doctor(&self) -> Vec<AvailabilityEntry> {
        let probe = &self.registry.context().probe;
        for key in self.registry.referenced_tools() {
            probe.is_available(key);
        }
        probe.snapshot()
    }
}
