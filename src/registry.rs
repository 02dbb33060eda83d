use crate::format::{ConversionPair, Format};
use crate::outcome::{ConversionError, ErrorKind};
use crate::probe::{Tool, ToolKey};
use crate::strategy::pipeline::PIPELINE_TARGETS;
use crate::strategy::raster::RASTER_TARGETS;
use crate::strategy::{
    ConversionStrategy, DocumentConversion, PdfRasterPipeline, RasterConversion, StrategyContext,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub type StrategyConstructor = Arc<
    dyn Fn(&Arc<StrategyContext>) -> Result<Box<dyn ConversionStrategy>, ConversionError>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct StrategyDescriptor {
    pub pair: ConversionPair,
    pub tools: Vec<Tool>,
    constructor: StrategyConstructor,
}

const RASTER_SOURCES: [Format; 8] = [
    Format::Heic,
    Format::Jpg,
    Format::Png,
    Format::Webp,
    Format::Gif,
    Format::Tiff,
    Format::Bmp,
    Format::Avif,
];

const DOCUMENT_SOURCES: [Format; 11] = [
    Format::Docx,
    Format::Doc,
    Format::Odt,
    Format::Rtf,
    Format::Txt,
    Format::Xlsx,
    Format::Xls,
    Format::Ods,
    Format::Pptx,
    Format::Ppt,
    Format::Odp,
];

/// (source, target) → strategy constructor. Filled once, then only read.
pub struct StrategyRegistry {
    ctx: Arc<StrategyContext>,
    entries: HashMap<ConversionPair, StrategyDescriptor>,
}

impl StrategyRegistry {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self {
            ctx,
            entries: HashMap::new(),
        }
    }

    /// Registry populated with every built-in conversion.
    pub fn with_defaults(ctx: Arc<StrategyContext>) -> Self {
        let mut reg = Self::new(ctx);

        for source in RASTER_SOURCES {
            for target in RASTER_TARGETS {
                if source == target {
                    continue;
                }
                reg.register(source, target, vec![Tool::Magick], move |ctx| {
                    Ok(Box::new(RasterConversion::new(ctx.clone(), source, target)?))
                });
            }
        }

        for source in DOCUMENT_SOURCES {
            reg.register(source, Format::Pdf, vec![Tool::Soffice], move |ctx| {
                Ok(Box::new(DocumentConversion::new(ctx.clone(), source, Format::Pdf)?))
            });
        }

        for target in PIPELINE_TARGETS {
            reg.register(
                Format::Pdf,
                target,
                vec![Tool::Ghostscript, Tool::Magick],
                move |ctx| Ok(Box::new(PdfRasterPipeline::new(ctx.clone(), Format::Pdf, target)?)),
            );
        }

        debug!(pairs = reg.entries.len(), "registered default strategies");
        reg
    }

    pub fn context(&self) -> &Arc<StrategyContext> {
        &self.ctx
    }

    /// Adds or replaces the constructor for a pair.
    pub fn register<F>(&mut self, source: Format, target: Format, tools: Vec<Tool>, constructor: F)
    where
        F: Fn(&Arc<StrategyContext>) -> Result<Box<dyn ConversionStrategy>, ConversionError>
            + Send
            + Sync
            + 'static,
    {
        let pair = ConversionPair::new(source, target);
        self.entries.insert(
            pair,
            StrategyDescriptor {
                pair,
                tools,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Case-folded lookup by format identifiers.
    pub fn resolve(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Box<dyn ConversionStrategy>, ConversionError> {
        let unsupported = || {
            ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("unsupported conversion: {source} -> {target}"),
            )
        };
        let source = Format::parse(source).ok_or_else(unsupported)?;
        let target = Format::parse(target).ok_or_else(unsupported)?;
        self.resolve_pair(ConversionPair::new(source, target))
    }

    pub fn resolve_pair(
        &self,
        pair: ConversionPair,
    ) -> Result<Box<dyn ConversionStrategy>, ConversionError> {
        let descriptor = self.entries.get(&pair).ok_or_else(|| {
            ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("unsupported conversion: {pair}"),
            )
        })?;
        (descriptor.constructor)(&self.ctx).map_err(|err| {
            ConversionError::new(
                ErrorKind::ConfigurationInvalid,
                format!("strategy unavailable for {pair}: {}", err.message),
            )
        })
    }

    pub fn list_supported(&self) -> Vec<ConversionPair> {
        let mut pairs: Vec<ConversionPair> = self.entries.keys().copied().collect();
        pairs.sort();
        pairs
    }

    /// Base tool keys referenced by any registered strategy.
    pub fn referenced_tools(&self) -> Vec<ToolKey> {
        let mut tools: Vec<Tool> = self
            .entries
            .values()
            .flat_map(|d| d.tools.iter().copied())
            .collect();
        tools.sort_by_key(|t| t.to_string());
        tools.dedup();
        tools.into_iter().map(ToolKey::tool).collect()
    }
}
