use super::{
    ConversionStrategy, StrategyContext, check_input, move_into_place, prepare_output,
    require_output,
};
use crate::config::Raster;
use crate::format::{ConversionPair, Format};
use crate::outcome::{ConversionError, ConversionOutcome, ErrorKind};
use crate::probe::{Tool, ToolKey};
use crate::process::{CancelToken, ToolCommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Formats ImageMagick writes for us.
pub const RASTER_TARGETS: [Format; 6] = [
    Format::Jpg,
    Format::Png,
    Format::Webp,
    Format::Tiff,
    Format::Avif,
    Format::Gif,
];

/// Single `magick` invocation from one raster format to another.
pub struct RasterConversion {
    ctx: Arc<StrategyContext>,
    pair: ConversionPair,
}

impl RasterConversion {
    pub fn new(
        ctx: Arc<StrategyContext>,
        source: Format,
        target: Format,
    ) -> Result<Self, ConversionError> {
        if !source.is_raster() {
            return Err(ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("{source} is not a raster source"),
            ));
        }
        if !RASTER_TARGETS.contains(&target) || source == target {
            return Err(ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("raster conversion cannot produce {target} from {source}"),
            ));
        }
        Ok(Self {
            ctx,
            pair: ConversionPair::new(source, target),
        })
    }

    /// `magick` writes into scratch; a killed or failing run never leaves a
    /// truncated file at `output`.
    fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        check_input(input)?;
        self.verify_tool_available()?;
        prepare_output(output)?;

        let scratch = self.ctx.scratch("filemorph-img-")?;
        let staged = scratch.path().join(format!("out.{}", self.pair.target.extension()));
        let cmd = magick_command(
            self.ctx.binary(Tool::Magick),
            input,
            &staged,
            self.pair.target,
            &self.ctx.config.raster,
        );
        let out = self
            .ctx
            .run_checked(&cmd, self.ctx.config.timeouts.image(), cancel)?;
        debug!(elapsed = ?out.elapsed, "magick finished {}", self.pair);

        require_output(&staged)?;
        move_into_place(&staged, output)?;
        require_output(output)?;
        Ok(vec![output.to_path_buf()])
    }
}

impl ConversionStrategy for RasterConversion {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn pair(&self) -> ConversionPair {
        self.pair
    }

    fn required_tools(&self) -> Vec<ToolKey> {
        vec![
            ToolKey::tool(Tool::Magick),
            ToolKey::reads(Tool::Magick, self.pair.source),
            ToolKey::writes(Tool::Magick, self.pair.target),
        ]
    }

    fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    fn execute(&self, input: &Path, output: &Path, cancel: &CancelToken) -> ConversionOutcome {
        let started = Instant::now();
        match self.convert(input, output, cancel) {
            Ok(paths) => ConversionOutcome::success(paths, started.elapsed()),
            Err(err) => ConversionOutcome::failure(err, started.elapsed()),
        }
    }
}

/// `magick in[0] <normalize> <target options> FMT:out`
pub(crate) fn magick_command(
    binary: &str,
    input: &Path,
    output: &Path,
    target: Format,
    opts: &Raster,
) -> ToolCommand {
    let mut source = input.as_os_str().to_os_string();
    source.push("[0]");
    let mut dest = std::ffi::OsString::from(format!("{}:", target.magick_name()));
    dest.push(output.as_os_str());

    ToolCommand::new(binary)
        .arg(source)
        .args(finishing_args(opts, target))
        .arg(dest)
}

pub(crate) fn finishing_args(opts: &Raster, target: Format) -> Vec<String> {
    let mut args: Vec<String> = vec!["-auto-orient".into()];
    if opts.strip_metadata {
        args.push("-strip".into());
    }
    if !opts.colorspace.is_empty() {
        args.extend(["-colorspace".into(), opts.colorspace.clone()]);
    }
    match target {
        Format::Jpg => {
            args.extend(
                ["-background", "white", "-alpha", "remove", "-alpha", "off"]
                    .map(String::from),
            );
            args.extend(["-quality".into(), opts.jpeg_quality.to_string()]);
            args.extend(["-sampling-factor", "4:2:0", "-interlace", "JPEG"].map(String::from));
        }
        Format::Png => {
            args.extend([
                "-define".into(),
                format!("png:compression-level={}", opts.png_compression_level),
            ]);
        }
        Format::Webp => {
            args.extend(["-quality".into(), opts.webp_quality.to_string()]);
            args.extend(["-define", "webp:method=6"].map(String::from));
        }
        Format::Avif => {
            args.extend(["-quality".into(), opts.avif_quality.to_string()]);
        }
        Format::Tiff => {
            args.extend(["-compress".into(), opts.tiff_compression.clone()]);
        }
        _ => {}
    }
    args
}
