//! PDF to raster in two stages.
//!
//! Stage 1 renders pages with Ghostscript into `page-NNN.png` inside a scratch
//! directory. Stage 2 runs `magick` on each page for format-specific
//! finishing. Finished pages are staged in the scratch directory too and only
//! moved next to the requested output once the run has produced something,
//! so a refused or fully failed run leaves no files behind.

use super::raster::magick_command;
use super::{
    ConversionStrategy, StrategyContext, check_input, move_into_place, prepare_output,
    require_output,
};
use crate::format::{ConversionPair, Format};
use crate::manifest::{PageEntry, PageManifest};
use crate::outcome::{ConversionError, ConversionOutcome, ErrorKind};
use crate::probe::{Tool, ToolKey};
use crate::process::{CancelToken, ToolCommand};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const PIPELINE_TARGETS: [Format; 4] = [Format::Jpg, Format::Png, Format::Webp, Format::Tiff];

pub struct PdfRasterPipeline {
    ctx: Arc<StrategyContext>,
    pair: ConversionPair,
}

enum Produced {
    Single(PathBuf),
    Pages {
        paths: Vec<PathBuf>,
        manifest: PageManifest,
    },
}

impl PdfRasterPipeline {
    pub fn new(
        ctx: Arc<StrategyContext>,
        source: Format,
        target: Format,
    ) -> Result<Self, ConversionError> {
        if source != Format::Pdf {
            return Err(ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("page rasterization needs a pdf source, not {source}"),
            ));
        }
        if !PIPELINE_TARGETS.contains(&target) {
            return Err(ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("page rasterization cannot produce {target}"),
            ));
        }
        Ok(Self {
            ctx,
            pair: ConversionPair::new(source, target),
        })
    }

    fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> Result<Produced, ConversionError> {
        check_input(input)?;
        self.verify_tool_available()?;
        prepare_output(output)?;

        let scratch = self.ctx.scratch("filemorph-pdf-")?;
        let pages_dir = scratch.subdir("pages")?;
        let staged_dir = scratch.subdir("staged")?;

        let pages = self.rasterize(input, &pages_dir, cancel)?;
        let max_pages = self.ctx.config.pipeline.max_pages as usize;
        if pages.len() > max_pages {
            return Err(ConversionError::new(
                ErrorKind::PageCountExceeded,
                format!("document has more than {max_pages} pages"),
            ));
        }
        info!(pages = pages.len(), "rasterized {}", input.display());

        if let [page] = pages.as_slice() {
            let staged = staged_dir.join(format!("page-001.{}", self.pair.target.extension()));
            self.finish_page(page, &staged, cancel)?;
            move_into_place(&staged, output)?;
            require_output(output)?;
            return Ok(Produced::Single(output.to_path_buf()));
        }

        self.fan_out(input, output, &pages, &staged_dir, cancel)
    }

    /// Renders at most `max_pages + 1` pages so an oversized document is
    /// detected without rendering all of it.
    fn rasterize(
        &self,
        input: &Path,
        pages_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let cfg = &self.ctx.config;
        let mut output_arg = std::ffi::OsString::from("-sOutputFile=");
        output_arg.push(pages_dir.join("page-%03d.png"));
        let cmd = ToolCommand::new(self.ctx.binary(Tool::Ghostscript))
            .args([
                "-dSAFER",
                "-dBATCH",
                "-dNOPAUSE",
                "-dQUIET",
                "-sDEVICE=png16m",
                "-dTextAlphaBits=4",
                "-dGraphicsAlphaBits=4",
            ])
            .arg(format!("-r{}", cfg.pipeline.density_dpi))
            .arg("-dFirstPage=1")
            .arg(format!("-dLastPage={}", cfg.pipeline.max_pages + 1))
            .arg(output_arg)
            .arg(input.as_os_str());

        let out = self.ctx.run_checked(&cmd, cfg.timeouts.rasterize(), cancel)?;
        debug!(elapsed = ?out.elapsed, "ghostscript finished");

        let pages = collect_pages(pages_dir);
        if pages.is_empty() {
            return Err(ConversionError::new(
                ErrorKind::OutputNotProduced,
                format!("ghostscript rendered no pages from {}", input.display()),
            ));
        }
        Ok(pages)
    }

    fn finish_page(
        &self,
        page: &Path,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<(), ConversionError> {
        let cmd = magick_command(
            self.ctx.binary(Tool::Magick),
            page,
            dest,
            self.pair.target,
            &self.ctx.config.raster,
        );
        self.ctx
            .run_checked(&cmd, self.ctx.config.timeouts.image(), cancel)?;
        require_output(dest)
    }

    fn fan_out(
        &self,
        input: &Path,
        output: &Path,
        pages: &[PathBuf],
        staged_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Produced, ConversionError> {
        let ext = self.pair.target.extension();
        let base = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let out_dir = output.parent().unwrap_or_else(|| Path::new(""));

        let mut entries = Vec::with_capacity(pages.len());
        let mut finished = Vec::new();
        let mut first_err: Option<ConversionError> = None;

        for (i, page) in pages.iter().enumerate() {
            let number = i as u32 + 1;
            let name = format!("{base}-page-{number:03}.{ext}");
            let staged = staged_dir.join(&name);
            match self.finish_page(page, &staged, cancel) {
                Ok(()) => {
                    entries.push(PageEntry {
                        page: number,
                        file: Some(name.clone()),
                        ok: true,
                        error: None,
                    });
                    finished.push((staged, out_dir.join(&name)));
                }
                Err(err) if err.kind == ErrorKind::Cancelled => return Err(err),
                Err(err) => {
                    warn!(page = number, "page failed: {err}");
                    entries.push(PageEntry {
                        page: number,
                        file: None,
                        ok: false,
                        error: Some(err.to_string()),
                    });
                    first_err.get_or_insert(err);
                }
            }
        }

        if finished.is_empty() {
            return Err(first_err.unwrap_or_else(|| {
                ConversionError::new(ErrorKind::OutputNotProduced, "no page was converted")
            }));
        }

        let mut paths = Vec::with_capacity(finished.len() + 1);
        for (from, to) in &finished {
            if let Err(err) = move_into_place(from, to) {
                remove_all(&paths);
                return Err(err);
            }
            paths.push(to.clone());
        }

        let manifest = PageManifest::new(input.display().to_string(), self.pair.target, entries);
        let manifest_path = out_dir.join(format!("{base}-manifest.json"));
        let written = serde_json::to_string_pretty(&manifest)
            .map_err(|e| e.to_string())
            .and_then(|raw| std::fs::write(&manifest_path, raw).map_err(|e| e.to_string()));
        if let Err(err) = written {
            remove_all(&paths);
            return Err(ConversionError::new(
                ErrorKind::OutputNotProduced,
                format!("writing manifest {}: {err}", manifest_path.display()),
            ));
        }
        paths.push(manifest_path);

        if manifest.failed_pages > 0 {
            warn!(
                failed = manifest.failed_pages,
                total = manifest.page_count,
                "partial conversion of {}",
                input.display()
            );
        }
        Ok(Produced::Pages { paths, manifest })
    }
}

impl ConversionStrategy for PdfRasterPipeline {
    fn name(&self) -> &'static str {
        "pdf-raster-pipeline"
    }

    fn pair(&self) -> ConversionPair {
        self.pair
    }

    fn required_tools(&self) -> Vec<ToolKey> {
        vec![
            ToolKey::tool(Tool::Ghostscript),
            ToolKey::tool(Tool::Magick),
            ToolKey::writes(Tool::Magick, self.pair.target),
        ]
    }

    fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    fn execute(&self, input: &Path, output: &Path, cancel: &CancelToken) -> ConversionOutcome {
        let started = Instant::now();
        match self.convert(input, output, cancel) {
            Ok(Produced::Single(path)) => ConversionOutcome::success(vec![path], started.elapsed()),
            Ok(Produced::Pages { paths, manifest }) => {
                ConversionOutcome::fan_out(paths, manifest, started.elapsed())
            }
            Err(err) => ConversionOutcome::failure(err, started.elapsed()),
        }
    }
}

/// `page-NNN.png` files ordered by page number.
fn collect_pages(dir: &Path) -> Vec<PathBuf> {
    let Ok(re) = Regex::new(r"^page-(\d+)\.png$") else {
        return Vec::new();
    };
    let Ok(rd) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut numbered: Vec<(u32, PathBuf)> = rd
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let n = re.captures(&name)?.get(1)?.as_str().parse().ok()?;
            Some((n, e.path()))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);
    numbered.into_iter().map(|(_, p)| p).collect()
}

fn remove_all(paths: &[PathBuf]) {
    for p in paths {
        crate::util::delete_file(p);
    }
}
