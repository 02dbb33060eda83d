use super::{
    ConversionStrategy, StrategyContext, check_input, move_into_place, prepare_output,
    require_output,
};
use crate::format::{ConversionPair, Format};
use crate::outcome::{ConversionError, ConversionOutcome, ErrorKind};
use crate::probe::{Tool, ToolKey};
use crate::process::{CancelToken, ToolCommand};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Office document to PDF through headless LibreOffice.
///
/// Every run gets its own profile directory: concurrent `soffice` processes
/// sharing a user installation corrupt it or block on its lock file.
pub struct DocumentConversion {
    ctx: Arc<StrategyContext>,
    pair: ConversionPair,
}

impl DocumentConversion {
    pub fn new(
        ctx: Arc<StrategyContext>,
        source: Format,
        target: Format,
    ) -> Result<Self, ConversionError> {
        if target != Format::Pdf {
            return Err(ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("document conversion only produces pdf, not {target}"),
            ));
        }
        if !source.is_office_document() {
            return Err(ConversionError::new(
                ErrorKind::UnsupportedConversion,
                format!("{source} is not an office document"),
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
    ) -> Result<Vec<PathBuf>, ConversionError> {
        check_input(input)?;
        self.verify_tool_available()?;
        prepare_output(output)?;

        let scratch = self.ctx.scratch("filemorph-doc-")?;
        let profile = scratch.subdir("profile")?;
        let out_dir = scratch.subdir("out")?;

        let cmd = soffice_command(self.ctx.binary(Tool::Soffice), input, &profile, &out_dir);
        let out = self
            .ctx
            .run_checked(&cmd, self.ctx.config.timeouts.document(), cancel)?;
        debug!(elapsed = ?out.elapsed, stdout = %out.stdout.trim(), "soffice finished");

        let produced = locate_pdf(&out_dir, input)?;
        require_output(&produced)?;
        move_into_place(&produced, output)?;
        require_output(output)?;
        Ok(vec![output.to_path_buf()])
    }
}

impl ConversionStrategy for DocumentConversion {
    fn name(&self) -> &'static str {
        "document"
    }

    fn pair(&self) -> ConversionPair {
        self.pair
    }

    fn required_tools(&self) -> Vec<ToolKey> {
        vec![ToolKey::tool(Tool::Soffice)]
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

fn soffice_command(binary: &str, input: &Path, profile: &Path, out_dir: &Path) -> ToolCommand {
    ToolCommand::new(binary)
        .arg(format!("-env:UserInstallation={}", file_url(profile)))
        .args([
            "--headless",
            "--invisible",
            "--nologo",
            "--nodefault",
            "--nofirststartwizard",
            "--nolockcheck",
            "--norestore",
            "--convert-to",
            "pdf",
            "--outdir",
        ])
        .arg(out_dir.as_os_str())
        .arg(input.as_os_str())
}

fn file_url(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let s = abs.to_string_lossy().replace('\\', "/").replace(' ', "%20");
    if s.starts_with('/') {
        format!("file://{s}")
    } else {
        format!("file:///{s}")
    }
}

/// Expected `{stem}.pdf`, else the first `*.pdf` LibreOffice left behind.
fn locate_pdf(out_dir: &Path, input: &Path) -> Result<PathBuf, ConversionError> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expected = out_dir.join(format!("{stem}.pdf"));
    if expected.is_file() {
        return Ok(expected);
    }

    let pdf = Regex::new(r"(?i)\.pdf$").map_err(|e| {
        ConversionError::new(ErrorKind::OutputNotProduced, e.to_string())
    })?;
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter(|p| p.file_name().is_some_and(|n| pdf.is_match(&n.to_string_lossy())))
                .collect()
        })
        .unwrap_or_default();
    candidates.sort();

    match candidates.into_iter().next() {
        Some(found) => {
            warn!("expected {} missing; using {}", expected.display(), found.display());
            Ok(found)
        }
        None => Err(ConversionError::new(
            ErrorKind::OutputNotProduced,
            format!("soffice produced no pdf for {}", input.display()),
        )),
    }
}
