use crate::outcome::{ConversionError, ErrorKind};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `FILEMORPH__TIMEOUTS__IMAGE_SECONDS=90`.
pub const ENV_PREFIX: &str = "FILEMORPH__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default)]
    pub raster: Raster,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Loads defaults, then the TOML file, then `FILEMORPH__*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        Settings::load(path)?.config()
    }

    pub fn validate(&self) -> std::result::Result<(), ConversionError> {
        let invalid = |msg: String| Err(ConversionError::new(ErrorKind::ConfigurationInvalid, msg));

        for (name, value) in [
            ("tools.magick", &self.tools.magick),
            ("tools.soffice", &self.tools.soffice),
            ("tools.ghostscript", &self.tools.ghostscript),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{name} must not be empty"));
            }
        }
        for (name, secs) in [
            ("timeouts.image_seconds", self.timeouts.image_seconds),
            ("timeouts.document_seconds", self.timeouts.document_seconds),
            ("timeouts.rasterize_seconds", self.timeouts.rasterize_seconds),
            ("timeouts.probe_seconds", self.timeouts.probe_seconds),
        ] {
            if secs == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if self.runner.poll_interval_ms == 0 {
            return invalid("runner.poll_interval_ms must be greater than zero".into());
        }
        for (name, q) in [
            ("raster.jpeg_quality", self.raster.jpeg_quality),
            ("raster.webp_quality", self.raster.webp_quality),
            ("raster.avif_quality", self.raster.avif_quality),
        ] {
            if !(1..=100).contains(&q) {
                return invalid(format!("{name} must be within 1..=100, got {q}"));
            }
        }
        if self.raster.png_compression_level > 9 {
            return invalid(format!(
                "raster.png_compression_level must be within 0..=9, got {}",
                self.raster.png_compression_level
            ));
        }
        if self.pipeline.max_pages == 0 {
            return invalid("pipeline.max_pages must be at least 1".into());
        }
        if self.pipeline.density_dpi == 0 {
            return invalid("pipeline.density_dpi must be greater than zero".into());
        }
        Ok(())
    }

    /// Root directory for per-invocation scratch directories.
    pub fn work_dir(&self) -> PathBuf {
        if self.paths.work_dir.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.paths.work_dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tools {
    pub magick: String,
    pub soffice: String,
    pub ghostscript: String,
}
impl Default for Tools {
    fn default() -> Self {
        Self {
            magick: "magick".into(),
            soffice: "soffice".into(),
            ghostscript: "gs".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub image_seconds: u64,
    pub document_seconds: u64,
    pub rasterize_seconds: u64,
    pub probe_seconds: u64,
}
impl Default for Timeouts {
    fn default() -> Self {
        Self {
            image_seconds: 60,
            document_seconds: 180,
            rasterize_seconds: 300,
            probe_seconds: 10,
        }
    }
}
impl Timeouts {
    pub fn image(&self) -> Duration {
        Duration::from_secs(self.image_seconds)
    }
    pub fn document(&self) -> Duration {
        Duration::from_secs(self.document_seconds)
    }
    pub fn rasterize(&self) -> Duration {
        Duration::from_secs(self.rasterize_seconds)
    }
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub poll_interval_ms: u64,
    pub drain_grace_ms: u64,
}
impl Default for Runner {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            drain_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    pub jpeg_quality: u32,
    pub webp_quality: u32,
    pub avif_quality: u32,
    pub png_compression_level: u32,
    pub tiff_compression: String,
    pub strip_metadata: bool,
    pub colorspace: String,
}
impl Default for Raster {
    fn default() -> Self {
        Self {
            jpeg_quality: 85,
            webp_quality: 80,
            avif_quality: 60,
            png_compression_level: 9,
            tiff_compression: "LZW".into(),
            strip_metadata: true,
            colorspace: "sRGB".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub max_pages: u32,
    pub density_dpi: u32,
}
impl Default for Pipeline {
    fn default() -> Self {
        Self {
            max_pages: 50,
            density_dpi: 150,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Probe {
    /// 0 keeps probe results for the lifetime of the process.
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub work_dir: String,
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            work_dir: "".into(),
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

/// Layered settings store: defaults < file < environment.
#[derive(Debug, Clone)]
pub struct Settings {
    root: toml::Table,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?
        } else {
            String::new()
        };
        Self::from_sources(&raw, std::env::vars())
    }

    pub fn from_sources<I>(file_toml: &str, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let defaults = toml::to_string(&Config::default()).with_context(|| "serializing defaults")?;
        let mut root: toml::Table = defaults.parse().with_context(|| "parsing defaults")?;

        let file: toml::Table = file_toml.parse().with_context(|| "parsing TOML")?;
        merge(&mut root, file);

        for (key, raw) in env {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<String> = rest
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect();
            if segments.is_empty() {
                continue;
            }
            set_path(&mut root, &segments, parse_env_value(&raw));
        }

        Ok(Self { root })
    }

    pub fn config(&self) -> Result<Config> {
        let raw = toml::to_string(&self.root).with_context(|| "serializing merged settings")?;
        toml::from_str(&raw).with_context(|| "parsing merged settings")
    }

    /// Dot-path lookup (`"timeouts.image_seconds"`); falls back to `default`
    /// when the key is missing or has the wrong type.
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let mut segments = key.split('.');
        let Some(mut value) = segments.next().and_then(|first| self.root.get(first)) else {
            return default;
        };
        for seg in segments {
            match value.get(seg) {
                Some(v) => value = v,
                None => return default,
            }
        }

        #[derive(Deserialize)]
        struct Wrap<T> {
            v: T,
        }
        let mut wrap = toml::Table::new();
        wrap.insert("v".into(), value.clone());
        toml::to_string(&wrap)
            .ok()
            .and_then(|s| toml::from_str::<Wrap<T>>(&s).ok())
            .map(|w| w.v)
            .unwrap_or(default)
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (k, v) in overlay {
        if let toml::Value::Table(src) = v {
            if let Some(toml::Value::Table(dst)) = base.get_mut(&k) {
                merge(dst, src);
                continue;
            }
            base.insert(k, toml::Value::Table(src));
        } else {
            base.insert(k, v);
        }
    }
}

fn set_path(root: &mut toml::Table, segments: &[String], value: toml::Value) {
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut table = root;
    for seg in parents {
        let entry = table
            .entry(seg.clone())
            .or_insert(toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        table = match entry {
            toml::Value::Table(t) => t,
            _ => return,
        };
    }
    table.insert(last.clone(), value);
}

fn parse_env_value(raw: &str) -> toml::Value {
    format!("v = {raw}")
        .parse::<toml::Table>()
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}
