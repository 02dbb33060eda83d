//! Memoized tool availability checks.
//!
//! Probing is advisory: every failure mode collapses to `false` and a log
//! line. Results are cached per [`ToolKey`]; concurrent lookups for the same
//! key wait for the first probe instead of spawning duplicates.

use crate::config::{Config, Tools};
use crate::format::Format;
use crate::process::{ProcessRunner, ToolCommand};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Magick,
    Soffice,
    Ghostscript,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tool::Magick => "magick",
            Tool::Soffice => "soffice",
            Tool::Ghostscript => "ghostscript",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read(Format),
    Write(Format),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ToolKey {
    pub tool: Tool,
    pub capability: Option<Capability>,
}

impl ToolKey {
    pub fn tool(tool: Tool) -> Self {
        Self {
            tool,
            capability: None,
        }
    }

    pub fn reads(tool: Tool, format: Format) -> Self {
        Self {
            tool,
            capability: Some(Capability::Read(format)),
        }
    }

    pub fn writes(tool: Tool, format: Format) -> Self {
        Self {
            tool,
            capability: Some(Capability::Write(format)),
        }
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capability {
            None => write!(f, "{}", self.tool),
            Some(Capability::Read(fmt)) => write!(f, "{}:read:{}", self.tool, fmt),
            Some(Capability::Write(fmt)) => write!(f, "{}:write:{}", self.tool, fmt),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityEntry {
    pub key: ToolKey,
    pub available: bool,
    pub probed_at: String,
    #[serde(skip)]
    checked: Instant,
}

pub struct ToolProbe {
    runner: ProcessRunner,
    tools: Tools,
    timeout: Duration,
    ttl: Option<Duration>,
    cache: RwLock<HashMap<ToolKey, AvailabilityEntry>>,
    in_flight: Mutex<HashMap<ToolKey, Arc<Mutex<()>>>>,
}

impl ToolProbe {
    pub fn new(cfg: &Config, runner: ProcessRunner) -> Self {
        let ttl = match cfg.probe.cache_ttl_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            runner,
            tools: cfg.tools.clone(),
            timeout: cfg.timeouts.probe().min(Duration::from_secs(10)),
            ttl,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_available(&self, key: ToolKey) -> bool {
        if let Some(hit) = self.cached(key) {
            return hit;
        }

        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.entry(key).or_default().clone()
        };
        let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());

        // Another caller may have finished the probe while we waited.
        if let Some(hit) = self.cached(key) {
            return hit;
        }

        let available = self.probe(key);
        let entry = AvailabilityEntry {
            key,
            available,
            probed_at: crate::util::now_rfc3339(),
            checked: Instant::now(),
        };
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
        available
    }

    pub fn invalidate(&self, key: ToolKey) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    pub fn clear(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn snapshot(&self) -> Vec<AvailabilityEntry> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<AvailabilityEntry> = cache.values().cloned().collect();
        entries.sort_by_key(|e| e.key.to_string());
        entries
    }

    fn cached(&self, key: ToolKey) -> Option<bool> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let entry = cache.get(&key)?;
        match self.ttl {
            Some(ttl) if entry.checked.elapsed() > ttl => None,
            _ => Some(entry.available),
        }
    }

    fn binary(&self, tool: Tool) -> &str {
        match tool {
            Tool::Magick => &self.tools.magick,
            Tool::Soffice => &self.tools.soffice,
            Tool::Ghostscript => &self.tools.ghostscript,
        }
    }

    fn probe(&self, key: ToolKey) -> bool {
        let program = self.binary(key.tool).to_string();
        let (cmd, marker) = match (key.tool, key.capability) {
            (Tool::Magick, None) => (ToolCommand::new(&program).arg("-version"), r"ImageMagick"),
            (Tool::Magick, Some(_)) => (ToolCommand::new(&program).args(["-list", "format"]), ""),
            (Tool::Soffice, _) => (
                ToolCommand::new(&program).arg("--version"),
                r"(?i)LibreOffice|OpenOffice",
            ),
            (Tool::Ghostscript, _) => (
                ToolCommand::new(&program).arg("--version"),
                r"(?m)^\s*\d+\.\d+",
            ),
        };

        let out = match self.runner.run(&cmd, self.timeout) {
            Ok(out) if out.success => out,
            Ok(out) => {
                warn!(%key, code = ?out.exit_code, "probe exited non-zero");
                return false;
            }
            Err(err) => {
                warn!(%key, "probe failed: {err}");
                return false;
            }
        };

        let available = match key.capability {
            Some(cap) => magick_supports(&out.stdout, cap),
            None => Regex::new(marker)
                .map(|re| re.is_match(&out.stdout) || re.is_match(&out.stderr))
                .unwrap_or(false),
        };
        if available {
            info!(%key, "tool available");
        } else {
            debug!(%key, "probe output lacks capability marker");
        }
        available
    }
}

/// Checks a row of `magick -list format`, e.g.
/// `     HEIC  HEIC      rw+   High Efficiency Image Format`.
fn magick_supports(listing: &str, cap: Capability) -> bool {
    let (format, mode_char) = match cap {
        Capability::Read(f) => (f, 'r'),
        Capability::Write(f) => (f, 'w'),
    };
    let pattern = format!(
        r"(?mi)^\s*{}\*?\s+\S+\s+([r-][w-][+-])",
        regex::escape(format.magick_name())
    );
    let Ok(re) = Regex::new(&pattern) else {
        return false;
    };
    re.captures_iter(listing)
        .any(|c| c.get(1).is_some_and(|m| m.as_str().contains(mode_char)))
}
