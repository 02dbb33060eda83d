use crate::format::Format;
use serde::{Deserialize, Serialize};

/// Summary written next to the page files of a multi-page conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageManifest {
    pub source: String,
    pub target_format: Format,
    pub page_count: u32,
    pub succeeded_pages: u32,
    pub failed_pages: u32,
    pub generated_at: String,
    pub pages: Vec<PageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    pub page: u32, // 1-based
    pub file: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageManifest {
    pub fn new(source: String, target_format: Format, pages: Vec<PageEntry>) -> Self {
        let succeeded_pages = pages.iter().filter(|p| p.ok).count() as u32;
        Self {
            source,
            target_format,
            page_count: pages.len() as u32,
            succeeded_pages,
            failed_pages: pages.len() as u32 - succeeded_pages,
            generated_at: crate::util::now_rfc3339(),
            pages,
        }
    }
}
