//! Format identifiers and the typed (source, target) lookup key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    // raster
    Heic,
    Jpg,
    Png,
    Webp,
    Gif,
    Tiff,
    Bmp,
    Avif,
    // documents
    Pdf,
    Docx,
    Doc,
    Odt,
    Rtf,
    Txt,
    Xlsx,
    Xls,
    Ods,
    Pptx,
    Ppt,
    Odp,
}

impl Format {
    pub const ALL: [Format; 20] = [
        Format::Heic,
        Format::Jpg,
        Format::Png,
        Format::Webp,
        Format::Gif,
        Format::Tiff,
        Format::Bmp,
        Format::Avif,
        Format::Pdf,
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

    /// Case-folded lookup that also accepts common aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        let f = match folded.as_str() {
            "heic" | "heif" => Format::Heic,
            "jpg" | "jpeg" | "jpe" => Format::Jpg,
            "png" => Format::Png,
            "webp" => Format::Webp,
            "gif" => Format::Gif,
            "tif" | "tiff" => Format::Tiff,
            "bmp" => Format::Bmp,
            "avif" => Format::Avif,
            "pdf" => Format::Pdf,
            "docx" => Format::Docx,
            "doc" => Format::Doc,
            "odt" => Format::Odt,
            "rtf" => Format::Rtf,
            "txt" | "text" => Format::Txt,
            "xlsx" => Format::Xlsx,
            "xls" => Format::Xls,
            "ods" => Format::Ods,
            "pptx" => Format::Pptx,
            "ppt" => Format::Ppt,
            "odp" => Format::Odp,
            _ => return None,
        };
        Some(f)
    }

    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::parse)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Heic => "heic",
            Format::Jpg => "jpg",
            Format::Png => "png",
            Format::Webp => "webp",
            Format::Gif => "gif",
            Format::Tiff => "tiff",
            Format::Bmp => "bmp",
            Format::Avif => "avif",
            Format::Pdf => "pdf",
            Format::Docx => "docx",
            Format::Doc => "doc",
            Format::Odt => "odt",
            Format::Rtf => "rtf",
            Format::Txt => "txt",
            Format::Xlsx => "xlsx",
            Format::Xls => "xls",
            Format::Ods => "ods",
            Format::Pptx => "pptx",
            Format::Ppt => "ppt",
            Format::Odp => "odp",
        }
    }

    /// Name ImageMagick uses in `-list format` and as an output prefix.
    pub fn magick_name(self) -> &'static str {
        match self {
            Format::Heic => "HEIC",
            Format::Jpg => "JPEG",
            Format::Png => "PNG",
            Format::Webp => "WEBP",
            Format::Gif => "GIF",
            Format::Tiff => "TIFF",
            Format::Bmp => "BMP",
            Format::Avif => "AVIF",
            Format::Pdf => "PDF",
            other => other.extension(),
        }
    }

    pub fn is_raster(self) -> bool {
        matches!(
            self,
            Format::Heic
                | Format::Jpg
                | Format::Png
                | Format::Webp
                | Format::Gif
                | Format::Tiff
                | Format::Bmp
                | Format::Avif
        )
    }

    /// Office formats LibreOffice can export to PDF.
    pub fn is_office_document(self) -> bool {
        matches!(
            self,
            Format::Docx
                | Format::Doc
                | Format::Odt
                | Format::Rtf
                | Format::Txt
                | Format::Xlsx
                | Format::Xls
                | Format::Ods
                | Format::Pptx
                | Format::Ppt
                | Format::Odp
        )
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::parse(s).ok_or_else(|| format!("unknown format: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversionPair {
    pub source: Format,
    pub target: Format,
}

impl ConversionPair {
    pub fn new(source: Format, target: Format) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for ConversionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}
