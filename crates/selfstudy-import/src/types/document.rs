//! Source document types

use serde::{Deserialize, Serialize};

/// Upload formats recognised by the importer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Microsoft Word document (.docx)
    Docx,
    /// Microsoft PowerPoint presentation (.pptx)
    Pptx,
    /// Old Microsoft Word document (.doc)
    Doc,
    /// Old Microsoft PowerPoint (.ppt)
    Ppt,
    /// Anything else
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "pptx" => Self::Pptx,
            "doc" => Self::Doc,
            "ppt" => Self::Ppt,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from a filename
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit_once('.') {
            Some((_, ext)) => Self::from_extension(ext),
            None => Self::Unknown,
        }
    }

    /// Only PDF, DOCX and PPTX are parsed
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Pdf | Self::Docx | Self::Pptx)
    }

    /// Stable lowercase name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Doc => "doc",
            Self::Ppt => "ppt",
            Self::Unknown => "unknown",
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Pdf => "PDF",
            Self::Docx => "Word Document (.docx)",
            Self::Pptx => "PowerPoint (.pptx)",
            Self::Doc => "Word Document (.doc)",
            Self::Ppt => "PowerPoint (.ppt)",
            Self::Unknown => "Unknown",
        }
    }

    /// Get reason why file type is not supported
    pub fn unsupported_reason(&self) -> Option<&str> {
        match self {
            Self::Doc => Some("Legacy Word format; save as .docx and re-upload."),
            Self::Ppt => Some("Legacy PowerPoint format; save as .pptx and re-upload."),
            Self::Unknown => Some("Only PDF, Word (.docx) and PowerPoint (.pptx) files are accepted."),
            _ => None,
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_extension(s))
    }
}
