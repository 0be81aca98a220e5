//! Options for opening and working with an archive

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vmarc_formats::codec::{Conversion, DataType, LineEnding, SNIFF_LEN};
use vmarc_formats::header::Method;

use crate::error::ArchiveResult;

/// How payload bytes are converted on extraction and addition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Decide per subfile from its content
    #[default]
    Auto,
    /// Translate characters and map records to lines
    Text,
    /// Copy bytes unchanged
    Binary,
    /// Translate characters, keep binary framing
    Translate,
}

impl TransferMode {
    /// Conversion to use for content classified as `data_type`
    pub fn conversion(self, data_type: DataType) -> Conversion {
        match self {
            Self::Text => Conversion::Text,
            Self::Binary => Conversion::Binary,
            Self::Translate => Conversion::Translate,
            Self::Auto => match data_type {
                DataType::Binary => Conversion::Binary,
                DataType::Text | DataType::Unknown => Conversion::Text,
            },
        }
    }

    /// Data type recorded for a subfile added in this mode
    pub fn data_type(self) -> DataType {
        match self {
            Self::Text => DataType::Text,
            Self::Binary | Self::Translate => DataType::Binary,
            Self::Auto => DataType::Unknown,
        }
    }
}

/// Character map files that replace the built-in tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmapPaths {
    /// Map of the archive encoding
    pub from: PathBuf,
    /// Map of the host encoding
    pub to: PathBuf,
}

/// Archive handle options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Conversion used by extract and add
    pub transfer_mode: TransferMode,
    /// Method given to newly created subfiles
    pub default_method: Method,
    /// Line terminator written after text records
    pub line_ending: LineEnding,
    /// Payload bytes examined when classifying a subfile
    pub scan_limit: u64,
    /// Character maps loaded on open
    pub charmaps: Option<CharmapPaths>,
    /// Stamp extracted files with the subfile date and time
    pub set_file_times: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            transfer_mode: TransferMode::Auto,
            default_method: Method::Asis,
            line_ending: LineEnding::default(),
            scan_limit: SNIFF_LEN,
            charmaps: None,
            set_file_times: true,
        }
    }
}

impl ArchiveOptions {
    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> ArchiveResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the transfer mode
    #[must_use]
    pub const fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    /// Set the method for new subfiles
    #[must_use]
    pub const fn with_default_method(mut self, method: Method) -> Self {
        self.default_method = method;
        self
    }

    /// Set the text line terminator
    #[must_use]
    pub const fn with_line_ending(mut self, ending: LineEnding) -> Self {
        self.line_ending = ending;
        self
    }

    /// Set the classification threshold
    #[must_use]
    pub const fn with_scan_limit(mut self, limit: u64) -> Self {
        self.scan_limit = limit;
        self
    }

    /// Load translation tables from two character maps on open
    #[must_use]
    pub fn with_charmaps<P: AsRef<Path>, Q: AsRef<Path>>(mut self, from: P, to: Q) -> Self {
        self.charmaps = Some(CharmapPaths {
            from: from.as_ref().to_path_buf(),
            to: to.as_ref().to_path_buf(),
        });
        self
    }

    /// Enable or disable file time stamping on extraction
    #[must_use]
    pub const fn with_file_times(mut self, enable: bool) -> Self {
        self.set_file_times = enable;
        self
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let options = ArchiveOptions::default();
        assert_eq!(options.transfer_mode, TransferMode::Auto);
        assert_eq!(options.default_method, Method::Asis);
        assert_eq!(options.scan_limit, 1024);
        assert!(options.set_file_times);
        assert!(options.charmaps.is_none());
    }

    #[test]
    fn test_from_json_partial() {
        let options = ArchiveOptions::from_json(
            r#"{"transfer_mode": "binary", "default_method": "Lzw", "line_ending": "CrLf"}"#,
        )
        .expect("Test operation should succeed");
        assert_eq!(options.transfer_mode, TransferMode::Binary);
        assert_eq!(options.default_method, Method::Lzw);
        assert_eq!(options.line_ending, LineEnding::CrLf);
        assert_eq!(options.scan_limit, 1024);
    }

    #[test]
    fn test_from_json_rejects_unknown_mode() {
        let err = ArchiveOptions::from_json(r#"{"transfer_mode": "sideways"}"#).unwrap_err();
        assert_eq!(err.status().code(), 10);
    }

    #[test]
    fn test_json_round_trip() {
        let options = ArchiveOptions::default()
            .with_transfer_mode(TransferMode::Translate)
            .with_charmaps("ibm1047.ucm", "iso8859-1.ucm")
            .with_file_times(false);
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(ArchiveOptions::from_json(&json).unwrap(), options);
    }

    #[test]
    fn test_auto_conversion() {
        assert_eq!(TransferMode::Auto.conversion(DataType::Binary), Conversion::Binary);
        assert_eq!(TransferMode::Auto.conversion(DataType::Text), Conversion::Text);
        assert_eq!(TransferMode::Translate.conversion(DataType::Text), Conversion::Translate);
    }
}
