//! UCM character map parser
//!
//! Only the subset needed for single-byte code pages is understood:
//!
//! ```text
//! <uconv_class>   "SBCS"
//! <subchar>       \x3F
//! CHARMAP
//! <U0041> \xC1 |0
//! END CHARMAP
//! ```
//!
//! Mapping lines whose precision marker is anything other than `|0`
//! (fallbacks, reverse fallbacks) are skipped.

use std::path::Path;

use tracing::debug;

use super::error::{CharmapError, CharmapResult};

/// Substitution byte used when a map does not declare `<subchar>`
pub const DEFAULT_SUBCHAR: u8 = 0x3F;

/// A parsed single-byte character map: byte value to Unicode scalar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterMap {
    scalars: [Option<u32>; 256],
    subchar: Option<u8>,
}

impl CharacterMap {
    /// Read and parse a character map file
    pub fn load(path: impl AsRef<Path>) -> CharmapResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read(path)?;
        let map = Self::parse(&String::from_utf8_lossy(&text))?;
        debug!(
            "loaded character map {} ({} direct mappings)",
            path.display(),
            map.mapped_count()
        );
        Ok(map)
    }

    /// Parse character map text
    pub fn parse(text: &str) -> CharmapResult<Self> {
        let mut map = Self {
            scalars: [None; 256],
            subchar: None,
        };
        let mut single_byte = false;
        let mut in_block = false;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let mut tokens = line.split_ascii_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            if first.starts_with('#') {
                continue;
            }

            match first {
                "CHARMAP" => {
                    if !single_byte {
                        return Err(CharmapError::NotSingleByte { line: line_no });
                    }
                    in_block = true;
                }
                "END" => {
                    if tokens.next() != Some("CHARMAP") {
                        continue;
                    }
                    if !in_block {
                        return Err(CharmapError::BadCharmap {
                            reason: format!("END CHARMAP without CHARMAP on line {line_no}"),
                        });
                    }
                    return Ok(map);
                }
                "<uconv_class>" => {
                    let Some(class) = tokens.next() else {
                        continue;
                    };
                    if class != "\"SBCS\"" {
                        return Err(CharmapError::NotSingleByte { line: line_no });
                    }
                    single_byte = true;
                }
                "<subchar>" => {
                    let Some(value) = tokens.next() else {
                        continue;
                    };
                    map.subchar = Some(
                        parse_byte(value).ok_or(CharmapError::BadSubchar { line: line_no })?,
                    );
                }
                _ if in_block => map.parse_mapping(first, &mut tokens, line_no)?,
                _ => {}
            }
        }

        Err(CharmapError::BadCharmap {
            reason: "missing END CHARMAP".to_string(),
        })
    }

    fn parse_mapping<'a>(
        &mut self,
        scalar: &str,
        rest: &mut impl Iterator<Item = &'a str>,
        line: usize,
    ) -> CharmapResult<()> {
        let malformed = || CharmapError::BadCharmap {
            reason: format!("malformed mapping on line {line}"),
        };

        let scalar = scalar
            .strip_prefix("<U")
            .and_then(|s| s.strip_suffix('>'))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .ok_or_else(malformed)?;

        let Some(byte) = rest.next() else {
            return Ok(());
        };
        let byte = parse_byte(byte).ok_or_else(malformed)?;

        if rest.next() == Some("|0") {
            self.scalars[usize::from(byte)] = Some(scalar);
        }
        Ok(())
    }

    /// Unicode scalar mapped to `byte`, if the map has a direct mapping
    pub fn scalar(&self, byte: u8) -> Option<u32> {
        self.scalars[usize::from(byte)]
    }

    /// Declared substitution byte
    pub fn subchar(&self) -> Option<u8> {
        self.subchar
    }

    /// Substitution byte, falling back to [`DEFAULT_SUBCHAR`]
    pub fn substitution(&self) -> u8 {
        self.subchar.unwrap_or(DEFAULT_SUBCHAR)
    }

    /// Number of bytes with a direct mapping
    pub fn mapped_count(&self) -> usize {
        self.scalars.iter().filter(|s| s.is_some()).count()
    }

    /// (scalar, byte) pairs sorted by scalar, lowest byte first on ties
    pub(crate) fn sorted_by_scalar(&self) -> Vec<(u32, u8)> {
        let mut pairs: Vec<(u32, u8)> = (0..=255u8)
            .filter_map(|b| self.scalar(b).map(|u| (u, b)))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

fn parse_byte(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("\\x")?;
    u8::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# sample map
<code_set_name>  \"IBM-TEST\"
<uconv_class>    \"SBCS\"
<subchar>        \\x3F

CHARMAP
<U0000> \\x00 |0
<U0041> \\xC1 |0
<U0042> \\xC2 |0
<U00A0> \\x41 |1
END CHARMAP
";

    #[test]
    fn test_parse_sample() {
        let map = CharacterMap::parse(SAMPLE).expect("Test operation should succeed");
        assert_eq!(map.subchar(), Some(0x3F));
        assert_eq!(map.scalar(0xC1), Some(0x41));
        assert_eq!(map.scalar(0xC2), Some(0x42));
        assert_eq!(map.scalar(0x00), Some(0));
        // fallback marker is ignored
        assert_eq!(map.scalar(0x41), None);
        assert_eq!(map.mapped_count(), 3);
    }

    #[test]
    fn test_rejects_multibyte_class() {
        let text = "<uconv_class> \"MBCS\"\nCHARMAP\nEND CHARMAP\n";
        assert!(matches!(
            CharacterMap::parse(text),
            Err(CharmapError::NotSingleByte { line: 1 })
        ));
    }

    #[test]
    fn test_rejects_block_before_class() {
        let text = "CHARMAP\n<U0041> \\xC1 |0\nEND CHARMAP\n";
        assert!(matches!(
            CharacterMap::parse(text),
            Err(CharmapError::NotSingleByte { line: 1 })
        ));
    }

    #[test]
    fn test_rejects_bad_subchar() {
        let text = "<uconv_class> \"SBCS\"\n<subchar> 3F\n";
        assert!(matches!(
            CharacterMap::parse(text),
            Err(CharmapError::BadSubchar { line: 2 })
        ));
    }

    #[test]
    fn test_rejects_unterminated_block() {
        let text = "<uconv_class> \"SBCS\"\nCHARMAP\n<U0041> \\xC1 |0\n";
        assert!(matches!(
            CharacterMap::parse(text),
            Err(CharmapError::BadCharmap { .. })
        ));
    }

    #[test]
    fn test_rejects_malformed_entries() {
        for bad in ["<X0041> \\xC1 |0", "<U0041 \\xC1 |0", "<U0041> C1 |0", "<U0041> \\x1C1 |0"] {
            let text = format!("<uconv_class> \"SBCS\"\nCHARMAP\n{bad}\nEND CHARMAP\n");
            assert!(
                matches!(CharacterMap::parse(&text), Err(CharmapError::BadCharmap { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_default_substitution() {
        let text = "<uconv_class> \"SBCS\"\nCHARMAP\nEND CHARMAP\n";
        let map = CharacterMap::parse(text).expect("Test operation should succeed");
        assert_eq!(map.subchar(), None);
        assert_eq!(map.substitution(), DEFAULT_SUBCHAR);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let result = CharacterMap::load(dir.path().join("absent.ucm"));
        assert!(matches!(result, Err(CharmapError::Open(_))));
    }
}
