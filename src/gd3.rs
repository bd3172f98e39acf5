//! GD3 tag support.
//!
//! A GD3 tag is the metadata trailer of a VGM file:
//! the ident `"Gd3 "`, a 32-bit version, a 32-bit data length,
//! and 11 nul-terminated UTF-16LE strings in a fixed order.
//! Strings are decoded to UTF-8,
//! folding fullwidth ASCII forms to their plain counterparts.

use std::path::Path;

use snafu::{ensure, Snafu};
use tracing::debug;

/// Identifier at the start of a GD3 tag
pub const GD3_IDENT: [u8; 4] = *b"Gd3 ";

/// Number of strings in a GD3 tag
pub const FIELD_COUNT: usize = 11;

/// Tag key holding the VGM volume modifier
pub const VOLUME_MODIFIER_KEY: &str = "vgm_volume_modifier";

/// Error locating or parsing a GD3 tag
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseError {
    /// Insufficient bytes to parse {context}
    InsufficientBytes { context: &'static str },
    /// Not a VGM file
    NotVgm,
    /// The VGM file has no GD3 tag
    NoTag,
    /// GD3 offset {offset:#x} lies outside of the file
    OffsetOutOfBounds { offset: u32 },
    /// Invalid GD3 identifier
    InvalidIdent,
}

/// The decoded strings of a GD3 tag.
///
/// Empty strings stand for absent fields.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Gd3 {
    pub version: u32,
    pub track_name_en: String,
    pub track_name_jp: String,
    pub game_name_en: String,
    pub game_name_jp: String,
    pub system_name_en: String,
    pub system_name_jp: String,
    pub author_name_en: String,
    pub author_name_jp: String,
    pub release_date: String,
    pub creator: String,
    pub notes: String,
}

impl Gd3 {
    /// Locate and parse the GD3 tag of a complete VGM file
    pub fn from_vgm_bytes(vgm: &[u8]) -> Result<Self, ParseError> {
        ensure!(vgm.len() >= 0x18, InsufficientBytesSnafu { context: "VGM header" });
        ensure!(vgm[..4] == *b"Vgm ", NotVgmSnafu);

        let relative = u32::from_le_bytes([vgm[0x14], vgm[0x15], vgm[0x16], vgm[0x17]]);
        ensure!(relative != 0, NoTagSnafu);
        let offset = relative.saturating_add(0x14);
        ensure!(
            (offset as usize) < vgm.len(),
            OffsetOutOfBoundsSnafu { offset }
        );

        Self::parse(&vgm[offset as usize..])
    }

    /// Parse a GD3 tag starting at the beginning of `bytes`.
    ///
    /// The declared data length only bounds the strings;
    /// strings cut short by the end of the data are kept as decoded so far,
    /// and missing strings are empty.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure!(bytes.len() >= 12, InsufficientBytesSnafu { context: "GD3 header" });
        ensure!(bytes[..4] == GD3_IDENT, InvalidIdentSnafu);

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let data = &bytes[12..];
        let data = &data[..length.min(data.len())];

        let mut units = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .peekable();

        // a byte order mark may lead the first string
        if matches!(units.peek(), Some(&(0xFEFF | 0xFFFE))) {
            units.next();
        }

        let mut fields: [String; FIELD_COUNT] = Default::default();
        for field in fields.iter_mut() {
            let string: Vec<u16> = units.by_ref().take_while(|&unit| unit != 0).collect();
            *field = decode_utf16(&string);
        }

        let [
            track_name_en,
            track_name_jp,
            game_name_en,
            game_name_jp,
            system_name_en,
            system_name_jp,
            author_name_en,
            author_name_jp,
            release_date,
            creator,
            notes,
        ] = fields;

        Ok(Gd3 {
            version,
            track_name_en,
            track_name_jp,
            game_name_en,
            game_name_jp,
            system_name_en,
            system_name_jp,
            author_name_en,
            author_name_jp,
            release_date,
            creator,
            notes,
        })
    }

    /// Convert into tags,
    /// preferring English names over Japanese ones
    /// and leaving out empty fields.
    pub fn to_tags(&self) -> Tags {
        fn prefer<'a>(en: &'a str, jp: &'a str) -> &'a str {
            if en.is_empty() {
                jp
            } else {
                en
            }
        }

        let mut tags = Tags::new();
        let fields = [
            ("title", prefer(&self.track_name_en, &self.track_name_jp)),
            ("game", prefer(&self.game_name_en, &self.game_name_jp)),
            ("system", prefer(&self.system_name_en, &self.system_name_jp)),
            ("artist", prefer(&self.author_name_en, &self.author_name_jp)),
            ("year", self.release_date.as_str()),
            ("s98by", self.creator.as_str()),
            ("comment", self.notes.as_str()),
        ];
        for (key, value) in fields {
            if !value.is_empty() {
                tags.insert(key, value);
            }
        }
        tags
    }
}

/// Read the GD3 tag of a VGM file on disk as tags.
///
/// Returns `None` if the file cannot be read
/// or does not carry a valid GD3 tag.
pub fn read_tags(path: impl AsRef<Path>) -> Option<Tags> {
    let path = path.as_ref();
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            debug!("Cannot read {} for GD3 tags: {}", path.display(), e);
            return None;
        }
    };
    match Gd3::from_vgm_bytes(&data) {
        Ok(gd3) => Some(gd3.to_tags()),
        Err(e) => {
            debug!("No GD3 tags in {}: {}", path.display(), e);
            None
        }
    }
}

/// Decode UTF-16 code units to UTF-8.
///
/// Surrogate pairs are combined,
/// unpaired surrogates become U+FFFD,
/// and characters of the basic multilingual plane
/// go through [`fold_fullwidth`].
pub fn decode_utf16(units: &[u16]) -> String {
    let mut out = String::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let unit = units[i] as u32;
        i += 1;

        let code_point = match unit {
            0xD800..=0xDBFF => match units.get(i).map(|&low| low as u32) {
                Some(low @ 0xDC00..=0xDFFF) => {
                    i += 1;
                    0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00)
                }
                _ => 0xFFFD,
            },
            0xDC00..=0xDFFF => 0xFFFD,
            bmp => fold_fullwidth(bmp),
        };

        out.push(char::from_u32(code_point).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    out
}

/// Fold fullwidth forms to their ordinary equivalents.
///
/// `U+FF01..=U+FF5E` map to printable ASCII,
/// and the fullwidth cent, pound, yen and won signs
/// map to the regular currency signs.
/// Other code points are returned unchanged.
pub fn fold_fullwidth(code_point: u32) -> u32 {
    match code_point {
        0xFF01..=0xFF5E => code_point - 0xFEE0,
        0xFFE0 => 0x00A2,
        0xFFE1 => 0x00A3,
        0xFFE5 => 0x00A5,
        0xFFE6 => 0x20A9,
        _ => code_point,
    }
}

/// An ordered collection of `key=value` tags.
///
/// Keys are unique and iteration follows first insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tags {
    entries: Vec<(String, String)>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing the value of an existing key in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Overlay all tags of `other` onto these tags
    pub fn extend(&mut self, other: Tags) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
