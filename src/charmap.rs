// MIT License - Copyright (c) 2026 Peter Wright
// Single-byte label character sets

use crate::error::{ParadoxError, Result};

/// Language codes with a character table.
pub const LANGUAGES: [&str; 11] = ["en", "he", "iw", "el", "hu", "ee", "de", "pl", "pt", "ro", "tr"];

/// Glyphs the panel draws for bytes 128..=223 unless a language overrides them.
fn base_glyph(byte: u8) -> char {
    let code = match byte {
        128..=191 => 0xC0 + u32::from(byte - 128),
        192 => 0x20,
        193..=223 => 0xA0 + u32::from(byte - 192),
        _ => 0x20,
    };
    char::from_u32(code).unwrap_or(' ')
}

fn overrides(language: &str) -> Vec<(u8, char)> {
    let run = |start: u8, glyphs: &str| -> Vec<(u8, char)> {
        glyphs.chars().enumerate().map(|(i, c)| (start + i as u8, c)).collect()
    };
    match language {
        "he" | "iw" => run(128, "אבגדהוזחטיךכלםמןנסעףפץצקרשת"),
        "el" => run(128, "ΑΒΓΔΕΖΗΘΙΚΛΜΝΞΟΠΡΣΤΥΦΧΨΩαβγδεζηθικλμνξοπρστυφχψω"),
        "hu" => run(128, "ŐőŰű"),
        "ee" => run(128, "ŠšŽžÕõ"),
        "de" => run(128, "ÄÖÜäöüß"),
        "pl" => run(128, "ĄĆĘŁŃÓŚŹŻąćęłńóśźż"),
        "pt" => run(128, "ÃÕÇãõçÁÉÍÓÚáéíóú"),
        "ro" => run(128, "ĂÂÎȘȚăâîșț"),
        "tr" => run(128, "ÇĞİÖŞÜçğıöşü"),
        _ => Vec::new(),
    }
}

/// Maps each panel byte to a character.
#[derive(Debug, Clone)]
pub struct Charmap {
    language: String,
    table: [char; 256],
}

impl Charmap {
    pub fn new(language: &str) -> Result<Self> {
        if !LANGUAGES.contains(&language) {
            return Err(ParadoxError::Config(format!(
                "unknown label language '{language}', expected one of {}",
                LANGUAGES.join(", ")
            )));
        }
        Ok(Self::build(language))
    }

    fn build(language: &str) -> Self {
        let mut table = [' '; 256];
        for (byte, slot) in table.iter_mut().enumerate() {
            let byte = byte as u8;
            *slot = match byte {
                33..=126 => char::from(byte),
                128..=223 => base_glyph(byte),
                _ => ' ',
            };
        }
        for (byte, glyph) in overrides(language) {
            table[usize::from(byte)] = glyph;
        }
        Self {
            language: language.to_string(),
            table,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn char_for(&self, byte: u8) -> char {
        self.table[usize::from(byte)]
    }

    /// Decode a space-padded label, trimming the padding.
    pub fn decode(&self, raw: &[u8]) -> String {
        let text: String = raw.iter().map(|b| self.char_for(*b)).collect();
        text.trim().to_string()
    }
}

impl Default for Charmap {
    fn default() -> Self {
        Self::build("en")
    }
}

/// Stable identifier derived from a label.
pub fn label_key(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
