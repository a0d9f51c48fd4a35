//! Hex colour parsing for background and solid material colours

use serde::{Deserialize, Serialize};
use std::fmt;

/// 8-bit sRGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb { r: 0xff, g: 0xff, b: 0xff };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`, `#rgb`, `0xrrggbb` or a bare `rrggbb`.
    ///
    /// Surrounding whitespace is ignored. Returns `None` for anything else.
    pub fn parse_hex(input: &str) -> Option<Self> {
        let s = input.trim();
        let digits = s
            .strip_prefix('#')
            .or_else(|| s.strip_prefix("0x"))
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        match digits.len() {
            6 => {
                let value = u32::from_str_radix(digits, 16).ok()?;
                Some(Self::new((value >> 16) as u8, (value >> 8) as u8, value as u8))
            }
            // Shorthand is only accepted in CSS notation
            3 if s.starts_with('#') => {
                let mut channels = digits.chars().map(|c| {
                    let v = c.to_digit(16).unwrap_or(0) as u8;
                    v << 4 | v
                });
                Some(Self::new(channels.next()?, channels.next()?, channels.next()?))
            }
            _ => None,
        }
    }

    /// Channels scaled to 0.0-1.0, still sRGB encoded
    pub fn to_srgb_f32(self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }

    /// Lowercase `#rrggbb`
    pub fn to_css_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notations() {
        let expected = Some(Rgb::new(0x12, 0xab, 0xef));
        assert_eq!(Rgb::parse_hex("#12abef"), expected);
        assert_eq!(Rgb::parse_hex("0x12ABEF"), expected);
        assert_eq!(Rgb::parse_hex("12abef"), expected);
        assert_eq!(Rgb::parse_hex("  #12abef "), expected);
        assert_eq!(Rgb::parse_hex("#f0a"), Some(Rgb::new(0xff, 0x00, 0xaa)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Rgb::parse_hex(""), None);
        assert_eq!(Rgb::parse_hex("red"), None);
        assert_eq!(Rgb::parse_hex("#12345"), None);
        assert_eq!(Rgb::parse_hex("f0a"), None);
        assert_eq!(Rgb::parse_hex("#gg0000"), None);
    }

    #[test]
    fn test_css_hex_is_lowercase() {
        assert_eq!(Rgb::new(0xff, 0, 0x0a).to_css_hex(), "#ff000a");
        assert_eq!(Rgb::WHITE.to_srgb_f32(), [1.0, 1.0, 1.0]);
    }
}
