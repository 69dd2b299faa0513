use image::Rgb;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    pub color: Rgb<u8>,
    pub point: ScreenPoint,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaletteError {
    #[error("Colour {key} already exists at {existing}")]
    Duplicate { key: String, existing: ScreenPoint },
    #[error("invalid palette key `{0}`, expected \"(r, g, b)\" with 0-255 channels")]
    InvalidKey(String),
}

/// Colors bound to the screen position that selects them, kept in the
/// order they were recorded. Lookups and nearest-color ties follow that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, color: Rgb<u8>, point: ScreenPoint) -> Result<(), PaletteError> {
        if let Some(existing) = self.get(color) {
            return Err(PaletteError::Duplicate {
                key: format_key(color),
                existing,
            });
        }
        self.entries.push(PaletteEntry { color, point });
        Ok(())
    }

    pub fn get(&self, color: Rgb<u8>) -> Option<ScreenPoint> {
        self.entries
            .iter()
            .find(|entry| entry.color == color)
            .map(|entry| entry.point)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PaletteEntry> {
        self.entries.iter()
    }

    /// Palette color with the smallest summed absolute channel difference.
    /// `min_by_key` keeps the first of equal candidates, so ties go to the
    /// earliest recorded color.
    pub fn nearest(&self, color: Rgb<u8>) -> Option<Rgb<u8>> {
        self.entries
            .iter()
            .min_by_key(|entry| channel_distance(entry.color, color))
            .map(|entry| entry.color)
    }
}

pub fn channel_distance(a: Rgb<u8>, b: Rgb<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(x, y)| u32::from(x.abs_diff(*y)))
        .sum()
}

pub fn format_key(color: Rgb<u8>) -> String {
    let [r, g, b] = color.0;
    format!("({r}, {g}, {b})")
}

pub fn parse_key(raw: &str) -> Result<Rgb<u8>, PaletteError> {
    let invalid = || PaletteError::InvalidKey(raw.to_string());
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let channels = inner
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| invalid())?;
    match channels.as_slice() {
        [r, g, b] => Ok(Rgb([*r, *g, *b])),
        _ => Err(invalid()),
    }
}

pub fn hex(color: Rgb<u8>) -> String {
    let [r, g, b] = color.0;
    format!("#{r:02x}{g:02x}{b:02x}")
}

impl Serialize for Palette {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&format_key(entry.color), &[entry.point.x, entry.point.y])?;
        }
        map.end()
    }
}

struct PaletteVisitor;

impl<'de> Visitor<'de> for PaletteVisitor {
    type Value = Palette;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of \"(r, g, b)\" keys to [x, y] screen positions")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Palette, A::Error> {
        let mut palette = Palette::new();
        // Positions recorded on scaled displays may carry fractions.
        while let Some((key, [x, y])) = access.next_entry::<String, [f64; 2]>()? {
            let color = parse_key(&key).map_err(de::Error::custom)?;
            palette
                .insert(color, ScreenPoint::new(x.round() as i32, y.round() as i32))
                .map_err(de::Error::custom)?;
        }
        Ok(palette)
    }
}

impl<'de> Deserialize<'de> for Palette {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PaletteVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn black_white() -> Palette {
        let mut palette = Palette::new();
        palette.insert(Rgb([0, 0, 0]), ScreenPoint::new(10, 10)).unwrap();
        palette
            .insert(Rgb([255, 255, 255]), ScreenPoint::new(20, 20))
            .unwrap();
        palette
    }

    #[test]
    fn dark_grey_maps_to_black() {
        assert_eq!(black_white().nearest(Rgb([10, 10, 10])), Some(Rgb([0, 0, 0])));
    }

    #[test]
    fn exact_member_maps_to_itself() {
        let mut palette = black_white();
        palette
            .insert(Rgb([200, 30, 90]), ScreenPoint::new(30, 30))
            .unwrap();
        assert_eq!(palette.nearest(Rgb([200, 30, 90])), Some(Rgb([200, 30, 90])));
    }

    #[test]
    fn ties_go_to_first_recorded_colour() {
        let mut palette = Palette::new();
        palette.insert(Rgb([100, 0, 0]), ScreenPoint::new(1, 1)).unwrap();
        palette.insert(Rgb([0, 100, 0]), ScreenPoint::new(2, 2)).unwrap();
        assert_eq!(palette.nearest(Rgb([50, 50, 0])), Some(Rgb([100, 0, 0])));
    }

    #[test]
    fn nearest_minimises_channel_distance() {
        let mut palette = Palette::new();
        for (i, c) in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [128, 128, 128]]
            .into_iter()
            .enumerate()
        {
            palette.insert(Rgb(c), ScreenPoint::new(i as i32, 0)).unwrap();
        }
        for probe in [[250, 10, 10], [120, 140, 130], [0, 30, 200], [255, 255, 255]] {
            let probe = Rgb(probe);
            let picked = palette.nearest(probe).unwrap();
            let best = palette
                .iter()
                .map(|e| channel_distance(e.color, probe))
                .min()
                .unwrap();
            assert!(palette.get(picked).is_some());
            assert_eq!(channel_distance(picked, probe), best);
        }
    }

    #[test]
    fn empty_palette_has_no_nearest() {
        assert_eq!(Palette::new().nearest(Rgb([1, 2, 3])), None);
    }

    #[test]
    fn duplicate_colour_is_rejected() {
        let mut palette = black_white();
        let err = palette
            .insert(Rgb([0, 0, 0]), ScreenPoint::new(99, 99))
            .unwrap_err();
        assert_eq!(err.to_string(), "Colour (0, 0, 0) already exists at (10, 10)");
        assert_eq!(palette.len(), 2);
    }

    #[test]
    fn parses_tuple_keys() {
        assert_eq!(parse_key("(1, 22, 255)").unwrap(), Rgb([1, 22, 255]));
        assert_eq!(parse_key(" (0,0,0) ").unwrap(), Rgb([0, 0, 0]));
        assert!(parse_key("(1, 2)").is_err());
        assert!(parse_key("(1, 2, 256)").is_err());
        assert!(parse_key("1, 2, 3").is_err());
    }

    #[test]
    fn serialises_in_recording_order() {
        let mut palette = Palette::new();
        palette.insert(Rgb([9, 9, 9]), ScreenPoint::new(5, 6)).unwrap();
        palette.insert(Rgb([1, 1, 1]), ScreenPoint::new(7, 8)).unwrap();
        let raw = serde_json::to_string(&palette).unwrap();
        assert_eq!(raw, r#"{"(9, 9, 9)":[5,6],"(1, 1, 1)":[7,8]}"#);
    }

    #[test]
    fn deserialises_fractional_positions() {
        let palette: Palette =
            serde_json::from_value(json!({"(3, 4, 5)": [10.4, 19.6]})).unwrap();
        assert_eq!(palette.get(Rgb([3, 4, 5])), Some(ScreenPoint::new(10, 20)));
    }

    #[test]
    fn hex_is_lowercase_six_digits() {
        assert_eq!(hex(Rgb([255, 8, 160])), "#ff08a0");
    }
}
