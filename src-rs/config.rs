use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::palette::{Palette, ScreenPoint};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanvasError {
    #[error("canvas corners must satisfy x1 < x2 and y1 < y2, got [{x1}, {y1}, {x2}, {y2}]")]
    Inverted { x1: i32, y1: i32, x2: i32, y2: i32 },
}

/// Screen rectangle of the drawing surface, stored as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct Canvas {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Canvas {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, CanvasError> {
        if x1 >= x2 || y1 >= y2 {
            return Err(CanvasError::Inverted { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> u32 {
        self.x1.abs_diff(self.x2)
    }

    pub fn height(&self) -> u32 {
        self.y1.abs_diff(self.y2)
    }

    pub fn smallest_edge(&self) -> u32 {
        self.width().min(self.height())
    }

    /// Only the far edges carry the margin; points are always built from the
    /// top-left corner outward.
    pub fn accepts(&self, point: ScreenPoint, margin: i32) -> bool {
        point.x <= self.x2 + margin && point.y <= self.y2 + margin
    }
}

impl TryFrom<[i32; 4]> for Canvas {
    type Error = CanvasError;

    fn try_from([x1, y1, x2, y2]: [i32; 4]) -> Result<Self, Self::Error> {
        Canvas::new(x1, y1, x2, y2)
    }
}

impl From<Canvas> for [i32; 4] {
    fn from(canvas: Canvas) -> Self {
        [canvas.x1, canvas.y1, canvas.x2, canvas.y2]
    }
}

impl fmt::Display for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub palette: Palette,
    pub canvas: Canvas,
}

/// Named configurations backed by one JSON file. The file is read and
/// rewritten as a whole; entry order follows the file.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    entries: Vec<(String, Configuration)>,
}

impl ConfigStore {
    pub fn init_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        crate::write_json_pretty(path, &json!({}))?;
        Ok(true)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file: {}", path.display()))?;
        let root: Map<String, Value> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid configuration JSON: {}", path.display()))?;

        let mut entries = Vec::with_capacity(root.len());
        for (name, value) in root {
            let config: Configuration = serde_json::from_value(value).with_context(|| {
                format!("invalid configuration `{name}` in {}", path.display())
            })?;
            if config.palette.is_empty() {
                bail!(
                    "configuration `{name}` in {} has an empty palette",
                    path.display()
                );
            }
            entries.push((name, config));
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn save(&self) -> Result<()> {
        crate::write_json_pretty(&self.path, &self.to_json()?)
    }

    pub fn to_json(&self) -> Result<Value> {
        let mut root = Map::new();
        for (name, config) in &self.entries {
            root.insert(name.clone(), serde_json::to_value(config)?);
        }
        Ok(Value::Object(root))
    }

    pub fn insert(&mut self, name: String, config: Configuration) -> Result<()> {
        if self.contains(&name) {
            bail!("A configuration with that name already exists!");
        }
        self.entries.push((name, config));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    pub fn entry(&self, index: usize) -> Option<(&str, &Configuration)> {
        self.entries
            .get(index)
            .map(|(name, config)| (name.as_str(), config))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn sanitize_name(input: &str) -> String {
    input
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '.' | '_'))
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    fn sample_config() -> Configuration {
        let mut palette = Palette::new();
        palette.insert(Rgb([0, 0, 0]), ScreenPoint::new(10, 10)).unwrap();
        palette
            .insert(Rgb([255, 255, 255]), ScreenPoint::new(20, 20))
            .unwrap();
        Configuration {
            palette,
            canvas: Canvas::new(100, 200, 500, 600).unwrap(),
        }
    }

    #[test]
    fn canvas_rejects_inverted_corners() {
        assert!(Canvas::new(10, 10, 10, 20).is_err());
        assert!(Canvas::new(10, 30, 20, 20).is_err());
        let canvas = Canvas::new(0, 0, 100, 50).unwrap();
        assert_eq!((canvas.width(), canvas.height()), (100, 50));
        assert_eq!(canvas.smallest_edge(), 50);
    }

    #[test]
    fn canvas_margin_applies_to_far_edges() {
        let canvas = Canvas::new(0, 0, 100, 50).unwrap();
        assert!(canvas.accepts(ScreenPoint::new(105, 55), 5));
        assert!(!canvas.accepts(ScreenPoint::new(106, 10), 5));
        assert!(!canvas.accepts(ScreenPoint::new(10, 56), 5));
    }

    #[test]
    fn writes_documented_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        ConfigStore::init_if_missing(&path).unwrap();

        let mut store = ConfigStore::load(&path).unwrap();
        assert!(store.is_empty());
        store.insert("paint".to_string(), sample_config()).unwrap();
        store.save().unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            json!({
                "paint": {
                    "palette": {"(0, 0, 0)": [10, 10], "(255, 255, 255)": [20, 20]},
                    "canvas": [100, 200, 500, 600]
                }
            })
        );
    }

    #[test]
    fn reload_keeps_file_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        ConfigStore::init_if_missing(&path).unwrap();
        let mut store = ConfigStore::load(&path).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            store.insert(name.to_string(), sample_config()).unwrap();
        }
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.names(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(reloaded.entry(1), Some(("alpha", &sample_config())));
        assert_eq!(reloaded.entry(2).map(|(name, _)| name), Some("mid"));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        ConfigStore::init_if_missing(&path).unwrap();
        let mut store = ConfigStore::load(&path).unwrap();
        store.insert("a".to_string(), sample_config()).unwrap();
        assert!(store.insert("a".to_string(), sample_config()).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn init_leaves_existing_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"x": {"palette": {"(1, 2, 3)": [4, 5]}, "canvas": [0, 0, 20, 20]}}"#)
            .unwrap();
        assert!(!ConfigStore::init_if_missing(&path).unwrap());
        assert_eq!(ConfigStore::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn malformed_files_fail_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, "not json").unwrap();
        assert!(ConfigStore::load(&path).is_err());

        fs::write(&path, r#"{"x": {"palette": {}, "canvas": [0, 0, 20, 20]}}"#).unwrap();
        let err = ConfigStore::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("empty palette"));

        fs::write(&path, r#"{"x": {"palette": {"(1, 2, 3)": [4, 5]}, "canvas": [20, 0, 0, 20]}}"#)
            .unwrap();
        assert!(ConfigStore::load(&path).is_err());
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_name("my/paint:app v1.2_x  "), "mypaintapp v1.2_x");
        assert_eq!(sanitize_name("???"), "");
    }
}
