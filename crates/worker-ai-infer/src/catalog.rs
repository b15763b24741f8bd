//! Class-ID-to-name catalog, shared read-only across connections once
//! parsed at startup.

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::InferenceError;

/// Standard 80-class COCO catalog, matching the classes produced by the
/// export tooling this worker consumes.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Clone)]
pub struct ClassCatalog {
    names: Arc<[String]>,
}

impl ClassCatalog {
    pub fn coco() -> Self {
        Self {
            names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            names: names.into(),
        }
    }

    /// Resolves the configured catalog source: an inline list wins if
    /// present, else a `.json` array file, else a newline-delimited text
    /// file, else the built-in COCO-80 catalog.
    pub fn load(
        inline: Option<&[String]>,
        path: Option<&Path>,
    ) -> Result<Self, InferenceError> {
        if let Some(names) = inline {
            if !names.is_empty() {
                return Ok(Self::from_names(names.to_vec()));
            }
        }

        if let Some(path) = path {
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {
                    let contents = std::fs::read_to_string(path)
                        .map_err(|e| InferenceError::Catalog(e.to_string()))?;
                    let names: Vec<String> = serde_json::from_str(&contents)
                        .map_err(|e| InferenceError::Catalog(e.to_string()))?;
                    return Ok(Self::from_names(names));
                }
                _ => {
                    let contents = std::fs::read_to_string(path)
                        .map_err(|e| InferenceError::Catalog(e.to_string()))?;
                    let names: Vec<String> = contents
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect();
                    return Ok(Self::from_names(names));
                }
            }
        }

        Ok(Self::coco())
    }

    pub fn name_of(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolves class names to ids, warning and dropping any name absent
    /// from the catalog.
    pub fn resolve_filter(&self, names: &[String]) -> Vec<usize> {
        names
            .iter()
            .filter_map(|name| {
                let id = self.names.iter().position(|n| n == name);
                if id.is_none() {
                    warn!(class_name = %name, "unknown class name in classes_filter, ignoring");
                }
                id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_catalog_has_80_classes() {
        assert_eq!(ClassCatalog::coco().len(), 80);
    }

    #[test]
    fn resolve_filter_drops_unknown_names() {
        let catalog = ClassCatalog::coco();
        let resolved = catalog.resolve_filter(&["person".to_string(), "not-a-class".to_string()]);
        assert_eq!(resolved, vec![0]);
    }

    #[test]
    fn load_prefers_inline_over_default() {
        let catalog = ClassCatalog::load(Some(&["a".to_string(), "b".to_string()]), None).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn load_falls_back_to_coco_when_nothing_configured() {
        let catalog = ClassCatalog::load(None, None).unwrap();
        assert_eq!(catalog.len(), 80);
    }
}
