use std::fmt;

use serde::{Deserialize, Serialize};

/// Output size selector understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "square_hd")]
    SquareHd,
    #[serde(rename = "square")]
    Square,
    #[serde(rename = "portrait_4_3")]
    Portrait4x3,
    #[serde(rename = "portrait_16_9")]
    Portrait16x9,
    #[serde(rename = "landscape_4_3")]
    Landscape4x3,
    #[serde(rename = "landscape_16_9")]
    Landscape16x9,
}

impl ImageSize {
    pub const ALL: [ImageSize; 6] = [
        ImageSize::SquareHd,
        ImageSize::Square,
        ImageSize::Portrait4x3,
        ImageSize::Portrait16x9,
        ImageSize::Landscape4x3,
        ImageSize::Landscape16x9,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::SquareHd => "square_hd",
            ImageSize::Square => "square",
            ImageSize::Portrait4x3 => "portrait_4_3",
            ImageSize::Portrait16x9 => "portrait_16_9",
            ImageSize::Landscape4x3 => "landscape_4_3",
            ImageSize::Landscape16x9 => "landscape_16_9",
        }
    }

    pub fn from_value(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == raw.trim())
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aspect-ratio labels shown to the user, in display order.
pub const ASPECT_RATIOS: [(&str, ImageSize); 6] = [
    ("1:1 (square, HD)", ImageSize::SquareHd),
    ("1:1 (square)", ImageSize::Square),
    ("3:4 (portrait)", ImageSize::Portrait4x3),
    ("9:16 (portrait)", ImageSize::Portrait16x9),
    ("4:3 (landscape)", ImageSize::Landscape4x3),
    ("16:9 (landscape)", ImageSize::Landscape16x9),
];

pub const DEFAULT_ASPECT_RATIO: &str = "4:3 (landscape)";

/// Resolve a display label, or a raw provider value, to an [`ImageSize`].
pub fn map_aspect_ratio(label: &str) -> Option<ImageSize> {
    let trimmed = label.trim();
    ASPECT_RATIOS
        .iter()
        .find(|(known, _)| *known == trimmed)
        .map(|(_, size)| *size)
        .or_else(|| ImageSize::from_value(trimmed))
}

/// Enable/disable toggle labels. Unknown labels map to `None`.
pub fn parse_toggle(label: &str) -> Option<bool> {
    match label.trim().to_ascii_lowercase().as_str() {
        "enabled" | "enable" | "on" | "true" | "yes" | "1" => Some(true),
        "disabled" | "disable" | "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{map_aspect_ratio, parse_toggle, ImageSize, ASPECT_RATIOS};

    #[test]
    fn every_label_maps_to_its_enum_value() {
        let expected = [
            "square_hd",
            "square",
            "portrait_4_3",
            "portrait_16_9",
            "landscape_4_3",
            "landscape_16_9",
        ];
        for ((label, size), value) in ASPECT_RATIOS.iter().zip(expected) {
            assert_eq!(map_aspect_ratio(label), Some(*size));
            assert_eq!(size.as_str(), value);
        }
    }

    #[test]
    fn raw_provider_values_are_accepted() {
        assert_eq!(map_aspect_ratio("square_hd"), Some(ImageSize::SquareHd));
        assert_eq!(
            map_aspect_ratio(" landscape_16_9 "),
            Some(ImageSize::Landscape16x9)
        );
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert_eq!(map_aspect_ratio("2:1 (panorama)"), None);
        assert_eq!(map_aspect_ratio(""), None);
    }

    #[test]
    fn serde_uses_provider_values() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(ImageSize::Portrait16x9)?, json!("portrait_16_9"));
        let parsed: ImageSize = serde_json::from_value(json!("square"))?;
        assert_eq!(parsed, ImageSize::Square);
        Ok(())
    }

    #[test]
    fn toggle_labels() {
        assert_eq!(parse_toggle("Enabled"), Some(true));
        assert_eq!(parse_toggle("disabled"), Some(false));
        assert_eq!(parse_toggle("maybe"), None);
    }
}
