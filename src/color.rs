use std::collections::BTreeMap;

use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours (as `#rrggbb`) using evenly
/// spaced hues.
pub fn generate_palette(n: usize) -> Vec<String> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            let rgb: Srgb<u8> = rgb.into_format();
            format!("#{:02x}{:02x}{:02x}", rgb.red, rgb.green, rgb.blue)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Series colours: series label → hex colour
// ---------------------------------------------------------------------------

/// Assigns a distinct colour to each series label of a chart.
#[derive(Debug, Clone)]
pub struct SeriesColors {
    mapping: BTreeMap<String, String>,
    default_color: String,
}

impl SeriesColors {
    /// Build the mapping from the labels in display order.
    pub fn new<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let labels: Vec<&str> = labels.into_iter().collect();
        let palette = generate_palette(labels.len());
        let mapping = labels
            .into_iter()
            .zip(palette)
            .map(|(l, c)| (l.to_string(), c))
            .collect();

        SeriesColors {
            mapping,
            default_color: "#808080".to_string(),
        }
    }

    /// Look up the colour for a series label.
    pub fn color_for(&self, label: &str) -> &str {
        self.mapping
            .get(label)
            .map(String::as_str)
            .unwrap_or(&self.default_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_is_distinct_hex() {
        let colors = generate_palette(5);
        assert_eq!(colors.len(), 5);
        assert!(colors.iter().all(|c| c.len() == 7 && c.starts_with('#')));
        let unique: std::collections::BTreeSet<_> = colors.iter().collect();
        assert_eq!(unique.len(), 5);
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn unknown_series_gets_default() {
        let colors = SeriesColors::new(["Nitrogen", "Phosphorus"]);
        assert_ne!(colors.color_for("Nitrogen"), colors.color_for("Phosphorus"));
        assert_eq!(colors.color_for("Potassium"), "#808080");
    }
}
