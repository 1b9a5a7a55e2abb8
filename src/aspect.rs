use std::fmt;

const RATIO_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatioBucket {
    #[default]
    Square,
    Landscape16x9,
    Portrait9x16,
    Landscape4x3,
    Portrait3x4,
}

/// Buckets checked in priority order; `Square` is the fallback.
const CANDIDATES: [AspectRatioBucket; 4] = [
    AspectRatioBucket::Landscape16x9,
    AspectRatioBucket::Portrait9x16,
    AspectRatioBucket::Landscape4x3,
    AspectRatioBucket::Portrait3x4,
];

impl AspectRatioBucket {
    pub const fn as_str(self) -> &'static str {
        match self {
            AspectRatioBucket::Square => "1:1",
            AspectRatioBucket::Landscape16x9 => "16:9",
            AspectRatioBucket::Portrait9x16 => "9:16",
            AspectRatioBucket::Landscape4x3 => "4:3",
            AspectRatioBucket::Portrait3x4 => "3:4",
        }
    }

    pub fn value(self) -> f64 {
        match self {
            AspectRatioBucket::Square => 1.0,
            AspectRatioBucket::Landscape16x9 => 16.0 / 9.0,
            AspectRatioBucket::Portrait9x16 => 9.0 / 16.0,
            AspectRatioBucket::Landscape4x3 => 4.0 / 3.0,
            AspectRatioBucket::Portrait3x4 => 3.0 / 4.0,
        }
    }
}

impl fmt::Display for AspectRatioBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn resolve(width: u32, height: u32) -> AspectRatioBucket {
    if width == 0 || height == 0 {
        return AspectRatioBucket::Square;
    }
    let ratio = f64::from(width) / f64::from(height);
    CANDIDATES
        .into_iter()
        .find(|bucket| (ratio - bucket.value()).abs() < RATIO_TOLERANCE)
        .unwrap_or(AspectRatioBucket::Square)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_sizes() {
        assert_eq!(resolve(1920, 1080), AspectRatioBucket::Landscape16x9);
        assert_eq!(resolve(1080, 1920), AspectRatioBucket::Portrait9x16);
        assert_eq!(resolve(1024, 768), AspectRatioBucket::Landscape4x3);
        assert_eq!(resolve(768, 1024), AspectRatioBucket::Portrait3x4);
        assert_eq!(resolve(800, 800), AspectRatioBucket::Square);
    }

    #[test]
    fn degenerate_dimensions_fall_back_to_square() {
        assert_eq!(resolve(0, 0), AspectRatioBucket::Square);
        assert_eq!(resolve(1200, 0), AspectRatioBucket::Square);
        assert_eq!(resolve(0, 900), AspectRatioBucket::Square);
    }

    #[test]
    fn ratios_outside_tolerance_are_square() {
        // 2.35:1 is far from every candidate.
        assert_eq!(resolve(2350, 1000), AspectRatioBucket::Square);
        // 2:5 is narrower than 9:16 by more than the tolerance.
        assert_eq!(resolve(1000, 2500), AspectRatioBucket::Square);
    }

    #[test]
    fn displays_canonical_label() {
        assert_eq!(AspectRatioBucket::Portrait9x16.to_string(), "9:16");
        assert_eq!(AspectRatioBucket::default().as_str(), "1:1");
    }
}
