// AQI bands (US EPA breakpoints). Boundary values belong to the lower band.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const ALL: [AqiCategory; 6] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthyForSensitiveGroups,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// Hex display colour.
    pub fn color(self) -> &'static str {
        match self {
            AqiCategory::Good => "#00e400",
            AqiCategory::Moderate => "#ffff00",
            AqiCategory::UnhealthyForSensitiveGroups => "#ff7e00",
            AqiCategory::Unhealthy => "#ff0000",
            AqiCategory::VeryUnhealthy => "#8f3f97",
            AqiCategory::Hazardous => "#7e0023",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            AqiCategory::Good => "Air quality is satisfactory. Enjoy outdoor activities.",
            AqiCategory::Moderate => {
                "Air quality is acceptable. Sensitive individuals should limit outdoor exertion."
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "Sensitive groups may experience health effects. Reduce prolonged outdoor exertion."
            }
            AqiCategory::Unhealthy => {
                "Everyone may experience health effects. Avoid prolonged outdoor exertion."
            }
            AqiCategory::VeryUnhealthy => {
                "Health alert: everyone may experience serious health effects. Stay indoors."
            }
            AqiCategory::Hazardous => {
                "Health warning: emergency conditions. Everyone should avoid all outdoor activities."
            }
        }
    }

    /// Inverse of `label`, used when reading stored predictions back.
    pub fn from_label(label: &str) -> Option<AqiCategory> {
        AqiCategory::ALL.into_iter().find(|c| c.label() == label)
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Band an AQI score. Total over f64: NaN lands in `Hazardous`.
pub fn categorize(aqi: f64) -> AqiCategory {
    if aqi <= 50.0 {
        AqiCategory::Good
    } else if aqi <= 100.0 {
        AqiCategory::Moderate
    } else if aqi <= 150.0 {
        AqiCategory::UnhealthyForSensitiveGroups
    } else if aqi <= 200.0 {
        AqiCategory::Unhealthy
    } else if aqi <= 300.0 {
        AqiCategory::VeryUnhealthy
    } else {
        AqiCategory::Hazardous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_belong_to_the_lower_band() {
        assert_eq!(categorize(50.0).label(), "Good");
        assert_eq!(categorize(50.0001).label(), "Moderate");
        assert_eq!(categorize(100.0), AqiCategory::Moderate);
        assert_eq!(categorize(150.0), AqiCategory::UnhealthyForSensitiveGroups);
        assert_eq!(categorize(200.0), AqiCategory::Unhealthy);
        assert_eq!(categorize(300.0).label(), "Very Unhealthy");
        assert_eq!(categorize(300.0001).label(), "Hazardous");
    }

    #[test]
    fn extremes() {
        assert_eq!(categorize(-20.0), AqiCategory::Good);
        assert_eq!(categorize(f64::NEG_INFINITY), AqiCategory::Good);
        assert_eq!(categorize(1e9), AqiCategory::Hazardous);
        assert_eq!(categorize(f64::NAN), AqiCategory::Hazardous);
    }

    #[test]
    fn bands_are_monotonic() {
        let mut last = categorize(-1.0);
        let mut v = -1.0;
        while v < 600.0 {
            let c = categorize(v);
            assert!(c >= last);
            assert!(AqiCategory::ALL.contains(&c));
            last = c;
            v += 0.25;
        }
    }

    #[test]
    fn labels_round_trip() {
        for c in AqiCategory::ALL {
            assert_eq!(AqiCategory::from_label(c.label()), Some(c));
            assert!(c.color().starts_with('#'));
            assert!(!c.message().is_empty());
        }
        assert_eq!(AqiCategory::from_label("Fine"), None);
    }
}
