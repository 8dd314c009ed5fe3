//! Adjustable camera image properties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraProperty {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

impl CameraProperty {
    pub const ALL: [CameraProperty; 4] = [
        CameraProperty::Brightness,
        CameraProperty::Contrast,
        CameraProperty::Saturation,
        CameraProperty::Hue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CameraProperty::Brightness => "brightness",
            CameraProperty::Contrast => "contrast",
            CameraProperty::Saturation => "saturation",
            CameraProperty::Hue => "hue",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CameraProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CameraProperty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brightness" => Ok(CameraProperty::Brightness),
            "contrast" => Ok(CameraProperty::Contrast),
            "saturation" => Ok(CameraProperty::Saturation),
            "hue" => Ok(CameraProperty::Hue),
            other => Err(format!("unknown camera property: {}", other)),
        }
    }
}

/// A value per property, any of which may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    values: [Option<f64>; 4],
}

impl PropertySet {
    pub fn get(&self, property: CameraProperty) -> Option<f64> {
        self.values[property.index()]
    }

    pub fn set(&mut self, property: CameraProperty, value: f64) {
        self.values[property.index()] = Some(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (CameraProperty, f64)> + '_ {
        CameraProperty::ALL
            .into_iter()
            .filter_map(move |p| self.get(p).map(|v| (p, v)))
    }

    /// Properties from the `[camera]` config section. Negative entries mean
    /// "leave the device value alone" and are skipped.
    pub fn from_config(config: &crate::config::CameraConfig) -> Self {
        let mut set = Self::default();
        for (property, value) in [
            (CameraProperty::Brightness, config.brightness),
            (CameraProperty::Contrast, config.contrast),
            (CameraProperty::Saturation, config.saturation),
            (CameraProperty::Hue, config.hue),
        ] {
            if value >= 0.0 {
                set.set(property, value);
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    #[test]
    fn test_parse_property() {
        assert_eq!("Brightness".parse::<CameraProperty>(), Ok(CameraProperty::Brightness));
        assert_eq!("hue".parse::<CameraProperty>(), Ok(CameraProperty::Hue));
        assert!("gain".parse::<CameraProperty>().is_err());
    }

    #[test]
    fn test_property_set_from_config_skips_negative() {
        let config = CameraConfig {
            brightness: 128.0,
            contrast: -1.0,
            ..CameraConfig::default()
        };
        let set = PropertySet::from_config(&config);
        assert_eq!(set.get(CameraProperty::Brightness), Some(128.0));
        assert_eq!(set.get(CameraProperty::Contrast), None);
        assert_eq!(set.iter().count(), 1);
    }
}
