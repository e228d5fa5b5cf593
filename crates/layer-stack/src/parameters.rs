//! Named print parameters that format adapters expose for editing.

use std::fmt;

/// A numeric print parameter with its display name, unit and valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrintParameterModifier {
    InitialLayerCount,
    InitialExposureSeconds,
    ExposureSeconds,
    BottomLiftHeight,
    BottomLiftSpeed,
    LiftHeight,
    LiftSpeed,
    RetractSpeed,
    BottomLightOffDelay,
    LightOffDelay,
    BottomLightPwm,
    LightPwm,
}

impl PrintParameterModifier {
    /// Every modifier, in display order.
    pub const ALL: [PrintParameterModifier; 12] = [
        PrintParameterModifier::InitialLayerCount,
        PrintParameterModifier::InitialExposureSeconds,
        PrintParameterModifier::ExposureSeconds,
        PrintParameterModifier::BottomLiftHeight,
        PrintParameterModifier::BottomLiftSpeed,
        PrintParameterModifier::LiftHeight,
        PrintParameterModifier::LiftSpeed,
        PrintParameterModifier::RetractSpeed,
        PrintParameterModifier::BottomLightOffDelay,
        PrintParameterModifier::LightOffDelay,
        PrintParameterModifier::BottomLightPwm,
        PrintParameterModifier::LightPwm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialLayerCount => "Bottom layer count",
            Self::InitialExposureSeconds => "Bottom exposure time",
            Self::ExposureSeconds => "Exposure time",
            Self::BottomLiftHeight => "Bottom lift height",
            Self::BottomLiftSpeed => "Bottom lift speed",
            Self::LiftHeight => "Lift height",
            Self::LiftSpeed => "Lift speed",
            Self::RetractSpeed => "Retract speed",
            Self::BottomLightOffDelay => "Bottom light-off seconds",
            Self::LightOffDelay => "Light-off seconds",
            Self::BottomLightPwm => "Bottom light PWM",
            Self::LightPwm => "Light PWM",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::InitialLayerCount => "layers",
            Self::InitialExposureSeconds
            | Self::ExposureSeconds
            | Self::BottomLightOffDelay
            | Self::LightOffDelay => "s",
            Self::BottomLiftHeight | Self::LiftHeight => "mm",
            Self::BottomLiftSpeed | Self::LiftSpeed | Self::RetractSpeed => "mm/min",
            Self::BottomLightPwm | Self::LightPwm => "",
        }
    }

    /// Inclusive valid range.
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::InitialLayerCount => (0.0, 255.0),
            Self::InitialExposureSeconds => (0.1, 1000.0),
            Self::ExposureSeconds => (0.1, 1000.0),
            Self::BottomLiftHeight | Self::LiftHeight => (1.0, 300.0),
            Self::BottomLiftSpeed | Self::LiftSpeed | Self::RetractSpeed => (10.0, 5000.0),
            Self::BottomLightOffDelay | Self::LightOffDelay => (0.0, 1000.0),
            Self::BottomLightPwm | Self::LightPwm => (1.0, 255.0),
        }
    }

    /// Whether a single layer can carry its own value for this parameter.
    pub fn is_layer_level(&self) -> bool {
        matches!(
            self,
            Self::ExposureSeconds
                | Self::LiftHeight
                | Self::LiftSpeed
                | Self::RetractSpeed
                | Self::LightOffDelay
                | Self::LightPwm
        )
    }

    /// Clamp a value into the valid range.
    pub fn clamp(&self, value: f64) -> f64 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

impl fmt::Display for PrintParameterModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit().is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{} ({})", self.name(), self.unit())
        }
    }
}
