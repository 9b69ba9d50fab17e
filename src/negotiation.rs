//! Capability negotiation table
//!
//! Stream acquisition walks an ordered list of constraint profiles, from the
//! most demanding to the most permissive, until one is satisfied. The table is
//! plain data so it can be configured and tested without platform sniffing.

use crate::errors::ScannerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    Environment,
    User,
}

/// Ideal value plus optional hard bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub ideal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl Bound {
    pub fn ideal(ideal: u32) -> Self {
        Self {
            ideal,
            min: None,
            max: None,
        }
    }

    pub fn with_min(mut self, min: u32) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: u32) -> Self {
        self.max = Some(max);
        self
    }

    pub fn accepts(&self, value: u32) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }
}

/// One row of the negotiation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<FacingMode>,
    /// Width / height, e.g. 1.333 for 4:3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<Bound>,
}

impl ConstraintProfile {
    /// Profile that accepts whatever the device offers.
    pub fn unconstrained() -> Self {
        Self {
            name: "unconstrained".to_string(),
            width: None,
            height: None,
            frame_rate: None,
            facing_mode: None,
            aspect_ratio: None,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.frame_rate.is_none()
    }

    /// Whether a concrete mode satisfies this profile's hard bounds.
    pub fn accepts(&self, width: u32, height: u32, fps: u32) -> bool {
        self.width.map_or(true, |b| b.accepts(width))
            && self.height.map_or(true, |b| b.accepts(height))
            && self.frame_rate.map_or(true, |b| b.accepts(fps))
    }

    /// Ideal resolution, if the profile names one.
    pub fn ideal_resolution(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w.ideal, h.ideal)),
            _ => None,
        }
    }

    pub fn ideal_frame_rate(&self) -> Option<u32> {
        self.frame_rate.map(|b| b.ideal)
    }
}

/// Ordered list of profiles tried in sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationTable {
    pub profiles: Vec<ConstraintProfile>,
}

impl Default for NegotiationTable {
    fn default() -> Self {
        Self {
            profiles: vec![
                ConstraintProfile {
                    name: "high".to_string(),
                    width: Some(Bound::ideal(1920).with_min(320)),
                    height: Some(Bound::ideal(1080).with_min(240)),
                    frame_rate: Some(Bound::ideal(30).with_min(15)),
                    facing_mode: Some(FacingMode::Environment),
                    aspect_ratio: None,
                },
                ConstraintProfile {
                    name: "medium".to_string(),
                    width: Some(Bound::ideal(1280).with_min(320)),
                    height: Some(Bound::ideal(720).with_min(240)),
                    frame_rate: Some(Bound::ideal(30).with_max(30)),
                    facing_mode: Some(FacingMode::Environment),
                    aspect_ratio: Some(16.0 / 9.0),
                },
                ConstraintProfile {
                    name: "conservative".to_string(),
                    width: Some(Bound::ideal(640).with_max(1280)),
                    height: Some(Bound::ideal(480).with_max(720)),
                    frame_rate: Some(Bound::ideal(15).with_max(20)),
                    facing_mode: Some(FacingMode::Environment),
                    aspect_ratio: Some(4.0 / 3.0),
                },
                ConstraintProfile {
                    name: "minimal".to_string(),
                    width: Some(Bound::ideal(320).with_max(640)),
                    height: Some(Bound::ideal(240).with_max(480)),
                    frame_rate: Some(Bound::ideal(10).with_max(15)),
                    facing_mode: Some(FacingMode::Environment),
                    aspect_ratio: None,
                },
                ConstraintProfile::unconstrained(),
            ],
        }
    }
}

impl NegotiationTable {
    pub fn new(profiles: Vec<ConstraintProfile>) -> Self {
        Self { profiles }
    }

    /// Profiles in trial order. An unconstrained profile is appended when the
    /// table does not already end with one, so a valid device never fails on
    /// resolution alone.
    pub fn attempts(&self) -> Vec<ConstraintProfile> {
        let mut profiles = self.profiles.clone();
        if !profiles.last().is_some_and(|p| p.is_unconstrained()) {
            profiles.push(ConstraintProfile::unconstrained());
        }
        profiles
    }

    pub fn validate(&self) -> Result<(), ScannerError> {
        for profile in &self.profiles {
            for (axis, bound) in [
                ("width", profile.width),
                ("height", profile.height),
                ("frame_rate", profile.frame_rate),
            ] {
                if let Some(b) = bound {
                    if b.ideal == 0 {
                        return Err(ScannerError::Config(format!(
                            "profile '{}': {} ideal must be non-zero",
                            profile.name, axis
                        )));
                    }
                    if let (Some(min), Some(max)) = (b.min, b.max) {
                        if min > max {
                            return Err(ScannerError::Config(format!(
                                "profile '{}': {} min exceeds max",
                                profile.name, axis
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
