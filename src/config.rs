// SPDX-License-Identifier: GPL-3.0-or-later

use nalgebra::Vector3;

use crate::{ DistorterError, Result };

/// Geometry of one projector/mirror/dome installation.
///
/// All positions are in the same arbitrary length unit, y up, with the dome
/// center at the origin; only ratios to `mirror_radius` matter. The value is
/// immutable once handed to the model — changing the setup means building a
/// new config and calling `init` again.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MirrorConfig {
    pub projector_position: Vector3<f64>,
    pub mirror_position: Vector3<f64>,
    pub mirror_radius: f64,
    pub dome_radius: f64,
    /// Image ordinate where the zenith direction (0,1,0) should land.
    pub zenith_y: f64,
    pub scaling_factor: f64,
    /// Brightness correction exponent, clamped at >= 0.
    pub gamma: f64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            projector_position: Vector3::new(0.0, 1.0, -0.2),
            mirror_position: Vector3::new(0.0, 2.0, 0.0),
            mirror_radius: 0.25,
            dome_radius: 2.5,
            zenith_y: 0.125,
            scaling_factor: 0.8,
            gamma: 0.45,
        }
    }
}

impl MirrorConfig {
    /// Rejects geometry the optics model cannot be built from.
    ///
    /// The projector has to sit strictly outside the mirror sphere, otherwise
    /// `zoom_factor = sqrt(|P|² - 1)` has no real solution.
    pub fn validate(&self) -> Result<()> {
        if !(self.mirror_radius > 0.0) {
            return Err(DistorterError::InvalidRadius { name: "mirror_radius", value: self.mirror_radius });
        }
        if !(self.dome_radius > 0.0) {
            return Err(DistorterError::InvalidRadius { name: "dome_radius", value: self.dome_radius });
        }
        let dist = (self.projector_position - self.mirror_position).norm();
        if !(dist > self.mirror_radius) {
            return Err(DistorterError::ProjectorInsideMirror { dist, radius: self.mirror_radius });
        }
        Ok(())
    }

    pub(crate) fn gamma_clamped(&self) -> f64 {
        self.gamma.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MirrorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_projector_inside_mirror() {
        let config = MirrorConfig {
            projector_position: Vector3::new(0.0, 2.1, 0.0),
            mirror_position: Vector3::new(0.0, 2.0, 0.0),
            mirror_radius: 0.25,
            ..MirrorConfig::default()
        };
        assert!(matches!(config.validate(), Err(DistorterError::ProjectorInsideMirror { .. })));
    }

    #[test]
    fn rejects_non_positive_radii() {
        let config = MirrorConfig { mirror_radius: 0.0, ..MirrorConfig::default() };
        assert!(matches!(config.validate(), Err(DistorterError::InvalidRadius { name: "mirror_radius", .. })));

        let config = MirrorConfig { dome_radius: -2.5, ..MirrorConfig::default() };
        assert!(matches!(config.validate(), Err(DistorterError::InvalidRadius { name: "dome_radius", .. })));
    }

    #[test]
    fn serde_round_trip() {
        let config = MirrorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: MirrorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
