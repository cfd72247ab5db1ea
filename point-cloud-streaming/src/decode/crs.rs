//! Native-CRS to geographic coordinate conversion.
//!
//! Datasets declare their CRS as either WKT or a proj string. Horizontal
//! coordinates are reprojected to WGS84 longitude/latitude; elevation keeps
//! its native value apart from a unit conversion to meters, detected from
//! the CRS text (datum-level vertical shifts are out of scope).

use constants::coordinate_system::{INTERNATIONAL_FOOT_IN_METERS, US_SURVEY_FOOT_IN_METERS};

use crate::error::StreamError;

const WGS84_LONGLAT: &str = "+proj=longlat +datum=WGS84 +no_defs";

pub struct CrsTransform {
    native: proj4rs::Proj,
    geographic: proj4rs::Proj,
    native_is_latlong: bool,
    vertical_to_meters: f64,
}

impl CrsTransform {
    pub fn from_description(description: &str) -> Result<CrsTransform, StreamError> {
        let trimmed = description.trim();
        let proj_string = if trimmed.starts_with('+') {
            trimmed.to_string()
        } else {
            proj4wkt::wkt_to_projstring(trimmed)
                .map_err(|e| StreamError::Format(format!("unparseable CRS WKT: {e}")))?
        };
        let native = proj4rs::Proj::from_proj_string(&proj_string)
            .map_err(|e| StreamError::Format(format!("unsupported CRS '{proj_string}': {e}")))?;
        let geographic = proj4rs::Proj::from_proj_string(WGS84_LONGLAT)
            .map_err(|e| StreamError::Format(format!("WGS84 definition rejected: {e}")))?;
        let native_is_latlong = native.is_latlong();
        Ok(CrsTransform {
            native,
            geographic,
            native_is_latlong,
            vertical_to_meters: vertical_unit_factor(description),
        })
    }

    /// Native units to longitude/latitude in degrees plus elevation in
    /// meters. Geographic endpoints of proj4rs speak radians.
    pub fn to_geographic(&self, x: f64, y: f64, z: f64) -> Result<(f64, f64, f64), StreamError> {
        let mut point = if self.native_is_latlong {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&self.native, &self.geographic, &mut point)
            .map_err(|e| StreamError::Format(format!("reprojection failed: {e}")))?;
        Ok((
            point.0.to_degrees(),
            point.1.to_degrees(),
            z * self.vertical_to_meters,
        ))
    }

    /// Longitude/latitude in degrees to native horizontal units.
    pub fn from_geographic(&self, lon: f64, lat: f64) -> Result<(f64, f64), StreamError> {
        let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
        proj4rs::transform::transform(&self.geographic, &self.native, &mut point)
            .map_err(|e| StreamError::Format(format!("reprojection failed: {e}")))?;
        if self.native_is_latlong {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    pub fn vertical_to_meters(&self) -> f64 {
        self.vertical_to_meters
    }
}

/// Elevation unit factor from the CRS text. The two foot definitions differ
/// by about 2ppm, which matters over state-plane elevations.
fn vertical_unit_factor(description: &str) -> f64 {
    let lower = description.to_ascii_lowercase();
    if lower.contains("us survey foot")
        || lower.contains("us_survey_foot")
        || lower.contains("foot_us")
        || lower.contains("ftus")
    {
        US_SURVEY_FOOT_IN_METERS
    } else if lower.contains("foot") || lower.contains("+units=ft") {
        INTERNATIONAL_FOOT_IN_METERS
    } else {
        1.0
    }
}
