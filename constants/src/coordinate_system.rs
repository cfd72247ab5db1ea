/// Metres per international foot.
pub const INTERNATIONAL_FOOT_IN_METERS: f64 = 0.3048;

/// Metres per US survey foot (1200/3937, the pre-2023 state plane foot).
pub const US_SURVEY_FOOT_IN_METERS: f64 = 1200.0 / 3937.0;

/// Web-mercator ground resolution at zoom 0 on the equator, metres per pixel
/// for 256-pixel tiles (Earth circumference / 256).
pub const GROUND_RESOLUTION_Z0: f64 = 156_543.033_928_04;

/// Ground resolution in metres per device pixel for a web-mercator view.
/// Shrinks with the cosine of latitude and halves per zoom level.
pub fn ground_resolution(latitude_deg: f64, zoom: f64) -> f64 {
    GROUND_RESOLUTION_Z0 * latitude_deg.to_radians().cos() / 2f64.powf(zoom)
}
