use crate::models::LocationFix;

/// Jordradius (m), samme som de fleste GPS-stakker bruker
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Storsirkelavstand i meter mellom to posisjoner (haversine).
pub fn haversine_m(a: &LocationFix, b: &LocationFix) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Flytt en posisjon `meters` rett nordover. Hjelper for simulerte spor.
pub fn offset_north(fix: &LocationFix, meters: f64, timestamp_ms: i64) -> LocationFix {
    let dlat = (meters / EARTH_RADIUS_M).to_degrees();
    LocationFix::new(fix.latitude + dlat, fix.longitude, timestamp_ms)
}
