//! Distance primitives for the two-stage proximity filter.
//!
//! [`precise_distance`] is the exact great-circle (haversine) distance.
//! [`CheapBound`] is an O(1) planar rejection test, valid inside an operating
//! latitude band, that lets the join skip trigonometry for the overwhelming
//! majority of candidate pairs. A `true` from the cheap test only means
//! "maybe": callers must confirm with the precise distance.

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Lower bound on meters per degree of latitude.
///
/// The haversine sphere gives ~111,195 m/°; using the smaller figure makes
/// the planar estimate underestimate, never overestimate, the distance.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Default operating latitude (Porto, where the taxi corpus was recorded)
pub const DEFAULT_REFERENCE_LATITUDE: f64 = 41.15;

/// Default half-width of the operating latitude band (degrees)
pub const DEFAULT_BAND_HALF_WIDTH: f64 = 5.0;

/// Multiplier applied to the search radius inside the cheap test
const CHEAP_BOUND_HEADROOM: f64 = 1.05;

/// Multiplier applied when deriving a grid cell size from a radius
const CELL_SIZE_HEADROOM: f64 = 1.1;

/// Exact great-circle distance in meters between two `(lat, lon)` points
/// given in degrees.
pub fn precise_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Cheap "could these be within `max_meters`?" test using the default
/// operating band. See [`CheapBound::may_be_within`].
pub fn cheap_bound(lat1: f64, lon1: f64, lat2: f64, lon2: f64, max_meters: f64) -> bool {
    CheapBound::default().may_be_within(lat1, lon1, lat2, lon2, max_meters)
}

/// Meters spanned by one degree of longitude at `lat` (lower bound).
pub fn meters_per_degree_lon(lat: f64) -> f64 {
    METERS_PER_DEGREE * lat.to_radians().cos()
}

/// Planar rejection test with scale factors fixed for a latitude band.
///
/// Longitude is scaled at the band's most poleward edge, where a degree of
/// longitude is shortest, so the planar distance never exceeds the true
/// distance for points inside the band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheapBound {
    /// Meters per degree of latitude
    lat_scale: f64,

    /// Meters per degree of longitude at the band's poleward edge
    lon_scale: f64,

    /// Southern edge of the band (degrees)
    min_lat: f64,

    /// Northern edge of the band (degrees)
    max_lat: f64,
}

impl CheapBound {
    /// Creates a bound valid for latitudes in `[min_lat, max_lat]`.
    pub fn for_band(min_lat: f64, max_lat: f64) -> Self {
        let (min_lat, max_lat) = if min_lat <= max_lat {
            (min_lat, max_lat)
        } else {
            (max_lat, min_lat)
        };
        let min_lat = min_lat.max(-89.0);
        let max_lat = max_lat.min(89.0);

        Self {
            lat_scale: METERS_PER_DEGREE,
            lon_scale: meters_per_degree_lon(poleward_latitude(min_lat, max_lat)),
            min_lat,
            max_lat,
        }
    }

    /// Creates a bound for `reference_lat ± half_width` degrees.
    pub fn for_latitude(reference_lat: f64, half_width: f64) -> Self {
        Self::for_band(reference_lat - half_width, reference_lat + half_width)
    }

    /// Southern and northern edges of the band (degrees).
    pub fn band(&self) -> (f64, f64) {
        (self.min_lat, self.max_lat)
    }

    /// A bound whose band also spans `[lo, hi]`.
    pub fn widened(&self, lo: f64, hi: f64) -> Self {
        Self::for_band(self.min_lat.min(lo), self.max_lat.max(hi))
    }

    /// Returns true if `lat` lies inside the operating band.
    pub fn covers(&self, lat: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat
    }

    /// Meters per degree of longitude used by this bound.
    pub fn lon_scale(&self) -> f64 {
        self.lon_scale
    }

    /// Meters per degree of latitude used by this bound.
    pub fn lat_scale(&self) -> f64 {
        self.lat_scale
    }

    /// Returns false only when the two points cannot be within `max_meters`.
    ///
    /// Points outside the band cannot be judged cheaply and always pass.
    pub fn may_be_within(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64, max_meters: f64) -> bool {
        if !self.covers(lat1) || !self.covers(lat2) {
            return true;
        }

        let reach = max_meters * CHEAP_BOUND_HEADROOM;

        let lat_m = (lat2 - lat1).abs() * self.lat_scale;
        if lat_m > reach {
            return false;
        }
        let lon_m = (lon2 - lon1).abs() * self.lon_scale;
        if lon_m > reach {
            return false;
        }

        lat_m * lat_m + lon_m * lon_m <= reach * reach
    }

    /// Smallest grid cell size (degrees) whose 3×3 neighborhood is guaranteed
    /// to contain every point within `radius_m` of a query inside the band.
    pub fn min_cell_size(&self, radius_m: f64) -> f64 {
        radius_m / self.lat_scale.min(self.lon_scale)
    }

    /// Recommended cell size: [`min_cell_size`](Self::min_cell_size) plus headroom.
    pub fn safe_cell_size(&self, radius_m: f64) -> f64 {
        self.min_cell_size(radius_m) * CELL_SIZE_HEADROOM
    }
}

impl Default for CheapBound {
    fn default() -> Self {
        Self::for_latitude(DEFAULT_REFERENCE_LATITUDE, DEFAULT_BAND_HALF_WIDTH)
    }
}

fn poleward_latitude(min_lat: f64, max_lat: f64) -> f64 {
    min_lat.abs().max(max_lat.abs())
}
