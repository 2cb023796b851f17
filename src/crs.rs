//! Reprojection of source geometry to WGS84 lon/lat.
//!
//! Only the systems protected-area boundaries actually ship in are handled:
//! plain WGS84, Web Mercator and WGS84 UTM zones.

use crate::error::LoadError;
use geo::{Coord, MapCoords, MultiPolygon};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    Wgs84,
    WebMercator,
    Utm { zone: u8, south: bool },
}

impl Crs {
    /// Parse an `EPSG:nnnn` code.
    pub fn from_code(code: &str) -> Result<Self, LoadError> {
        let upper = code.trim().to_uppercase();
        let number: u32 = upper
            .strip_prefix("EPSG:")
            .unwrap_or(&upper)
            .parse()
            .map_err(|_| LoadError::UnsupportedCrs(code.to_string()))?;

        match number {
            4326 => Ok(Self::Wgs84),
            3857 | 900913 => Ok(Self::WebMercator),
            32601..=32660 => Ok(Self::Utm { zone: (number - 32600) as u8, south: false }),
            32701..=32760 => Ok(Self::Utm { zone: (number - 32700) as u8, south: true }),
            _ => Err(LoadError::UnsupportedCrs(code.to_string())),
        }
    }

    /// Sniff an ESRI `.prj` WKT string.
    pub fn from_wkt(wkt: &str) -> Result<Self, LoadError> {
        let text = wkt.trim();
        let lower = text.to_lowercase();

        if lower.starts_with("geogcs") {
            return Ok(Self::Wgs84);
        }
        if lower.contains("mercator_auxiliary_sphere") || lower.contains("pseudo-mercator") {
            return Ok(Self::WebMercator);
        }
        if let Some(pos) = lower.find("utm") {
            // "UTM_Zone_37S" / "UTM zone 37S"
            let tail: String = lower[pos + 3..]
                .trim_start_matches(|c: char| c == '_' || c == ' ')
                .trim_start_matches("zone")
                .trim_start_matches(|c: char| c == '_' || c == ' ')
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
            let hemisphere = tail.chars().nth(digits.len());
            if let (Ok(zone), Some(h)) = (digits.parse::<u8>(), hemisphere) {
                if (1..=60).contains(&zone) && (h == 'n' || h == 's') {
                    return Ok(Self::Utm { zone, south: h == 's' });
                }
            }
        }
        Err(LoadError::UnsupportedCrs(text.chars().take(80).collect()))
    }

    /// CRS for a geometry file: explicit code, then a `.prj` sidecar, then WGS84.
    pub fn detect(configured: Option<&str>, geometry_path: &Path) -> Result<Self, LoadError> {
        if let Some(code) = configured {
            return Self::from_code(code);
        }
        let prj = geometry_path.with_extension("prj");
        if prj.exists() {
            let wkt = fs::read_to_string(&prj)
                .map_err(|source| LoadError::Io { path: prj.clone(), source })?;
            return Self::from_wkt(&wkt);
        }
        Ok(Self::Wgs84)
    }

    /// (x, y) in this system -> (lon, lat) degrees.
    pub fn to_lon_lat(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Self::Wgs84 => (x, y),
            Self::WebMercator => {
                let lon = (x / WGS84_A).to_degrees();
                let lat = (2.0 * (y / WGS84_A).exp().atan() - PI / 2.0).to_degrees();
                (lon, lat)
            }
            Self::Utm { zone, south } => utm_inverse(x, y, zone, south),
        }
    }

    pub fn normalize(&self, geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
        if *self == Self::Wgs84 {
            return geometry;
        }
        geometry.map_coords(|c| {
            let (x, y) = self.to_lon_lat(c.x, c.y);
            Coord { x, y }
        })
    }
}

fn utm_inverse(easting: f64, northing: f64, zone: u8, south: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let x = easting - UTM_FALSE_EASTING;
    let y = if south { northing - UTM_FALSE_NORTHING_SOUTH } else { northing };

    let m = y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));

    // footpoint latitude
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let c1 = ep2 * cos1.powi(2);
    let t1 = tan1.powi(2);
    let n1 = WGS84_A / (1.0 - e2 * sin1.powi(2)).sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1.powi(2)).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let lat = phi1
        - (n1 * tan1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2) - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);

    let central_meridian = (zone as f64 * 6.0 - 183.0).to_radians();
    let lon = central_meridian
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}
