use crate::config::PaletteConfig;
use crate::processing::quantile;
use crate::types::{Listing, RoomType};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::f64::consts::PI;

// Grid extends this many bandwidths past the data on each side
const CUT: f64 = 3.0;

#[derive(Debug, Clone, Serialize)]
pub struct DensitySeries {
    pub room_type: RoomType,
    pub color: String,
    /// Raw retained prices, for charts that estimate density themselves
    pub prices: Vec<f64>,
    pub bandwidth: Option<f64>,
    /// `[price, density]` pairs
    pub curve: Vec<[f64; 2]>,
}

pub fn density_series(
    groups: BTreeMap<RoomType, Vec<f64>>,
    palette: &PaletteConfig,
    points: usize,
) -> Vec<DensitySeries> {
    groups
        .into_iter()
        .map(|(room_type, mut prices)| {
            prices.sort_by(f64::total_cmp);
            let (bandwidth, curve) = if prices.len() >= 2 {
                let bw = silverman_bandwidth(&prices);
                (Some(bw), gaussian_kde(&prices, bw, points))
            } else {
                (None, Vec::new())
            };
            DensitySeries {
                room_type,
                color: palette.color_for(room_type).to_string(),
                prices,
                bandwidth,
                curve,
            }
        })
        .collect()
}

/// Silverman's rule of thumb over sorted values, with the usual fallbacks
/// when the spread collapses to zero.
pub fn silverman_bandwidth(sorted: &[f64]) -> f64 {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = if sorted.len() > 1 {
        sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    let sd = variance.sqrt();

    let iqr = match (quantile(sorted, 0.25), quantile(sorted, 0.75)) {
        (Some(q1), Some(q3)) => q3 - q1,
        _ => 0.0,
    };

    let mut lo = sd.min(iqr / 1.34);
    if lo <= 0.0 {
        lo = if sd > 0.0 {
            sd
        } else if sorted.first().is_some_and(|x| x.abs() > 0.0) {
            sorted[0].abs()
        } else {
            1.0
        };
    }

    0.9 * lo * n.powf(-0.2)
}

pub fn gaussian_kde(sorted: &[f64], bandwidth: f64, points: usize) -> Vec<[f64; 2]> {
    let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
        return Vec::new();
    };
    if points < 2 || bandwidth <= 0.0 {
        return Vec::new();
    }

    let from = min - CUT * bandwidth;
    let to = max + CUT * bandwidth;
    let step = (to - from) / (points - 1) as f64;
    let norm = 1.0 / (sorted.len() as f64 * bandwidth * (2.0 * PI).sqrt());

    (0..points)
        .map(|i| {
            let x = from + step * i as f64;
            let sum: f64 = sorted
                .iter()
                .map(|xi| {
                    let u = (x - xi) / bandwidth;
                    (-0.5 * u * u).exp()
                })
                .sum();
            [x, sum * norm]
        })
        .collect()
}

/// Map payload: one point feature per listing, colored by room type.
pub fn listings_geojson(listings: &[&Listing], palette: &PaletteConfig) -> FeatureCollection {
    let features = listings
        .iter()
        .map(|listing| {
            let mut properties = JsonObject::new();
            properties.insert("room_type".into(), listing.room_type.label().into());
            properties.insert("color".into(), palette.color_for(listing.room_type).into());
            properties.insert("price".into(), listing.price.into());
            properties.insert("host_name".into(), listing.host_name.clone().into());
            properties.insert("neighbourhood".into(), listing.neighbourhood.clone().into());

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![
                    listing.longitude,
                    listing.latitude,
                ]))),
                id: Some(Id::Number(listing.id.into())),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
