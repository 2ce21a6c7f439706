use crate::types::{Bounds, Extent, Listing, RoomType};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::{MultiPoint, Point};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Area options for a city: distinct neighbourhood groups when the city has
/// any, otherwise distinct neighbourhoods. Sorted, no empty keys.
pub fn resolve_area_keys(listings: &[Listing], has_groups: bool) -> Vec<String> {
    let keys: BTreeSet<&str> = if has_groups {
        listings
            .iter()
            .filter_map(|l| l.neighbourhood_group.as_deref())
            .collect()
    } else {
        listings.iter().map(|l| l.neighbourhood.as_str()).collect()
    };

    keys.into_iter()
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Listings whose neighbourhood or neighbourhood group equals `key`.
pub fn filter_area<'a>(
    listings: impl IntoIterator<Item = &'a Listing>,
    key: &str,
) -> Vec<&'a Listing> {
    listings
        .into_iter()
        .filter(|l| l.neighbourhood == key || l.neighbourhood_group.as_deref() == Some(key))
        .collect()
}

pub fn filter_bounds<'a>(
    listings: impl IntoIterator<Item = &'a Listing>,
    bounds: &Bounds,
) -> Vec<&'a Listing> {
    let bounds = bounds.normalized();
    listings
        .into_iter()
        .filter(|l| bounds.contains(l))
        .collect()
}

/// Extent of a set of listings, `None` when empty.
pub fn compute_extent<'a>(listings: impl IntoIterator<Item = &'a Listing>) -> Option<Extent> {
    let points: MultiPoint<f64> = listings
        .into_iter()
        .map(|l| Point::new(l.longitude, l.latitude))
        .collect();

    points.bounding_rect().map(|rect| Extent {
        lng: [rect.min().x, rect.max().x],
        lat: [rect.min().y, rect.max().y],
    })
}

/// Linear-interpolation percentile over sorted values (R type 7).
pub fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Upper Tukey fence: `multiplier * IQR + Q3`.
pub fn price_threshold<'a>(
    listings: impl IntoIterator<Item = &'a Listing>,
    multiplier: f64,
) -> Option<f64> {
    let mut prices: Vec<f64> = listings.into_iter().map(|l| l.price).collect();
    prices.sort_by(f64::total_cmp);

    let q1 = quantile(&prices, 0.25)?;
    let q3 = quantile(&prices, 0.75)?;
    Some(multiplier * (q3 - q1) + q3)
}

/// Drops the upper price tail. The lower tail is left alone. Returns the
/// threshold used, `None` for empty input.
pub fn trim_price_outliers<'a>(
    listings: &[&'a Listing],
    multiplier: f64,
) -> (Option<f64>, Vec<&'a Listing>) {
    let Some(threshold) = price_threshold(listings.iter().copied(), multiplier) else {
        return (None, Vec::new());
    };
    let retained = listings
        .iter()
        .copied()
        .filter(|l| l.price < threshold)
        .collect();
    (Some(threshold), retained)
}

/// Retained prices per room type, input to the density chart.
pub fn prices_by_room_type(listings: &[&Listing]) -> BTreeMap<RoomType, Vec<f64>> {
    let mut groups: BTreeMap<RoomType, Vec<f64>> = BTreeMap::new();
    for listing in listings {
        groups.entry(listing.room_type).or_default().push(listing.price);
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostBar {
    /// Listings per host
    pub n: usize,
    /// Hosts holding exactly `n` listings
    pub host_count: usize,
    pub tooltip: String,
}

pub fn host_concentration(listings: &[&Listing]) -> Vec<HostBar> {
    let mut per_host: HashMap<(u64, &str), HashSet<u64>> = HashMap::new();
    for listing in listings {
        per_host
            .entry((listing.host_id, listing.host_name.as_str()))
            .or_default()
            .insert(listing.id);
    }

    let mut hosts_per_n: BTreeMap<usize, usize> = BTreeMap::new();
    for ids in per_host.values() {
        *hosts_per_n.entry(ids.len()).or_default() += 1;
    }

    hosts_per_n
        .into_iter()
        .filter(|(n, _)| *n > 1)
        .map(|(n, host_count)| HostBar {
            n,
            host_count,
            tooltip: format!(
                "{} listings: {} host{}",
                n,
                host_count,
                if host_count == 1 { "" } else { "s" }
            ),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomTypeCount {
    pub room_type: RoomType,
    pub count: usize,
}

pub fn room_type_counts(listings: &[&Listing]) -> Vec<RoomTypeCount> {
    let mut counts: BTreeMap<RoomType, usize> = BTreeMap::new();
    for listing in listings {
        *counts.entry(listing.room_type).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(room_type, count)| RoomTypeCount { room_type, count })
        .collect()
}
