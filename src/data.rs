use crate::config::AppConfig;
use crate::processing;
use crate::types::{Bounds, Listing, RoomType};
use anyhow::{Context, Result, anyhow, bail};
use csv::ReaderBuilder;
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// Wrapper for RTree indexing
struct ListingPoint {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for ListingPoint {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

/// One city's snapshot. Immutable once built.
pub struct CityDataset {
    name: String,
    listings: Vec<Listing>,
    has_groups: bool,
    area_keys: Vec<String>,
    tree: RTree<ListingPoint>,
}

impl CityDataset {
    pub fn new(name: impl Into<String>, listings: Vec<Listing>) -> Self {
        let has_groups = listings.iter().any(|l| l.neighbourhood_group.is_some());
        let area_keys = processing::resolve_area_keys(&listings, has_groups);

        let points = listings
            .iter()
            .enumerate()
            .map(|(index, l)| ListingPoint {
                index,
                position: [l.longitude, l.latitude],
            })
            .collect();

        Self {
            name: name.into(),
            listings,
            has_groups,
            area_keys,
            tree: RTree::bulk_load(points),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }

    /// Whether area keys come from neighbourhood groups rather than neighbourhoods.
    pub fn has_groups(&self) -> bool {
        self.has_groups
    }

    pub fn area_keys(&self) -> &[String] {
        &self.area_keys
    }

    pub fn has_area(&self, key: &str) -> bool {
        self.area_keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
    }

    /// Listings inside `bounds`, in dataset order. Uses the spatial index.
    pub fn within(&self, bounds: &Bounds) -> Vec<&Listing> {
        let rect = bounds.to_rect();
        let envelope = AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );

        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope(&envelope)
            .map(|p| p.index)
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| &self.listings[i]).collect()
    }
}

/// All loaded cities keyed by uppercase name.
#[derive(Default)]
pub struct Catalog {
    cities: BTreeMap<String, Arc<CityDataset>>,
}

impl Catalog {
    pub fn from_datasets(datasets: impl IntoIterator<Item = CityDataset>) -> Self {
        let cities = datasets
            .into_iter()
            .map(|d| (d.name.clone(), Arc::new(d)))
            .collect();
        Self { cities }
    }

    pub fn get(&self, city: &str) -> Option<Arc<CityDataset>> {
        self.cities.get(city).cloned()
    }

    pub fn city_names(&self) -> Vec<String> {
        self.cities.keys().cloned().collect()
    }

}

#[derive(Debug, Deserialize)]
struct ListingRecord {
    id: u64,
    host_id: u64,
    #[serde(default)]
    host_name: Option<String>,
    #[serde(default)]
    neighbourhood_group: Option<String>,
    neighbourhood: String,
    // `NA` and other non-numbers count as missing
    #[serde(deserialize_with = "csv::invalid_option")]
    latitude: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    longitude: Option<f64>,
    room_type: RoomType,
    price: Option<String>,
}

pub fn load_data(config: &AppConfig) -> Result<Catalog> {
    load_catalog(&config.input.data_dir)
}

pub fn load_catalog(dir: &Path) -> Result<Catalog> {
    info!("Loading listings from {:?}", dir);

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read data directory: {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("No CSV files found in {:?}", dir);
    }

    let datasets = paths
        .par_iter()
        .map(|path| load_city(path))
        .collect::<Result<Vec<_>>>()?;

    info!("Loaded {} cities", datasets.len());
    Ok(Catalog::from_datasets(datasets))
}

fn load_city(path: &Path) -> Result<CityDataset> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_uppercase())
        .ok_or_else(|| anyhow!("Listing file has no usable name: {:?}", path))?;

    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);

    let mut listings = Vec::new();
    let mut skipped = 0usize;

    for (row, result) in rdr.deserialize::<ListingRecord>().enumerate() {
        let record = result.with_context(|| format!("Malformed row {} in {:?}", row + 1, path))?;
        let (Some(latitude), Some(longitude)) = (record.latitude, record.longitude) else {
            skipped += 1;
            continue;
        };
        if is_missing(&record.neighbourhood) {
            skipped += 1;
            continue;
        }
        let price = match record.price.as_deref().filter(|p| !is_missing(p)) {
            Some(raw) => parse_price(raw)
                .with_context(|| format!("Bad price on row {} in {:?}", row + 1, path))?,
            None => {
                skipped += 1;
                continue;
            }
        };

        listings.push(Listing {
            id: record.id,
            host_id: record.host_id,
            host_name: record.host_name.unwrap_or_default(),
            room_type: record.room_type,
            price,
            latitude,
            longitude,
            neighbourhood: record.neighbourhood,
            neighbourhood_group: record
                .neighbourhood_group
                .filter(|g| !is_missing(g)),
        });
    }

    if skipped > 0 {
        warn!("{}: skipped {} rows without coordinates, neighbourhood or price", name, skipped);
    }
    let dataset = CityDataset::new(name, listings);
    info!(
        "{}: {} listings, {} areas by {}",
        dataset.name(),
        dataset.listings().len(),
        dataset.area_keys().len(),
        if dataset.has_groups() { "neighbourhood group" } else { "neighbourhood" }
    );

    Ok(dataset)
}

/// Blank or R's `NA`.
fn is_missing(field: &str) -> bool {
    let field = field.trim();
    field.is_empty() || field == "NA"
}

/// Accepts `125`, `125.50` and `$1,250.00`.
fn parse_price(raw: &str) -> Result<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let price: f64 = cleaned
        .parse()
        .with_context(|| format!("Not a price: {:?}", raw))?;
    if !price.is_finite() || price < 0.0 {
        bail!("Price out of range: {:?}", raw);
    }
    Ok(price)
}
