use crate::config::{AppConfig, PaletteConfig, ProcessingConfig};
use crate::data::{Catalog, CityDataset};
use crate::processing::{self, HostBar, RoomTypeCount};
use crate::render::{self, DensitySeries};
use crate::types::{Bounds, Extent, Listing};
use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActiveView {
    NoCity,
    CityOnly,
    CityAndArea,
}

/// What the user has picked. Changing a coarser selection invalidates the
/// finer ones below it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionState {
    city: Option<String>,
    area: Option<String>,
    bounds: Option<Bounds>,
}

impl SelectionState {
    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn area(&self) -> Option<&str> {
        self.area.as_deref()
    }

    pub fn bounds(&self) -> Option<&Bounds> {
        self.bounds.as_ref()
    }

    pub fn set_city(&mut self, city: Option<String>) {
        self.city = city;
        self.area = None;
        self.bounds = None;
    }

    /// Ignored while no city is selected.
    pub fn set_area(&mut self, area: Option<String>) -> bool {
        if self.city.is_none() {
            return false;
        }
        self.area = area;
        self.bounds = None;
        true
    }

    /// Ignored while no city is selected.
    pub fn set_bounds(&mut self, bounds: Bounds) -> bool {
        if self.city.is_none() {
            return false;
        }
        self.bounds = Some(bounds);
        true
    }

    pub fn clear_bounds(&mut self) {
        self.bounds = None;
    }

    pub fn view(&self) -> ActiveView {
        match (&self.city, &self.area) {
            (None, _) => ActiveView::NoCity,
            (Some(_), None) => ActiveView::CityOnly,
            (Some(_), Some(_)) => ActiveView::CityAndArea,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Charts {
    pub listing_count: usize,
    pub price_threshold: Option<f64>,
    pub density: Vec<DensitySeries>,
    pub hosts: Vec<HostBar>,
    /// Room type counts within the current bounded view
    pub summary: Vec<RoomTypeCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub view: ActiveView,
    pub selection: SelectionState,
    pub areas: Vec<String>,
    /// `None` until a city is selected
    pub charts: Option<Charts>,
}

/// Per-user pipeline state. Each event recomputes only what depends on it.
pub struct Session {
    catalog: Arc<Catalog>,
    processing: ProcessingConfig,
    palette: PaletteConfig,
    selection: SelectionState,
    dataset: Option<Arc<CityDataset>>,
    epoch: u64,
    charts: Option<Charts>,
}

impl Session {
    pub fn new(catalog: Arc<Catalog>, config: &AppConfig) -> Self {
        Self {
            catalog,
            processing: config.processing.clone(),
            palette: config.palette.clone(),
            selection: SelectionState::default(),
            dataset: None,
            epoch: 0,
            charts: None,
        }
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn view(&self) -> ActiveView {
        self.selection.view()
    }

    /// Bumped on every city, area or zoom reset so late bounds events for an
    /// earlier selection can be recognised and dropped.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn charts(&self) -> Option<&Charts> {
        self.charts.as_ref()
    }

    pub fn area_options(&self) -> &[String] {
        self.dataset.as_deref().map(CityDataset::area_keys).unwrap_or(&[])
    }

    /// Selects (or clears, with `None` or an empty name) the city and returns
    /// the new area options.
    pub fn select_city(&mut self, city: Option<&str>) -> Result<&[String]> {
        let key = city
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase);

        self.dataset = match &key {
            Some(k) => Some(
                self.catalog
                    .get(k)
                    .ok_or_else(|| anyhow!("Unknown city: {}", k))?,
            ),
            None => None,
        };

        self.selection.set_city(key);
        self.epoch += 1;
        self.recompute();
        Ok(self.area_options())
    }

    /// Selects (or clears) the area and returns the extent the map should fit.
    pub fn select_area(&mut self, area: Option<&str>) -> Result<Option<Extent>> {
        let Some(dataset) = self.dataset.clone() else {
            bail!("Select a city before an area");
        };

        let key = area.filter(|a| !a.is_empty()).map(str::to_string);
        if let Some(k) = &key {
            if !dataset.has_area(k) {
                bail!("Unknown area {:?} in {}", k, dataset.name());
            }
        }

        self.selection.set_area(key);
        self.epoch += 1;
        self.recompute();
        Ok(processing::compute_extent(self.scope()))
    }

    /// Applies a settled viewport. Returns false when ignored for lack of a city.
    pub fn apply_bounds(&mut self, bounds: Bounds) -> bool {
        if !self.selection.set_bounds(bounds) {
            return false;
        }
        self.recompute();
        true
    }

    /// Drops the viewport filter and returns the extent of the current scope.
    pub fn reset_zoom(&mut self) -> Option<Extent> {
        self.selection.clear_bounds();
        self.epoch += 1;
        self.recompute();
        processing::compute_extent(self.scope())
    }

    /// Listings the map shows: the whole city or the selected area.
    pub fn scope(&self) -> Vec<&Listing> {
        let Some(dataset) = self.dataset.as_deref() else {
            return Vec::new();
        };
        match self.selection.area() {
            Some(area) => processing::filter_area(dataset.listings(), area),
            None => dataset.listings().iter().collect(),
        }
    }

    /// Scope narrowed to the current viewport, when there is one.
    pub fn visible(&self) -> Vec<&Listing> {
        let Some(dataset) = self.dataset.as_deref() else {
            return Vec::new();
        };
        match (self.selection.area(), self.selection.bounds()) {
            (_, None) => self.scope(),
            (None, Some(bounds)) => dataset.within(bounds),
            (Some(_), Some(bounds)) => processing::filter_bounds(self.scope(), bounds),
        }
    }

    /// Aggregation input: the full city without an area, otherwise the
    /// bounded area.
    fn chart_input(&self) -> Vec<&Listing> {
        match self.view() {
            ActiveView::NoCity => Vec::new(),
            ActiveView::CityOnly => self.scope(),
            ActiveView::CityAndArea => self.visible(),
        }
    }

    fn recompute(&mut self) {
        self.charts = match self.view() {
            ActiveView::NoCity => None,
            _ => Some(self.compute_charts()),
        };
    }

    fn compute_charts(&self) -> Charts {
        let input = self.chart_input();
        let multiplier = self.processing.outlier_multiplier;

        let (price_threshold, retained) = processing::trim_price_outliers(&input, multiplier);
        let density = render::density_series(
            processing::prices_by_room_type(&retained),
            &self.palette,
            self.processing.density_points,
        );

        Charts {
            listing_count: input.len(),
            price_threshold,
            density,
            hosts: processing::host_concentration(&input),
            summary: processing::room_type_counts(&self.visible()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            view: self.view(),
            selection: self.selection.clone(),
            areas: self.area_options().to_vec(),
            charts: self.charts.clone(),
        }
    }
}
