use geo::{coord, Rect};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoomType {
    #[serde(rename = "Entire home/apt")]
    EntireHome,
    #[serde(rename = "Private room")]
    PrivateRoom,
    #[serde(rename = "Shared room")]
    SharedRoom,
    #[serde(rename = "Hotel room")]
    HotelRoom,
    #[serde(other)]
    Other,
}

impl RoomType {
    pub fn label(self) -> &'static str {
        match self {
            RoomType::EntireHome => "Entire home/apt",
            RoomType::PrivateRoom => "Private room",
            RoomType::SharedRoom => "Shared room",
            RoomType::HotelRoom => "Hotel room",
            RoomType::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub id: u64,
    pub host_id: u64,
    pub host_name: String,
    pub room_type: RoomType,
    pub price: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub neighbourhood: String,
    pub neighbourhood_group: Option<String>,
}

/// Viewport rectangle as reported by the map widget. Corners may arrive
/// swapped depending on how the widget encodes them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    /// x = longitude, y = latitude; `Rect::new` orders the corners.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
    }

    pub fn normalized(&self) -> Bounds {
        let rect = self.to_rect();
        Bounds {
            north: rect.max().y,
            south: rect.min().y,
            east: rect.max().x,
            west: rect.min().x,
        }
    }

    pub fn contains(&self, listing: &Listing) -> bool {
        let rect = self.to_rect();
        (rect.min().y..=rect.max().y).contains(&listing.latitude)
            && (rect.min().x..=rect.max().x).contains(&listing.longitude)
    }
}

/// Data extent used to fit the map: `[min, max]` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extent {
    pub lng: [f64; 2],
    pub lat: [f64; 2],
}
