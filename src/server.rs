use crate::config::AppConfig;
use crate::data::Catalog;
use crate::debounce::Debouncer;
use crate::processing;
use crate::render;
use crate::session::{Session, SessionSnapshot};
use crate::types::{Bounds, Extent};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use geojson::FeatureCollection;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};

struct SessionHandle {
    session: Arc<Mutex<Session>>,
    // (epoch at the time of the event, viewport)
    bounds: Debouncer<(u64, Bounds)>,
    last_seen: Instant,
}

pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub config: AppConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl AppState {
    pub fn new(config: AppConfig, catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Looks a session up and marks it as active.
    fn session(&self, id: &str) -> Result<Arc<Mutex<Session>>, ApiError> {
        let mut sessions = self.sessions();
        let handle = sessions.get_mut(id).ok_or(ApiError::NotFound)?;
        handle.last_seen = Instant::now();
        Ok(handle.session.clone())
    }

    /// Drops sessions idle for longer than `ttl`, with their debounce tasks.
    fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, handle| now.duration_since(handle.last_seen) <= ttl);
        before - sessions.len()
    }
}

/// Periodically evicts idle sessions. Runs until the runtime shuts down.
pub fn spawn_session_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let ttl = Duration::from_secs(state.config.server.session_ttl_secs);
    let period = (ttl / 2).max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = state.evict_idle(ttl);
            if evicted > 0 {
                info!("Evicted {} idle sessions", evicted);
            }
        }
    })
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Unknown session").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    }
}

#[derive(Serialize)]
pub struct CreatedSession {
    id: String,
}

#[derive(Deserialize)]
pub struct CityRequest {
    city: Option<String>,
}

#[derive(Deserialize)]
pub struct AreaRequest {
    area: Option<String>,
}

#[derive(Serialize)]
pub struct SelectionResponse {
    #[serde(flatten)]
    snapshot: SessionSnapshot,
    /// Extent the map should fit to
    fit: Option<Extent>,
}

#[derive(Serialize)]
pub struct BoundsResponse {
    ignored: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/api/cities", get(list_cities))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/city", put(select_city))
        .route("/api/sessions/:id/area", put(select_area))
        .route("/api/sessions/:id/bounds", post(push_bounds))
        .route("/api/sessions/:id/reset-zoom", post(reset_zoom))
        .route("/api/sessions/:id/listings", get(session_listings));

    if let Some(dir) = &state.config.server.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(config: AppConfig, catalog: Catalog) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(config, catalog));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    spawn_session_sweeper(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn list_cities(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.catalog.city_names())
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<CreatedSession> {
    let id = format!("{:016x}", rand::thread_rng().gen::<u64>());
    let session = Arc::new(Mutex::new(Session::new(state.catalog.clone(), &state.config)));

    let target = session.clone();
    let delay = Duration::from_millis(state.config.processing.debounce_ms);
    let bounds = Debouncer::spawn(delay, move |(epoch, bounds): (u64, Bounds)| {
        let mut session = lock(&target);
        if session.epoch() != epoch {
            debug!("Dropping bounds from a superseded selection");
            return;
        }
        session.apply_bounds(bounds);
    });

    state
        .sessions()
        .insert(id.clone(), SessionHandle { session, bounds, last_seen: Instant::now() });
    info!("Session {} created", id);

    Json(CreatedSession { id })
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.sessions().remove(&id) {
        Some(_) => {
            info!("Session {} closed", id);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = state.session(&id)?;
    let snapshot = lock(&session).snapshot();
    Ok(Json(snapshot))
}

async fn select_city(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CityRequest>,
) -> Result<Json<SelectionResponse>, ApiError> {
    let session = state.session(&id)?;
    let mut session = lock(&session);
    session.select_city(req.city.as_deref())?;

    let fit = processing::compute_extent(session.scope());
    Ok(Json(SelectionResponse { snapshot: session.snapshot(), fit }))
}

async fn select_area(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AreaRequest>,
) -> Result<Json<SelectionResponse>, ApiError> {
    let session = state.session(&id)?;
    let mut session = lock(&session);
    let fit = session.select_area(req.area.as_deref())?;
    Ok(Json(SelectionResponse { snapshot: session.snapshot(), fit }))
}

async fn push_bounds(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(bounds): Json<Bounds>,
) -> Result<(StatusCode, Json<BoundsResponse>), ApiError> {
    let mut sessions = state.sessions();
    let handle = sessions.get_mut(&id).ok_or(ApiError::NotFound)?;
    handle.last_seen = Instant::now();

    let epoch = {
        let session = lock(&handle.session);
        if session.selection().city().is_none() {
            return Ok((StatusCode::OK, Json(BoundsResponse { ignored: true })));
        }
        session.epoch()
    };

    handle.bounds.push((epoch, bounds));
    Ok((StatusCode::ACCEPTED, Json(BoundsResponse { ignored: false })))
}

async fn reset_zoom(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SelectionResponse>, ApiError> {
    let session = state.session(&id)?;
    let mut session = lock(&session);
    let fit = session.reset_zoom();
    Ok(Json(SelectionResponse { snapshot: session.snapshot(), fit }))
}

async fn session_listings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FeatureCollection>, ApiError> {
    let session = state.session(&id)?;
    let session = lock(&session);
    let scope = session.scope();
    Ok(Json(render::listings_geojson(&scope, &state.config.palette)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, PaletteConfig, ProcessingConfig, ServerConfig};
    use crate::data::CityDataset;
    use crate::session::ActiveView;
    use crate::types::{Listing, RoomType};

    const LATS: [f64; 6] = [52.50, 52.51, 52.52, 52.53, 52.54, 52.55];
    const LNGS: [f64; 6] = [13.40, 13.41, 13.42, 13.43, 13.44, 13.45];

    fn state() -> Arc<AppState> {
        let config = AppConfig {
            input: InputConfig { data_dir: "data".into() },
            processing: ProcessingConfig::default(),
            palette: PaletteConfig::default(),
            server: ServerConfig { port: 0, static_dir: None, session_ttl_secs: 60 },
        };
        let listings = (0..6)
            .map(|i| Listing {
                id: i,
                host_id: i / 2,
                host_name: format!("host-{}", i / 2),
                room_type: RoomType::EntireHome,
                price: 100.0 + i as f64,
                latitude: LATS[i as usize],
                longitude: LNGS[i as usize],
                neighbourhood: if i < 3 { "Mitte".into() } else { "Pankow".into() },
                neighbourhood_group: None,
            })
            .collect();
        Arc::new(AppState::new(config, Catalog::from_datasets([CityDataset::new("BERLIN", listings)])))
    }

    async fn new_session(state: &Arc<AppState>) -> String {
        create_session(State(state.clone())).await.0.id
    }

    fn view(state: &Arc<AppState>, id: &str) -> ActiveView {
        lock(&state.session(id).unwrap()).view()
    }

    #[tokio::test]
    async fn lists_cities() {
        let state = state();
        assert_eq!(list_cities(State(state)).await.0, vec!["BERLIN"]);
    }

    #[tokio::test]
    async fn selection_endpoints_drive_the_session() {
        let state = state();
        let id = new_session(&state).await;

        let city = select_city(
            State(state.clone()),
            Path(id.clone()),
            Json(CityRequest { city: Some("berlin".into()) }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(city.snapshot.areas, vec!["Mitte", "Pankow"]);
        assert_eq!(city.fit.unwrap().lat, [52.50, 52.55]);

        let area = select_area(
            State(state.clone()),
            Path(id.clone()),
            Json(AreaRequest { area: Some("Mitte".into()) }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(area.snapshot.view, ActiveView::CityAndArea);
        assert_eq!(area.fit.unwrap().lat, [52.50, 52.52]);

        let listings = session_listings(State(state.clone()), Path(id.clone())).await.unwrap().0;
        assert_eq!(listings.features.len(), 3);

        let bad = select_area(
            State(state.clone()),
            Path(id.clone()),
            Json(AreaRequest { area: Some("Nowhere".into()) }),
        )
        .await;
        assert!(matches!(bad, Err(ApiError::BadRequest(_))));
        assert_eq!(view(&state, &id), ActiveView::CityAndArea);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let state = state();
        let result = get_session(State(state.clone()), Path("missing".into())).await;
        assert!(matches!(result, Err(ApiError::NotFound)));
        assert_eq!(
            delete_session(State(state), Path("missing".into())).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn bounds_before_city_are_ignored() {
        let state = state();
        let id = new_session(&state).await;
        let bounds = Bounds { north: 53.0, south: 52.0, east: 14.0, west: 13.0 };

        let (status, body) = push_bounds(State(state.clone()), Path(id), Json(bounds)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(body.0.ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn bounds_are_debounced_and_dropped_after_area_change() {
        let state = state();
        let id = new_session(&state).await;
        let city = select_city(
            State(state.clone()),
            Path(id.clone()),
            Json(CityRequest { city: Some("BERLIN".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(city.0.snapshot.view, ActiveView::CityOnly);
        let area = select_area(
            State(state.clone()),
            Path(id.clone()),
            Json(AreaRequest { area: Some("Mitte".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(area.0.snapshot.view, ActiveView::CityAndArea);

        let narrow = Bounds { north: 52.505, south: 52.495, east: 13.405, west: 13.395 };
        let (status, _) = push_bounds(State(state.clone()), Path(id.clone()), Json(narrow)).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        // nothing applied during the quiet period
        tokio::time::sleep(Duration::from_millis(100)).await;
        let session = state.session(&id).unwrap();
        assert_eq!(lock(&session).charts().unwrap().listing_count, 3);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(lock(&session).charts().unwrap().listing_count, 1);

        // a burst issued for Mitte must not land on Pankow
        let (status, _) = push_bounds(State(state.clone()), Path(id.clone()), Json(narrow)).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        let area = select_area(
            State(state.clone()),
            Path(id.clone()),
            Json(AreaRequest { area: Some("Pankow".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(area.0.snapshot.areas, vec!["Mitte", "Pankow"]);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let session = lock(&session);
        assert!(session.selection().bounds().is_none());
        assert_eq!(session.charts().unwrap().listing_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted_with_their_debouncer() {
        let state = state();
        let sweeper = spawn_session_sweeper(state.clone());

        let idle = new_session(&state).await;
        let active = new_session(&state).await;
        let idle_session = Arc::downgrade(&state.session(&idle).unwrap());

        // keep one session busy past the 60s ttl
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(20)).await;
            let _ = get_session(State(state.clone()), Path(active.clone())).await.unwrap();
        }

        assert!(matches!(state.session(&idle), Err(ApiError::NotFound)));
        assert!(state.session(&active).is_ok());

        // the aborted debounce task held the last other reference
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(idle_session.upgrade().is_none());

        sweeper.abort();
    }

    #[tokio::test]
    async fn deleting_a_session_removes_it() {
        let state = state();
        let id = new_session(&state).await;
        assert_eq!(
            delete_session(State(state.clone()), Path(id.clone())).await,
            StatusCode::NO_CONTENT
        );
        assert!(state.session(&id).is_err());
    }
}
