// src/state.rs
use std::{env, fmt::Display, net::SocketAddr, str::FromStr, sync::Arc};

use crate::{
    errors::{RideError, RideResult},
    services::{
        dispatch::{DispatchCoordinator, DispatchSettings},
        event_bus::{DEFAULT_CHANNEL_CAPACITY, EventBus},
        geo_index::{
            DEFAULT_SEARCH_RADIUS_METERS, DISPATCH_CANDIDATE_LIMIT, GeoIndex, NEARBY_QUERY_LIMIT,
        },
        store::{MemoryStore, RideStore},
    },
};

pub struct AppState {
    pub dispatch: Arc<DispatchCoordinator>,
    pub events: Arc<EventBus>,
    pub geo_index: Arc<GeoIndex>,
    pub store: Arc<dyn RideStore>,
    pub config: AppConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub search_radius_meters: f64,
    pub dispatch_candidate_limit: usize,
    pub nearby_query_limit: usize,
    pub event_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            search_radius_meters: DEFAULT_SEARCH_RADIUS_METERS,
            dispatch_candidate_limit: DISPATCH_CANDIDATE_LIMIT,
            nearby_query_limit: NEARBY_QUERY_LIMIT,
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> RideResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> RideResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            bind_addr: try_load(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            search_radius_meters: try_load(
                &lookup,
                "SEARCH_RADIUS_METERS",
                defaults.search_radius_meters,
            )?,
            dispatch_candidate_limit: try_load(
                &lookup,
                "DISPATCH_CANDIDATE_LIMIT",
                defaults.dispatch_candidate_limit,
            )?,
            nearby_query_limit: try_load(&lookup, "NEARBY_QUERY_LIMIT", defaults.nearby_query_limit)?,
            event_channel_capacity: try_load(
                &lookup,
                "EVENT_CHANNEL_CAPACITY",
                defaults.event_channel_capacity,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RideResult<()> {
        if !self.search_radius_meters.is_finite() || self.search_radius_meters <= 0.0 {
            return Err(RideError::Config(
                "SEARCH_RADIUS_METERS must be a positive number".to_string(),
            ));
        }
        for (key, value) in [
            ("DISPATCH_CANDIDATE_LIMIT", self.dispatch_candidate_limit),
            ("NEARBY_QUERY_LIMIT", self.nearby_query_limit),
            ("EVENT_CHANNEL_CAPACITY", self.event_channel_capacity),
        ] {
            if value == 0 {
                return Err(RideError::Config(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            search_radius_meters: self.search_radius_meters,
            candidate_limit: self.dispatch_candidate_limit,
            nearby_limit: self.nearby_query_limit,
        }
    }
}

fn try_load<T, F>(lookup: &F, key: &str, default: T) -> RideResult<T>
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            tracing::warn!("Invalid {key} value: {e}");
            RideError::Config(format!("invalid {key} value {raw:?}: {e}"))
        }),
        None => {
            tracing::info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let store: Arc<dyn RideStore> = Arc::new(MemoryStore::new());
        let geo_index = Arc::new(GeoIndex::new());
        let events = Arc::new(EventBus::new(config.event_channel_capacity));

        let dispatch = Arc::new(DispatchCoordinator::new(
            store.clone(),
            geo_index.clone(),
            events.clone(),
            config.dispatch_settings(),
        ));

        Self {
            dispatch,
            events,
            geo_index,
            store,
            config,
        }
    }
}
