// src/services/dispatch.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::{
    errors::{RideError, RideResult, ValidationError},
    models::{
        actor::{Actor, Role},
        driver::{
            Driver, DriverLocationUpdate, DriverPosition, DriverRegistration, DriverVerification,
            Earnings, NearbyDriverView, NearbyDriversQuery,
        },
        events::{Channel, ChatMessage, RideEvent},
        geo::{GeoPoint, Place, normalize_heading},
        ride::{
            FareBreakdown, FareEstimateRequest, Ride, RideRequest, RideRequestResponse,
            RideStatus, RideTracking, RoutePoint,
        },
        rider::{Rider, RiderLocationUpdate, RiderRegistration},
    },
    services::{
        event_bus::EventSink,
        fare::FareCalculator,
        geo_index::{
            DEFAULT_SEARCH_RADIUS_METERS, DISPATCH_CANDIDATE_LIMIT, GeoIndex, IndexedDriver,
            NEARBY_QUERY_LIMIT,
        },
        ride_state::RideStateMachine,
        store::RideStore,
    },
    utils::id_generator::{IdGenerator, IdType},
};

pub const RIDE_HISTORY_LIMIT: usize = 50;
pub const MAX_MESSAGE_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchSettings {
    pub search_radius_meters: f64,
    pub candidate_limit: usize,
    pub nearby_limit: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            search_radius_meters: DEFAULT_SEARCH_RADIUS_METERS,
            candidate_limit: DISPATCH_CANDIDATE_LIMIT,
            nearby_limit: NEARBY_QUERY_LIMIT,
        }
    }
}

#[async_trait]
pub trait DispatchOperations: Send + Sync {
    async fn request_ride(&self, actor: &Actor, request: RideRequest) -> RideResult<RideRequestResponse>;
    async fn accept_ride(&self, actor: &Actor, ride_id: &str) -> RideResult<Ride>;
    async fn update_ride_status(&self, actor: &Actor, ride_id: &str, status: RideStatus) -> RideResult<Ride>;
    async fn cancel_ride(&self, actor: &Actor, ride_id: &str, reason: Option<String>) -> RideResult<Ride>;
    async fn rate_ride(&self, actor: &Actor, ride_id: &str, rating: f64) -> RideResult<Ride>;
    async fn estimate_fare(&self, request: FareEstimateRequest) -> RideResult<FareBreakdown>;
    async fn update_driver_location(&self, actor: &Actor, update: DriverLocationUpdate) -> RideResult<DriverPosition>;
    async fn update_rider_location(&self, actor: &Actor, update: RiderLocationUpdate) -> RideResult<GeoPoint>;
    async fn set_driver_availability(&self, actor: &Actor, is_available: Option<bool>) -> RideResult<Driver>;
    async fn nearby_drivers(&self, query: NearbyDriversQuery) -> RideResult<Vec<NearbyDriverView>>;
    async fn send_message(&self, actor: &Actor, ride_id: &str, message: String) -> RideResult<ChatMessage>;
    async fn ride_details(&self, actor: &Actor, ride_id: &str) -> RideResult<Ride>;
    async fn track_ride(&self, actor: &Actor, ride_id: &str) -> RideResult<RideTracking>;
    async fn current_ride(&self, actor: &Actor) -> RideResult<Option<Ride>>;
    async fn ride_history(&self, actor: &Actor) -> RideResult<Vec<Ride>>;
}

#[async_trait]
pub trait AccountOperations: Send + Sync {
    async fn register_rider(&self, registration: RiderRegistration) -> RideResult<Rider>;
    async fn register_driver(&self, registration: DriverRegistration) -> RideResult<Driver>;
    async fn verify_driver(&self, driver_id: &str, verification: DriverVerification) -> RideResult<Driver>;
    async fn driver_profile(&self, driver_id: &str) -> RideResult<Driver>;
    async fn driver_earnings(&self, actor: &Actor) -> RideResult<Earnings>;
}

/// Runs the ride lifecycle: matching, the accept race, status changes and the
/// notifications that go with them. Store commits come first; the geo index
/// and the event sink are updated afterwards and never roll a commit back.
pub struct DispatchCoordinator {
    store: Arc<dyn RideStore>,
    geo_index: Arc<GeoIndex>,
    events: Arc<dyn EventSink>,
    settings: DispatchSettings,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn RideStore>,
        geo_index: Arc<GeoIndex>,
        events: Arc<dyn EventSink>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            geo_index,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    /// Best-effort delivery; a failed publish is logged and dropped.
    async fn notify(&self, channel: Channel, event: RideEvent) {
        let kind = event.kind();
        if let Err(e) = self.events.publish(&channel, event).await {
            tracing::warn!("Failed to deliver {} to {}: {}", kind, channel, e);
        }
    }

    /// Copies a committed driver into the geo index. The snapshot carries the
    /// commit version, so one that lands after a newer commit is ignored.
    async fn mirror(&self, driver: &Driver) {
        if !self.geo_index.register(IndexedDriver::from(driver)).await {
            tracing::debug!(
                "Geo index already holds a newer snapshot of driver {}",
                driver.id
            );
        }
    }

    async fn load_ride(&self, ride_id: &str) -> RideResult<Ride> {
        self.store
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| RideError::ride_not_found(ride_id))
    }

    async fn load_driver(&self, driver_id: &str) -> RideResult<Driver> {
        self.store
            .get_driver(driver_id)
            .await?
            .ok_or_else(|| RideError::driver_not_found(driver_id))
    }

    /// Parties, admins, and drivers who were offered a ride still up for grabs.
    fn can_view(ride: &Ride, actor: &Actor) -> bool {
        ride.is_party(actor)
            || actor.role == Role::Admin
            || (actor.role == Role::Driver
                && ride.status == RideStatus::Requested
                && ride.offered_to.iter().any(|id| id == &actor.id))
    }

    async fn withdraw_offers(&self, ride: &Ride, except: Option<&str>) {
        for driver_id in ride.offered_to.iter().filter(|id| Some(id.as_str()) != except) {
            self.notify(
                Channel::driver(driver_id.clone()),
                RideEvent::RideOfferWithdrawn {
                    ride_id: ride.id.clone(),
                },
            )
            .await;
        }
    }

    async fn notify_parties(&self, ride: &Ride, event: RideEvent) {
        if let Some(driver_id) = &ride.driver_id {
            self.notify(Channel::driver(driver_id.clone()), event.clone()).await;
        }
        self.notify(Channel::rider(ride.rider_id.clone()), event).await;
    }
}

fn require_place(field: &str, place: Option<Place>) -> RideResult<Place> {
    let place = place.ok_or_else(|| RideError::MissingRequiredField(field.to_string()))?;
    place.point.validate()?;
    Ok(place)
}

fn require_text(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError {
            field: field.to_string(),
            message: format!("{} is required", field),
        });
    }
}

fn ensure_driver_id(driver_id: &str) -> RideResult<()> {
    if !IdGenerator::validate_id(driver_id, Some(IdType::Driver)) {
        tracing::warn!("Invalid driver ID format: {}", driver_id);
        return Err(RideError::validation_error("driver_id", "Invalid driver ID format"));
    }
    Ok(())
}

#[async_trait]
impl DispatchOperations for DispatchCoordinator {
    async fn request_ride(&self, actor: &Actor, request: RideRequest) -> RideResult<RideRequestResponse> {
        actor.require(Role::Rider)?;
        let pickup = require_place("pickup", request.pickup)?;
        let dropoff = require_place("dropoff", request.dropoff)?;
        let vehicle_class = request.vehicle_class.unwrap_or_default();

        tracing::info!("Ride requested by {} ({})", actor.id, vehicle_class);

        let fare = FareCalculator::estimate_between(&pickup.point, &dropoff.point, vehicle_class)?;
        let ride = Ride::new(
            actor.id.clone(),
            pickup,
            dropoff,
            vehicle_class,
            fare,
            request.payment_method.unwrap_or_default(),
            Utc::now(),
        );
        let mut ride = self.store.create_ride(ride).await?;

        let candidates = self
            .geo_index
            .query(
                &ride.pickup.point,
                vehicle_class,
                self.settings.search_radius_meters,
                self.settings.candidate_limit,
            )
            .await?;

        if candidates.is_empty() {
            tracing::info!("No eligible drivers near ride {}", ride.id);
            return Ok(RideRequestResponse {
                ride,
                candidate_count: 0,
            });
        }

        let offered: Vec<String> = candidates.iter().map(|c| c.driver_id.clone()).collect();
        let record = offered.clone();
        let tx = self
            .store
            .transact(
                &ride.id,
                None,
                Box::new(move |tx| {
                    if tx.ride.status == RideStatus::Requested {
                        tx.ride.offered_to = record;
                    }
                    Ok(())
                }),
            )
            .await?;
        ride = tx.ride;

        // Cancelled before the offers went out
        if ride.status != RideStatus::Requested {
            return Ok(RideRequestResponse {
                ride,
                candidate_count: 0,
            });
        }

        for candidate in &candidates {
            self.notify(
                Channel::driver(candidate.driver_id.clone()),
                RideEvent::NewRideOffer {
                    ride_id: ride.id.clone(),
                    pickup: ride.pickup.clone(),
                    dropoff: ride.dropoff.clone(),
                    vehicle_class,
                    fare: ride.fare.total,
                    distance_km: ride.fare.distance_km,
                },
            )
            .await;
        }

        tracing::info!("Ride {} offered to {} driver(s)", ride.id, offered.len());
        Ok(RideRequestResponse {
            ride,
            candidate_count: offered.len(),
        })
    }

    async fn accept_ride(&self, actor: &Actor, ride_id: &str) -> RideResult<Ride> {
        actor.require(Role::Driver)?;

        let accepting = actor.clone();
        let tx = self
            .store
            .transact(
                ride_id,
                Some(&actor.id),
                Box::new(move |tx| RideStateMachine::accept(tx, &accepting, Utc::now())),
            )
            .await
            .inspect_err(|e| {
                if e.is_lost_race() {
                    tracing::info!("Driver {} lost the race for ride {}", actor.id, ride_id);
                }
            })?;

        let ride = tx.ride;
        let Some(driver) = tx.driver else {
            return Err(RideError::Internal(format!(
                "accepted ride {} has no driver",
                ride.id
            )));
        };
        tracing::info!("Ride {} accepted by driver {}", ride.id, driver.id);

        self.mirror(&driver).await;

        self.notify(
            Channel::rider(ride.rider_id.clone()),
            RideEvent::RideAccepted {
                ride_id: ride.id.clone(),
                driver: driver.summary(),
            },
        )
        .await;
        self.withdraw_offers(&ride, Some(driver.id.as_str())).await;

        Ok(ride)
    }

    async fn update_ride_status(&self, actor: &Actor, ride_id: &str, status: RideStatus) -> RideResult<Ride> {
        let updater = actor.clone();
        let tx = self
            .store
            .transact(
                ride_id,
                None,
                Box::new(move |tx| RideStateMachine::advance(tx, &updater, status, Utc::now())),
            )
            .await?;

        tracing::info!("Ride {} is now {}", tx.ride.id, tx.ride.status);

        if let Some(driver) = &tx.driver {
            self.mirror(driver).await;
        }

        self.notify_parties(
            &tx.ride,
            RideEvent::RideStatusChanged {
                ride_id: tx.ride.id.clone(),
                status: tx.ride.status,
            },
        )
        .await;

        Ok(tx.ride)
    }

    async fn cancel_ride(&self, actor: &Actor, ride_id: &str, reason: Option<String>) -> RideResult<Ride> {
        let canceller = actor.clone();
        let tx = self
            .store
            .transact(
                ride_id,
                None,
                Box::new(move |tx| RideStateMachine::cancel(tx, &canceller, reason, Utc::now())),
            )
            .await?;

        let ride = tx.ride;
        tracing::info!("Ride {} cancelled by {}", ride.id, actor);

        match &tx.driver {
            Some(driver) => self.mirror(driver).await,
            None => self.withdraw_offers(&ride, None).await,
        }

        if let Some(cancelled_by) = ride.cancelled_by {
            self.notify_parties(
                &ride,
                RideEvent::RideCancelled {
                    ride_id: ride.id.clone(),
                    cancelled_by,
                    reason: ride.cancellation_reason.clone(),
                },
            )
            .await;
        }

        Ok(ride)
    }

    async fn rate_ride(&self, actor: &Actor, ride_id: &str, rating: f64) -> RideResult<Ride> {
        RideStateMachine::validate_rating(rating)?;

        let rater = actor.clone();
        let tx = self
            .store
            .transact(
                ride_id,
                None,
                Box::new(move |tx| RideStateMachine::rate(tx, &rater, rating, Utc::now())),
            )
            .await?;

        tracing::info!("Ride {} rated {} by {}", tx.ride.id, rating, actor);
        Ok(tx.ride)
    }

    async fn estimate_fare(&self, request: FareEstimateRequest) -> RideResult<FareBreakdown> {
        let pickup = require_place("pickup", request.pickup)?;
        let dropoff = require_place("dropoff", request.dropoff)?;
        FareCalculator::estimate_between(
            &pickup.point,
            &dropoff.point,
            request.vehicle_class.unwrap_or_default(),
        )
    }

    async fn update_driver_location(&self, actor: &Actor, update: DriverLocationUpdate) -> RideResult<DriverPosition> {
        actor.require(Role::Driver)?;
        let point = GeoPoint::new(update.latitude, update.longitude)?;
        let heading = normalize_heading(update.heading)?;
        let now = Utc::now();

        let position = DriverPosition {
            point,
            heading,
            address: update.address,
            updated_at: now,
        };
        let stored = position.clone();
        let driver = self
            .store
            .update_driver(
                &actor.id,
                Box::new(move |driver| {
                    driver.position = Some(stored);
                    driver.updated_at = now;
                    Ok(())
                }),
            )
            .await?;

        self.mirror(&driver).await;
        self.notify(
            Channel::all_riders(),
            RideEvent::NearbyDriverUpdate {
                driver_id: driver.id.clone(),
                location: point,
                is_available: driver.is_available,
            },
        )
        .await;

        if let Some(ride_id) = &driver.current_ride_id {
            let sample = RoutePoint {
                point,
                recorded_at: now,
            };
            if let Some(ride) = self.store.append_route_point(ride_id, sample).await? {
                self.notify(
                    Channel::rider(ride.rider_id.clone()),
                    RideEvent::DriverLocationChanged {
                        driver_id: driver.id.clone(),
                        ride_id: ride.id.clone(),
                        location: point,
                        heading,
                    },
                )
                .await;
            }
        }

        tracing::debug!("Driver {} moved to {:?}", driver.id, point);
        Ok(position)
    }

    async fn update_rider_location(&self, actor: &Actor, update: RiderLocationUpdate) -> RideResult<GeoPoint> {
        actor.require(Role::Rider)?;
        let point = GeoPoint::new(update.latitude, update.longitude)?;

        let rider = self
            .store
            .update_rider(
                &actor.id,
                Box::new(move |rider| {
                    rider.position = Some(point);
                    rider.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;

        let open_ride = self.store.open_ride_for_rider(&rider.id).await?;
        if let Some(ride) = open_ride.filter(|ride| ride.status.is_active()) {
            if let Some(driver_id) = &ride.driver_id {
                self.notify(
                    Channel::driver(driver_id.clone()),
                    RideEvent::RiderLocationChanged {
                        rider_id: rider.id.clone(),
                        ride_id: ride.id.clone(),
                        location: point,
                    },
                )
                .await;
            }
        }

        Ok(point)
    }

    async fn set_driver_availability(&self, actor: &Actor, is_available: Option<bool>) -> RideResult<Driver> {
        actor.require(Role::Driver)?;

        let driver = self
            .store
            .update_driver(
                &actor.id,
                Box::new(move |driver| {
                    let target = is_available.unwrap_or(!driver.is_available);
                    if target && driver.is_engaged() {
                        return Err(RideError::conflict(
                            "cannot go available while on a ride",
                        ));
                    }
                    driver.is_available = target;
                    driver.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;

        self.mirror(&driver).await;

        tracing::info!(
            "Driver {} is now {}",
            driver.id,
            if driver.is_available { "available" } else { "offline" }
        );
        Ok(driver)
    }

    async fn nearby_drivers(&self, query: NearbyDriversQuery) -> RideResult<Vec<NearbyDriverView>> {
        let point = GeoPoint::new(query.latitude, query.longitude)?;
        let max_distance = query
            .max_distance
            .unwrap_or(self.settings.search_radius_meters);

        let found = self
            .geo_index
            .query(
                &point,
                query.vehicle_class.unwrap_or_default(),
                max_distance,
                self.settings.nearby_limit,
            )
            .await?;

        let mut views = Vec::with_capacity(found.len());
        for nearby in found {
            if let Some(driver) = self.store.get_driver(&nearby.driver_id).await? {
                views.push(NearbyDriverView {
                    driver: driver.summary(),
                    distance_meters: nearby.distance_meters,
                });
            }
        }

        tracing::debug!("{} driver(s) near {:?}", views.len(), point);
        Ok(views)
    }

    async fn send_message(&self, actor: &Actor, ride_id: &str, message: String) -> RideResult<ChatMessage> {
        let message = message.trim().to_string();
        if message.is_empty() {
            return Err(RideError::invalid_input("message cannot be empty"));
        }
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(RideError::invalid_input(format!(
                "message cannot exceed {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }

        let ride = self.load_ride(ride_id).await?;
        if !ride.is_party(actor) {
            return Err(RideError::forbidden("only the rider and driver can chat on a ride"));
        }
        let Some(driver_id) = ride.driver_id.clone() else {
            return Err(RideError::conflict("no driver has accepted this ride yet"));
        };
        if ride.status.is_terminal() {
            return Err(RideError::conflict(format!("ride is already {}", ride.status)));
        }

        let recipient = if ride.is_rider(actor) {
            Channel::driver(driver_id)
        } else {
            Channel::rider(ride.rider_id.clone())
        };

        let chat = ChatMessage {
            message_id: nanoid::nanoid!(),
            ride_id: ride.id.clone(),
            from: actor.clone(),
            message,
            sent_at: Utc::now(),
        };
        self.notify(recipient, RideEvent::NewMessage(chat.clone())).await;
        Ok(chat)
    }

    async fn ride_details(&self, actor: &Actor, ride_id: &str) -> RideResult<Ride> {
        tracing::debug!("Getting ride: {}", ride_id);
        let ride = self.load_ride(ride_id).await?;
        if !Self::can_view(&ride, actor) {
            return Err(RideError::forbidden("not allowed to view this ride"));
        }
        Ok(ride)
    }

    async fn track_ride(&self, actor: &Actor, ride_id: &str) -> RideResult<RideTracking> {
        let ride = self.ride_details(actor, ride_id).await?;

        let driver_location = match &ride.driver_id {
            Some(driver_id) if ride.status.is_active() => self
                .store
                .get_driver(driver_id)
                .await?
                .and_then(|driver| driver.position),
            _ => None,
        };

        Ok(RideTracking {
            ride_id: ride.id,
            status: ride.status,
            driver_location,
            pickup: ride.pickup,
            dropoff: ride.dropoff,
        })
    }

    async fn current_ride(&self, actor: &Actor) -> RideResult<Option<Ride>> {
        actor.require(Role::Driver)?;
        let driver = self.load_driver(&actor.id).await?;
        match driver.current_ride_id {
            Some(ride_id) => self.store.get_ride(&ride_id).await,
            None => Ok(None),
        }
    }

    async fn ride_history(&self, actor: &Actor) -> RideResult<Vec<Ride>> {
        match actor.role {
            Role::Rider => self.store.rides_for_rider(&actor.id, RIDE_HISTORY_LIMIT).await,
            Role::Driver => self.store.rides_for_driver(&actor.id, RIDE_HISTORY_LIMIT).await,
            Role::Admin => Err(RideError::forbidden("admins have no ride history")),
        }
    }
}

#[async_trait]
impl AccountOperations for DispatchCoordinator {
    async fn register_rider(&self, registration: RiderRegistration) -> RideResult<Rider> {
        tracing::info!("Registering rider: {}", registration.email);

        let mut errors = Vec::new();
        require_text(&mut errors, "name", &registration.name);
        require_text(&mut errors, "phone", &registration.phone);
        if !errors.is_empty() {
            return Err(RideError::ValidationFailed(errors));
        }

        let rider = self.store.insert_rider(Rider::new(registration)).await?;
        tracing::info!("Rider registered successfully: {}", rider.id);
        Ok(rider)
    }

    async fn register_driver(&self, registration: DriverRegistration) -> RideResult<Driver> {
        tracing::info!("Registering driver: {}", registration.email);

        let mut errors = Vec::new();
        require_text(&mut errors, "name", &registration.name);
        require_text(&mut errors, "phone", &registration.phone);
        require_text(&mut errors, "license_number", &registration.license_number);
        require_text(&mut errors, "vehicle.license_plate", &registration.vehicle.license_plate);
        if !errors.is_empty() {
            return Err(RideError::ValidationFailed(errors));
        }
        if let Some(point) = &registration.initial_position {
            point.validate()?;
        }

        let driver = self.store.insert_driver(Driver::new(registration)).await?;
        self.mirror(&driver).await;

        tracing::info!("Driver registered successfully: {}", driver.id);
        Ok(driver)
    }

    async fn verify_driver(&self, driver_id: &str, verification: DriverVerification) -> RideResult<Driver> {
        ensure_driver_id(driver_id)?;
        tracing::info!(
            "Setting driver {} verified={} active={:?}",
            driver_id,
            verification.is_verified,
            verification.is_active
        );

        let driver = self
            .store
            .update_driver(
                driver_id,
                Box::new(move |driver| {
                    driver.is_verified = verification.is_verified;
                    if let Some(active) = verification.is_active {
                        driver.is_active = active;
                    }
                    // Suspended drivers drop out of dispatch straight away
                    if !driver.is_active || !driver.is_verified {
                        driver.is_available = false;
                    }
                    driver.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await?;

        self.mirror(&driver).await;

        Ok(driver)
    }

    async fn driver_profile(&self, driver_id: &str) -> RideResult<Driver> {
        ensure_driver_id(driver_id)?;
        tracing::debug!("Getting driver: {}", driver_id);
        self.load_driver(driver_id).await
    }

    async fn driver_earnings(&self, actor: &Actor) -> RideResult<Earnings> {
        actor.require(Role::Driver)?;
        Ok(self.load_driver(&actor.id).await?.earnings)
    }
}
