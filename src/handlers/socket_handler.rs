// src/handlers/socket_handler.rs
//! Live channel for riders and drivers. Everything published to the caller's
//! channel is forwarded as JSON tagged by `event`, and riders also get the
//! all-riders channel; inbound frames are commands tagged by `type` and each
//! gets exactly one reply.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{
    SinkExt, StreamExt,
    stream::SplitSink,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use super::SharedState;
use crate::{
    errors::{RideError, RideResult},
    models::{
        actor::{Actor, Role},
        driver::{DriverLocationUpdate, DriverPosition, NearbyDriverView, NearbyDriversQuery},
        events::{ALL_RIDERS, Channel, ChatMessage, RideEvent},
        geo::GeoPoint,
        rider::RiderLocationUpdate,
    },
    services::dispatch::DispatchOperations,
};

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub role: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketCommand {
    UpdateLocation(DriverLocationUpdate),
    UpdateRiderLocation(RiderLocationUpdate),
    GetNearbyDrivers(NearbyDriversQuery),
    SendMessage { ride_id: String, message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketReply {
    LocationUpdated { position: DriverPosition },
    RiderLocationUpdated { location: GeoPoint },
    NearbyDrivers { drivers: Vec<NearbyDriverView> },
    MessageSent { chat: ChatMessage },
    Error { error: String, message: String },
}

impl From<RideError> for SocketReply {
    fn from(err: RideError) -> Self {
        SocketReply::Error {
            error: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(params): Query<SocketParams>,
) -> RideResult<Response> {
    let actor = socket_actor(params)?;
    tracing::info!("Socket upgrade for {}", actor);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

/// Only riders and drivers have a push channel.
fn socket_actor(params: SocketParams) -> RideResult<Actor> {
    let role: Role = params.role.parse()?;
    if role == Role::Admin {
        return Err(RideError::forbidden("admins do not have a live channel"));
    }
    let id = params.id.trim();
    if id.is_empty() {
        return Err(RideError::MissingRequiredField("id".to_string()));
    }
    if id == ALL_RIDERS {
        return Err(RideError::invalid_input("id is reserved"));
    }
    Ok(Actor::new(id, role))
}

async fn handle_socket(socket: WebSocket, state: SharedState, actor: Actor) {
    let channel = Channel::from(&actor);
    let mut events = state.events.subscribe(channel.clone()).await;
    let mut broadcasts = match actor.role {
        Role::Rider => Some(state.events.subscribe(Channel::all_riders()).await),
        _ => None,
    };
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                if !forward(&mut sender, &channel, event).await {
                    break;
                }
            }
            event = next_broadcast(&mut broadcasts) => {
                if !forward(&mut sender, &channel, event).await {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_command(state.dispatch.as_ref(), &actor, &text).await;
                    if send_json(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Socket error on {}: {}", channel, e);
                    break;
                }
            },
        }
    }

    drop(events);
    drop(broadcasts);
    let pruned = state.events.prune().await;
    tracing::info!("Socket closed for {} ({} idle channel(s) pruned)", channel, pruned);
}

async fn next_broadcast(
    broadcasts: &mut Option<broadcast::Receiver<RideEvent>>,
) -> Result<RideEvent, RecvError> {
    match broadcasts {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Sends one received event down the socket. `false` ends the session.
async fn forward(
    sender: &mut SplitSink<WebSocket, Message>,
    channel: &Channel,
    event: Result<RideEvent, RecvError>,
) -> bool {
    match event {
        Ok(event) => send_json(sender, &event).await.is_ok(),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!("{} fell behind, dropped {} event(s)", channel, skipped);
            true
        }
        Err(RecvError::Closed) => false,
    }
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> RideResult<()> {
    let text = serde_json::to_string(value)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(|e| RideError::Internal(format!("socket send failed: {}", e)))
}

/// Parses and runs one inbound frame on behalf of `actor`.
pub async fn handle_command(
    dispatch: &dyn DispatchOperations,
    actor: &Actor,
    raw: &str,
) -> SocketReply {
    let command = match serde_json::from_str::<SocketCommand>(raw) {
        Ok(command) => command,
        Err(e) => return RideError::invalid_input(format!("unrecognised command: {}", e)).into(),
    };

    let outcome = match command {
        SocketCommand::UpdateLocation(update) => dispatch
            .update_driver_location(actor, update)
            .await
            .map(|position| SocketReply::LocationUpdated { position }),
        SocketCommand::UpdateRiderLocation(update) => dispatch
            .update_rider_location(actor, update)
            .await
            .map(|location| SocketReply::RiderLocationUpdated { location }),
        SocketCommand::GetNearbyDrivers(query) => dispatch
            .nearby_drivers(query)
            .await
            .map(|drivers| SocketReply::NearbyDrivers { drivers }),
        SocketCommand::SendMessage { ride_id, message } => dispatch
            .send_message(actor, &ride_id, message)
            .await
            .map(|chat| SocketReply::MessageSent { chat }),
    };

    outcome.unwrap_or_else(SocketReply::from)
}
