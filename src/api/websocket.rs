use crate::aggregate::DashboardOverview;
use crate::api::rest::{checked_hours, AppState};
use crate::cache::CacheKeys;
use crate::hub::{ClientCommand, ConnectionId, Group, HubMessage, HubStats, SubscriberFilter};
use crate::supervisor::VIOLATION_POLLING;
use crate::utils::time::now_ts;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    camera: Option<String>,
    hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    #[serde(flatten)]
    connections: HubStats,
    violation_polling: bool,
}

pub async fn ws_violations(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> impl IntoResponse {
    let websocket = &state.ctx.config.websocket;
    let hours = checked_hours(query.hours, websocket.default_hours, websocket.max_hours)
        .unwrap_or(websocket.default_hours);
    let filter = SubscriberFilter::new(query.camera, hours);
    ws.on_upgrade(move |socket| handle_socket(socket, state, Group::Violations, filter))
}

pub async fn ws_dashboard(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let filter = SubscriberFilter::new(None, state.ctx.config.websocket.default_hours);
    ws.on_upgrade(move |socket| handle_socket(socket, state, Group::Dashboard, filter))
}

pub async fn ws_status(State(state): State<AppState>) -> Json<ConnectionStatus> {
    let violation_polling = state
        .supervisor
        .get_status()
        .get(VIOLATION_POLLING)
        .map_or(false, |s| s.is_running());
    Json(ConnectionStatus {
        connections: state.ctx.hub.stats(),
        violation_polling,
    })
}

// One connection: a writer task drains the hub queue into the socket while
// this task reads client commands.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    group: Group,
    filter: SubscriberFilter,
) {
    let (mut sender, mut receiver) = socket.split();
    let hub = state.ctx.hub.clone();

    if let Err(e) = state.supervisor.ensure_running(VIOLATION_POLLING).await {
        warn!("Could not start {}: {}", VIOLATION_POLLING, e);
    }

    // initial data is queued before the connection can receive pushes
    let initial = initial_message(&state, group, &filter).await;
    let (id, mut outbound) = hub.connect_with(group, filter, Some(initial));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode hub message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text)).await {
                debug!("WebSocket send failed: {}", e);
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_command(&state, id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket {} error: {}", id, e);
                break;
            }
        }
    }

    hub.mark_closing(id);
    hub.disconnect(id);
    writer.abort();
}

async fn initial_message(
    state: &AppState,
    group: Group,
    filter: &SubscriberFilter,
) -> HubMessage {
    let ctx = &state.ctx;
    match group {
        Group::Violations => {
            let limit = ctx.config.websocket.initial_limit;
            match ctx.live_violations(filter.camera.clone(), filter.hours, limit).await {
                Ok(fetched) => HubMessage::InitialData {
                    violations: fetched.value,
                    filter: filter.clone(),
                    timestamp: now_ts(),
                },
                Err(e) => HubMessage::Error {
                    message: e.to_string(),
                },
            }
        }
        Group::Dashboard => {
            let overview = ctx
                .cache
                .get_fresh::<DashboardOverview>(CacheKeys::dashboard_overview())
                .await
                .unwrap_or_else(|e| {
                    warn!("Dashboard overview unavailable: {}", e);
                    None
                });
            let hourly_trend = match ctx.hourly_trend(ctx.config.correlation.trend_hours).await {
                Ok(fetched) => fetched.value,
                Err(e) => {
                    warn!("Hourly trend unavailable: {}", e);
                    Vec::new()
                }
            };
            HubMessage::DashboardData {
                overview,
                hourly_trend,
                timestamp: now_ts(),
            }
        }
    }
}

async fn handle_command(state: &AppState, id: ConnectionId, text: &str) {
    let ctx = &state.ctx;
    let reply = match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::Ping) => HubMessage::Pong { timestamp: now_ts() },
        Ok(ClientCommand::UpdateFilter { camera, hours }) => {
            let websocket = &ctx.config.websocket;
            match checked_hours(hours, websocket.default_hours, websocket.max_hours) {
                Ok(hours) => {
                    let filter = SubscriberFilter::new(camera, hours);
                    if ctx.hub.update_filter(id, filter.clone()).is_err() {
                        return;
                    }
                    let limit = websocket.initial_limit;
                    match ctx.live_violations(filter.camera.clone(), filter.hours, limit).await {
                        Ok(fetched) => HubMessage::FilteredData {
                            violations: fetched.value,
                            filter,
                            timestamp: now_ts(),
                        },
                        Err(e) => HubMessage::Error {
                            message: e.to_string(),
                        },
                    }
                }
                Err(e) => HubMessage::Error {
                    message: e.to_string(),
                },
            }
        }
        Err(e) => HubMessage::Error {
            message: format!("Unrecognised command: {}", e),
        },
    };

    if let Err(e) = ctx.hub.send_to(id, reply) {
        debug!("WebSocket {} reply dropped: {}", id, e);
    }
}
