//! App WebSocket: delivers every domain event to the client, plus the
//! late-join snapshot on `request-sync`.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, warn};

use crate::events::types::{AppClientMessage, AppSyncMessage, WorkerActivity};
use crate::http::AppState;

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle(state, socket))
}

async fn handle(state: AppState, mut socket: WebSocket) {
    let (subscriber_id, mut events_rx) = state.hub.subscribe();
    debug!(event = "daemon.ws.app_connected", subscriber_id = subscriber_id);

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        let Ok(text) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped this subscriber (overflow); the client
                    // reconnects and re-syncs.
                    None => break,
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                match serde_json::from_str::<AppClientMessage>(&text) {
                    Ok(AppClientMessage::RequestSync) => {
                        if send_snapshot(&state, &mut socket).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(event = "daemon.ws.app_bad_message", error = %e);
                    }
                }
            }
        }
    }

    state.hub.unsubscribe(subscriber_id);
    debug!(event = "daemon.ws.app_disconnected", subscriber_id = subscriber_id);
}

/// The authoritative snapshot: sessions (with current activity states),
/// agents, repositories. Order across the three messages is unspecified.
async fn send_snapshot(state: &AppState, socket: &mut WebSocket) -> Result<(), axum::Error> {
    let sessions = match state.sessions.get_all_sessions() {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(event = "daemon.ws.sync_sessions_failed", error = %e);
            Vec::new()
        }
    };
    let mut activity = Vec::new();
    for view in &sessions {
        for worker in &view.workers {
            if let Some(registry_state) = state
                .sessions
                .registry()
                .activity_state(&view.session.id, &worker.id)
            {
                activity.push(WorkerActivity {
                    session_id: view.session.id.clone(),
                    worker_id: worker.id.clone(),
                    state: registry_state,
                });
            }
        }
    }
    send_json(socket, &AppSyncMessage::SessionsSync { sessions, activity }).await?;

    let agents = state.store.list_agents().unwrap_or_default();
    send_json(socket, &AppSyncMessage::AgentsSync { agents }).await?;

    let repositories = state.store.list_repositories().unwrap_or_default();
    send_json(socket, &AppSyncMessage::RepositoriesSync { repositories }).await?;
    Ok(())
}

async fn send_json<T: serde::Serialize>(
    socket: &mut WebSocket,
    message: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
