//! Per-worker WebSocket: PTY byte streaming with offset-based replay.
//!
//! The client opens the socket and sends `request-history`. The listener is
//! attached first, snapshotting the log offset; history up to that offset
//! is sent, then live bytes stream from it — contiguous, no gaps, no
//! duplicates (live bytes arriving mid-handshake sit in the listener
//! channel until the history message is out). The whole handshake is
//! capped; on timeout the client gets `ACTIVATION_FAILED`.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, State};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

use crate::errors::DaemonError;
use crate::events::types::{WorkerClientMessage, WorkerServerMessage};
use crate::http::AppState;
use crate::workers::WorkerStreamEvent;

pub async fn upgrade(
    State(state): State<AppState>,
    UrlPath((session_id, worker_id)): UrlPath<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle(state, session_id, worker_id, socket))
}

async fn handle(state: AppState, session_id: String, worker_id: String, mut socket: WebSocket) {
    debug!(
        event = "daemon.ws.worker_connected",
        session_id = %session_id,
        worker_id = %worker_id,
    );

    // Handshake: wait for request-history, serving control messages
    // meanwhile.
    let handshake = tokio::time::timeout(
        Duration::from_millis(state.config.history_timeout_ms),
        wait_for_history_request(&state, &session_id, &worker_id, &mut socket),
    )
    .await;

    let (listener_id, mut offset, mut live_rx) = match handshake {
        Ok(Some(from_offset)) => {
            let attached = state
                .sessions
                .registry()
                .attach_listener(&session_id, &worker_id);
            match attached {
                Ok((listener_id, attach_offset, live_rx)) => {
                    // Bounded at the attach snapshot: anything appended
                    // after it is already queued in `live_rx` and must only
                    // arrive as an output frame.
                    let history = state.sessions.registry().read_history_until(
                        &session_id,
                        &worker_id,
                        from_offset,
                        attach_offset,
                    );
                    let message = WorkerServerMessage::History {
                        data: BASE64.encode(&history),
                    };
                    if send_json(&mut socket, &message).await.is_err() {
                        state
                            .sessions
                            .registry()
                            .detach_listener(&session_id, &worker_id, listener_id);
                        return;
                    }
                    (listener_id, attach_offset, live_rx)
                }
                Err(e) => {
                    let _ = send_json(
                        &mut socket,
                        &WorkerServerMessage::Error {
                            code: e.error_code().to_uppercase(),
                            message: e.to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
        }
        Ok(None) => return, // socket closed during handshake
        Err(_) => {
            let _ = send_json(
                &mut socket,
                &WorkerServerMessage::Error {
                    code: "ACTIVATION_FAILED".to_string(),
                    message: "History request timed out".to_string(),
                },
            )
            .await;
            return;
        }
    };

    // Streaming phase.
    loop {
        tokio::select! {
            live = live_rx.recv() => {
                match live {
                    Some(WorkerStreamEvent::Data(data)) => {
                        offset += data.len() as u64;
                        let message = WorkerServerMessage::Output {
                            data: BASE64.encode(&data),
                            offset,
                        };
                        if send_json(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Some(WorkerStreamEvent::Exit { exit_code }) => {
                        let message = WorkerServerMessage::Exit {
                            exit_code,
                            signal: None,
                        };
                        let _ = send_json(&mut socket, &message).await;
                    }
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
                match serde_json::from_str::<WorkerClientMessage>(&text) {
                    // Re-sync on an established socket: bounded at the live
                    // cursor, so the history payload and the output frames
                    // already emitted (or queued) meet exactly once.
                    Ok(WorkerClientMessage::RequestHistory { from_offset }) => {
                        let data = state.sessions.registry().read_history_until(
                            &session_id,
                            &worker_id,
                            from_offset,
                            offset,
                        );
                        let reply = WorkerServerMessage::History {
                            data: BASE64.encode(&data),
                        };
                        if send_json(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(client_message) => {
                        if let Err(e) =
                            dispatch(&state, &session_id, &worker_id, client_message).await
                        {
                            let response = WorkerServerMessage::Error {
                                code: e.error_code().to_uppercase(),
                                message: e.to_string(),
                            };
                            if send_json(&mut socket, &response).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(event = "daemon.ws.worker_bad_message", error = %e);
                    }
                }
            }
        }
    }

    state
        .sessions
        .registry()
        .detach_listener(&session_id, &worker_id, listener_id);
    debug!(
        event = "daemon.ws.worker_disconnected",
        session_id = %session_id,
        worker_id = %worker_id,
    );
}

/// Returns `Some(from_offset)` once request-history arrives, `None` if the
/// socket closes first. Input/resize/image messages are served while
/// waiting.
async fn wait_for_history_request(
    state: &AppState,
    session_id: &str,
    worker_id: &str,
    socket: &mut WebSocket,
) -> Option<Option<u64>> {
    loop {
        let message = socket.recv().await?.ok()?;
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<WorkerClientMessage>(&text) {
            Ok(WorkerClientMessage::RequestHistory { from_offset }) => {
                return Some(from_offset);
            }
            Ok(other) => {
                if let Err(e) = dispatch(state, session_id, worker_id, other).await {
                    debug!(event = "daemon.ws.worker_prehistory_failed", error = %e);
                }
            }
            Err(e) => {
                debug!(event = "daemon.ws.worker_bad_message", error = %e);
            }
        }
    }
}

/// Serve input/resize/image control messages. `request-history` is handled
/// by the callers, which own the offset bound.
async fn dispatch(
    state: &AppState,
    session_id: &str,
    worker_id: &str,
    message: WorkerClientMessage,
) -> Result<(), DaemonError> {
    match message {
        WorkerClientMessage::Input { data } => state
            .sessions
            .registry()
            .write_input(session_id, worker_id, data.as_bytes()),
        WorkerClientMessage::Resize { cols, rows } => state
            .sessions
            .registry()
            .resize(session_id, worker_id, cols, rows),
        WorkerClientMessage::Image { data, mime_type } => {
            let bytes = BASE64.decode(data.as_bytes())?;
            let extension = match mime_type.as_str() {
                "image/png" => "png",
                "image/jpeg" => "jpg",
                "image/gif" => "gif",
                "image/webp" => "webp",
                other => {
                    return Err(DaemonError::validation(format!(
                        "unsupported image type '{}'",
                        other
                    )));
                }
            };
            let uploads = state.paths.uploads_dir();
            std::fs::create_dir_all(&uploads)?;
            let path = uploads.join(format!("{}.{}", hangar_core::new_id(), extension));
            std::fs::write(&path, &bytes)?;
            // The file path becomes terminal input for the agent.
            let input = format!("{} ", path.to_string_lossy());
            state
                .sessions
                .registry()
                .write_input(session_id, worker_id, input.as_bytes())
        }
        // Intercepted by both callers before dispatch.
        WorkerClientMessage::RequestHistory { .. } => Ok(()),
    }
}

async fn send_json<T: serde::Serialize>(
    socket: &mut WebSocket,
    message: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
