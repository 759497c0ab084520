//! Real-time event channel: JSON text frames both ways.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use jukebox_core::models::{generate_id, Participant};
use jukebox_core::service::{ClientMessage, Orchestrator};

use crate::http::identity::{Credentials, GuestQuery};
use crate::http::{AppError, AppState};

/// Client frames are small commands.
const MAX_MESSAGE_BYTES: usize = 16 * 1024;

pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<GuestQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let credentials = Credentials::from_parts(&headers, query);
    let participant = state
        .identity
        .resolve(&credentials)
        .await?
        .ok_or_else(|| AppError::unauthorized("Sign in to join"))?;

    Ok(ws
        .max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state.orchestrator, participant)))
}

async fn handle_socket(socket: WebSocket, orchestrator: Orchestrator, participant: Participant) {
    let connection_id = generate_id();
    info!(
        participant_id = %participant.id,
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let mut events = orchestrator.join(participant.clone(), connection_id.clone());
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {}: {}", event.event_type(), e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!("WebSocket send failed: {}", e);
                return;
            }
        }
        // the hub dropped us, e.g. on shutdown
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_message(&orchestrator, &participant, &connection_id, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket receive failed: {}", e);
                    break;
                }
                // ping/pong are answered by axum, binary is not part of the protocol
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    orchestrator.leave(&connection_id);
    writer.abort();
    info!(
        participant_id = %participant.id,
        connection_id = %connection_id,
        "WebSocket connection closed"
    );
}

fn handle_message(
    orchestrator: &Orchestrator,
    participant: &Participant,
    connection_id: &str,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(participant_id = %participant.id, "Ignoring malformed message: {}", e);
            return;
        }
    };

    match message {
        ClientMessage::AddItem { video } => {
            // resolving metadata takes seconds; keep reading frames meanwhile
            let orchestrator = orchestrator.clone();
            let participant = participant.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.submit(&participant, &video).await {
                    debug!(participant_id = %participant.id, error = %e, "Submission failed");
                }
            });
        }
        ClientMessage::VoteSkip => {
            if let Err(e) = orchestrator.vote_skip(&participant.id) {
                debug!(participant_id = %participant.id, error = %e, "Skip vote ignored");
            }
        }
        query => {
            if let Some(event) = orchestrator.query(&query) {
                orchestrator.hub().send_to_connection(connection_id, &event);
            }
        }
    }
}
