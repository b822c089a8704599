use axum::{
    Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::StreamEvent;
use crate::ffmpeg::supervisor::supervisor;

pub(crate) fn start_api_server(cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = Router::new()
            .nest("/session", crate::handler::session::session_router())
            .nest("/device", crate::handler::device::device_router())
            .nest("/destination", crate::handler::destination::destination_router())
            .route("/ws", get(ws_handler));

        let bind_addr = crate::config::config().bind_addr();
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API: failed to bind {}: {}", bind_addr, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", bind_addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API: server error: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

async fn ws_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(relay_events)
}

/// Push every supervisor event to one WebSocket client as tagged JSON.
/// A fresh client gets the current status first so it does not have to wait
/// for the next transition.
async fn relay_events(socket: WebSocket) {
    let mut rx = supervisor().subscribe();
    let (mut sender, mut receiver) = socket.split();

    let current = StreamEvent::Status {
        status: supervisor().status(),
    };
    if send_event(&mut sender, &current).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("WS: client lagged, {} event(s) dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = receiver.next() => match message {
                // Inbound messages are ignored; the socket is push-only.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
    log::debug!("WS: client disconnected");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &StreamEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}
