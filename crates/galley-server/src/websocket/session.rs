//! One dashboard socket from upgrade to disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use galley_core::ids::{ConnectionId, RestaurantId};
use tracing::{debug, info, instrument, warn};

use super::transport::{ChannelTransport, Outbound, Transport};
use crate::service::NotificationService;

/// How long the writer gets to flush after the reader ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve one socket for `restaurant_id`, resuming `resume` when possible.
///
/// The writer task drains the connection's transport into the socket; the
/// reader loop feeds inbound frames to the service. A close frame ends the
/// logical connection; any other end leaves it awaiting a resume.
#[instrument(skip_all, fields(restaurant_id = %restaurant_id))]
pub async fn run_ws_session(
    socket: WebSocket,
    service: Arc<NotificationService>,
    restaurant_id: RestaurantId,
    resume: Option<ConnectionId>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (channel, mut outbound_rx) = ChannelTransport::new(service.settings().transport_buffer_size);
    let channel = Arc::new(channel);
    let transport: Arc<dyn Transport> = channel.clone();

    let attachment = match service.attach(restaurant_id, resume.as_ref(), Arc::clone(&transport)) {
        Ok(attachment) => attachment,
        Err(e) => {
            warn!(error = %e, "socket rejected");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let conn = attachment.connection;
    info!(connection_id = %conn.id, resumed = attachment.resumed, "socket attached");

    let writer_channel = Arc::downgrade(&channel);
    let writer = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            match item {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::Text(String::from(&*text).into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        if let Some(channel) = writer_channel.upgrade() {
            channel.mark_closed();
        }
        let _ = ws_tx.close().await;
    });

    let mut clean_close = false;
    while let Some(frame) = ws_rx.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection_id = %conn.id, error = %e, "socket read failed");
                break;
            }
        };
        match msg {
            Message::Text(text) => {
                let _ = service.handle_frame(&conn, text.as_str());
            }
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    let _ = service.handle_frame(&conn, text);
                } else {
                    debug!(connection_id = %conn.id, len = data.len(), "non-UTF-8 binary frame");
                    service.touch(&conn);
                }
            }
            Message::Ping(_) | Message::Pong(_) => service.touch(&conn),
            Message::Close(_) => {
                info!(connection_id = %conn.id, "dashboard sent close frame");
                clean_close = true;
                break;
            }
        }
    }

    channel.mark_closed();
    service.socket_ended(&conn, &transport, clean_close);
    drop(transport);
    drop(channel);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(connection_id = %conn.id, "writer did not stop in time");
    }
}
