use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;

use crate::hub::{FanoutHub, Subscription};
use crate::state::AppState;

pub(crate) async fn live_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<FanoutHub>>,
) -> Response {
    ws.on_upgrade(move |socket| {
        let (sink, incoming) = socket.split();
        stream_events(sink, incoming, hub)
    })
}

/// Forwards hub events as text frames until either side goes away.
async fn stream_events<S, R, E>(mut sink: S, mut incoming: R, hub: Arc<FanoutHub>)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let Subscription { id, mut events } = hub.subscribe();
    tracing::info!(observer = id, "live client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if sink.send(Message::Text(event.to_string().into())).await.is_err() {
                    break;
                }
            }
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unsubscribe(id);
    tracing::info!(observer = id, "live client disconnected");
}

pub fn router() -> Router<AppState> {
    Router::new().route("/live", get(live_handler))
}
