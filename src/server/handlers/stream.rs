use crate::delivery::{ClientFrame, DeliveryFeed, ServerFrame};
use crate::jobs::SubmitError;
use crate::models::AccountIdentity;
use crate::server::state::CoreServices;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

const AUTHORIZE_WINDOW: Duration = Duration::from_secs(5);

pub async fn ws_generate(State(core): State<Arc<CoreServices>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(core, socket))
}

async fn handle_socket(core: Arc<CoreServices>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let Some(identity) = authorize(&core, &mut receiver).await else {
        let _ = send_frame(
            &mut sender,
            &ServerFrame::Error {
                code: "unauthorized".to_string(),
                message: "expected a valid authorize frame".to_string(),
            },
        )
        .await;
        let _ = sender.close().await;
        return;
    };
    if !send_frame(&mut sender, &ServerFrame::Connected).await {
        return;
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        "Stream session {} opened for account {}",
        session_id,
        identity.account_id
    );

    // At most one job feed per connection; switching jobs detaches the
    // previous one.
    let mut feed: Option<(String, DeliveryFeed)> = None;

    loop {
        tokio::select! {
            frame = next_feed_frame(&mut feed) => {
                match frame {
                    Some(message) => {
                        let terminal = message.is_terminal();
                        if !send_frame(&mut sender, &message).await {
                            break;
                        }
                        if terminal {
                            if let Some((job_id, _)) = feed.take() {
                                core.hub.detach(&job_id, &session_id);
                            }
                        }
                    }
                    None => {
                        // Displaced by a newer session or the record
                        // was purged; the job itself is unaffected.
                        feed = None;
                        let _ = send_frame(
                            &mut sender,
                            &ServerFrame::Error {
                                code: "session_lost".to_string(),
                                message: "delivery session ended".to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_client_frame(&core, &identity, &session_id, &mut feed, text.as_str()).await
                        {
                            if !send_frame(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Stream session {} socket error: {}", session_id, e);
                        break;
                    }
                }
            }
        }
    }

    if let Some((job_id, _)) = feed.take() {
        core.hub.detach(&job_id, &session_id);
        core.orchestrator.on_viewer_lost(&job_id);
    }
    tracing::info!("Stream session {} closed", session_id);
}

/// Resolves the next frame of the attached feed, or parks forever when
/// no job is attached so the select stays on the socket.
async fn next_feed_frame(feed: &mut Option<(String, DeliveryFeed)>) -> Option<ServerFrame> {
    match feed {
        Some((_, active)) => active.next().await,
        None => futures::future::pending().await,
    }
}

async fn handle_client_frame(
    core: &Arc<CoreServices>,
    identity: &AccountIdentity,
    session_id: &str,
    feed: &mut Option<(String, DeliveryFeed)>,
    raw: &str,
) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(ServerFrame::Error {
                code: "bad_frame".to_string(),
                message: format!("unrecognized frame: {}", e),
            });
        }
    };

    match frame {
        ClientFrame::Generate(params) => {
            if !crate::generation::is_supported_content_type(&params.content_type)
                || params.prompt.trim().is_empty()
            {
                return Some(ServerFrame::Error {
                    code: "invalid_request".to_string(),
                    message: "missing prompt or unsupported content type".to_string(),
                });
            }
            match core.orchestrator.submit(identity, params).await {
                Ok(job_id) => {
                    switch_feed(core, identity, session_id, feed, &job_id, 0);
                    Some(ServerFrame::Started { job_id })
                }
                Err(e) => Some(submit_error_frame(e)),
            }
        }
        ClientFrame::Resume { job_id, last_seq } => {
            if !core.orchestrator.owns_job(&job_id, &identity.account_id) {
                return Some(ServerFrame::Error {
                    code: "job_not_found".to_string(),
                    message: "no such job for this account".to_string(),
                });
            }
            switch_feed(core, identity, session_id, feed, &job_id, last_seq);
            None
        }
        ClientFrame::Cancel { job_id } => {
            // The canceled frame reaches the client through the feed.
            core.orchestrator
                .cancel(&job_id, Some(&identity.account_id))
                .await;
            None
        }
        ClientFrame::Ping => Some(ServerFrame::Pong),
        ClientFrame::Authorize { .. } => None,
    }
}

fn switch_feed(
    core: &Arc<CoreServices>,
    identity: &AccountIdentity,
    session_id: &str,
    feed: &mut Option<(String, DeliveryFeed)>,
    job_id: &str,
    last_seq: u64,
) {
    if let Some((previous, _)) = feed.take() {
        if previous != job_id {
            core.hub.detach(&previous, session_id);
            core.orchestrator.on_viewer_lost(&previous);
        }
    }
    match core.hub.attach(session_id, job_id, last_seq) {
        Ok(attached) => {
            *feed = Some((job_id.to_string(), attached));
        }
        Err(e) => {
            tracing::debug!(
                "Session {} failed to attach to job {} for account {}: {}",
                session_id,
                job_id,
                identity.account_id,
                e
            );
        }
    }
}

fn submit_error_frame(error: SubmitError) -> ServerFrame {
    let code = match &error {
        SubmitError::Quota(_) => "quota_exceeded",
        SubmitError::ConcurrencyLimit => "concurrent_limit",
        SubmitError::Job(e) => e.code(),
    };
    ServerFrame::Error {
        code: code.to_string(),
        message: error.to_string(),
    }
}

async fn authorize(
    core: &Arc<CoreServices>,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<AccountIdentity> {
    let frame = tokio::time::timeout(AUTHORIZE_WINDOW, receiver.next())
        .await
        .ok()??
        .ok()?;
    let Message::Text(text) = frame else {
        return None;
    };
    match serde_json::from_str::<ClientFrame>(text.as_str()) {
        Ok(ClientFrame::Authorize { ticket }) => core.tickets.redeem(&ticket),
        _ => None,
    }
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    let Ok(raw) = serde_json::to_string(frame) else {
        return false;
    };
    sender.send(Message::Text(raw.into())).await.is_ok()
}
