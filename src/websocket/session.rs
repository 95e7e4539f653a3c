use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use futures::{stream, Stream};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::chat::{ChatEvent, ChatOrchestrator, ChatRequest, ResponseMode};
use crate::db::User;
use crate::error::AppError;
use crate::websocket::messages::{ClientFrame, Outbound, ServerFrame};
use crate::websocket::registry::{Channel, ConnectionRegistry};
use crate::AppState;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Upgrade `/ws` to a chat session for the authenticated caller.
pub async fn chat_route(
    req: HttpRequest,
    stream: web::Payload,
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let peer_addr = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!("New chat WebSocket from {} for user {}", peer_addr, user.id);

    ws::start(
        ChatSession::new(user.0, state.orchestrator.clone(), state.registry.clone(), peer_addr),
        &req,
        stream,
    )
}

/// Receiver side of a turn, as a stream the actor can consume.
fn event_stream(events: mpsc::UnboundedReceiver<ChatEvent>) -> impl Stream<Item = ChatEvent> {
    stream::unfold(events, |mut events| async move {
        events.recv().await.map(|event| (event, events))
    })
}

/// One chat WebSocket. Turns run one at a time; the reply streams back as frames.
pub struct ChatSession {
    id: Uuid,
    user: User,
    orchestrator: ChatOrchestrator,
    registry: ConnectionRegistry,
    peer_addr: String,
    hb: Instant,
    conversation_id: Option<i64>,
    in_flight: bool,
}

impl ChatSession {
    pub fn new(user: User, orchestrator: ChatOrchestrator, registry: ConnectionRegistry, peer_addr: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            orchestrator,
            registry,
            peer_addr,
            hb: Instant::now(),
            conversation_id: None,
            in_flight: false,
        }
    }

    fn send_frame(&self, ctx: &mut <Self as Actor>::Context, frame: &ServerFrame) {
        match serde_json::to_string(frame) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize server frame: {}", e),
        }
    }

    /// While a turn is running, errors about other frames must not look like its end.
    fn send_error(&self, ctx: &mut <Self as Actor>::Context, message: &str) {
        let frame = if self.in_flight {
            ServerFrame::rejected(message)
        } else {
            ServerFrame::error(message)
        };
        self.send_frame(ctx, &frame);
    }

    fn start_heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("Heartbeat timed out for {} (id: {})", act.peer_addr, act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_frame(&mut self, text: &str, ctx: &mut <Self as Actor>::Context) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Invalid frame from {}: {}", self.peer_addr, e);
                self.send_error(ctx, &format!("Invalid message format: {}", e));
                return;
            }
        };

        if frame.is_ping() {
            ctx.text(r#"{"type":"pong"}"#);
            return;
        }

        if self.in_flight {
            self.send_error(ctx, "A reply is still in progress");
            return;
        }

        if frame.create_new_conversation {
            self.conversation_id = None;
        }
        if frame.conversation_id.is_some() {
            self.conversation_id = frame.conversation_id;
        }

        let clear = if frame.clear_context { self.conversation_id.take() } else { None };
        let prompt = frame.prompt.trim().to_string();

        if prompt.is_empty() {
            if let Some(conversation_id) = clear {
                self.clear_conversation(conversation_id, ctx);
            } else if frame.create_new_conversation || frame.conversation_id.is_some() {
                self.send_frame(ctx, &ServerFrame::done(self.conversation_id));
            } else {
                self.send_error(ctx, "Prompt must not be empty");
            }
            return;
        }

        self.start_turn(prompt, frame.model, frame.enable_thinking, clear, ctx);
    }

    fn clear_conversation(&mut self, conversation_id: i64, ctx: &mut <Self as Actor>::Context) {
        let orchestrator = self.orchestrator.clone();
        let user_id = self.user.id;

        let fut = async move { orchestrator.delete_conversation(user_id, conversation_id).await };
        ctx.spawn(fut.into_actor(self).map(move |result, act, ctx| match result {
            Ok(()) => {
                info!("Cleared conversation {} for user {}", conversation_id, act.user.id);
                act.send_frame(ctx, &ServerFrame::done(None));
            }
            Err(e) => act.send_error(ctx, &e.client_message()),
        }));
    }

    fn start_turn(
        &mut self,
        prompt: String,
        model: Option<String>,
        enable_thinking: bool,
        clear: Option<i64>,
        ctx: &mut <Self as Actor>::Context,
    ) {
        self.in_flight = true;

        let orchestrator = self.orchestrator.clone();
        let request = ChatRequest {
            user: self.user.clone(),
            text: prompt,
            model,
            conversation_id: self.conversation_id,
            mode: ResponseMode::Streamed,
            enable_thinking,
        };

        let fut = async move {
            if let Some(conversation_id) = clear {
                orchestrator
                    .delete_conversation(request.user.id, conversation_id)
                    .await?;
            }
            orchestrator.process_user_message(request).await
        };

        ctx.spawn(fut.into_actor(self).map(|result: Result<_, AppError>, act, ctx| match result {
            Ok(turn) => {
                act.conversation_id = Some(turn.conversation_id);
                ctx.add_stream(event_stream(turn.events));
            }
            Err(e) => {
                warn!("Turn rejected for user {}: {}", act.user.id, e);
                act.in_flight = false;
                act.send_error(ctx, &e.client_message());
            }
        }));
    }
}

impl Actor for ChatSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Chat session {} established with {}", self.id, self.peer_addr);
        self.registry
            .register(self.id, self.user.id, Channel::Chat, ctx.address().recipient());
        debug!(
            "User {} now has {} open sessions",
            self.user.id,
            self.registry.sessions_for_user(self.user.id).len()
        );
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.registry.unregister(&self.id);
        info!("Chat session {} closed with {}", self.id, self.peer_addr);
    }
}

impl Handler<Outbound> for ChatSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<ChatEvent> for ChatSession {
    fn handle(&mut self, event: ChatEvent, ctx: &mut Self::Context) {
        match event {
            ChatEvent::Chunk(text) => self.send_frame(ctx, &ServerFrame::chunk(text)),
            ChatEvent::Done { conversation_id, .. } => {
                self.in_flight = false;
                self.send_frame(ctx, &ServerFrame::done(Some(conversation_id)));
            }
            ChatEvent::Failed(e) => {
                self.in_flight = false;
                self.send_error(ctx, &e.client_message());
            }
        }
    }

    // A finished turn must not end the session.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("Turn stream finished for session {}", self.id);
        self.in_flight = false;
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.hb = Instant::now();

        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => self.handle_frame(&text, ctx),
            Ok(ws::Message::Binary(bin)) => {
                debug!("Binary frame of {} bytes from {}", bin.len(), self.peer_addr);
                self.send_error(ctx, "Binary messages are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed from {}: {:?}", self.peer_addr, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                error!("Error handling WebSocket message from {}: {}", self.peer_addr, e);
                ctx.stop();
            }
        }
    }
}
