use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::websocket::messages::{Outbound, RoomInbound, RoomMessage, RoomMessageKind};
use crate::websocket::registry::{Channel, ConnectionRegistry};
use crate::websocket::session::{CLIENT_TIMEOUT, HEARTBEAT_INTERVAL};
use crate::AppState;

/// Messages kept for replay to people joining the room.
pub const ROOM_HISTORY_LIMIT: usize = 100;

/// The public chat room shared by every `/ws/room` socket.
#[derive(Clone)]
pub struct ChatRoom {
    registry: ConnectionRegistry,
    history: Arc<Mutex<VecDeque<RoomMessage>>>,
}

impl ChatRoom {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(ROOM_HISTORY_LIMIT))),
        }
    }

    /// Record `message` and deliver it to every member.
    pub fn publish(&self, message: RoomMessage) -> usize {
        {
            let mut history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            history.push_back(message.clone());
            while history.len() > ROOM_HISTORY_LIMIT {
                history.pop_front();
            }
        }

        match serde_json::to_string(&message) {
            Ok(json) => self.registry.broadcast(Channel::Room, &json, None),
            Err(e) => {
                error!("Failed to serialize room message: {}", e);
                0
            }
        }
    }

    pub fn history(&self) -> Vec<RoomMessage> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self) -> usize {
        self.registry.channel_count(Channel::Room)
    }
}

pub async fn room_route(
    req: HttpRequest,
    stream: web::Payload,
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let username = display_name(&user.email, user.id);
    info!("{} is joining the chat room", username);

    ws::start(
        RoomSession::new(user.id, username, state.room.clone(), state.registry.clone()),
        &req,
        stream,
    )
}

fn display_name(email: &str, user_id: Uuid) -> String {
    match email.split('@').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("user-{}", &user_id.to_string()[..8]),
    }
}

pub struct RoomSession {
    id: Uuid,
    user_id: Uuid,
    username: String,
    room: ChatRoom,
    registry: ConnectionRegistry,
    hb: Instant,
}

impl RoomSession {
    pub fn new(user_id: Uuid, username: String, room: ChatRoom, registry: ConnectionRegistry) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            username,
            room,
            registry,
            hb: Instant::now(),
        }
    }
}

impl Actor for RoomSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        for message in self.room.history() {
            if let Ok(json) = serde_json::to_string(&message) {
                ctx.text(json);
            }
        }

        self.registry
            .register(self.id, self.user_id, Channel::Room, ctx.address().recipient());
        self.room.publish(RoomMessage::new(
            RoomMessageKind::Join,
            self.username.clone(),
            format!("{} joined the room", self.username),
        ));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("Room heartbeat timed out for {}", act.username);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.registry.unregister(&self.id);
        self.room.publish(RoomMessage::new(
            RoomMessageKind::Leave,
            self.username.clone(),
            format!("{} left the room", self.username),
        ));
    }
}

impl Handler<Outbound> for RoomSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RoomSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.hb = Instant::now();

        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<RoomInbound>(&text) {
                Ok(inbound) if !inbound.content.trim().is_empty() => {
                    self.room.publish(RoomMessage::new(
                        RoomMessageKind::Message,
                        self.username.clone(),
                        inbound.content.trim(),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    let notice = RoomMessage::system(format!("Invalid message format: {}", e));
                    if let Ok(json) = serde_json::to_string(&notice) {
                        ctx.text(json);
                    }
                }
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                error!("Room socket error for {}: {}", self.username, e);
                ctx.stop();
            }
        }
    }
}
