use actix::{
    Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, Message, Running, StreamHandler,
    WrapFuture,
};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use actix_web_actors::ws::{CloseCode, CloseReason};
use std::sync::Arc;
use std::time::Instant;

use syncout_system::{
    serde_json, ClientMessage, ExecutionRequest, JoinRequest, ParticipantInfo, ServerMessage,
    SessionId,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;

use crate::config::ConnectionSettings;
use crate::executor::Executor;
use crate::session::SessionCommand;
use crate::session_registry::{SessionRegistry, SessionTx};

pub type ConnectionTx = tokio::sync::mpsc::Sender<ConnectionEvent>;

/// What a session pushes to one connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    Text(String),
    Disconnected,
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(ConnectionEvent);

enum ConnectionState {
    /// Waiting for the identity frame.
    Connecting,
    /// Join sent, mailbox paused until the session answers.
    Admitting,
    Active {
        participant: ParticipantInfo,
        session_tx: SessionTx,
    },
    Closed,
}

pub struct ConnectionActor {
    state: ConnectionState,
    session_id: SessionId,
    registry: Arc<SessionRegistry>,
    executor: Arc<dyn Executor>,
    settings: ConnectionSettings,
    outbound: Option<ConnectionTx>,
    heartbeat: Instant,
}

impl ConnectionActor {
    pub fn new(
        session_id: SessionId,
        registry: Arc<SessionRegistry>,
        executor: Arc<dyn Executor>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            state: ConnectionState::Connecting,
            session_id,
            registry,
            executor,
            settings,
            outbound: None,
            heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.settings.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.heartbeat) > act.settings.client_timeout {
                log::info!(
                    "Connection to session {} timed out, closing",
                    act.session_id
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match self.state {
            ConnectionState::Connecting => match serde_json::from_str::<JoinRequest>(text) {
                Ok(request) => self.admit(request, ctx),
                Err(err) => {
                    log::warn!("Invalid identity message: {}", err);
                    self.terminate("expected an identity message", ctx);
                }
            },
            ConnectionState::Active { .. } => match serde_json::from_str::<ClientMessage>(text) {
                Ok(message) => self.dispatch(message, ctx),
                Err(err) => {
                    log::warn!("Malformed message in session {}: {}", self.session_id, err);
                    self.terminate("malformed message", ctx);
                }
            },
            ConnectionState::Admitting | ConnectionState::Closed => {
                log::debug!("Dropping frame received outside of the active state");
            }
        }
    }

    fn admit(&mut self, request: JoinRequest, ctx: &mut ws::WebsocketContext<Self>) {
        let tx = match self.outbound.take() {
            Some(tx) => tx,
            None => {
                ctx.stop();
                return;
            }
        };
        let session_tx = self
            .registry
            .get_or_create(self.session_id.as_str())
            .sender();
        let (reply, admitted) = oneshot::channel();
        let command = SessionCommand::Join {
            name: request.name,
            tx,
            reply,
        };
        self.state = ConnectionState::Admitting;

        let join_tx = session_tx.clone();
        ctx.wait(
            async move {
                join_tx.send(command).await.ok()?;
                admitted.await.ok()
            }
            .into_actor(self)
            .map(move |participant, act, ctx| match participant {
                Some(participant) => {
                    log::info!(
                        "Connection admitted to session {} as {}",
                        act.session_id,
                        participant.id
                    );
                    act.state = ConnectionState::Active {
                        participant,
                        session_tx,
                    };
                }
                None => {
                    log::warn!("Session {} did not admit the connection", act.session_id);
                    act.state = ConnectionState::Closed;
                    ctx.stop();
                }
            }),
        );
    }

    fn dispatch(&mut self, message: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let (participant, session_tx) = match &self.state {
            ConnectionState::Active {
                participant,
                session_tx,
            } => (participant.clone(), session_tx.clone()),
            _ => return,
        };

        match message {
            ClientMessage::Ping => self.send(&ServerMessage::Pong, ctx),
            ClientMessage::Execute {
                code,
                language,
                stdin,
            } => {
                let request = ExecutionRequest {
                    code,
                    language,
                    stdin,
                };
                self.execute(request, participant, session_tx, ctx);
            }
            ClientMessage::Unknown => {
                log::debug!("Ignoring message of unknown type from {}", participant.id);
            }
            message => {
                let command = SessionCommand::Inbound {
                    from: participant.id,
                    message,
                };
                self.submit(session_tx, command, ctx);
            }
        }
    }

    /// Runs detached from the actor: a disconnect does not cancel the program,
    /// only the executor's own timeout does.
    fn execute(
        &mut self,
        request: ExecutionRequest,
        participant: ParticipantInfo,
        session_tx: SessionTx,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        log::info!(
            "{} runs {} code in session {}",
            participant.id,
            request.language,
            self.session_id
        );
        let executor = Arc::clone(&self.executor);
        let addr = ctx.address();
        tokio::spawn(async move {
            let result = executor.execute(request).await;
            let message = ServerMessage::ExecutionResult {
                user_id: participant.id.clone(),
                user_name: participant.name,
                user_color: participant.color,
                result,
            };
            match serde_json::to_string(&message) {
                Ok(text) => addr.do_send(ConnectionActorMessage(ConnectionEvent::Text(text))),
                Err(err) => log::error!("Cannot serialize {:?}: {}", message, err),
            }
            let relayed = session_tx
                .send(SessionCommand::Relay {
                    from: participant.id,
                    message,
                })
                .await;
            if relayed.is_err() {
                log::warn!("Session ended before an execution result could be relayed");
            }
        });
    }

    fn submit(
        &self,
        session_tx: SessionTx,
        command: SessionCommand,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        match session_tx.try_send(command) {
            Ok(()) => (),
            Err(TrySendError::Full(command)) => {
                // keep ordering: nothing else is read until the session has room
                ctx.wait(
                    async move { session_tx.send(command).await.is_ok() }
                        .into_actor(self)
                        .map(|sent, act, ctx| {
                            if !sent {
                                log::error!("Session {} is gone", act.session_id);
                                ctx.stop();
                            }
                        }),
                );
            }
            Err(TrySendError::Closed(_)) => {
                log::error!("Session {} is gone", self.session_id);
                ctx.stop();
            }
        }
    }

    fn send(&self, message: &ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(message) {
            Ok(text) => ctx.text(text),
            Err(err) => log::error!("Cannot serialize {:?}: {}", message, err),
        }
    }

    fn terminate(&mut self, description: &str, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.close(Some(CloseReason {
            code: CloseCode::Invalid,
            description: Some(description.to_owned()),
        }));
        ctx.stop();
    }

    /// Leaves the session at most once, whatever path led here.
    fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
        if let ConnectionState::Active {
            participant,
            session_tx,
        } = state
        {
            log::info!(
                "Participant {} ({}) disconnected from session {}",
                participant.id,
                participant.name,
                self.session_id
            );
            tokio::spawn(async move {
                let session_gone = session_tx
                    .send(SessionCommand::Leave { participant })
                    .await
                    .is_err();
                if session_gone {
                    log::warn!("Session ended before a participant could leave it");
                }
            });
        }
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) =
            tokio::sync::mpsc::channel::<ConnectionEvent>(self.settings.outbound_buffer);
        self.outbound = Some(tx);

        let addr = ctx.address();

        tokio::spawn(async move {
            log::debug!("connection pump - started");
            while let Some(event) = rx.recv().await {
                if !addr.connected() {
                    break;
                }
                addr.do_send(ConnectionActorMessage(event));
            }
            // the session dropped this connection
            addr.do_send(ConnectionActorMessage(ConnectionEvent::Disconnected));
            log::debug!("connection pump - terminated");
        });

        self.start_heartbeat(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.close();
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("Websocket protocol error: {}", err);
                ctx.stop();
                return;
            }
        };
        self.heartbeat = Instant::now();

        match msg {
            ws::Message::Ping(msg) => ctx.pong(&msg),
            ws::Message::Pong(_) | ws::Message::Nop => (),
            ws::Message::Text(text) => {
                log::debug!("Ingress size: {}", text.len());
                self.handle_text(&text, ctx);
            }
            ws::Message::Binary(bin) => {
                log::warn!("Unexpected binary frame of {} bytes", bin.len());
                self.terminate("binary frames are not supported", ctx);
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                self.terminate("fragmented frames are not supported", ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        match msg.0 {
            ConnectionEvent::Text(text) => {
                log::debug!("Egress {}", text);
                ctx.text(text);
            }
            ConnectionEvent::Disconnected => {
                if let ConnectionState::Active { participant, .. } = &self.state {
                    log::warn!("Session dropped participant {}, closing", participant.id);
                }
                ctx.close(None);
                ctx.stop();
            }
        }
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    registry: web::Data<SessionRegistry>,
    executor: web::Data<dyn Executor>,
    settings: web::Data<ConnectionSettings>,
) -> Result<HttpResponse, Error> {
    let session_id = SessionId::new(&path.into_inner());
    ws::start(
        ConnectionActor::new(
            session_id,
            registry.into_inner(),
            executor.into_inner(),
            settings.get_ref().clone(),
        ),
        &req,
        stream,
    )
}
