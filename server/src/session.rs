use crate::connection::{ConnectionEvent, ConnectionTx};
use crate::presence::Presence;
use syncout_system::chrono::{DateTime, Utc};
use syncout_system::{
    epoch_seconds, serde_json, ClientMessage, Document, Operation, ParticipantId,
    ParticipantInfo, ServerMessage, SessionId,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum SessionCommand {
    Join {
        name: Option<String>,
        tx: ConnectionTx,
        reply: oneshot::Sender<ParticipantInfo>,
    },
    Leave {
        participant: ParticipantInfo,
    },
    Inbound {
        from: ParticipantId,
        message: ClientMessage,
    },
    /// Fans a prepared message out to everyone but `from`.
    Relay {
        from: ParticipantId,
        message: ServerMessage,
    },
    Describe {
        reply: oneshot::Sender<SessionSummary>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub language: String,
    pub users_count: usize,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub document: Document,
    pub presence: Presence,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            document: Document::new(),
            presence: Presence::new(),
        }
    }

    pub fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { name, tx, reply } => {
                let participant = self.join(name, tx);
                if reply.send(participant.clone()).is_err() {
                    log::info!(
                        "Connection went away while joining session {}",
                        self.id
                    );
                    self.leave(&participant);
                }
            }
            SessionCommand::Leave { participant } => self.leave(&participant),
            SessionCommand::Inbound { from, message } => self.handle_message(&from, message),
            SessionCommand::Relay { from, message } => {
                self.broadcast(&message, Some(from.as_str()));
            }
            SessionCommand::Describe { reply } => {
                let _ = reply.send(self.summary());
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            language: self.document.language().to_owned(),
            users_count: self.presence.len(),
            revision: self.document.revision(),
            created_at: self.created_at,
        }
    }

    /// Admits a participant: `init` goes to the joiner, `user_joined` to everyone else.
    pub fn join(&mut self, name: Option<String>, tx: ConnectionTx) -> ParticipantInfo {
        let name = name.unwrap_or_else(|| format!("User{}", self.presence.len() + 1));
        let participant = self.presence.add_participant(name, tx);
        log::info!(
            "Participant {} ({}) joined session {}",
            participant.id,
            participant.name,
            self.id
        );

        let init = ServerMessage::Init {
            user_id: participant.id.clone(),
            user_name: participant.name.clone(),
            user_color: participant.color.clone(),
            code: self.document.text().to_owned(),
            language: self.document.language().to_owned(),
            revision: self.document.revision(),
            users: self.presence.snapshot(),
        };
        self.unicast(&participant.id, &init);

        let joined = ServerMessage::UserJoined {
            user: participant.clone(),
            users: self.presence.snapshot(),
        };
        self.broadcast(&joined, Some(participant.id.as_str()));
        participant
    }

    pub fn leave(&mut self, participant: &ParticipantInfo) {
        if self.presence.remove_participant(&participant.id).is_some() {
            log::info!(
                "Participant {} left session {}",
                participant.id,
                self.id
            );
        }
        let left = ServerMessage::UserLeft {
            user_id: participant.id.clone(),
            user_name: participant.name.clone(),
            users: self.presence.snapshot(),
        };
        self.broadcast(&left, None);
    }

    fn handle_message(&mut self, from: &str, message: ClientMessage) {
        let (user_name, user_color) = match self.presence.get(from) {
            Some(p) => (p.name.clone(), p.color.to_owned()),
            None => {
                log::warn!(
                    "Dropping message from {} which is not in session {}",
                    from,
                    self.id
                );
                return;
            }
        };

        match message {
            ClientMessage::Operation {
                op_type,
                position,
                content,
                length,
                revision,
            } => {
                let issued_at = revision.unwrap_or_else(|| self.document.revision());
                let op = Operation::new(op_type, position, content.clone(), length)
                    .issued_by(from, issued_at);
                let revision = self.document.apply(op);
                let event = ServerMessage::Operation {
                    op_type,
                    position,
                    content,
                    length,
                    user_id: from.to_owned(),
                    user_name,
                    user_color,
                    revision,
                    code: self.document.text().to_owned(),
                };
                self.broadcast(&event, Some(from));
            }
            ClientMessage::Cursor {
                position,
                line,
                column,
            } => {
                if let Some(participant) = self.presence.get_mut(from) {
                    participant.cursor_position = position;
                }
                let event = ServerMessage::Cursor {
                    user_id: from.to_owned(),
                    user_name,
                    user_color,
                    position,
                    line,
                    column,
                };
                self.broadcast(&event, Some(from));
            }
            ClientMessage::Language { language } => {
                self.document.set_language(language.clone());
                let event = ServerMessage::Language {
                    language,
                    user_id: from.to_owned(),
                    user_name,
                };
                self.broadcast(&event, Some(from));
            }
            ClientMessage::Chat { message } => {
                let event = ServerMessage::Chat {
                    user_id: from.to_owned(),
                    user_name,
                    user_color,
                    message,
                    timestamp: epoch_seconds(Utc::now()),
                };
                self.broadcast(&event, None);
            }
            other => {
                log::debug!("Session {} ignores {:?}", self.id, other);
            }
        }
    }

    /// Delivers `message` to every participant except `without` and returns how
    /// many accepted it. Participants whose channel is closed or full are removed
    /// once the pass is over.
    pub fn broadcast(&mut self, message: &ServerMessage, without: Option<&str>) -> usize {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("Cannot serialize {:?}: {}", message, err);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut unreachable = Vec::new();
        for participant in self.presence.iter() {
            if without.map_or(false, |id| id == participant.id) {
                continue;
            }
            match participant.deliver(ConnectionEvent::Text(payload.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Outbound buffer of {} is full", participant.id);
                    unreachable.push(participant.id.clone());
                }
                Err(TrySendError::Closed(_)) => unreachable.push(participant.id.clone()),
            }
        }

        for id in unreachable {
            if self.presence.remove_participant(&id).is_some() {
                log::warn!("Evicted unreachable participant {} from session {}", id, self.id);
            }
        }
        delivered
    }

    fn unicast(&mut self, to: &str, message: &ServerMessage) {
        let failed = match (self.presence.get(to), serde_json::to_string(message)) {
            (Some(participant), Ok(payload)) => participant
                .deliver(ConnectionEvent::Text(payload))
                .is_err(),
            (None, _) => false,
            (Some(_), Err(err)) => {
                log::error!("Cannot serialize {:?}: {}", message, err);
                false
            }
        };
        if failed {
            log::warn!("Evicted unreachable participant {} from session {}", to, self.id);
            self.presence.remove_participant(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncout_system::serde_json::{json, Value};
    use syncout_system::{ExecutionResponse, OperationKind, WELCOME_TEXT};
    use tokio::sync::mpsc::{channel, Receiver};

    fn connect(session: &mut Session, name: &str) -> (ParticipantInfo, Receiver<ConnectionEvent>) {
        let (tx, rx) = channel(16);
        let participant = session.join(Some(name.to_owned()), tx);
        (participant, rx)
    }

    fn drain(rx: &mut Receiver<ConnectionEvent>) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ConnectionEvent::Text(text) = event {
                messages.push(serde_json::from_str(&text).expect("valid json"));
            }
        }
        messages
    }

    fn inbound(session: &mut Session, from: &ParticipantInfo, message: Value) {
        session.handle(SessionCommand::Inbound {
            from: from.id.clone(),
            message: serde_json::from_value(message).expect("valid client message"),
        });
    }

    #[test]
    fn it_broadcasts_to_everyone_but_the_excluded_and_evicts_dead_channels() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "a");
        let (_b, mut b_rx) = connect(&mut session, "b");
        let (c, c_rx) = connect(&mut session, "c");
        let (_d, mut d_rx) = connect(&mut session, "d");
        drop(c_rx);
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut d_rx);

        let delivered = session.broadcast(&ServerMessage::Pong, Some(a.id.as_str()));

        assert_eq!(delivered, 2);
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec![json!({ "type": "pong" })]);
        assert_eq!(drain(&mut d_rx), vec![json!({ "type": "pong" })]);
        assert_eq!(session.presence.len(), 3);
        assert!(session.presence.get(&c.id).is_none());
    }

    #[test]
    fn a_full_outbound_buffer_counts_as_unreachable() {
        let mut session = Session::new(SessionId::new("room"));
        let (slow_tx, _slow_rx) = channel(1);
        let slow = session.join(Some("slow".into()), slow_tx);
        let (_fast, mut fast_rx) = connect(&mut session, "fast");

        // the init message already fills the slow participant's buffer
        assert_eq!(session.broadcast(&ServerMessage::Pong, None), 1);
        assert!(session.presence.get(&slow.id).is_none());
        assert!(!drain(&mut fast_rx).is_empty());
    }

    #[test]
    fn joiners_see_the_current_document_and_others_hear_about_them() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "Ada");

        let init = drain(&mut a_rx);
        assert_eq!(init.len(), 1);
        assert_eq!(init[0]["type"], "init");
        assert_eq!(init[0]["user_id"], a.id.as_str());
        assert_eq!(init[0]["user_color"], "#FF6B6B");
        assert_eq!(init[0]["code"], WELCOME_TEXT);
        assert_eq!(init[0]["language"], "python");
        assert_eq!(init[0]["revision"], 0);

        inbound(
            &mut session,
            &a,
            json!({ "type": "operation", "op_type": "insert", "position": 0, "content": "x" }),
        );
        assert_eq!(session.document.text(), format!("x{}", WELCOME_TEXT));
        assert_eq!(session.document.revision(), 1);
        assert!(drain(&mut a_rx).is_empty(), "edits are not echoed to their author");

        let (b, mut b_rx) = connect(&mut session, "Bob");
        let init = drain(&mut b_rx);
        assert_eq!(init[0]["code"], format!("x{}", WELCOME_TEXT));
        assert_eq!(init[0]["revision"], 1);
        assert_eq!(init[0]["users"].as_array().map(Vec::len), Some(2));
        assert_eq!(init[0]["user_color"], "#4ECDC4");

        let joined = drain(&mut a_rx);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0]["type"], "user_joined");
        assert_eq!(joined[0]["user"]["id"], b.id.as_str());
        assert_eq!(joined[0]["users"][1]["name"], "Bob");
    }

    #[test]
    fn default_names_count_current_members() {
        let mut session = Session::new(SessionId::new("room"));
        let (tx, _rx) = channel(4);
        let first = session.join(None, tx);
        let (tx, _rx2) = channel(4);
        let second = session.join(None, tx);
        assert_eq!(first.name, "User1");
        assert_eq!(second.name, "User2");
    }

    #[test]
    fn operations_reach_others_with_the_resulting_text() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "a");
        let (_b, mut b_rx) = connect(&mut session, "b");
        drain(&mut a_rx);
        drain(&mut b_rx);

        inbound(
            &mut session,
            &a,
            json!({ "type": "operation", "op_type": "full_update", "content": "print(1)\n" }),
        );
        inbound(
            &mut session,
            &a,
            json!({ "type": "operation", "op_type": "delete", "position": 5, "length": 99 }),
        );

        let seen = drain(&mut b_rx);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["op_type"], "full_update");
        assert_eq!(seen[1]["op_type"], "delete");
        assert_eq!(seen[1]["code"], "print");
        assert_eq!(seen[1]["revision"], 2);
        assert_eq!(seen[1]["user_id"], a.id.as_str());

        let logged = session.document.history().latest().expect("recorded");
        assert_eq!(logged.kind, OperationKind::Delete);
        assert_eq!(logged.participant_id, a.id);
        assert_eq!(logged.revision, 1);
    }

    #[test]
    fn cursor_updates_presence_and_is_not_echoed() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "a");
        let (_b, mut b_rx) = connect(&mut session, "b");
        drain(&mut a_rx);
        drain(&mut b_rx);

        inbound(
            &mut session,
            &a,
            json!({ "type": "cursor", "position": 12, "line": 2, "column": 4 }),
        );

        assert!(drain(&mut a_rx).is_empty());
        let seen = drain(&mut b_rx);
        assert_eq!(seen[0]["type"], "cursor");
        assert_eq!(seen[0]["line"], 2);
        assert_eq!(session.presence.snapshot()[0].cursor_position, 12);
    }

    #[test]
    fn language_changes_are_stored_and_chat_echoes_to_everyone() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "a");
        let (_b, mut b_rx) = connect(&mut session, "b");
        drain(&mut a_rx);
        drain(&mut b_rx);

        inbound(&mut session, &a, json!({ "type": "language", "language": "rust" }));
        assert_eq!(session.summary().language, "rust");
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx)[0]["language"], "rust");

        inbound(&mut session, &a, json!({ "type": "chat", "message": "hi" }));
        assert_eq!(drain(&mut a_rx)[0]["message"], "hi");
        assert_eq!(drain(&mut b_rx)[0]["message"], "hi");
        assert_eq!(session.document.revision(), 0);
    }

    #[test]
    fn leaving_notifies_the_rest_and_disappears_from_later_snapshots() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "a");
        let (b, _b_rx) = connect(&mut session, "b");
        drain(&mut a_rx);

        session.handle(SessionCommand::Leave {
            participant: b.clone(),
        });
        let left = drain(&mut a_rx);
        assert_eq!(left[0]["type"], "user_left");
        assert_eq!(left[0]["user_id"], b.id.as_str());
        assert_eq!(left[0]["users"].as_array().map(Vec::len), Some(1));

        let (_c, mut c_rx) = connect(&mut session, "c");
        let init = drain(&mut c_rx);
        let ids = init[0]["users"]
            .as_array()
            .expect("users")
            .iter()
            .map(|u| u["id"].as_str().unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        assert!(ids.contains(&a.id));
        assert!(!ids.contains(&b.id));
    }

    #[test]
    fn execution_results_are_relayed_only_to_others() {
        let mut session = Session::new(SessionId::new("room"));
        let (a, mut a_rx) = connect(&mut session, "a");
        let (_b, mut b_rx) = connect(&mut session, "b");
        drain(&mut a_rx);
        drain(&mut b_rx);

        session.handle(SessionCommand::Relay {
            from: a.id.clone(),
            message: ServerMessage::ExecutionResult {
                user_id: a.id.clone(),
                user_name: a.name.clone(),
                user_color: a.color.clone(),
                result: ExecutionResponse::failure("Compiler/interpreter not found: python", 0.0),
            },
        });

        assert!(drain(&mut a_rx).is_empty());
        let seen = drain(&mut b_rx);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["success"], false);
    }

    #[test]
    fn messages_from_strangers_are_dropped() {
        let mut session = Session::new(SessionId::new("room"));
        let (_a, mut a_rx) = connect(&mut session, "a");
        drain(&mut a_rx);

        session.handle(SessionCommand::Inbound {
            from: "nobody".into(),
            message: ClientMessage::Chat {
                message: "hi".into(),
            },
        });
        assert!(drain(&mut a_rx).is_empty());
    }

    #[test]
    fn a_join_nobody_waits_for_is_rolled_back() {
        let mut session = Session::new(SessionId::new("room"));
        let (tx, _rx) = channel(4);
        let (reply, reply_rx) = oneshot::channel();
        drop(reply_rx);
        session.handle(SessionCommand::Join {
            name: Some("ghost".into()),
            tx,
            reply,
        });
        assert!(session.presence.is_empty());
    }

    #[test]
    fn describe_reports_a_summary() {
        let mut session = Session::new(SessionId::new("abc"));
        let (_a, _a_rx) = connect(&mut session, "a");
        let (reply, mut reply_rx) = oneshot::channel();
        session.handle(SessionCommand::Describe { reply });
        let summary = reply_rx.try_recv().expect("answered");
        assert_eq!(summary.session_id.as_str(), "ABC");
        assert_eq!(summary.users_count, 1);
        assert_eq!(summary.revision, 0);
    }
}
