use crate::connection::{ConnectionEvent, ConnectionTx};
use syncout_system::{short_id, ParticipantId, ParticipantInfo};
use tokio::sync::mpsc::error::TrySendError;

pub const PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98FB98", "#FFA07A",
    "#87CEEB", "#F0E68C",
];

pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub color: &'static str,
    pub cursor_position: i64,
    tx: ConnectionTx,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.to_owned(),
            cursor_position: self.cursor_position,
        }
    }

    /// Never waits: a closed or full outbound buffer is reported as an error.
    pub fn deliver(&self, event: ConnectionEvent) -> Result<(), TrySendError<ConnectionEvent>> {
        self.tx.try_send(event)
    }
}

/// Live participants of one session, in join order.
#[derive(Default)]
pub struct Presence {
    participants: Vec<Participant>,
    joined: usize,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Colour comes from how many participants have ever joined, so it does not
    /// depend on who happens to be connected right now.
    pub fn add_participant(&mut self, name: String, tx: ConnectionTx) -> ParticipantInfo {
        let mut id = short_id();
        while self.get(&id).is_some() {
            id = short_id();
        }
        let color = PALETTE[self.joined % PALETTE.len()];
        self.joined += 1;

        let participant = Participant {
            id,
            name,
            color,
            cursor_position: 0,
            tx,
        };
        let info = participant.info();
        self.participants.push(participant);
        info
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        self.participants
            .iter()
            .position(|p| p.id == id)
            .map(|index| self.participants.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn snapshot(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(Participant::info).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
