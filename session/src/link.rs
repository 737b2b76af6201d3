//! Transport contract between a session and its peers.
//!
//! A session never touches sockets. It hands [`WireMessage`] values to a
//! [`SessionLink`], and whoever owns the transport feeds received frames back
//! through [`crate::Session::receive_bytes`].

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

use convoy_core::{
    wire::{self, WireError, WireMessage},
    Role, SlotId,
};
use thiserror::Error;

/// Errors raised while handing a message to the transport.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The message could not be framed.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The addressed participant is not connected.
    #[error("{0} is not connected")]
    Disconnected(SlotId),
    /// The local role may not perform the operation.
    #[error("{role:?} participants cannot {action}")]
    NotPermitted {
        /// Role of the local participant.
        role: Role,
        /// Rejected operation.
        action: &'static str,
    },
}

/// Role-aware outbound half of a transport.
pub trait SessionLink {
    /// Role of the local participant.
    fn role(&self) -> Role;

    /// Seat number of the local participant.
    fn local_slot(&self) -> SlotId;

    /// Sends a message to the authority.
    fn send_to_authority(&mut self, message: &WireMessage) -> Result<(), LinkError>;

    /// Sends a message to every other participant.
    fn broadcast(&mut self, message: &WireMessage) -> Result<(), LinkError>;
}

/// Link of a single-player session; every send is discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineLink;

impl SessionLink for OfflineLink {
    fn role(&self) -> Role {
        Role::Offline
    }

    fn local_slot(&self) -> SlotId {
        SlotId::HOST
    }

    fn send_to_authority(&mut self, _message: &WireMessage) -> Result<(), LinkError> {
        Ok(())
    }

    fn broadcast(&mut self, _message: &WireMessage) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Frame waiting in a participant's mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Slot of the sender.
    pub from: SlotId,
    /// Encoded frame.
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct HubState {
    mailboxes: BTreeMap<SlotId, VecDeque<Delivery>>,
}

/// In-process message hub connecting several sessions.
///
/// Frames are encoded exactly as a network transport would carry them and
/// wait in per-slot mailboxes until drained. Cloning the hub shares it.
#[derive(Clone, Debug, Default)]
pub struct LoopbackHub {
    state: Rc<RefCell<HubState>>,
}

impl LoopbackHub {
    /// Creates a hub without participants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a participant and returns its link.
    pub fn connect(&self, role: Role, slot: SlotId) -> LoopbackLink {
        let _ = self
            .state
            .borrow_mut()
            .mailboxes
            .entry(slot)
            .or_default();
        log::debug!("{slot} connected to loopback hub as {role:?}");
        LoopbackLink {
            hub: self.clone(),
            role,
            slot,
        }
    }

    /// Removes a participant; frames addressed to it are refused afterwards.
    pub fn disconnect(&self, slot: SlotId) {
        if self.state.borrow_mut().mailboxes.remove(&slot).is_some() {
            log::debug!("{slot} disconnected from loopback hub");
        }
    }

    /// Takes every frame waiting for `slot`, oldest first.
    pub fn drain(&self, slot: SlotId) -> Vec<Delivery> {
        self.state
            .borrow_mut()
            .mailboxes
            .get_mut(&slot)
            .map(|mailbox| mailbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of frames waiting for `slot`.
    #[must_use]
    pub fn pending(&self, slot: SlotId) -> usize {
        self.state
            .borrow()
            .mailboxes
            .get(&slot)
            .map_or(0, VecDeque::len)
    }

    fn post(&self, from: SlotId, to: SlotId, bytes: Vec<u8>) -> Result<(), LinkError> {
        let mut state = self.state.borrow_mut();
        let mailbox = state
            .mailboxes
            .get_mut(&to)
            .ok_or(LinkError::Disconnected(to))?;
        mailbox.push_back(Delivery { from, bytes });
        Ok(())
    }

    fn post_all(&self, from: SlotId, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        for (slot, mailbox) in state.mailboxes.iter_mut() {
            if *slot != from {
                mailbox.push_back(Delivery {
                    from,
                    bytes: bytes.to_vec(),
                });
            }
        }
    }
}

/// Participant endpoint of a [`LoopbackHub`].
#[derive(Clone, Debug)]
pub struct LoopbackLink {
    hub: LoopbackHub,
    role: Role,
    slot: SlotId,
}

impl LoopbackLink {
    /// Hub the link posts into.
    #[must_use]
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }
}

impl SessionLink for LoopbackLink {
    fn role(&self) -> Role {
        self.role
    }

    fn local_slot(&self) -> SlotId {
        self.slot
    }

    fn send_to_authority(&mut self, message: &WireMessage) -> Result<(), LinkError> {
        if self.role.is_authority() {
            return Err(LinkError::NotPermitted {
                role: self.role,
                action: "send to the authority",
            });
        }
        let bytes = wire::encode(message)?;
        self.hub.post(self.slot, SlotId::HOST, bytes)
    }

    fn broadcast(&mut self, message: &WireMessage) -> Result<(), LinkError> {
        if self.role != Role::Host {
            return Err(LinkError::NotPermitted {
                role: self.role,
                action: "broadcast",
            });
        }
        let bytes = wire::encode(message)?;
        self.hub.post_all(self.slot, &bytes);
        Ok(())
    }
}
