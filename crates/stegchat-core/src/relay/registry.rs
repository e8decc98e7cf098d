use std::collections::BTreeMap;
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, info, warn};

use crate::channel::{SecureChannel, Transport};
use crate::error::StegchatError;
use crate::relay::protocol::BroadcastMessage;

/// Relay wide unique, never reused
pub type SessionId = u64;

type Members<T> = BTreeMap<SessionId, SecureChannel<T>>;

/// What one routing pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// messages collected from members
    pub received: usize,
    /// batches delivered, one per receiving member
    pub delivered: usize,
    /// sessions removed because they failed
    pub dropped: usize,
}

impl PassSummary {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Channel name to members, the whole topology of a relay.
///
/// A channel exists exactly as long as it has members. Every mutation goes through
/// `&mut self`, so one lock around the registry makes registration, removal and a
/// routing pass atomic with respect to each other.
pub struct ChannelRegistry<T: Transport = TcpStream> {
    channels: BTreeMap<String, Members<T>>,
    next_id: SessionId,
}

impl<T: Transport> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self {
            channels: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T: Transport> ChannelRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the session to `channel`, creating the channel for its first member.
    pub fn register(&mut self, channel: &str, session: SecureChannel<T>) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;

        let peer = session.peer();
        let members = self.channels.entry(channel.to_string()).or_default();
        members.insert(id, session);
        info!(
            "session {id} ({peer}) joined channel {channel:?}, {} members",
            members.len()
        );
        id
    }

    /// Removes and closes a session. The channel goes away with its last member.
    ///
    /// Returns false if the session is not a member of `channel`.
    pub fn unregister(&mut self, channel: &str, id: SessionId) -> bool {
        let Some(members) = self.channels.get_mut(channel) else {
            return false;
        };
        let Some(mut session) = members.remove(&id) else {
            return false;
        };

        if let Err(e) = session.close() {
            debug!("closing session {id}: {e}");
        }
        if members.is_empty() {
            self.channels.remove(channel);
            info!("channel {channel:?} is empty and was removed");
        }
        true
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// session ids of `channel` in joining order, empty for unknown channels
    pub fn members(&self, channel: &str) -> Vec<SessionId> {
        self.channels
            .get(channel)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.channels.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// snapshot of the whole topology
    pub fn snapshot(&self) -> BTreeMap<String, Vec<SessionId>> {
        self.channels
            .iter()
            .map(|(name, members)| (name.clone(), members.keys().copied().collect()))
            .collect()
    }

    /// Closes every session and forgets all channels.
    pub fn close_all(&mut self) {
        for (name, members) in std::mem::take(&mut self.channels) {
            for (id, mut session) in members {
                if let Err(e) = session.close() {
                    debug!("closing session {id} of {name:?}: {e}");
                }
            }
        }
    }

    /// One round over every channel.
    ///
    /// Each member gets `wait` to deliver a message. Whatever a channel collected is
    /// sent as one [`BroadcastMessage`] to every member still present, the senders
    /// included. A member whose receive fails, or whose send fails with a
    /// [session fatal](StegchatError::is_session_fatal) error, is removed and closed.
    /// A batch that does not fit the member's carrier is skipped for that member only.
    pub fn route_pass(&mut self, wait: Duration) -> PassSummary {
        let mut summary = PassSummary::default();

        for name in self.channel_names() {
            let Some(members) = self.channels.get_mut(&name) else {
                continue;
            };

            let mut messages = Vec::new();
            let mut failed = Vec::new();
            for (&id, session) in members.iter_mut() {
                match receive_text(session, wait) {
                    Ok(Some(message)) => messages.push(message),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("dropping session {id} from {name:?}, receive failed: {e}");
                        failed.push(id);
                    }
                }
            }
            for id in failed.drain(..) {
                drop_member(members, id);
                summary.dropped += 1;
            }

            if !messages.is_empty() {
                summary.received += messages.len();
                let batch = BroadcastMessage::new(messages).to_bytes();
                match batch {
                    Ok(batch) => {
                        for (&id, session) in members.iter_mut() {
                            match session.send(&batch) {
                                Ok(()) => summary.delivered += 1,
                                Err(e) if e.is_session_fatal() => {
                                    warn!("dropping session {id} from {name:?}, send failed: {e}");
                                    failed.push(id);
                                }
                                Err(e) => {
                                    warn!("batch for session {id} in {name:?} not delivered: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => warn!("cannot serialize batch for {name:?}: {e}"),
                }
                for id in failed {
                    drop_member(members, id);
                    summary.dropped += 1;
                }
            }

            if members.is_empty() {
                self.channels.remove(&name);
                info!("channel {name:?} is empty and was removed");
            }
        }

        if !summary.is_idle() {
            debug!("routing pass: {summary:?}");
        }
        summary
    }
}

/// relayed messages are JSON strings, so anything that is not UTF-8 breaks the protocol
fn receive_text<T: Transport>(session: &mut SecureChannel<T>, wait: Duration) -> crate::Result<Option<String>> {
    match session.recv_timeout(wait)? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| StegchatError::ProtocolViolation("message is not valid UTF-8".to_string())),
        None => Ok(None),
    }
}

fn drop_member<T: Transport>(members: &mut Members<T>, id: SessionId) {
    if let Some(mut session) = members.remove(&id) {
        if let Err(e) = session.close() {
            debug!("closing session {id}: {e}");
        }
    }
}
