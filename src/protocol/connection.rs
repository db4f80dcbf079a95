//! Connection identity.
//!
//! Maps a canonical 5-tuple to a small integer id.  Two keyed entries are
//! kept per connection (forward and backward) so packets from either
//! direction resolve to the same id.  A TCP SYN without ACK carrying a new
//! sequence number retires the old entries and allocates a fresh id.
//!
//! Given the same trace the same connections yield deterministic ids, but
//! ids should be requested in packet order: feeding shuffled packets can
//! associate a handshake with the wrong connection.

use crate::capture::{find_ipv4, find_tcp, find_udp, CapPacket};
use crate::slist::SimpleList;

pub type ConnectionId = u32;

/// No connection id could be generated.
pub const CONNECTION_ID_NONE: ConnectionId = 0;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Entry {
    proto: u8,
    src: u32,
    dst: u32,
    sport: u16,
    dport: u16,
    finished: bool,
}

struct State {
    /// Sequence number of the initializing packet.
    seq: u32,
    sibling: usize,
    id: ConnectionId,
}

/// Tracks connections and hands out ids (starting at 1).
///
/// Not thread-safe; callers sharing a table across threads must guard it.
#[derive(Default)]
pub struct ConnectionTable {
    list: SimpleList<Entry, State>,
    counter: ConnectionId,
}

impl ConnectionTable {
    pub fn new() -> ConnectionTable {
        ConnectionTable {
            list: SimpleList::new(),
            counter: 0,
        }
    }

    /// Number of directional entries currently tracked.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Determine the connection id for a packet.
    ///
    /// Returns [`CONNECTION_ID_NONE`] for packets without an IPv4 TCP/UDP
    /// 5-tuple.
    pub fn connection_id(&mut self, pkt: &CapPacket) -> ConnectionId {
        let Some(ip) = find_ipv4(pkt.payload) else {
            return CONNECTION_ID_NONE;
        };
        let tcp = find_tcp(pkt.payload, &ip);
        let udp = find_udp(pkt.payload, &ip);
        let (sport, dport) = match (tcp, udp) {
            (Some(tcp), _) => (tcp.sport, tcp.dport),
            (_, Some(udp)) => (udp.sport, udp.dport),
            _ => return CONNECTION_ID_NONE,
        };

        let forward = Entry {
            proto: ip.proto,
            src: u32::from(ip.src),
            dst: u32::from(ip.dst),
            sport,
            dport,
            finished: false,
        };
        let backward = Entry {
            proto: ip.proto,
            src: u32::from(ip.dst),
            dst: u32::from(ip.src),
            sport: dport,
            dport: sport,
            finished: false,
        };

        if let Some(idx) = self.list.find(|k| *k == forward) {
            // a new SYN (no ACK) with a different sequence number means the
            // tuple was reused for a new connection
            if let Some(tcp) = tcp {
                if tcp.syn && !tcp.ack && self.list.value(idx).seq != tcp.seq {
                    return self.restart(idx, tcp.seq);
                }
            }
            return self.list.value(idx).id;
        }

        let id = self.next_id();
        let seq = tcp.map(|t| t.seq).unwrap_or(0);
        let a = self.list.put(forward, State { seq, sibling: 0, id });
        let b = self.list.put(backward, State { seq, sibling: a, id });
        self.list.value_mut(a).sibling = b;
        id
    }

    fn next_id(&mut self) -> ConnectionId {
        self.counter += 1;
        self.counter
    }

    /// Allocate a fresh connection for a reused 5-tuple and retire the old
    /// directional entries.
    fn restart(&mut self, idx: usize, seq: u32) -> ConnectionId {
        let sibling = self.list.value(idx).sibling;
        let id = self.next_id();

        let forward = *self.list.key(idx);
        let backward = *self.list.key(sibling);
        let a = self.list.put(forward, State { seq, sibling: 0, id });
        let b = self.list.put(backward, State { seq, sibling: a, id });
        self.list.value_mut(a).sibling = b;

        self.list.key_mut(idx).finished = true;
        self.list.key_mut(sibling).finished = true;
        id
    }
}
