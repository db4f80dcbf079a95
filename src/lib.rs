/*!
Measurement streams for distributed passive measurement infrastructure.

Measurement points observe traffic, timestamp each frame with picosecond
precision and emit the result as *capture packets*, either into on-disk
trace files or across the network grouped into sequence-numbered
*measurement frames* (Ethernet multicast, UDP or TCP).  This crate is the
runtime shared by producers and consumers of those streams:

* [`Stream`] — open/create/read/write over the four transports, with a
  bounded frame buffer, per-source sequence validation and a stable text
  [`StreamAddr`] grammar.
* [`Filter`] — a compact predicate over capture packets (L2-L4 fields,
  times, MP identity), usable in-process and in the packed form shipped to
  measurement points.
* [`protocol`] — a table-driven walker that steps through nested protocol
  headers for formatting, dumping and connection identification.
* [`Picotime`] — `(seconds, picoseconds)` timestamps with parsing and
  formatting.
* [`marker`] — detection of the distinguished UDP packets that delimit
  experiment runs.

Reading a trace:

```no_run
use capstream::{Stream, StreamAddr};

let addr: StreamAddr = "trace.cap".parse()?;
let mut stream = Stream::open(&addr, None, 0)?;
while let Some(pkt) = stream.read(None, None)? {
    println!("{} caught {} bytes", pkt.head.mampid(), pkt.head.caplen);
}
# Ok::<(), capstream::Error>(())
```
*/

mod address;
mod capture;
mod error;
pub mod filter;
#[cfg(target_os = "linux")]
mod iface;
pub mod marker;
pub mod protocol;
mod slist;
mod stream;
mod time;
mod wire;

pub use address::{AddrKind, AddrType, EtherAddr, StreamAddr, DEFAULT_PORT};
pub use capture::{
    find_ipv4, find_tcp, find_udp, layer_size, payload_size, CapHeader, CapPacket, Ipv4Info,
    Level, TcpInfo, UdpInfo, CAP_HEADER_SIZE,
};
pub use error::{error_string, Error, Result, ERROR_FIRST};
pub use filter::{from_argv as filter_from_argv, Filter, FilterMode, PackedFilter};
#[cfg(target_os = "linux")]
pub use iface::Iface;
pub use marker::{is_marker, Marker};
pub use protocol::{ConnectionId, ConnectionTable, HeaderChunk, ProtocolType, CONNECTION_ID_NONE};
pub use slist::SimpleList;
pub use stream::{SeqPolicy, Stream, StreamStat};
pub use time::{Picotime, PICODIVIDER};
pub use wire::{
    EthernetHeader, FileHeader, FileVersion, SendHeader, ETHERTYPE_MP, ETH_HEADER_SIZE,
    FILE_HEADER_SIZE, FILE_MAGIC, LIBRARY_VERSION, SENDER_FLUSH, SEND_HEADER_SIZE,
};
