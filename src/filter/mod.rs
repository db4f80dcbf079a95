//! Packet filters.
//!
//! A filter is a compact predicate over a capture packet: a bitmap selects
//! which fields are active and a mode combines them with AND or OR.  The
//! same structure is usable in-process and, through [`Filter::pack`], in the
//! network-transmittable form shipped to measurement points.

mod argv;
mod wire;

pub use argv::{from_argv, usage};
pub use wire::{PackedFilter, FILTER_PACKED_SIZE};

use crate::address::{EtherAddr, StreamAddr};
use crate::capture::{ether_type, find_ipv4, find_tcp, find_udp, CapPacket};
use crate::time::Picotime;
use std::io::{self, Write};
use std::net::Ipv4Addr;

/// Filter field bits, in wire order.
pub mod index {
    pub const DST_PORT: u32 = 1 << 0;
    pub const SRC_PORT: u32 = 1 << 1;
    pub const IP_DST: u32 = 1 << 2;
    pub const IP_SRC: u32 = 1 << 3;
    pub const IP_PROTO: u32 = 1 << 4;
    pub const ETH_DST: u32 = 1 << 5;
    pub const ETH_SRC: u32 = 1 << 6;
    pub const ETH_TYPE: u32 = 1 << 7;
    pub const VLAN: u32 = 1 << 8;
    pub const IFACE: u32 = 1 << 9;
    pub const MAMPID: u32 = 1 << 10;
    pub const END_TIME: u32 = 1 << 11;
    pub const START_TIME: u32 = 1 << 12;
    /// Source or destination port.
    pub const PORT: u32 = 1 << 13;

    // local-only filters, never interpreted by MArCd
    pub const FRAME_MAX_DT: u32 = 1 << 14;
    pub const FRAME_NUM: u32 = 1 << 15;
}

/// How active field predicates are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterMode {
    #[default]
    And,
    Or,
}

/// Current version of the packed filter format.
///
/// Version 0 shipped addresses as ASCII, version 1 replaced them with
/// integer fields and version 2 added the AND/OR mode flag.
pub const FILTER_VERSION: u32 = 2;

/// A predicate over capture packets.
pub struct Filter {
    /// Rule id, unique per measurement point.
    pub filter_id: u32,
    pub mode: FilterMode,
    pub(crate) index: u32,

    pub(crate) starttime: Picotime,
    pub(crate) endtime: Picotime,
    pub(crate) mampid: [u8; 8],
    pub(crate) iface: String,
    pub(crate) vlan_tci: u16,
    pub(crate) vlan_tci_mask: u16,
    pub(crate) eth_type: u16,
    pub(crate) eth_type_mask: u16,
    pub(crate) eth_src: EtherAddr,
    pub(crate) eth_src_mask: EtherAddr,
    pub(crate) eth_dst: EtherAddr,
    pub(crate) eth_dst_mask: EtherAddr,
    pub(crate) ip_proto: u8,
    pub(crate) ip_src: Ipv4Addr,
    pub(crate) ip_src_mask: Ipv4Addr,
    pub(crate) ip_dst: Ipv4Addr,
    pub(crate) ip_dst_mask: Ipv4Addr,
    pub(crate) src_port: u16,
    pub(crate) src_port_mask: u16,
    pub(crate) dst_port: u16,
    pub(crate) dst_port_mask: u16,
    pub(crate) port: u16,
    pub(crate) port_mask: u16,

    pub(crate) frame_max_dt: Picotime,
    pub(crate) frame_num: Vec<(i32, i32)>,

    /// Amount of payload to capture; `u32::MAX` keeps everything.
    pub caplen: u32,
    /// Destination consumer when shipped to an MP.
    pub consumer: u32,
    /// Destination stream when shipped to an MP.
    pub dest: Option<StreamAddr>,

    pub(crate) bpf_expr: Option<String>,
    #[cfg(feature = "bpf")]
    pub(crate) bpf_program: Option<pcap::BpfProgram>,

    // matching state
    first: bool,
    frame_counter: i32,
    frame_last_ts: Picotime,
}

impl Default for Filter {
    fn default() -> Filter {
        Filter {
            filter_id: 0,
            mode: FilterMode::And,
            index: 0,
            starttime: Picotime::default(),
            endtime: Picotime::default(),
            mampid: [0; 8],
            iface: String::new(),
            vlan_tci: 0,
            vlan_tci_mask: 0,
            eth_type: 0,
            eth_type_mask: 0,
            eth_src: EtherAddr::default(),
            eth_src_mask: EtherAddr::default(),
            eth_dst: EtherAddr::default(),
            eth_dst_mask: EtherAddr::default(),
            ip_proto: 0,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_src_mask: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            ip_dst_mask: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
            src_port_mask: 0,
            dst_port: 0,
            dst_port_mask: 0,
            port: 0,
            port_mask: 0,
            frame_max_dt: Picotime::default(),
            frame_num: Vec::new(),
            caplen: u32::MAX,
            consumer: 0,
            dest: None,
            bpf_expr: None,
            #[cfg(feature = "bpf")]
            bpf_program: None,
            first: true,
            frame_counter: 0,
            frame_last_ts: Picotime::default(),
        }
    }
}

fn match_eth(desired: &EtherAddr, mask: &EtherAddr, addr: &[u8; 6]) -> bool {
    addr.iter()
        .zip(mask.0.iter())
        .zip(desired.0.iter())
        .all(|((a, m), d)| a & m == *d)
}

/// The historical IP match: `(addr & mask) & target != 0`.  This is not the
/// conventional compare-after-mask; it is kept bit-for-bit for wire
/// compatibility with deployed measurement points.
fn match_ip(desired: Ipv4Addr, mask: Ipv4Addr, addr: Ipv4Addr) -> bool {
    (u32::from(addr) & u32::from(mask)) & u32::from(desired) != 0
}

/// C-string style comparison limited to 8 bytes: the comparison stops at
/// the first NUL or after 8 bytes, whichever comes first.  An id of
/// `"foobarbaz"` therefore matches `"foobarbazspam"`.
fn match_mampid(desired: &[u8; 8], actual: &[u8; 8]) -> bool {
    for i in 0..8 {
        if desired[i] != actual[i] {
            return false;
        }
        if desired[i] == 0 {
            return true;
        }
    }
    true
}

impl Filter {
    pub fn new() -> Filter {
        Filter::default()
    }

    /// Bitmap of active fields.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn starttime_set(&mut self, t: Picotime) {
        self.index |= index::START_TIME;
        self.starttime = t;
    }

    pub fn endtime_set(&mut self, t: Picotime) {
        self.index |= index::END_TIME;
        self.endtime = t;
    }

    pub fn mampid_set(&mut self, mampid: &str) {
        self.index |= index::MAMPID;
        self.mampid = [0; 8];
        let bytes = mampid.as_bytes();
        let n = bytes.len().min(8);
        self.mampid[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn iface_set(&mut self, iface: &str) {
        self.index |= index::IFACE;
        self.iface = iface.chars().take(8).collect();
    }

    pub fn vlan_tci_set(&mut self, tci: u16, mask: u16) {
        self.index |= index::VLAN;
        self.vlan_tci = tci & mask;
        self.vlan_tci_mask = mask;
    }

    pub fn eth_type_set(&mut self, eth_type: u16, mask: u16) {
        self.index |= index::ETH_TYPE;
        self.eth_type = eth_type & mask;
        self.eth_type_mask = mask;
    }

    pub fn eth_src_set(&mut self, addr: EtherAddr, mask: EtherAddr) {
        self.index |= index::ETH_SRC;
        let mut masked = addr;
        for (b, m) in masked.0.iter_mut().zip(mask.0.iter()) {
            *b &= m;
        }
        self.eth_src = masked;
        self.eth_src_mask = mask;
    }

    pub fn eth_dst_set(&mut self, addr: EtherAddr, mask: EtherAddr) {
        self.index |= index::ETH_DST;
        let mut masked = addr;
        for (b, m) in masked.0.iter_mut().zip(mask.0.iter()) {
            *b &= m;
        }
        self.eth_dst = masked;
        self.eth_dst_mask = mask;
    }

    pub fn ip_proto_set(&mut self, proto: u8) {
        self.index |= index::IP_PROTO;
        self.ip_proto = proto;
    }

    pub fn src_ip_set(&mut self, ip: Ipv4Addr, mask: Ipv4Addr) {
        self.index |= index::IP_SRC;
        self.ip_src = Ipv4Addr::from(u32::from(ip) & u32::from(mask));
        self.ip_src_mask = mask;
    }

    pub fn dst_ip_set(&mut self, ip: Ipv4Addr, mask: Ipv4Addr) {
        self.index |= index::IP_DST;
        self.ip_dst = Ipv4Addr::from(u32::from(ip) & u32::from(mask));
        self.ip_dst_mask = mask;
    }

    pub fn src_port_set(&mut self, port: u16, mask: u16) {
        self.index |= index::SRC_PORT;
        self.src_port = port & mask;
        self.src_port_mask = mask;
    }

    pub fn dst_port_set(&mut self, port: u16, mask: u16) {
        self.index |= index::DST_PORT;
        self.dst_port = port & mask;
        self.dst_port_mask = mask;
    }

    /// Match either source or destination port.
    pub fn tp_port_set(&mut self, port: u16, mask: u16) {
        self.index |= index::PORT;
        self.port = port & mask;
        self.port_mask = mask;
    }

    /// Reject packets once the inter-arrival time between matched packets
    /// exceeds `t`.  Since the reference timestamp only advances on match,
    /// no further packets will match after the first rejection.
    pub fn frame_dt_set(&mut self, t: Picotime) {
        self.index |= index::FRAME_MAX_DT;
        self.frame_max_dt = t;
    }

    /// Match packets whose frame number (1-based, counted per filter) falls
    /// in any of the inclusive ranges.
    pub fn frame_num_set(&mut self, ranges: Vec<(i32, i32)>) {
        self.index |= index::FRAME_NUM;
        self.frame_num = ranges;
    }

    pub fn mode_set(&mut self, mode: FilterMode) {
        self.mode = mode;
    }

    /// Attach a BPF expression, evaluated after the regular filter.
    /// Without the `bpf` cargo feature the expression is only stored.
    pub fn bpf_set(&mut self, expr: &str) -> crate::Result<()> {
        #[cfg(feature = "bpf")]
        {
            let cap = pcap::Capture::dead(pcap::Linktype::ETHERNET)
                .map_err(|e| crate::Error::invalid_input(format!("BPF error: {e}")))?;
            let program = cap
                .compile(expr, true)
                .map_err(|e| crate::Error::invalid_input(format!("BPF error: {e}")))?;
            self.bpf_program = Some(program);
        }
        #[cfg(not(feature = "bpf"))]
        tracing::warn!("pcap support has been disabled, bpf filters cannot be used");

        self.bpf_expr = Some(expr.to_owned());
        Ok(())
    }

    pub fn bpf_expr(&self) -> Option<&str> {
        self.bpf_expr.as_deref()
    }

    /// Try to match a packet against the filter.
    ///
    /// An empty filter (no active fields) matches everything.  Field
    /// predicates follow the implication pattern: an inactive field never
    /// influences the result.
    pub fn matches(&mut self, pkt: &CapPacket) -> bool {
        self.frame_counter += 1;

        // fast path
        if self.index == 0 {
            return self.bpf_matches(pkt);
        }

        // progressively parse the packet; every step bails out when the
        // captured bytes run out
        let eth = ether_type(pkt.payload);
        let h_proto = eth.map(|(proto, _, _)| proto);
        let vlan_tci = eth.and_then(|(_, tci, _)| tci);
        let ip = find_ipv4(pkt.payload);
        let tcp = ip.and_then(|ip| find_tcp(pkt.payload, &ip));
        let udp = ip.and_then(|ip| find_udp(pkt.payload, &ip));
        let (sport, dport) = match (tcp, udp) {
            (Some(tcp), _) => (tcp.sport, tcp.dport),
            (_, Some(udp)) => (udp.sport, udp.dport),
            _ => (0, 0),
        };

        let mut result = match self.mode {
            FilterMode::And => true,
            FilterMode::Or => false,
        };
        let mut combine = |active: bool, value: bool| {
            if active {
                match self.mode {
                    FilterMode::And => result = result && value,
                    FilterMode::Or => result = result || value,
                }
            }
        };

        let idx = self.index;
        combine(
            idx & index::IFACE != 0,
            pkt.head.nic().contains(self.iface.as_str()),
        );
        combine(
            idx & index::VLAN != 0,
            vlan_tci.is_some_and(|tci| tci & self.vlan_tci_mask == self.vlan_tci),
        );
        combine(
            idx & index::ETH_TYPE != 0,
            h_proto.is_some_and(|p| p & self.eth_type_mask == self.eth_type),
        );
        combine(
            idx & index::ETH_SRC != 0,
            pkt.payload.len() >= 12
                && match_eth(
                    &self.eth_src,
                    &self.eth_src_mask,
                    pkt.payload[6..12].try_into().unwrap(),
                ),
        );
        combine(
            idx & index::ETH_DST != 0,
            pkt.payload.len() >= 6
                && match_eth(
                    &self.eth_dst,
                    &self.eth_dst_mask,
                    pkt.payload[0..6].try_into().unwrap(),
                ),
        );
        combine(
            idx & index::IP_PROTO != 0,
            ip.is_some_and(|ip| ip.proto == self.ip_proto),
        );
        combine(
            idx & index::IP_SRC != 0,
            ip.is_some_and(|ip| match_ip(self.ip_src, self.ip_src_mask, ip.src)),
        );
        combine(
            idx & index::IP_DST != 0,
            ip.is_some_and(|ip| match_ip(self.ip_dst, self.ip_dst_mask, ip.dst)),
        );
        combine(
            idx & index::SRC_PORT != 0,
            sport & self.src_port_mask == self.src_port,
        );
        combine(
            idx & index::DST_PORT != 0,
            dport & self.dst_port_mask == self.dst_port,
        );
        combine(
            idx & index::PORT != 0,
            sport & self.port_mask == self.port || dport & self.port_mask == self.port,
        );
        combine(
            idx & index::MAMPID != 0,
            match_mampid(&self.mampid, &pkt.head.mampid),
        );
        combine(
            idx & index::START_TIME != 0,
            self.starttime <= pkt.head.ts,
        );
        combine(idx & index::END_TIME != 0, self.endtime >= pkt.head.ts);
        combine(
            idx & index::FRAME_MAX_DT != 0,
            self.first || pkt.head.ts - self.frame_last_ts <= self.frame_max_dt,
        );
        combine(
            idx & index::FRAME_NUM != 0,
            self.frame_num
                .iter()
                .any(|(lo, hi)| (*lo..=*hi).contains(&self.frame_counter)),
        );

        let result = result && self.bpf_matches(pkt);
        if result {
            self.first = false;
            self.frame_last_ts = pkt.head.ts;
        }
        result
    }

    #[cfg(feature = "bpf")]
    fn bpf_matches(&self, pkt: &CapPacket) -> bool {
        match &self.bpf_program {
            Some(program) => program.filter(pkt.payload),
            None => true,
        }
    }

    #[cfg(not(feature = "bpf"))]
    fn bpf_matches(&self, _pkt: &CapPacket) -> bool {
        true
    }

    /// Display a representation of the filter.  With `verbose` inactive
    /// fields are shown as unset.
    pub fn print(&self, w: &mut dyn Write, verbose: bool) -> io::Result<()> {
        writeln!(w, "FILTER {{{:02}}}", self.filter_id)?;
        match &self.dest {
            Some(dest) => writeln!(w, "\tDEST          : {dest}")?,
            None => writeln!(w, "\tDEST          : (unset)")?,
        }
        writeln!(w, "\tCAPLEN        : {}", self.caplen)?;
        writeln!(w, "\tMODE          : {:?}", self.mode)?;
        writeln!(w, "\tindex         : {:#06x}", self.index)?;

        let mut field = |active: bool, name: &str, value: String| -> io::Result<()> {
            if active {
                writeln!(w, "\t{name:<14}: {value}")
            } else if verbose {
                writeln!(w, "\t{name:<14}: (unset)")
            } else {
                Ok(())
            }
        };

        let mampid = String::from_utf8_lossy(&self.mampid).into_owned();
        field(self.index & index::MAMPID != 0, "MAMPid", mampid)?;
        field(self.index & index::IFACE != 0, "CI_ID", self.iface.clone())?;
        field(
            self.index & index::VLAN != 0,
            "VLAN_TCI",
            format!("{} (mask: {:#06x})", self.vlan_tci, self.vlan_tci_mask),
        )?;
        field(
            self.index & index::ETH_TYPE != 0,
            "ETH_TYPE",
            format!("{:#06x} (mask: {:#06x})", self.eth_type, self.eth_type_mask),
        )?;
        field(
            self.index & index::ETH_SRC != 0,
            "ETH_SRC",
            format!("{} (mask: {})", self.eth_src, self.eth_src_mask),
        )?;
        field(
            self.index & index::ETH_DST != 0,
            "ETH_DST",
            format!("{} (mask: {})", self.eth_dst, self.eth_dst_mask),
        )?;
        field(
            self.index & index::IP_PROTO != 0,
            "IP_PROTO",
            self.ip_proto.to_string(),
        )?;
        field(
            self.index & index::IP_SRC != 0,
            "IP_SRC",
            format!("{} (mask: {})", self.ip_src, self.ip_src_mask),
        )?;
        field(
            self.index & index::IP_DST != 0,
            "IP_DST",
            format!("{} (mask: {})", self.ip_dst, self.ip_dst_mask),
        )?;
        field(
            self.index & index::SRC_PORT != 0,
            "PORT_SRC",
            format!("{} (mask: {:#06x})", self.src_port, self.src_port_mask),
        )?;
        field(
            self.index & index::DST_PORT != 0,
            "PORT_DST",
            format!("{} (mask: {:#06x})", self.dst_port, self.dst_port_mask),
        )?;
        field(
            self.index & index::PORT != 0,
            "PORT",
            format!("{} (mask: {:#06x})", self.port, self.port_mask),
        )?;
        field(
            self.index & index::START_TIME != 0,
            "START_TIME",
            self.starttime.to_string(),
        )?;
        field(
            self.index & index::END_TIME != 0,
            "END_TIME",
            self.endtime.to_string(),
        )?;
        field(
            self.index & index::FRAME_MAX_DT != 0,
            "FRAME_MAX_DT",
            self.frame_max_dt.to_string(),
        )?;
        if let Some(expr) = &self.bpf_expr {
            writeln!(w, "\tBPF           : {expr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testutil::{tcp_frame, udp_frame};
    use crate::capture::CapHeader;

    fn packet_of(frame: &[u8]) -> (CapHeader, &[u8]) {
        let head = CapHeader::new(
            "eth0",
            "test",
            Picotime { sec: 10, psec: 0 },
            frame.len() as u32,
            frame.len() as u32,
        );
        (head, frame)
    }

    #[test]
    fn empty_filter_matches_everything() {
        let mut filter = Filter::new();
        let frame = udp_frame(1000, 2000, b"");
        let (head, payload) = packet_of(&frame);
        assert!(filter.matches(&CapPacket::new(head, payload)));
    }

    #[test]
    fn dst_port() {
        let mut filter = Filter::new();
        filter.dst_port_set(53, 0xffff);

        let frame = udp_frame(1234, 53, b"");
        let (head, payload) = packet_of(&frame);
        assert!(filter.matches(&CapPacket::new(head, payload)));

        let frame = udp_frame(1234, 54, b"");
        let (head, payload) = packet_of(&frame);
        assert!(!filter.matches(&CapPacket::new(head, payload)));
    }

    #[test]
    fn port_mask_matches_either_direction() {
        let mut filter = Filter::new();
        filter.tp_port_set(53, 0x00ff);

        // source port low byte matches even though dst is unrelated
        let frame = udp_frame(53, 1234, b"");
        let (head, payload) = packet_of(&frame);
        assert!(filter.matches(&CapPacket::new(head, payload)));

        // 0x0135 & 0x00ff == 53 as well
        let frame = udp_frame(0x0135, 1234, b"");
        let (head, payload) = packet_of(&frame);
        assert!(filter.matches(&CapPacket::new(head, payload)));

        let frame = udp_frame(1234, 4321, b"");
        let (head, payload) = packet_of(&frame);
        assert!(!filter.matches(&CapPacket::new(head, payload)));
    }

    #[test]
    fn setter_masks_value() {
        let mut filter = Filter::new();
        filter.dst_port_set(0x027b, 0x00ff);
        assert_eq!(filter.dst_port, 0x007b);
    }

    #[test]
    fn mampid_prefix() {
        let frame = udp_frame(1, 2, b"");

        let mut filter = Filter::new();
        filter.mampid_set("foo");
        let head = CapHeader::new("eth0", "foo", Picotime::default(), 60, frame.len() as u32);
        assert!(filter.matches(&CapPacket::new(head, &frame)));
        let head = CapHeader::new("eth0", "bar", Picotime::default(), 60, frame.len() as u32);
        assert!(!filter.matches(&CapPacket::new(head, &frame)));

        // only eight bytes are compared
        filter.mampid_set("foobarbaz");
        let head = CapHeader::new("eth0", "foobarbazspam", Picotime::default(), 60, frame.len() as u32);
        assert!(filter.matches(&CapPacket::new(head, &frame)));
    }

    #[test]
    fn iface_substring() {
        let mut filter = Filter::new();
        filter.iface_set("th0");
        let frame = udp_frame(1, 2, b"");
        let (head, payload) = packet_of(&frame);
        assert!(filter.matches(&CapPacket::new(head, payload)));

        filter.iface_set("wlan");
        assert!(!filter.matches(&CapPacket::new(head, payload)));
    }

    #[test]
    fn time_window() {
        let frame = udp_frame(1, 2, b"");
        let head = CapHeader::new(
            "eth0",
            "mp",
            "1.500000000000".parse().unwrap(),
            60,
            frame.len() as u32,
        );
        let pkt = CapPacket::new(head, &frame);

        let mut filter = Filter::new();
        filter.starttime_set("1.5".parse().unwrap());
        assert!(filter.matches(&pkt));
        filter.starttime_set("1.6".parse().unwrap());
        assert!(!filter.matches(&pkt));

        let mut filter = Filter::new();
        filter.endtime_set("1.5".parse().unwrap());
        assert!(filter.matches(&pkt));
        filter.endtime_set("1.4".parse().unwrap());
        assert!(!filter.matches(&pkt));
    }

    #[test]
    fn frame_dt_rejects_after_gap() {
        let frame = udp_frame(1, 2, b"");
        let mut filter = Filter::new();
        filter.frame_dt_set("0.2".parse().unwrap());

        let at = |ts: &str| {
            CapHeader::new("eth0", "mp", ts.parse().unwrap(), 60, frame.len() as u32)
        };

        // first packet always matches and sets the reference
        assert!(filter.matches(&CapPacket::new(at("1.0"), &frame)));
        // within the window
        assert!(filter.matches(&CapPacket::new(at("1.2"), &frame)));
        // gap too large; reference does not advance so later packets
        // cannot match either
        assert!(!filter.matches(&CapPacket::new(at("1.5"), &frame)));
        assert!(!filter.matches(&CapPacket::new(at("1.6"), &frame)));
    }

    #[test]
    fn frame_number_ranges() {
        let frame = udp_frame(1, 2, b"");
        let (head, payload) = packet_of(&frame);
        let mut filter = Filter::new();
        filter.frame_num_set(vec![(2, 3)]);

        let results: Vec<bool> = (0..4)
            .map(|_| filter.matches(&CapPacket::new(head, payload)))
            .collect();
        assert_eq!(results, vec![false, true, true, false]);
    }

    #[test]
    fn ip_match_is_historical() {
        // 10.0.0.2 & 255.255.255.255 & 10.0.0.1 = 10.0.0.0, non-zero in the
        // top octet, so this *matches* even though the host part differs.
        let mut filter = Filter::new();
        filter.src_ip_set(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::BROADCAST);
        let frame = tcp_frame(1, 2, 0, 0, b"");
        let (head, payload) = packet_of(&frame);
        assert!(filter.matches(&CapPacket::new(head, payload)));

        // completely disjoint address does not match
        let mut filter = Filter::new();
        filter.src_ip_set(Ipv4Addr::new(192, 168, 0, 0), Ipv4Addr::BROADCAST);
        assert!(!filter.matches(&CapPacket::new(head, payload)));
    }

    #[test]
    fn and_or_composition() {
        let frame = udp_frame(1000, 53, b"");
        let (head, payload) = packet_of(&frame);
        let pkt = CapPacket::new(head, payload);

        // AND: both must hold
        let mut filter = Filter::new();
        filter.dst_port_set(53, 0xffff);
        filter.ip_proto_set(17);
        assert!(filter.matches(&pkt));
        filter.ip_proto_set(6);
        assert!(!filter.matches(&pkt));

        // OR: either is enough
        let mut filter = Filter::new();
        filter.mode_set(FilterMode::Or);
        filter.dst_port_set(53, 0xffff);
        filter.ip_proto_set(6);
        assert!(filter.matches(&pkt));

        let mut filter = Filter::new();
        filter.mode_set(FilterMode::Or);
        filter.dst_port_set(54, 0xffff);
        filter.ip_proto_set(6);
        assert!(!filter.matches(&pkt));
    }

    #[test]
    fn truncated_packet_fails_closed() {
        let mut filter = Filter::new();
        filter.dst_port_set(53, 0xffff);

        let frame = udp_frame(1234, 53, b"");
        let head = CapHeader::new("eth0", "mp", Picotime::default(), frame.len() as u32, 20);
        // only 20 bytes captured: no transport header to match on
        assert!(!filter.matches(&CapPacket::new(head, &frame[..20])));
    }

    #[test]
    fn print_is_stable() {
        let mut filter = Filter::new();
        filter.dst_port_set(53, 0xffff);
        let mut out = Vec::new();
        filter.print(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("FILTER"));
        assert!(text.contains("PORT_DST"));
    }
}
