use super::ProtocolType;

/// Map an IP payload protocol number to its decoder.
pub(super) fn ipproto_next(proto: u8) -> ProtocolType {
    match proto as i32 {
        libc::IPPROTO_ICMP => ProtocolType::Icmp,
        libc::IPPROTO_IPIP => ProtocolType::Ipv4,
        libc::IPPROTO_IPV6 => ProtocolType::Ipv6,
        libc::IPPROTO_TCP => ProtocolType::Tcp,
        libc::IPPROTO_UDP => ProtocolType::Udp,
        libc::IPPROTO_SCTP => ProtocolType::Sctp,
        _ => ProtocolType::Data,
    }
}
