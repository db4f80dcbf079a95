//! Building filters from command-line arguments.
//!
//! [`from_argv`] consumes the filter options it recognises from the
//! argument vector (leaving everything else in place) so front-ends can run
//! their own option parsing on the remainder.

use super::{Filter, FilterMode};
use crate::address::EtherAddr;
use crate::error::{Error, Result};
use crate::time::Picotime;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::warn;

/// Long options recognised by [`from_argv`].  All take a value, either as
/// `--opt=value` or as the following argument.
const OPTIONS: &[&str] = &[
    "starttime",
    "begin",
    "endtime",
    "end",
    "mampid",
    "mpid",
    "iface",
    "if",
    "eth.vlan",
    "eth.type",
    "eth.src",
    "eth.dst",
    "ip.proto",
    "ip.src",
    "ip.dst",
    "tp.sport",
    "tp.dport",
    "tp.port",
    "frame-max-dt",
    "frame-num",
    "caplen",
    "filter-mode",
    "bpf",
];

/// Usage text describing the filter options.
pub fn usage() -> &'static str {
    concat!(
        "filter options:\n",
        "      --starttime=DATETIME      Discard all packets before starttime.\n",
        "      --endtime=DATETIME        Discard all packets after endtime.\n",
        "      --begin                   Alias for --starttime.\n",
        "      --end                     Alias for --endtime.\n",
        "      --mampid=STRING           Filter on MAMPid.\n",
        "      --mpid=STRING             Alias for --mampid.\n",
        "      --iface=STRING            Filter on network interface on MP.\n",
        "      --if=STRING               Alias for --iface.\n",
        "      --eth.vlan=TCI[/MASK]     Filter on VLAN TCI and mask.\n",
        "      --eth.type=STRING[/MASK]  Filter on carrier protocol (IP, ARP, RARP).\n",
        "      --eth.src=ADDR[/MASK]     Filter on ethernet source.\n",
        "      --eth.dst=ADDR[/MASK]     Filter on ethernet destination.\n",
        "      --ip.proto=STRING         Filter on ip protocol (TCP, UDP, ICMP).\n",
        "      --ip.src=ADDR[/MASK]      Filter on source ip address, dotted decimal.\n",
        "      --ip.dst=ADDR[/MASK]      Filter on destination ip address, dotted decimal.\n",
        "      --tp.sport=PORT[/MASK]    Filter on source portnumber.\n",
        "      --tp.dport=PORT[/MASK]    Filter on destination portnumber.\n",
        "      --tp.port=PORT[/MASK]     Filter on source or destination portnumber (if\n",
        "                                either is a match the packet matches).\n",
        "      --frame-max-dt=TIME       Starts to reject packets after the interarrival\n",
        "                                time is greater than TIME (WRT matched packets).\n",
        "      --frame-num=RANGES        Filter on frame number, e.g. 1-3,7.\n",
        "      --caplen=BYTES            Store BYTES of the captured packet. [default=ALL]\n",
        "      --filter-mode=MODE        Set filter mode to AND or OR. [default=AND]\n",
        "      --bpf=EXPR                In addition to the regular filter also use the\n",
        "                                supplied BPF. Matching takes place after the\n",
        "                                regular filter.\n",
    )
}

/// Parse an integer, accepting an optional `0x` prefix for hexadecimal.
fn parse_int<T: TryFrom<u64>>(s: &str) -> Option<T> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => s.parse().ok()?,
    };
    T::try_from(value).ok()
}

/// Split `VALUE[/MASK]`.
fn split_mask(s: &str) -> (&str, Option<&str>) {
    match s.split_once('/') {
        Some((value, mask)) => (value, Some(mask)),
        None => (s, None),
    }
}

fn parse_port(s: &str) -> Option<(u16, u16)> {
    let (value, mask) = split_mask(s);
    let mask = match mask {
        Some(m) => parse_int::<u16>(m)?,
        None => 0xffff,
    };
    let port: u16 = parse_int(value)?;
    Some((port, mask))
}

/// Parse `IP[/MASK]` where the mask is dotted decimal or a CIDR prefix
/// length.  The mask does not have to be a valid netmask.
fn parse_inet(s: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (value, mask) = split_mask(s);
    let addr = Ipv4Addr::from_str(value).ok()?;
    let mask = match mask {
        None => Ipv4Addr::BROADCAST,
        Some(m) if !m.contains('.') => {
            let bits: u32 = m.parse().ok()?;
            if bits > 32 {
                return None;
            }
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            Ipv4Addr::from(mask)
        }
        Some(m) => Ipv4Addr::from_str(m).ok()?,
    };
    Some((addr, mask))
}

fn parse_eth_addr(s: &str) -> Option<(EtherAddr, EtherAddr)> {
    let (value, mask) = split_mask(s);
    let addr = EtherAddr::from_str(value).ok()?;
    let mask = match mask {
        Some(m) => EtherAddr::from_str(m).ok()?,
        None => EtherAddr::BROADCAST,
    };
    Some((addr, mask))
}

/// Well-known ethertype names (subset of linux/if_ether.h).
fn ethertype_by_name(name: &str) -> Option<u16> {
    let value = match name.to_ascii_uppercase().as_str() {
        "LOOP" => 0x0060,
        "IP" | "IPV4" => 0x0800,
        "ARP" => 0x0806,
        "RARP" => 0x8035,
        "VLAN" | "8021Q" => 0x8100,
        "IPX" => 0x8137,
        "IPV6" => 0x86dd,
        "MPLS" | "MPLS_UC" => 0x8847,
        "MPLS_MC" => 0x8848,
        "PPP_DISC" => 0x8863,
        "PPP_SES" => 0x8864,
        "PAE" => 0x888e,
        "MP" => 0x0810,
        _ => return None,
    };
    Some(value)
}

fn parse_eth_type(s: &str) -> Option<(u16, u16)> {
    let (value, mask) = split_mask(s);
    let mask = match mask {
        Some(m) => parse_int::<u16>(m)?,
        None => 0xffff,
    };
    let eth_type = ethertype_by_name(value).or_else(|| parse_int(value))?;
    Some((eth_type, mask))
}

/// Well-known IP protocol names.
fn ipproto_by_name(name: &str) -> Option<u8> {
    let value = match name.to_ascii_lowercase().as_str() {
        "icmp" => 1,
        "igmp" => 2,
        "ipip" => 4,
        "tcp" => 6,
        "udp" => 17,
        "gre" => 47,
        "esp" => 50,
        "ah" => 51,
        "icmpv6" => 58,
        "ospf" => 89,
        "sctp" => 132,
        _ => return None,
    };
    Some(value)
}

/// Parse frame number ranges: `1-3,7` means frames 1 through 3 and 7.
fn parse_frame_ranges(s: &str) -> Option<Vec<(i32, i32)>> {
    let mut ranges = Vec::new();
    for part in s.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: i32 = lo.trim().parse().ok()?;
                let hi: i32 = hi.trim().parse().ok()?;
                ranges.push((lo, hi));
            }
            None => {
                let n: i32 = part.trim().parse().ok()?;
                ranges.push((n, n));
            }
        }
    }
    Some(ranges)
}

fn apply(filter: &mut Filter, name: &str, value: &str) -> Result<()> {
    match name {
        "starttime" | "begin" => match value.parse::<Picotime>() {
            Ok(t) => filter.starttime_set(t),
            Err(_) => warn!("invalid date passed to --{name}: {value}. Ignoring"),
        },
        "endtime" | "end" => match value.parse::<Picotime>() {
            Ok(t) => filter.endtime_set(t),
            Err(_) => warn!("invalid date passed to --{name}: {value}. Ignoring"),
        },
        "mampid" | "mpid" => filter.mampid_set(value),
        "iface" | "if" => filter.iface_set(value),
        "eth.vlan" => match parse_port(value) {
            Some((tci, mask)) => filter.vlan_tci_set(tci, mask),
            None => warn!("invalid VLAN TCI: {value}. Ignoring"),
        },
        "eth.type" => match parse_eth_type(value) {
            Some((eth_type, mask)) => filter.eth_type_set(eth_type, mask),
            None => warn!("invalid ethernet protocol given to --{name}: {value}. Ignoring"),
        },
        "eth.src" => match parse_eth_addr(value) {
            Some((addr, mask)) => filter.eth_src_set(addr, mask),
            None => warn!("invalid ethernet address passed to --{name}: {value}. Ignoring"),
        },
        "eth.dst" => match parse_eth_addr(value) {
            Some((addr, mask)) => filter.eth_dst_set(addr, mask),
            None => warn!("invalid ethernet address passed to --{name}: {value}. Ignoring"),
        },
        "ip.proto" => match ipproto_by_name(value).or_else(|| parse_int(value)) {
            Some(proto) => filter.ip_proto_set(proto),
            None => warn!("invalid IP protocol: {value}. Ignoring"),
        },
        "ip.src" => match parse_inet(value) {
            Some((addr, mask)) => filter.src_ip_set(addr, mask),
            None => warn!("invalid IP address passed to --{name}: {value}. Ignoring"),
        },
        "ip.dst" => match parse_inet(value) {
            Some((addr, mask)) => filter.dst_ip_set(addr, mask),
            None => warn!("invalid IP address passed to --{name}: {value}. Ignoring"),
        },
        "tp.sport" => match parse_port(value) {
            Some((port, mask)) => filter.src_port_set(port, mask),
            None => warn!("invalid port number passed to --{name}: {value}. Ignoring"),
        },
        "tp.dport" => match parse_port(value) {
            Some((port, mask)) => filter.dst_port_set(port, mask),
            None => warn!("invalid port number passed to --{name}: {value}. Ignoring"),
        },
        "tp.port" => match parse_port(value) {
            Some((port, mask)) => filter.tp_port_set(port, mask),
            None => warn!("invalid port number passed to --{name}: {value}. Ignoring"),
        },
        "frame-max-dt" => match value.parse::<Picotime>() {
            Ok(t) => filter.frame_dt_set(t),
            Err(_) => warn!("invalid time passed to --{name}: {value}. Ignoring"),
        },
        "frame-num" => match parse_frame_ranges(value) {
            Some(ranges) => filter.frame_num_set(ranges),
            None => warn!("invalid frame range passed to --{name}: {value}. Ignoring"),
        },
        "caplen" => match parse_int::<u32>(value) {
            Some(caplen) => filter.caplen = caplen,
            None => warn!("invalid caplen: {value}. Ignoring"),
        },
        "filter-mode" => match value.to_ascii_lowercase().as_str() {
            "and" => filter.mode_set(FilterMode::And),
            "or" => filter.mode_set(FilterMode::Or),
            _ => warn!("invalid filter mode `{value}'. Ignored"),
        },
        "bpf" => filter.bpf_set(value)?,
        _ => unreachable!("unhandled option --{name}"),
    }
    Ok(())
}

/// Build a filter from command-line arguments.
///
/// `args[0]` is the program name and is never touched.  Recognised options
/// are removed from `args`; everything else is left for the caller.  An
/// option with an unparsable value is logged and skipped (its field stays
/// inactive); a recognised option with a missing value is an error.
pub fn from_argv(args: &mut Vec<String>) -> Result<Filter> {
    let mut filter = Filter::new();

    let mut i = 1;
    while i < args.len() {
        let Some(opt) = args[i].strip_prefix("--") else {
            i += 1;
            continue;
        };

        let (name, inline_value) = match opt.split_once('=') {
            Some((name, value)) => (name.to_owned(), Some(value.to_owned())),
            None => (opt.to_owned(), None),
        };

        if !OPTIONS.contains(&name.as_str()) {
            i += 1;
            continue;
        }

        let value = match inline_value {
            Some(value) => {
                args.remove(i);
                value
            }
            None => {
                if i + 1 >= args.len() || args[i + 1].starts_with('-') {
                    args.remove(i);
                    return Err(Error::invalid_input(format!(
                        "option '--{name}' requires an argument"
                    )));
                }
                args.remove(i);
                args.remove(i)
            }
        };

        apply(&mut filter, &name, &value)?;
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::index;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("prog")
            .chain(args.iter().copied())
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn consumes_known_options() {
        let mut args = argv(&["--tp.dport=53", "input.cap", "--verbose"]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(filter.index(), index::DST_PORT);
        assert_eq!(filter.dst_port, 53);
        assert_eq!(args, argv(&["input.cap", "--verbose"]));
    }

    #[test]
    fn separate_value_argument() {
        let mut args = argv(&["--mampid", "test", "rest"]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(&filter.mampid[..5], b"test\0");
        assert_eq!(args, argv(&["rest"]));
    }

    #[test]
    fn missing_value_is_an_error() {
        let mut args = argv(&["--tp.dport"]);
        assert!(from_argv(&mut args).is_err());

        let mut args = argv(&["--tp.dport", "--verbose"]);
        assert!(from_argv(&mut args).is_err());
    }

    #[test]
    fn invalid_value_is_skipped() {
        let mut args = argv(&["--tp.dport=spam"]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(filter.index(), 0);
    }

    #[test]
    fn port_masks() {
        assert_eq!(parse_port("53"), Some((53, 0xffff)));
        assert_eq!(parse_port("53/0x00ff"), Some((53, 0x00ff)));
        assert_eq!(parse_port("0x35/255"), Some((0x35, 255)));
        assert_eq!(parse_port("spam"), None);
    }

    #[test]
    fn inet_masks() {
        let (addr, mask) = parse_inet("10.1.2.3").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(mask, Ipv4Addr::BROADCAST);

        let (_, mask) = parse_inet("10.0.0.0/8").unwrap();
        assert_eq!(mask, Ipv4Addr::new(255, 0, 0, 0));

        let (_, mask) = parse_inet("10.0.0.0/255.255.0.0").unwrap();
        assert_eq!(mask, Ipv4Addr::new(255, 255, 0, 0));

        let (_, mask) = parse_inet("10.0.0.0/0").unwrap();
        assert_eq!(mask, Ipv4Addr::UNSPECIFIED);

        assert!(parse_inet("10.0.0.0/33").is_none());
    }

    #[test]
    fn eth_type_names() {
        assert_eq!(parse_eth_type("IP"), Some((0x0800, 0xffff)));
        assert_eq!(parse_eth_type("arp"), Some((0x0806, 0xffff)));
        assert_eq!(parse_eth_type("0x8100/0xff00"), Some((0x8100, 0xff00)));
        assert_eq!(parse_eth_type("2048"), Some((0x0800, 0xffff)));
        assert!(parse_eth_type("nonsense").is_none());
    }

    #[test]
    fn ip_proto_names() {
        let mut args = argv(&["--ip.proto=udp"]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(filter.ip_proto, 17);

        let mut args = argv(&["--ip.proto=6"]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(filter.ip_proto, 6);
    }

    #[test]
    fn frame_ranges() {
        assert_eq!(parse_frame_ranges("1-3,7"), Some(vec![(1, 3), (7, 7)]));
        assert!(parse_frame_ranges("1-").is_none());
    }

    #[test]
    fn mode_and_caplen() {
        let mut args = argv(&["--filter-mode=or", "--caplen=96"]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(filter.mode, FilterMode::Or);
        assert_eq!(filter.caplen, 96);
    }

    #[test]
    fn multiple_fields() {
        let mut args = argv(&[
            "--eth.vlan=100/0xfff",
            "--ip.src=10.0.0.0/8",
            "--tp.port=53",
        ]);
        let filter = from_argv(&mut args).unwrap();
        assert_eq!(
            filter.index(),
            index::VLAN | index::IP_SRC | index::PORT
        );
        assert_eq!(args.len(), 1);
    }
}
