//! End-to-end UDP measurement stream on localhost: a creating stream sends
//! measurement frames, an open stream reads them back packet by packet.

use capstream::{
    AddrType, CapHeader, Picotime, SendHeader, Stream, StreamAddr, SENDER_FLUSH,
};
use std::time::Duration;

fn test_port(salt: u16) -> u16 {
    // spread test runs over a port range to avoid collisions
    20000 + (std::process::id() % 10000) as u16 + salt
}

fn frame(seq: u32, payload_sizes: &[u32], flags: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    SendHeader::new(seq, payload_sizes.len() as u32, flags).put(&mut buf);
    for (i, caplen) in payload_sizes.iter().enumerate() {
        let head = CapHeader::new("eth0", "mp0", Picotime::new(i as u32, 0), *caplen, *caplen);
        buf.extend_from_slice(&head.to_bytes());
        buf.extend(std::iter::repeat((i + 1) as u8).take(*caplen as usize));
    }
    buf
}

fn stream_pair(port: u16) -> (Stream, Stream) {
    let text = format!("udp://127.0.0.1:{port}");
    let addr = StreamAddr::parse(&text, AddrType::Guess, 0).unwrap();
    let reader = Stream::open(&addr, None, 0).unwrap();
    let writer = Stream::create(&addr, None, "mp0", "").unwrap();
    (reader, writer)
}

#[test]
fn frames_roundtrip() {
    let (mut reader, mut writer) = stream_pair(test_port(0));

    writer.write(&frame(1, &[60, 100], 0)).unwrap();
    writer.write(&frame(2, &[40], SENDER_FLUSH)).unwrap();

    let mut sizes = Vec::new();
    loop {
        match reader.read(None, Some(Duration::from_secs(5))) {
            Ok(Some(pkt)) => {
                assert_eq!(pkt.payload.len(), pkt.head.caplen as usize);
                assert_eq!(pkt.head.mampid(), "mp0");
                sizes.push(pkt.head.caplen);
            }
            Ok(None) => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }

    assert_eq!(sizes, vec![60, 100, 40]);
    assert_eq!(reader.stats().recv, 3);
    assert_eq!(reader.stats().read, 3);
    assert_eq!(reader.stats().matched, 3);
}

#[test]
fn sequence_gap_is_survivable() {
    let (mut reader, mut writer) = stream_pair(test_port(1));

    // seq 10 initialises the tracker, 13 logs a gap of 2 but both frames
    // are delivered
    writer.write(&frame(10, &[30], 0)).unwrap();
    writer.write(&frame(13, &[50], SENDER_FLUSH)).unwrap();

    let mut sizes = Vec::new();
    loop {
        match reader.read(None, Some(Duration::from_secs(5))) {
            Ok(Some(pkt)) => sizes.push(pkt.head.caplen),
            Ok(None) => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    assert_eq!(sizes, vec![30, 50]);
    assert_eq!(reader.stats().recv, 2);
}

#[test]
fn read_times_out_when_idle() {
    let port = test_port(2);
    let text = format!("udp://127.0.0.1:{port}");
    let addr = StreamAddr::parse(&text, AddrType::Guess, 0).unwrap();
    let mut reader = Stream::open(&addr, None, 0).unwrap();

    assert!(matches!(
        reader.read(None, Some(Duration::from_millis(50))),
        Err(capstream::Error::Timeout)
    ));
}

#[test]
fn add_rejects_non_multicast() {
    let port = test_port(3);
    let text = format!("udp://127.0.0.1:{port}");
    let addr = StreamAddr::parse(&text, AddrType::Guess, 0).unwrap();
    let mut reader = Stream::open(&addr, None, 0).unwrap();

    let unicast = StreamAddr::parse("udp://127.0.0.2:4711", AddrType::Guess, 0).unwrap();
    assert!(matches!(
        reader.add(&unicast),
        Err(capstream::Error::InvalidMulticast)
    ));

    // files can never be added as sibling sources
    let file = StreamAddr::from_path("/tmp/nope.cap", 0);
    assert!(matches!(
        reader.add(&file),
        Err(capstream::Error::InvalidProtocol)
    ));
}
