//! Capture-file round trips: create a trace, read it back, and load the
//! legacy and extension-header layouts from synthesised byte images.

use capstream::{
    CapHeader, CapPacket, Filter, Picotime, Stream, StreamAddr, FILE_HEADER_SIZE,
};
use std::io::Write;
use tempfile::TempDir;

fn addr_for(dir: &TempDir, name: &str) -> StreamAddr {
    StreamAddr::from_path(dir.path().join(name), 0)
}

#[test]
fn minimal_roundtrip() {
    let dir = TempDir::new().unwrap();
    let addr = addr_for(&dir, "minimal.cap");

    let payload = [0u8; 60];
    let head = CapHeader::new("eth0", "test", Picotime { sec: 1, psec: 2 }, 60, 60);

    let mut writer = Stream::create(&addr, None, "test", "hello").unwrap();
    writer.write_separate(&head, &payload).unwrap();
    writer.close().unwrap();

    let mut reader = Stream::open(&addr, None, 0).unwrap();
    assert!(reader.version() >= capstream::FileVersion { major: 0, minor: 8 });
    assert_eq!(reader.mampid(), "test");
    assert_eq!(reader.comment(), Some("hello"));

    let pkt = reader.read(None, None).unwrap().expect("one packet");
    assert_eq!(pkt.head, head);
    assert_eq!(pkt.payload, &payload);

    assert!(reader.read(None, None).unwrap().is_none(), "eof after one packet");
}

#[test]
fn packets_survive_in_order() {
    let dir = TempDir::new().unwrap();
    let addr = addr_for(&dir, "order.cap");

    let mut writer = Stream::create(&addr, None, "mp", "").unwrap();
    let mut expected = Vec::new();
    for i in 0..25u32 {
        let payload: Vec<u8> = (0..(20 + i)).map(|b| (b ^ i) as u8).collect();
        let head = CapHeader::new(
            "eth0",
            "mp",
            Picotime::new(i, u64::from(i) * 1000),
            payload.len() as u32,
            payload.len() as u32,
        );
        writer.copy(&CapPacket::new(head, &payload)).unwrap();
        expected.push((head, payload));
    }
    writer.close().unwrap();

    let mut reader = Stream::open(&addr, None, 0).unwrap();
    for (head, payload) in &expected {
        let pkt = reader.read(None, None).unwrap().expect("packet");
        assert_eq!(pkt.head, *head);
        assert_eq!(pkt.payload, payload.as_slice());
    }
    assert!(reader.read(None, None).unwrap().is_none());
    assert_eq!(reader.stats().read, 25);
    assert_eq!(reader.stats().matched, 25);
}

#[test]
fn peek_does_not_consume() {
    let dir = TempDir::new().unwrap();
    let addr = addr_for(&dir, "peek.cap");

    let payload = [7u8; 40];
    let head = CapHeader::new("eth0", "mp", Picotime::default(), 40, 40);
    let mut writer = Stream::create(&addr, None, "mp", "").unwrap();
    writer.write_separate(&head, &payload).unwrap();
    writer.close().unwrap();

    let mut reader = Stream::open(&addr, None, 0).unwrap();
    let first = reader.peek(None).unwrap().expect("peeked packet").head;
    let second = reader.peek(None).unwrap().expect("still there").head;
    assert_eq!(first, second);

    let read = reader.read(None, None).unwrap().expect("read packet");
    assert_eq!(read.head, first);
    assert!(reader.read(None, None).unwrap().is_none());
}

#[test]
fn filtered_read_skips_packets() {
    let dir = TempDir::new().unwrap();
    let addr = addr_for(&dir, "filtered.cap");

    // two UDP packets, destination ports 53 and 54
    let make = |dport: u16| {
        let mut frame = vec![
            2, 0, 0, 0, 0, 1, 2, 0, 0, 0, 0, 2, 0x08, 0x00, // ethernet
            0x45, 0, 0, 33, 0, 0, 0, 0, 64, 17, 0, 0, // ipv4 (proto udp)
            192, 168, 0, 1, 192, 168, 0, 2, // addresses
        ];
        frame.extend_from_slice(&1234u16.to_be_bytes());
        frame.extend_from_slice(&dport.to_be_bytes());
        frame.extend_from_slice(&13u16.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(b"hello");
        frame
    };

    let mut writer = Stream::create(&addr, None, "mp", "").unwrap();
    for dport in [53u16, 54, 53] {
        let frame = make(dport);
        let head = CapHeader::new(
            "eth0",
            "mp",
            Picotime::default(),
            frame.len() as u32,
            frame.len() as u32,
        );
        writer.write_separate(&head, &frame).unwrap();
    }
    writer.close().unwrap();

    let mut filter = Filter::new();
    filter.dst_port_set(53, 0xffff);

    let mut reader = Stream::open(&addr, None, 0).unwrap();
    let mut matched = 0;
    while let Some(_pkt) = reader.read(Some(&mut filter), None).unwrap() {
        matched += 1;
    }
    assert_eq!(matched, 2);
    assert_eq!(reader.stats().read, 3);
    assert_eq!(reader.stats().matched, 2);
}

fn write_packet(out: &mut Vec<u8>, payload: &[u8]) {
    let head = CapHeader::new(
        "eth0",
        "old",
        Picotime::default(),
        payload.len() as u32,
        payload.len() as u32,
    );
    out.extend_from_slice(&head.to_bytes());
    out.extend_from_slice(payload);
}

#[test]
fn loads_legacy_v05() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy05.cap");

    // comment_size, version (0,5), mpid[200]
    let mut image = Vec::new();
    image.extend_from_slice(&5u32.to_ne_bytes());
    image.extend_from_slice(&0u32.to_ne_bytes());
    image.extend_from_slice(&5u32.to_ne_bytes());
    let mut mpid = [0u8; 200];
    mpid[..6].copy_from_slice(b"legacy");
    image.extend_from_slice(&mpid);
    assert_eq!(image.len(), 212);
    image.extend_from_slice(b"hello");
    write_packet(&mut image, &[0xab; 30]);

    std::fs::File::create(&path)
        .unwrap()
        .write_all(&image)
        .unwrap();

    let addr = StreamAddr::from_path(&path, 0);
    let mut reader = Stream::open(&addr, None, 0).unwrap();
    assert_eq!(reader.version(), capstream::FileVersion { major: 0, minor: 5 });
    assert_eq!(reader.mampid(), "legacy");
    assert_eq!(reader.comment(), Some("hello"));

    let pkt = reader.read(None, None).unwrap().expect("packet");
    assert_eq!(pkt.payload, &[0xab; 30]);
    assert!(reader.read(None, None).unwrap().is_none());
}

#[test]
fn loads_legacy_v06() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy06.cap");

    // comment_size, version (0,6), header_offset, mpid[200]
    let mut image = Vec::new();
    image.extend_from_slice(&0u32.to_ne_bytes());
    image.extend_from_slice(&0u32.to_ne_bytes());
    image.extend_from_slice(&6u32.to_ne_bytes());
    image.extend_from_slice(&216u32.to_ne_bytes());
    let mut mpid = [0u8; 200];
    mpid[..4].copy_from_slice(b"mp06");
    image.extend_from_slice(&mpid);
    assert_eq!(image.len(), 216);
    write_packet(&mut image, &[0xcd; 20]);

    std::fs::File::create(&path)
        .unwrap()
        .write_all(&image)
        .unwrap();

    let addr = StreamAddr::from_path(&path, 0);
    let mut reader = Stream::open(&addr, None, 0).unwrap();
    assert_eq!(reader.version(), capstream::FileVersion { major: 0, minor: 6 });
    assert_eq!(reader.mampid(), "mp06");

    let pkt = reader.read(None, None).unwrap().expect("packet");
    assert_eq!(pkt.payload, &[0xcd; 20]);
}

#[test]
fn skips_extension_headers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("extensions.cap");

    // fixed header, one padding extension (4 header + 4 data bytes), a
    // terminator, then the comment
    let comment = b"with extensions";
    let header_offset = (FILE_HEADER_SIZE + 8 + 4) as u32;
    let mut header = capstream::FileHeader::new("ext", comment.len() as u32);
    header.header_offset = header_offset;

    let mut image = Vec::new();
    header.write_to(&mut image).unwrap();
    image.extend_from_slice(&1u16.to_ne_bytes()); // padding extension
    image.extend_from_slice(&8u16.to_ne_bytes());
    image.extend_from_slice(&[0u8; 4]);
    image.extend_from_slice(&0u16.to_ne_bytes()); // terminator
    image.extend_from_slice(&0u16.to_ne_bytes());
    image.extend_from_slice(comment);
    write_packet(&mut image, &[0x11; 44]);

    std::fs::File::create(&path)
        .unwrap()
        .write_all(&image)
        .unwrap();

    let addr = StreamAddr::from_path(&path, 0);
    let mut reader = Stream::open(&addr, None, 0).unwrap();
    assert_eq!(reader.comment(), Some("with extensions"));

    let pkt = reader.read(None, None).unwrap().expect("packet");
    assert_eq!(pkt.payload, &[0x11; 44]);
}

#[test]
fn rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.cap");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&[0x42u8; 512])
        .unwrap();

    let addr = StreamAddr::from_path(&path, 0);
    assert!(matches!(
        Stream::open(&addr, None, 0),
        Err(capstream::Error::CapfileInvalid)
    ));
}

#[test]
fn rejects_truncated_comment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.cap");

    let header = capstream::FileHeader::new("mp", 100); // comment never written
    let mut image = Vec::new();
    header.write_to(&mut image).unwrap();
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&image)
        .unwrap();

    let addr = StreamAddr::from_path(&path, 0);
    assert!(matches!(
        Stream::open(&addr, None, 0),
        Err(capstream::Error::CapfileTruncated)
    ));
}

#[test]
fn rejects_future_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.cap");

    let mut header = capstream::FileHeader::new("mp", 0);
    header.version = capstream::FileVersion { major: 9, minor: 0 };
    let mut image = Vec::new();
    header.write_to(&mut image).unwrap();
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&image)
        .unwrap();

    let addr = StreamAddr::from_path(&path, 0);
    assert!(Stream::open(&addr, None, 0).is_err());
}
