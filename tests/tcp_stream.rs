//! TCP measurement stream: the reader re-frames a byte stream consisting
//! of a send-header preamble followed by send-header-prefixed frames.

use capstream::{AddrType, CapHeader, Picotime, SendHeader, Stream, StreamAddr};
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

fn test_port(salt: u16) -> u16 {
    30000 + (std::process::id() % 10000) as u16 + salt
}

fn wire_stream(frames: &[&[&[u8]]]) -> Vec<u8> {
    let mut out = Vec::new();
    SendHeader::new(0, 0, 0).put(&mut out); // preamble
    for (i, payloads) in frames.iter().enumerate() {
        SendHeader::new(i as u32 + 1, payloads.len() as u32, 0).put(&mut out);
        for payload in payloads.iter() {
            let head = CapHeader::new(
                "eth0",
                "mp0",
                Picotime::default(),
                payload.len() as u32,
                payload.len() as u32,
            );
            out.extend_from_slice(&head.to_bytes());
            out.extend_from_slice(payload);
        }
    }
    out
}

#[test]
fn reader_reframes_and_reaches_eof() {
    let port = test_port(0);
    let wire = wire_stream(&[&[b"one", b"fourth"], &[b"0123456789"]]);

    let sender = std::thread::spawn(move || {
        // the listener is created by Stream::open; retry until it is up
        let mut sock = loop {
            match TcpStream::connect(("127.0.0.1", port)) {
                Ok(sock) => break sock,
                Err(_) => std::thread::sleep(Duration::from_millis(20)),
            }
        };
        sock.write_all(&wire).unwrap();
        // closing the connection ends the stream
    });

    let text = format!("tcp://127.0.0.1:{port}");
    let addr = StreamAddr::parse(&text, AddrType::Guess, 0).unwrap();
    let mut reader = Stream::open(&addr, None, 0).unwrap();

    let mut payloads: Vec<Vec<u8>> = Vec::new();
    loop {
        match reader.read(None, Some(Duration::from_secs(5))) {
            Ok(Some(pkt)) => payloads.push(pkt.payload.to_vec()),
            Ok(None) => break,
            Err(capstream::Error::Timeout) => continue,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    sender.join().unwrap();

    assert_eq!(
        payloads,
        vec![b"one".to_vec(), b"fourth".to_vec(), b"0123456789".to_vec()]
    );
    assert_eq!(reader.stats().recv, 3);
    assert_eq!(reader.stats().read, 3);
}

#[test]
fn create_is_not_implemented() {
    let addr = StreamAddr::parse("tcp://127.0.0.1:4711", AddrType::Guess, 0).unwrap();
    assert!(matches!(
        Stream::create(&addr, None, "mp", ""),
        Err(capstream::Error::NotImplemented)
    ));
}
