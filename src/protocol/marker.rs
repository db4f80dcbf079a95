use super::{HeaderChunk, Protocol};
use crate::marker::Marker;
use std::fmt;

pub(super) static MARKER: MarkerProto = MarkerProto;

/// Decoder for the experiment marker payload (see [`crate::marker`]).
pub(super) struct MarkerProto;

fn flag_str(flags: u8) -> String {
    if flags == 0 {
        return "(not set)".to_owned();
    }
    let mut out = String::from("[");
    if flags & crate::marker::MARKER_TERMINATE != 0 {
        out.push('T');
    }
    out.push(']');
    out
}

impl Protocol for MarkerProto {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn size(&self) -> usize {
        crate::marker::MARKER_SIZE
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        write!(w, ": MARKER")?;
        let Some(marker) = Marker::from_udp_payload(header.data()) else {
            return Ok(());
        };
        write!(
            w,
            " {}[{:#04x}]:{}:{}:{}:{}",
            flag_str(marker.flags),
            marker.flags,
            marker.exp_id,
            marker.run_id,
            marker.key_id,
            marker.seq_num
        )
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let Some(marker) = Marker::from_udp_payload(header.data()) else {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        };
        writeln!(w, "{prefix}version:            {}", marker.version)?;
        writeln!(w, "{prefix}flags:              {} [{:#04x}]", flag_str(marker.flags), marker.flags)?;
        writeln!(w, "{prefix}exp id:             {}", marker.exp_id)?;
        writeln!(w, "{prefix}run id:             {}", marker.run_id)?;
        writeln!(w, "{prefix}key id:             {}", marker.key_id)?;
        writeln!(w, "{prefix}seq nr:             {}", marker.seq_num)?;
        writeln!(w, "{prefix}timestamp:          {}", marker.timestamp)?;
        writeln!(w, "{prefix}comment:            {}", marker.comment())
    }
}
