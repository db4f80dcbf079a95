use super::{HeaderChunk, Protocol};
use std::fmt;

pub(super) static DATA: DataProto = DataProto;
pub(super) static DONE: DoneProto = DoneProto;

/// Remaining payload with no decoder; the walk stops after presenting it.
pub(super) struct DataProto;

impl Protocol for DataProto {
    fn name(&self) -> &'static str {
        "data"
    }

    fn partial_print(&self) -> bool {
        true
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        write!(w, ": data[{}]", header.data().len())
    }
}

/// Terminal marker: no more headers and no more payload.
pub(super) struct DoneProto;

impl Protocol for DoneProto {
    fn name(&self) -> &'static str {
        "done"
    }

    fn partial_print(&self) -> bool {
        true
    }

    fn format(&self, _w: &mut dyn fmt::Write, _header: &HeaderChunk, _flags: u32) -> fmt::Result {
        Ok(())
    }
}
