//! Console capture for the supervised game server.
//!
//! The server's stdout/stderr are read line-by-line into a bounded
//! [`buffer::LogBuffer`]; status pollers snapshot it and the tunnel scanner
//! walks it for playit markers.

pub mod buffer;
