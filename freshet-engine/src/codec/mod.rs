//! Codec parameter-set parsing: just enough bitstream understanding to
//! identify tracks, size pictures and feed packetizers. Codec *internals*
//! (entropy decode, DCT, rate control) live behind the transcode backend
//! traits.

pub mod aac;
pub mod avc;
pub mod errors;
