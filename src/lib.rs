pub mod bitio;
pub mod booldec;
mod compressed;
pub mod ebml;
pub mod error;
pub mod ivf;
pub mod mkv;
pub mod probs;
pub mod vp9;

pub use error::{Error, Result};
pub use mkv::{parse_matroska, parse_matroska_partial, Matroska};
pub use vp9::{FrameOutcome, Vp9Decoder};

pub const FCC_VP90: [u8; 4] = *b"VP90"; // VP9 codec
pub const WEBM_SIGNATURE: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3]; // EBML(Matroska/WebM)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    IVF,       // IVF format
    WebM,      // Matroska/WebM format
    Bitstream, // Raw bitstream
}

/// probe file format
pub fn probe_fileformat(data: &[u8]) -> FileFormat {
    match data.get(0..4) {
        Some(b4) if b4 == ivf::IVF_SIGNATURE => FileFormat::IVF,
        Some(b4) if b4 == WEBM_SIGNATURE => FileFormat::WebM,
        _ => FileFormat::Bitstream,
    }
}
