//
// https://wiki.multimedia.cx/index.php/IVF
//
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub const IVF_HEADER_SIZE: usize = 32;
pub const IVF_FRAME_HEADER_SIZE: usize = 4 + 8;
pub const IVF_SIGNATURE: [u8; 4] = *b"DKIF";
pub const IVF_VERSION: u16 = 0;

///
/// IVF file header
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfHeader {
    pub fcc: [u8; 4], // FourCC
    pub width: u16,   // [pel]
    pub height: u16,  // [pel]
    pub framerate: u32,
    pub timescale: u32,
    pub nframes: u32,
}

///
/// IVF frame
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfFrame {
    pub size: u32, // [byte]
    pub pts: u64,
}

///
/// parse IVF file header
///
pub fn parse_ivf_header(ivf: &[u8]) -> Result<IvfHeader> {
    if ivf.len() < IVF_HEADER_SIZE {
        return Err(Error::TruncatedInput {
            context: "IVF header",
            offset: ivf.len(),
        });
    }
    // signature (4b)
    let sig = &ivf[0..4];
    if sig != IVF_SIGNATURE {
        return Err(Error::mismatch(
            "IVF signature",
            hex::encode_upper(IVF_SIGNATURE),
            hex::encode_upper(sig),
        ));
    }
    // version (2b)
    let ver = LittleEndian::read_u16(&ivf[4..6]);
    if ver != IVF_VERSION {
        return Err(Error::mismatch("IVF version", IVF_VERSION, ver));
    }
    // header length (2b)
    let hdrlen = LittleEndian::read_u16(&ivf[6..8]);
    if hdrlen != IVF_HEADER_SIZE as u16 {
        return Err(Error::mismatch("IVF header length", IVF_HEADER_SIZE, hdrlen));
    }
    // FourCC (4b)
    let mut fcc = [0; 4];
    fcc.copy_from_slice(&ivf[8..12]);

    Ok(IvfHeader {
        fcc,
        width: LittleEndian::read_u16(&ivf[12..14]),     // width (2b)
        height: LittleEndian::read_u16(&ivf[14..16]),    // height (2b)
        framerate: LittleEndian::read_u32(&ivf[16..20]), // framerate (4b)
        timescale: LittleEndian::read_u32(&ivf[20..24]), // timescale (4b)
        nframes: LittleEndian::read_u32(&ivf[24..28]),   // number of frames (4b)
    })
}

///
/// parse IVF frame header
///
pub fn parse_ivf_frame(hdr: &[u8]) -> Result<IvfFrame> {
    if hdr.len() < IVF_FRAME_HEADER_SIZE {
        return Err(Error::TruncatedInput {
            context: "IVF frame header",
            offset: hdr.len(),
        });
    }
    Ok(IvfFrame {
        size: LittleEndian::read_u32(&hdr[0..4]), // frame size (4b)
        pts: LittleEndian::read_u64(&hdr[4..12]), // presentation timestamp (8b)
    })
}

///
/// Frame iterator over the body of an IVF file
///
#[derive(Debug, Clone)]
pub struct IvfFrames<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> IvfFrames<'a> {
    /// `data` is the whole file, header included
    pub fn new(data: &'a [u8]) -> Self {
        IvfFrames {
            data,
            pos: IVF_HEADER_SIZE.min(data.len()),
        }
    }

    fn next_frame(&mut self) -> Result<(IvfFrame, &'a [u8])> {
        let frame = parse_ivf_frame(&self.data[self.pos..])?;
        let start = self.pos + IVF_FRAME_HEADER_SIZE;
        let end = start + frame.size as usize;
        if end > self.data.len() {
            return Err(Error::TruncatedInput {
                context: "IVF frame",
                offset: start,
            });
        }
        self.pos = end;
        Ok((frame, &self.data[start..end]))
    }
}

impl<'a> Iterator for IvfFrames<'a> {
    type Item = Result<(IvfFrame, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let item = self.next_frame();
        if item.is_err() {
            // stop after the first malformed frame
            self.pos = self.data.len();
        }
        Some(item)
    }
}
