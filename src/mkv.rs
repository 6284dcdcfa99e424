///
/// https://www.matroska.org/technical/elements.html
///
use tracing::{debug, trace};

use crate::ebml::EbmlReader;
use crate::error::{Error, Result};

// Element ID
const ELEMENT_EBML: u64 = 0x1A45DFA3; // EBML header
const ELEMENT_DOCTYPE: u64 = 0x4282; // EBML/DocType
const ELEMENT_DOCTYPEVERSION: u64 = 0x4287; // EBML/DocTypeVersion
const ELEMENT_SEGMENT: u64 = 0x18538067; // Segment
const ELEMENT_SEEKHEAD: u64 = 0x114D9B74; // Meta Seek Information
const ELEMENT_INFO: u64 = 0x1549A966; // Segment Information
const ELEMENT_TIMESTAMPSCALE: u64 = 0x2AD7B1; // Info/TimestampScale
const ELEMENT_MUXINGAPP: u64 = 0x4D80; // Info/MuxingApp
const ELEMENT_WRITINGAPP: u64 = 0x5741; // Info/WritingApp
const ELEMENT_TRACKS: u64 = 0x1654AE6B; // Tracks
const ELEMENT_TRACKENTRY: u64 = 0xAE; // Tracks/TrackEntry
const ELEMENT_TRACKNUMBER: u64 = 0xD7; // Tracks/TrackEntry/TrackNumber
const ELEMENT_TRACKUID: u64 = 0x73C5; // Tracks/TrackEntry/TrackUID
const ELEMENT_TRACKTYPE: u64 = 0x83; // Tracks/TrackEntry/TrackType
const ELEMENT_LANGUAGE: u64 = 0x22B59C; // Tracks/TrackEntry/Language
const ELEMENT_CODECID: u64 = 0x86; // Tracks/TrackEntry/CodecID
const ELEMENT_VIDEO: u64 = 0xE0; // Tracks/TrackEntry/Video
const ELEMENT_PIXELWIDTH: u64 = 0xB0; // Tracks/TrackEntry/Video/PixelWidth
const ELEMENT_PIXELHEIGHT: u64 = 0xBA; // Tracks/TrackEntry/Video/PixelHeight
const ELEMENT_AUDIO: u64 = 0xE1; // Tracks/TrackEntry/Audio
const ELEMENT_CHANNELS: u64 = 0x9F; // Tracks/TrackEntry/Audio/Channels
const ELEMENT_BITDEPTH: u64 = 0x6264; // Tracks/TrackEntry/Audio/BitDepth
const ELEMENT_CLUSTER: u64 = 0x1F43B675; // Cluster
const ELEMENT_TIMESTAMP: u64 = 0xE7; // Cluster/Timestamp
const ELEMENT_SIMPLEBLOCK: u64 = 0xA3; // Cluster/SimpleBlock
const ELEMENT_BLOCKGROUP: u64 = 0xA0; // Cluster/BlockGroup
const ELEMENT_BLOCK: u64 = 0xA1; // Cluster/BlockGroup/Block
const ELEMENT_CUES: u64 = 0x1C53BB6B; // Cueing Data
const ELEMENT_CHAPTERS: u64 = 0x1043A770; // Chapters
const ELEMENT_TAGS: u64 = 0x1254C367; // Tagging
const ELEMENT_ATTACHMENTS: u64 = 0x1941A469; // Attachments

// Codec ID
pub const CODEC_V_VP9: &str = "V_VP9"; // video/VP9

const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000; // [ns]
const DEFAULT_LANGUAGE: &str = "eng";

fn master_name(id: u64) -> &'static str {
    match id {
        ELEMENT_EBML => "EBML",
        ELEMENT_SEGMENT => "Segment",
        ELEMENT_INFO => "Info",
        ELEMENT_TRACKS => "Tracks",
        ELEMENT_TRACKENTRY => "TrackEntry",
        ELEMENT_VIDEO => "Video",
        ELEMENT_AUDIO => "Audio",
        ELEMENT_CLUSTER => "Cluster",
        ELEMENT_BLOCKGROUP => "BlockGroup",
        _ => "master element",
    }
}

/// Segment children; these also terminate an unknown-sized Cluster
fn is_segment_child(id: u64) -> bool {
    matches!(
        id,
        ELEMENT_SEEKHEAD
            | ELEMENT_INFO
            | ELEMENT_TRACKS
            | ELEMENT_CLUSTER
            | ELEMENT_CUES
            | ELEMENT_CHAPTERS
            | ELEMENT_TAGS
            | ELEMENT_ATTACHMENTS
    )
}

///
/// EBML header
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EbmlHeader {
    pub doc_type: String,      // DocType
    pub doc_type_version: u64, // DocTypeVersion
}

///
/// Segment/Info
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub timestamp_scale: u64, // TimestampScale [ns]
    pub muxing_app: String,   // MuxingApp
    pub writing_app: String,  // WritingApp
}

impl Default for SegmentInfo {
    fn default() -> Self {
        SegmentInfo {
            timestamp_scale: DEFAULT_TIMESTAMP_SCALE,
            muxing_app: String::new(),
            writing_app: String::new(),
        }
    }
}

///
/// Tracks/TrackEntry/TrackType
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Video,
    Audio,
    Complex,
    Logo,
    Subtitle,
    Buttons,
    Control,
    Metadata,
    Unknown(u64),
}

impl From<u64> for TrackType {
    fn from(v: u64) -> Self {
        match v {
            1 => TrackType::Video,
            2 => TrackType::Audio,
            3 => TrackType::Complex,
            0x10 => TrackType::Logo,
            0x11 => TrackType::Subtitle,
            0x12 => TrackType::Buttons,
            0x20 => TrackType::Control,
            0x21 => TrackType::Metadata,
            _ => TrackType::Unknown(v),
        }
    }
}

///
/// Tracks/TrackEntry/Video settings
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoTrack {
    pub pixel_width: u64,  // PixelWidth
    pub pixel_height: u64, // PixelHeight
}

///
/// Tracks/TrackEntry/Audio settings
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioTrack {
    pub channels: u64,  // Channels
    pub bit_depth: u64, // BitDepth
}

///
/// Tracks/TrackEntry
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEntry {
    pub track_number: u64,         // TrackNumber
    pub track_uid: u64,            // TrackUID
    pub track_type: TrackType,     // TrackType
    pub language: String,          // Language
    pub codec_id: String,          // CodecID
    pub video: Option<VideoTrack>, // Video
    pub audio: Option<AudioTrack>, // Audio
}

impl Default for TrackEntry {
    fn default() -> Self {
        TrackEntry {
            track_number: 0,
            track_uid: 0,
            track_type: TrackType::Unknown(0),
            language: DEFAULT_LANGUAGE.into(),
            codec_id: String::new(),
            video: None,
            audio: None,
        }
    }
}

///
/// (Simple)Block lacing mode, flags bits 2-1
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lacing {
    None,
    Xiph,
    FixedSize,
    Ebml,
}

impl Lacing {
    fn from_flags(flags: u8) -> Lacing {
        match (flags >> 1) & 0b11 {
            0 => Lacing::None,
            1 => Lacing::Xiph,
            2 => Lacing::FixedSize,
            _ => Lacing::Ebml,
        }
    }
}

///
/// Cluster/(Simple)Block
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub track_number: u64,
    pub timestamp: i16, // relative to Cluster/Timestamp
    pub only_keyframes: bool,
    pub invisible: bool,
    pub discardable: bool,
    pub lacing: Lacing,
    pub frames: Vec<Vec<u8>>,
}

impl Block {
    /// Cluster timestamp plus the block's relative timestamp, in TimestampScale units
    pub fn absolute_timestamp(&self, cluster: &Cluster) -> i64 {
        cluster.timestamp as i64 + self.timestamp as i64
    }
}

///
/// Cluster
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cluster {
    pub timestamp: u64,
    pub blocks: Vec<Block>,
}

///
/// Matroska/WebM document
///
#[derive(Debug, Clone, Default)]
pub struct Matroska {
    header: EbmlHeader,
    segment_info: Option<SegmentInfo>,
    tracks: Vec<TrackEntry>,
    clusters: Vec<Cluster>,
}

impl Matroska {
    fn new(header: EbmlHeader) -> Self {
        Matroska {
            header,
            ..Default::default()
        }
    }

    pub fn header(&self) -> &EbmlHeader {
        &self.header
    }

    pub fn segment_info(&self) -> Option<&SegmentInfo> {
        self.segment_info.as_ref()
    }

    /// tracks in insertion order
    pub fn tracks(&self) -> &[TrackEntry] {
        &self.tracks
    }

    pub fn track(&self, track_number: u64) -> Option<&TrackEntry> {
        self.tracks.iter().find(|t| t.track_number == track_number)
    }

    /// find track with CodecID
    pub fn find_track(&self, codec_id: &str) -> Option<u64> {
        self.tracks
            .iter()
            .find(|t| t.codec_id == codec_id)
            .map(|t| t.track_number)
    }

    /// get Video settings
    pub fn video_setting(&self, track_number: u64) -> Option<&VideoTrack> {
        self.track(track_number).and_then(|t| t.video.as_ref())
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// blocks of one track, in stored order
    pub fn blocks(&self, track_number: u64) -> impl Iterator<Item = (&Cluster, &Block)> + '_ {
        self.clusters.iter().flat_map(move |c| {
            c.blocks
                .iter()
                .filter(move |b| b.track_number == track_number)
                .map(move |b| (c, b))
        })
    }

    // a repeated track number replaces the earlier entry in place
    fn add_track(&mut self, entry: TrackEntry) {
        match self
            .tracks
            .iter_mut()
            .find(|t| t.track_number == entry.track_number)
        {
            Some(slot) => *slot = entry,
            None => self.tracks.push(entry),
        }
    }
}

///
/// Recursive-descent reader over an in-memory Matroska buffer
///
struct MkvReader<'a> {
    r: EbmlReader<'a>,
    ends: Vec<usize>, // end offsets of the open master elements
}

impl<'a> MkvReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        MkvReader {
            r: EbmlReader::new(data),
            ends: Vec::new(),
        }
    }

    fn parent_end(&self) -> usize {
        self.ends
            .last()
            .copied()
            .unwrap_or(self.r.position() + self.r.remaining())
    }

    fn declared_end(&self, size: Option<u64>, context: &'static str) -> Result<Option<usize>> {
        match size {
            Some(size) => {
                if size > self.r.remaining() as u64 {
                    return Err(Error::TruncatedInput {
                        context,
                        offset: self.r.position(),
                    });
                }
                Ok(Some(self.r.position() + size as usize))
            }
            None => Ok(None),
        }
    }

    /// Read a length-prefixed master element and feed each child ID to `callback`
    /// until the declared size is consumed.
    fn read_master<F>(&mut self, master_id: u64, mut callback: F) -> Result<()>
    where
        F: FnMut(&mut Self, u64) -> Result<()>,
    {
        let name = master_name(master_id);
        let size = self.r.read_element_size()?;
        let declared = self.declared_end(size, name)?;
        let unknown_size = declared.is_none();
        let end = declared.unwrap_or_else(|| self.parent_end());
        trace!("{}: {} bytes", name, end - self.r.position());

        let start = self.r.position();
        self.ends.push(end);
        let result = (|| {
            while self.r.position() < end {
                if unknown_size && master_id != ELEMENT_SEGMENT {
                    // an unknown-sized element ends where a sibling of its parent starts
                    let id = self.r.clone().read_element_id()?;
                    if is_segment_child(id) {
                        break;
                    }
                }
                let id = self.r.read_element_id()?;
                trace!("{}: child {:#x}", name, id);
                if let Err(e) = callback(self, id) {
                    debug!("{}: child {:#x}: {}", name, id, e);
                    return Err(e);
                }
            }
            Ok(())
        })();
        self.ends.pop();
        result?;

        if !unknown_size && self.r.position() != end {
            return Err(Error::mismatch(
                name,
                format!("{} octets of children", end - start),
                format!("{} octets", self.r.position() - start),
            ));
        }
        Ok(())
    }

    fn read_element_body_size(&mut self, context: &'static str) -> Result<usize> {
        let size = self
            .r
            .read_element_size()?
            .ok_or_else(|| Error::mismatch(context, "a known element size", "unknown size"))?;
        if size > self.r.remaining() as u64 {
            return Err(Error::TruncatedInput {
                context,
                offset: self.r.position(),
            });
        }
        Ok(size as usize)
    }

    fn read_uint_element(&mut self) -> Result<u64> {
        let len = self.read_element_body_size("unsigned integer element")?;
        self.r.read_uint(len)
    }

    fn read_string_element(&mut self) -> Result<String> {
        let len = self.read_element_body_size("string element")?;
        self.r.read_string(len)
    }

    fn read_unknown_element(&mut self) -> Result<()> {
        let len = self.read_element_body_size("unknown element")?;
        self.r.skip(len)
    }

    fn open(&mut self) -> Result<EbmlHeader> {
        let ebml_id = self.r.read_element_id()?;
        if ebml_id != ELEMENT_EBML {
            return Err(Error::mismatch(
                "EBML header",
                format!("{:#010x}", ELEMENT_EBML),
                format!("{:#010x}", ebml_id),
            ));
        }
        let header = self.read_ebml_header()?;
        debug!("{:?}", header);

        let segment_id = self.r.read_element_id()?;
        if segment_id != ELEMENT_SEGMENT {
            return Err(Error::mismatch(
                "Segment",
                format!("{:#010x}", ELEMENT_SEGMENT),
                format!("{:#010x}", segment_id),
            ));
        }
        Ok(header)
    }

    // EBML header element
    fn read_ebml_header(&mut self) -> Result<EbmlHeader> {
        let mut header = EbmlHeader::default();
        self.read_master(ELEMENT_EBML, |reader, id| {
            match id {
                ELEMENT_DOCTYPE => header.doc_type = reader.read_string_element()?,
                ELEMENT_DOCTYPEVERSION => header.doc_type_version = reader.read_uint_element()?,
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        Ok(header)
    }

    // Segment element
    fn read_segment(&mut self, mkv: &mut Matroska) -> Result<()> {
        self.read_master(ELEMENT_SEGMENT, |reader, id| {
            match id {
                ELEMENT_INFO => {
                    let info = reader.read_info()?;
                    if mkv.segment_info.is_some() {
                        return Err(Error::mismatch(
                            "Segment",
                            "a single Info element",
                            "a second Info element",
                        ));
                    }
                    mkv.segment_info = Some(info);
                }
                ELEMENT_TRACKS => reader.read_tracks(mkv)?,
                ELEMENT_CLUSTER => {
                    let cluster = reader.read_cluster()?;
                    mkv.clusters.push(cluster);
                }
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })
    }

    // Info element
    fn read_info(&mut self) -> Result<SegmentInfo> {
        let mut info = SegmentInfo::default();
        self.read_master(ELEMENT_INFO, |reader, id| {
            match id {
                ELEMENT_TIMESTAMPSCALE => info.timestamp_scale = reader.read_uint_element()?,
                ELEMENT_MUXINGAPP => info.muxing_app = reader.read_string_element()?,
                ELEMENT_WRITINGAPP => info.writing_app = reader.read_string_element()?,
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        debug!("{:?}", info);
        Ok(info)
    }

    // Tracks element
    fn read_tracks(&mut self, mkv: &mut Matroska) -> Result<()> {
        self.read_master(ELEMENT_TRACKS, |reader, id| {
            match id {
                ELEMENT_TRACKENTRY => {
                    let entry = reader.read_trackentry()?;
                    debug!("track#{} codec={:?}", entry.track_number, entry.codec_id);
                    mkv.add_track(entry);
                }
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })
    }

    // TrackEntry element
    fn read_trackentry(&mut self) -> Result<TrackEntry> {
        let mut entry = TrackEntry::default();
        self.read_master(ELEMENT_TRACKENTRY, |reader, id| {
            match id {
                ELEMENT_TRACKNUMBER => entry.track_number = reader.read_uint_element()?,
                ELEMENT_TRACKUID => entry.track_uid = reader.read_uint_element()?,
                ELEMENT_TRACKTYPE => entry.track_type = reader.read_uint_element()?.into(),
                ELEMENT_LANGUAGE => entry.language = reader.read_string_element()?,
                ELEMENT_CODECID => entry.codec_id = reader.read_string_element()?,
                ELEMENT_VIDEO => entry.video = Some(reader.read_videoentry()?),
                ELEMENT_AUDIO => entry.audio = Some(reader.read_audioentry()?),
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        Ok(entry)
    }

    // Video element
    fn read_videoentry(&mut self) -> Result<VideoTrack> {
        let mut video = VideoTrack::default();
        self.read_master(ELEMENT_VIDEO, |reader, id| {
            match id {
                ELEMENT_PIXELWIDTH => video.pixel_width = reader.read_uint_element()?,
                ELEMENT_PIXELHEIGHT => video.pixel_height = reader.read_uint_element()?,
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        Ok(video)
    }

    // Audio element
    fn read_audioentry(&mut self) -> Result<AudioTrack> {
        let mut audio = AudioTrack::default();
        self.read_master(ELEMENT_AUDIO, |reader, id| {
            match id {
                ELEMENT_CHANNELS => audio.channels = reader.read_uint_element()?,
                ELEMENT_BITDEPTH => audio.bit_depth = reader.read_uint_element()?,
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        Ok(audio)
    }

    // Cluster element
    fn read_cluster(&mut self) -> Result<Cluster> {
        let mut cluster = Cluster::default();
        self.read_master(ELEMENT_CLUSTER, |reader, id| {
            match id {
                ELEMENT_SIMPLEBLOCK => cluster.blocks.push(reader.read_block(true)?),
                ELEMENT_BLOCKGROUP => {
                    if let Some(block) = reader.read_blockgroup()? {
                        cluster.blocks.push(block);
                    }
                }
                ELEMENT_TIMESTAMP => cluster.timestamp = reader.read_uint_element()?,
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        Ok(cluster)
    }

    // BlockGroup element
    fn read_blockgroup(&mut self) -> Result<Option<Block>> {
        let mut block = None;
        self.read_master(ELEMENT_BLOCKGROUP, |reader, id| {
            match id {
                ELEMENT_BLOCK => block = Some(reader.read_block(false)?),
                _ => reader.read_unknown_element()?,
            }
            Ok(())
        })?;
        Ok(block)
    }

    // SimpleBlock/Block element
    fn read_block(&mut self, simple: bool) -> Result<Block> {
        let body_len = self.read_element_body_size("Block")?;
        let block_start = self.r.position();

        let (track_number, _) = self.r.read_vint()?;
        let timestamp = self.r.read_i16()?;
        let flags = self.r.read_octet()?;
        let header_len = self.r.position() - block_start;
        if header_len > body_len {
            return Err(Error::mismatch(
                "Block",
                format!("at least {} octets", header_len),
                format!("{} octets", body_len),
            ));
        }
        let payload_len = body_len - header_len;

        let lacing = Lacing::from_flags(flags);
        let sizes = match lacing {
            Lacing::None => vec![payload_len],
            Lacing::FixedSize => self.read_fixed_lace_sizes(payload_len)?,
            Lacing::Ebml => self.read_ebml_lace_sizes(payload_len)?,
            Lacing::Xiph => return Err(Error::UnsupportedFeature("Xiph lacing")),
        };

        let mut frames = Vec::with_capacity(sizes.len());
        for size in sizes {
            frames.push(self.r.read_bytes(size, "Block frame")?.to_vec());
        }
        trace!(
            "Block track={} timestamp={} {:?} frames={}",
            track_number,
            timestamp,
            lacing,
            frames.len()
        );

        Ok(Block {
            track_number,
            timestamp,
            only_keyframes: simple && flags & 0x80 != 0,
            invisible: flags & 0x08 != 0,
            discardable: simple && flags & 0x01 != 0,
            lacing,
            frames,
        })
    }

    fn read_fixed_lace_sizes(&mut self, total: usize) -> Result<Vec<usize>> {
        let frame_count = self.r.read_octet()? as usize + 1;
        let remainder = total
            .checked_sub(1)
            .ok_or_else(|| Error::mismatch("Block lacing", "a frame count octet", "no data"))?;
        if remainder % frame_count != 0 {
            return Err(Error::mismatch(
                "fixed-size lacing",
                format!("a multiple of {} octets", frame_count),
                format!("{} octets", remainder),
            ));
        }
        Ok(vec![remainder / frame_count; frame_count])
    }

    fn read_ebml_lace_sizes(&mut self, total: usize) -> Result<Vec<usize>> {
        let sizes_start = self.r.position();
        let frame_count = self.r.read_octet()? as usize + 1;
        let mut sizes = Vec::with_capacity(frame_count);
        let oversized = |used: u64| {
            Error::mismatch(
                "EBML lacing",
                format!("frame sizes within {} octets", total),
                format!("at least {} octets", used),
            )
        };

        // running sum of the coded sizes, bounded by the block body
        let mut laced: u64 = 0;
        if frame_count > 1 {
            let (first, _) = self.r.read_vint()?;
            let mut size = first as i64;
            for n in 0..frame_count - 1 {
                if n > 0 {
                    let (delta, _) = self.r.read_signed_vint()?;
                    size = size
                        .checked_add(delta)
                        .ok_or_else(|| oversized(laced))?;
                }
                if size < 0 {
                    return Err(Error::mismatch(
                        "EBML lacing",
                        "a non-negative frame size",
                        size,
                    ));
                }
                let overhead = (self.r.position() - sizes_start) as u64;
                laced = laced
                    .checked_add(size as u64)
                    .filter(|&sum| sum.saturating_add(overhead) <= total as u64)
                    .ok_or_else(|| oversized(laced.saturating_add(size as u64)))?;
                sizes.push(size as usize);
            }
        }

        let used = laced + (self.r.position() - sizes_start) as u64;
        let last = (total as u64)
            .checked_sub(used)
            .ok_or_else(|| oversized(used))?;
        sizes.push(last as usize);
        Ok(sizes)
    }
}

///
/// parse a Matroska/WebM document; entries appended before a failure are kept
/// in the returned document alongside the failure
///
pub fn parse_matroska_partial(data: &[u8]) -> Result<(Matroska, Result<()>)> {
    let mut reader = MkvReader::new(data);
    let header = reader.open()?;
    let mut mkv = Matroska::new(header);
    let result = reader.read_segment(&mut mkv);
    Ok((mkv, result))
}

///
/// parse a Matroska/WebM document from memory
///
pub fn parse_matroska(data: &[u8]) -> Result<Matroska> {
    let (mkv, result) = parse_matroska_partial(data)?;
    result.map(|_| mkv)
}
