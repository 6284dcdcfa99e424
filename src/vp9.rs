//
// VP9 Bitstream & Decoding Process Specification v0.6
//
use std::fmt;

use tracing::{debug, trace, warn};

use crate::bitio::BitReader;
use crate::booldec::BoolDecoder;
use crate::compressed;
use crate::error::{Error, Result};
use crate::probs::{FrameContexts, SyntaxElementCounter};

pub const REFS_PER_FRAME: usize = 3;
pub const NUM_REF_FRAMES: usize = 8;
pub const MAX_SEGMENTS: usize = 8;
pub const SEG_LVL_MAX: usize = 4;
pub const MAX_REF_LF_DELTAS: usize = 4;
pub const MAX_MODE_LF_DELTAS: usize = 2;
pub const NUM_FRAME_CONTEXTS: usize = 4;

const FRAME_MARKER: u8 = 2;
const SYNC_CODE: [u8; 3] = [0x49, 0x83, 0x42];
const MIN_TILE_WIDTH_B64: u32 = 4;
const MAX_TILE_WIDTH_B64: u32 = 64;
const MI_BLOCK_SIZE: u32 = 8; // 64x64 superblock in 8x8 units

// segmentation_params(): feature_value bit widths and signedness
const SEGMENTATION_FEATURE_BITS: [usize; SEG_LVL_MAX] = [8, 6, 2, 0];
const SEGMENTATION_FEATURE_SIGNED: [bool; SEG_LVL_MAX] = [true, true, false, false];

const LITERAL_TO_TYPE: [InterpolationFilter; 4] = [
    InterpolationFilter::EightTapSmooth,
    InterpolationFilter::EightTap,
    InterpolationFilter::EightTapSharp,
    InterpolationFilter::Bilinear,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    KeyFrame,
    NonKeyFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Unknown,
    Bt601,
    Bt709,
    Smpte170,
    Smpte240,
    Bt2020,
    Reserved,
    Rgb,
}

impl ColorSpace {
    fn from_bits(v: u8) -> ColorSpace {
        match v {
            0 => ColorSpace::Unknown,
            1 => ColorSpace::Bt601,
            2 => ColorSpace::Bt709,
            3 => ColorSpace::Smpte170,
            4 => ColorSpace::Smpte240,
            5 => ColorSpace::Bt2020,
            6 => ColorSpace::Reserved,
            _ => ColorSpace::Rgb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRange {
    Studio,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationFilter {
    EightTapSmooth,
    EightTap,
    EightTapSharp,
    Bilinear,
    Switchable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxMode {
    Only4x4,
    Allow8x8,
    Allow16x16,
    Allow32x32,
    TxModeSelect,
}

impl TxMode {
    pub(crate) fn from_literal(v: u8) -> TxMode {
        match v {
            0 => TxMode::Only4x4,
            1 => TxMode::Allow8x8,
            2 => TxMode::Allow16x16,
            3 => TxMode::Allow32x32,
            _ => TxMode::TxModeSelect,
        }
    }

    /// tx_mode_to_biggest_tx_size[]
    pub fn biggest_tx_size(self) -> usize {
        match self {
            TxMode::Only4x4 => 0,
            TxMode::Allow8x8 => 1,
            TxMode::Allow16x16 => 2,
            TxMode::Allow32x32 | TxMode::TxModeSelect => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    SingleReference,
    CompoundReference,
    ReferenceModeSelect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFrame {
    Intra = 0,
    Last = 1,
    Golden = 2,
    AltRef = 3,
}

///
/// color_config()
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorConfig {
    pub bit_depth: u8,
    pub color_space: ColorSpace, // f(3)
    pub color_range: ColorRange, // f(1)
    pub subsampling_x: bool,     // f(1)
    pub subsampling_y: bool,     // f(1)
}

impl Default for ColorConfig {
    fn default() -> Self {
        ColorConfig {
            bit_depth: 8,
            color_space: ColorSpace::Bt601,
            color_range: ColorRange::Studio,
            subsampling_x: true,
            subsampling_y: true,
        }
    }
}

///
/// loop_filter_params()
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFilterParams {
    pub level: u8,                             // f(6)
    pub sharpness: u8,                         // f(3)
    pub delta_enabled: bool,                   // f(1)
    pub delta_update: bool,                    // f(1)
    pub ref_deltas: [i8; MAX_REF_LF_DELTAS],   // su(6)
    pub mode_deltas: [i8; MAX_MODE_LF_DELTAS], // su(6)
}

impl Default for LoopFilterParams {
    fn default() -> Self {
        LoopFilterParams {
            level: 0,
            sharpness: 0,
            delta_enabled: true,
            delta_update: false,
            ref_deltas: [1, 0, -1, -1],
            mode_deltas: [0, 0],
        }
    }
}

///
/// quantization_params()
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuantizationParams {
    pub base_q_idx: u8,   // f(8)
    pub delta_q_y_dc: i8, // delta_q()
    pub delta_q_uv_dc: i8,
    pub delta_q_uv_ac: i8,
    pub lossless: bool,
}

///
/// segmentation_params()
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationParams {
    pub enabled: bool,             // f(1)
    pub update_map: bool,          // f(1)
    pub temporal_update: bool,     // f(1)
    pub update_data: bool,         // f(1)
    pub abs_or_delta_update: bool, // f(1)
    pub tree_probs: [u8; 7],
    pub pred_probs: [u8; 3],
    pub feature_enabled: [[bool; SEG_LVL_MAX]; MAX_SEGMENTS],
    pub feature_data: [[i16; SEG_LVL_MAX]; MAX_SEGMENTS],
}

impl Default for SegmentationParams {
    fn default() -> Self {
        SegmentationParams {
            enabled: false,
            update_map: false,
            temporal_update: false,
            update_data: false,
            abs_or_delta_update: false,
            tree_probs: [255; 7],
            pred_probs: [255; 3],
            feature_enabled: [[false; SEG_LVL_MAX]; MAX_SEGMENTS],
            feature_data: [[0; SEG_LVL_MAX]; MAX_SEGMENTS],
        }
    }
}

///
/// tile_info()
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileInfo {
    pub cols_log2: u8,
    pub rows_log2: u8,
}

///
/// Frame header state (uncompressed header + compressed header mode info)
///
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub profile: u8,
    pub show_existing_frame: bool,   // f(1)
    pub frame_to_show_map_index: u8, // f(3)
    pub frame_type: FrameType,       // f(1)
    pub show_frame: bool,            // f(1)
    pub error_resilient_mode: bool,  // f(1)
    pub intra_only: bool,            // f(1)
    pub reset_frame_context: u8,     // f(2)
    pub color_config: ColorConfig,
    pub frame_width: u32,  // f(16)+1
    pub frame_height: u32, // f(16)+1
    pub render_width: u32,
    pub render_height: u32,
    pub refresh_frame_flags: u8,                     // f(8)
    pub ref_frame_idx: [u8; REFS_PER_FRAME],         // f(3)
    pub ref_frame_sign_bias: [bool; 4],              // indexed by ReferenceFrame
    pub allow_high_precision_mv: bool,               // f(1)
    pub interpolation_filter: InterpolationFilter,
    pub refresh_frame_context: bool,        // f(1)
    pub frame_parallel_decoding_mode: bool, // f(1)
    pub frame_context_idx: u8,              // f(2)
    pub loop_filter: LoopFilterParams,
    pub quantization: QuantizationParams,
    pub segmentation: SegmentationParams,
    pub tile_info: TileInfo,
    pub header_size_in_bytes: u16, // f(16)
    pub uncompressed_header_size: usize,
    // compressed_header()
    pub tx_mode: TxMode,
    pub reference_mode: ReferenceMode,
    pub comp_fixed_ref: ReferenceFrame,
    pub comp_var_ref: [ReferenceFrame; 2],
    // compute_image_size()
    pub mi_cols: u32,
    pub mi_rows: u32,
    pub sb64_cols: u32,
    pub sb64_rows: u32,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            profile: 0,
            show_existing_frame: false,
            frame_to_show_map_index: 0,
            frame_type: FrameType::KeyFrame,
            show_frame: false,
            error_resilient_mode: false,
            intra_only: false,
            reset_frame_context: 0,
            color_config: ColorConfig::default(),
            frame_width: 0,
            frame_height: 0,
            render_width: 0,
            render_height: 0,
            refresh_frame_flags: 0,
            ref_frame_idx: [0; REFS_PER_FRAME],
            ref_frame_sign_bias: [false; 4],
            allow_high_precision_mv: false,
            interpolation_filter: InterpolationFilter::EightTap,
            refresh_frame_context: false,
            frame_parallel_decoding_mode: false,
            frame_context_idx: 0,
            loop_filter: LoopFilterParams::default(),
            quantization: QuantizationParams::default(),
            segmentation: SegmentationParams::default(),
            tile_info: TileInfo::default(),
            header_size_in_bytes: 0,
            uncompressed_header_size: 0,
            tx_mode: TxMode::Only4x4,
            reference_mode: ReferenceMode::SingleReference,
            comp_fixed_ref: ReferenceFrame::AltRef,
            comp_var_ref: [ReferenceFrame::Last, ReferenceFrame::Golden],
            mi_cols: 0,
            mi_rows: 0,
            sb64_cols: 0,
            sb64_rows: 0,
        }
    }
}

impl FrameHeader {
    /// FrameIsIntra
    #[inline]
    pub fn frame_is_intra(&self) -> bool {
        self.frame_type == FrameType::KeyFrame || self.intra_only
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.show_existing_frame {
            return write!(f, "show_existing_frame idx={}", self.frame_to_show_map_index);
        }
        let frame_type = match (self.frame_type, self.intra_only) {
            (FrameType::KeyFrame, _) => "KEY_FRAME",
            (FrameType::NonKeyFrame, true) => "INTRA_ONLY",
            (FrameType::NonKeyFrame, false) => "INTER_FRAME",
        };
        write!(
            f,
            "{} profile={} {}x{} render={}x{} {}bit show={} q={} lf={} tiles={}x{} ctx={} hdr={}+{}",
            frame_type,
            self.profile,
            self.frame_width,
            self.frame_height,
            self.render_width,
            self.render_height,
            self.color_config.bit_depth,
            self.show_frame as u8,
            self.quantization.base_q_idx,
            self.loop_filter.level,
            1 << self.tile_info.cols_log2,
            1 << self.tile_info.rows_log2,
            self.frame_context_idx,
            self.uncompressed_header_size,
            self.header_size_in_bytes,
        )
    }
}

///
/// Per-tile partition traversal counters
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileStats {
    pub superblocks: u32,
    pub implied_splits: u32,
    /// partitions whose partition symbol decoding is not implemented
    pub unimplemented_partitions: u32,
}

///
/// One tile of a frame: position, mi range and byte range within the frame
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRange {
    pub tile_row: u32,
    pub tile_col: u32,
    pub mi_row_start: u32,
    pub mi_row_end: u32,
    pub mi_col_start: u32,
    pub mi_col_end: u32,
    pub offset: usize,
    pub size: usize,
    pub stats: TileStats,
}

///
/// Result of one parse_frame() call
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    ShowExisting { frame_to_show_map_index: u8 },
    HeaderOnly,
    Tiles(Vec<TileRange>),
}

impl FrameOutcome {
    /// fails when any partition was left undecoded
    pub fn ensure_fully_parsed(&self) -> Result<()> {
        match self {
            FrameOutcome::Tiles(tiles)
                if tiles.iter().any(|t| t.stats.unimplemented_partitions > 0) =>
            {
                Err(Error::NotImplemented("partition symbol decoding"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingFrame,
    ParsingUncompressedHeader,
    ParsingCompressedHeader,
    DecodingTiles,
    Done,
}

///
/// VP9 frame header decoder
///
#[derive(Debug)]
pub struct Vp9Decoder {
    state: DecoderState,
    header: FrameHeader,
    probs: FrameContexts,
    counter: SyntaxElementCounter,
    ref_frame_sizes: [(u32, u32); NUM_REF_FRAMES],
    prev_segment_ids: Vec<u8>,
}

impl Default for Vp9Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Vp9Decoder {
    pub fn new() -> Self {
        Vp9Decoder {
            state: DecoderState::AwaitingFrame,
            header: FrameHeader::default(),
            probs: FrameContexts::new(),
            counter: SyntaxElementCounter::new(),
            ref_frame_sizes: [(0, 0); NUM_REF_FRAMES],
            prev_segment_ids: Vec::new(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn probabilities(&self) -> &FrameContexts {
        &self.probs
    }

    pub fn counter(&self) -> &SyntaxElementCounter {
        &self.counter
    }

    /// (width, height) recorded for reference slot `idx`
    pub fn ref_frame_size(&self, idx: usize) -> Option<(u32, u32)> {
        self.ref_frame_sizes.get(idx).copied()
    }

    pub fn prev_segment_ids(&self) -> &[u8] {
        &self.prev_segment_ids
    }

    pub fn frame_width(&self) -> u32 {
        self.header.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.header.frame_height
    }

    pub fn render_width(&self) -> u32 {
        self.header.render_width
    }

    pub fn render_height(&self) -> u32 {
        self.header.render_height
    }

    pub fn bit_depth(&self) -> u8 {
        self.header.color_config.bit_depth
    }

    pub fn color_space(&self) -> ColorSpace {
        self.header.color_config.color_space
    }

    /// (subsampling_x, subsampling_y)
    pub fn subsampling(&self) -> (bool, bool) {
        (
            self.header.color_config.subsampling_x,
            self.header.color_config.subsampling_y,
        )
    }

    pub fn interpolation_filter(&self) -> InterpolationFilter {
        self.header.interpolation_filter
    }

    pub fn lossless(&self) -> bool {
        self.header.quantization.lossless
    }

    pub fn tx_mode(&self) -> TxMode {
        self.header.tx_mode
    }

    pub fn reference_mode(&self) -> ReferenceMode {
        self.header.reference_mode
    }

    pub fn mi_cols(&self) -> u32 {
        self.header.mi_cols
    }

    pub fn mi_rows(&self) -> u32 {
        self.header.mi_rows
    }

    pub fn sb64_cols(&self) -> u32 {
        self.header.sb64_cols
    }

    pub fn sb64_rows(&self) -> u32 {
        self.header.sb64_rows
    }

    pub fn tile_cols_log2(&self) -> u8 {
        self.header.tile_info.cols_log2
    }

    pub fn tile_rows_log2(&self) -> u8 {
        self.header.tile_info.rows_log2
    }

    ///
    /// parse one VP9 frame
    ///
    pub fn parse_frame(&mut self, data: &[u8]) -> Result<FrameOutcome> {
        self.state = DecoderState::ParsingUncompressedHeader;
        let mut br = BitReader::new(data);

        self.uncompressed_header(&mut br)?;
        if self.header.show_existing_frame {
            debug!("{}", self.header);
            self.state = DecoderState::Done;
            return Ok(FrameOutcome::ShowExisting {
                frame_to_show_map_index: self.header.frame_to_show_map_index,
            });
        }
        trailing_bits(&mut br)?;
        self.header.uncompressed_header_size = br.byte_position();
        debug!("{}", self.header);

        if self.header.header_size_in_bytes == 0 {
            self.refresh_ref_frames();
            self.state = DecoderState::Done;
            return Ok(FrameOutcome::HeaderOnly);
        }

        self.state = DecoderState::ParsingCompressedHeader;
        let ctx = self.header.frame_context_idx as usize;
        self.probs.load_probs(ctx);
        self.probs.load_probs2(ctx);
        self.counter.clear_counts();
        compressed::parse_compressed_header(
            &mut br,
            self.header.header_size_in_bytes as usize,
            &mut self.header,
            self.probs.current_mut(),
        )?;
        trace!(
            "compressed header: tx_mode={:?} reference_mode={:?}",
            self.header.tx_mode,
            self.header.reference_mode
        );

        self.state = DecoderState::DecodingTiles;
        let tiles = self.decode_tiles(&mut br, data)?;

        // backward adaptation is not performed; the forward-updated tables are kept
        if self.header.refresh_frame_context {
            self.probs.save_probs(ctx);
        }
        self.refresh_ref_frames();
        self.state = DecoderState::Done;
        Ok(FrameOutcome::Tiles(tiles))
    }

    fn refresh_ref_frames(&mut self) {
        let size = (self.header.frame_width, self.header.frame_height);
        for (i, slot) in self.ref_frame_sizes.iter_mut().enumerate() {
            if self.header.refresh_frame_flags & (1 << i) != 0 {
                *slot = size;
            }
        }
    }

    // uncompressed_header()
    fn uncompressed_header(&mut self, br: &mut BitReader) -> Result<()> {
        let frame_marker: u8 = br.read_bits(2)?; // f(2)
        if frame_marker != FRAME_MARKER {
            return Err(Error::mismatch("frame marker", FRAME_MARKER, frame_marker));
        }
        let profile_low_bit: u8 = br.read_bits(1)?;
        let profile_high_bit: u8 = br.read_bits(1)?;
        let hdr = &mut self.header;
        hdr.profile = (profile_high_bit << 1) + profile_low_bit;
        if hdr.profile == 3 && br.read_bit()? {
            return Err(Error::ConstraintViolation("reserved_zero bit after profile 3"));
        }

        hdr.show_existing_frame = br.read_bit()?; // f(1)
        if hdr.show_existing_frame {
            hdr.frame_to_show_map_index = br.read_bits(3)?; // f(3)
            hdr.header_size_in_bytes = 0;
            hdr.refresh_frame_flags = 0;
            hdr.loop_filter.level = 0;
            return Ok(());
        }

        hdr.frame_type = if br.read_bit()? {
            FrameType::NonKeyFrame
        } else {
            FrameType::KeyFrame
        };
        hdr.show_frame = br.read_bit()?; // f(1)
        hdr.error_resilient_mode = br.read_bit()?; // f(1)

        if hdr.frame_type == FrameType::KeyFrame {
            frame_sync_code(br)?;
            self.color_config(br)?;
            self.frame_size(br)?;
            self.render_size(br)?;
            self.header.intra_only = false;
            self.header.refresh_frame_flags = 0xFF;
        } else {
            hdr.intra_only = if hdr.show_frame {
                false
            } else {
                br.read_bit()? // f(1)
            };
            hdr.reset_frame_context = if hdr.error_resilient_mode {
                0
            } else {
                br.read_bits(2)? // f(2)
            };
            if hdr.intra_only {
                frame_sync_code(br)?;
                if self.header.profile > 0 {
                    self.color_config(br)?;
                } else {
                    self.header.color_config = ColorConfig::default();
                }
                self.header.refresh_frame_flags = br.read_bits(8)?; // f(8)
                self.frame_size(br)?;
                self.render_size(br)?;
            } else {
                hdr.refresh_frame_flags = br.read_bits(8)?; // f(8)
                for i in 0..REFS_PER_FRAME {
                    hdr.ref_frame_idx[i] = br.read_bits(3)?; // f(3)
                    hdr.ref_frame_sign_bias[ReferenceFrame::Last as usize + i] = br.read_bit()?;
                }
                self.frame_size_with_refs(br)?;
                self.header.allow_high_precision_mv = br.read_bit()?; // f(1)
                self.header.interpolation_filter = read_interpolation_filter(br)?;
            }
        }

        let hdr = &mut self.header;
        if !hdr.error_resilient_mode {
            hdr.refresh_frame_context = br.read_bit()?; // f(1)
            hdr.frame_parallel_decoding_mode = br.read_bit()?; // f(1)
        } else {
            hdr.refresh_frame_context = false;
            hdr.frame_parallel_decoding_mode = true;
        }
        hdr.frame_context_idx = br.read_bits(2)?; // f(2)

        if hdr.frame_is_intra() || hdr.error_resilient_mode {
            self.setup_past_independence();
            let hdr = &self.header;
            if hdr.frame_type == FrameType::KeyFrame
                || hdr.error_resilient_mode
                || hdr.reset_frame_context == 3
            {
                for i in 0..NUM_FRAME_CONTEXTS {
                    self.probs.save_probs(i);
                }
            } else if hdr.reset_frame_context == 2 {
                self.probs.save_probs(hdr.frame_context_idx as usize);
            }
            self.header.frame_context_idx = 0;
        }

        self.loop_filter_params(br)?;
        self.quantization_params(br)?;
        self.segmentation_params(br)?;
        self.tile_info(br)?;

        self.header.header_size_in_bytes = br.read_bits(16)?; // f(16)
        Ok(())
    }

    // color_config()
    fn color_config(&mut self, br: &mut BitReader) -> Result<()> {
        let profile = self.header.profile;
        let cc = &mut self.header.color_config;
        cc.bit_depth = if profile >= 2 {
            if br.read_bit()? {
                12
            } else {
                10
            }
        } else {
            8
        };
        cc.color_space = ColorSpace::from_bits(br.read_bits(3)?); // f(3)
        if cc.color_space != ColorSpace::Rgb {
            cc.color_range = if br.read_bit()? {
                ColorRange::Full
            } else {
                ColorRange::Studio
            };
            if profile == 1 || profile == 3 {
                cc.subsampling_x = br.read_bit()?; // f(1)
                cc.subsampling_y = br.read_bit()?; // f(1)
                if br.read_bit()? {
                    return Err(Error::ConstraintViolation("reserved_zero bit in color_config"));
                }
            } else {
                cc.subsampling_x = true;
                cc.subsampling_y = true;
            }
        } else {
            cc.color_range = ColorRange::Full;
            if profile == 1 || profile == 3 {
                cc.subsampling_x = false;
                cc.subsampling_y = false;
                if br.read_bit()? {
                    return Err(Error::ConstraintViolation("reserved_zero bit in color_config"));
                }
            } else {
                warn!("RGB color space is not allowed in profile {}", profile);
            }
        }
        Ok(())
    }

    // frame_size()
    fn frame_size(&mut self, br: &mut BitReader) -> Result<()> {
        self.header.frame_width = br.read_bits::<u32>(16)? + 1;
        self.header.frame_height = br.read_bits::<u32>(16)? + 1;
        self.compute_image_size();
        Ok(())
    }

    // render_size()
    fn render_size(&mut self, br: &mut BitReader) -> Result<()> {
        let hdr = &mut self.header;
        if br.read_bit()? {
            hdr.render_width = br.read_bits::<u32>(16)? + 1;
            hdr.render_height = br.read_bits::<u32>(16)? + 1;
        } else {
            hdr.render_width = hdr.frame_width;
            hdr.render_height = hdr.frame_height;
        }
        Ok(())
    }

    // frame_size_with_refs()
    fn frame_size_with_refs(&mut self, br: &mut BitReader) -> Result<()> {
        let mut found_ref = false;
        for i in 0..REFS_PER_FRAME {
            if br.read_bit()? {
                let (width, height) = self.ref_frame_sizes[self.header.ref_frame_idx[i] as usize];
                if width == 0 || height == 0 {
                    return Err(Error::ConstraintViolation(
                        "frame size refers to an empty reference slot",
                    ));
                }
                self.header.frame_width = width;
                self.header.frame_height = height;
                found_ref = true;
                break;
            }
        }
        if found_ref {
            self.compute_image_size();
        } else {
            self.frame_size(br)?;
        }
        self.render_size(br)
    }

    // compute_image_size()
    fn compute_image_size(&mut self) {
        let hdr = &mut self.header;
        hdr.mi_cols = (hdr.frame_width + 7) >> 3;
        hdr.mi_rows = (hdr.frame_height + 7) >> 3;
        hdr.sb64_cols = (hdr.mi_cols + 7) >> 3;
        hdr.sb64_rows = (hdr.mi_rows + 7) >> 3;
        let mi_count = (hdr.mi_cols * hdr.mi_rows) as usize;
        if self.prev_segment_ids.len() != mi_count {
            self.prev_segment_ids = vec![0; mi_count];
        }
    }

    // setup_past_independence()
    fn setup_past_independence(&mut self) {
        let hdr = &mut self.header;
        hdr.segmentation.feature_enabled = [[false; SEG_LVL_MAX]; MAX_SEGMENTS];
        hdr.segmentation.feature_data = [[0; SEG_LVL_MAX]; MAX_SEGMENTS];
        hdr.segmentation.abs_or_delta_update = false;
        hdr.loop_filter.delta_enabled = true;
        hdr.loop_filter.ref_deltas = [1, 0, -1, -1];
        hdr.loop_filter.mode_deltas = [0, 0];
        for id in self.prev_segment_ids.iter_mut() {
            *id = 0;
        }
        self.probs.reset_probs();
    }

    // loop_filter_params()
    fn loop_filter_params(&mut self, br: &mut BitReader) -> Result<()> {
        let lf = &mut self.header.loop_filter;
        lf.level = br.read_bits(6)?; // f(6)
        lf.sharpness = br.read_bits(3)?; // f(3)
        lf.delta_enabled = br.read_bit()?; // f(1)
        lf.delta_update = false;
        if lf.delta_enabled {
            lf.delta_update = br.read_bit()?; // f(1)
            if lf.delta_update {
                for delta in lf.ref_deltas.iter_mut() {
                    if br.read_bit()? {
                        *delta = br.read_signed(6)? as i8; // su(6)
                    }
                }
                for delta in lf.mode_deltas.iter_mut() {
                    if br.read_bit()? {
                        *delta = br.read_signed(6)? as i8; // su(6)
                    }
                }
            }
        }
        Ok(())
    }

    // quantization_params()
    fn quantization_params(&mut self, br: &mut BitReader) -> Result<()> {
        let q = &mut self.header.quantization;
        q.base_q_idx = br.read_bits(8)?; // f(8)
        q.delta_q_y_dc = read_delta_q(br)?;
        q.delta_q_uv_dc = read_delta_q(br)?;
        q.delta_q_uv_ac = read_delta_q(br)?;
        q.lossless = q.base_q_idx == 0
            && q.delta_q_y_dc == 0
            && q.delta_q_uv_dc == 0
            && q.delta_q_uv_ac == 0;
        Ok(())
    }

    // segmentation_params()
    fn segmentation_params(&mut self, br: &mut BitReader) -> Result<()> {
        let seg = &mut self.header.segmentation;
        seg.enabled = br.read_bit()?; // f(1)
        seg.update_map = false;
        seg.temporal_update = false;
        seg.update_data = false;
        if !seg.enabled {
            return Ok(());
        }

        seg.update_map = br.read_bit()?; // f(1)
        if seg.update_map {
            for prob in seg.tree_probs.iter_mut() {
                *prob = read_prob(br)?;
            }
            seg.temporal_update = br.read_bit()?; // f(1)
            for prob in seg.pred_probs.iter_mut() {
                *prob = if seg.temporal_update {
                    read_prob(br)?
                } else {
                    255
                };
            }
        }

        seg.update_data = br.read_bit()?; // f(1)
        if seg.update_data {
            seg.abs_or_delta_update = br.read_bit()?; // f(1)
            for i in 0..MAX_SEGMENTS {
                for j in 0..SEG_LVL_MAX {
                    let mut value = 0;
                    let enabled = br.read_bit()?; // f(1)
                    seg.feature_enabled[i][j] = enabled;
                    if enabled {
                        value = br.read_bits::<u32>(SEGMENTATION_FEATURE_BITS[j])? as i16;
                        if SEGMENTATION_FEATURE_SIGNED[j] && br.read_bit()? {
                            value = -value;
                        }
                    }
                    seg.feature_data[i][j] = value;
                }
            }
        }
        Ok(())
    }

    // tile_info()
    fn tile_info(&mut self, br: &mut BitReader) -> Result<()> {
        let sb64_cols = self.header.sb64_cols;
        let min_log2 = calc_min_log2_tile_cols(sb64_cols);
        let max_log2 = calc_max_log2_tile_cols(sb64_cols);
        let ti = &mut self.header.tile_info;
        ti.cols_log2 = min_log2;
        while ti.cols_log2 < max_log2 {
            if br.read_bit()? {
                ti.cols_log2 += 1; // increment_tile_cols_log2
            } else {
                break;
            }
        }
        ti.rows_log2 = br.read_bits(1)?;
        if ti.rows_log2 > 0 {
            ti.rows_log2 += br.read_bits::<u8>(1)?; // increment_tile_rows_log2
        }
        Ok(())
    }

    // decode_tiles()
    fn decode_tiles(&self, br: &mut BitReader, data: &[u8]) -> Result<Vec<TileRange>> {
        let hdr = &self.header;
        let tile_cols = 1u32 << hdr.tile_info.cols_log2;
        let tile_rows = 1u32 << hdr.tile_info.rows_log2;
        let mut tiles = Vec::with_capacity((tile_cols * tile_rows) as usize);

        for tile_row in 0..tile_rows {
            for tile_col in 0..tile_cols {
                let last_tile = tile_row == tile_rows - 1 && tile_col == tile_cols - 1;
                let tile_size = if last_tile {
                    br.bytes_remaining()
                } else {
                    br.read_u32()? as usize // f(32)
                };
                let offset = br.byte_position();
                if tile_size > br.bytes_remaining() {
                    return Err(Error::TruncatedInput {
                        context: "tile",
                        offset,
                    });
                }

                let mut tile = TileRange {
                    tile_row,
                    tile_col,
                    mi_row_start: get_tile_offset(tile_row, hdr.mi_rows, hdr.tile_info.rows_log2),
                    mi_row_end: get_tile_offset(tile_row + 1, hdr.mi_rows, hdr.tile_info.rows_log2),
                    mi_col_start: get_tile_offset(tile_col, hdr.mi_cols, hdr.tile_info.cols_log2),
                    mi_col_end: get_tile_offset(tile_col + 1, hdr.mi_cols, hdr.tile_info.cols_log2),
                    offset,
                    size: tile_size,
                    stats: TileStats::default(),
                };
                decode_tile(&data[offset..offset + tile_size], hdr, &mut tile)?;
                trace!("tile {:?}", tile);
                br.skip_bytes(tile_size)?;
                tiles.push(tile);
            }
        }
        Ok(tiles)
    }
}

///
/// split a superframe into its frames; a plain frame yields itself
///
pub fn split_superframe(data: &[u8]) -> Result<Vec<&[u8]>> {
    let marker = match data.last() {
        Some(&b) if b & 0xE0 == 0xC0 => b,
        _ => return Ok(vec![data]),
    };
    let frames = (marker & 0x07) as usize + 1;
    let mag = ((marker >> 3) & 0x03) as usize + 1;
    let index_size = 2 + mag * frames;
    if data.len() < index_size || data[data.len() - index_size] != marker {
        return Ok(vec![data]);
    }

    let index = &data[data.len() - index_size + 1..data.len() - 1];
    let payload_len = data.len() - index_size;
    let mut result = Vec::with_capacity(frames);
    let mut offset = 0;
    for entry in index.chunks(mag) {
        let size = entry
            .iter()
            .rev()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        if offset + size > payload_len {
            return Err(Error::TruncatedInput {
                context: "superframe",
                offset,
            });
        }
        result.push(&data[offset..offset + size]);
        offset += size;
    }
    Ok(result)
}

// frame_sync_code()
fn frame_sync_code(br: &mut BitReader) -> Result<()> {
    let mut code = [0u8; 3];
    for byte in code.iter_mut() {
        *byte = br.read_bits(8)?; // f(8)
    }
    if code != SYNC_CODE {
        return Err(Error::mismatch(
            "frame sync code",
            hex::encode_upper(SYNC_CODE),
            hex::encode_upper(code),
        ));
    }
    Ok(())
}

// read_interpolation_filter()
fn read_interpolation_filter(br: &mut BitReader) -> Result<InterpolationFilter> {
    if br.read_bit()? {
        return Ok(InterpolationFilter::Switchable);
    }
    let raw: usize = br.read_bits(2)?; // f(2)
    Ok(LITERAL_TO_TYPE[raw])
}

// read_delta_q()
fn read_delta_q(br: &mut BitReader) -> Result<i8> {
    if br.read_bit()? {
        Ok(br.read_signed(4)? as i8) // su(4)
    } else {
        Ok(0)
    }
}

// read_prob()
fn read_prob(br: &mut BitReader) -> Result<u8> {
    if br.read_bit()? {
        br.read_bits(8)
    } else {
        Ok(255)
    }
}

// trailing_bits()
fn trailing_bits(br: &mut BitReader) -> Result<()> {
    while !br.is_aligned() {
        if br.read_bit()? {
            return Err(Error::ConstraintViolation("trailing bits are not zero"));
        }
    }
    Ok(())
}

// calc_min_log2_tile_cols()
fn calc_min_log2_tile_cols(sb64_cols: u32) -> u8 {
    let mut min_log2 = 0;
    while (MAX_TILE_WIDTH_B64 << min_log2) < sb64_cols {
        min_log2 += 1;
    }
    min_log2
}

// calc_max_log2_tile_cols()
fn calc_max_log2_tile_cols(sb64_cols: u32) -> u8 {
    let mut max_log2 = 1;
    while (sb64_cols >> max_log2) >= MIN_TILE_WIDTH_B64 {
        max_log2 += 1;
    }
    max_log2 - 1
}

// get_tile_offset()
fn get_tile_offset(tile_num: u32, mis: u32, tile_size_log2: u8) -> u32 {
    let sbs = (mis + 7) >> 3;
    let offset = ((tile_num * sbs) >> tile_size_log2) << 3;
    offset.min(mis)
}

// decode_tile()
fn decode_tile(tile_data: &[u8], hdr: &FrameHeader, tile: &mut TileRange) -> Result<()> {
    let mut tbr = BitReader::new(tile_data);
    let _bd = BoolDecoder::new(&mut tbr, tile_data.len())?;

    let mut walker = PartitionWalker {
        mi_rows: hdr.mi_rows,
        mi_cols: hdr.mi_cols,
        stats: TileStats::default(),
    };
    for mi_row in (tile.mi_row_start..tile.mi_row_end).step_by(MI_BLOCK_SIZE as usize) {
        for mi_col in (tile.mi_col_start..tile.mi_col_end).step_by(MI_BLOCK_SIZE as usize) {
            walker.stats.superblocks += 1;
            walker.decode_partition(mi_row, mi_col, MI_BLOCK_SIZE);
        }
    }
    tile.stats = walker.stats;
    Ok(())
}

struct PartitionWalker {
    mi_rows: u32,
    mi_cols: u32,
    stats: TileStats,
}

impl PartitionWalker {
    // decode_partition(); num8x8 is the block width in 8x8 units
    fn decode_partition(&mut self, mi_row: u32, mi_col: u32, num8x8: u32) {
        if mi_row >= self.mi_rows || mi_col >= self.mi_cols {
            return;
        }
        // an 8x8 block has half == 0 and always codes its partition (into 4x4)
        let half = num8x8 >> 1;
        let has_rows = (mi_row + half) < self.mi_rows;
        let has_cols = (mi_col + half) < self.mi_cols;
        if !has_rows && !has_cols {
            // PARTITION_SPLIT is implied
            self.stats.implied_splits += 1;
            self.decode_partition(mi_row, mi_col, half);
            self.decode_partition(mi_row, mi_col + half, half);
            self.decode_partition(mi_row + half, mi_col, half);
            self.decode_partition(mi_row + half, mi_col + half, half);
        } else {
            trace!(
                "partition symbol at mi ({}, {}) size {} not decoded",
                mi_row,
                mi_col,
                num8x8
            );
            self.stats.unimplemented_partitions += 1;
        }
    }
}
