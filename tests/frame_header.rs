//! VP9 frame parsing against hand-assembled bitstreams

mod common;

use common::{BitWriter, BoolEncoder};
use vp9parser::probs::FrameContext;
use vp9parser::vp9::{
    self, ColorSpace, DecoderState, FrameType, InterpolationFilter, ReferenceFrame, ReferenceMode,
    TxMode,
};
use vp9parser::{Error, FrameOutcome, Vp9Decoder};

const DEFAULT_SKIP_PROB0: u8 = 192;

/// syntax from refresh_frame_context up to tile_info that the tests vary
struct Tail {
    refresh_frame_context: bool,
    frame_context_idx: u32,
    // raw (value, bits) runs
    segmentation: Vec<(u32, usize)>,
    tile_bits: Vec<(u32, usize)>,
}

impl Default for Tail {
    // segmentation off, one tile for frames narrower than 512 pixels
    fn default() -> Self {
        Tail {
            refresh_frame_context: true,
            frame_context_idx: 0,
            segmentation: vec![(0, 1)],
            tile_bits: vec![(0, 1)],
        }
    }
}

impl Tail {
    fn context(frame_context_idx: u32) -> Self {
        Tail {
            frame_context_idx,
            ..Tail::default()
        }
    }
}

fn frame_tail(w: &mut BitWriter, tail: &Tail, header_size: u16) {
    w.put_bit(tail.refresh_frame_context);
    w.put_bit(false); // frame_parallel_decoding_mode
    w.put_bits(tail.frame_context_idx, 2);
    w.put_bits(10, 6).put_bits(0, 3); // loop filter level, sharpness
    w.put_bit(true).put_bit(false); // delta_enabled, no delta_update
    w.put_bits(60, 8); // base_q_idx
    w.put_bits(0, 3); // no delta_q
    for &(value, n) in tail.segmentation.iter() {
        w.put_bits(value, n);
    }
    for &(value, n) in tail.tile_bits.iter() {
        w.put_bits(value, n);
    }
    w.put_bits(header_size as u32, 16);
}

fn sync_code(w: &mut BitWriter) {
    w.put_bits(0x49, 8).put_bits(0x83, 8).put_bits(0x42, 8);
}

/// uncompressed header of a profile 0 keyframe, up to and including header_size_in_bytes
fn keyframe_header(w: &mut BitWriter, width: u32, height: u32, tail: &Tail, header_size: u16) {
    w.put_bits(2, 2); // frame_marker
    w.put_bits(0, 2); // profile 0
    w.put_bit(false); // show_existing_frame
    w.put_bit(false); // frame_type: KEY_FRAME
    w.put_bit(true); // show_frame
    w.put_bit(false); // error_resilient_mode
    sync_code(w);
    w.put_bits(2, 3); // color_space: BT.709
    w.put_bit(false); // color_range
    w.put_bits(width - 1, 16).put_bits(height - 1, 16);
    w.put_bit(false); // render_and_frame_size_different
    frame_tail(w, tail, header_size);
}

/// hidden intra-only frame, 64x48
fn intra_only_header(w: &mut BitWriter, reset_frame_context: u32, tail: &Tail, header_size: u16) {
    w.put_bits(2, 2);
    w.put_bits(0, 2);
    w.put_bit(false); // show_existing_frame
    w.put_bit(true); // frame_type: NON_KEY_FRAME
    w.put_bit(false); // show_frame
    w.put_bit(false); // error_resilient_mode
    w.put_bit(true); // intra_only
    w.put_bits(reset_frame_context, 2);
    sync_code(w);
    w.put_bits(0, 8); // refresh_frame_flags
    w.put_bits(63, 16).put_bits(47, 16);
    w.put_bit(false);
    frame_tail(w, tail, header_size);
}

struct InterFrame {
    slot: u32,
    // LAST, GOLDEN, ALTREF
    sign_bias: [bool; 3],
    high_precision_mv: bool,
    // literal filter type, None for SWITCHABLE
    filter: Option<u32>,
}

impl InterFrame {
    fn from_slot(slot: u32) -> Self {
        InterFrame {
            slot,
            sign_bias: [false; 3],
            high_precision_mv: true,
            filter: Some(1),
        }
    }
}

/// non-intra frame that takes its size from reference slot `frame.slot`
fn inter_header(w: &mut BitWriter, frame: &InterFrame, tail: &Tail, header_size: u16) {
    w.put_bits(2, 2);
    w.put_bits(0, 2);
    w.put_bit(false); // show_existing_frame
    w.put_bit(true); // frame_type: NON_KEY_FRAME
    w.put_bit(true); // show_frame
    w.put_bit(false); // error_resilient_mode
    w.put_bits(0, 2); // reset_frame_context
    w.put_bits(0x01, 8); // refresh_frame_flags
    for &bias in frame.sign_bias.iter() {
        w.put_bits(frame.slot, 3).put_bit(bias);
    }
    w.put_bit(true); // found_ref
    w.put_bit(false); // render_and_frame_size_different
    w.put_bit(frame.high_precision_mv);
    match frame.filter {
        Some(filter) => {
            w.put_bit(false).put_bits(filter, 2);
        }
        None => {
            w.put_bit(true);
        }
    }
    frame_tail(w, tail, header_size);
}

/// uncompressed header, compressed header, then tiles with 32-bit size prefixes except the last
fn assemble<F>(header: F, compressed: &[u8], tiles: &[Vec<u8>]) -> Vec<u8>
where
    F: FnOnce(&mut BitWriter, u16),
{
    let mut w = BitWriter::new();
    header(&mut w, compressed.len() as u16);
    w.align();
    let mut data = w.into_bytes();
    data.extend_from_slice(compressed);
    for (n, tile) in tiles.iter().enumerate() {
        if n + 1 < tiles.len() {
            data.extend_from_slice(&(tile.len() as u32).to_be_bytes());
        }
        data.extend_from_slice(tile);
    }
    data
}

fn empty_tile() -> Vec<u8> {
    BoolEncoder::new().finish()
}

/// diff_update_prob() carrying `delta` through decode_term_subexp()
fn put_diff_update(enc: &mut BoolEncoder, delta: Option<u32>) {
    let delta = match delta {
        Some(delta) => delta,
        None => return enc.put_bool(false, 252),
    };
    enc.put_bool(true, 252);
    if delta < 16 {
        enc.put_literal(0, 1);
        enc.put_literal(delta, 4);
    } else if delta < 32 {
        enc.put_literal(0b10, 2);
        enc.put_literal(delta - 16, 4);
    } else if delta < 64 {
        enc.put_literal(0b110, 3);
        enc.put_literal(delta - 32, 4);
    } else if delta < 129 {
        enc.put_literal(0b111, 3);
        enc.put_literal(delta - 64, 7);
    } else {
        enc.put_literal(0b111, 3);
        enc.put_literal((delta + 1) >> 1, 7);
        enc.put_literal((delta & 1) ^ 1, 1);
    }
}

/// update_mv_prob() with a 7-bit value
fn put_mv_update(enc: &mut BoolEncoder, value: Option<u32>) {
    match value {
        Some(value) => {
            enc.put_bool(true, 252);
            enc.put_literal(value, 7);
        }
        None => enc.put_bool(false, 252),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum RefCoding {
    // sign biases all equal: nothing coded
    SingleOnly,
    Single,
    Compound,
    Select,
}

struct InterSyntax {
    switchable: bool,
    reference: RefCoding,
    high_precision_mv: bool,
}

/// compressed header; `update` names each probability in decode order and
/// returns its delta (or 7-bit value for MV probabilities) when it is updated
fn compressed_header<U>(tx_mode: u32, inter: Option<&InterSyntax>, update: U) -> Vec<u8>
where
    U: Fn(&str, &[usize]) -> Option<u32>,
{
    let mut enc = BoolEncoder::new();
    if tx_mode < 3 {
        enc.put_literal(tx_mode, 2);
    } else {
        enc.put_literal(3, 2);
        enc.put_literal(tx_mode - 3, 1);
    }
    if tx_mode == 4 {
        for &(name, width) in [("tx8x8", 1usize), ("tx16x16", 2), ("tx32x32", 3)].iter() {
            for ctx in 0..2 {
                for j in 0..width {
                    put_diff_update(&mut enc, update(name, &[ctx, j]));
                }
            }
        }
    }

    for tx in 0..=tx_mode.min(3) as usize {
        let update_probs = update("coef_tx", &[tx]).is_some();
        enc.put_literal(update_probs as u32, 1);
        if !update_probs {
            continue;
        }
        for plane in 0..2 {
            for reference in 0..2 {
                for band in 0..6 {
                    let contexts = if band == 0 { 3 } else { 6 };
                    for ctx in 0..contexts {
                        for node in 0..3 {
                            let index = [tx, plane, reference, band, ctx, node];
                            put_diff_update(&mut enc, update("coef", &index));
                        }
                    }
                }
            }
        }
    }
    for i in 0..3 {
        put_diff_update(&mut enc, update("skip", &[i]));
    }

    let inter = match inter {
        Some(inter) => inter,
        None => return enc.finish(),
    };
    let table = |enc: &mut BoolEncoder, name: &str, rows: usize, cols: usize| {
        for i in 0..rows {
            for j in 0..cols {
                put_diff_update(enc, update(name, &[i, j]));
            }
        }
    };
    table(&mut enc, "inter_mode", 7, 3);
    if inter.switchable {
        table(&mut enc, "interp_filter", 4, 2);
    }
    table(&mut enc, "is_inter", 4, 1);
    match inter.reference {
        RefCoding::SingleOnly => {}
        RefCoding::Single => enc.put_literal(0, 1),
        RefCoding::Compound => enc.put_literal(0b10, 2),
        RefCoding::Select => enc.put_literal(0b11, 2),
    }
    if inter.reference == RefCoding::Select {
        table(&mut enc, "comp_mode", 5, 1);
    }
    if inter.reference != RefCoding::Compound {
        table(&mut enc, "single_ref", 5, 2);
    }
    if inter.reference == RefCoding::Compound || inter.reference == RefCoding::Select {
        table(&mut enc, "comp_ref", 5, 1);
    }
    table(&mut enc, "y_mode", 4, 9);
    table(&mut enc, "partition", 16, 3);

    for j in 0..3 {
        put_mv_update(&mut enc, update("mv_joints", &[j]));
    }
    for i in 0..2 {
        put_mv_update(&mut enc, update("sign", &[i]));
        for j in 0..10 {
            put_mv_update(&mut enc, update("classes", &[i, j]));
        }
        put_mv_update(&mut enc, update("class0_bit", &[i]));
        for j in 0..10 {
            put_mv_update(&mut enc, update("bits", &[i, j]));
        }
    }
    for i in 0..2 {
        for j in 0..2 {
            for k in 0..3 {
                put_mv_update(&mut enc, update("class0_fr", &[i, j, k]));
            }
        }
        for j in 0..3 {
            put_mv_update(&mut enc, update("fr", &[i, j]));
        }
    }
    if inter.high_precision_mv {
        for i in 0..2 {
            put_mv_update(&mut enc, update("class0_hp", &[i]));
            put_mv_update(&mut enc, update("hp", &[i]));
        }
    }
    enc.finish()
}

/// compressed header of an intra frame: TX_MODE ONLY_4X4 and one skip probability update
fn intra_compressed_header() -> Vec<u8> {
    compressed_header(0, None, |name, index| match (name, index) {
        ("skip", [0]) => Some(0),
        _ => None,
    })
}

fn keyframe(width: u32, height: u32) -> Vec<u8> {
    assemble(
        |w, size| keyframe_header(w, width, height, &Tail::default(), size),
        &intra_compressed_header(),
        &[empty_tile()],
    )
}

fn header_only<F: FnOnce(&mut BitWriter, u16)>(header: F) -> Vec<u8> {
    assemble(header, &[], &[])
}

#[test]
fn rejects_bad_frame_marker() {
    let mut decoder = Vp9Decoder::new();
    assert!(matches!(
        decoder.parse_frame(&[0x00, 0x00]),
        Err(Error::StructuralMismatch {
            context: "frame marker",
            ..
        })
    ));
}

#[test]
fn rejects_profile3_reserved_bit() {
    let mut decoder = Vp9Decoder::new();
    assert_eq!(
        decoder.parse_frame(&[0b1011_1000]),
        Err(Error::ConstraintViolation("reserved_zero bit after profile 3"))
    );
}

#[test]
fn show_existing_frame() {
    let mut decoder = Vp9Decoder::new();
    let outcome = decoder.parse_frame(&[0b1000_1101]).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::ShowExisting {
            frame_to_show_map_index: 5
        }
    );
    assert_eq!(decoder.state(), DecoderState::Done);
}

#[test]
fn keyframe_header_fields() {
    let data = header_only(|w, size| keyframe_header(w, 64, 48, &Tail::default(), size));
    let mut decoder = Vp9Decoder::new();
    assert_eq!(decoder.parse_frame(&data).unwrap(), FrameOutcome::HeaderOnly);

    let hdr = decoder.header();
    assert_eq!(hdr.frame_type, FrameType::KeyFrame);
    assert!(hdr.show_frame);
    assert_eq!((decoder.frame_width(), decoder.frame_height()), (64, 48));
    assert_eq!((decoder.render_width(), decoder.render_height()), (64, 48));
    assert_eq!(decoder.bit_depth(), 8);
    assert_eq!(decoder.color_space(), ColorSpace::Bt709);
    assert_eq!(decoder.subsampling(), (true, true));
    assert_eq!((decoder.mi_cols(), decoder.mi_rows()), (8, 6));
    assert_eq!((decoder.sb64_cols(), decoder.sb64_rows()), (1, 1));
    assert_eq!((decoder.tile_cols_log2(), decoder.tile_rows_log2()), (0, 0));
    assert_eq!(hdr.loop_filter.level, 10);
    assert_eq!(hdr.quantization.base_q_idx, 60);
    assert!(!decoder.lossless());
    assert_eq!(hdr.uncompressed_header_size, 15);
    for slot in 0..8 {
        assert_eq!(decoder.ref_frame_size(slot), Some((64, 48)));
    }
}

#[test]
fn nonzero_trailing_bits_are_rejected() {
    let mut w = BitWriter::new();
    keyframe_header(&mut w, 64, 48, &Tail::default(), 0);
    w.put_bit(true);
    w.align();
    let mut decoder = Vp9Decoder::new();
    assert_eq!(
        decoder.parse_frame(&w.into_bytes()),
        Err(Error::ConstraintViolation("trailing bits are not zero"))
    );
}

#[test]
fn keyframe_with_compressed_header_and_tile() {
    let mut decoder = Vp9Decoder::new();
    let outcome = decoder.parse_frame(&keyframe(64, 48)).unwrap();
    assert_eq!(decoder.tx_mode(), TxMode::Only4x4);

    // forward update of skip[0] is saved into context 0
    let probs = decoder.probabilities();
    assert_eq!(probs.current().coefficients.skip, [196, 128, 64]);
    assert_eq!(probs.saved(0).coefficients.skip[0], 196);
    assert_eq!(probs.saved(1).coefficients.skip[0], DEFAULT_SKIP_PROB0);

    let tiles = match &outcome {
        FrameOutcome::Tiles(tiles) => tiles,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(tiles.len(), 1);
    assert_eq!((tiles[0].mi_col_start, tiles[0].mi_col_end), (0, 8));
    assert_eq!((tiles[0].mi_row_start, tiles[0].mi_row_end), (0, 6));
    assert_eq!(tiles[0].stats.superblocks, 1);
    assert_eq!(tiles[0].stats.unimplemented_partitions, 1);
    assert_eq!(
        outcome.ensure_fully_parsed(),
        Err(Error::NotImplemented("partition symbol decoding"))
    );
}

#[test]
fn smallest_keyframe_reports_undecoded_8x8_partition() {
    let mut decoder = Vp9Decoder::new();
    let outcome = decoder.parse_frame(&keyframe(8, 8)).unwrap();
    if let FrameOutcome::Tiles(tiles) = &outcome {
        assert_eq!(tiles[0].stats.implied_splits, 3);
        assert_eq!(tiles[0].stats.unimplemented_partitions, 1);
    } else {
        panic!("expected tiles");
    }
    assert_eq!(
        outcome.ensure_fully_parsed(),
        Err(Error::NotImplemented("partition symbol decoding"))
    );
}

#[test]
fn tx_mode_select_and_coefficient_updates() {
    let compressed = compressed_header(4, None, |name, index| match (name, index) {
        ("tx16x16", [1, 1]) => Some(12),
        ("coef_tx", [0]) | ("coef_tx", [3]) => Some(0),
        ("coef", [0, 1, 0, 2, 3, 1]) => Some(100),
        _ => None,
    });
    let data = assemble(
        |w, size| keyframe_header(w, 64, 48, &Tail::default(), size),
        &compressed,
        &[empty_tile()],
    );
    let mut decoder = Vp9Decoder::new();
    decoder.parse_frame(&data).unwrap();
    assert_eq!(decoder.tx_mode(), TxMode::TxModeSelect);

    let mut expected = FrameContext::default();
    expected.coefficients.tx.p16x16[1][1] = 19;
    expected.coefficients.coef[0][1][0][2][3][1] = 114;
    assert_eq!(decoder.probabilities().current(), &expected);
}

#[test]
fn inter_frame_with_switchable_filter_and_reference_select() {
    let mut decoder = Vp9Decoder::new();
    decoder.parse_frame(&keyframe(64, 48)).unwrap();

    let frame = InterFrame {
        slot: 0,
        sign_bias: [false, false, true],
        high_precision_mv: true,
        filter: None,
    };
    let syntax = InterSyntax {
        switchable: true,
        reference: RefCoding::Select,
        high_precision_mv: true,
    };
    // every decode_term_subexp() tier, plus MV updates
    let compressed = compressed_header(0, Some(&syntax), |name, index| match (name, index) {
        ("interp_filter", [0, 0]) => Some(3),
        ("comp_mode", [0, 0]) => Some(21),
        ("comp_ref", [0, 0]) => Some(39),
        ("partition", [0, 0]) => Some(74),
        ("y_mode", [0, 0]) => Some(200),
        ("mv_joints", [0]) => Some(50),
        ("class0_fr", [0, 1, 2]) => Some(3),
        ("hp", [1]) => Some(20),
        _ => None,
    });
    let data = assemble(
        |w, size| inter_header(w, &frame, &Tail::context(1), size),
        &compressed,
        &[empty_tile()],
    );
    decoder.parse_frame(&data).unwrap();

    assert_eq!(decoder.interpolation_filter(), InterpolationFilter::Switchable);
    assert_eq!(decoder.reference_mode(), ReferenceMode::ReferenceModeSelect);
    let hdr = decoder.header();
    assert_eq!(hdr.comp_fixed_ref, ReferenceFrame::AltRef);
    assert_eq!(hdr.comp_var_ref, [ReferenceFrame::Last, ReferenceFrame::Golden]);

    let mut expected = FrameContext::default();
    expected.modes.interp_filter[0][0] = 209;
    expected.modes.comp_mode[0] = 238;
    expected.modes.comp_ref[0] = 61;
    expected.modes.partition[0][0] = 169;
    expected.modes.y_mode[0][0] = 197;
    expected.modes.mv_joints[0] = 101;
    expected.modes.mv[0].class0_fr[1][2] = 7;
    expected.modes.mv[1].hp = 41;
    let probs = decoder.probabilities();
    assert_eq!(probs.current(), &expected);
    assert_eq!(probs.saved(1), &expected);
    assert_eq!(probs.saved(0).coefficients.skip[0], 196);
}

#[test]
fn inter_frame_with_fixed_filter_and_single_reference() {
    let mut decoder = Vp9Decoder::new();
    decoder.parse_frame(&keyframe(64, 48)).unwrap();

    let frame = InterFrame {
        high_precision_mv: false,
        ..InterFrame::from_slot(0)
    };
    let syntax = InterSyntax {
        switchable: false,
        reference: RefCoding::SingleOnly,
        high_precision_mv: false,
    };
    let compressed = compressed_header(0, Some(&syntax), |name, index| match (name, index) {
        ("is_inter", [0, 0]) => Some(5),
        ("single_ref", [4, 1]) => Some(140),
        ("fr", [1, 2]) => Some(100),
        _ => None,
    });
    let data = assemble(
        |w, size| inter_header(w, &frame, &Tail::context(1), size),
        &compressed,
        &[empty_tile()],
    );
    decoder.parse_frame(&data).unwrap();

    assert_eq!(decoder.interpolation_filter(), InterpolationFilter::EightTap);
    assert_eq!(decoder.reference_mode(), ReferenceMode::SingleReference);
    assert!(!decoder.header().allow_high_precision_mv);

    // interpolation filter and high precision MV probabilities are not coded
    let mut expected = FrameContext::default();
    expected.modes.is_inter[0] = 73;
    expected.modes.single_ref[4][1] = 124;
    expected.modes.mv[1].fr[2] = 201;
    assert_eq!(decoder.probabilities().current(), &expected);
}

#[test]
fn inter_frame_with_compound_reference_only() {
    let mut decoder = Vp9Decoder::new();
    decoder.parse_frame(&keyframe(64, 48)).unwrap();

    let frame = InterFrame {
        sign_bias: [true, false, false],
        ..InterFrame::from_slot(0)
    };
    let syntax = InterSyntax {
        switchable: false,
        reference: RefCoding::Compound,
        high_precision_mv: true,
    };
    let compressed = compressed_header(0, Some(&syntax), |name, index| match (name, index) {
        ("comp_ref", [2, 0]) => Some(10),
        _ => None,
    });
    let data = assemble(
        |w, size| inter_header(w, &frame, &Tail::context(1), size),
        &compressed,
        &[empty_tile()],
    );
    decoder.parse_frame(&data).unwrap();

    assert_eq!(decoder.reference_mode(), ReferenceMode::CompoundReference);
    let hdr = decoder.header();
    assert_eq!(hdr.comp_fixed_ref, ReferenceFrame::Last);
    assert_eq!(hdr.comp_var_ref, [ReferenceFrame::Golden, ReferenceFrame::AltRef]);

    let mut expected = FrameContext::default();
    expected.modes.comp_ref[2] = 54;
    assert_eq!(decoder.probabilities().current(), &expected);
}

#[test]
fn multiple_tiles_are_located_and_walked() {
    // 512x128: 64 mi columns (8 superblocks), 16 mi rows
    let tail = Tail {
        // increment_tile_cols_log2 up to the maximum of 1; tile_rows_log2 = 1
        tile_bits: vec![(1, 1), (1, 1), (0, 1)],
        ..Tail::default()
    };
    let mut padded = empty_tile();
    padded.extend_from_slice(&[0; 3]);
    let tiles = vec![empty_tile(), padded, empty_tile(), empty_tile()];
    let data = assemble(
        |w, size| keyframe_header(w, 512, 128, &tail, size),
        &intra_compressed_header(),
        &tiles,
    );

    let mut decoder = Vp9Decoder::new();
    let outcome = decoder.parse_frame(&data).unwrap();
    assert_eq!((decoder.tile_cols_log2(), decoder.tile_rows_log2()), (1, 1));
    let ranges = match outcome {
        FrameOutcome::Tiles(ranges) => ranges,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(ranges.len(), 4);

    let bounds: Vec<_> = ranges
        .iter()
        .map(|t| {
            (
                t.tile_row,
                t.tile_col,
                t.mi_row_start,
                t.mi_row_end,
                t.mi_col_start,
                t.mi_col_end,
            )
        })
        .collect();
    assert_eq!(
        bounds,
        vec![
            (0, 0, 0, 8, 0, 32),
            (0, 1, 0, 8, 32, 64),
            (1, 0, 8, 16, 0, 32),
            (1, 1, 8, 16, 32, 64),
        ]
    );

    // 32-bit size prefixes before every tile but the last
    for (range, tile) in ranges.iter().zip(tiles.iter()) {
        assert_eq!(range.size, tile.len());
    }
    for pair in ranges.windows(2) {
        assert_eq!(pair[1].offset, pair[0].offset + pair[0].size + 4);
    }
    assert_eq!(ranges[3].offset + ranges[3].size, data.len());

    for range in ranges.iter() {
        assert_eq!(range.stats.superblocks, 4);
        assert_eq!(range.stats.unimplemented_partitions, 4);
    }
}

#[test]
fn tile_size_beyond_frame_is_truncated_input() {
    let tail = Tail {
        tile_bits: vec![(1, 1), (0, 1)],
        ..Tail::default()
    };
    let mut data = assemble(
        |w, size| keyframe_header(w, 512, 64, &tail, size),
        &intra_compressed_header(),
        &[],
    );
    data.extend_from_slice(&256u32.to_be_bytes());
    data.extend(empty_tile());

    let mut decoder = Vp9Decoder::new();
    assert!(matches!(
        decoder.parse_frame(&data),
        Err(Error::TruncatedInput { context: "tile", .. })
    ));
}

#[test]
fn segmentation_feature_table() {
    let mut segmentation = vec![(1, 1), (1, 1)]; // enabled, update_map
    segmentation.extend_from_slice(&[(1, 1), (200, 8)]); // tree_probs[0]
    segmentation.extend(vec![(0, 1); 6]);
    segmentation.push((1, 1)); // temporal_update
    segmentation.extend_from_slice(&[(1, 1), (30, 8), (0, 1), (0, 1)]);
    segmentation.extend_from_slice(&[(1, 1), (1, 1)]); // update_data, abs_or_delta_update
    for segment in 0..8 {
        for feature in 0..4 {
            match (segment, feature) {
                (1, 0) => segmentation.extend_from_slice(&[(1, 1), (37, 8), (1, 1)]),
                (2, 1) => segmentation.extend_from_slice(&[(1, 1), (20, 6), (0, 1)]),
                (3, 2) => segmentation.extend_from_slice(&[(1, 1), (2, 2)]),
                (7, 3) => segmentation.push((1, 1)),
                _ => segmentation.push((0, 1)),
            }
        }
    }
    let tail = Tail {
        segmentation,
        ..Tail::default()
    };
    let mut decoder = Vp9Decoder::new();
    decoder
        .parse_frame(&header_only(|w, size| keyframe_header(w, 64, 48, &tail, size)))
        .unwrap();

    let seg = &decoder.header().segmentation;
    assert!(seg.enabled && seg.update_map && seg.temporal_update);
    assert!(seg.update_data && seg.abs_or_delta_update);
    assert_eq!(seg.tree_probs, [200, 255, 255, 255, 255, 255, 255]);
    assert_eq!(seg.pred_probs, [30, 255, 255]);
    assert_eq!(seg.feature_data[1][0], -37);
    assert_eq!(seg.feature_data[2][1], 20);
    assert_eq!(seg.feature_data[3][2], 2);
    assert!(seg.feature_enabled[7][3]);
    assert_eq!(seg.feature_data[7][3], 0);
    let enabled = seg.feature_enabled.iter().flatten().filter(|&&e| e).count();
    assert_eq!(enabled, 4);

    // the next keyframe starts from cleared feature tables
    decoder
        .parse_frame(&header_only(|w, size| {
            keyframe_header(w, 64, 48, &Tail::default(), size)
        }))
        .unwrap();
    let seg = &decoder.header().segmentation;
    assert!(!seg.enabled);
    assert!(seg.feature_enabled.iter().flatten().all(|&e| !e));
    assert!(seg.feature_data.iter().flatten().all(|&v| v == 0));
}

#[test]
fn reset_frame_context_on_intra_only_frames() {
    let mut decoder = Vp9Decoder::new();
    decoder.parse_frame(&keyframe(64, 48)).unwrap();

    // an inter frame refreshes context 2 with an updated skip probability
    let frame = InterFrame {
        sign_bias: [false, true, false],
        ..InterFrame::from_slot(0)
    };
    let syntax = InterSyntax {
        switchable: false,
        reference: RefCoding::Single,
        high_precision_mv: true,
    };
    let compressed = compressed_header(0, Some(&syntax), |name, index| match (name, index) {
        ("skip", [0]) => Some(0),
        _ => None,
    });
    let data = assemble(
        |w, size| inter_header(w, &frame, &Tail::context(2), size),
        &compressed,
        &[empty_tile()],
    );
    decoder.parse_frame(&data).unwrap();
    assert_eq!(decoder.reference_mode(), ReferenceMode::SingleReference);
    let skip0 = |decoder: &Vp9Decoder| -> Vec<u8> {
        (0..4)
            .map(|n| decoder.probabilities().saved(n).coefficients.skip[0])
            .collect()
    };
    assert_eq!(skip0(&decoder), vec![196, 192, 196, 192]);

    // reset_frame_context 0 and 1 keep every saved context
    for reset in 0..2 {
        decoder
            .parse_frame(&header_only(|w, size| {
                intra_only_header(w, reset, &Tail::context(2), size)
            }))
            .unwrap();
        assert_eq!(skip0(&decoder), vec![196, 192, 196, 192]);
    }

    // 2 resets only the context the frame names
    decoder
        .parse_frame(&header_only(|w, size| {
            intra_only_header(w, 2, &Tail::context(2), size)
        }))
        .unwrap();
    assert_eq!(decoder.header().frame_context_idx, 0);
    assert_eq!(skip0(&decoder), vec![196, 192, 192, 192]);

    // 3 resets all four
    decoder
        .parse_frame(&header_only(|w, size| {
            intra_only_header(w, 3, &Tail::context(2), size)
        }))
        .unwrap();
    assert_eq!(skip0(&decoder), vec![192; 4]);
    for n in 0..4 {
        assert_eq!(decoder.probabilities().saved(n), &FrameContext::default());
    }
}

#[test]
fn inter_frame_takes_size_from_reference() {
    let mut decoder = Vp9Decoder::new();
    decoder.parse_frame(&keyframe(64, 48)).unwrap();

    let data = header_only(|w, size| {
        inter_header(w, &InterFrame::from_slot(3), &Tail::default(), size)
    });
    assert_eq!(decoder.parse_frame(&data).unwrap(), FrameOutcome::HeaderOnly);
    let hdr = decoder.header();
    assert_eq!(hdr.frame_type, FrameType::NonKeyFrame);
    assert!(!hdr.frame_is_intra());
    assert_eq!(hdr.ref_frame_idx, [3, 3, 3]);
    assert!(hdr.allow_high_precision_mv);
    assert_eq!((decoder.frame_width(), decoder.frame_height()), (64, 48));
}

#[test]
fn reference_to_empty_slot_is_rejected() {
    let data = header_only(|w, size| {
        inter_header(w, &InterFrame::from_slot(0), &Tail::default(), size)
    });
    let mut decoder = Vp9Decoder::new();
    assert_eq!(
        decoder.parse_frame(&data),
        Err(Error::ConstraintViolation(
            "frame size refers to an empty reference slot"
        ))
    );
}

#[test]
fn superframe_frames_are_parsed_in_order() {
    let first = header_only(|w, size| keyframe_header(w, 64, 48, &Tail::default(), size));
    let second = [0b1000_1000u8]; // show_existing_frame, slot 0

    let marker = 0b1100_0001; // 2 frames, 1-octet sizes
    let mut data = first.clone();
    data.extend_from_slice(&second);
    data.extend_from_slice(&[marker, first.len() as u8, second.len() as u8, marker]);

    let frames = vp9::split_superframe(&data).unwrap();
    assert_eq!(frames, vec![&first[..], &second[..]]);

    let mut decoder = Vp9Decoder::new();
    let outcomes: Vec<FrameOutcome> = frames
        .into_iter()
        .map(|f| decoder.parse_frame(f).unwrap())
        .collect();
    assert_eq!(outcomes[0], FrameOutcome::HeaderOnly);
    assert_eq!(
        outcomes[1],
        FrameOutcome::ShowExisting {
            frame_to_show_map_index: 0
        }
    );
}
