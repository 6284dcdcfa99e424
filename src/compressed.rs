//
// VP9 compressed header: forward probability updates
//
use tracing::trace;

use crate::bitio::BitReader;
use crate::booldec::BoolDecoder;
use crate::error::{Error, Result};
use crate::probs::{CoefProbs, FrameContext, MvComponentProbs, TxProbs, PREV_COEF_CONTEXTS};
use crate::vp9::{FrameHeader, InterpolationFilter, ReferenceFrame, ReferenceMode, TxMode};

const DIFF_UPDATE_PROB: u8 = 252;

///
/// compressed_header()
///
pub(crate) fn parse_compressed_header(
    br: &mut BitReader,
    size: usize,
    hdr: &mut FrameHeader,
    ctx: &mut FrameContext,
) -> Result<()> {
    if size > br.bytes_remaining() {
        return Err(Error::TruncatedInput {
            context: "compressed header",
            offset: br.byte_position(),
        });
    }
    let mut bd = BoolDecoder::new(br, size)?;

    hdr.tx_mode = read_tx_mode(&mut bd, hdr.quantization.lossless)?;
    if hdr.tx_mode == TxMode::TxModeSelect {
        tx_mode_probs(&mut bd, &mut ctx.coefficients.tx)?;
    }
    read_coef_probs(&mut bd, hdr.tx_mode, &mut ctx.coefficients.coef)?;
    read_skip_prob(&mut bd, &mut ctx.coefficients.skip)?;

    if !hdr.frame_is_intra() {
        let modes = &mut ctx.modes;
        for probs in modes.inter_mode.iter_mut() {
            diff_update_probs(&mut bd, probs)?;
        }
        if hdr.interpolation_filter == InterpolationFilter::Switchable {
            for probs in modes.interp_filter.iter_mut() {
                diff_update_probs(&mut bd, probs)?;
            }
        }
        diff_update_probs(&mut bd, &mut modes.is_inter)?;

        frame_reference_mode(&mut bd, hdr)?;
        if hdr.reference_mode == ReferenceMode::ReferenceModeSelect {
            diff_update_probs(&mut bd, &mut modes.comp_mode)?;
        }
        if hdr.reference_mode != ReferenceMode::CompoundReference {
            for probs in modes.single_ref.iter_mut() {
                diff_update_probs(&mut bd, probs)?;
            }
        }
        if hdr.reference_mode != ReferenceMode::SingleReference {
            diff_update_probs(&mut bd, &mut modes.comp_ref)?;
        }

        for probs in modes.y_mode.iter_mut() {
            diff_update_probs(&mut bd, probs)?;
        }
        for probs in modes.partition.iter_mut() {
            diff_update_probs(&mut bd, probs)?;
        }
        mv_probs(
            &mut bd,
            hdr.allow_high_precision_mv,
            &mut modes.mv_joints,
            &mut modes.mv,
        )?;
    }

    trace!("compressed header consumed, {} budget bits left", bd.max_bits());
    bd.exit_bool()
}

// read_tx_mode()
fn read_tx_mode(bd: &mut BoolDecoder, lossless: bool) -> Result<TxMode> {
    if lossless {
        return Ok(TxMode::Only4x4);
    }
    let mut tx_mode: u8 = bd.read_literal(2)?; // L(2)
    if tx_mode == TxMode::Allow32x32 as u8 {
        tx_mode += bd.read_literal::<u8>(1)?; // L(1)
    }
    Ok(TxMode::from_literal(tx_mode))
}

// tx_mode_probs()
fn tx_mode_probs(bd: &mut BoolDecoder, tx: &mut TxProbs) -> Result<()> {
    for probs in tx.p8x8.iter_mut() {
        diff_update_probs(bd, probs)?;
    }
    for probs in tx.p16x16.iter_mut() {
        diff_update_probs(bd, probs)?;
    }
    for probs in tx.p32x32.iter_mut() {
        diff_update_probs(bd, probs)?;
    }
    Ok(())
}

// read_coef_probs()
fn read_coef_probs(bd: &mut BoolDecoder, tx_mode: TxMode, coef: &mut CoefProbs) -> Result<()> {
    for tx_probs in coef.iter_mut().take(tx_mode.biggest_tx_size() + 1) {
        let update_probs: bool = bd.read_literal(1)?; // L(1)
        if !update_probs {
            continue;
        }
        for plane in tx_probs.iter_mut() {
            for ref_probs in plane.iter_mut() {
                for (band, band_probs) in ref_probs.iter_mut().enumerate() {
                    let contexts = if band == 0 { 3 } else { PREV_COEF_CONTEXTS };
                    for probs in band_probs.iter_mut().take(contexts) {
                        diff_update_probs(bd, probs)?;
                    }
                }
            }
        }
    }
    Ok(())
}

// read_skip_prob()
fn read_skip_prob(bd: &mut BoolDecoder, skip: &mut [u8]) -> Result<()> {
    diff_update_probs(bd, skip)
}

// frame_reference_mode()
fn frame_reference_mode(bd: &mut BoolDecoder, hdr: &mut FrameHeader) -> Result<()> {
    let sign_bias = &hdr.ref_frame_sign_bias;
    let last = ReferenceFrame::Last as usize;
    let compound_reference_allowed = (last + 1..=ReferenceFrame::AltRef as usize)
        .any(|i| sign_bias[i] != sign_bias[last]);

    hdr.reference_mode = if compound_reference_allowed {
        let non_single_reference: bool = bd.read_literal(1)?; // L(1)
        if !non_single_reference {
            ReferenceMode::SingleReference
        } else if bd.read_literal::<bool>(1)? {
            ReferenceMode::ReferenceModeSelect
        } else {
            ReferenceMode::CompoundReference
        }
    } else {
        ReferenceMode::SingleReference
    };
    setup_compound_reference_mode(hdr);
    Ok(())
}

// setup_compound_reference_mode()
fn setup_compound_reference_mode(hdr: &mut FrameHeader) {
    use ReferenceFrame::*;
    let bias = |r: ReferenceFrame| hdr.ref_frame_sign_bias[r as usize];
    let (fixed, var) = if bias(Last) == bias(Golden) {
        (AltRef, [Last, Golden])
    } else if bias(Last) == bias(AltRef) {
        (Golden, [Last, AltRef])
    } else {
        (Last, [Golden, AltRef])
    };
    hdr.comp_fixed_ref = fixed;
    hdr.comp_var_ref = var;
}

// mv_probs()
fn mv_probs(
    bd: &mut BoolDecoder,
    allow_high_precision_mv: bool,
    joints: &mut [u8],
    comps: &mut [MvComponentProbs; 2],
) -> Result<()> {
    for prob in joints.iter_mut() {
        update_mv_prob(bd, prob)?;
    }
    for comp in comps.iter_mut() {
        update_mv_prob(bd, &mut comp.sign)?;
        for prob in comp.classes.iter_mut() {
            update_mv_prob(bd, prob)?;
        }
        update_mv_prob(bd, &mut comp.class0_bit)?;
        for prob in comp.bits.iter_mut() {
            update_mv_prob(bd, prob)?;
        }
    }
    for comp in comps.iter_mut() {
        for probs in comp.class0_fr.iter_mut() {
            for prob in probs.iter_mut() {
                update_mv_prob(bd, prob)?;
            }
        }
        for prob in comp.fr.iter_mut() {
            update_mv_prob(bd, prob)?;
        }
    }
    if allow_high_precision_mv {
        for comp in comps.iter_mut() {
            update_mv_prob(bd, &mut comp.class0_hp)?;
            update_mv_prob(bd, &mut comp.hp)?;
        }
    }
    Ok(())
}

// update_mv_prob()
fn update_mv_prob(bd: &mut BoolDecoder, prob: &mut u8) -> Result<()> {
    if bd.read_bool(DIFF_UPDATE_PROB)? {
        let mv_prob: u8 = bd.read_literal(7)?; // L(7)
        *prob = (mv_prob << 1) | 1;
    }
    Ok(())
}

fn diff_update_probs(bd: &mut BoolDecoder, probs: &mut [u8]) -> Result<()> {
    for prob in probs.iter_mut() {
        diff_update_prob(bd, prob)?;
    }
    Ok(())
}

// diff_update_prob()
fn diff_update_prob(bd: &mut BoolDecoder, prob: &mut u8) -> Result<()> {
    if bd.read_bool(DIFF_UPDATE_PROB)? {
        let delta_prob = decode_term_subexp(bd)?;
        *prob = inv_remap_prob(delta_prob, *prob);
    }
    Ok(())
}

// decode_term_subexp()
fn decode_term_subexp(bd: &mut BoolDecoder) -> Result<u8> {
    if !bd.read_literal::<bool>(1)? {
        return bd.read_literal(4);
    }
    if !bd.read_literal::<bool>(1)? {
        return Ok(bd.read_literal::<u8>(4)? + 16);
    }
    if !bd.read_literal::<bool>(1)? {
        return Ok(bd.read_literal::<u8>(4)? + 32);
    }
    let v: u8 = bd.read_literal(7)?;
    if v < 65 {
        return Ok(v + 64);
    }
    let bit: u8 = bd.read_literal(1)?;
    Ok((v << 1) - 1 + bit)
}

// inv_remap_prob()
fn inv_remap_prob(delta_prob: u8, prob: u8) -> u8 {
    let v = INV_MAP_TABLE[delta_prob as usize] as i32;
    let m = prob as i32 - 1;
    let p = if (m << 1) <= 255 {
        1 + inv_recenter_nonneg(v, m)
    } else {
        255 - inv_recenter_nonneg(v, 255 - 1 - m)
    };
    p as u8
}

// inv_recenter_nonneg()
fn inv_recenter_nonneg(v: i32, m: i32) -> i32 {
    if v > 2 * m {
        v
    } else if v & 1 != 0 {
        m - ((v + 1) >> 1)
    } else {
        m + (v >> 1)
    }
}

#[rustfmt::skip]
const INV_MAP_TABLE: [u8; 255] = [
    7, 20, 33, 46, 59, 72, 85, 98, 111, 124, 137, 150, 163, 176, 189, 202,
    215, 228, 241, 254, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13,
    14, 15, 16, 17, 18, 19, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30,
    31, 32, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 47, 48,
    49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 60, 61, 62, 63, 64, 65,
    66, 67, 68, 69, 70, 71, 73, 74, 75, 76, 77, 78, 79, 80, 81, 82,
    83, 84, 86, 87, 88, 89, 90, 91, 92, 93, 94, 95, 96, 97, 99, 100,
    101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 112, 113, 114, 115, 116, 117,
    118, 119, 120, 121, 122, 123, 125, 126, 127, 128, 129, 130, 131, 132, 133, 134,
    135, 136, 138, 139, 140, 141, 142, 143, 144, 145, 146, 147, 148, 149, 151, 152,
    153, 154, 155, 156, 157, 158, 159, 160, 161, 162, 164, 165, 166, 167, 168, 169,
    170, 171, 172, 173, 174, 175, 177, 178, 179, 180, 181, 182, 183, 184, 185, 186,
    187, 188, 190, 191, 192, 193, 194, 195, 196, 197, 198, 199, 200, 201, 203, 204,
    205, 206, 207, 208, 209, 210, 211, 212, 213, 214, 216, 217, 218, 219, 220, 221,
    222, 223, 224, 225, 226, 227, 229, 230, 231, 232, 233, 234, 235, 236, 237, 238,
    239, 240, 242, 243, 244, 245, 246, 247, 248, 249, 250, 251, 252, 253, 253,
];
