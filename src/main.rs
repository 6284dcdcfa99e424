use std::error::Error;
use std::fs;

use clap::{crate_version, App, Arg};
use tracing_subscriber::EnvFilter;

use vp9parser::ivf;
use vp9parser::mkv::{self, Matroska, TrackType};
use vp9parser::vp9::{self, FrameOutcome, Vp9Decoder};
use vp9parser::{probe_fileformat, FileFormat, FCC_VP90};

struct Config {
    headers: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// feed one container frame (possibly a superframe) to the decoder
fn process_vp9_frame(decoder: &mut Vp9Decoder, data: &[u8]) -> Result<(), Box<dyn Error>> {
    for frame in vp9::split_superframe(data)? {
        match decoder.parse_frame(frame)? {
            FrameOutcome::ShowExisting { .. } => println!("      {}", decoder.header()),
            FrameOutcome::HeaderOnly => println!("      {} (no tiles)", decoder.header()),
            FrameOutcome::Tiles(tiles) => {
                println!("      {}", decoder.header());
                for tile in tiles.iter() {
                    println!(
                        "        tile[{},{}] mi={}..{}x{}..{} size={} sb={} split={} undecoded={}",
                        tile.tile_row,
                        tile.tile_col,
                        tile.mi_row_start,
                        tile.mi_row_end,
                        tile.mi_col_start,
                        tile.mi_col_end,
                        tile.size,
                        tile.stats.superblocks,
                        tile.stats.implied_splits,
                        tile.stats.unimplemented_partitions
                    );
                }
            }
        }
    }
    Ok(())
}

fn dump_webm(fname: &str, mkv: &Matroska, config: &Config) -> Result<(), Box<dyn Error>> {
    let header = mkv.header();
    println!(
        "{}: DocType={:?} version={}",
        fname, header.doc_type, header.doc_type_version
    );
    if let Some(info) = mkv.segment_info() {
        println!(
            "  Info: timestamp_scale={} muxing_app={:?} writing_app={:?}",
            info.timestamp_scale, info.muxing_app, info.writing_app
        );
    }
    for track in mkv.tracks() {
        print!(
            "  Track#{} uid={} {:?} codec={:?} lang={}",
            track.track_number, track.track_uid, track.track_type, track.codec_id, track.language
        );
        match (track.track_type, track.video, track.audio) {
            (TrackType::Video, Some(v), _) => println!(" {}x{}", v.pixel_width, v.pixel_height),
            (TrackType::Audio, _, Some(a)) => println!(" ch={} bits={}", a.channels, a.bit_depth),
            _ => println!(),
        }
    }

    let vp9_track = mkv.find_track(mkv::CODEC_V_VP9);
    let mut decoder = Vp9Decoder::new();
    for cluster in mkv.clusters() {
        println!("  Cluster timestamp={} blocks={}", cluster.timestamp, cluster.blocks.len());
        for block in cluster.blocks.iter() {
            println!(
                "    Block track={} t={} key={} {:?} frames={}",
                block.track_number,
                block.absolute_timestamp(cluster),
                block.only_keyframes as u8,
                block.lacing,
                block.frames.len()
            );
            if !config.headers || Some(block.track_number) != vp9_track {
                continue;
            }
            for frame in block.frames.iter() {
                if let Err(e) = process_vp9_frame(&mut decoder, frame) {
                    println!("      error: {}", e);
                }
            }
        }
    }
    Ok(())
}

fn dump_ivf(fname: &str, data: &[u8], config: &Config) -> Result<(), Box<dyn Error>> {
    let hdr = ivf::parse_ivf_header(data)?;
    let fcc = String::from_utf8_lossy(&hdr.fcc);
    println!(
        "{}: fcc={:?} size={}x{} fps={} scale={} f={}",
        fname, fcc, hdr.width, hdr.height, hdr.framerate, hdr.timescale, hdr.nframes
    );
    if hdr.fcc != FCC_VP90 {
        println!("{}: unsupport codec", fname);
        return Ok(());
    }

    let mut decoder = Vp9Decoder::new();
    for frame in ivf::IvfFrames::new(data) {
        let (frame, payload) = frame?;
        println!("  F#{} size={}", frame.pts, frame.size);
        if config.headers {
            if let Err(e) = process_vp9_frame(&mut decoder, payload) {
                println!("      error: {}", e);
            }
        }
    }
    Ok(())
}

fn process_file(fname: &str, config: &Config) -> Result<(), Box<dyn Error>> {
    let data = fs::read(fname)?;
    match probe_fileformat(&data) {
        FileFormat::WebM => {
            let (mkv, result) = mkv::parse_matroska_partial(&data)?;
            dump_webm(fname, &mkv, config)?;
            result?;
        }
        FileFormat::IVF => dump_ivf(fname, &data, config)?,
        FileFormat::Bitstream => {
            println!("{}: raw VP9 frame", fname);
            let mut decoder = Vp9Decoder::new();
            process_vp9_frame(&mut decoder, &data)?;
        }
    }
    Ok(())
}

fn main() {
    let matches = App::new("vp9parser")
        .version(crate_version!())
        .about("WebM/Matroska demuxer and VP9 frame header parser")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .arg(
            Arg::with_name("headers")
                .long("headers")
                .help("Parse VP9 frame headers"),
        )
        .arg(
            Arg::with_name("INPUT")
                .help("Input file (.webm, .mkv, .ivf)")
                .required(true)
                .multiple(true),
        )
        .get_matches();

    init_logging(matches.is_present("verbose"));
    let config = Config {
        headers: matches.is_present("headers"),
    };

    let mut failed = false;
    for fname in matches.values_of("INPUT").into_iter().flatten() {
        if let Err(e) = process_file(fname, &config) {
            println!("{}: {}", fname, e);
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}
