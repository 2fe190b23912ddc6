//! Encoder bench: lists registered encoders and runs a synthetic encode.
//!
//! Usage:
//!   ffenc-bench [options]
//!
//! Options:
//!   --list                 List encoders and exit
//!   --encoder <uid>        Encoder to run (default: ffenc-rawvideo)
//!   --size <WxH>           Frame size (default: 320x240)
//!   --frames <n>           Frames to encode (default: 30)
//!   --settings <json>      Settings as a JSON object, e.g. '{"bitrate": 4000}'

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ffenc::{DefaultHandler, Registry, RegistryConfig, Settings, VideoInput};
use ffenc_codec::{expected_frame_size, CodecLibrary, MediaKind, PixelFormat, RawLibrary, VideoFrameRef};

struct Args {
    list: bool,
    encoder: String,
    width: u32,
    height: u32,
    frames: u32,
    settings: Option<String>,
}

fn print_usage() {
    println!("Usage: ffenc-bench [--list] [--encoder <uid>] [--size <WxH>] [--frames <n>] [--settings <json>]");
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    let (w, h): (u32, u32) = (w.parse().ok()?, h.parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        list: false,
        encoder: "ffenc-rawvideo".to_string(),
        width: 320,
        height: 240,
        frames: 30,
        settings: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--list" => parsed.list = true,
            "--encoder" if i + 1 < args.len() => {
                parsed.encoder = args[i + 1].clone();
                i += 1;
            }
            "--size" if i + 1 < args.len() => {
                (parsed.width, parsed.height) = parse_size(&args[i + 1])?;
                i += 1;
            }
            "--frames" if i + 1 < args.len() => {
                parsed.frames = args[i + 1].parse().ok()?;
                i += 1;
            }
            "--settings" if i + 1 < args.len() => {
                parsed.settings = Some(args[i + 1].clone());
                i += 1;
            }
            _ => return None,
        }
        i += 1;
    }
    Some(parsed)
}

/// Moving luma gradient in NV12.
fn synthetic_frame(width: u32, height: u32, index: u32) -> Vec<u8> {
    let mut data = vec![128u8; expected_frame_size(width, height, PixelFormat::Nv12)];
    let luma = (width * height) as usize;
    for (i, pixel) in data[..luma].iter_mut().enumerate() {
        let x = i as u32 % width;
        *pixel = ((x + index * 4) % 220 + 16) as u8;
    }
    data
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ffenc=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let Some(args) = parse_args() else {
        print_usage();
        return Ok(());
    };

    let library = Arc::new(RawLibrary::new());
    let mut registry = Registry::new(RegistryConfig::default());
    for info in library.encoders() {
        registry.register_handler(&info.name, Arc::new(DefaultHandler));
    }
    registry.register_library(library);
    registry.register_encoders();

    if args.list {
        for factory in registry.factories() {
            let descriptor = factory.descriptor();
            println!(
                "{:<24} {:<6} {}",
                descriptor.uid,
                if descriptor.media == MediaKind::Video { "video" } else { "audio" },
                descriptor.readable_name
            );
        }
        return Ok(());
    }

    let factory = registry.factory(&args.encoder)?;
    if factory.descriptor().media != MediaKind::Video {
        bail!("{} is not a video encoder", args.encoder);
    }

    let mut settings = match &args.settings {
        Some(json) => Settings::from_json(json).context("invalid --settings")?,
        None => Settings::new(),
    };
    factory.defaults(&mut settings, false);

    let input = VideoInput::new(args.width, args.height, PixelFormat::Nv12);
    let mut session = factory.create_video(&settings, &input)?;
    println!(
        "Encoder:    {} ({})",
        factory.descriptor().uid,
        factory.descriptor().readable_name
    );
    println!("Input:      {}x{} NV12", args.width, args.height);
    println!("Lag:        {} frames", session.lag_in_frames());

    let start = Instant::now();
    let mut packets = 0u64;
    let mut bytes = 0usize;
    for index in 0..args.frames {
        let data = synthetic_frame(args.width, args.height, index);
        let frame =
            VideoFrameRef::packed(PixelFormat::Nv12, args.width, args.height, &data, i64::from(index))?;
        if let Some(packet) = session.video_encode(&frame)? {
            packets += 1;
            bytes += packet.data.len();
        }
    }
    let report = session.drain()?;
    packets += report.packets.len() as u64;
    bytes += report.packets.iter().map(|p| p.data.len()).sum::<usize>();

    let elapsed = start.elapsed();
    println!("Packets:    {} ({} bytes)", packets, bytes);
    println!("Discarded:  {}", report.discarded);
    if report.flush_incomplete {
        println!("Flush:      incomplete");
    }
    println!(
        "Elapsed:    {:.1} ms ({:.1} fps)",
        elapsed.as_secs_f64() * 1000.0,
        f64::from(args.frames) / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    if let Some(extra) = session.extra_data() {
        println!("Extra data: {} bytes", extra.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("320x240"), Some((320, 240)));
        assert_eq!(parse_size("320"), None);
        assert_eq!(parse_size("ax240"), None);
    }

    #[test]
    fn test_parse_size_rejects_zero_dimensions() {
        assert_eq!(parse_size("0x240"), None);
        assert_eq!(parse_size("320x0"), None);
        assert_eq!(parse_size("0x0"), None);
    }
}
