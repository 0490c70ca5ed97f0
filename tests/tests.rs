use agmv::reader::{self, DecodedAudio};
use agmv::*;
use imgref::ImgVec;
use rgb::RGB8;
use std::io::Cursor;

/// Profile that never skips frames, so chunk counts are predictable.
const NO_SKIP: Profile = Profile {
    dimensions: None,
    layout: PaletteLayout::Dual,
    leniency: 2.0,
    skip: SkipMode::Pairwise,
};

fn solid(c: RGB8, w: usize, h: usize) -> ImgVec<RGB8> {
    ImgVec::new(vec![c; w * h], w, h)
}

fn frame_color(n: usize) -> RGB8 {
    RGB8::new((n * 30) as u8, 255 - (n * 25) as u8, (n * 20) as u8)
}

fn encode_clip(frames: Vec<ImgVec<RGB8>>, settings: Settings, audio: Option<AudioTrack>) -> Vec<u8> {
    let (c, mut w) = new(settings).unwrap();
    if let Some(track) = audio {
        w.set_audio(track);
    }
    let t = std::thread::spawn(move || {
        for (i, frame) in frames.into_iter().enumerate() {
            c.add_frame_rgb(i, frame).unwrap();
        }
    });

    let mut out = Cursor::new(Vec::new());
    w.write_to(&mut out, &mut progress::NoProgress {}).unwrap();
    t.join().unwrap();
    out.into_inner()
}

#[track_caller]
fn assert_close(a: RGB8, b: RGB8, max_channel_diff: u8) {
    let close = a.r.abs_diff(b.r) <= max_channel_diff
        && a.g.abs_diff(b.g) <= max_channel_diff
        && a.b.abs_diff(b.b) <= max_channel_diff;
    assert!(close, "{a:?} vs {b:?}");
}

#[test]
fn n_frames() {
    for num_frames in 4..=9 {
        let frames = (0..num_frames).map(|n| solid(frame_color(n), 32, 16)).collect();
        let settings = Settings { profile: NO_SKIP, ..Settings::default() };
        let bytes = encode_clip(frames, settings, None);

        let video = reader::decode(Cursor::new(&bytes)).unwrap();
        assert_eq!(video.frames.len(), num_frames);
        assert_eq!(video.header.frames as usize, num_frames);
        for (n, frame) in video.frames.iter().enumerate() {
            let expected = frame_color(n);
            for px in frame.pixels() {
                // only the histogram's depth reduction may move a channel
                assert_close(px, expected, 3);
            }
        }
    }
}

#[test]
fn single_color_clip_is_fill_then_copy() {
    // one color for the whole clip: the keyframe fills, everything after
    // copies, and the decode is stable across all frames
    let frames = (0..8).map(|_| solid(RGB8::new(100, 50, 26), 16, 16)).collect();
    let settings = Settings { profile: NO_SKIP, copy_count: 16, ..Settings::default() };
    let bytes = encode_clip(frames, settings, None);

    let video = reader::decode(Cursor::new(&bytes)).unwrap();
    assert_eq!(video.frames.len(), 8);
    let first = video.frames[0].buf().to_vec();
    for frame in &video.frames {
        assert_eq!(frame.buf(), &first[..]);
    }
    assert_close(first[0], RGB8::new(100, 50, 26), 3);

    // COPY-only inter frames make every chunk after the first tiny
    let chunks: Vec<usize> = frame_chunk_sizes(&bytes);
    assert_eq!(chunks.len(), 8);
    assert!(chunks[1] < chunks[0]);
}

#[test]
fn detail_frames_survive_normal_blocks() {
    // 16 well-separated colors in a repeating pattern defeats FILL and
    // COPY, forcing literal blocks through the coder
    let colors: Vec<RGB8> = (0..16u16)
        .map(|i| RGB8::new((i * 16) as u8, (255 - i * 16) as u8, (i * 12) as u8))
        .collect();
    let mut frames = Vec::new();
    for n in 0..4 {
        let px: Vec<RGB8> = (0..24 * 24).map(|i| colors[(i + n) % 16]).collect();
        frames.push(ImgVec::new(px, 24, 24));
    }
    let sources = frames.clone();
    let settings = Settings { profile: NO_SKIP, ..Settings::default() };
    let bytes = encode_clip(frames, settings, None);

    let video = reader::decode(Cursor::new(&bytes)).unwrap();
    assert_eq!(video.frames.len(), 4);
    for (frame, source) in video.frames.iter().zip(&sources) {
        for (got, want) in frame.pixels().zip(source.pixels()) {
            assert_close(got, want, 3);
        }
    }
}

#[test]
fn both_coders_and_layouts_round_trip() {
    let single = Profile { layout: PaletteLayout::Single, ..NO_SKIP };
    for (profile, compression, version) in [
        (NO_SKIP, Compression::SlidingWindow, 1u8),
        (single, Compression::SlidingWindow, 2),
        (NO_SKIP, Compression::FixedToken, 3),
        (single, Compression::FixedToken, 4),
    ] {
        let frames = (0..5).map(|n| solid(frame_color(n), 16, 16)).collect();
        let settings = Settings { profile, compression, ..Settings::default() };
        let bytes = encode_clip(frames, settings, None);
        assert_eq!(bytes[17], version);

        let video = reader::decode(Cursor::new(&bytes)).unwrap();
        assert_eq!(video.frames.len(), 5);
        for (n, frame) in video.frames.iter().enumerate() {
            assert_close(frame.buf()[0], frame_color(n), 3);
        }
    }
}

#[test]
fn pairwise_skip_halves_an_identical_clip() {
    let always_skip = Profile { leniency: 0., ..NO_SKIP };
    let frames = (0..8).map(|_| solid(RGB8::new(60, 60, 60), 16, 16)).collect();
    let settings = Settings { profile: always_skip, fps: 30, ..Settings::default() };
    let bytes = encode_clip(frames, settings, None);

    let video = reader::decode(Cursor::new(&bytes)).unwrap();
    assert_eq!(video.frames.len(), 4);
    assert_eq!(video.header.frames, 4);
    // fps patched down by the encoded/nominal ratio
    assert_eq!(video.header.fps, 15);
}

#[test]
fn lookahead_skip_keeps_three_of_four() {
    let profile = Profile { leniency: 0., skip: SkipMode::Lookahead, ..NO_SKIP };
    let frames = (0..8).map(|n| solid(frame_color(n % 2), 16, 16)).collect();
    let settings = Settings { profile, fps: 24, ..Settings::default() };
    let bytes = encode_clip(frames, settings, None);

    let video = reader::decode(Cursor::new(&bytes)).unwrap();
    assert_eq!(video.frames.len(), 6);
    assert_eq!(video.header.frames, 6);
    assert_eq!(video.header.fps, 18);
}

#[test]
fn interpolated_frame_is_the_midpoint_blend() {
    let always_skip = Profile { leniency: 0., ..NO_SKIP };
    let a = RGB8::new(100, 100, 100);
    let b = RGB8::new(104, 104, 104);
    let frames = vec![
        solid(a, 16, 16),
        solid(b, 16, 16),
        solid(a, 16, 16),
        solid(b, 16, 16),
    ];
    let settings = Settings { profile: always_skip, ..Settings::default() };
    let bytes = encode_clip(frames, settings, None);

    let video = reader::decode(Cursor::new(&bytes)).unwrap();
    assert_eq!(video.frames.len(), 2);
    // both encoded frames are the (102,102,102) blend, within tier loss
    for frame in &video.frames {
        assert_close(frame.buf()[0], RGB8::new(102, 102, 102), 3);
    }
}

#[test]
fn audio_chunks_interleave_and_expand() {
    let samples: Vec<i16> = (0..800).map(|i| (i * 13 % 2000) as i16).collect();
    let track = AudioTrack::pcm16(samples.clone(), 8_000, 1);
    let frames = (0..8).map(|n| solid(frame_color(n), 16, 16)).collect();
    let settings = Settings { profile: NO_SKIP, ..Settings::default() };
    let bytes = encode_clip(frames, settings, Some(track));

    let video = reader::decode(Cursor::new(&bytes)).unwrap();
    assert_eq!(video.header.audio_size, 800);
    assert_eq!(video.header.sample_rate, 8_000);
    assert_eq!(video.header.channels, 1);
    assert_eq!(video.header.bits_per_sample, 16);
    match &video.audio {
        DecodedAudio::Pcm16(decoded) => {
            assert_eq!(decoded.len(), 800);
            for (&got, &want) in decoded.iter().zip(&samples) {
                let err = (got as u16 as u32).abs_diff(want as u16 as u32);
                assert!(err <= 768, "{want} decoded as {got}");
            }
        }
        _ => panic!("expected 16-bit audio"),
    }
}

#[test]
fn silent_audio_stays_silent() {
    let track = AudioTrack::pcm16(vec![0; 640], 8_000, 1);
    let frames = (0..8).map(|_| solid(RGB8::new(10, 10, 10), 16, 16)).collect();
    let settings = Settings { profile: NO_SKIP, ..Settings::default() };
    let bytes = encode_clip(frames, settings, Some(track));

    match reader::decode(Cursor::new(&bytes)).unwrap().audio {
        DecodedAudio::Pcm16(decoded) => assert!(decoded.iter().all(|&s| s == 0)),
        _ => panic!("expected 16-bit audio"),
    }
}

#[test]
fn rejects_clips_shorter_than_one_gop() {
    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    let t = std::thread::spawn(move || {
        for i in 0..3 {
            c.add_frame_rgb(i, solid(RGB8::new(1, 2, 3), 16, 16)).unwrap();
        }
    });
    let err = w.write_to(Cursor::new(Vec::new()), &mut progress::NoProgress {}).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, Error::TooFewFrames(3, 4)));
}

#[test]
fn rejects_dimensions_not_divisible_by_four() {
    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    let t = std::thread::spawn(move || {
        let _ = c.add_frame_rgb(0, solid(RGB8::new(0, 0, 0), 18, 16));
    });
    let err = w.write_to(Cursor::new(Vec::new()), &mut progress::NoProgress {}).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, Error::WrongSize(_)));
}

#[test]
fn rejects_mismatched_frame_sizes() {
    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    let t = std::thread::spawn(move || {
        let _ = c.add_frame_rgb(0, solid(RGB8::new(0, 0, 0), 16, 16));
        let _ = c.add_frame_rgb(1, solid(RGB8::new(0, 0, 0), 32, 16));
    });
    let err = w.write_to(Cursor::new(Vec::new()), &mut progress::NoProgress {}).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, Error::WrongSize(_)));
}

#[test]
fn fixed_resolution_profiles_reject_other_sizes() {
    let settings = Settings { profile: Profile::GBA_I, ..Settings::default() };
    let (c, w) = new(settings).unwrap();
    let t = std::thread::spawn(move || {
        let _ = c.add_frame_rgb(0, solid(RGB8::new(0, 0, 0), 16, 16));
    });
    let err = w.write_to(Cursor::new(Vec::new()), &mut progress::NoProgress {}).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, Error::WrongSize(_)));
}

#[test]
fn reporter_can_abort_between_frames() {
    struct AbortAfter(u32);
    impl progress::ProgressReporter for AbortAfter {
        fn increase(&mut self) -> bool {
            self.0 -= 1;
            self.0 > 0
        }
    }

    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    let t = std::thread::spawn(move || {
        for i in 0..8 {
            let _ = c.add_frame_rgb(i, solid(frame_color(i), 16, 16));
        }
    });
    let err = w.write_to(Cursor::new(Vec::new()), &mut AbortAfter(3)).unwrap_err();
    t.join().unwrap();
    assert!(matches!(err, Error::Aborted));
}

#[test]
fn write_renames_away_the_temp_file() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("agmv-test-{}.agmv", std::process::id()));
    let tmp = dir.join(format!("agmv-test-{}.agmv.tmp", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    let t = std::thread::spawn(move || {
        for i in 0..4 {
            c.add_frame_rgb(i, solid(frame_color(i), 16, 16)).unwrap();
        }
    });
    w.write(&path, &mut progress::NoProgress {}).unwrap();
    t.join().unwrap();

    assert!(path.exists());
    assert!(!tmp.exists());
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"AGMV");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn failed_encodes_leave_no_file_behind() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("agmv-fail-{}.agmv", std::process::id()));
    let tmp = dir.join(format!("agmv-fail-{}.agmv.tmp", std::process::id()));

    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    drop(c); // no frames at all
    let err = w.write(&path, &mut progress::NoProgress {}).unwrap_err();
    assert!(matches!(err, Error::NoFrames));
    assert!(!path.exists());
    assert!(!tmp.exists());
}

#[test]
fn encode_info_reports_achieved_colors_and_size() {
    let (c, w) = new(Settings { profile: NO_SKIP, ..Settings::default() }).unwrap();
    let t = std::thread::spawn(move || {
        for i in 0..8 {
            c.add_frame_rgb(i, solid(RGB8::new(100, 50, 26), 16, 16)).unwrap();
        }
    });
    let mut out = Cursor::new(Vec::new());
    let info = w.write_to(&mut out, &mut progress::NoProgress {}).unwrap();
    t.join().unwrap();

    assert_eq!(info.encoded_frames, 8);
    assert_eq!(info.palette_colors, 1);
    assert_eq!(info.bytes_written, out.into_inner().len() as u64);
}

/// Walk the container's chunks and return each frame payload's compressed size.
fn frame_chunk_sizes(bytes: &[u8]) -> Vec<usize> {
    let mut sizes = Vec::new();
    // dual-palette header: 38 byte record + two palettes
    let mut pos = 38 + 2 * 256 * 3;
    while pos < bytes.len() {
        let magic = &bytes[pos..pos + 4];
        if magic == b"AGFC" {
            let csize = u32::from_le_bytes(bytes[pos + 12..pos + 16].try_into().unwrap()) as usize;
            sizes.push(csize);
            pos += 16 + csize + 8;
        } else if magic == b"AGAC" {
            let len = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
            pos += 8 + len;
        } else {
            panic!("unexpected chunk magic {magic:?}");
        }
    }
    sizes
}
