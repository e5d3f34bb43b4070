//! Fragmented MP4 muxer for H.264 video and AAC/PCM audio tracks.
//!
//! # File Structure
//!
//! ```text
//! ftyp                      written by start()
//! moov                      mvhd, one trak per track, mvex/trex
//! moof + mdat               one fragment per ~fragment_duration,
//! moof + mdat               one traf per track with samples
//! ...
//! ```
//!
//! Each track keeps its newest sample back until the next one arrives so
//! the sample duration is known when the sample is committed to a fragment.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use screenrec_codec::nal::{annex_b_to_avcc, split_annex_b};
use screenrec_codec::{AudioCodec, BufferFlags, MediaFormat};
use tracing::{debug, warn};

use crate::error::MuxerError;
use crate::muxer::{check_orientation, Muxer, MuxerState, TrackIndex};

/// Media timescale of video tracks (ticks per second).
pub const VIDEO_TIMESCALE: u32 = 90_000;
/// Movie header timescale.
const MOVIE_TIMESCALE: u32 = 1000;
/// Default span of one moof/mdat fragment.
pub const DEFAULT_FRAGMENT_DURATION: Duration = Duration::from_secs(1);

/// Sample flags for a sync sample: depends_on = 2 (no other).
const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
/// Sample flags for a dependent sample: depends_on = 1, non-sync.
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// tkhd/mvhd transformation matrix for a clockwise display rotation.
fn rotation_matrix(degrees: u32) -> [u32; 9] {
    const ONE: u32 = 0x0001_0000;
    const MINUS_ONE: u32 = 0xFFFF_0000;
    const W: u32 = 0x4000_0000;
    match degrees {
        90 => [0, ONE, 0, MINUS_ONE, 0, 0, 0, 0, W],
        180 => [MINUS_ONE, 0, 0, 0, MINUS_ONE, 0, 0, 0, W],
        270 => [0, MINUS_ONE, 0, ONE, 0, 0, 0, 0, W],
        _ => [ONE, 0, 0, 0, ONE, 0, 0, 0, W],
    }
}

fn write_box(buf: &mut Vec<u8>, box_type: &[u8; 4], content: impl FnOnce(&mut Vec<u8>)) {
    let start = buf.len();
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(box_type);
    content(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(
    buf: &mut Vec<u8>,
    box_type: &[u8; 4],
    version: u8,
    flags: u32,
    content: impl FnOnce(&mut Vec<u8>),
) {
    write_box(buf, box_type, |b| {
        b.push(version);
        b.extend_from_slice(&flags.to_be_bytes()[1..]);
        content(b);
    });
}

/// MPEG-4 descriptor with a 4-byte length field.
fn write_descriptor(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    let len = content.len() as u32;
    buf.push(tag);
    buf.extend_from_slice(&[
        0x80 | ((len >> 21) & 0x7F) as u8,
        0x80 | ((len >> 14) & 0x7F) as u8,
        0x80 | ((len >> 7) & 0x7F) as u8,
        (len & 0x7F) as u8,
    ]);
    buf.extend_from_slice(content);
}

/// Raw NAL payload of a parameter set given with or without a start code.
fn parameter_set(csd: &[u8]) -> Vec<u8> {
    split_annex_b(csd)
        .first()
        .map_or_else(|| csd.to_vec(), |nal| nal.to_vec())
}

#[derive(Debug, Clone)]
enum SampleEntryKind {
    Avc {
        width: u32,
        height: u32,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Aac {
        sample_rate: u32,
        channels: u16,
        bit_rate: u32,
        config: Vec<u8>,
    },
    Pcm {
        sample_rate: u32,
        channels: u16,
    },
}

impl SampleEntryKind {
    fn from_format(format: &MediaFormat) -> Result<Self, MuxerError> {
        match format {
            MediaFormat::Video(video) => {
                if video.width == 0
                    || video.height == 0
                    || video.width > u16::MAX as u32
                    || video.height > u16::MAX as u32
                {
                    return Err(MuxerError::UnsupportedFormat(format!(
                        "video size {}x{}",
                        video.width, video.height
                    )));
                }
                let [sps, pps, ..] = video.csd.as_slice() else {
                    return Err(MuxerError::MissingCodecConfig(
                        "video/avc needs SPS in csd-0 and PPS in csd-1".to_string(),
                    ));
                };
                Ok(Self::Avc {
                    width: video.width,
                    height: video.height,
                    sps: parameter_set(sps),
                    pps: parameter_set(pps),
                })
            }
            MediaFormat::Audio(audio) => {
                if audio.sample_rate == 0 || audio.sample_rate > u16::MAX as u32 {
                    return Err(MuxerError::UnsupportedFormat(format!(
                        "audio sample rate {}",
                        audio.sample_rate
                    )));
                }
                match audio.codec {
                    AudioCodec::Aac => {
                        let config = audio.csd.first().cloned().ok_or_else(|| {
                            MuxerError::MissingCodecConfig(
                                "audio/mp4a-latm needs AudioSpecificConfig in csd-0".to_string(),
                            )
                        })?;
                        Ok(Self::Aac {
                            sample_rate: audio.sample_rate,
                            channels: audio.channel_count,
                            bit_rate: audio.bit_rate,
                            config,
                        })
                    }
                    AudioCodec::Pcm16 => Ok(Self::Pcm {
                        sample_rate: audio.sample_rate,
                        channels: audio.channel_count.max(1),
                    }),
                }
            }
        }
    }

    fn is_video(&self) -> bool {
        matches!(self, Self::Avc { .. })
    }

    fn timescale(&self) -> u32 {
        match self {
            Self::Avc { .. } => VIDEO_TIMESCALE,
            Self::Aac { sample_rate, .. } | Self::Pcm { sample_rate, .. } => *sample_rate,
        }
    }

    /// Duration used for a track's only sample.
    fn default_duration(&self, sample_len: usize) -> u32 {
        match self {
            Self::Avc { .. } => VIDEO_TIMESCALE / 30,
            Self::Aac { .. } => 1024,
            Self::Pcm { channels, .. } => (sample_len / (2 * usize::from(*channels))) as u32,
        }
    }
}

#[derive(Debug, Clone)]
struct SampleRecord {
    duration: u32,
    size: u32,
    flags: u32,
}

#[derive(Debug)]
struct HeldSample {
    data: Vec<u8>,
    decode_time: u64,
    is_sync: bool,
}

#[derive(Debug)]
struct Track {
    id: u32,
    kind: SampleEntryKind,
    held: Option<HeldSample>,
    samples: Vec<SampleRecord>,
    data: Vec<u8>,
    fragment_base: u64,
    next_decode_time: u64,
    last_duration: u32,
    committed: u64,
}

impl Track {
    fn new(id: u32, kind: SampleEntryKind) -> Self {
        Self {
            id,
            kind,
            held: None,
            samples: Vec::new(),
            data: Vec::new(),
            fragment_base: 0,
            next_decode_time: 0,
            last_duration: 0,
            committed: 0,
        }
    }

    fn to_track_time(&self, relative_us: i64) -> u64 {
        (relative_us.max(0) as u128 * u128::from(self.kind.timescale()) / 1_000_000) as u64
    }

    /// Hold `sample` back and commit the previously held one.
    fn push(&mut self, sample: HeldSample) {
        match self.held.replace(sample) {
            Some(previous) => {
                let next_time = self.held.as_ref().map_or(0, |s| s.decode_time);
                let duration = next_time.saturating_sub(previous.decode_time) as u32;
                self.commit(previous, duration);
            }
            None if self.committed == 0 => {
                self.next_decode_time = self.held.as_ref().map_or(0, |s| s.decode_time);
            }
            None => {}
        }
    }

    fn commit(&mut self, sample: HeldSample, duration: u32) {
        if self.samples.is_empty() {
            self.fragment_base = self.next_decode_time;
        }
        self.samples.push(SampleRecord {
            duration,
            size: sample.data.len() as u32,
            flags: if sample.is_sync {
                SYNC_SAMPLE_FLAGS
            } else {
                NON_SYNC_SAMPLE_FLAGS
            },
        });
        self.data.extend_from_slice(&sample.data);
        self.next_decode_time += u64::from(duration);
        self.last_duration = duration;
        self.committed += 1;
    }

    /// Commit the held sample, reusing the previous duration.
    fn finish(&mut self) {
        if let Some(sample) = self.held.take() {
            let duration = if self.last_duration > 0 {
                self.last_duration
            } else {
                self.kind.default_duration(sample.data.len())
            };
            self.commit(sample, duration);
        }
    }
}

/// Fragmented MP4 writer.
///
/// # Example
///
/// ```ignore
/// let mut muxer = Mp4Muxer::create("out.mp4", DEFAULT_FRAGMENT_DURATION)?;
/// let video = muxer.add_track(&format)?;
/// muxer.start()?;
/// muxer.write_sample_data(video, &annex_b, pts_us, BufferFlags::SYNC_FRAME)?;
/// muxer.stop()?;
/// ```
pub struct Mp4Muxer<W: Write + Send = BufWriter<File>> {
    writer: W,
    state: MuxerState,
    tracks: Vec<Track>,
    orientation: u32,
    sequence_number: u32,
    origin_us: Option<i64>,
    fragment_duration_us: i64,
    fragment_start_us: Option<i64>,
}

impl Mp4Muxer<BufWriter<File>> {
    /// Create (or truncate) `path` and write into it.
    pub fn create(path: impl AsRef<Path>, fragment_duration: Duration) -> Result<Self, MuxerError> {
        let file = File::create(path.as_ref())?;
        debug!("muxer: writing {}", path.as_ref().display());
        Ok(Self::new(BufWriter::new(file), fragment_duration))
    }
}

impl<W: Write + Send> Mp4Muxer<W> {
    pub fn new(writer: W, fragment_duration: Duration) -> Self {
        Self {
            writer,
            state: MuxerState::Configured,
            tracks: Vec::new(),
            orientation: 0,
            sequence_number: 1,
            origin_us: None,
            fragment_duration_us: fragment_duration.as_micros().max(1) as i64,
            fragment_start_us: None,
        }
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Samples committed to fragments so far for `track`.
    pub fn samples_written(&self, track: TrackIndex) -> u64 {
        self.tracks.get(track.0).map_or(0, |t| t.committed)
    }

    fn write_ftyp(&self, buf: &mut Vec<u8>) {
        let video = self.tracks.iter().any(|t| t.kind.is_video());
        write_box(buf, b"ftyp", |b| {
            b.extend_from_slice(b"isom"); // major brand
            b.extend_from_slice(&0x200u32.to_be_bytes()); // minor version
            b.extend_from_slice(b"isom");
            b.extend_from_slice(b"iso6");
            b.extend_from_slice(b"mp41");
            if video {
                b.extend_from_slice(b"avc1");
            }
        });
    }

    fn write_moov(&self, buf: &mut Vec<u8>) {
        write_box(buf, b"moov", |b| {
            self.write_mvhd(b);
            for track in &self.tracks {
                self.write_trak(b, track);
            }
            write_box(b, b"mvex", |b| {
                for track in &self.tracks {
                    write_full_box(b, b"trex", 0, 0, |b| {
                        b.extend_from_slice(&track.id.to_be_bytes());
                        b.extend_from_slice(&1u32.to_be_bytes()); // sample description index
                        b.extend_from_slice(&0u32.to_be_bytes()); // default duration
                        b.extend_from_slice(&0u32.to_be_bytes()); // default size
                        b.extend_from_slice(&0u32.to_be_bytes()); // default flags
                    });
                }
            });
        });
    }

    fn write_mvhd(&self, buf: &mut Vec<u8>) {
        write_full_box(buf, b"mvhd", 0, 0, |b| {
            b.extend_from_slice(&0u32.to_be_bytes()); // creation time
            b.extend_from_slice(&0u32.to_be_bytes()); // modification time
            b.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
            b.extend_from_slice(&0u32.to_be_bytes()); // duration, carried by fragments
            b.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
            b.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
            b.extend_from_slice(&[0; 10]); // reserved
            for m in rotation_matrix(0) {
                b.extend_from_slice(&m.to_be_bytes());
            }
            b.extend_from_slice(&[0; 24]); // pre_defined
            let next_track_id = self.tracks.len() as u32 + 1;
            b.extend_from_slice(&next_track_id.to_be_bytes());
        });
    }

    fn write_trak(&self, buf: &mut Vec<u8>, track: &Track) {
        write_box(buf, b"trak", |b| {
            self.write_tkhd(b, track);
            write_box(b, b"mdia", |b| {
                write_full_box(b, b"mdhd", 0, 0, |b| {
                    b.extend_from_slice(&0u32.to_be_bytes()); // creation time
                    b.extend_from_slice(&0u32.to_be_bytes()); // modification time
                    b.extend_from_slice(&track.kind.timescale().to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes()); // duration
                    b.extend_from_slice(&0x55c4u16.to_be_bytes()); // language: und
                    b.extend_from_slice(&0u16.to_be_bytes());
                });
                let (handler, name): (&[u8; 4], &[u8]) = if track.kind.is_video() {
                    (b"vide", b"VideoHandle\0")
                } else {
                    (b"soun", b"SoundHandle\0")
                };
                write_full_box(b, b"hdlr", 0, 0, |b| {
                    b.extend_from_slice(&0u32.to_be_bytes()); // pre_defined
                    b.extend_from_slice(handler);
                    b.extend_from_slice(&[0; 12]);
                    b.extend_from_slice(name);
                });
                write_box(b, b"minf", |b| {
                    if track.kind.is_video() {
                        write_full_box(b, b"vmhd", 0, 1, |b| b.extend_from_slice(&[0; 8]));
                    } else {
                        write_full_box(b, b"smhd", 0, 0, |b| b.extend_from_slice(&[0; 4]));
                    }
                    write_box(b, b"dinf", |b| {
                        write_full_box(b, b"dref", 0, 0, |b| {
                            b.extend_from_slice(&1u32.to_be_bytes());
                            // self-contained
                            write_full_box(b, b"url ", 0, 1, |_| {});
                        });
                    });
                    self.write_stbl(b, track);
                });
            });
        });
    }

    fn write_tkhd(&self, buf: &mut Vec<u8>, track: &Track) {
        // enabled | in movie
        write_full_box(buf, b"tkhd", 0, 3, |b| {
            b.extend_from_slice(&0u32.to_be_bytes()); // creation time
            b.extend_from_slice(&0u32.to_be_bytes()); // modification time
            b.extend_from_slice(&track.id.to_be_bytes());
            b.extend_from_slice(&0u32.to_be_bytes()); // reserved
            b.extend_from_slice(&0u32.to_be_bytes()); // duration
            b.extend_from_slice(&[0; 8]); // reserved
            b.extend_from_slice(&0i16.to_be_bytes()); // layer
            b.extend_from_slice(&0i16.to_be_bytes()); // alternate group
            let volume: u16 = if track.kind.is_video() { 0 } else { 0x0100 };
            b.extend_from_slice(&volume.to_be_bytes());
            b.extend_from_slice(&0u16.to_be_bytes()); // reserved
            for m in rotation_matrix(self.orientation) {
                b.extend_from_slice(&m.to_be_bytes());
            }
            let (width, height) = match &track.kind {
                SampleEntryKind::Avc { width, height, .. } => (*width, *height),
                _ => (0, 0),
            };
            b.extend_from_slice(&(width << 16).to_be_bytes());
            b.extend_from_slice(&(height << 16).to_be_bytes());
        });
    }

    fn write_stbl(&self, buf: &mut Vec<u8>, track: &Track) {
        write_box(buf, b"stbl", |b| {
            write_full_box(b, b"stsd", 0, 0, |b| {
                b.extend_from_slice(&1u32.to_be_bytes()); // entry count
                match &track.kind {
                    SampleEntryKind::Avc {
                        width,
                        height,
                        sps,
                        pps,
                    } => Self::write_avc1(b, *width, *height, sps, pps),
                    SampleEntryKind::Aac {
                        sample_rate,
                        channels,
                        bit_rate,
                        config,
                    } => {
                        Self::write_audio_entry(b, b"mp4a", *sample_rate, *channels, |b| {
                            Self::write_esds(b, track.id, *bit_rate, config)
                        })
                    }
                    SampleEntryKind::Pcm {
                        sample_rate,
                        channels,
                    } => Self::write_audio_entry(b, b"sowt", *sample_rate, *channels, |_| {}),
                }
            });
            // Sample tables live in the fragments.
            write_full_box(b, b"stts", 0, 0, |b| b.extend_from_slice(&0u32.to_be_bytes()));
            write_full_box(b, b"stsc", 0, 0, |b| b.extend_from_slice(&0u32.to_be_bytes()));
            write_full_box(b, b"stsz", 0, 0, |b| b.extend_from_slice(&[0; 8]));
            write_full_box(b, b"stco", 0, 0, |b| b.extend_from_slice(&0u32.to_be_bytes()));
        });
    }

    fn write_avc1(buf: &mut Vec<u8>, width: u32, height: u32, sps: &[u8], pps: &[u8]) {
        write_box(buf, b"avc1", |b| {
            b.extend_from_slice(&[0; 6]); // reserved
            b.extend_from_slice(&1u16.to_be_bytes()); // data reference index
            b.extend_from_slice(&[0; 16]); // pre_defined + reserved
            b.extend_from_slice(&(width as u16).to_be_bytes());
            b.extend_from_slice(&(height as u16).to_be_bytes());
            b.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
            b.extend_from_slice(&0x0048_0000u32.to_be_bytes());
            b.extend_from_slice(&0u32.to_be_bytes()); // reserved
            b.extend_from_slice(&1u16.to_be_bytes()); // frame count
            let mut compressor = [0u8; 32];
            let name = b"screenrec";
            compressor[0] = name.len() as u8;
            compressor[1..1 + name.len()].copy_from_slice(name);
            b.extend_from_slice(&compressor);
            b.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
            b.extend_from_slice(&(-1i16).to_be_bytes()); // pre_defined

            write_box(b, b"avcC", |b| {
                b.push(1); // configuration version
                if sps.len() >= 4 {
                    b.extend_from_slice(&sps[1..4]); // profile, compatibility, level
                } else {
                    b.extend_from_slice(&[0x42, 0xC0, 0x1F]); // constrained baseline 3.1
                }
                b.push(0xFF); // 4-byte NAL lengths
                b.push(0xE1); // one SPS
                b.extend_from_slice(&(sps.len() as u16).to_be_bytes());
                b.extend_from_slice(sps);
                b.push(1); // one PPS
                b.extend_from_slice(&(pps.len() as u16).to_be_bytes());
                b.extend_from_slice(pps);
            });
        });
    }

    fn write_audio_entry(
        buf: &mut Vec<u8>,
        format: &[u8; 4],
        sample_rate: u32,
        channels: u16,
        extra: impl FnOnce(&mut Vec<u8>),
    ) {
        write_box(buf, format, |b| {
            b.extend_from_slice(&[0; 6]); // reserved
            b.extend_from_slice(&1u16.to_be_bytes()); // data reference index
            b.extend_from_slice(&[0; 8]); // reserved
            b.extend_from_slice(&channels.to_be_bytes());
            b.extend_from_slice(&16u16.to_be_bytes()); // sample size
            b.extend_from_slice(&0u16.to_be_bytes()); // pre_defined
            b.extend_from_slice(&0u16.to_be_bytes()); // reserved
            b.extend_from_slice(&(sample_rate << 16).to_be_bytes());
            extra(b);
        });
    }

    fn write_esds(buf: &mut Vec<u8>, track_id: u32, bit_rate: u32, config: &[u8]) {
        write_full_box(buf, b"esds", 0, 0, |b| {
            let mut decoder_config = vec![
                0x40, // Audio ISO/IEC 14496-3
                0x15, // audio stream, upstream = 0, reserved = 1
                0,
                0,
                0, // buffer size
            ];
            decoder_config.extend_from_slice(&bit_rate.to_be_bytes()); // max
            decoder_config.extend_from_slice(&bit_rate.to_be_bytes()); // average
            write_descriptor(&mut decoder_config, 0x05, config);

            let mut es = Vec::new();
            es.extend_from_slice(&(track_id as u16).to_be_bytes());
            es.push(0); // flags
            write_descriptor(&mut es, 0x04, &decoder_config);
            write_descriptor(&mut es, 0x06, &[0x02]); // SL config: predefined MP4

            write_descriptor(b, 0x03, &es);
        });
    }

    /// Serialize every committed sample into one moof + mdat.
    fn write_fragment(&mut self) -> Result<(), MuxerError> {
        let ready: Vec<usize> = (0..self.tracks.len())
            .filter(|&i| !self.tracks[i].samples.is_empty())
            .collect();
        if ready.is_empty() {
            return Ok(());
        }

        // Build the trafs with a zero data_offset, remembering where it goes.
        let mut trafs = Vec::new();
        let mut offset_slots = Vec::new();
        for &i in &ready {
            let track = &self.tracks[i];
            write_box(&mut trafs, b"traf", |b| {
                // default-base-is-moof
                write_full_box(b, b"tfhd", 0, 0x02_0000, |b| {
                    b.extend_from_slice(&track.id.to_be_bytes());
                });
                write_full_box(b, b"tfdt", 1, 0, |b| {
                    b.extend_from_slice(&track.fragment_base.to_be_bytes());
                });
                // data-offset | duration | size | flags | composition offset
                write_full_box(b, b"trun", 0, 0x00_0F01, |b| {
                    b.extend_from_slice(&(track.samples.len() as u32).to_be_bytes());
                    offset_slots.push(b.len());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    for sample in &track.samples {
                        b.extend_from_slice(&sample.duration.to_be_bytes());
                        b.extend_from_slice(&sample.size.to_be_bytes());
                        b.extend_from_slice(&sample.flags.to_be_bytes());
                        b.extend_from_slice(&0u32.to_be_bytes());
                    }
                });
            });
        }

        let mfhd_size = 16;
        let moof_size = 8 + mfhd_size + trafs.len();
        let mut data_offset = moof_size + 8;
        for (&slot, &i) in offset_slots.iter().zip(&ready) {
            trafs[slot..slot + 4].copy_from_slice(&(data_offset as u32).to_be_bytes());
            data_offset += self.tracks[i].data.len();
        }

        let mut buf = Vec::with_capacity(data_offset);
        write_box(&mut buf, b"moof", |b| {
            write_full_box(b, b"mfhd", 0, 0, |b| {
                b.extend_from_slice(&self.sequence_number.to_be_bytes());
            });
            b.extend_from_slice(&trafs);
        });
        write_box(&mut buf, b"mdat", |b| {
            for &i in &ready {
                b.extend_from_slice(&self.tracks[i].data);
            }
        });
        self.writer.write_all(&buf)?;

        for &i in &ready {
            let track = &mut self.tracks[i];
            track.samples.clear();
            track.data.clear();
        }
        debug!(
            "muxer: fragment {} ({} bytes)",
            self.sequence_number,
            buf.len()
        );
        self.sequence_number += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MuxerError> {
        for track in &mut self.tracks {
            track.finish();
        }
        self.write_fragment()?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Muxer for Mp4Muxer<W> {
    fn add_track(&mut self, format: &MediaFormat) -> Result<TrackIndex, MuxerError> {
        self.state.require(MuxerState::Configured, "add_track")?;
        let kind = SampleEntryKind::from_format(format)?;
        let index = self.tracks.len();
        self.tracks.push(Track::new(index as u32 + 1, kind));
        debug!("muxer: track {} is {}", index, format.mime());
        Ok(TrackIndex(index))
    }

    fn set_orientation_hint(&mut self, degrees: u32) -> Result<(), MuxerError> {
        self.state
            .require(MuxerState::Configured, "set_orientation_hint")?;
        self.orientation = check_orientation(degrees)?;
        Ok(())
    }

    fn start(&mut self) -> Result<(), MuxerError> {
        self.state.require(MuxerState::Configured, "start")?;
        if self.tracks.is_empty() {
            return Err(MuxerError::NoTracks);
        }
        let mut buf = Vec::new();
        self.write_ftyp(&mut buf);
        self.write_moov(&mut buf);
        self.writer.write_all(&buf)?;
        self.state = MuxerState::Started;
        debug!("muxer: started with {} tracks", self.tracks.len());
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<(), MuxerError> {
        self.state.require(MuxerState::Started, "write_sample_data")?;
        if track.0 >= self.tracks.len() {
            return Err(MuxerError::UnknownTrack(track.0));
        }
        if data.is_empty() {
            return Ok(());
        }

        let origin = *self.origin_us.get_or_insert(pts_us);
        let fragment_start = *self.fragment_start_us.get_or_insert(pts_us);
        let entry = &mut self.tracks[track.0];
        let (data, is_sync) = if entry.kind.is_video() {
            (annex_b_to_avcc(data), flags.contains(BufferFlags::SYNC_FRAME))
        } else {
            (data.to_vec(), true)
        };
        let decode_time = entry.to_track_time(pts_us - origin);
        entry.push(HeldSample {
            data,
            decode_time,
            is_sync,
        });

        if pts_us - fragment_start >= self.fragment_duration_us {
            self.write_fragment()?;
            self.fragment_start_us = Some(pts_us);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MuxerError> {
        self.state.require(MuxerState::Started, "stop")?;
        self.state = MuxerState::Stopped;
        self.finish()?;
        debug!(
            "muxer: stopped after {} fragments",
            self.sequence_number - 1
        );
        Ok(())
    }
}

impl<W: Write + Send> Drop for Mp4Muxer<W> {
    fn drop(&mut self) {
        if self.state == MuxerState::Started {
            self.state = MuxerState::Stopped;
            if let Err(e) = self.finish() {
                warn!("muxer: flushing unstopped file failed: {}", e);
            }
        }
    }
}

/// Box header located in an MP4 byte stream.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    pub offset: usize,
    pub size: usize,
}

impl BoxHeader {
    /// Bytes after the 8-byte header.
    pub fn content<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.offset + 8;
        let end = (self.offset + self.size).min(data.len());
        data.get(start..end).unwrap_or(&[])
    }
}

/// Top-level boxes of `data`.
pub fn iter_boxes(data: &[u8]) -> Vec<BoxHeader> {
    let mut boxes = Vec::new();
    let mut offset = 0;
    while offset + 8 <= data.len() {
        let size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        if size < 8 {
            break;
        }
        let mut box_type = [0u8; 4];
        box_type.copy_from_slice(&data[offset + 4..offset + 8]);
        boxes.push(BoxHeader {
            box_type,
            offset,
            size: size.min(data.len() - offset),
        });
        offset += size;
    }
    boxes
}

/// Content of the box reached by walking `path` through nested containers.
///
/// Full boxes that contain children (`stsd`, `dref`) are not descended.
pub fn find_box_path<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let (first, rest) = path.split_first()?;
    let header = iter_boxes(data)
        .into_iter()
        .find(|b| &b.box_type == *first)?;
    let content = header.content(data);
    if rest.is_empty() {
        Some(content)
    } else {
        find_box_path(content, rest)
    }
}
