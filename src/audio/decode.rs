//! Container decoding to mono PCM.
//!
//! [`MonoStream`] wraps symphonia's format detection and decode loop and hands out one
//! packet of mono samples at a time, positioned on the source timeline, so
//! exports never hold more than a packet in memory. [`decode_mono`] collects
//! a stream (optionally only a prefix) for analysis.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

/// Mono audio decoded from a media file at the track's native rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Length of the whole track in seconds, not just the decoded prefix
    pub duration_secs: f64,
}

impl DecodedAudio {
    /// Seconds of audio actually held in `samples`.
    pub fn decoded_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// One decoded packet, downmixed to mono.
#[derive(Debug)]
pub struct MonoBlock<'a> {
    /// Source frame index of `samples[0]`
    pub first_frame: u64,
    pub samples: &'a [f32],
}

fn unreadable(path: &Path, message: impl std::fmt::Display) -> PipelineError {
    PipelineError::FileUnreadable {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Packet-by-packet mono decoder over the first audio track of a file.
///
/// Blocking; use from `spawn_blocking` in async code.
pub struct MonoStream {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    time_base: Option<TimeBase>,
    declared_frames: Option<u64>,
    end_ts: u64,
    mono: Vec<f32>,
}

impl MonoStream {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| unreadable(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| unreadable(path, format!("unrecognized container: {}", e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PipelineError::NoAudioTrack {
                path: path.display().to_string(),
            })?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params
            .sample_rate
            .filter(|&rate| rate > 0)
            .ok_or_else(|| PipelineError::NoAudioTrack {
                path: path.display().to_string(),
            })?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| unreadable(path, format!("unsupported codec: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            sample_rate,
            time_base: params.time_base,
            declared_frames: params.n_frames,
            end_ts: 0,
            mono: Vec::new(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Source frame index at `secs` seconds.
    pub fn frame_at(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Move close to `secs` so the next block starts at or before it.
    ///
    /// Returns false when the container cannot seek; the stream then keeps
    /// its position.
    pub fn seek(&mut self, secs: f64) -> bool {
        let to = SeekTo::Time {
            time: Time::from(secs.max(0.0)),
            track_id: Some(self.track_id),
        };
        match self.format.seek(SeekMode::Accurate, to) {
            Ok(seeked) => {
                self.decoder.reset();
                tracing::trace!(
                    path = %self.path.display(),
                    required = seeked.required_ts,
                    actual = seeked.actual_ts,
                    "seeked"
                );
                true
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "seek failed, decoding from current position");
                false
            }
        }
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(unreadable(&self.path, format!("demux: {}", e))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            self.end_ts = self.end_ts.max(packet.ts() + packet.dur());
            return Ok(Some(packet));
        }
    }

    fn frame_of_ts(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                self.frame_at(time.seconds as f64 + time.frac)
            }
            None => ts,
        }
    }

    /// Decode the next packet; `None` at the end of the track.
    ///
    /// Corrupt packets are skipped, leaving a gap in the frame positions.
    pub fn next_block(&mut self) -> Result<Option<MonoBlock<'_>>> {
        loop {
            let Some(packet) = self.next_packet()? else {
                return Ok(None);
            };

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = %e, path = %self.path.display(), "skipping corrupt audio frame");
                    continue;
                }
                Err(e) => return Err(unreadable(&self.path, format!("decode: {}", e))),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let channels = spec.channels.count().max(1);
            let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            self.mono.clear();
            self.mono.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );

            let first_frame = self.frame_of_ts(packet.ts());
            return Ok(Some(MonoBlock {
                first_frame,
                samples: &self.mono,
            }));
        }
    }

    /// Walk the remaining packets without decoding when the container does
    /// not declare its length, so [`Self::duration_secs`] stays exact.
    pub fn finish_length(&mut self) -> Result<()> {
        if self.declared_frames.is_some() {
            return Ok(());
        }
        while self.next_packet()?.is_some() {}
        Ok(())
    }

    /// Length of the whole track, given how many frames were decoded.
    pub fn duration_secs(&self, decoded_frames: usize) -> f64 {
        let rate = self.sample_rate as f64;
        match (self.declared_frames, self.time_base) {
            (Some(frames), _) => frames as f64 / rate,
            (None, Some(tb)) if self.end_ts > 0 => {
                let time = tb.calc_time(self.end_ts);
                time.seconds as f64 + time.frac
            }
            _ if self.end_ts > 0 => self.end_ts as f64 / rate,
            _ => decoded_frames as f64 / rate,
        }
    }
}

/// Decode the first audio track of `path` to mono.
///
/// With `max_secs`, decoding stops once that much audio is held.
/// Blocking; call from `spawn_blocking` in async code.
pub fn decode_mono(path: &Path, max_secs: Option<f64>) -> Result<DecodedAudio> {
    let mut stream = MonoStream::open(path)?;
    let sample_limit =
        max_secs.map(|secs| (secs.max(0.0) * stream.sample_rate() as f64).ceil() as usize);
    let mut samples: Vec<f32> = Vec::new();

    while let Some(block) = stream.next_block()? {
        samples.extend_from_slice(block.samples);
        if let Some(limit) = sample_limit
            && samples.len() >= limit
        {
            samples.truncate(limit);
            stream.finish_length()?;
            break;
        }
    }

    Ok(DecodedAudio {
        duration_secs: stream.duration_secs(samples.len()),
        sample_rate: stream.sample_rate(),
        samples,
    })
}
