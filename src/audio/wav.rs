//! PCM helpers for exports: sample conversion, streaming resampling and WAV writing.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};

/// Convert a float sample in [-1.0, 1.0] to 16-bit PCM.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Convert float samples to 16-bit PCM.
pub fn to_pcm16_vec(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| to_pcm16(s)).collect()
}

/// Streaming linear-interpolation resampler.
///
/// Output sample `j` sits at input position `j * from / to`; it is emitted
/// once the input sample after that position has arrived, so blocks can be
/// pushed as they are decoded.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    ratio: f64,
    received: u64,
    emitted: u64,
    previous: f32,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            ratio: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            received: 0,
            emitted: 0,
            previous: 0.0,
        }
    }

    fn next_position(&self) -> f64 {
        self.emitted as f64 * self.ratio
    }

    /// Feed input samples, appending every output sample now computable.
    pub fn push(&mut self, input: &[f32], out: &mut Vec<f32>) {
        for &sample in input {
            if self.received > 0 {
                let left = (self.received - 1) as f64;
                while self.next_position() < self.received as f64 {
                    let fraction = (self.next_position() - left) as f32;
                    out.push(self.previous + (sample - self.previous) * fraction);
                    self.emitted += 1;
                }
            }
            self.previous = sample;
            self.received += 1;
        }
    }

    /// Emit the output samples that fall after the last input sample.
    pub fn finish(&mut self, out: &mut Vec<f32>) {
        if self.received == 0 {
            return;
        }
        while self.next_position() < self.received as f64 {
            out.push(self.previous);
            self.emitted += 1;
        }
    }
}

/// Incremental 16-bit mono WAV writer with on-the-fly resampling.
pub struct StreamingWavWriter {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    resampler: LinearResampler,
    scratch: Vec<f32>,
    path: PathBuf,
    frames_written: u64,
}

impl StreamingWavWriter {
    /// Create `path` for audio arriving at `input_rate`, written at `output_rate`.
    pub fn create(path: &Path, input_rate: u32, output_rate: u32) -> Result<Self> {
        let writer = hound::WavWriter::create(path, mono_spec(output_rate))
            .map_err(|e| wav_error(path, e))?;
        Ok(Self {
            writer,
            resampler: LinearResampler::new(input_rate, output_rate),
            scratch: Vec::new(),
            path: path.to_path_buf(),
            frames_written: 0,
        })
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.scratch.clear();
        self.resampler.push(samples, &mut self.scratch);
        self.flush_scratch()
    }

    fn flush_scratch(&mut self) -> Result<()> {
        for &sample in &self.scratch {
            self.writer
                .write_sample(to_pcm16(sample))
                .map_err(|e| wav_error(&self.path, e))?;
        }
        self.frames_written += self.scratch.len() as u64;
        Ok(())
    }

    /// Flush the resampler tail and finalize the header; returns frames written.
    pub fn finish(mut self) -> Result<u64> {
        self.scratch.clear();
        self.resampler.finish(&mut self.scratch);
        self.flush_scratch()?;
        let path = self.path;
        self.writer.finalize().map_err(|e| wav_error(&path, e))?;
        Ok(self.frames_written)
    }
}

fn mono_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn wav_error(path: &Path, e: hound::Error) -> PipelineError {
    PipelineError::ExportFailed {
        message: format!("Failed to write WAV {}: {}", path.display(), e),
    }
}

/// Write 16-bit mono PCM to a WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let mut writer =
        hound::WavWriter::create(path, mono_spec(sample_rate)).map_err(|e| wav_error(path, e))?;
    for &sample in samples {
        writer.write_sample(sample).map_err(|e| wav_error(path, e))?;
    }
    writer.finalize().map_err(|e| wav_error(path, e))?;
    Ok(())
}
