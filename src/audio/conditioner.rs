use std::collections::VecDeque;

use rubato::{
    Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::RecordingError;

// Output chunk size: 100ms at the target rate.
const RESAMPLER_CHUNK_OUT: usize = 1600;

/// Convert one normalized sample to S16LE.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Accumulates device-rate mono samples and produces chunks at the engine's
/// fixed rate. When the device already runs at the target rate the buffer is
/// passed through untouched.
pub struct AudioConditioner {
    resampler: Option<SincFixedOut<f32>>,
    buffer: VecDeque<f32>,
    scratch_in: Vec<f32>,
}

impl AudioConditioner {
    pub fn new(in_sample_rate: usize, out_sample_rate: usize) -> Result<Self, RecordingError> {
        let resampler = if in_sample_rate != out_sample_rate {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };

            log::info!(
                "Configuring resampler: {} Hz -> {} Hz",
                in_sample_rate,
                out_sample_rate
            );

            Some(
                SincFixedOut::<f32>::new(
                    out_sample_rate as f64 / in_sample_rate as f64,
                    2.0,
                    params,
                    RESAMPLER_CHUNK_OUT,
                    1,
                )
                .map_err(|e| RecordingError::Conditioning(e.to_string()))?,
            )
        } else {
            log::debug!(
                "Resampler not needed ({} Hz input matches target)",
                in_sample_rate
            );
            None
        };

        Ok(Self {
            resampler,
            buffer: VecDeque::with_capacity(8192),
            scratch_in: Vec::with_capacity(4096),
        })
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.buffer.extend(samples.iter());
    }

    /// Convert every complete chunk buffered so far into `out`.
    pub fn drain_into(&mut self, out: &mut Vec<i16>) -> Result<(), RecordingError> {
        loop {
            if let Some(resampler) = &mut self.resampler {
                let needed = resampler.input_frames_next();
                if self.buffer.len() < needed {
                    break;
                }

                self.scratch_in.clear();
                let (front, back) = self.buffer.as_slices();
                let front_take = front.len().min(needed);
                self.scratch_in.extend_from_slice(&front[..front_take]);
                if front_take < needed && !back.is_empty() {
                    let back_take = (needed - front_take).min(back.len());
                    self.scratch_in.extend_from_slice(&back[..back_take]);
                }
                self.buffer.drain(..needed);

                let resampled = resampler
                    .process(&[&self.scratch_in], None)
                    .map_err(|e| RecordingError::Conditioning(e.to_string()))?;
                out.extend(resampled[0].iter().copied().map(f32_to_i16));
            } else {
                out.extend(self.buffer.drain(..).map(f32_to_i16));
                break;
            }
        }

        if self.buffer.capacity() > 16384 && self.buffer.len() < 1024 {
            self.buffer.shrink_to_fit();
        }

        Ok(())
    }

    /// Drain the remaining tail, zero-padding the final resampler frame.
    pub fn flush_into(&mut self, out: &mut Vec<i16>) -> Result<(), RecordingError> {
        if let Some(resampler) = &mut self.resampler {
            if !self.buffer.is_empty() {
                let needed = resampler.input_frames_next();
                let mut tail: Vec<f32> = self.buffer.drain(..).collect();
                if tail.len() < needed {
                    tail.resize(needed, 0.0);
                }

                let resampled = resampler
                    .process(&[&tail], None)
                    .map_err(|e| RecordingError::Conditioning(e.to_string()))?;
                for chunk in resampled {
                    out.extend(chunk.iter().copied().map(f32_to_i16));
                }
            }
        } else if !self.buffer.is_empty() {
            out.extend(self.buffer.drain(..).map(f32_to_i16));
        }

        Ok(())
    }
}
