//! Sample-rate and channel conversion for decoded clips.
//!
//! Clips are short, so the whole buffer is converted once with Rubato's sinc resampler
//! before playback starts instead of streaming through a resampler thread.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::DecodedClip;

/// Input frames fed to the resampler per call.
const CHUNK_FRAMES: usize = 1024;

/// Zero chunks allowed after the input runs out while draining the filter delay.
const MAX_FLUSH_CHUNKS: usize = 8;

/// Convert `clip` into interleaved samples for an output with `channels` at `rate`.
pub fn prepare_for_output(clip: &DecodedClip, channels: usize, rate: u32) -> Result<Vec<f32>> {
    let mapped = map_channels(&clip.samples, clip.channels, channels);
    resample_clip(&mapped, channels, clip.sample_rate, rate)
}

/// Remap interleaved frames from `src_channels` to `dst_channels`.
///
/// - mono to stereo: duplicate channel 0
/// - stereo to mono: average L/R
/// - other layouts: clamp to the last available source channel
pub fn map_channels(samples: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels || src_channels == 0 || dst_channels == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in samples.chunks_exact(src_channels) {
        for dst_ch in 0..dst_channels {
            let sample = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                _ => frame[dst_ch.min(src_channels - 1)],
            };
            out.push(sample);
        }
    }
    out
}

/// Resample interleaved frames from `from_rate` to `to_rate`.
///
/// The output holds exactly `in_frames * to_rate / from_rate` frames, aligned with the input
/// (the filter delay is trimmed off the front).
pub fn resample_clip(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || channels == 0 {
        return Ok(samples.to_vec());
    }
    let in_frames = samples.len() / channels;
    if in_frames == 0 {
        return Ok(Vec::new());
    }

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let mut resampler = Async::<f32>::new_sinc(
        to_rate as f64 / from_rate as f64,
        1.1,
        &params,
        CHUNK_FRAMES,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init: {e}"))?;

    let expected = (in_frames as u64 * to_rate as u64 / from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let wanted = (delay + expected) * channels;

    let mut chunk = vec![0.0f32; CHUNK_FRAMES * channels];
    let mut produced = vec![0.0f32; resampler.output_frames_max() * channels];
    let mut out = Vec::with_capacity(wanted);
    let mut pos = 0;
    let mut flushed = 0;

    while out.len() < wanted {
        let take = in_frames.saturating_sub(pos).min(CHUNK_FRAMES);
        if take == 0 {
            if flushed == MAX_FLUSH_CHUNKS {
                break;
            }
            flushed += 1;
        }
        chunk[..take * channels]
            .copy_from_slice(&samples[pos * channels..(pos + take) * channels]);
        chunk[take * channels..].fill(0.0);
        pos += take;

        let input = InterleavedSlice::new(&chunk, channels, CHUNK_FRAMES)
            .map_err(|e| anyhow!("resampler input: {e}"))?;
        let out_capacity = produced.len() / channels;
        let mut output = InterleavedSlice::new_mut(&mut produced, channels, out_capacity)
            .map_err(|e| anyhow!("resampler output: {e}"))?;
        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input, &mut output, None)
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        out.extend_from_slice(&produced[..nbr_out * channels]);
    }

    let start = (delay * channels).min(out.len());
    let end = wanted.min(out.len());
    Ok(out[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        assert_eq!(map_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        assert_eq!(map_channels(&[0.25, 0.75, -1.0, 1.0], 2, 1), vec![0.5, 0.0]);
    }

    #[test]
    fn wider_layout_clamps_to_last_channel() {
        assert_eq!(map_channels(&[1.0, 2.0], 2, 4), vec![1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn same_rate_is_identity() {
        let samples = vec![0.5, -0.5, 0.25];
        assert_eq!(resample_clip(&samples, 1, 24_000, 24_000).unwrap(), samples);
    }

    #[test]
    fn output_length_follows_rate_ratio() {
        let up = resample_clip(&sine(440.0, 24_000, 2_400), 1, 24_000, 48_000).unwrap();
        assert_eq!(up.len(), 4_800);

        let stereo = map_channels(&sine(440.0, 48_000, 4_800), 1, 2);
        let down = resample_clip(&stereo, 2, 48_000, 44_100).unwrap();
        assert_eq!(down.len(), 4_410 * 2);
    }

    #[test]
    fn tone_above_target_nyquist_is_filtered() {
        let input = sine(10_000.0, 48_000, 9_600);
        assert!(rms(&input) > 0.7);

        let out = resample_clip(&input, 1, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 3_200);
        assert!(rms(&out[200..3_000]) < 0.05, "10 kHz leaked through");
    }

    #[test]
    fn in_band_tone_keeps_its_level() {
        let input = sine(1_000.0, 48_000, 9_600);
        let out = resample_clip(&input, 1, 48_000, 16_000).unwrap();
        let level = rms(&out[200..3_000]);
        assert!((level - 0.707).abs() < 0.05, "rms {level}");
    }

    #[test]
    fn prepare_for_output_maps_then_resamples() {
        let clip = DecodedClip {
            samples: vec![0.5; 800],
            channels: 1,
            sample_rate: 8_000,
        };
        let out = prepare_for_output(&clip, 2, 16_000).unwrap();
        assert_eq!(out.len(), 1_600 * 2);
        for frame in out[400..2_800].chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
            assert!((frame[0] - 0.5).abs() < 0.02, "sample {}", frame[0]);
        }
    }
}
