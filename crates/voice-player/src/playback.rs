//! Playback stage (CPAL output stream).
//!
//! Plays one fully decoded clip and blocks the calling thread until the callback has
//! drained it. CPAL streams are not `Send` on every platform, so the stream is built, played
//! and dropped on the same thread.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::decode::DecodedClip;
use crate::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::resample::prepare_for_output;

/// Slack on top of the clip duration before playback is declared stalled.
const STALL_GRACE: Duration = Duration::from_secs(5);
/// Extra wait after the last sample is queued so the device can play it out.
const DRAIN_TAIL: Duration = Duration::from_millis(120);

/// Play `clip` on the device matching `device_name` (or the default device).
pub fn play_clip(clip: &DecodedClip, device_name: Option<&str>) -> Result<()> {
    let host = cpal::default_host();
    let device = pick_device(&host, device_name)?;
    let supported = pick_output_config(&device, clip.sample_rate)?;
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.clone().into();
    if let Some(buffer_size) = pick_buffer_size(&supported) {
        config.buffer_size = buffer_size;
    }

    let channels = config.channels as usize;
    let rate = config.sample_rate;
    let samples = Arc::new(prepare_for_output(clip, channels, rate)?);
    let frames = samples.len() / channels.max(1);
    if frames == 0 {
        return Ok(());
    }
    tracing::debug!(
        channels,
        rate,
        frames,
        src_rate = clip.sample_rate,
        format = ?sample_format,
        "opening output stream"
    );

    let (done_tx, done_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    let stream = build_output_stream(&device, &config, sample_format, samples, done_tx)?;
    stream.play().context("start output stream")?;

    let expected = Duration::from_secs_f64(frames as f64 / rate.max(1) as f64);
    let outcome = match done_rx.recv_timeout(expected + STALL_GRACE) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(anyhow!(
            "playback stalled after {:.1}s",
            (expected + STALL_GRACE).as_secs_f32()
        )),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output stream closed")),
    };
    if outcome.is_ok() {
        std::thread::sleep(buffer_latency(&config.buffer_size, rate) + DRAIN_TAIL);
    }
    drop(stream);
    outcome
}

fn buffer_latency(buffer_size: &cpal::BufferSize, rate: u32) -> Duration {
    match buffer_size {
        cpal::BufferSize::Fixed(frames) if rate > 0 => {
            Duration::from_secs_f64(*frames as f64 / rate as f64)
        }
        _ => Duration::ZERO,
    }
}

/// Build an output stream that writes `samples` once, then signals `done`.
///
/// `samples` must already match the stream's channel count and rate.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    samples: Arc<Vec<f32>>,
    done: Sender<Result<()>>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, samples, done),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, samples, done),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, samples, done),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, samples, done),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: Arc<Vec<f32>>,
    done: Sender<Result<()>>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let err_done = done.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        let _ = err_done.try_send(Err(anyhow!("stream error: {err}")));
    };

    let mut cursor = ClipCursor::new(samples);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if cursor.fill(data) {
                let _ = done.try_send(Ok(()));
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Read position into a clip, shared by the output callback.
struct ClipCursor {
    samples: Arc<Vec<f32>>,
    pos: usize,
    finished: bool,
}

impl ClipCursor {
    fn new(samples: Arc<Vec<f32>>) -> Self {
        Self {
            samples,
            pos: 0,
            finished: false,
        }
    }

    /// Copy the next chunk into `data`, padding with silence. Returns `true` exactly once,
    /// on the call that consumes the last sample.
    fn fill<T>(&mut self, data: &mut [T]) -> bool
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let remaining = self.samples.len().saturating_sub(self.pos);
        let n = remaining.min(data.len());
        for (dst, src) in data[..n]
            .iter_mut()
            .zip(&self.samples[self.pos..self.pos + n])
        {
            *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
        }
        data[n..].fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
        self.pos += n;

        if !self.finished && self.pos >= self.samples.len() {
            self.finished = true;
            return true;
        }
        false
    }
}
