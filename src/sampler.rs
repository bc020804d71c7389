/// Sample acquisition module
///
/// Defines the `SampleSource` seam used by the detector together with two
/// host-side sources: live capture from the default input device and replay
/// of a recorded WAV file.

use crate::sample_buffer::Sample;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

/// Capacity of the capture queue between the audio callback and the loop
pub const CAPTURE_QUEUE_SIZE: usize = 48_000;

/// Full-scale resolution of `Sample`
pub const MAX_RESOLUTION_BITS: u8 = 16;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("No input device available")]
    NoDevice,

    #[error("Input device error: {0}")]
    Device(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("No sample within {0}ms")]
    Timeout(u64),

    #[error("Sample stream exhausted")]
    Exhausted,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Produces one signed sample per request
#[async_trait]
pub trait SampleSource: Send {
    async fn sample(&mut self) -> Result<Sample, AcquisitionError>;

    /// Drop samples captured while the caller was not listening.
    ///
    /// Sources that sample on demand have nothing to drop.
    fn discard_pending(&mut self) {}
}

/// Reduce a full-scale sample to `bits` of resolution
pub fn quantize(sample: Sample, bits: u8) -> Sample {
    let bits = bits.clamp(1, MAX_RESOLUTION_BITS);
    sample >> (MAX_RESOLUTION_BITS - bits)
}

fn f32_to_sample(value: f32) -> Sample {
    (value.clamp(-1.0, 1.0) * Sample::MAX as f32) as Sample
}

fn u16_to_sample(value: u16) -> Sample {
    (i32::from(value) - 32_768) as Sample
}

type CaptureQueue = HeapRb<Sample>;
type CaptureConsumer = <CaptureQueue as Split>::Cons;

/// Live capture from the default input device.
///
/// The audio callback pushes first-channel samples into a lock-free queue;
/// `sample()` pops them one at a time. The returned `cpal::Stream` must be
/// kept alive for as long as the source is used.
pub struct CpalSampleSource {
    consumer: CaptureConsumer,
    ready: Arc<Notify>,
    resolution_bits: u8,
    read_timeout: Duration,
}

impl CpalSampleSource {
    /// Open the default input device and start capturing
    pub fn open(
        resolution_bits: u8,
        read_timeout: Duration,
    ) -> Result<(Self, cpal::Stream), AcquisitionError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AcquisitionError::NoDevice)?;

        let supported = device
            .default_input_config()
            .map_err(|e| AcquisitionError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let channels = usize::from(supported.channels()).max(1);
        let stream_config: cpal::StreamConfig = supported.into();

        info!(
            "Opening input device {} ({:?}, {} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_format,
            stream_config.sample_rate.0,
            channels
        );

        let (mut producer, consumer) = CaptureQueue::new(CAPTURE_QUEUE_SIZE).split();
        let ready = Arc::new(Notify::new());
        let notify = Arc::clone(&ready);
        let on_error = |err: cpal::StreamError| warn!("Input stream error: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    for &s in data.iter().step_by(channels) {
                        let _ = producer.try_push(s);
                    }
                    notify.notify_one();
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &s in data.iter().step_by(channels) {
                        let _ = producer.try_push(f32_to_sample(s));
                    }
                    notify.notify_one();
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    for &s in data.iter().step_by(channels) {
                        let _ = producer.try_push(u16_to_sample(s));
                    }
                    notify.notify_one();
                },
                on_error,
                None,
            ),
            other => return Err(AcquisitionError::UnsupportedFormat(format!("{:?}", other))),
        }
        .map_err(|e| AcquisitionError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AcquisitionError::Device(e.to_string()))?;

        let source = Self {
            consumer,
            ready,
            resolution_bits,
            read_timeout,
        };

        Ok((source, stream))
    }
}

#[async_trait]
impl SampleSource for CpalSampleSource {
    async fn sample(&mut self) -> Result<Sample, AcquisitionError> {
        loop {
            if let Some(sample) = self.consumer.try_pop() {
                return Ok(quantize(sample, self.resolution_bits));
            }

            if tokio::time::timeout(self.read_timeout, self.ready.notified())
                .await
                .is_err()
            {
                return Err(AcquisitionError::Timeout(
                    self.read_timeout.as_millis() as u64,
                ));
            }
        }
    }

    fn discard_pending(&mut self) {
        let dropped = self.consumer.clear();
        trace!("Discarded {} queued samples", dropped);
    }
}

/// Replays the first channel of a WAV recording.
///
/// Replay is not paced in real time, so nothing piles up during a cooldown.
pub struct WavSampleSource {
    samples: VecDeque<Sample>,
    resolution_bits: u8,
}

impl WavSampleSource {
    pub fn open<P: AsRef<Path>>(path: P, resolution_bits: u8) -> Result<Self, AcquisitionError> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels).max(1);

        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .step_by(channels)
                .collect::<Result<VecDeque<_>, _>>()?,
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .step_by(channels)
                .map(|s| s.map(f32_to_sample))
                .collect::<Result<VecDeque<_>, _>>()?,
            (format, bits) => {
                return Err(AcquisitionError::UnsupportedFormat(format!(
                    "{:?} {}-bit",
                    format, bits
                )))
            }
        };

        debug!(
            "Loaded {} samples from {} ({} Hz)",
            samples.len(),
            path.as_ref().display(),
            spec.sample_rate
        );

        Ok(Self {
            samples,
            resolution_bits,
        })
    }

    /// Samples left to replay
    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

#[async_trait]
impl SampleSource for WavSampleSource {
    async fn sample(&mut self) -> Result<Sample, AcquisitionError> {
        self.samples
            .pop_front()
            .map(|s| quantize(s, self.resolution_bits))
            .ok_or(AcquisitionError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(1024, 16), 1024);
        assert_eq!(quantize(1024, 10), 16);
        assert_eq!(quantize(-1024, 10), -16);
        assert_eq!(quantize(i16::MAX, 10), 511);
        assert_eq!(quantize(i16::MIN, 10), -512);
    }

    #[test]
    fn test_format_conversion() {
        assert_eq!(f32_to_sample(0.0), 0);
        assert_eq!(f32_to_sample(1.0), i16::MAX);
        assert_eq!(f32_to_sample(4.0), i16::MAX);
        assert_eq!(u16_to_sample(32_768), 0);
        assert_eq!(u16_to_sample(0), i16::MIN);
    }

    #[tokio::test]
    async fn test_wav_replay_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claps.wav");
        write_wav(&path, 1, &[5, -7, 9]);

        let mut source = WavSampleSource::open(&path, MAX_RESOLUTION_BITS).unwrap();
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.sample().await.unwrap(), 5);
        assert_eq!(source.sample().await.unwrap(), -7);
        assert_eq!(source.sample().await.unwrap(), 9);

        match source.sample().await {
            Err(AcquisitionError::Exhausted) => {}
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wav_keeps_first_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, &[1, 100, 2, 200, 3, 300]);

        let mut source = WavSampleSource::open(&path, MAX_RESOLUTION_BITS).unwrap();
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.sample().await.unwrap(), 1);
        assert_eq!(source.sample().await.unwrap(), 2);
    }

    #[test]
    fn test_missing_wav_file() {
        let result = WavSampleSource::open("does/not/exist.wav", 10);
        assert!(matches!(result, Err(AcquisitionError::Wav(_))));
    }
}
