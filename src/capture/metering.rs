//! Audio level metering
//!
//! Computes per-channel average (RMS) and peak power for audio samples and
//! publishes them on a side channel. Metering never sits on the recording
//! path: readings are best-effort and dropped when nobody listens.

use super::source::{DroppedFrame, SampleSink};
use crate::media::{AudioFormat, MediaSample, MediaTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Floor reported for digital silence
pub const SILENCE_DB: f32 = -160.0;

/// Power of one channel in dBFS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelLevel {
    pub average_db: f32,
    pub peak_db: f32,
}

/// Levels for one audio sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReading {
    pub pts: MediaTime,
    pub channels: Vec<ChannelLevel>,
}

fn to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * amplitude.log10()).max(SILENCE_DB)
    }
}

/// Measure interleaved 16-bit PCM
///
/// Returns one level per channel, normalized to full scale.
pub fn measure_levels(raw_samples: &[u8], format: AudioFormat) -> Vec<ChannelLevel> {
    let channels = format.channels.max(1) as usize;
    let mut sum_squares = vec![0.0f64; channels];
    let mut peaks = vec![0.0f32; channels];
    let mut frames = 0usize;

    for frame in raw_samples.chunks_exact(channels * AudioFormat::BYTES_PER_SAMPLE) {
        for (channel, bytes) in frame.chunks_exact(AudioFormat::BYTES_PER_SAMPLE).enumerate() {
            let value = i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32;
            sum_squares[channel] += (value as f64) * (value as f64);
            peaks[channel] = peaks[channel].max(value.abs());
        }
        frames += 1;
    }

    (0..channels)
        .map(|channel| {
            let rms = if frames > 0 {
                (sum_squares[channel] / frames as f64).sqrt() as f32
            } else {
                0.0
            };
            ChannelLevel {
                average_db: to_db(rms),
                peak_db: to_db(peaks[channel]),
            }
        })
        .collect()
}

/// Publishes level readings for audio samples
pub struct AudioLevelMeter {
    tx: broadcast::Sender<LevelReading>,
}

impl AudioLevelMeter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe to level readings
    pub fn subscribe(&self) -> broadcast::Receiver<LevelReading> {
        self.tx.subscribe()
    }

    /// Meter one sample; video samples are ignored
    pub fn meter(&self, sample: &MediaSample) {
        let Some(format) = sample.audio_format() else {
            return;
        };
        if self.tx.receiver_count() == 0 {
            return;
        }
        let reading = LevelReading {
            pts: sample.pts,
            channels: measure_levels(&sample.payload, format),
        };
        let _ = self.tx.send(reading);
    }
}

impl Default for AudioLevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Meters audio on its way to another sink
pub struct MeteredSink {
    inner: Arc<dyn SampleSink>,
    meter: Arc<AudioLevelMeter>,
}

impl MeteredSink {
    pub fn new(inner: Arc<dyn SampleSink>, meter: Arc<AudioLevelMeter>) -> Self {
        Self { inner, meter }
    }
}

impl SampleSink for MeteredSink {
    fn on_sample(&self, sample: MediaSample) {
        self.meter.meter(&sample);
        self.inner.on_sample(sample);
    }

    fn on_dropped_frame(&self, dropped: DroppedFrame) {
        self.inner.on_dropped_frame(dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PooledBuffer;

    fn pcm(frames: &[(i16, i16)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (l, r) in frames {
            bytes.extend_from_slice(&l.to_le_bytes());
            bytes.extend_from_slice(&r.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_measure_silence() {
        let levels = measure_levels(&pcm(&[(0, 0); 64]), AudioFormat::new(48_000, 2));
        assert_eq!(levels.len(), 2);
        assert!(levels.iter().all(|l| l.peak_db == SILENCE_DB && l.average_db == SILENCE_DB));
    }

    #[test]
    fn test_measure_full_scale_left_only() {
        let levels = measure_levels(
            &pcm(&[(i16::MAX, 0), (i16::MAX, 0)]),
            AudioFormat::new(48_000, 2),
        );
        assert!(levels[0].peak_db.abs() < 0.01);
        assert!(levels[0].average_db.abs() < 0.01);
        assert_eq!(levels[1].peak_db, SILENCE_DB);
    }

    #[test]
    fn test_meter_publishes_only_audio() {
        let meter = AudioLevelMeter::new();
        let mut rx = meter.subscribe();

        let half = i16::MAX / 2;
        let sample = MediaSample::audio(
            MediaTime::new(5, 10),
            PooledBuffer::detached(pcm(&[(half, half); 8])),
            AudioFormat::new(48_000, 2),
        );
        meter.meter(&sample);

        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.pts, MediaTime::new(1, 2));
        assert!((reading.channels[0].peak_db + 6.02).abs() < 0.1);
        assert!(rx.try_recv().is_err());
    }
}
