use cpal::traits::HostTrait;
use rodio::{OutputStream, Sink};
use std::time::Duration;
use tracing::debug;

use crate::instructions::Priority;

const SAMPLE_RATE: u32 = 44100;

/// One sine blip, followed by `gap_ms` of silence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f32,
    pub duration_ms: u64,
    pub volume: f32,
    pub gap_ms: u64,
}

/// Short cue that tells the user how urgent the next announcement is.
pub fn earcon_for(priority: Priority, volume: f32) -> Vec<Tone> {
    match priority {
        Priority::High => vec![
            Tone {
                frequency: 1400.0,
                duration_ms: 100,
                volume,
                gap_ms: 60,
            },
            Tone {
                frequency: 1400.0,
                duration_ms: 100,
                volume,
                gap_ms: 0,
            },
        ],
        Priority::Medium => vec![Tone {
            frequency: 900.0,
            duration_ms: 120,
            volume,
            gap_ms: 0,
        }],
        Priority::Low => vec![Tone {
            frequency: 600.0,
            duration_ms: 90,
            volume: volume.min(0.1),
            gap_ms: 0,
        }],
    }
}

/// Mono samples for a sequence of tones.
pub fn render(tones: &[Tone]) -> Vec<f32> {
    let samples_per_ms = SAMPLE_RATE as f64 / 1000.0;
    let mut samples = Vec::new();
    for tone in tones {
        let total = (tone.duration_ms as f64 * samples_per_ms) as usize;
        for i in 0..total {
            let t = i as f32 / SAMPLE_RATE as f32;
            samples.push((2.0 * std::f32::consts::PI * tone.frequency * t).sin() * tone.volume);
        }
        let silence = (tone.gap_ms as f64 * samples_per_ms) as usize;
        samples.extend(std::iter::repeat(0.0).take(silence));
    }
    samples
}

#[derive(Debug, Clone)]
pub struct EarconPlayer {
    volume: f32,
}

impl EarconPlayer {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Play the cue for `priority`; failures are logged and ignored.
    pub async fn play(&self, priority: Priority) {
        let samples = render(&earcon_for(priority, self.volume));
        let duration_ms = samples.len() as u64 * 1000 / SAMPLE_RATE as u64;
        let result = tokio::task::spawn_blocking(move || play_samples(samples, duration_ms)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Earcon playback failed: {}", e),
            Err(e) => debug!("Earcon task failed: {}", e),
        }
    }
}

impl Default for EarconPlayer {
    fn default() -> Self {
        Self::new(0.15)
    }
}

fn play_samples(samples: Vec<f32>, duration_ms: u64) -> anyhow::Result<()> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no audio output device"))?;
    let (_stream, handle) = OutputStream::try_from_device(&device)?;
    let sink = Sink::try_new(&handle)?;
    sink.append(rodio::buffer::SamplesBuffer::new(1, SAMPLE_RATE, samples));
    sink.sleep_until_end();
    // let the device drain before the stream is dropped
    std::thread::sleep(Duration::from_millis(duration_ms.min(50)));
    Ok(())
}
