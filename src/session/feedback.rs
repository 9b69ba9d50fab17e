use std::sync::Arc;

/// One beep of the confirmation signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration_ms: u64,
    pub gain: f32,
}

/// Two-tone confirmation: 800 Hz then 1000 Hz.
pub const CONFIRMATION_TONES: [Tone; 2] = [
    Tone {
        frequency_hz: 800,
        duration_ms: 100,
        gain: 0.3,
    },
    Tone {
        frequency_hz: 1000,
        duration_ms: 100,
        gain: 0.3,
    },
];

/// Audible (or otherwise perceptible) confirmation of a successful scan.
pub trait ScanFeedback: Send + Sync {
    fn confirm(&self, code: &str);
}

/// Logs the confirmation without touching an output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl ScanFeedback for LogFeedback {
    fn confirm(&self, code: &str) {
        log::info!(
            "Scan confirmed: {} ({} Hz / {} Hz)",
            code,
            CONFIRMATION_TONES[0].frequency_hz,
            CONFIRMATION_TONES[1].frequency_hz
        );
    }
}

/// Render tones back to back as mono f32 samples.
///
/// Each tone gets a short linear fade at both ends so consecutive beeps don't click.
pub fn render_tones(tones: &[Tone], sample_rate: u32) -> Vec<f32> {
    let mut samples = Vec::new();
    for tone in tones {
        let count = (sample_rate as u64 * tone.duration_ms / 1000) as usize;
        let fade = (count / 20).max(1);
        let step = 2.0 * std::f32::consts::PI * tone.frequency_hz as f32 / sample_rate as f32;
        for n in 0..count {
            let envelope = if n < fade {
                n as f32 / fade as f32
            } else if n >= count - fade {
                (count - n) as f32 / fade as f32
            } else {
                1.0
            };
            samples.push((step * n as f32).sin() * tone.gain * envelope);
        }
    }
    samples
}

/// Plays [`CONFIRMATION_TONES`] on the default output device.
///
/// Playback runs on its own thread so `confirm` never blocks the detection path.
/// Without a usable output device the confirmation is logged instead.
#[cfg(feature = "audio")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ToneFeedback;

#[cfg(feature = "audio")]
impl ScanFeedback for ToneFeedback {
    fn confirm(&self, code: &str) {
        let code = code.to_string();
        let spawned = std::thread::Builder::new()
            .name("dulcescan-tone".into())
            .spawn(move || {
                if let Err(e) = play_tones(&CONFIRMATION_TONES) {
                    log::warn!("Confirmation tone unavailable: {}", e);
                    LogFeedback.confirm(&code);
                }
            });
        if let Err(e) = spawned {
            log::warn!("Failed to spawn tone thread: {}", e);
        }
    }
}

#[cfg(feature = "audio")]
fn play_tones(tones: &[Tone]) -> Result<(), String> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::StreamConfig;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "No default output device".to_string())?;
    let supported = device
        .default_output_config()
        .map_err(|e| format!("No supported config: {}", e))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(format!(
            "Unsupported sample format: {:?}",
            supported.sample_format()
        ));
    }

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = config.channels as usize;
    let samples = render_tones(tones, config.sample_rate.0);
    let total_ms: u64 = tones.iter().map(|t| t.duration_ms).sum();
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = samples.get(position).copied().unwrap_or(0.0);
                    position += 1;
                    frame.fill(value);
                }
            },
            move |err| {
                log::error!("Tone output error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("Failed to build stream: {}", e))?;

    stream
        .play()
        .map_err(|e| format!("Failed to start stream: {}", e))?;
    // Tail covers the device buffer draining after the last sample.
    std::thread::sleep(std::time::Duration::from_millis(total_ms + 50));
    drop(stream);
    Ok(())
}

/// Feedback used when the host does not supply one: tones when built with
/// the `audio` feature, a log line otherwise.
pub fn default_feedback() -> Arc<dyn ScanFeedback> {
    #[cfg(feature = "audio")]
    {
        Arc::new(ToneFeedback)
    }
    #[cfg(not(feature = "audio"))]
    {
        Arc::new(LogFeedback)
    }
}
