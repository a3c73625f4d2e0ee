use std::collections::VecDeque;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::animator::ANALYSIS_WINDOW;

/// Chunks buffered between the capture callback and the UI loop.
const CHUNK_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio input device available")]
    NoDevice,
    #[error("failed reading input config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("failed building input stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed starting input stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
    #[error("unsupported input sample format {0:?}")]
    UnsupportedFormat(SampleFormat),
}

/// Default microphone, mixed down to mono. Holding the value keeps capture alive.
pub struct MicrophoneInput {
    _stream: Stream,
    chunks: Receiver<Vec<f32>>,
    recent: VecDeque<f32>,
    sample_rate: u32,
}

impl MicrophoneInput {
    pub fn start() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoDevice)?;
        let supported = device.default_input_config()?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let (tx, rx) = bounded::<Vec<f32>>(CHUNK_QUEUE);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, tx)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, tx)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, tx)?,
            other => return Err(AudioError::UnsupportedFormat(other)),
        };
        stream.play()?;

        info!(
            device = device.name().unwrap_or_else(|_| "unknown".to_owned()).as_str(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "microphone capture started"
        );
        Ok(Self {
            _stream: stream,
            chunks: rx,
            recent: VecDeque::with_capacity(ANALYSIS_WINDOW),
            sample_rate: config.sample_rate.0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Drains pending capture chunks and returns the newest analysis window,
    /// or `None` when nothing new arrived since the last call.
    pub fn latest_window(&mut self) -> Option<Vec<f32>> {
        let mut received = false;
        while let Ok(chunk) = self.chunks.try_recv() {
            received = true;
            self.recent.extend(chunk);
        }
        if !received {
            return None;
        }
        let excess = self.recent.len().saturating_sub(ANALYSIS_WINDOW);
        self.recent.drain(..excess);
        Some(self.recent.iter().copied().collect())
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: Sender<Vec<f32>>,
) -> Result<Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .map(|frame| {
                    frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
                })
                .collect();
            match tx.try_send(mono) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => debug!("microphone consumer gone"),
            }
        },
        |err| warn!(%err, "microphone stream error"),
        None,
    )?;
    Ok(stream)
}
