use crate::audio::AudioBackend;
use crate::synth::core::Synth;
use crate::synth::error::{EngineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use log::{error, info, warn};

fn init_error(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Initialization(format!("{}: {}", context, err))
}

/// Plays the render path through the default `cpal` output device.
///
/// The render-side [`Synth`] moves into the stream callback on `start`, so
/// the callback owns it outright and never contends for a lock.
pub struct CpalBackend {
    stream: Option<Stream>,
    synth: Option<Synth>,
    buffer_frames: u32,
}

impl CpalBackend {
    pub fn new(synth: Synth, buffer_frames: u32) -> Self {
        Self {
            stream: None,
            synth: Some(synth),
            buffer_frames,
        }
    }

    fn select_output_device(host: &cpal::Host) -> Result<cpal::Device> {
        host.default_output_device()
            .ok_or_else(|| EngineError::Initialization("no output device available".to_string()))
    }

    fn open_stream(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut synth: Synth,
    ) -> std::result::Result<Stream, cpal::BuildStreamError> {
        let channels = config.channels as usize;
        device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                synth.process(data, channels);
            },
            |err| error!("stream error: {}", err),
            None,
        )
    }

    fn build_stream(&mut self) -> Result<Stream> {
        let mut synth = self
            .synth
            .take()
            .ok_or_else(|| EngineError::Initialization("stream already started".to_string()))?;
        let host = cpal::default_host();
        let device = Self::select_output_device(&host)?;
        info!(
            "selected output device: {}",
            device.name().unwrap_or_default()
        );

        let supported = device
            .default_output_config()
            .map_err(|e| init_error("no output config", e))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(EngineError::Initialization(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }
        let buffer_size = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&self.buffer_frames) =>
            {
                cpal::BufferSize::Fixed(self.buffer_frames)
            }
            _ => {
                warn!(
                    "device does not accept {} frame buffers, using its default",
                    self.buffer_frames
                );
                cpal::BufferSize::Default
            }
        };
        let mut stream_config: cpal::StreamConfig = supported.into();
        stream_config.buffer_size = buffer_size;
        synth.set_sample_rate(stream_config.sample_rate.0 as f32);
        info!(
            "stream: {} Hz, {} channels",
            stream_config.sample_rate.0, stream_config.channels
        );

        Self::open_stream(&device, &stream_config, synth)
            .map_err(|e| init_error("stream build failed", e))
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let stream = self.build_stream()?;
            self.stream = Some(stream);
        }
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| init_error("cannot start stream", e))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| init_error("cannot stop stream", e))?;
        }
        Ok(())
    }
}
