//! A live [`AudioSource`] backed by cpal. Works for microphones and, by
//! picking a loopback device by name, for taps on the system output.
//!
//! cpal streams are not `Send` everywhere, so the stream is built and kept
//! alive on a dedicated capture thread. The audio callback slices the input
//! into blocks and offers them through a single-slot channel; if the
//! choreographer is still busy with the previous block, the new one is
//! dropped rather than queued.

use crate::audio_source::{AudioBlock, AudioSource, SourceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use log::{info, warn};

use std::fmt::Display;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::thread;
use std::time::Duration;

// How long next_block waits for the device before declaring it dead
const STALL_LIMIT: Duration = Duration::from_secs(5);

enum Signal {
    Stop,
}

/// Streams blocks from an input device.
pub struct LiveSource {
    handle: Option<thread::JoinHandle<()>>,
    tx: Sender<Signal>,
    blocks: Receiver<Vec<f32>>,
    errors: Receiver<String>,
    pending: Vec<f32>,
    sample_rate: u32,
}

impl LiveSource {
    /// Opens the input device called `device_name`, or the default input
    /// device when no name is given. `sample_rate` is a request; the device
    /// may deliver something else, which [`AudioSource::sample_rate`] reports.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self, SourceError> {
        let (tx, rx) = mpsc::channel::<Signal>();
        let (block_tx, blocks) = mpsc::sync_channel::<Vec<f32>>(1);
        let (err_tx, errors) = mpsc::channel::<String>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, SourceError>>();
        let device_name = device_name.map(str::to_owned);
        let block_size = block_size.max(1);

        let handle = thread::spawn(move || {
            let stream = match build_stream(
                device_name.as_deref(),
                sample_rate,
                block_size,
                block_tx,
                err_tx,
            ) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park here until told to stop (or the owner goes away)
            let _ = rx.recv();
            drop(stream);
        });

        let actual_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => return Err(SourceError::Device("capture thread died".to_owned())),
        };

        if actual_rate != sample_rate {
            warn!(
                "Requested {} Hz but the device delivers {} Hz",
                sample_rate, actual_rate
            );
        }

        Ok(Self {
            handle: Some(handle),
            tx,
            blocks,
            errors,
            pending: Vec::new(),
            sample_rate: actual_rate,
        })
    }

    /// Lists the names of the input devices on the default host.
    pub fn device_names() -> Result<Vec<String>, SourceError> {
        let host = cpal::default_host();
        Ok(host
            .input_devices()
            .map_err(device_err)?
            .filter_map(|d| d.name().ok())
            .collect())
    }

    /// Stops the capture stream and joins its thread.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        if let Some(thread) = self.handle.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AudioSource for LiveSource {
    fn next_block(&mut self, size: usize) -> Result<AudioBlock, SourceError> {
        while self.pending.len() < size {
            if let Ok(msg) = self.errors.try_recv() {
                return Err(SourceError::Device(msg));
            }
            match self.blocks.recv_timeout(STALL_LIMIT) {
                Ok(mut block) => self.pending.append(&mut block),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SourceError::Device(format!(
                        "no audio from the device for {:?}",
                        STALL_LIMIT
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SourceError::Device("capture stream closed".to_owned()))
                }
            }
        }

        let samples = self.pending.drain(..size).collect();
        Ok(AudioBlock::new(samples, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn device_err(e: impl Display) -> SourceError {
    SourceError::Device(e.to_string())
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    block_size: usize,
    block_tx: SyncSender<Vec<f32>>,
    err_tx: Sender<String>,
) -> Result<(cpal::Stream, u32), SourceError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(device_err)?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SourceError::Device(format!("no input device named {:?}", name)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| SourceError::Device("no default input device".to_owned()))?,
    };

    let matching = device
        .supported_input_configs()
        .map_err(device_err)?
        .find(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
        .map(|c| c.with_sample_rate(cpal::SampleRate(sample_rate)));
    let supported = match matching {
        Some(c) => c,
        None => device.default_input_config().map_err(device_err)?,
    };

    info!(
        "Capturing from {} @ {} Hz ({} channel(s), {})",
        device.name().unwrap_or_else(|_| "unknown device".to_owned()),
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let rate = supported.sample_rate().0;
    let config = supported.config();
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, block_size, block_tx, err_tx),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, block_size, block_tx, err_tx),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, block_size, block_tx, err_tx),
        SampleFormat::I32 => build_typed::<i32>(&device, &config, block_size, block_tx, err_tx),
        other => Err(SourceError::Device(format!(
            "unsupported sample format {}",
            other
        ))),
    }?;

    stream.play().map_err(device_err)?;
    Ok((stream, rate))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_size: usize,
    block_tx: SyncSender<Vec<f32>>,
    err_tx: Sender<String>,
) -> Result<cpal::Stream, SourceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let mut acc = Vec::with_capacity(block_size);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    acc.push(f32::from_sample(frame[0]));
                    if acc.len() == block_size {
                        let block = std::mem::replace(&mut acc, Vec::with_capacity(block_size));
                        let _ = block_tx.try_send(block);
                    }
                }
            },
            move |err| {
                let _ = err_tx.send(err.to_string());
            },
            None,
        )
        .map_err(device_err)
}
