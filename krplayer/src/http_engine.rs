//! HTTP stream engine
//!
//! `HttpStreamEngine` plays a single fixed HTTP/HTTPS radio stream:
//!
//! ```text
//! reqwest byte stream → bounded channel → symphonia decode (blocking) → cpal output
//! ```
//!
//! The network side runs as an async pump task feeding a bounded channel;
//! the decoder runs on a blocking thread reading from it, so a slow output
//! throttles the download through natural backpressure. The cpal callback
//! drains a shared sample buffer and plays silence while the audible gate
//! is closed, which is how `pause` suspends output without dropping the
//! connection.
//!
//! Mid-stream failures (connection drop, decode failure, and end-of-stream,
//! which a live radio source must never reach) are reported as
//! [`EngineEvent::PlaybackError`]; the coordinator owns the recovery
//! policy, never this engine.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use futures_util::StreamExt;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::engine::StreamEngine;
use crate::error::{Error, Result};
use crate::events::EngineEvent;

/// Pending network chunks between the pump task and the decoder thread.
const BYTE_CHANNEL_SIZE: usize = 64;

/// How long the decoder waits when the sample buffer is full.
const PUSH_WAIT: Duration = Duration::from_millis(10);

// ═══════════════════════════════════════════════════════════════════════════
// AudioOutput - cpal device wrapper
// ═══════════════════════════════════════════════════════════════════════════

/// Buffer partagé entre le thread décodeur et le callback cpal
struct SharedBuffer {
    /// Interleaved f32 samples at the device rate/layout
    samples: VecDeque<f32>,
}

/// Handle the decoder thread uses to feed the output device.
#[derive(Clone)]
struct OutputHandle {
    buffer: Arc<Mutex<SharedBuffer>>,
    capacity: usize,
    sample_rate: u32,
    channels: usize,
}

impl OutputHandle {
    /// Append samples, waiting while the buffer is full.
    ///
    /// Returns `true` when the cancellation token fired while waiting.
    fn push_blocking(&self, samples: &[f32], cancel: &CancellationToken) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            if cancel.is_cancelled() {
                return true;
            }
            {
                let mut buf = self.buffer.lock().unwrap();
                let free = self.capacity.saturating_sub(buf.samples.len());
                let take = free.min(samples.len() - offset);
                buf.samples.extend(&samples[offset..offset + take]);
                offset += take;
            }
            if offset < samples.len() {
                std::thread::sleep(PUSH_WAIT);
            }
        }
        false
    }
}

/// Audio output via the default cpal device.
///
/// `cpal::Stream` is not `Send`, and the engine lives inside a spawned
/// task, so the stream is built and kept alive on a dedicated OS thread.
/// The engine only holds the (sendable) feed handle; dropping the output
/// releases the thread and the device with it.
struct AudioOutput {
    handle: OutputHandle,
    // The device thread parks on the paired receiver; dropping this
    // sender wakes it up and releases the stream.
    _stop_tx: std::sync::mpsc::Sender<()>,
}

impl AudioOutput {
    async fn new(gate: Arc<AtomicBool>) -> Result<Self> {
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match Self::open_device(gate) {
                Ok((stream, handle)) => {
                    if ready_tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // Parked until the engine drops the output
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Audio output thread finished");
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {}", e)))?;

        let handle = ready_rx
            .await
            .map_err(|_| Error::AudioOutput("Audio output thread died".to_string()))??;

        Ok(Self {
            handle,
            _stop_tx: stop_tx,
        })
    }

    /// Open the default output device and start its callback stream.
    ///
    /// Runs on the dedicated audio thread.
    fn open_device(gate: Arc<AtomicBool>) -> Result<(cpal::Stream, OutputHandle)> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::NoOutputDevice)?;

        debug!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {}", e)))?;

        debug!(
            "Output config: {} channels, {} Hz, {:?}",
            config.channels(),
            config.sample_rate().0,
            config.sample_format()
        );

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let buffer = Arc::new(Mutex::new(SharedBuffer {
            samples: VecDeque::new(),
        }));
        let handle = OutputHandle {
            buffer: buffer.clone(),
            // One second of audio at the device layout
            capacity: sample_rate as usize * channels,
            sample_rate,
            channels,
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), buffer, gate)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), buffer, gate)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), buffer, gate)?
            }
            format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

        Ok((stream, handle))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        buffer: Arc<Mutex<SharedBuffer>>,
        gate: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut buf = buffer.lock().unwrap();
                    let audible = gate.load(Ordering::Relaxed);
                    for sample in data.iter_mut() {
                        let value = if audible {
                            buf.samples.pop_front().unwrap_or(0.0)
                        } else {
                            0.0
                        };
                        *sample = T::from_sample(value);
                    }
                },
                move |err| {
                    warn!("Audio output error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build output stream: {}", e)))?;
        Ok(stream)
    }

    fn clear(&self) {
        self.handle.buffer.lock().unwrap().samples.clear();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ByteStreamReader - network → blocking decoder bridge
// ═══════════════════════════════════════════════════════════════════════════

/// Blocking `Read` over the chunks the pump task delivers.
///
/// A closed channel reads as EOF, which is also how cancellation reaches
/// the decoder: the pump drops its sender and the next read returns 0.
struct ByteStreamReader {
    rx: Mutex<mpsc::Receiver<std::io::Result<Vec<u8>>>>,
    current: Vec<u8>,
    pos: usize,
}

impl ByteStreamReader {
    fn new(rx: mpsc::Receiver<std::io::Result<Vec<u8>>>) -> Self {
        Self {
            rx: Mutex::new(rx),
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ByteStreamReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.rx.lock().unwrap().blocking_recv() {
                Some(Ok(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(0), // pump gone: EOF
            }
        }
        let n = (self.current.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HttpStreamEngine
// ═══════════════════════════════════════════════════════════════════════════

/// Stream engine for one fixed HTTP/HTTPS radio source.
pub struct HttpStreamEngine {
    url: String,
    events: Option<mpsc::Sender<EngineEvent>>,
    gate: Arc<AtomicBool>,
    output: Option<AudioOutput>,
    cancel: CancellationToken,
    pump_task: Option<JoinHandle<()>>,
    decode_task: Option<JoinHandle<()>>,
}

impl HttpStreamEngine {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            events: None,
            gate: Arc::new(AtomicBool::new(false)),
            output: None,
            cancel: CancellationToken::new(),
            pump_task: None,
            decode_task: None,
        }
    }

    /// Cancel the current stream tasks, if any.
    ///
    /// The tasks are detached rather than awaited: the decoder may be
    /// inside a blocking read, and it unwinds on its own as soon as the
    /// pump drops the byte channel.
    fn cancel_stream(&mut self) {
        self.cancel.cancel();
        self.pump_task.take();
        self.decode_task.take();
    }

    fn stream_alive(&self) -> bool {
        self.decode_task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

#[async_trait]
impl StreamEngine for HttpStreamEngine {
    async fn prepare(&mut self) -> Result<()> {
        let events = self
            .events
            .clone()
            .ok_or(Error::ChannelClosed("engine events"))?;

        // Re-issue the source: tear the previous connection down first.
        self.cancel_stream();
        self.cancel = CancellationToken::new();

        if self.output.is_none() {
            self.output = Some(AudioOutput::new(self.gate.clone()).await?);
        }
        let output = self.output.as_ref().unwrap().handle.clone();

        info!(url = %self.url, "Connecting to stream");
        let response = reqwest::get(&self.url).await?;
        if !response.status().is_success() {
            return Err(Error::BadStatus(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        // Icecast/Shoutcast sources advertise their name in icy-name
        if let Some(name) = response.headers().get("icy-name").and_then(|v| v.to_str().ok()) {
            info!(stream_name = %name, "Connected");
        }

        let (byte_tx, byte_rx) = mpsc::channel(BYTE_CHANNEL_SIZE);
        let cancel = self.cancel.clone();

        // Pump: async network side. The bounded channel throttles the
        // download when the decoder falls behind.
        let pump_cancel = cancel.clone();
        self.pump_task = Some(tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            if byte_tx.send(Ok(bytes.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            let _ = byte_tx
                                .send(Err(std::io::Error::other(err)))
                                .await;
                            break;
                        }
                        None => break, // EOF: the reader sees a closed channel
                    },
                }
            }
        }));

        // Decoder: blocking side.
        let reader = ByteStreamReader::new(byte_rx);
        self.decode_task = Some(tokio::task::spawn_blocking(move || {
            run_decoder(reader, content_type, output, cancel, events);
        }));

        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        if self.output.is_none() || !self.stream_alive() {
            return Err(Error::NotPrepared);
        }
        self.gate.store(true, Ordering::Relaxed);
        debug!("Audible output resumed");
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.gate.store(false, Ordering::Relaxed);
        // Drop buffered audio so a later resume picks the stream up live
        if let Some(output) = &self.output {
            output.clear();
        }
        debug!("Audible output paused");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.gate.store(false, Ordering::Relaxed);
        self.cancel_stream();
        if let Some(output) = self.output.take() {
            output.clear();
        }
        debug!("Engine stopped, output device released");
        Ok(())
    }

    fn subscribe(&mut self, events: mpsc::Sender<EngineEvent>) {
        self.events = Some(events);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Decode loop (blocking thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Probe the stream, decode packets, and feed the output until the stream
/// ends, fails, or the token is cancelled.
fn run_decoder(
    reader: ByteStreamReader,
    content_type: Option<String>,
    output: OutputHandle,
    cancel: CancellationToken,
    events: mpsc::Sender<EngineEvent>,
) {
    let report = |ev: EngineEvent| {
        let _ = events.blocking_send(ev);
    };

    match decode_stream(reader, content_type, &output, &cancel, &events) {
        Ok(()) => {
            // Only cancellation ends the loop without an error
            debug!("Decoder stopped");
            report(EngineEvent::Stopped);
        }
        Err(err) => {
            if cancel.is_cancelled() {
                debug!(%err, "Decoder error after cancellation, ignored");
                report(EngineEvent::Stopped);
            } else {
                report(EngineEvent::PlaybackError(err.to_string()));
            }
        }
    }
}

fn decode_stream(
    reader: ByteStreamReader,
    content_type: Option<String>,
    output: &OutputHandle,
    cancel: &CancellationToken,
    events: &mpsc::Sender<EngineEvent>,
) -> Result<()> {
    let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(reader)), Default::default());

    let mut hint = Hint::new();
    if let Some(ct) = &content_type {
        hint.mime_type(ct);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("Failed to probe stream format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut src_rate = 0u32;
    let mut src_channels = 0usize;
    let mut started = false;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                // A live stream must never end
                return Err(Error::Decode("stream ended".to_string()));
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("Failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt packet: skip and keep going
                trace!("Decode error (skipping): {}", e);
                continue;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(Error::Decode(format!("Decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        let rebuild = match &sample_buf {
            Some(_) => spec.rate != src_rate || spec.channels.count() != src_channels,
            None => true,
        };
        if rebuild {
            src_rate = spec.rate;
            src_channels = spec.channels.count();
            debug!(rate = src_rate, channels = src_channels, "Stream audio spec");
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        let buf = sample_buf.as_mut().unwrap();
        buf.copy_interleaved_ref(decoded);

        let samples = adapt_chunk(
            buf.samples(),
            src_channels,
            src_rate,
            output.channels,
            output.sample_rate,
        );
        if output.push_blocking(&samples, cancel) {
            return Ok(()); // cancelled while waiting for buffer space
        }

        if !started {
            started = true;
            let _ = events.blocking_send(EngineEvent::Started);
        }
    }
}

/// Adapt one interleaved chunk to the output layout.
///
/// Channel mapping duplicates mono to every output channel and truncates
/// extra source channels; rate conversion is per-chunk linear
/// interpolation, which is plenty for a compressed radio stream.
fn adapt_chunk(
    samples: &[f32],
    src_channels: usize,
    src_rate: u32,
    dst_channels: usize,
    dst_rate: u32,
) -> Vec<f32> {
    if src_channels == 0 || samples.is_empty() {
        return Vec::new();
    }
    let src_frames = samples.len() / src_channels;

    let frame = |idx: usize, ch: usize| -> f32 {
        let ch = ch.min(src_channels - 1);
        samples[idx * src_channels + ch]
    };

    if src_rate == dst_rate {
        let mut out = Vec::with_capacity(src_frames * dst_channels);
        for i in 0..src_frames {
            for ch in 0..dst_channels {
                out.push(frame(i, ch));
            }
        }
        return out;
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let dst_frames = ((src_frames as f64) / ratio) as usize;
    let mut out = Vec::with_capacity(dst_frames * dst_channels);
    for i in 0..dst_frames {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let next = (idx + 1).min(src_frames - 1);
        for ch in 0..dst_channels {
            let a = frame(idx, ch);
            let b = frame(next, ch);
            out.push(a + (b - a) * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapt_chunk_identity() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        let out = adapt_chunk(&samples, 2, 48_000, 2, 48_000);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_adapt_chunk_mono_to_stereo() {
        let samples = vec![0.5, -0.5];
        let out = adapt_chunk(&samples, 1, 48_000, 2, 48_000);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_adapt_chunk_downmix_truncates_extra_channels() {
        // Quad source → stereo output keeps the first two channels
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        let out = adapt_chunk(&samples, 4, 48_000, 2, 48_000);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_adapt_chunk_halves_frames_when_downsampling() {
        let samples: Vec<f32> = (0..200).map(|i| i as f32 / 200.0).collect();
        let out = adapt_chunk(&samples, 2, 96_000, 2, 48_000);
        assert_eq!(out.len(), 100); // 100 frames → 50 frames, stereo
    }

    #[test]
    fn test_byte_stream_reader_reassembles_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Ok(vec![1u8, 2, 3])).unwrap();
        tx.try_send(Ok(vec![4u8, 5])).unwrap();
        drop(tx);

        let mut reader = ByteStreamReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_byte_stream_reader_eof_on_closed_channel() {
        let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(1);
        drop(tx);

        let mut reader = ByteStreamReader::new(rx);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
