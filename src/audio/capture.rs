use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use rtrb::{Consumer, Producer, RingBuffer};

use super::conditioner::AudioConditioner;
use super::{AudioCmd, PcmSink, RecordingError, FEED_INTERVAL, TARGET_SAMPLE_RATE};

pub(super) fn run_capture_thread(
    cmd_rx: Receiver<AudioCmd>,
    init_tx: Sender<Result<(), RecordingError>>,
    sink: PcmSink,
    overrun_count: Arc<AtomicUsize>,
) {
    match init_capture(overrun_count) {
        Ok((stream, consumer, conditioner)) => {
            let _ = init_tx.send(Ok(()));
            run_feed_loop(cmd_rx, stream, consumer, conditioner, sink);
        }
        Err(err) => {
            log::error!("Audio capture init failed: {err}");
            let _ = init_tx.send(Err(err));
        }
    }
}

fn init_capture(
    overrun_count: Arc<AtomicUsize>,
) -> Result<(cpal::Stream, Consumer<f32>, AudioConditioner), RecordingError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(RecordingError::NoInputDevice)?;

    let stream_config = device
        .default_input_config()
        .map_err(|e| RecordingError::Device(e.to_string()))?;

    let sample_rate = stream_config.sample_rate();
    let channels = stream_config.channels() as usize;

    let description = device
        .description()
        .map_err(|e| RecordingError::Device(e.to_string()))?;
    log::info!(
        "Audio: {} Hz, {} channels, device={:?}",
        sample_rate,
        channels,
        description
    );
    if sample_rate != TARGET_SAMPLE_RATE {
        log::warn!(
            "Input device does not run at {} Hz natively; {} Hz capture will be resampled",
            TARGET_SAMPLE_RATE,
            sample_rate
        );
    }

    let conditioner =
        AudioConditioner::new(sample_rate as usize, TARGET_SAMPLE_RATE as usize)?;

    let (producer, consumer) = RingBuffer::<f32>::new(sample_rate as usize);
    let err_fn = move |err| log::error!("Stream error: {}", err);

    let stream = match stream_config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(
            &device,
            &stream_config.into(),
            producer,
            channels,
            err_fn,
            overrun_count,
        ),
        cpal::SampleFormat::I16 => build_stream::<i16>(
            &device,
            &stream_config.into(),
            producer,
            channels,
            err_fn,
            overrun_count,
        ),
        cpal::SampleFormat::U16 => build_stream::<u16>(
            &device,
            &stream_config.into(),
            producer,
            channels,
            err_fn,
            overrun_count,
        ),
        _ => Err(cpal::BuildStreamError::DeviceNotAvailable),
    }
    .map_err(|e| RecordingError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| RecordingError::Device(e.to_string()))?;

    Ok((stream, consumer, conditioner))
}

fn run_feed_loop(
    cmd_rx: Receiver<AudioCmd>,
    stream: cpal::Stream,
    mut consumer: Consumer<f32>,
    mut conditioner: AudioConditioner,
    mut sink: PcmSink,
) {
    let mut stream = Some(stream);
    let mut chunk: Vec<i16> = Vec::new();
    let mut stopping = false;

    loop {
        if !stopping && matches!(cmd_rx.try_recv(), Ok(AudioCmd::Stop)) {
            stopping = true;
            // Dropping the stream stops the device callback.
            stream.take();
        }

        let available = consumer.slots();
        if available > 0 {
            if let Ok(read) = consumer.read_chunk(available) {
                let (first, second) = read.as_slices();
                conditioner.push(first);
                if !second.is_empty() {
                    conditioner.push(second);
                }
                read.commit_all();
            }
        }

        chunk.clear();
        if let Err(e) = conditioner.drain_into(&mut chunk) {
            log::error!("Audio conditioning failed: {e}");
        }
        if !chunk.is_empty() {
            sink(&chunk);
        }

        if stopping {
            break;
        }
        thread::sleep(FEED_INTERVAL);
    }

    chunk.clear();
    if let Err(e) = conditioner.flush_into(&mut chunk) {
        log::error!("Audio flush failed: {e}");
    }
    if !chunk.is_empty() {
        sink(&chunk);
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: Producer<f32>,
    channels: usize,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
    overrun_count: Arc<AtomicUsize>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let has_logged = Arc::new(AtomicBool::new(false));

    device.build_input_stream(
        config,
        move |data: &[T], _: &_| {
            if !has_logged.load(Ordering::Relaxed) {
                log::debug!("CPAL: First chunk of {} samples", data.len());
                has_logged.store(true, Ordering::Relaxed);
            }

            if channels == 1 {
                for &sample in data {
                    if producer.push(sample.to_sample::<f32>()).is_err() {
                        overrun_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            } else {
                for frame in data.chunks(channels) {
                    let mut sum = 0.0;
                    for &sample in frame {
                        sum += sample.to_sample::<f32>();
                    }
                    if producer.push(sum / channels as f32).is_err() {
                        overrun_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        },
        err_fn,
        None,
    )
}
