//! Gapless PCM feeder.
//!
//! Units are decoded whole, then streamed chunk-by-chunk to the outbound
//! pipe so the final samples of one unit and the first samples of the next
//! are contiguous. The only permitted overlap is the configured crossfade:
//! the feeder retains the tail of each unit and mixes it under the head of
//! the next. At no point is silence inserted between units.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rodio::source::UniformSourceIterator;
use rodio::Decoder;

/// Fixed PCM contract with the encoder: s16le, stereo, 44.1 kHz.
pub const SAMPLE_RATE: u32 = 44_100;
pub const CHANNELS: u16 = 2;

/// Interleaved samples per pipe write (~93 ms of audio). Skip and shutdown
/// flags are polled between chunks, so truncation lands on a chunk boundary.
pub const CHUNK_SAMPLES: usize = 8192;

/// Shared flags polled by the feeder between chunk writes.
#[derive(Clone, Default)]
pub struct FeedControls {
    skip: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl FeedControls {
    pub fn new() -> Self {
        FeedControls::default()
    }

    /// Ask the feeder to truncate the current unit at the next chunk.
    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::Relaxed);
    }

    /// Consume a pending skip request.
    pub fn take_skip(&self) -> bool {
        self.skip.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// How a feed attempt ended. Truncated units were cut cleanly at a chunk
/// boundary (skip or shutdown) and still count as played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Completed,
    Truncated,
    /// The outbound pipe failed mid-write. The unit remainder is dropped —
    /// after reconnection the stream resumes with the next unit, never a
    /// replay of this one.
    PipeLost,
}

/// Streams decoded units to the outbound pipe with crossfaded joins.
pub struct Feeder {
    sink: Box<dyn Write + Send>,
    crossfade_samples: usize,
    tail: Vec<i16>,
}

impl Feeder {
    pub fn new(sink: Box<dyn Write + Send>, crossfade: Duration) -> Self {
        // Frame-align the crossfade length so channels stay interleaved.
        let frames = (crossfade.as_secs_f32() * SAMPLE_RATE as f32) as usize;
        Feeder {
            sink,
            crossfade_samples: frames * CHANNELS as usize,
            tail: Vec::new(),
        }
    }

    /// Swap in a fresh sink after a reconnect. The retained tail belongs to
    /// a unit the old pipe already carried, so it is dropped, not replayed.
    pub fn replace_sink(&mut self, sink: Box<dyn Write + Send>) {
        self.sink = sink;
        self.tail.clear();
    }

    /// Feed one unit. The previous unit's retained tail is mixed under this
    /// unit's head; this unit's own tail is retained for the next join
    /// (unless the unit is too short to spare it).
    pub fn feed(&mut self, samples: &[i16], controls: &FeedControls) -> FeedOutcome {
        let overlap = self.tail.len().min(samples.len());
        let head = mix_crossfade(&self.tail[..overlap], &samples[..overlap]);

        let keep = if self.crossfade_samples > 0
            && samples.len() - overlap > self.crossfade_samples * 2
        {
            self.crossfade_samples
        } else {
            0
        };
        let body_end = samples.len() - keep;

        if let Some(outcome) = self.write_region(&head, controls) {
            return outcome;
        }
        if let Some(outcome) = self.write_region(&samples[overlap..body_end], controls) {
            return outcome;
        }

        self.tail = samples[body_end..].to_vec();
        FeedOutcome::Completed
    }

    /// Write a sample region in chunks, polling controls between chunks.
    /// Returns Some(outcome) when feeding must stop early.
    fn write_region(&mut self, region: &[i16], controls: &FeedControls) -> Option<FeedOutcome> {
        for chunk in region.chunks(CHUNK_SAMPLES) {
            if controls.is_shutdown() || controls.take_skip() {
                self.tail.clear();
                return Some(FeedOutcome::Truncated);
            }
            if write_samples(&mut self.sink, chunk).is_err() {
                self.tail.clear();
                return Some(FeedOutcome::PipeLost);
            }
        }
        None
    }

    /// Flush the retained tail at shutdown so the stream ends on real
    /// audio, not a dropped buffer.
    pub fn finish(&mut self) -> Result<(), String> {
        let tail = std::mem::take(&mut self.tail);
        write_samples(&mut self.sink, &tail).map_err(|e| format!("Final write failed: {}", e))?;
        self.sink
            .flush()
            .map_err(|e| format!("Final flush failed: {}", e))
    }
}

fn write_samples(sink: &mut Box<dyn Write + Send>, samples: &[i16]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    sink.write_all(&bytes)
}

/// Linear crossfade of the outgoing tail under the incoming head. Gains
/// ramp per frame so stereo channels stay matched.
fn mix_crossfade(tail: &[i16], head: &[i16]) -> Vec<i16> {
    let overlap = tail.len().min(head.len());
    let frames = overlap / CHANNELS as usize;
    if frames == 0 {
        return head[..overlap].to_vec();
    }
    let mut out = Vec::with_capacity(overlap);
    for i in 0..overlap {
        let frame = i / CHANNELS as usize;
        let x = (frame + 1) as f32 / (frames + 1) as f32;
        let mixed = tail[i] as f32 * (1.0 - x) + head[i] as f32 * x;
        out.push(mixed.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
    }
    out
}

/// Decode a whole unit to the fixed PCM contract.
pub fn decode_unit(path: &Path) -> Result<Vec<i16>, String> {
    let file =
        File::open(path).map_err(|e| format!("Cannot open '{}': {}", path.display(), e))?;
    let decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| format!("Cannot decode '{}': {}", path.display(), e))?;
    let uniform: UniformSourceIterator<_, i16> =
        UniformSourceIterator::new(decoder, CHANNELS, SAMPLE_RATE);
    let samples: Vec<i16> = uniform.collect();
    if samples.is_empty() {
        return Err(format!("No audio samples in '{}'", path.display()));
    }
    Ok(samples)
}

/// Decode a playback window of a unit (used for chopped long tracks).
pub fn decode_window(path: &Path, start_secs: f32, len_secs: f32) -> Result<Vec<i16>, String> {
    let samples = decode_unit(path)?;
    let per_frame = CHANNELS as usize;
    let start = (start_secs.max(0.0) * SAMPLE_RATE as f32) as usize * per_frame;
    let len = (len_secs.max(0.0) * SAMPLE_RATE as f32) as usize * per_frame;
    if start >= samples.len() {
        return Ok(samples);
    }
    let end = (start + len).min(samples.len());
    Ok(samples[start..end].to_vec())
}

/// Linear fade-in/out applied in place (music windows get faded edges so a
/// chopped chunk does not start or stop abruptly).
pub fn apply_fade(samples: &mut [i16], fade_in: Duration, fade_out: Duration) {
    let per_frame = CHANNELS as usize;
    let frames = samples.len() / per_frame;
    let in_frames = ((fade_in.as_secs_f32() * SAMPLE_RATE as f32) as usize).min(frames);
    let out_frames = ((fade_out.as_secs_f32() * SAMPLE_RATE as f32) as usize).min(frames);

    for f in 0..in_frames {
        let gain = f as f32 / in_frames as f32;
        for c in 0..per_frame {
            let i = f * per_frame + c;
            samples[i] = (samples[i] as f32 * gain) as i16;
        }
    }
    for f in 0..out_frames {
        let gain = f as f32 / out_frames as f32;
        for c in 0..per_frame {
            let i = samples.len() - 1 - (f * per_frame + c);
            samples[i] = (samples[i] as f32 * gain) as i16;
        }
    }
}

/// Longest run of near-zero samples, in interleaved samples. Used to verify
/// the no-inserted-silence invariant across unit joins.
pub fn longest_silence_run(samples: &[i16], threshold: i16) -> usize {
    let mut longest = 0usize;
    let mut current = 0usize;
    for &s in samples {
        if s.abs() <= threshold {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Reinterpret a fed byte stream as interleaved s16le samples (tests and
/// diagnostics).
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that collects everything written into a shared buffer.
    #[derive(Clone)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (SharedSink(buf.clone()), buf)
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Sink that fails after accepting a fixed number of bytes.
    struct FailingSink {
        accept: usize,
        written: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.written + buf.len() > self.accept {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "encoder went away",
                ));
            }
            self.written += buf.len();
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn tone(value: i16, frames: usize) -> Vec<i16> {
        vec![value; frames * CHANNELS as usize]
    }

    #[test]
    fn feed_without_crossfade_is_byte_exact() {
        let (sink, buf) = SharedSink::new();
        let mut feeder = Feeder::new(Box::new(sink), Duration::ZERO);
        let controls = FeedControls::new();

        let a = tone(1000, 100);
        let b = tone(-1000, 100);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::Completed);
        assert_eq!(feeder.feed(&b, &controls), FeedOutcome::Completed);
        feeder.finish().unwrap();

        let out = bytes_to_samples(&buf.lock().unwrap());
        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        assert_eq!(out, expected);
    }

    #[test]
    fn consecutive_units_have_no_inserted_silence() {
        let (sink, buf) = SharedSink::new();
        // 10 ms crossfade.
        let mut feeder = Feeder::new(Box::new(sink), Duration::from_millis(10));
        let controls = FeedControls::new();

        // One second of loud audio each.
        let a = tone(8000, SAMPLE_RATE as usize);
        let b = tone(8000, SAMPLE_RATE as usize);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::Completed);
        assert_eq!(feeder.feed(&b, &controls), FeedOutcome::Completed);
        feeder.finish().unwrap();

        let out = bytes_to_samples(&buf.lock().unwrap());
        let crossfade_samples = (SAMPLE_RATE as usize / 100) * CHANNELS as usize;
        assert!(
            longest_silence_run(&out, 50) <= crossfade_samples,
            "silence run of {} samples found in joined stream",
            longest_silence_run(&out, 50)
        );
        // Nothing dropped or duplicated beyond the crossfaded overlap.
        assert_eq!(out.len(), a.len() + b.len() - crossfade_samples);
    }

    #[test]
    fn crossfade_mixes_tail_under_head() {
        let tail = tone(10000, 10);
        let head = tone(-10000, 10);
        let mixed = mix_crossfade(&tail, &head);
        assert_eq!(mixed.len(), tail.len());
        // Early samples lean toward the tail, late samples toward the head.
        assert!(mixed[0] > 0);
        assert!(*mixed.last().unwrap() < 0);
    }

    #[test]
    fn short_units_skip_tail_retention() {
        let (sink, buf) = SharedSink::new();
        let mut feeder = Feeder::new(Box::new(sink), Duration::from_secs(1));
        let controls = FeedControls::new();

        // Unit much shorter than 2x crossfade: fed whole, nothing retained.
        let a = tone(5000, 100);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::Completed);
        assert!(feeder.tail.is_empty());
        assert_eq!(bytes_to_samples(&buf.lock().unwrap()).len(), a.len());
    }

    #[test]
    fn skip_truncates_at_chunk_boundary() {
        let (sink, buf) = SharedSink::new();
        let mut feeder = Feeder::new(Box::new(sink), Duration::ZERO);
        let controls = FeedControls::new();
        controls.request_skip();

        let a = tone(1000, SAMPLE_RATE as usize);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::Truncated);
        // Nothing written: skip arrived before the first chunk.
        assert!(buf.lock().unwrap().is_empty());
        // The flag was consumed; the next unit feeds normally.
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::Completed);
    }

    #[test]
    fn shutdown_truncates_feed() {
        let (sink, _buf) = SharedSink::new();
        let mut feeder = Feeder::new(Box::new(sink), Duration::ZERO);
        let controls = FeedControls::new();
        controls.request_shutdown();
        let a = tone(1000, 100);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::Truncated);
    }

    #[test]
    fn pipe_failure_is_surfaced_not_panicked() {
        let mut feeder = Feeder::new(
            Box::new(FailingSink {
                accept: CHUNK_SAMPLES * 2, // one chunk fits, second write fails
                written: 0,
            }),
            Duration::ZERO,
        );
        let controls = FeedControls::new();
        let a = tone(1000, SAMPLE_RATE as usize);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::PipeLost);
        assert!(feeder.tail.is_empty());
    }

    #[test]
    fn replace_sink_resumes_with_next_unit() {
        let mut feeder = Feeder::new(
            Box::new(FailingSink {
                accept: 0,
                written: 0,
            }),
            Duration::from_millis(10),
        );
        let controls = FeedControls::new();
        let a = tone(1000, SAMPLE_RATE as usize);
        assert_eq!(feeder.feed(&a, &controls), FeedOutcome::PipeLost);

        let (sink, buf) = SharedSink::new();
        feeder.replace_sink(Box::new(sink));
        let b = tone(2000, 1000);
        assert_eq!(feeder.feed(&b, &controls), FeedOutcome::Completed);
        let out = bytes_to_samples(&buf.lock().unwrap());
        // Only the new unit flows; the lost unit is not replayed.
        assert!(out.iter().all(|&s| s == 2000));
    }

    #[test]
    fn apply_fade_ramps_edges() {
        let mut samples = tone(10000, 1000);
        apply_fade(&mut samples, Duration::from_millis(10), Duration::from_millis(10));
        assert_eq!(samples[0], 0);
        assert_eq!(*samples.last().unwrap(), 0);
        // Middle untouched.
        assert_eq!(samples[samples.len() / 2], 10000);
    }

    #[test]
    fn longest_silence_run_finds_gaps() {
        let mut samples = tone(1000, 10);
        samples.extend(vec![0i16; 7]);
        samples.extend(tone(1000, 10));
        assert_eq!(longest_silence_run(&samples, 10), 7);
        assert_eq!(longest_silence_run(&tone(1000, 10), 10), 0);
    }

    #[test]
    fn decode_unit_rejects_missing_file() {
        assert!(decode_unit(Path::new("/nonexistent/unit.mp3")).is_err());
    }
}
