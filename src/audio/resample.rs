//! Device-rate to capture-rate conversion for microphone frames.

#[cfg(feature = "high-quality-audio")]
use crate::log_debug;
#[cfg(feature = "high-quality-audio")]
use anyhow::{anyhow, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::f32::consts::PI;
#[cfg(feature = "high-quality-audio")]
use std::sync::atomic::{AtomicBool, Ordering};

pub(super) const MIN_DEVICE_RATE: u32 = 2_000;
pub(super) const MAX_DEVICE_RATE: u32 = 1_600_000;
const MAX_DOWNSAMPLING_TAPS: usize = 129;
#[cfg(feature = "high-quality-audio")]
const SINC_CHUNK: usize = 256;

#[cfg(feature = "high-quality-audio")]
static SINC_FALLBACK_LOGGED: AtomicBool = AtomicBool::new(false);

/// Converts mono f32 blocks from the device rate to the capture rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RateConverter {
    device_rate: u32,
    target_rate: u32,
}

impl RateConverter {
    pub(super) fn new(device_rate: u32, target_rate: u32) -> Self {
        Self {
            device_rate,
            target_rate,
        }
    }

    pub(super) fn is_passthrough(&self) -> bool {
        self.device_rate == self.target_rate
            || self.device_rate == 0
            || !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&self.device_rate)
    }

    fn ratio(&self) -> f64 {
        f64::from(self.target_rate) / f64::from(self.device_rate)
    }

    /// Resample `input`, preferring the sinc resampler when compiled in.
    pub(super) fn convert(&self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() || self.is_passthrough() {
            return input.to_vec();
        }

        #[cfg(feature = "high-quality-audio")]
        {
            match self.convert_sinc(input) {
                Ok(output) => output,
                Err(err) => {
                    log_sinc_fallback(&err);
                    self.convert_basic(input)
                }
            }
        }

        #[cfg(not(feature = "high-quality-audio"))]
        {
            self.convert_basic(input)
        }
    }

    /// Open a stateful converter for one continuous device stream.
    pub(super) fn stream(&self) -> StreamResampler {
        let engine = if self.is_passthrough() {
            StreamEngine::Passthrough
        } else {
            self.stream_engine()
        };
        StreamResampler {
            converter: *self,
            engine,
            pending: VecDeque::new(),
        }
    }

    #[cfg(feature = "high-quality-audio")]
    fn stream_engine(&self) -> StreamEngine {
        match sinc_resampler(self.ratio()) {
            Ok(resampler) => StreamEngine::Sinc(SincStream {
                resampler,
                input: Vec::with_capacity(SINC_CHUNK * 2),
            }),
            Err(err) => {
                log_sinc_fallback(&err);
                StreamEngine::Basic(BasicStream::new(*self))
            }
        }
    }

    #[cfg(not(feature = "high-quality-audio"))]
    fn stream_engine(&self) -> StreamEngine {
        StreamEngine::Basic(BasicStream::new(*self))
    }

    #[cfg(feature = "high-quality-audio")]
    fn convert_sinc(&self, input: &[f32]) -> Result<Vec<f32>> {
        let ratio = self.ratio();
        let mut resampler = sinc_resampler(ratio)?;

        let expected = ((input.len() as f64) * ratio).round().max(1.0) as usize;
        let mut output = Vec::with_capacity(expected + SINC_CHUNK);
        let mut block = vec![0.0f32; SINC_CHUNK];
        for chunk in input.chunks(SINC_CHUNK) {
            let pad = chunk.last().copied().unwrap_or(0.0);
            block.fill(pad);
            block[..chunk.len()].copy_from_slice(chunk);
            let produced = resampler
                .process(std::slice::from_ref(&block), None)
                .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
            if let Some(channel) = produced.first() {
                output.extend_from_slice(channel);
            }
        }
        if output.is_empty() {
            return Err(anyhow!("resampler produced no output"));
        }
        fit_length(&mut output, expected);
        Ok(output)
    }

    /// FIR low-pass when decimating, then linear interpolation.
    pub(super) fn convert_basic(&self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() || self.is_passthrough() {
            return input.to_vec();
        }
        let filtered = match self.anti_alias_taps() {
            Some(coeffs) => low_pass_fir(input, &coeffs),
            None => input.to_vec(),
        };
        resample_linear(&filtered, self.ratio() as f32)
    }

    /// Low-pass taps when decimating; `None` when upsampling.
    fn anti_alias_taps(&self) -> Option<Vec<f32>> {
        (self.device_rate > self.target_rate).then(|| {
            let cutoff = (self.target_rate as f32 * 0.5 / self.device_rate as f32).min(0.499);
            design_low_pass(cutoff, self.downsampling_taps())
        })
    }

    /// More taps for steeper decimation; always odd.
    pub(super) fn downsampling_taps(&self) -> usize {
        let decimation = self.device_rate as f32 / self.target_rate.max(1) as f32;
        let mut taps = (decimation * 4.0).ceil().max(11.0) as usize;
        if taps % 2 == 0 {
            taps += 1;
        }
        taps.min(MAX_DOWNSAMPLING_TAPS)
    }
}

#[cfg(feature = "high-quality-audio")]
fn sinc_resampler(ratio: f64) -> Result<SincFixedIn<f32>> {
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    SincFixedIn::<f32>::new(ratio, 2.0, params, SINC_CHUNK, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))
}

#[cfg(feature = "high-quality-audio")]
fn log_sinc_fallback(err: &anyhow::Error) {
    if !SINC_FALLBACK_LOGGED.swap(true, Ordering::AcqRel) {
        log_debug(&format!(
            "sinc resampler failed ({err}); using FIR + linear path"
        ));
    }
}

/// Device-rate to capture-rate conversion for one continuous stream.
///
/// Filter state and interpolation phase carry over between pushes, so frame
/// boundaries leave no seams. Output accumulates and is cut into exact
/// frames; nothing is padded or stretched.
pub(super) struct StreamResampler {
    #[cfg_attr(not(feature = "high-quality-audio"), allow(dead_code))]
    converter: RateConverter,
    engine: StreamEngine,
    pending: VecDeque<i16>,
}

enum StreamEngine {
    Passthrough,
    #[cfg(feature = "high-quality-audio")]
    Sinc(SincStream),
    Basic(BasicStream),
}

impl StreamResampler {
    /// Feed the next block of device samples.
    pub(super) fn push(&mut self, input: &[f32]) {
        if input.is_empty() {
            return;
        }
        let mut output = Vec::with_capacity(input.len());

        #[cfg(feature = "high-quality-audio")]
        {
            let failed = match &mut self.engine {
                StreamEngine::Sinc(sinc) => sinc.process(input, &mut output).err(),
                _ => None,
            };
            if let Some(err) = failed {
                log_sinc_fallback(&err);
                output.clear();
                self.engine = StreamEngine::Basic(BasicStream::new(self.converter));
            }
        }

        match &mut self.engine {
            StreamEngine::Passthrough => output.extend_from_slice(input),
            #[cfg(feature = "high-quality-audio")]
            StreamEngine::Sinc(_) => {}
            StreamEngine::Basic(basic) => basic.process(input, &mut output),
        }
        self.pending.extend(output.into_iter().map(f32_to_i16));
    }

    /// Take exactly `frame_size` converted samples once that many are buffered.
    pub(super) fn next_frame(&mut self, frame_size: usize) -> Option<Vec<i16>> {
        if frame_size == 0 || self.pending.len() < frame_size {
            return None;
        }
        Some(self.pending.drain(..frame_size).collect())
    }

    /// Drop buffered output; filter state is kept.
    pub(super) fn clear(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(feature = "high-quality-audio")]
struct SincStream {
    resampler: SincFixedIn<f32>,
    input: Vec<f32>,
}

#[cfg(feature = "high-quality-audio")]
impl SincStream {
    /// Run every complete chunk; the remainder waits for the next push.
    fn process(&mut self, samples: &[f32], output: &mut Vec<f32>) -> Result<()> {
        self.input.extend_from_slice(samples);
        let mut consumed = 0;
        while self.input.len() - consumed >= SINC_CHUNK {
            let block = &self.input[consumed..consumed + SINC_CHUNK];
            let produced = self
                .resampler
                .process(std::slice::from_ref(&block), None)
                .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
            if let Some(channel) = produced.first() {
                output.extend_from_slice(channel);
            }
            consumed += SINC_CHUNK;
        }
        self.input.drain(..consumed);
        Ok(())
    }
}

/// Causal FIR low-pass and linear interpolation with carried state.
struct BasicStream {
    coeffs: Vec<f32>,
    history: Vec<f32>,
    step: f64,
    position: f64,
    previous: Option<f32>,
}

impl BasicStream {
    fn new(converter: RateConverter) -> Self {
        let coeffs = converter.anti_alias_taps().unwrap_or_else(|| vec![1.0]);
        Self {
            history: vec![0.0; coeffs.len() - 1],
            coeffs,
            step: 1.0 / converter.ratio(),
            position: 0.0,
            previous: None,
        }
    }

    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        let taps = self.coeffs.len();
        let mut window = std::mem::take(&mut self.history);
        window.extend_from_slice(input);
        let filtered = window.windows(taps).map(|span| {
            span.iter()
                .zip(&self.coeffs)
                .map(|(sample, coeff)| sample * coeff)
                .sum::<f32>()
        });

        // Index 0 is the last filtered sample of the previous push.
        let buffer: Vec<f32> = self.previous.into_iter().chain(filtered).collect();
        self.history = window.split_off(window.len() + 1 - taps);
        let Some(&tail) = buffer.last() else {
            return;
        };

        let last = (buffer.len() - 1) as f64;
        while self.position < last {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            output.push(buffer[index] * (1.0 - frac) + buffer[index + 1] * frac);
            self.position += self.step;
        }
        self.position -= last;
        self.previous = Some(tail);
    }
}

pub(super) fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let output_len = (input.len() as f32 * ratio).round() as usize;
    let last = input.last().copied().unwrap_or(0.0);
    (0..output_len)
        .map(|i| {
            let position = i as f32 / ratio;
            let index = position.floor() as usize;
            let frac = position - index as f32;
            match (input.get(index), input.get(index + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                _ => last,
            }
        })
        .collect()
}

pub(super) fn low_pass_fir(input: &[f32], coeffs: &[f32]) -> Vec<f32> {
    if coeffs.len() <= 1 {
        return input.to_vec();
    }
    let half = coeffs.len() / 2;
    (0..input.len())
        .map(|n| {
            coeffs
                .iter()
                .enumerate()
                .filter_map(|(k, coeff)| {
                    (n + k)
                        .checked_sub(half)
                        .and_then(|idx| input.get(idx))
                        .map(|sample| sample * coeff)
                })
                .sum()
        })
        .collect()
}

/// Hamming-windowed sinc taps, normalized to unit DC gain.
pub(super) fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    if taps <= 1 {
        return vec![1.0];
    }
    let m = (taps - 1) as f32;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|n| {
            let centered = n as f32 - m / 2.0;
            let sinc = if centered == 0.0 {
                2.0 * normalized_cutoff
            } else {
                let x = 2.0 * PI * normalized_cutoff * centered;
                (2.0 * normalized_cutoff * x.sin()) / x
            };
            let window = 0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos();
            sinc * window
        })
        .collect();
    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        coeffs.iter_mut().for_each(|c| *c /= sum);
    }
    coeffs
}

/// Truncate, or pad with the last value, to exactly `len` entries.
#[cfg_attr(not(feature = "high-quality-audio"), allow(dead_code))]
pub(super) fn fit_length<T: Copy + Default>(data: &mut Vec<T>, len: usize) {
    match data.len().cmp(&len) {
        CmpOrdering::Greater => data.truncate(len),
        CmpOrdering::Less => {
            let pad = data.last().copied().unwrap_or_default();
            data.resize(len, pad);
        }
        CmpOrdering::Equal => {}
    }
}

pub(super) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}
