//! Audio-callback side of the microphone source: downmix, cut into
//! device-rate frames, and hand them to the capture thread without blocking.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Average interleaved channels into mono, converting each sample to f32.
pub(super) fn downmix_into<T, F>(out: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        out.extend(data.iter().copied().map(&mut convert));
        return;
    }
    for group in data.chunks(channels) {
        let sum: f32 = group.iter().copied().map(&mut convert).sum();
        out.push(sum / group.len() as f32);
    }
}

/// Buffers callback data and emits fixed-length mono frames.
///
/// A full channel drops the frame and counts it; the callback never waits.
pub(super) struct FrameDispatcher {
    frame_samples: usize,
    pending: Vec<f32>,
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl FrameDispatcher {
    pub(super) fn new(
        frame_samples: usize,
        sender: Sender<Vec<f32>>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        downmix_into(&mut self.pending, data, channels, convert);
        while self.pending.len() >= self.frame_samples {
            let frame: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            match self.sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.clear();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn downmix_averages_interleaved_channels() {
        let mut out = Vec::new();
        downmix_into(&mut out, &[1.0f32, 3.0, -2.0, 2.0], 2, |s| s);
        assert_eq!(out, vec![2.0, 0.0]);
    }

    #[test]
    fn downmix_keeps_partial_trailing_group() {
        let mut out = Vec::new();
        downmix_into(&mut out, &[1.0f32, 3.0, 5.0], 2, |s| s);
        assert_eq!(out, vec![2.0, 5.0]);
    }

    #[test]
    fn dispatcher_emits_whole_frames_only() {
        let (tx, rx) = bounded(8);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = FrameDispatcher::new(4, tx, dropped.clone());
        dispatcher.push(&[0.5f32; 6], 1, |s| s);
        assert_eq!(rx.try_recv().map(|f| f.len()), Ok(4));
        assert!(rx.try_recv().is_err());
        dispatcher.push(&[0.5f32; 2], 1, |s| s);
        assert_eq!(rx.try_recv().map(|f| f.len()), Ok(4));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn dispatcher_counts_frames_dropped_on_full_channel() {
        let (tx, _rx) = bounded(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = FrameDispatcher::new(2, tx, dropped.clone());
        dispatcher.push(&[0i16; 6], 1, |s| f32::from(s));
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
