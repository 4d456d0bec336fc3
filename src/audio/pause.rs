use std::time::Duration;

/// Tracks silence gaps inside an utterance.
///
/// A gap shorter than the tolerance is a breath; once a gap reaches the
/// tolerance the detector asks for the utterance to end. Time is stream time,
/// supplied by the caller with each frame.
#[derive(Debug, Clone)]
pub struct PauseDetector {
    tolerance: Duration,
    pause_started: Option<Duration>,
}

impl PauseDetector {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            pause_started: None,
        }
    }

    /// Feed one frame's speech decision. Returns true when the current pause
    /// has lasted at least the tolerance.
    pub fn update(&mut self, is_speech: bool, at: Duration) -> bool {
        if is_speech {
            self.pause_started = None;
            return false;
        }
        match self.pause_started {
            None => {
                self.pause_started = Some(at);
                false
            }
            Some(started) => at.saturating_sub(started) >= self.tolerance,
        }
    }

    pub fn in_pause(&self) -> bool {
        self.pause_started.is_some()
    }

    /// Length of the current pause, if any.
    pub fn pause_length(&self, now: Duration) -> Option<Duration> {
        self.pause_started.map(|started| now.saturating_sub(started))
    }

    pub fn reset(&mut self) {
        self.pause_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn first_silent_frame_only_starts_the_timer() {
        let mut detector = PauseDetector::new(ms(1_500));
        assert!(!detector.update(false, ms(100)));
        assert!(detector.in_pause());
    }

    #[test]
    fn breath_then_long_pause() {
        let mut detector = PauseDetector::new(ms(1_500));
        assert!(!detector.update(true, ms(0)));
        assert!(!detector.update(false, ms(100)));
        assert!(!detector.update(false, ms(1_500)));
        assert_eq!(detector.pause_length(ms(1_500)), Some(ms(1_400)));
        assert!(detector.update(false, ms(1_700)));
    }

    #[test]
    fn reaching_tolerance_exactly_ends() {
        let mut detector = PauseDetector::new(ms(1_500));
        detector.update(false, ms(0));
        assert!(detector.update(false, ms(1_500)));
    }

    #[test]
    fn speech_clears_the_pause() {
        let mut detector = PauseDetector::new(ms(1_500));
        detector.update(false, ms(0));
        detector.update(false, ms(1_000));
        assert!(!detector.update(true, ms(1_100)));
        assert!(!detector.in_pause());
        assert!(!detector.update(false, ms(2_000)));
        assert!(!detector.update(false, ms(3_000)));
    }

    #[test]
    fn reset_forgets_the_pause() {
        let mut detector = PauseDetector::new(ms(1_500));
        detector.update(false, ms(0));
        detector.reset();
        assert!(!detector.update(false, ms(5_000)));
    }
}
