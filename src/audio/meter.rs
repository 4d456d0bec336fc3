use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const FLOOR_DB: f64 = -60.0;

/// Lock-free view of the latest frame volume for status displays.
#[derive(Clone, Debug, Default)]
pub struct LiveMeter {
    volume_bits: Arc<AtomicU64>,
}

impl LiveMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest RMS volume in raw i16 sample units.
    pub fn set_volume(&self, volume: f64) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f64 {
        f64::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Volume relative to i16 full scale, floored at -60 dBFS.
    pub fn level_db(&self) -> f64 {
        volume_to_dbfs(self.volume())
    }

    pub fn reset(&self) {
        self.set_volume(0.0);
    }
}

pub(crate) fn volume_to_dbfs(volume: f64) -> f64 {
    let normalized = volume / f64::from(i16::MAX);
    if normalized <= 0.0 {
        return FLOOR_DB;
    }
    (20.0 * normalized.log10()).max(FLOOR_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_meter_defaults_to_floor() {
        let meter = LiveMeter::new();
        assert_eq!(meter.volume(), 0.0);
        assert_eq!(meter.level_db(), FLOOR_DB);
    }

    #[test]
    fn clones_share_the_level() {
        let meter = LiveMeter::new();
        let reader = meter.clone();
        meter.set_volume(f64::from(i16::MAX));
        assert!(reader.level_db().abs() < 1e-9);
        meter.reset();
        assert_eq!(reader.volume(), 0.0);
    }

    #[test]
    fn quiet_volume_is_floored() {
        assert_eq!(volume_to_dbfs(0.001), FLOOR_DB);
    }
}
