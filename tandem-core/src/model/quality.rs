use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Lower bounds (exclusive, in kbps) for each tier above `Poor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub excellent_kbps: u64,
    pub good_kbps: u64,
    pub fair_kbps: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_kbps: 1200,
            good_kbps: 600,
            fair_kbps: 250,
        }
    }
}

impl QualityThresholds {
    pub fn classify(&self, kbps: u64) -> QualityTier {
        if kbps > self.excellent_kbps {
            QualityTier::Excellent
        } else if kbps > self.good_kbps {
            QualityTier::Good
        } else if kbps > self.fair_kbps {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySample {
    pub bitrate_kbps: u64,
    pub packets_sent: u64,
    pub quality_tier: QualityTier,
}

/// `floor(8 * Δbytes / Δms)`. Bits per millisecond is kbps.
///
/// Returns `None` when the timestamps do not move forward. A byte counter
/// that went backwards (stats reset) counts as zero.
pub fn bitrate_kbps(prev: (f64, u64), next: (f64, u64)) -> Option<u64> {
    let (t0, b0) = prev;
    let (t1, b1) = next;
    let elapsed = t1 - t0;
    if !(elapsed > 0.0) {
        return None;
    }
    let bits = 8.0 * b1.saturating_sub(b0) as f64;
    Some((bits / elapsed).floor() as u64)
}
