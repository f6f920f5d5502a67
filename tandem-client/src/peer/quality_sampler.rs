use crate::transport::{OutboundVideoStats, PeerEvent, PeerTransport};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{LinkId, QualitySample, QualityThresholds, bitrate_kbps};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

/// Turns consecutive outbound-video counters into quality samples. The
/// first observation only seeds the previous point.
#[derive(Debug, Clone)]
pub struct QualitySampler {
    thresholds: QualityThresholds,
    previous: Option<(f64, u64)>,
}

impl QualitySampler {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            previous: None,
        }
    }

    pub fn observe(&mut self, stats: OutboundVideoStats) -> Option<QualitySample> {
        let next = (stats.timestamp_ms, stats.bytes_sent);
        let previous = self.previous.replace(next)?;
        let kbps = bitrate_kbps(previous, next)?;

        Some(QualitySample {
            bitrate_kbps: kbps,
            packets_sent: stats.packets_sent,
            quality_tier: self.thresholds.classify(kbps),
        })
    }
}

/// Polls `transport` every `period` and reports samples as
/// [`PeerEvent::Quality`]. Stats failures skip the tick.
pub(crate) fn spawn_sampler(
    link_id: LinkId,
    transport: Arc<dyn PeerTransport>,
    period: Duration,
    thresholds: QualityThresholds,
    events: mpsc::Sender<PeerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = QualitySampler::new(thresholds);
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            ticker.tick().await;
            let stats = match transport.outbound_video_stats().await {
                Ok(Some(stats)) => stats,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping stats tick for link {}: {:?}", link_id, e);
                    continue;
                }
            };
            let Some(sample) = sampler.observe(stats) else {
                continue;
            };
            if events.send(PeerEvent::Quality(link_id, sample)).await.is_err() {
                break;
            }
        }
    })
}
