//! Storm parameters shared between the network layer and the simulation.
//!
//! The client keeps exactly one current value. It is published by the
//! receive loop and read by the simulation tick through a `watch` channel,
//! so readers always see a whole value, never a half-updated one.

use tokio::sync::watch;

use crate::{math::Vec3, net::StormPacket};

/// Intensity and wind derived by the server for one broadcast tick.
///
/// Only built through `new` (or `From<StormPacket>`), so the intensity is
/// always within `[0, 1]` and both fields are finite.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StormParameters {
    intensity: f32,
    wind: Vec3,
}

impl StormParameters {
    pub fn new(intensity: f32, wind: Vec3) -> Self {
        let intensity = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let wind = if wind.is_finite() { wind } else { Vec3::ZERO };
        Self { intensity, wind }
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn wind(&self) -> Vec3 {
        self.wind
    }

    pub fn to_packet(self) -> StormPacket {
        StormPacket {
            intensity: self.intensity,
            wind_dir: self.wind.to_array(),
        }
    }
}

impl From<StormPacket> for StormParameters {
    fn from(pkt: StormPacket) -> Self {
        Self::new(pkt.intensity, Vec3::from_array(pkt.wind_dir))
    }
}

/// Creates the single-writer publisher and a reader for it.
pub fn storm_channel() -> (StormPublisher, StormFeed) {
    let (tx, rx) = watch::channel(StormParameters::default());
    (StormPublisher { tx }, StormFeed { rx })
}

/// Write side, owned by the receive loop.
#[derive(Debug)]
pub struct StormPublisher {
    tx: watch::Sender<StormParameters>,
}

impl StormPublisher {
    /// Replaces the current value. Works even when no reader is left.
    pub fn publish(&self, params: StormParameters) {
        self.tx.send_replace(params);
    }
}

/// Read side, cloned into whoever consumes the parameters.
#[derive(Debug, Clone)]
pub struct StormFeed {
    rx: watch::Receiver<StormParameters>,
}

impl StormFeed {
    /// Latest published value (or the default before the first packet).
    pub fn current(&self) -> StormParameters {
        *self.rx.borrow()
    }

    /// Waits for the next publish and returns it.
    ///
    /// Fails once the publisher is gone, i.e. the receive loop has ended.
    pub async fn changed(&mut self) -> anyhow::Result<StormParameters> {
        self.rx
            .changed()
            .await
            .map_err(|_| anyhow::anyhow!("storm publisher closed"))?;
        Ok(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_intensity_is_clamped() {
        let high = StormParameters::from(StormPacket {
            intensity: 3.5,
            wind_dir: [0.1, 0.0, 0.9],
        });
        assert_eq!(high.intensity(), 1.0);
        assert_eq!(high.wind(), Vec3::new(0.1, 0.0, 0.9));

        let low = StormParameters::from(StormPacket {
            intensity: -0.5,
            wind_dir: [0.0; 3],
        });
        assert_eq!(low.intensity(), 0.0);
    }

    #[test]
    fn non_finite_values_are_zeroed() {
        let p = StormParameters::new(f32::NAN, Vec3::new(f32::INFINITY, 0.0, 0.0));
        assert_eq!(p, StormParameters::default());
    }

    #[test]
    fn every_constructor_keeps_intensity_in_range() {
        for raw in [-3.0, -0.0, 0.0, 0.42, 1.0, 1.5, f32::INFINITY, f32::NEG_INFINITY] {
            let p = StormParameters::new(raw, Vec3::new(0.5, 0.0, 0.5));
            assert!((0.0..=1.0).contains(&p.intensity()), "{raw} gave {}", p.intensity());
        }
        assert_eq!(StormParameters::default().intensity(), 0.0);
        assert_eq!(StormParameters::new(0.42, Vec3::ZERO).intensity(), 0.42);
    }

    #[tokio::test]
    async fn feed_sees_latest_publish() {
        let (publisher, mut feed) = storm_channel();
        assert_eq!(feed.current(), StormParameters::default());

        let next = StormParameters::new(0.4, Vec3::new(0.5, 0.0, 0.25));
        publisher.publish(StormParameters::new(0.1, Vec3::ZERO));
        publisher.publish(next);

        assert_eq!(feed.changed().await.unwrap(), next);
        assert_eq!(feed.current(), next);

        drop(publisher);
        assert!(feed.changed().await.is_err());
        assert_eq!(feed.current(), next);
    }
}
