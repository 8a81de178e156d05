//! Energy input.
//!
//! How energy is captured (mouse button, sensor, keyboard) is up to the host
//! application. The send loop only asks an `EnergySource` for the current
//! reading once per send tick.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use storm_shared::net::EnergyPacket;

/// Energy reported while the input is held.
pub const PRESSED_ENERGY: f32 = 1.0;
/// Energy reported while the input is released.
pub const RELEASED_ENERGY: f32 = 0.2;

/// Anything that can report the current energy scalar.
pub trait EnergySource: Send {
    fn sample(&mut self) -> f32;
}

impl<F> EnergySource for F
where
    F: FnMut() -> f32 + Send,
{
    fn sample(&mut self) -> f32 {
        self()
    }
}

/// Always reports the same value.
#[derive(Debug, Clone, Copy)]
pub struct ConstantEnergy(pub f32);

impl EnergySource for ConstantEnergy {
    fn sample(&mut self) -> f32 {
        self.0
    }
}

/// Binary input: high while pressed, low otherwise.
///
/// The pressed flag is shared, so a UI or console thread can flip it through
/// a cloned `EnergySwitch` while the send loop owns the source.
#[derive(Debug, Clone)]
pub struct SwitchEnergy {
    pressed: Arc<AtomicBool>,
}

impl SwitchEnergy {
    pub fn new() -> (Self, EnergySwitch) {
        let pressed = Arc::new(AtomicBool::new(false));
        (
            Self {
                pressed: pressed.clone(),
            },
            EnergySwitch { pressed },
        )
    }
}

impl EnergySource for SwitchEnergy {
    fn sample(&mut self) -> f32 {
        if self.pressed.load(Ordering::Relaxed) {
            PRESSED_ENERGY
        } else {
            RELEASED_ENERGY
        }
    }
}

/// Control side of a `SwitchEnergy`.
#[derive(Debug, Clone)]
pub struct EnergySwitch {
    pressed: Arc<AtomicBool>,
}

impl EnergySwitch {
    pub fn set_pressed(&self, pressed: bool) {
        self.pressed.store(pressed, Ordering::Relaxed);
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}

/// Samples `source` into a packet. Non-finite readings are sent as 0.
pub fn build_packet<E: EnergySource + ?Sized>(source: &mut E) -> EnergyPacket {
    let energy = source.sample();
    EnergyPacket {
        energy: if energy.is_finite() { energy } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_follows_pressed_flag() {
        let (mut source, switch) = SwitchEnergy::new();
        assert_eq!(source.sample(), RELEASED_ENERGY);
        switch.set_pressed(true);
        assert_eq!(source.sample(), PRESSED_ENERGY);
        switch.set_pressed(false);
        assert_eq!(build_packet(&mut source).energy, RELEASED_ENERGY);
    }

    #[test]
    fn closures_are_sources() {
        let mut n = 0.0f32;
        let mut source = move || {
            n += 0.5;
            n
        };
        assert_eq!(build_packet(&mut source).energy, 0.5);
        assert_eq!(build_packet(&mut source).energy, 1.0);
    }

    #[test]
    fn non_finite_readings_become_zero() {
        assert_eq!(build_packet(&mut ConstantEnergy(f32::NAN)).energy, 0.0);
    }
}
