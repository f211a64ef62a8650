//! Pedal state shared by every voice.

/// Damper, sostenuto and soft-pedal switches. The sostenuto trigger is the
/// rising edge of the pedal; it is consumed at the next block boundary so
/// only keys held at the press latch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PedalState {
    pub damper: bool,
    pub sostenuto: bool,
    pub sostenuto_trigger: bool,
    pub shift: bool,
}

impl PedalState {
    pub fn set_damper(&mut self, on: bool) {
        self.damper = on;
    }

    pub fn set_shift(&mut self, on: bool) {
        self.shift = on;
    }

    pub fn set_sostenuto(&mut self, on: bool) {
        self.sostenuto_trigger = !self.sostenuto && on;
        self.sostenuto = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sostenuto_trigger_is_edge_only() {
        let mut p = PedalState::default();
        p.set_sostenuto(true);
        assert!(p.sostenuto && p.sostenuto_trigger);
        p.set_sostenuto(true);
        assert!(p.sostenuto && !p.sostenuto_trigger);
        p.set_sostenuto(false);
        assert!(!p.sostenuto && !p.sostenuto_trigger);
    }
}
