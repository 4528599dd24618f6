/// Traffic and trust bookkeeping for one connection.
///
/// Punishments stack: each punishment is lifted by its own timer, so the
/// connection counts as punished while any of them is outstanding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMeter {
    last_seen_ms: u64,
    punishments: u32,
    protected: bool,
}

impl ConnectionMeter {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_seen_ms: now_ms,
            ..Self::default()
        }
    }

    /// Record traffic at `now_ms`.
    pub fn seen(&mut self, now_ms: u64) {
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen_ms
    }

    /// `true` once nothing was seen for longer than `expiry_ms`.
    pub fn is_last_seen_expired(&self, now_ms: u64, expiry_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > expiry_ms
    }

    pub fn punish(&mut self) {
        self.punishments += 1;
    }

    pub fn unpunish(&mut self) {
        self.punishments = self.punishments.saturating_sub(1);
    }

    pub fn is_punished(&self) -> bool {
        self.punishments > 0
    }

    pub fn punishments(&self) -> u32 {
        self.punishments
    }

    pub fn protect(&mut self) {
        self.protected = true;
    }

    pub fn unprotect(&mut self) {
        self.protected = false;
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_strictly_after_window() {
        let mut meter = ConnectionMeter::new(1_000);
        assert!(!meter.is_last_seen_expired(61_000, 60_000));
        assert!(meter.is_last_seen_expired(61_001, 60_000));
        meter.seen(50_000);
        assert!(!meter.is_last_seen_expired(61_001, 60_000));
    }

    #[test]
    fn seen_never_moves_backwards() {
        let mut meter = ConnectionMeter::new(500);
        meter.seen(100);
        assert_eq!(meter.last_seen(), 500);
    }

    #[test]
    fn punishments_stack() {
        let mut meter = ConnectionMeter::new(0);
        meter.punish();
        meter.punish();
        meter.unpunish();
        assert!(meter.is_punished());
        meter.unpunish();
        meter.unpunish();
        assert!(!meter.is_punished());
        assert_eq!(meter.punishments(), 0);
    }
}
