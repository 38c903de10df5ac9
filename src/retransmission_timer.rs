use std::time::Duration;

/// The sender's single retransmission timer, running on a virtual clock: `now` is passed in by
///  the caller as the elapsed time since the sender was created, and the timer only stores the
///  deadline derived from it.
///
/// The retransmission timeout (RTO) starts at a configured initial value and doubles with
///  every [RetransmissionTimer::back_off] until it is reset by newly acknowledged data.
#[derive(Debug)]
pub struct RetransmissionTimer {
    initial_rto: Duration,
    rto: Duration,
    expires_at: Option<Duration>,
}

impl RetransmissionTimer {
    pub fn new(initial_rto: Duration) -> RetransmissionTimer {
        RetransmissionTimer {
            initial_rto,
            rto: initial_rto,
            expires_at: None,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn is_running(&self) -> bool {
        self.expires_at.is_some()
    }

    /// start the timer unless it is running already
    pub fn start(&mut self, now: Duration) {
        if self.expires_at.is_none() {
            self.restart(now);
        }
    }

    pub fn restart(&mut self, now: Duration) {
        self.expires_at = Some(now + self.rto);
    }

    pub fn stop(&mut self) {
        self.expires_at = None;
    }

    pub fn has_expired(&self, now: Duration) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    pub fn back_off(&mut self) {
        self.rto = self.rto.saturating_mul(2);
    }

    pub fn reset_rto(&mut self) {
        self.rto = self.initial_rto;
    }
}
