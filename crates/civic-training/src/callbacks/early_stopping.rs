//! Early stopping on validation loss.

use civic_core::EarlyStoppingConfig;

/// Outcome of one [`EarlyStopping::on_epoch_end`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDecision {
    /// The epoch set a new best validation loss
    pub improved: bool,
    /// Training should stop after this epoch
    pub stop: bool,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    config: EarlyStoppingConfig,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn reset(&mut self) {
        self.best = f64::INFINITY;
        self.best_epoch = None;
        self.wait = 0;
        self.stopped_epoch = None;
    }

    pub fn restore_best_weights(&self) -> bool {
        self.config.restore_best_weights
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Record the validation loss of `epoch` (zero-based).
    pub fn on_epoch_end(&mut self, epoch: usize, val_loss: f64) -> StopDecision {
        self.wait += 1;

        if val_loss + self.config.min_delta < self.best {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return StopDecision {
                improved: true,
                stop: false,
            };
        }

        let stop = self.wait >= self.config.patience && epoch > 0;
        if stop {
            self.stopped_epoch = Some(epoch);
        }
        StopDecision {
            improved: false,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn early_stopping(patience: usize) -> EarlyStopping {
        EarlyStopping::new(EarlyStoppingConfig {
            patience,
            ..EarlyStoppingConfig::default()
        })
    }

    #[test]
    fn test_stops_after_patience_epochs_without_improvement() {
        let mut es = early_stopping(2);
        assert!(es.on_epoch_end(0, 1.0).improved);
        assert!(!es.on_epoch_end(1, 1.1).stop);
        let decision = es.on_epoch_end(2, 1.2);
        assert!(decision.stop);
        assert_eq!(es.stopped_epoch(), Some(2));
        assert_eq!(es.best_epoch(), Some(0));
    }

    #[test]
    fn test_improvement_resets_wait() {
        let mut es = early_stopping(2);
        es.on_epoch_end(0, 1.0);
        es.on_epoch_end(1, 1.1);
        assert!(es.on_epoch_end(2, 0.9).improved);
        assert!(!es.on_epoch_end(3, 0.95).stop);
        assert!(es.on_epoch_end(4, 0.95).stop);
        assert_eq!(es.best_epoch(), Some(2));
    }

    #[test]
    fn test_never_stops_on_first_epoch() {
        let mut es = early_stopping(0);
        let decision = es.on_epoch_end(0, f64::NAN);
        assert!(!decision.stop);
        assert!(es.on_epoch_end(1, f64::NAN).stop);
    }

    #[test]
    fn test_reset_between_phases() {
        let mut es = early_stopping(1);
        es.on_epoch_end(0, 0.2);
        es.on_epoch_end(1, 0.3);
        es.reset();
        assert_eq!(es.best_epoch(), None);
        assert_eq!(es.stopped_epoch(), None);
        assert!(es.on_epoch_end(0, 0.5).improved);
    }
}
