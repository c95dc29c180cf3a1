//! Learning-rate reduction when validation loss stops improving.

use civic_core::PlateauConfig;

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// an improvement of at least `min_delta` in validation loss.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    best: f64,
    wait: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
            cooldown_counter: 0,
        }
    }

    /// Forget the monitored history (called at the start of every phase).
    pub fn reset(&mut self) {
        self.best = f64::INFINITY;
        self.wait = 0;
        self.cooldown_counter = 0;
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Record one epoch's validation loss.
    ///
    /// Returns the new learning rate when a reduction happens.
    pub fn on_epoch_end(&mut self, val_loss: f64, current_lr: f64) -> Option<f64> {
        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if val_loss < self.best - self.config.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }

        if self.cooldown_counter > 0 {
            return None;
        }

        self.wait += 1;
        if self.wait < self.config.patience || current_lr <= self.config.min_lr {
            return None;
        }

        self.cooldown_counter = self.config.cooldown;
        self.wait = 0;
        Some((current_lr * self.config.factor).max(self.config.min_lr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plateau(patience: usize) -> ReduceLrOnPlateau {
        ReduceLrOnPlateau::new(PlateauConfig {
            patience,
            ..PlateauConfig::default()
        })
    }

    #[test]
    fn test_reduces_after_patience() {
        let mut cb = plateau(2);
        assert_eq!(cb.on_epoch_end(1.0, 1e-3), None);
        assert_eq!(cb.on_epoch_end(1.0, 1e-3), None);
        let lr = cb.on_epoch_end(1.0, 1e-3).unwrap();
        assert!((lr - 2e-4).abs() < 1e-12);
        // wait restarts after a reduction
        assert_eq!(cb.on_epoch_end(1.0, lr), None);
    }

    #[test]
    fn test_improvement_must_exceed_min_delta() {
        let mut cb = plateau(1);
        cb.on_epoch_end(1.0, 1e-3);
        // 0.99995 is within min_delta of 1.0
        assert!(cb.on_epoch_end(0.99995, 1e-3).is_some());
        assert_eq!(cb.best(), 1.0);
        assert_eq!(cb.on_epoch_end(0.5, 1e-3), None);
        assert_eq!(cb.best(), 0.5);
    }

    #[test]
    fn test_clamps_to_min_lr() {
        let mut cb = plateau(1);
        cb.on_epoch_end(1.0, 1e-3);
        let lr = cb.on_epoch_end(2.0, 3e-7).unwrap();
        assert_eq!(lr, 1e-7);
        // at the floor nothing changes any more
        assert_eq!(cb.on_epoch_end(2.0, 1e-7), None);
    }

    #[test]
    fn test_cooldown_suppresses_reductions() {
        let mut cb = ReduceLrOnPlateau::new(PlateauConfig {
            patience: 1,
            cooldown: 2,
            ..PlateauConfig::default()
        });
        cb.on_epoch_end(1.0, 1e-3);
        assert!(cb.on_epoch_end(1.0, 1e-3).is_some());
        assert_eq!(cb.on_epoch_end(1.0, 2e-4), None);
        // cooldown has run out by the second epoch after the reduction
        assert!(cb.on_epoch_end(1.0, 2e-4).is_some());
    }

    #[test]
    fn test_reset_forgets_best() {
        let mut cb = plateau(5);
        cb.on_epoch_end(0.1, 1e-3);
        cb.reset();
        assert_eq!(cb.best(), f64::INFINITY);
    }
}
