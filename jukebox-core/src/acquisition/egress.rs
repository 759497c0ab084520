use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::AcquisitionError;
use crate::config::EgressConfig;
use crate::metrics;

/// Ordered list of egress paths and the one currently in use.
///
/// The index survives across operations: once a path is blocked, later
/// operations start from the next one.
pub struct EgressRotation {
    egresses: Vec<EgressConfig>,
    index: Mutex<usize>,
    rotations: AtomicU64,
}

impl EgressRotation {
    pub fn new(egresses: Vec<EgressConfig>) -> Result<Self, AcquisitionError> {
        if egresses.is_empty() {
            return Err(AcquisitionError::Failed(
                "No egress paths configured".to_string(),
            ));
        }
        Ok(Self {
            egresses,
            index: Mutex::new(0),
            rotations: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.egresses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.egresses.is_empty()
    }

    #[must_use]
    pub fn current(&self) -> EgressConfig {
        self.egresses[*self.index.lock()].clone()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        *self.index.lock()
    }

    /// Total rotations since startup.
    #[must_use]
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Advance to the next egress, wrapping at the end.
    pub fn rotate(&self) -> EgressConfig {
        let next = {
            let mut index = self.index.lock();
            *index = (*index + 1) % self.egresses.len();
            self.egresses[*index].clone()
        };
        self.rotations.fetch_add(1, Ordering::Relaxed);
        metrics::EGRESS_ROTATIONS.inc();
        debug!(egress = %next.name, "Rotated egress");
        next
    }

    /// Run `attempt` against the current egress, rotating and retrying from
    /// scratch on block signals. Each egress is tried at most once per call.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, AcquisitionError>
    where
        F: FnMut(EgressConfig) -> Fut,
        Fut: Future<Output = Result<T, AcquisitionError>>,
    {
        let attempts = self.len();
        let mut last = String::new();

        for _ in 0..attempts {
            let egress = self.current();
            match attempt(egress.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_block() => {
                    metrics::ACQUISITION_FAILURES
                        .with_label_values(&[operation, err.kind()])
                        .inc();
                    warn!(egress = %egress.name, operation, error = %err, "Egress blocked");
                    last = err.to_string();
                    self.rotate();
                }
                Err(err) => {
                    metrics::ACQUISITION_FAILURES
                        .with_label_values(&[operation, err.kind()])
                        .inc();
                    return Err(err);
                }
            }
        }

        metrics::ACQUISITION_FAILURES
            .with_label_values(&[operation, "exhausted"])
            .inc();
        Err(AcquisitionError::Exhausted { attempts, last })
    }
}
