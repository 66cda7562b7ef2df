use log::debug;
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::block::{Block, NonceRecord};
use super::crypto::HashError;

/// Errors that can occur during a proof-of-work search
#[derive(Debug, Error)]
pub enum PowError {
    #[error("Hash error: {0}")]
    HashError(#[from] HashError),

    #[error("Proof of work cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Source of the elapsed-work measurements recorded in nonce records
pub trait WorkClock: Send + Sync {
    /// Monotonic reading in microseconds
    fn now_micros(&self) -> u64;
}

/// Wall clock measured from process-local monotonic time
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkClock for SystemClock {
    fn now_micros(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Shared flag asking a running proof-of-work search to stop
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    /// Signals every search holding this flag. Once set the flag stays set.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Searches nonces whose block hash starts with a run of '0' hex digits
#[derive(Clone)]
pub struct ProofOfWork {
    /// Number of leading zeros required in hash
    difficulty: usize,

    clock: Arc<dyn WorkClock>,

    /// Checked between nonce attempts
    cancel: CancelFlag,
}

impl std::fmt::Debug for ProofOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofOfWork")
            .field("difficulty", &self.difficulty)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ProofOfWork {
    pub fn new(difficulty: usize, clock: Arc<dyn WorkClock>) -> Self {
        ProofOfWork {
            difficulty,
            clock,
            cancel: CancelFlag::new(),
        }
    }

    /// Makes every search give up once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn clock(&self) -> &Arc<dyn WorkClock> {
        &self.clock
    }

    /// Checks the difficulty predicate against a hex digest
    pub fn meets_difficulty(&self, hash: &str) -> bool {
        hash.len() >= self.difficulty && hash.bytes().take(self.difficulty).all(|b| b == b'0')
    }

    /// Finds the first nonce, counting up from 0, for which
    /// `tail.hash_block({nonce, cpu: 0})` meets the difficulty
    ///
    /// Blocks the calling thread until a nonce is found or the cancel flag is set.
    pub fn prove(&self, tail: &Block) -> Result<NonceRecord, PowError> {
        let start = self.clock.now_micros();
        let mut nonce: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PowError::Cancelled { attempts: nonce });
            }

            let hash = tail.hash_block(Some(&NonceRecord::new(nonce, 0)))?;
            if self.meets_difficulty(&hash) {
                let cpu = self.clock.now_micros().saturating_sub(start);
                debug!("Found nonce {} for block {} ({} us)", nonce, tail.index, cpu);
                return Ok(NonceRecord::new(nonce, cpu));
            }

            nonce += 1;
        }
    }

    /// Checks that `record` solves the puzzle posed by `tail`
    pub fn verify(&self, tail: &Block, record: &NonceRecord) -> bool {
        match tail.hash_block(Some(&NonceRecord::new(record.nonce, 0))) {
            Ok(hash) => self.meets_difficulty(&hash),
            Err(_) => false,
        }
    }
}

/// Clock advancing by a fixed step on every reading
#[cfg(test)]
pub(crate) struct StepClock {
    next: std::sync::atomic::AtomicU64,
    step: u64,
}

#[cfg(test)]
impl StepClock {
    pub(crate) fn new(step: u64) -> Self {
        StepClock {
            next: std::sync::atomic::AtomicU64::new(0),
            step,
        }
    }
}

#[cfg(test)]
impl WorkClock for StepClock {
    fn now_micros(&self) -> u64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}
