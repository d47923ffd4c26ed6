//! Dry-run channel: logs every message instead of sending it.

use crate::dispatch::{MediaItem, MessagingChannel};
use crate::error::ChannelError;
use crate::utils::{mask_phone, normalize_phone, truncate_str};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct DryRunChannel {
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    attempts: AtomicUsize,
}

impl Default for DryRunChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunChannel {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            failure_rate: 0.0,
            rng: Mutex::new(StdRng::from_os_rng()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Simulated provider round-trip per send
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fraction of sends that fail, clamped to `0.0..=1.0`
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Sends attempted so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    async fn simulate(&self, destination: &str) -> Result<(), ChannelError> {
        normalize_phone(destination)
            .ok_or_else(|| ChannelError::InvalidDestination(destination.to_string()))?;
        self.attempts.fetch_add(1, Ordering::Relaxed);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fail = self.failure_rate > 0.0
            && self
                .rng
                .lock()
                .map(|mut rng| rng.random_bool(self.failure_rate))
                .unwrap_or(false);
        if fail {
            return Err(ChannelError::Rejected {
                status: 503,
                body: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingChannel for DryRunChannel {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
        self.simulate(destination).await?;
        tracing::info!(
            "[dry-run] text to {}: {}",
            mask_phone(destination),
            truncate_str(body, 80)
        );
        Ok(())
    }

    async fn send_media(
        &self,
        destination: &str,
        media: &MediaItem,
        caption: Option<String>,
    ) -> Result<(), ChannelError> {
        self.simulate(destination).await?;
        tracing::info!(
            "[dry-run] {} to {} (caption: {})",
            media.file_name,
            mask_phone(destination),
            caption.as_deref().map(|c| truncate_str(c, 80)).unwrap_or("-")
        );
        Ok(())
    }
}
