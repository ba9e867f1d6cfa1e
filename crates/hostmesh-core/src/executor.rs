//! The application executor (spec §1, out of scope beyond this interface):
//! "a stub invoked as `execute(bytes) -> bytes` taking a bounded random
//! time." Execution failure inside the stub is out of scope; it always
//! returns bytes (spec §7).

use std::time::Duration;

use rand::Rng;

#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, data: &[u8]) -> Vec<u8>;
}

/// Sleeps a duration drawn uniformly from `[min, max]` and echoes a fixed
/// demo result, standing in for real application execution (spec Non-goals:
/// "real application execution" is explicitly excluded).
pub struct SimulatedExecutor {
    pub min: Duration,
    pub max: Duration,
}

impl SimulatedExecutor {
    pub fn new(min: Duration, max: Duration) -> Self {
        SimulatedExecutor { min, max }
    }
}

#[async_trait::async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, _data: &[u8]) -> Vec<u8> {
        let delay = if self.max > self.min {
            let extra = rand::thread_rng().gen_range(0..=(self.max - self.min).as_millis());
            self.min + Duration::from_millis(extra as u64)
        } else {
            self.min
        };
        tokio::time::sleep(delay).await;
        b"result".to_vec()
    }
}
