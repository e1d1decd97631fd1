use rand::{Rng, rng};
use shared::error::Result;
use std::collections::HashSet;
use std::sync::Mutex;

/// Hands out SSRCs unique among the streams sharing the allocator.
pub trait SsrcAllocator: Send + Sync {
    fn create_ssrc(&self) -> Result<u32>;
    /// Claims an SSRC picked elsewhere. Returns false if it was in use.
    fn register_ssrc(&self, ssrc: u32) -> Result<bool>;
    fn return_ssrc(&self, ssrc: u32) -> Result<()>;
}

/// Random, non-zero SSRCs tracked in a set.
#[derive(Debug, Default)]
pub struct SsrcDatabase {
    in_use: Mutex<HashSet<u32>>,
}

impl SsrcDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SsrcAllocator for SsrcDatabase {
    fn create_ssrc(&self) -> Result<u32> {
        let mut in_use = self.in_use.lock()?;
        let mut rng = rng();
        loop {
            let ssrc: u32 = rng.random();
            if ssrc != 0 && in_use.insert(ssrc) {
                return Ok(ssrc);
            }
        }
    }

    fn register_ssrc(&self, ssrc: u32) -> Result<bool> {
        let mut in_use = self.in_use.lock()?;
        Ok(in_use.insert(ssrc))
    }

    fn return_ssrc(&self, ssrc: u32) -> Result<()> {
        let mut in_use = self.in_use.lock()?;
        in_use.remove(&ssrc);
        Ok(())
    }
}
