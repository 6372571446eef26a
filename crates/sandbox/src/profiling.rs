//! Sampling profiler. The machine records the pc every few thousand
//! instructions; hotspots are those samples grouped by guest function.

use std::collections::HashMap;

use serde::Serialize;
use types::ObjectGraph;

use crate::error::SandboxError;
use crate::sandbox::Sandbox;

/// One guest function and how many samples landed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hotspot {
    pub function: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HotspotReport {
    /// The busiest functions, most samples first.
    pub hotspots: Vec<Hotspot>,
    /// Distinct functions seen in any sample.
    pub functions: usize,
    pub total_samples: u64,
}

impl<H: ObjectGraph> Sandbox<H> {
    /// Starts or stops sampling. Samples survive a change of interval but
    /// not a stop, and stopping is refused while a call is running.
    pub fn enable_profiling(&mut self, enable: bool, interval: u64) -> Result<(), SandboxError> {
        if enable {
            self.machine.enable_sampling(interval);
            log::debug!("profiling every {} instructions", interval.max(1));
            return Ok(());
        }
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("enable_profiling"));
        }
        self.machine.disable_sampling();
        Ok(())
    }

    pub fn is_profiling(&self) -> bool {
        self.machine.sampler().is_some()
    }

    /// The `total` busiest guest functions. Samples outside any known
    /// function are grouped under `??`.
    pub fn hotspots(&self, total: usize) -> HotspotReport {
        let Some(sampler) = self.machine.sampler() else {
            log::warn!("hotspots requested but profiling is not enabled");
            return HotspotReport::default();
        };

        let mut by_function: HashMap<&str, u64> = HashMap::new();
        for (&pc, &count) in sampler.visited() {
            let name = self.core.symbols.lookup(pc).map_or("??", |s| s.name.as_str());
            *by_function.entry(name).or_insert(0) += count;
        }

        let functions = by_function.len();
        let mut hotspots: Vec<Hotspot> =
            by_function.into_iter().map(|(function, count)| Hotspot { function: function.to_owned(), count }).collect();
        hotspots.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.function.cmp(&b.function)));
        hotspots.truncate(total);
        HotspotReport { hotspots, functions, total_samples: sampler.total() }
    }

    pub fn clear_hotspots(&mut self) {
        match self.machine.sampler_mut() {
            Some(sampler) => sampler.clear(),
            None => log::warn!("clear_hotspots: profiling is not enabled"),
        }
    }
}
