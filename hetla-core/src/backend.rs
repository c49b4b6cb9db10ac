//! Process-wide backend descriptor and its configuration.

use crate::device::AcceleratorDevice;
use crate::error::CoreError;
use serde::Deserialize;
use std::sync::Arc;

/// Which memory space a container or operator currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendTag {
    Host,
    Accelerator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorChoice {
    #[default]
    None,
    Wgpu,
    Simulated,
}

/// Kernel launch parameters for the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KernelTuning {
    /// Threads per workgroup. Must be a power of two no larger than 1024.
    pub block_size: u32,
    /// Largest workgroup count in one grid dimension; launches beyond it spill into y.
    pub max_groups_per_dim: u32,
}

impl Default for KernelTuning {
    fn default() -> Self {
        Self {
            block_size: 256,
            max_groups_per_dim: 65535,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Host worker threads; 0 lets rayon pick one per core.
    pub host_threads: usize,
    pub accelerator: AcceleratorChoice,
    pub tuning: KernelTuning,
}

impl BackendConfig {
    /// Defaults overlaid with `HETLA_HOST_THREADS`, `HETLA_ACCELERATOR`
    /// (`none` | `wgpu` | `simulated`) and `HETLA_BLOCK_SIZE`.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();
        if let Ok(threads) = std::env::var("HETLA_HOST_THREADS") {
            config.host_threads = threads.trim().parse().map_err(|_| {
                CoreError::InvalidConfig(format!("HETLA_HOST_THREADS is not a count: {threads}"))
            })?;
        }
        if let Ok(choice) = std::env::var("HETLA_ACCELERATOR") {
            config.accelerator = match choice.trim().to_ascii_lowercase().as_str() {
                "" | "none" => AcceleratorChoice::None,
                "wgpu" => AcceleratorChoice::Wgpu,
                "simulated" => AcceleratorChoice::Simulated,
                other => {
                    return Err(CoreError::InvalidConfig(format!(
                        "HETLA_ACCELERATOR must be none, wgpu or simulated, got {other}"
                    )))
                }
            };
        }
        if let Ok(block) = std::env::var("HETLA_BLOCK_SIZE") {
            config.tuning.block_size = block.trim().parse().map_err(|_| {
                CoreError::InvalidConfig(format!("HETLA_BLOCK_SIZE is not a number: {block}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let block = self.tuning.block_size;
        if block == 0 || !block.is_power_of_two() || block > 1024 {
            return Err(CoreError::InvalidConfig(format!(
                "block_size must be a power of two in 1..=1024, got {block}"
            )));
        }
        if self.tuning.max_groups_per_dim == 0 {
            return Err(CoreError::InvalidConfig(
                "max_groups_per_dim must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Describes the execution backends available to the process.
///
/// Built once and shared read-only (`Arc`) by every vector and matrix.
#[derive(Debug)]
pub struct BackendDescriptor {
    host_threads: usize,
    pool: rayon::ThreadPool,
    accelerator: Option<Arc<AcceleratorDevice>>,
    tuning: KernelTuning,
}

impl BackendDescriptor {
    /// Builds the descriptor, requesting a GPU adapter if the configuration asks for one.
    pub async fn init(config: BackendConfig) -> Result<Arc<Self>, CoreError> {
        config.validate()?;
        let accelerator = match config.accelerator {
            AcceleratorChoice::None => None,
            AcceleratorChoice::Simulated => Some(Arc::new(AcceleratorDevice::simulated())),
            AcceleratorChoice::Wgpu => Some(Arc::new(AcceleratorDevice::wgpu(config.tuning).await?)),
        };
        let descriptor = Self::assemble(config, accelerator)?;
        log::info!(
            "Backend ready: {} host threads, accelerator: {}",
            descriptor.host_threads,
            descriptor
                .accelerator
                .as_ref()
                .map(|a| a.name())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(Arc::new(descriptor))
    }

    /// Blocking variant of [`BackendDescriptor::init`].
    pub fn init_blocking(config: BackendConfig) -> Result<Arc<Self>, CoreError> {
        pollster::block_on(Self::init(config))
    }

    /// A descriptor without accelerator, using the default host pool.
    pub fn host_only() -> Result<Arc<Self>, CoreError> {
        Self::init_blocking(BackendConfig::default())
    }

    /// A descriptor whose accelerator is an emulated memory space in host RAM.
    pub fn with_simulated_accelerator() -> Result<Arc<Self>, CoreError> {
        Self::init_blocking(BackendConfig {
            accelerator: AcceleratorChoice::Simulated,
            ..BackendConfig::default()
        })
    }

    fn assemble(
        config: BackendConfig,
        accelerator: Option<Arc<AcceleratorDevice>>,
    ) -> Result<Self, CoreError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.host_threads)
            .thread_name(|i| format!("hetla-host-{i}"))
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to build host thread pool: {e}")))?;
        Ok(Self {
            host_threads: pool.current_num_threads(),
            pool,
            accelerator,
            tuning: config.tuning,
        })
    }

    pub fn host_threads(&self) -> usize {
        self.host_threads
    }

    pub fn tuning(&self) -> KernelTuning {
        self.tuning
    }

    pub fn accelerator(&self) -> Option<&Arc<AcceleratorDevice>> {
        self.accelerator.as_ref()
    }

    pub fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    /// Runs host kernels inside the descriptor's thread pool.
    pub(crate) fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }
}
