use nvml_wrapper::Nvml;
use serde::Serialize;
use sysinfo::System;

/// Structured inventory snapshot handed to the capability scorer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HardwareInventory {
    pub gpu_name: Option<String>,
    pub logical_cores: usize,
    pub total_memory_mb: u64,
}

/// Collects the inventory once. Probing never fails: a machine without an
/// NVML-capable adapter simply reports no GPU name and the scorer treats
/// it as unknown.
pub fn probe() -> HardwareInventory {
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.refresh_memory();

    let inventory = HardwareInventory {
        gpu_name: probe_gpu_name(),
        logical_cores: sys.cpus().len(),
        total_memory_mb: sys.total_memory() / (1024 * 1024),
    };
    tracing::debug!(
        gpu = inventory.gpu_name.as_deref().unwrap_or("unknown"),
        cores = inventory.logical_cores,
        memory_mb = inventory.total_memory_mb,
        "hardware inventory collected"
    );
    inventory
}

fn probe_gpu_name() -> Option<String> {
    let nvml = Nvml::init().ok()?;
    let device = nvml.device_by_index(0).ok()?;
    device.name().ok()
}
