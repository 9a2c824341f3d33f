use crate::hardware::HardwareInventory;
use crate::model::Severity;
use serde::Serialize;

/// A dimension has to trail both others by more than this many points
/// before it is called out as the bottleneck.
const BOTTLENECK_MARGIN: u32 = 20;

/// GPU adapter families, best first. First match wins; anything that does
/// not match lands in `Unknown`, one bucket above the integrated tier.
const GPU_FAMILIES: &[(&str, GpuTier)] = &[
    ("rtx 50", GpuTier::Elite),
    ("rtx 40", GpuTier::Elite),
    ("rx 7900", GpuTier::Elite),
    ("rtx 30", GpuTier::High),
    ("rx 6800", GpuTier::High),
    ("rx 6900", GpuTier::High),
    ("rtx 20", GpuTier::Mainstream),
    ("gtx 16", GpuTier::Mainstream),
    ("rx 5700", GpuTier::Mainstream),
    ("gtx 10", GpuTier::Aging),
    ("rx 580", GpuTier::Aging),
    ("rx 570", GpuTier::Aging),
    ("vega", GpuTier::Aging),
    ("intel(r) uhd", GpuTier::Integrated),
    ("intel(r) hd", GpuTier::Integrated),
    ("iris", GpuTier::Integrated),
    ("radeon(tm) graphics", GpuTier::Integrated),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuTier {
    Elite,
    High,
    Mainstream,
    Aging,
    Unknown,
    Integrated,
}

impl GpuTier {
    fn score(self) -> u32 {
        match self {
            GpuTier::Elite => 95,
            GpuTier::High => 80,
            GpuTier::Mainstream => 65,
            GpuTier::Aging => 50,
            GpuTier::Unknown => 40,
            GpuTier::Integrated => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuTier {
    Workstation,
    Performance,
    Capable,
    Entry,
}

impl CpuTier {
    fn score(self) -> u32 {
        match self {
            CpuTier::Workstation => 95,
            CpuTier::Performance => 80,
            CpuTier::Capable => 60,
            CpuTier::Entry => 35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Abundant,
    Comfortable,
    Adequate,
    Entry,
}

impl MemoryTier {
    fn score(self) -> u32 {
        match self {
            MemoryTier::Abundant => 95,
            MemoryTier::Comfortable => 80,
            MemoryTier::Adequate => 60,
            MemoryTier::Entry => 35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallTier {
    Ultra,
    High,
    Medium,
    Low,
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bottleneck {
    Gpu,
    Cpu,
    Memory,
    None,
}

/// Derived capability view of a hardware inventory. Recomputed from scratch
/// on every call; holds no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityProfile {
    pub gpu_tier: GpuTier,
    pub cpu_tier: CpuTier,
    pub memory_tier: MemoryTier,
    pub overall_tier: OverallTier,
    pub bottleneck: Bottleneck,
}

pub fn score(inventory: &HardwareInventory) -> CapabilityProfile {
    let gpu_tier = classify_gpu(inventory.gpu_name.as_deref());
    let cpu_tier = classify_cpu(inventory.logical_cores);
    let memory_tier = classify_memory(inventory.total_memory_mb);

    let gpu = gpu_tier.score();
    let cpu = cpu_tier.score();
    let memory = memory_tier.score();

    CapabilityProfile {
        gpu_tier,
        cpu_tier,
        memory_tier,
        overall_tier: overall(gpu.min(cpu).min(memory)),
        bottleneck: bottleneck(gpu, cpu, memory),
    }
}

fn classify_gpu(name: Option<&str>) -> GpuTier {
    let Some(name) = name else {
        return GpuTier::Unknown;
    };
    let lowered = name.to_lowercase();
    GPU_FAMILIES
        .iter()
        .find(|(family, _)| lowered.contains(family))
        .map(|(_, tier)| *tier)
        .unwrap_or(GpuTier::Unknown)
}

fn classify_cpu(logical_cores: usize) -> CpuTier {
    match logical_cores {
        cores if cores >= 16 => CpuTier::Workstation,
        cores if cores >= 8 => CpuTier::Performance,
        cores if cores >= 6 => CpuTier::Capable,
        _ => CpuTier::Entry,
    }
}

fn classify_memory(total_memory_mb: u64) -> MemoryTier {
    match total_memory_mb {
        mb if mb >= 32 * 1024 => MemoryTier::Abundant,
        mb if mb >= 16 * 1024 => MemoryTier::Comfortable,
        mb if mb >= 8 * 1024 => MemoryTier::Adequate,
        _ => MemoryTier::Entry,
    }
}

/// The system is only as capable as its weakest dimension.
fn overall(min_score: u32) -> OverallTier {
    match min_score {
        score if score >= 90 => OverallTier::Ultra,
        score if score >= 70 => OverallTier::High,
        score if score >= 50 => OverallTier::Medium,
        score if score >= 30 => OverallTier::Low,
        _ => OverallTier::Minimal,
    }
}

fn bottleneck(gpu: u32, cpu: u32, memory: u32) -> Bottleneck {
    let trails_both =
        |candidate: u32, a: u32, b: u32| candidate + BOTTLENECK_MARGIN < a && candidate + BOTTLENECK_MARGIN < b;
    if trails_both(gpu, cpu, memory) {
        Bottleneck::Gpu
    } else if trails_both(cpu, gpu, memory) {
        Bottleneck::Cpu
    } else if trails_both(memory, gpu, cpu) {
        Bottleneck::Memory
    } else {
        Bottleneck::None
    }
}

/// Maps a profile to operator-facing recommendations in the shared
/// severity vocabulary.
pub fn advise(profile: &CapabilityProfile) -> Vec<(Severity, String, String)> {
    let mut advisories = Vec::new();
    match profile.overall_tier {
        OverallTier::Minimal => advisories.push((
            Severity::Warning,
            "Hardware below recommended".to_string(),
            "This machine is below the recommended baseline for live output; expect dropped frames at higher presets".to_string(),
        )),
        OverallTier::Low => advisories.push((
            Severity::Warning,
            "Limited hardware headroom".to_string(),
            "Lower output resolution or frame rate to keep the stream stable".to_string(),
        )),
        _ => {}
    }
    match profile.bottleneck {
        Bottleneck::Gpu => advisories.push((
            Severity::Tips,
            "GPU is the limiting component".to_string(),
            "Encoding quality is constrained by the graphics adapter; prefer a hardware encoder preset".to_string(),
        )),
        Bottleneck::Cpu => advisories.push((
            Severity::Tips,
            "CPU is the limiting component".to_string(),
            "Software encoding will compete with the capture workload; prefer a GPU encoder".to_string(),
        )),
        Bottleneck::Memory => advisories.push((
            Severity::Tips,
            "Memory is the limiting component".to_string(),
            "Close other applications before going live to avoid paging".to_string(),
        )),
        Bottleneck::None => {}
    }
    advisories
}
