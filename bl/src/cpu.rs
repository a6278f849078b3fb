//! CPU feature gate run before any long-mode structure is built. Checks
//! only what the handoff itself depends on: PAE (required for any
//! 4-level table), long mode, and NX (the pager always sets
//! `MapAttrs::NO_EXECUTE`-capable entries, so the bit must do something).

use raw_cpuid::CpuId;

use crate::error::MemError;

pub fn check_features() -> Result<(), MemError> {
    let cpuid = CpuId::new();

    let pae = cpuid
        .get_feature_info()
        .map(|f| f.has_pae())
        .unwrap_or(false);
    if !pae {
        return Err(MemError::UnsupportedCpu);
    }

    let ext = cpuid.get_extended_processor_and_feature_identifiers();
    let long_mode = ext.as_ref().map(|f| f.has_64bit_mode()).unwrap_or(false);
    let nx = ext.as_ref().map(|f| f.has_execute_disable()).unwrap_or(false);

    if !long_mode || !nx {
        return Err(MemError::UnsupportedCpu);
    }

    Ok(())
}
