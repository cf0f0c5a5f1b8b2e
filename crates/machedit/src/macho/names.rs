//! Human-readable names for the description formatter.

use goblin::mach::constants::cputype::{
    CpuType, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32, CPU_TYPE_I386, CPU_TYPE_POWERPC,
    CPU_TYPE_POWERPC64, CPU_TYPE_X86_64,
};
use goblin::mach::header::{
    MH_BUNDLE, MH_CORE, MH_DSYM, MH_DYLIB, MH_DYLIB_STUB, MH_DYLINKER, MH_EXECUTE,
    MH_KEXT_BUNDLE, MH_OBJECT, MH_PRELOAD,
};

pub fn cpu_name(cputype: CpuType) -> &'static str {
    match cputype {
        CPU_TYPE_I386 => "i386",
        CPU_TYPE_X86_64 => "x86_64",
        CPU_TYPE_ARM => "arm",
        CPU_TYPE_ARM64 => "arm64",
        CPU_TYPE_ARM64_32 => "arm64_32",
        CPU_TYPE_POWERPC => "ppc",
        CPU_TYPE_POWERPC64 => "ppc64",
        _ => "unknown",
    }
}

pub fn filetype_name(filetype: u32) -> &'static str {
    match filetype {
        MH_OBJECT => "object",
        MH_EXECUTE => "executable",
        MH_CORE => "core",
        MH_PRELOAD => "preloaded executable",
        MH_DYLIB => "dylib",
        MH_DYLINKER => "dylinker",
        MH_BUNDLE => "bundle",
        MH_DYLIB_STUB => "dylib stub",
        MH_DSYM => "dSYM",
        MH_KEXT_BUNDLE => "kext bundle",
        _ => "unknown filetype",
    }
}
