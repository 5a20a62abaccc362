//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `strata_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("strata_core ping={}", strata_core::ping());
    println!("strata_core version={}", strata_core::core_version());
}
