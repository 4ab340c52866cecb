// THEORY:
// This file is the entry point of the `optical_tracking` library crate. It
// turns the raw signals of VR tracking hardware into identified observations
// for a pose solver. Two independent paths share the crate:
//
// 1.  **Camera path**: grayscale IR frames go through the `pipeline`
//     (`Blobwatch`), which chains the extent scanner, the blob detector, the
//     cross-frame tracker and the blink identifier from `core_modules`.
// 2.  **Lighthouse path**: photodiode pulses go into a `Watchman`
//     (`core_modules::lighthouse`), which classifies sync flashes, decodes the
//     base stations' OOTX calibration frames and collects sweeps.
//
// Both paths are synchronous and allocation-light. Threads, devices and I/O
// belong to the caller; the replay binary in `main.rs` shows one way to drive
// them.

pub mod core_modules;
pub mod error;
pub mod pipeline;
