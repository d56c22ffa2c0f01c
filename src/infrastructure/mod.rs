//! Binary-only infrastructure: process wiring that must never be linked
//! into library consumers (spec.md §9.2).

pub mod logging;
