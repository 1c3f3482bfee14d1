//! Common test infrastructure
//!
//! Fixture builders synthesize small but well-formed files for every
//! supported container (plus WAV) entirely in memory. Tests should only
//! import from this module, not from internal submodules.

#![allow(dead_code)]

mod constants;
mod fixtures;
mod inspector;

pub use constants::*;
pub use fixtures::*;
pub use inspector::SignatureInspector;

use tagtrack::{EngineSettings, TagEngine};

/// Engine with default settings validating through [`SignatureInspector`].
pub fn test_engine() -> (TagEngine, SignatureInspector) {
    test_engine_with(EngineSettings::default())
}

pub fn test_engine_with(settings: EngineSettings) -> (TagEngine, SignatureInspector) {
    let inspector = SignatureInspector::new();
    let engine = TagEngine::with_inspector(settings, Box::new(inspector.clone()));
    (engine, inspector)
}
