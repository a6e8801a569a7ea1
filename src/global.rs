//! Process-wide registration of an assembled SDK.
//!
//! Registration is write-once: the first successful [`set_sdk`] wins for the
//! lifetime of the process, and reads are lock-free afterwards.

use std::sync::OnceLock;

use crate::autoconf::Sdk;

static GLOBAL_SDK: OnceLock<Sdk> = OnceLock::new();

/// Registers `sdk` as the process-wide default.
///
/// Returns the rejected `sdk` when a default was already registered.
pub fn set_sdk(sdk: Sdk) -> Result<(), Sdk> {
    GLOBAL_SDK.set(sdk)
}

/// The process-wide default SDK, if one was registered.
pub fn sdk() -> Option<Sdk> {
    GLOBAL_SDK.get().cloned()
}
