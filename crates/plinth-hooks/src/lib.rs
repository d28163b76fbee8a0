// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook/event bus for the Plinth plugin runtime.
//!
//! Hooks come in two kinds. Actions are fire-and-forget notifications whose
//! failures are logged and isolated. Filters thread a value through a chain
//! of callbacks, each consuming the previous output. Hook names are an
//! enumerated type with a `Custom` escape hatch for plugin-defined hooks.

pub mod bus;
pub mod name;

pub use bus::{
    ActionHook, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_PRIORITY, FilterHook, HookBus, HookCallback, HookId, action_fn, filter_fn,
};
pub use name::HookName;
pub use plinth_core::manifest::HookKind;
