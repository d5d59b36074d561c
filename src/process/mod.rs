// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod local;
pub mod process;

pub use local::Local;
pub use process::{ExitHook, Process};
