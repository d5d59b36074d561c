// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod bridge;
pub mod collector;
pub mod many_to_one;
pub mod one_to_many;
pub mod one_to_one;

#[cfg(test)]
mod integration_tests;

pub use bridge::Bridge;
pub use collector::Collector;
pub use many_to_one::{ManyToOneAction, ManyToOneNode};
pub use one_to_many::{OneToManyAction, OneToManyNode};
pub use one_to_one::{OneToOneAction, OneToOneNode};
