// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod hooks;
pub mod in_port;
pub mod name;
pub mod out_port;
pub mod reader;
pub mod writer;

mod frame;

pub use hooks::{close_hook, listener, open_hook, CloseHook, Listener, OpenHook};
pub use in_port::InPort;
pub use out_port::OutPort;
pub use reader::Reader;
pub use writer::Writer;

pub(crate) use frame::{AckGroup, BackFrame, Frame};
