// SPDX-License-Identifier: GPL-3.0-only

pub mod command;
pub mod events;
pub mod mount_table;
pub mod source_control;

pub use command::{CommandOutput, CommandRunner};
pub use events::EventPublisher;
pub use mount_table::{MountTable, filters};
pub use source_control::SourceControl;
