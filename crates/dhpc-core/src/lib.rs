//! # dhpc-core
//!
//! Core data model for the different-hpc control center.
//!
//! This crate provides the types shared by the aliveness tracker and the
//! compute node registry:
//!
//! - [`ComputeNodeConfig`]: one node's boot configuration, backed by a file
//! - [`ConfigEntries`]: ordered, duplicate-preserving YAML entries
//! - [`inflate`]: resolution of inline `{{key}}` templates against earlier entries
//! - [`BootParams`]: the kernel/initrd/cmdline view consumed by network boot
//!
//! ## Example
//!
//! ```rust
//! use dhpc_core::{BootParams, ConfigEntries};
//!
//! # fn main() -> dhpc_core::Result<()> {
//! let entries = ConfigEntries::parse("ip: 10.0.0.5\nkernel: vmlinuz\ncmdline: 'root=nfs:{{ip}}'\n")?;
//! let boot = BootParams::from_inflated(&dhpc_core::inflate(&entries)?)?;
//! assert_eq!(boot.cmdline, "root=nfs:10.0.0.5");
//! # Ok(())
//! # }
//! ```

pub mod boot;
pub mod error;
pub mod inflate;
pub mod node;
pub mod template;

// Re-export commonly used types at the crate root
pub use boot::BootParams;
pub use error::{Error, Result};
pub use inflate::{inflate, InflatedConfig, InflatedValue};
pub use node::{mac_key, ComputeNodeConfig, ConfigEntries};
