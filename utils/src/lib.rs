//! Shared infrastructure utilities for Kiln.
//!
//! This crate provides cross-cutting utilities that multiple Kiln crates need
//! but that don't belong in the domain-pure `kiln-types` crate:
//!
//! - **`atomic_write`**: Crash-safe persistence (temp + rename, directory swap)
//! - **`copy`**: Deterministic tree copies with exclude globs
//! - **`walk`**: Sorted directory walks with pruned excludes
//! - **`digest`**: SHA-256 digests of build-context inputs
//! - **`secrets`**: Secret redaction for logs and reports

pub mod atomic_write;
pub mod copy;
pub mod digest;
pub mod secrets;
pub mod walk;

pub use atomic_write::{atomic_write, recover_replaced_dir, replace_dir, replaced_path};
pub use copy::{Excludes, copy_file, copy_tree};
pub use digest::ContextDigest;
pub use secrets::{SecretRedactor, env_redactor};
pub use walk::{EntryKind, TreeEntry, list_dir, walk_tree};
