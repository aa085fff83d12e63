// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The fixed primitive surface consumed from the object-graph engine.
//!
//! The adapter never touches flash, caches, or allocation itself; everything
//! it does is expressed through this trait. Object ids handed out by the
//! engine stay valid while the volume lock is held and must not be cached
//! across unlocked intervals, except where the handle-retention contract
//! allows it (open file and directory handles).

use crate::types::{ObjectId, ObjectMetadata, Variant};

/// Failure of an engine primitive.
///
/// The engine reports no cause; the dispatch layer assigns the POSIX meaning
/// per operation (create → no-space, delete → not-empty, rename and metadata
/// flush → I/O error).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("engine primitive failed")]
pub struct EngineError;

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg_attr(test, mockall::automock)]
pub trait ObjectEngine: Send {
    fn initialize(&mut self) -> EngineResult<()>;
    fn deinitialize(&mut self);
    fn flush_cache(&mut self) -> EngineResult<()>;

    /// Root directory of the object graph.
    fn root(&self) -> ObjectId;

    fn create_file(&mut self, parent: ObjectId, name: &str, mode: u32) -> EngineResult<ObjectId>;
    fn create_directory(
        &mut self,
        parent: ObjectId,
        name: &str,
        mode: u32,
    ) -> EngineResult<ObjectId>;
    /// Deletes an object. Refuses to delete a non-empty directory.
    fn delete(&mut self, object: ObjectId) -> EngineResult<()>;
    fn rename(
        &mut self,
        old_parent: ObjectId,
        old_name: &str,
        new_parent: ObjectId,
        new_name: &str,
    ) -> EngineResult<()>;

    fn resize(&mut self, object: ObjectId, length: u64) -> EngineResult<()>;
    fn read(&mut self, object: ObjectId, offset: u64, buf: &mut [u8]) -> EngineResult<usize>;
    /// Writes at `offset`, extending the file as needed.
    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> EngineResult<usize>;
    fn length(&self, object: ObjectId) -> u64;
    fn link_count(&self, object: ObjectId) -> u32;

    /// Hardlink indirection; identity for everything else.
    fn resolve_equivalent(&self, object: ObjectId) -> ObjectId;
    fn find_child(&self, dir: ObjectId, name: &str) -> Option<ObjectId>;
    /// Children of a directory in stable insertion order.
    fn children(&self, dir: ObjectId) -> Vec<ObjectId>;

    fn variant(&self, object: ObjectId) -> Variant;
    fn parent(&self, object: ObjectId) -> Option<ObjectId>;
    fn object_name(&self, object: ObjectId) -> String;
    fn symlink_target(&self, object: ObjectId) -> Option<String>;
    fn metadata(&self, object: ObjectId) -> EngineResult<ObjectMetadata>;
    /// Stores metadata and marks the object dirty.
    fn set_metadata(&mut self, object: ObjectId, meta: ObjectMetadata) -> EngineResult<()>;
    /// Persists a dirty object's metadata.
    fn flush_object(&mut self, object: ObjectId) -> EngineResult<()>;

    /// Allocation unit reported as the stat block size.
    fn allocation_unit(&self) -> u32;
}
