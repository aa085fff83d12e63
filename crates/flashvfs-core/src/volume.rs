// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! VFS dispatch for one mounted volume
//!
//! Every entry point that touches the object graph serializes on the volume
//! lock and translates failures into the fixed error vocabulary before
//! returning. Open-handle bookkeeping lives beside the lock, not under it:
//! handles are not shared across callers, so they only need enough locking
//! to keep the tables coherent.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::config::MountOptions;
use crate::engine::ObjectEngine;
use crate::error::{FsError, FsResult};
use crate::path::SEPARATOR;
use crate::resolve::{self, Resolution, ResolveCx};
use crate::types::{DirEntry, DirHandleId, FileHandleId, ObjectId, Stat, Variant};

/// Handler family an object binds to after lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    File,
    Directory,
}

/// Outcome of a path lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// Object found inside this mount, bound to its handler family.
    Entry { object: ObjectId, kind: HandlerKind },
    /// Resolution walked past the mount root; the outer dispatcher continues
    /// with `suffix` in the parent mount.
    EscapesMount { suffix: String },
}

/// Outcome of a lookup-for-create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateLookup {
    /// Parent directory plus the leaf name to create under it.
    Parent { directory: ObjectId, name: String },
    /// The parent path left this mount; the outer dispatcher re-splits
    /// `suffix` (plus the leaf) in the parent mount.
    EscapesMount { suffix: String },
}

/// Directory enumeration cursor. A rewind returns it to `AtStart`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DirCursor {
    AtStart,
    Positioned(usize),
    Exhausted,
}

struct FileState {
    object: ObjectId,
    /// Signed so hosts can park the offset out of range; read and write
    /// reject a negative offset instead of wrapping it.
    offset: i64,
    length: u64,
}

struct DirState {
    object: ObjectId,
    cursor: DirCursor,
}

struct HandleTable {
    files: HashMap<FileHandleId, FileState>,
    dirs: HashMap<DirHandleId, DirState>,
    next_id: u64,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

struct VolumeState {
    engine: Box<dyn ObjectEngine>,
    root: ObjectId,
    mounted: bool,
}

impl VolumeState {
    fn ensure_mounted(&self) -> FsResult<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }
}

/// One mounted filesystem instance.
///
/// `state` is the volume lock: every object-graph access happens inside it,
/// which linearizes all operations on this volume. Separate volumes are
/// fully independent.
pub struct Volume {
    options: MountOptions,
    state: Mutex<VolumeState>,
    handles: Mutex<HandleTable>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume").finish_non_exhaustive()
    }
}

impl Volume {
    /// Initializes the engine and binds its root as the mount root.
    pub fn mount(mut engine: Box<dyn ObjectEngine>, options: MountOptions) -> FsResult<Volume> {
        engine.initialize().map_err(|_| FsError::NoMemory)?;
        let root = engine.root();
        if engine.flush_cache().is_err() {
            debug!("cache flush failed during mount");
        }
        debug!(root = root.as_u64(), read_only = options.read_only, "volume mounted");
        Ok(Volume {
            options,
            state: Mutex::new(VolumeState {
                engine,
                root,
                mounted: true,
            }),
            handles: Mutex::new(HandleTable::new()),
        })
    }

    /// Flushes and tears the engine down. Always proceeds: a failed flush is
    /// logged, not reported, since there is no path to abort an unmount.
    pub fn unmount(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.mounted {
            return;
        }
        if state.engine.flush_cache().is_err() {
            warn!("cache flush failed during unmount, tearing down anyway");
        }
        state.engine.deinitialize();
        state.mounted = false;
        debug!("volume unmounted");
    }

    /// Root directory object, the starting point hosts bind into their
    /// mount table.
    pub fn root_object(&self) -> FsResult<ObjectId> {
        let state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        Ok(state.root)
    }

    /// Resolves `path` from `start` (volume root when `None`) and binds the
    /// result to a handler family. Symlinks resolve transparently; variants
    /// without a handler family cannot be bound directly.
    pub fn lookup(&self, start: Option<ObjectId>, path: &str) -> FsResult<Lookup> {
        let state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        match self.resolve_locked(&state, start, path)? {
            Resolution::Escaped { suffix } => Ok(Lookup::EscapesMount { suffix }),
            Resolution::Found(object) => match state.engine.variant(object) {
                Variant::Directory => Ok(Lookup::Entry {
                    object,
                    kind: HandlerKind::Directory,
                }),
                Variant::File => Ok(Lookup::Entry {
                    object,
                    kind: HandlerKind::File,
                }),
                _ => Err(FsError::NotImplemented),
            },
        }
    }

    /// Splits `path` into parent directory and leaf name for a subsequent
    /// create. Trailing separators are stripped; the parent must resolve to
    /// a directory inside this mount.
    pub fn lookup_for_create(&self, start: Option<ObjectId>, path: &str) -> FsResult<CreateLookup> {
        let trimmed = path.trim_end_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let (parent_path, leaf) = match trimmed.rfind(SEPARATOR) {
            Some(at) => (&trimmed[..at], &trimmed[at + 1..]),
            None => ("", trimmed),
        };

        let state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        match self.resolve_locked(&state, start, parent_path)? {
            Resolution::Escaped { suffix } => Ok(CreateLookup::EscapesMount { suffix }),
            Resolution::Found(directory) => {
                if state.engine.variant(directory) != Variant::Directory {
                    return Err(FsError::InvalidArgument);
                }
                Ok(CreateLookup::Parent {
                    directory,
                    name: leaf.to_string(),
                })
            }
        }
    }

    /// Variant query for the host's node-type dispatch.
    pub fn node_type(&self, object: ObjectId) -> FsResult<Variant> {
        let state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        match state.engine.variant(object) {
            Variant::Unknown => Err(FsError::InvalidArgument),
            variant => Ok(variant),
        }
    }

    /// Creates a regular file or directory named `name` under `parent`. The
    /// kind comes from the `S_IFMT` bits of `mode`; only a single leaf level
    /// is ever created.
    pub fn create_node(&self, parent: ObjectId, name: &str, mode: u32) -> FsResult<ObjectId> {
        if name.is_empty() || name.contains(SEPARATOR) {
            return Err(FsError::InvalidArgument);
        }
        if self.options.read_only {
            return Err(FsError::ReadOnly);
        }
        let mut state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        if state.engine.find_child(parent, name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let kind = mode & libc::S_IFMT as u32;
        let object = if kind == libc::S_IFDIR as u32 {
            // The engine gives no reason for a refusal; treat it as no space.
            state
                .engine
                .create_directory(parent, name, mode)
                .map_err(|_| FsError::NoSpace)?
        } else if kind == 0 || kind == libc::S_IFREG as u32 {
            state.engine.create_file(parent, name, mode).map_err(|_| FsError::NoSpace)?
        } else {
            return Err(FsError::NotImplemented);
        };
        debug!(parent = parent.as_u64(), name, object = object.as_u64(), "node created");
        Ok(object)
    }

    /// Deletes an object. The engine refuses to delete a populated
    /// directory, which surfaces as not-empty.
    pub fn remove(&self, object: ObjectId) -> FsResult<()> {
        if self.options.read_only {
            return Err(FsError::ReadOnly);
        }
        let mut state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        state.engine.delete(object).map_err(|_| FsError::NotEmpty)?;
        debug!(object = object.as_u64(), "node removed");
        Ok(())
    }

    /// Moves `source` under `new_parent` as `new_name`. The source's current
    /// name is read back from the engine before the rename primitive runs.
    pub fn rename(&self, source: ObjectId, new_parent: ObjectId, new_name: &str) -> FsResult<()> {
        if self.options.read_only {
            return Err(FsError::ReadOnly);
        }
        let mut state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        let old_parent = state.engine.parent(source).ok_or(FsError::InvalidArgument)?;
        let old_name = state.engine.object_name(source);
        state
            .engine
            .rename(old_parent, &old_name, new_parent, new_name)
            .map_err(|_| FsError::Io)?;
        Ok(())
    }

    /// POSIX-style status for an object, after hardlink indirection.
    pub fn stat(&self, object: ObjectId) -> FsResult<Stat> {
        let state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        stat_locked(&state, object)
    }

    /// Merges `mode` into the stored permission bits and flushes. Bits
    /// outside the low nine are rejected before anything is touched.
    pub fn chmod(&self, object: ObjectId, mode: u32) -> FsResult<()> {
        if mode & !0o777 != 0 {
            return Err(FsError::InvalidArgument);
        }
        if self.options.read_only {
            return Err(FsError::ReadOnly);
        }
        let mut state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        let object = state.engine.resolve_equivalent(object);
        let mut meta = state.engine.metadata(object).map_err(|_| FsError::Io)?;
        meta.mode = (meta.mode & !0o777) | mode;
        state.engine.set_metadata(object, meta).map_err(|_| FsError::Io)?;
        state.engine.flush_object(object).map_err(|_| FsError::Io)?;
        Ok(())
    }

    /// Ownership is not modeled; accepted and ignored.
    pub fn chown(&self, _object: ObjectId, _uid: u32, _gid: u32) -> FsResult<()> {
        Ok(())
    }

    /// Sets the modify time as given and both access and change time to
    /// `atime`. A vanished object is silently ignored.
    pub fn utime(&self, object: ObjectId, atime: i64, mtime: i64) -> FsResult<()> {
        let mut state = self.state.lock().unwrap();
        state.ensure_mounted()?;
        let object = state.engine.resolve_equivalent(object);
        if let Ok(mut meta) = state.engine.metadata(object) {
            meta.times.atime = atime;
            meta.times.ctime = atime;
            meta.times.mtime = mtime;
            let _ = state.engine.set_metadata(object, meta);
        }
        Ok(())
    }

    /// Opens a file handle with the offset at zero.
    pub fn open_file(&self, object: ObjectId) -> FsResult<FileHandleId> {
        let length = {
            let state = self.state.lock().unwrap();
            state.ensure_mounted()?;
            if state.engine.variant(state.engine.resolve_equivalent(object)) != Variant::File {
                return Err(FsError::InvalidArgument);
            }
            state.engine.length(state.engine.resolve_equivalent(object))
        };
        let mut handles = self.handles.lock().unwrap();
        let id = FileHandleId(handles.allocate());
        handles.files.insert(
            id,
            FileState {
                object,
                offset: 0,
                length,
            },
        );
        Ok(id)
    }

    pub fn close_file(&self, handle: FileHandleId) -> FsResult<()> {
        let mut handles = self.handles.lock().unwrap();
        handles.files.remove(&handle).map(|_| ()).ok_or(FsError::InvalidArgument)
    }

    /// Reads at the handle offset, clamped to the logical end of file, and
    /// advances the offset by what was read.
    pub fn read(&self, handle: FileHandleId, buf: &mut [u8]) -> FsResult<usize> {
        let (object, offset) = self.file_position(handle)?;
        if offset < 0 {
            return Err(FsError::InvalidArgument);
        }
        let offset = offset as u64;

        let read = {
            let mut state = self.state.lock().unwrap();
            state.ensure_mounted()?;
            let object = state.engine.resolve_equivalent(object);
            let available = state.engine.length(object).saturating_sub(offset);
            let want = (buf.len() as u64).min(available) as usize;
            if want == 0 {
                0
            } else {
                state
                    .engine
                    .read(object, offset, &mut buf[..want])
                    .map_err(|_| FsError::NoSpace)?
            }
        };

        if let Some(file) = self.handles.lock().unwrap().files.get_mut(&handle) {
            file.offset += read as i64;
        }
        Ok(read)
    }

    /// Writes at the handle offset; the engine extends the file as needed.
    /// Advances the offset by what was written.
    pub fn write(&self, handle: FileHandleId, data: &[u8]) -> FsResult<usize> {
        if self.options.read_only {
            return Err(FsError::ReadOnly);
        }
        let (object, offset) = self.file_position(handle)?;
        if offset < 0 {
            return Err(FsError::InvalidArgument);
        }

        let written = {
            let mut state = self.state.lock().unwrap();
            state.ensure_mounted()?;
            let object = state.engine.resolve_equivalent(object);
            state
                .engine
                .write(object, offset as u64, data)
                .map_err(|_| FsError::NoSpace)?
        };

        let mut handles = self.handles.lock().unwrap();
        if let Some(file) = handles.files.get_mut(&handle) {
            file.offset += written as i64;
            file.length = file.length.max(offset as u64 + written as u64);
        }
        Ok(written)
    }

    /// `Start` and `Current` are pure arithmetic on the stored offset; `End`
    /// takes the volume lock to read the logical length first. The resulting
    /// offset is stored unchecked.
    pub fn seek_file(&self, handle: FileHandleId, pos: SeekFrom) -> FsResult<i64> {
        let (object, current) = self.file_position(handle)?;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => current + delta,
            SeekFrom::End(delta) => {
                let state = self.state.lock().unwrap();
                state.ensure_mounted()?;
                state.engine.length(state.engine.resolve_equivalent(object)) as i64 + delta
            }
        };
        let mut handles = self.handles.lock().unwrap();
        let file = handles.files.get_mut(&handle).ok_or(FsError::InvalidArgument)?;
        file.offset = target;
        Ok(target)
    }

    /// Resizes the file behind the handle and refreshes its cached length.
    pub fn truncate(&self, handle: FileHandleId, length: u64) -> FsResult<()> {
        let (object, _) = self.file_position(handle)?;
        {
            let mut state = self.state.lock().unwrap();
            state.ensure_mounted()?;
            let object = state.engine.resolve_equivalent(object);
            state.engine.resize(object, length).map_err(|_| FsError::Io)?;
        }
        if let Some(file) = self.handles.lock().unwrap().files.get_mut(&handle) {
            file.length = length;
        }
        Ok(())
    }

    /// Cached logical length of an open file, refreshed by open, write and
    /// truncate. Reading it does not take the volume lock.
    pub fn file_size(&self, handle: FileHandleId) -> FsResult<u64> {
        let handles = self.handles.lock().unwrap();
        let file = handles.files.get(&handle).ok_or(FsError::InvalidArgument)?;
        Ok(file.length)
    }

    /// Nothing is buffered adapter-side, so there is nothing to sync.
    pub fn fdatasync(&self, _handle: FileHandleId) -> FsResult<()> {
        Ok(())
    }

    /// Opens a directory handle with the cursor at the start.
    pub fn open_dir(&self, object: ObjectId) -> FsResult<DirHandleId> {
        {
            let state = self.state.lock().unwrap();
            state.ensure_mounted()?;
            if state.engine.variant(object) != Variant::Directory {
                return Err(FsError::InvalidArgument);
            }
        }
        let mut handles = self.handles.lock().unwrap();
        let id = DirHandleId(handles.allocate());
        handles.dirs.insert(
            id,
            DirState {
                object,
                cursor: DirCursor::AtStart,
            },
        );
        Ok(id)
    }

    pub fn close_dir(&self, handle: DirHandleId) -> FsResult<()> {
        let mut handles = self.handles.lock().unwrap();
        handles.dirs.remove(&handle).map(|_| ()).ok_or(FsError::InvalidArgument)
    }

    /// Emits up to `capacity` entries from the cursor position and advances
    /// it. Each entry carries the child's hardlink-resolved identity and its
    /// own stored name.
    pub fn read_dir(&self, handle: DirHandleId, capacity: usize) -> FsResult<Vec<DirEntry>> {
        let (object, cursor) = {
            let handles = self.handles.lock().unwrap();
            let dir = handles.dirs.get(&handle).ok_or(FsError::InvalidArgument)?;
            (dir.object, dir.cursor)
        };

        let (entries, cursor) = {
            let state = self.state.lock().unwrap();
            state.ensure_mounted()?;
            let children = state.engine.children(object);
            let start = match cursor {
                DirCursor::AtStart => 0,
                DirCursor::Positioned(index) => index,
                DirCursor::Exhausted => children.len(),
            };
            let mut entries = Vec::new();
            let mut index = start;
            while index < children.len() && entries.len() < capacity {
                let child = children[index];
                entries.push(DirEntry {
                    ino: state.engine.resolve_equivalent(child).as_u64(),
                    name: state.engine.object_name(child),
                });
                index += 1;
            }
            let cursor = if index >= children.len() {
                DirCursor::Exhausted
            } else {
                DirCursor::Positioned(index)
            };
            (entries, cursor)
        };

        if let Some(dir) = self.handles.lock().unwrap().dirs.get_mut(&handle) {
            dir.cursor = cursor;
        }
        Ok(entries)
    }

    /// Only a rewind to offset zero is supported.
    pub fn seek_dir(&self, handle: DirHandleId, offset: i64) -> FsResult<()> {
        if offset != 0 {
            return Err(FsError::Unsupported);
        }
        let mut handles = self.handles.lock().unwrap();
        let dir = handles.dirs.get_mut(&handle).ok_or(FsError::InvalidArgument)?;
        dir.cursor = DirCursor::AtStart;
        Ok(())
    }

    /// Hard-link creation is not supported.
    pub fn link(&self, _target: ObjectId, _parent: ObjectId, _name: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    /// Symlink creation is not supported.
    pub fn symlink(&self, _parent: ObjectId, _name: &str, _alias: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    /// Reading a symlink target back is not supported.
    pub fn readlink(&self, _object: ObjectId) -> FsResult<String> {
        Err(FsError::NotImplemented)
    }

    /// Volume statistics are not tracked by this layer.
    pub fn statvfs(&self) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn resolve_locked(
        &self,
        state: &VolumeState,
        start: Option<ObjectId>,
        path: &str,
    ) -> FsResult<Resolution> {
        let cx = ResolveCx {
            engine: state.engine.as_ref(),
            root: state.root,
            max_name_length: self.options.max_name_length,
        };
        let mut depth = self.options.max_link_depth;
        resolve::find_object(&cx, start, path, &mut depth)
    }

    fn file_position(&self, handle: FileHandleId) -> FsResult<(ObjectId, i64)> {
        let handles = self.handles.lock().unwrap();
        let file = handles.files.get(&handle).ok_or(FsError::InvalidArgument)?;
        Ok((file.object, file.offset))
    }
}

fn stat_locked(state: &VolumeState, object: ObjectId) -> FsResult<Stat> {
    let object = state.engine.resolve_equivalent(object);
    let meta = state.engine.metadata(object).map_err(|_| FsError::NotFound)?;

    let mut mode = meta.mode & !(libc::S_IFMT as u32);
    match state.engine.variant(object) {
        Variant::Directory => mode |= libc::S_IFDIR as u32,
        Variant::Symlink => mode |= libc::S_IFLNK as u32,
        Variant::File => mode |= libc::S_IFREG as u32,
        _ => {}
    }

    let size = state.engine.length(object);
    let blksize = state.engine.allocation_unit();
    Ok(Stat {
        ino: object.as_u64(),
        mode,
        nlink: state.engine.link_count(object),
        size,
        blksize,
        blocks: size.div_ceil(blksize as u64),
        rdev: meta.rdev,
        atime: meta.times.atime,
        mtime: meta.times.mtime,
        ctime: meta.times.ctime,
    })
}
