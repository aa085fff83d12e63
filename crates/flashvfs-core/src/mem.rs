// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory object engine
//!
//! Reference implementation of [`ObjectEngine`] backing the test suite and
//! RAM-only hosts: an arena of objects addressed by stable ids, with parent
//! links and insertion-ordered child lists. Symlink and hardlink objects can
//! be seeded through the `add_*` constructors even though the adapter itself
//! never creates them.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::{EngineError, EngineResult, ObjectEngine};
use crate::types::{ObjectId, ObjectMetadata, ObjectTimes, Variant};

#[derive(Clone, Debug)]
enum ObjectKind {
    File { data: Vec<u8> },
    Directory { children: Vec<ObjectId> },
    Symlink { alias: String },
    Hardlink { equivalent: ObjectId },
    Special,
}

#[derive(Clone, Debug)]
struct Object {
    name: String,
    parent: Option<ObjectId>,
    kind: ObjectKind,
    meta: ObjectMetadata,
    dirty: bool,
}

pub struct MemEngine {
    objects: HashMap<ObjectId, Object>,
    root: ObjectId,
    next_id: u64,
    allocation_unit: u32,
}

impl MemEngine {
    /// An engine with an empty root directory. `allocation_unit` is what the
    /// adapter reports as the stat block size.
    pub fn new(allocation_unit: u32) -> Self {
        let root = ObjectId::new(1);
        let mut objects = HashMap::new();
        objects.insert(
            root,
            Object {
                name: String::new(),
                parent: None,
                kind: ObjectKind::Directory { children: Vec::new() },
                meta: ObjectMetadata {
                    mode: 0o755,
                    times: fresh_times(),
                    rdev: 0,
                },
                dirty: false,
            },
        );
        Self {
            objects,
            root,
            next_id: 2,
            allocation_unit,
        }
    }

    pub fn add_file(&mut self, parent: ObjectId, name: &str, mode: u32) -> EngineResult<ObjectId> {
        self.insert_child(parent, name, mode, ObjectKind::File { data: Vec::new() })
    }

    pub fn add_directory(
        &mut self,
        parent: ObjectId,
        name: &str,
        mode: u32,
    ) -> EngineResult<ObjectId> {
        self.insert_child(parent, name, mode, ObjectKind::Directory { children: Vec::new() })
    }

    pub fn add_symlink(
        &mut self,
        parent: ObjectId,
        name: &str,
        alias: &str,
    ) -> EngineResult<ObjectId> {
        self.insert_child(parent, name, 0o777, ObjectKind::Symlink { alias: alias.to_string() })
    }

    /// Seeds a hardlink. The target is equivalent-resolved first so chains of
    /// hardlinks cannot form.
    pub fn add_hardlink(
        &mut self,
        parent: ObjectId,
        name: &str,
        target: ObjectId,
    ) -> EngineResult<ObjectId> {
        let equivalent = self.resolve_equivalent(target);
        if !self.objects.contains_key(&equivalent) {
            return Err(EngineError);
        }
        self.insert_child(parent, name, 0o644, ObjectKind::Hardlink { equivalent })
    }

    pub fn add_special(&mut self, parent: ObjectId, name: &str, rdev: u64) -> EngineResult<ObjectId> {
        let id = self.insert_child(parent, name, 0o644, ObjectKind::Special)?;
        if let Some(object) = self.objects.get_mut(&id) {
            object.meta.rdev = rdev;
        }
        Ok(id)
    }

    fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn insert_child(
        &mut self,
        parent: ObjectId,
        name: &str,
        mode: u32,
        kind: ObjectKind,
    ) -> EngineResult<ObjectId> {
        if name.is_empty() || self.find_child(parent, name).is_some() {
            return Err(EngineError);
        }
        let id = self.allocate_id();
        match &mut self.objects.get_mut(&parent).ok_or(EngineError)?.kind {
            ObjectKind::Directory { children } => children.push(id),
            _ => return Err(EngineError),
        }
        self.objects.insert(
            id,
            Object {
                name: name.to_string(),
                parent: Some(parent),
                kind,
                meta: ObjectMetadata {
                    mode,
                    times: fresh_times(),
                    rdev: 0,
                },
                dirty: false,
            },
        );
        Ok(id)
    }

    fn unlink_from_parent(&mut self, object: ObjectId) {
        let Some(parent) = self.objects.get(&object).and_then(|o| o.parent) else {
            return;
        };
        if let Some(Object { kind: ObjectKind::Directory { children }, .. }) =
            self.objects.get_mut(&parent)
        {
            children.retain(|&child| child != object);
        }
    }
}

impl ObjectEngine for MemEngine {
    fn initialize(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn deinitialize(&mut self) {
        self.objects.retain(|&id, _| id == self.root);
        if let Some(Object { kind: ObjectKind::Directory { children }, .. }) =
            self.objects.get_mut(&self.root)
        {
            children.clear();
        }
    }

    fn flush_cache(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn root(&self) -> ObjectId {
        self.root
    }

    fn create_file(&mut self, parent: ObjectId, name: &str, mode: u32) -> EngineResult<ObjectId> {
        self.insert_child(parent, name, mode & 0o777, ObjectKind::File { data: Vec::new() })
    }

    fn create_directory(
        &mut self,
        parent: ObjectId,
        name: &str,
        mode: u32,
    ) -> EngineResult<ObjectId> {
        self.insert_child(
            parent,
            name,
            mode & 0o777,
            ObjectKind::Directory { children: Vec::new() },
        )
    }

    fn delete(&mut self, object: ObjectId) -> EngineResult<()> {
        match &self.objects.get(&object).ok_or(EngineError)?.kind {
            ObjectKind::Directory { children } if !children.is_empty() => return Err(EngineError),
            _ => {}
        }
        self.unlink_from_parent(object);
        self.objects.remove(&object);
        Ok(())
    }

    fn rename(
        &mut self,
        old_parent: ObjectId,
        old_name: &str,
        new_parent: ObjectId,
        new_name: &str,
    ) -> EngineResult<()> {
        let object = self.find_child(old_parent, old_name).ok_or(EngineError)?;
        if let Some(existing) = self.find_child(new_parent, new_name) {
            if existing == object {
                return Ok(());
            }
            // An occupied destination is replaced, except by a non-empty
            // directory.
            self.delete(existing)?;
        }
        self.unlink_from_parent(object);
        match &mut self.objects.get_mut(&new_parent).ok_or(EngineError)?.kind {
            ObjectKind::Directory { children } => children.push(object),
            _ => return Err(EngineError),
        }
        let entry = self.objects.get_mut(&object).ok_or(EngineError)?;
        entry.name = new_name.to_string();
        entry.parent = Some(new_parent);
        entry.meta.times.ctime = now();
        Ok(())
    }

    fn resize(&mut self, object: ObjectId, length: u64) -> EngineResult<()> {
        let entry = self.objects.get_mut(&object).ok_or(EngineError)?;
        match &mut entry.kind {
            ObjectKind::File { data } => {
                data.resize(length as usize, 0);
                entry.meta.times.mtime = now();
                entry.meta.times.ctime = entry.meta.times.mtime;
                Ok(())
            }
            _ => Err(EngineError),
        }
    }

    fn read(&mut self, object: ObjectId, offset: u64, buf: &mut [u8]) -> EngineResult<usize> {
        let entry = self.objects.get(&object).ok_or(EngineError)?;
        match &entry.kind {
            ObjectKind::File { data } => {
                let start = offset as usize;
                if start >= data.len() {
                    return Ok(0);
                }
                let end = (start + buf.len()).min(data.len());
                buf[..end - start].copy_from_slice(&data[start..end]);
                Ok(end - start)
            }
            _ => Err(EngineError),
        }
    }

    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> EngineResult<usize> {
        let entry = self.objects.get_mut(&object).ok_or(EngineError)?;
        match &mut entry.kind {
            ObjectKind::File { data: content } => {
                let start = offset as usize;
                let end = start + data.len();
                if end > content.len() {
                    content.resize(end, 0);
                }
                content[start..end].copy_from_slice(data);
                entry.meta.times.mtime = now();
                entry.meta.times.ctime = entry.meta.times.mtime;
                Ok(data.len())
            }
            _ => Err(EngineError),
        }
    }

    fn length(&self, object: ObjectId) -> u64 {
        match self.objects.get(&object).map(|o| &o.kind) {
            Some(ObjectKind::File { data }) => data.len() as u64,
            Some(ObjectKind::Symlink { alias }) => alias.len() as u64,
            _ => 0,
        }
    }

    fn link_count(&self, object: ObjectId) -> u32 {
        let aliases = self
            .objects
            .values()
            .filter(|o| matches!(o.kind, ObjectKind::Hardlink { equivalent } if equivalent == object))
            .count();
        1 + aliases as u32
    }

    fn resolve_equivalent(&self, object: ObjectId) -> ObjectId {
        let mut current = object;
        while let Some(Object { kind: ObjectKind::Hardlink { equivalent }, .. }) =
            self.objects.get(&current)
        {
            current = *equivalent;
        }
        current
    }

    fn find_child(&self, dir: ObjectId, name: &str) -> Option<ObjectId> {
        match self.objects.get(&dir).map(|o| &o.kind) {
            Some(ObjectKind::Directory { children }) => children
                .iter()
                .copied()
                .find(|child| self.objects.get(child).is_some_and(|o| o.name == name)),
            _ => None,
        }
    }

    fn children(&self, dir: ObjectId) -> Vec<ObjectId> {
        match self.objects.get(&dir).map(|o| &o.kind) {
            Some(ObjectKind::Directory { children }) => children.clone(),
            _ => Vec::new(),
        }
    }

    fn variant(&self, object: ObjectId) -> Variant {
        match self.objects.get(&object).map(|o| &o.kind) {
            Some(ObjectKind::File { .. }) => Variant::File,
            Some(ObjectKind::Directory { .. }) => Variant::Directory,
            Some(ObjectKind::Symlink { .. }) => Variant::Symlink,
            Some(ObjectKind::Hardlink { .. }) => Variant::Hardlink,
            Some(ObjectKind::Special) => Variant::Special,
            None => Variant::Unknown,
        }
    }

    fn parent(&self, object: ObjectId) -> Option<ObjectId> {
        self.objects.get(&object)?.parent
    }

    fn object_name(&self, object: ObjectId) -> String {
        self.objects.get(&object).map(|o| o.name.clone()).unwrap_or_default()
    }

    fn symlink_target(&self, object: ObjectId) -> Option<String> {
        match self.objects.get(&object).map(|o| &o.kind) {
            Some(ObjectKind::Symlink { alias }) => Some(alias.clone()),
            _ => None,
        }
    }

    fn metadata(&self, object: ObjectId) -> EngineResult<ObjectMetadata> {
        Ok(self.objects.get(&object).ok_or(EngineError)?.meta)
    }

    fn set_metadata(&mut self, object: ObjectId, meta: ObjectMetadata) -> EngineResult<()> {
        let entry = self.objects.get_mut(&object).ok_or(EngineError)?;
        entry.meta = meta;
        entry.dirty = true;
        Ok(())
    }

    fn flush_object(&mut self, object: ObjectId) -> EngineResult<()> {
        let entry = self.objects.get_mut(&object).ok_or(EngineError)?;
        entry.dirty = false;
        Ok(())
    }

    fn allocation_unit(&self) -> u32 {
        self.allocation_unit
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn fresh_times() -> ObjectTimes {
    let now = now();
    ObjectTimes {
        atime: now,
        mtime: now,
        ctime: now,
    }
}
