// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Namespace resolution over the object graph
//!
//! Walks a textual path one segment at a time from a starting directory,
//! following symlink chains through re-entrant resolution and reporting when
//! the walk leaves the mounted subtree. Callers hold the volume lock; nothing
//! here locks or mutates the graph.

use crate::engine::ObjectEngine;
use crate::error::{FsError, FsResult};
use crate::path::{Segment, Segments, SEPARATOR};
use crate::types::{ObjectId, Variant};

/// Outcome of a path walk that did not fail outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Found(ObjectId),
    /// `..` walked past the mount root. `suffix` is the unconsumed remainder
    /// of the path with leading separators stripped; the outer dispatcher
    /// continues resolution in the parent mount.
    Escaped { suffix: String },
}

/// Everything the walk needs besides the path itself.
pub(crate) struct ResolveCx<'a> {
    pub(crate) engine: &'a dyn ObjectEngine,
    pub(crate) root: ObjectId,
    pub(crate) max_name_length: usize,
}

/// Maps `(starting object or root, path)` to an object or an escape signal.
///
/// `depth` is the remaining symlink-resolution budget, shared across the
/// re-entrant alias walks so a cyclic chain runs out instead of recursing
/// forever.
pub(crate) fn find_object(
    cx: &ResolveCx<'_>,
    start: Option<ObjectId>,
    path: &str,
    depth: &mut u32,
) -> FsResult<Resolution> {
    // Some hosts pass a location already pointing at the wanted object with
    // the path redundantly naming it; honor that without descending.
    if let Some(start_id) = start {
        if !path.contains(SEPARATOR) && cx.engine.object_name(start_id) == path {
            return Ok(Resolution::Found(start_id));
        }
    }

    let mut current = start.unwrap_or(cx.root);
    let mut segments = Segments::new(path, cx.max_name_length);

    while let Some(segment) = segments.next() {
        match segment {
            Segment::CurDir => {}
            Segment::ParentDir => match cx.engine.parent(current) {
                Some(parent) => current = parent,
                None => {
                    // Walked past the mount root: hand the remainder back.
                    return Ok(Resolution::Escaped {
                        suffix: segments.rest_trimmed().to_string(),
                    });
                }
            },
            Segment::Name(name) => {
                if cx.engine.variant(current) != Variant::Directory {
                    return Err(FsError::NotFound);
                }
                let child = cx.engine.find_child(current, name).ok_or(FsError::NotFound)?;
                match follow_links(cx, child, depth)? {
                    Resolution::Found(object) => current = object,
                    escaped @ Resolution::Escaped { .. } => return Ok(escaped),
                }
            }
        }
    }

    Ok(Resolution::Found(current))
}

/// Lands on the terminal non-symlink object behind `object`.
///
/// Hardlink indirection is applied on entry and after every alias hop. An
/// alias starting with a separator resolves from the volume root; anything
/// else resolves from the symlink's parent directory. An escape signalled
/// inside an alias walk propagates out as the overall result.
pub(crate) fn follow_links(
    cx: &ResolveCx<'_>,
    object: ObjectId,
    depth: &mut u32,
) -> FsResult<Resolution> {
    let mut current = cx.engine.resolve_equivalent(object);

    while cx.engine.variant(current) == Variant::Symlink {
        if *depth == 0 {
            return Err(FsError::TooManyLinks);
        }
        *depth -= 1;

        let alias = cx.engine.symlink_target(current).ok_or(FsError::NotFound)?;
        let resolved = if alias.starts_with(SEPARATOR) {
            find_object(cx, None, &alias, depth)?
        } else {
            let parent = cx.engine.parent(current).ok_or(FsError::NotFound)?;
            find_object(cx, Some(parent), &alias, depth)?
        };

        match resolved {
            Resolution::Found(next) => current = cx.engine.resolve_equivalent(next),
            escaped @ Resolution::Escaped { .. } => return Ok(escaped),
        }
    }

    Ok(Resolution::Found(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemEngine;

    fn cx(engine: &MemEngine) -> ResolveCx<'_> {
        ResolveCx {
            engine,
            root: engine.root(),
            max_name_length: 255,
        }
    }

    fn resolve(engine: &MemEngine, path: &str) -> FsResult<Resolution> {
        let mut depth = 8;
        find_object(&cx(engine), None, path, &mut depth)
    }

    /// root/a/b with a file under b.
    fn sample_tree() -> (MemEngine, ObjectId, ObjectId, ObjectId) {
        let mut engine = MemEngine::new(512);
        let root = engine.root();
        let a = engine.add_directory(root, "a", 0o755).unwrap();
        let b = engine.add_directory(a, "b", 0o755).unwrap();
        let f = engine.add_file(b, "f", 0o644).unwrap();
        (engine, a, b, f)
    }

    #[test]
    fn plain_chain_resolves_to_the_leaf() {
        let (engine, _, _, f) = sample_tree();
        assert_eq!(resolve(&engine, "/a/b/f").unwrap(), Resolution::Found(f));
    }

    #[test]
    fn surplus_separators_do_not_matter() {
        let (engine, _, b, _) = sample_tree();
        assert_eq!(resolve(&engine, "//a///b/").unwrap(), Resolution::Found(b));
    }

    #[test]
    fn dot_stays_and_dotdot_ascends() {
        let (engine, a, b, _) = sample_tree();
        assert_eq!(resolve(&engine, "/a/b/.").unwrap(), Resolution::Found(b));
        assert_eq!(resolve(&engine, "/a/b/..").unwrap(), Resolution::Found(a));
    }

    #[test]
    fn missing_segment_is_not_found() {
        let (engine, ..) = sample_tree();
        assert_eq!(resolve(&engine, "/a/nope/f"), Err(FsError::NotFound));
    }

    #[test]
    fn descending_through_a_file_is_not_found() {
        let (engine, ..) = sample_tree();
        assert_eq!(resolve(&engine, "/a/b/f/deeper"), Err(FsError::NotFound));
    }

    #[test]
    fn dotdot_at_root_escapes_with_the_remainder() {
        let (engine, ..) = sample_tree();
        match resolve(&engine, "../sibling/x").unwrap() {
            Resolution::Escaped { suffix } => assert_eq!(suffix, "sibling/x"),
            other => panic!("expected escape, got {other:?}"),
        }
        // A second `..` is part of the handed-off suffix, not resolved here.
        match resolve(&engine, "../../x").unwrap() {
            Resolution::Escaped { suffix } => assert_eq!(suffix, "../x"),
            other => panic!("expected escape, got {other:?}"),
        }
    }

    #[test]
    fn start_named_by_the_whole_path_short_circuits() {
        let (engine, a, ..) = sample_tree();
        let mut depth = 8;
        let got = find_object(&cx(&engine), Some(a), "a", &mut depth).unwrap();
        assert_eq!(got, Resolution::Found(a));
    }

    #[test]
    fn relative_alias_resolves_from_the_symlink_parent() {
        let (mut engine, a, b, f) = sample_tree();
        engine.add_symlink(a, "rel", "b/f").unwrap();
        assert_eq!(resolve(&engine, "/a/rel").unwrap(), Resolution::Found(f));

        engine.add_symlink(b, "up", "../b").unwrap();
        assert_eq!(resolve(&engine, "/a/b/up").unwrap(), Resolution::Found(b));
    }

    #[test]
    fn absolute_alias_resolves_from_the_root() {
        let (mut engine, _, b, f) = sample_tree();
        engine.add_symlink(b, "abs", "/a/b/f").unwrap();
        assert_eq!(resolve(&engine, "/a/b/abs").unwrap(), Resolution::Found(f));
    }

    #[test]
    fn symlink_mid_path_is_followed_before_descending() {
        let (mut engine, _, _, f) = sample_tree();
        let root = engine.root();
        engine.add_symlink(root, "jump", "/a/b").unwrap();
        assert_eq!(resolve(&engine, "/jump/f").unwrap(), Resolution::Found(f));
    }

    #[test]
    fn alias_cycle_runs_out_of_depth() {
        let mut engine = MemEngine::new(512);
        let root = engine.root();
        engine.add_symlink(root, "ping", "pong").unwrap();
        engine.add_symlink(root, "pong", "ping").unwrap();
        assert_eq!(resolve(&engine, "/ping"), Err(FsError::TooManyLinks));
    }

    #[test]
    fn self_alias_runs_out_of_depth() {
        let mut engine = MemEngine::new(512);
        let root = engine.root();
        engine.add_symlink(root, "me", "me").unwrap();
        assert_eq!(resolve(&engine, "/me"), Err(FsError::TooManyLinks));
    }

    #[test]
    fn hardlink_resolves_to_its_equivalent() {
        let (mut engine, a, _, f) = sample_tree();
        engine.add_hardlink(a, "hard", f).unwrap();
        assert_eq!(resolve(&engine, "/a/hard").unwrap(), Resolution::Found(f));
    }

    #[test]
    fn escape_inside_an_alias_propagates() {
        let mut engine = MemEngine::new(512);
        let root = engine.root();
        engine.add_symlink(root, "out", "../elsewhere").unwrap();
        match resolve(&engine, "/out").unwrap() {
            Resolution::Escaped { suffix } => assert_eq!(suffix, "elsewhere"),
            other => panic!("expected escape, got {other:?}"),
        }
    }
}
