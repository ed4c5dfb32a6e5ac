//! The Resource Tree (spec.md §4.3): hierarchical named entries, path
//! resolution, and the promotion rules that turn a bare Namespace into a
//! concrete resource kind.

use hub_core::path::{is_under_obs, split_absolute};
use hub_core::{DataType, HubError, HubResult};

use crate::arena::{Arena, EntryId};
use crate::observation::ObsState;
use crate::resource::{Entry, ResourceKind};

pub struct Tree {
    pub(crate) arena: Arena<Entry>,
    pub(crate) root: EntryId,
    max_path_len: usize,
}

impl Tree {
    pub fn new(max_path_len: usize) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(Entry::new("", None, ResourceKind::Namespace));
        Self {
            arena,
            root,
            max_path_len,
        }
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    fn child_named(&self, parent: EntryId, name: &str) -> Option<EntryId> {
        self.arena
            .get(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.arena.get(c).is_some_and(|e| e.name == name))
    }

    /// `findEntry(base, path)` — resolve without creating anything.
    pub fn find_entry(&self, base: EntryId, path: &str) -> HubResult<Option<EntryId>> {
        let segments = split_absolute(path, self.max_path_len)?;
        let mut current = base;
        for segment in &segments {
            match self.child_named(current, segment) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// `getEntry(base, path)` — resolve, creating missing Namespaces along
    /// the way.
    pub fn get_entry(&mut self, base: EntryId, path: &str) -> HubResult<EntryId> {
        let segments = split_absolute(path, self.max_path_len)?;
        let mut current = base;
        for segment in &segments {
            current = match self.child_named(current, segment) {
                Some(next) => next,
                None => {
                    let id = self
                        .arena
                        .insert(Entry::new(segment.clone(), Some(current), ResourceKind::Namespace));
                    self.arena.get_mut(current).expect("parent exists").children.push(id);
                    id
                }
            };
        }
        Ok(current)
    }

    /// `getPath(base, entry)` — relative path from `base` down to `entry`,
    /// written with `/` separators. Fails with `NotFound` if `entry` is not
    /// a descendant of `base`.
    pub fn get_path(&self, base: EntryId, entry: EntryId) -> HubResult<String> {
        let mut segments = Vec::new();
        let mut current = entry;
        loop {
            if current == base {
                segments.reverse();
                return Ok(format!("/{}", segments.join("/")));
            }
            let node = self
                .arena
                .get(current)
                .ok_or_else(|| HubError::NotFound("entry not found while walking to base".into()))?;
            segments.push(node.name.clone());
            match node.parent {
                Some(p) => current = p,
                None => {
                    return Err(HubError::NotFound(
                        "entry is not a descendant of the given base".into(),
                    ))
                }
            }
        }
    }

    /// Absolute path segments from the root, excluding the root itself.
    pub fn absolute_segments(&self, entry: EntryId) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = entry;
        while let Some(node) = self.arena.get(current) {
            if current == self.root {
                break;
            }
            segments.push(node.name.clone());
            match node.parent {
                Some(p) => current = p,
                None => break,
            }
        }
        segments.reverse();
        segments
    }

    /// Path segments under `/obs/` (excluding the leading `obs` segment
    /// itself), for `hub-backup`'s file layout.
    pub fn obs_relative_segments(&self, entry: EntryId) -> Option<Vec<String>> {
        let mut segments = self.absolute_segments(entry);
        if is_under_obs(&segments) {
            segments.remove(0);
            Some(segments)
        } else {
            None
        }
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.arena.get(id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.arena.get_mut(id)
    }

    /// Pre-order iteration over every entry, per spec.md §4.3
    /// `forEachResource`.
    pub fn for_each_resource(&self, mut f: impl FnMut(EntryId, &Entry)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.arena.get(id) else {
                continue;
            };
            f(id, entry);
            for &child in entry.children.iter().rev() {
                stack.push(child);
            }
        }
    }

    /// `getInput`/`getOutput`(base, path, type, units) — promote the leaf
    /// at `path` to Input or Output, enforcing spec.md §4.3's promotion
    /// rules. `want_input` selects Input vs. Output.
    pub fn get_endpoint(
        &mut self,
        base: EntryId,
        path: &str,
        want_input: bool,
        data_type: DataType,
        units: &str,
    ) -> HubResult<EntryId> {
        let id = self.get_entry(base, path)?;
        let entry = self.arena.get(id).expect("just resolved");
        match &entry.kind {
            ResourceKind::Namespace | ResourceKind::Placeholder => {
                let new_kind = if want_input {
                    ResourceKind::Input {
                        data_type,
                        units: units.to_string(),
                    }
                } else {
                    ResourceKind::Output {
                        data_type,
                        units: units.to_string(),
                    }
                };
                self.replace_kind(id, new_kind);
                Ok(id)
            }
            ResourceKind::Input {
                data_type: existing_type,
                units: existing_units,
            } if want_input => {
                if *existing_type != data_type || existing_units != units {
                    return Err(HubError::Mismatch(format!(
                        "`{path}` already an Input of type {existing_type} units `{existing_units}`"
                    )));
                }
                Ok(id)
            }
            ResourceKind::Output {
                data_type: existing_type,
                units: existing_units,
            } if !want_input => {
                if *existing_type != data_type || existing_units != units {
                    return Err(HubError::Mismatch(format!(
                        "`{path}` already an Output of type {existing_type} units `{existing_units}`"
                    )));
                }
                Ok(id)
            }
            other => Err(HubError::WrongKind(format!(
                "`{path}` is a {}, cannot be promoted to {}",
                other.label(),
                if want_input { "Input" } else { "Output" }
            ))),
        }
    }

    /// `getObservation(base, path)` — `path` must live under `/obs/`.
    pub fn get_observation(&mut self, base: EntryId, path: &str) -> HubResult<EntryId> {
        let segments = split_absolute(path, self.max_path_len)?;
        let base_segments = self.absolute_segments(base);
        let mut full = base_segments;
        full.extend(segments);
        if !is_under_obs(&full) {
            return Err(HubError::Malformed(format!(
                "`{path}` is not under /obs/, cannot host an Observation"
            )));
        }

        let id = self.get_entry(base, path)?;
        let entry = self.arena.get(id).expect("just resolved");
        match &entry.kind {
            ResourceKind::Namespace | ResourceKind::Placeholder => {
                self.replace_kind(id, ResourceKind::Observation(ObsState::new()));
                Ok(id)
            }
            ResourceKind::Observation(_) => Ok(id),
            other => Err(HubError::WrongKind(format!(
                "`{path}` is a {}, cannot be promoted to Observation",
                other.label()
            ))),
        }
    }

    /// `getResource(base, path)` — resolve a path for purely administrative
    /// use (routing, defaults, overrides) without committing it to any
    /// concrete Input/Output/Observation kind. A bare Namespace leaf is
    /// promoted to Placeholder on first use (spec.md §4.3 "Namespace →
    /// Placeholder on getResource"); any other kind is returned unchanged,
    /// since a Placeholder never displaces a resource that already has a
    /// producer/consumer identity.
    pub fn get_resource(&mut self, base: EntryId, path: &str) -> HubResult<EntryId> {
        let id = self.get_entry(base, path)?;
        let entry = self.arena.get(id).expect("just resolved");
        if matches!(entry.kind, ResourceKind::Namespace) {
            self.replace_kind(id, ResourceKind::Placeholder);
        }
        Ok(id)
    }

    /// Promote a leaf in place. `Entry`'s tree linkage and admin settings
    /// (source, destinations, default, override, push handlers) all live
    /// outside `kind`, so "moving settings onto the new variant"
    /// (spec.md §4.3) reduces to just swapping this one field.
    pub(crate) fn replace_kind(&mut self, id: EntryId, new_kind: ResourceKind) {
        if let Some(entry) = self.arena.get_mut(id) {
            entry.kind = new_kind;
        }
    }
}
