//! Per-entry state shared by every Resource Tree node (spec.md §3, §4.2).
//!
//! The original design inherits Input/Output/Observation/Placeholder from
//! a common `Resource` base; spec.md §9 redesigns that as a tagged
//! variant. `Entry` is the common base (tree linkage plus the fields
//! spec.md §3 lists as "per-resource invariants"); `ResourceKind` is the
//! variant that carries what's specific to each leaf kind.

use hub_core::{DataSample, DataType};

use crate::arena::EntryId;
use crate::observation::ObsState;

/// What a tree node *is* (spec.md §3).
pub enum ResourceKind {
    /// Organizational container; no value flow.
    Namespace,
    /// A leaf carrying admin settings but no producer/consumer identity,
    /// created automatically when a route or default is set on a
    /// not-yet-existing path (spec.md §3).
    Placeholder,
    /// Producer endpoint; data type and units fixed at creation.
    Input { data_type: DataType, units: String },
    /// Consumer endpoint; data type and units fixed at creation.
    Output { data_type: DataType, units: String },
    /// Filtering/buffering/persisting resource, always under `/obs/`.
    Observation(ObsState),
}

impl ResourceKind {
    pub fn is_namespace(&self) -> bool {
        matches!(self, ResourceKind::Namespace)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ResourceKind::Placeholder)
    }

    pub fn is_input(&self) -> bool {
        matches!(self, ResourceKind::Input { .. })
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ResourceKind::Output { .. })
    }

    pub fn is_observation(&self) -> bool {
        matches!(self, ResourceKind::Observation(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Placeholder => "placeholder",
            ResourceKind::Input { .. } => "input",
            ResourceKind::Output { .. } => "output",
            ResourceKind::Observation(_) => "observation",
        }
    }

    pub fn fixed_type_and_units(&self) -> Option<(DataType, &str)> {
        match self {
            ResourceKind::Input { data_type, units } | ResourceKind::Output { data_type, units } => {
                Some((*data_type, units.as_str()))
            }
            _ => None,
        }
    }

    pub fn as_observation(&self) -> Option<&ObsState> {
        match self {
            ResourceKind::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn as_observation_mut(&mut self) -> Option<&mut ObsState> {
        match self {
            ResourceKind::Observation(obs) => Some(obs),
            _ => None,
        }
    }
}

/// Identifies one registered push handler, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

pub(crate) struct PushHandler {
    pub id: HandlerId,
    pub data_type: DataType,
    pub callback: Box<dyn FnMut(&DataSample)>,
}

/// A single Resource Tree node: tree linkage (spec.md §3) plus the
/// per-resource value-flow state spec.md §4.2 calls out as invariants.
pub struct Entry {
    pub name: String,
    pub parent: Option<EntryId>,
    pub children: Vec<EntryId>,
    pub kind: ResourceKind,

    pub source: Option<EntryId>,
    pub destinations: Vec<EntryId>,

    pub current: Option<(DataType, DataSample)>,
    pub pushed: Option<(DataType, DataSample)>,
    pub default: Option<DataSample>,
    pub override_sample: Option<DataSample>,

    pub(crate) push_handlers: Vec<PushHandler>,
    pub(crate) next_handler_id: u64,

    /// Set while the update fence is raised and this entry's routing or
    /// filter settings changed during the fence (spec.md §4.2
    /// "Administrative update fence"; shape fixed by spec.md's expanded
    /// spec, "Update-fence pending-sample buffering").
    pub(crate) pending: Option<(DataType, DataSample)>,
    pub(crate) dirty_during_fence: bool,
}

impl Entry {
    pub fn new(name: impl Into<String>, parent: Option<EntryId>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            parent,
            children: Vec::new(),
            kind,
            source: None,
            destinations: Vec::new(),
            current: None,
            pushed: None,
            default: None,
            override_sample: None,
            push_handlers: Vec::new(),
            next_handler_id: 0,
            pending: None,
            dirty_during_fence: false,
        }
    }

    /// The effective data type of `currentValue`, if any.
    pub fn current_type(&self) -> Option<DataType> {
        self.current.as_ref().map(|(t, _)| *t)
    }

    pub fn current_sample(&self) -> Option<&DataSample> {
        self.current.as_ref().map(|(_, s)| s)
    }

    /// Whether this kind admits any data type on push (Observation,
    /// Placeholder) versus only its one fixed type (Input, Output).
    pub fn admits_type_changes(&self) -> bool {
        !matches!(self.kind, ResourceKind::Input { .. } | ResourceKind::Output { .. })
    }

    pub fn add_push_handler(
        &mut self,
        data_type: DataType,
        callback: Box<dyn FnMut(&DataSample)>,
    ) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        self.push_handlers.push(PushHandler {
            id,
            data_type,
            callback,
        });
        id
    }

    pub fn remove_push_handler(&mut self, id: HandlerId) -> bool {
        let before = self.push_handlers.len();
        self.push_handlers.retain(|h| h.id != id);
        self.push_handlers.len() != before
    }
}
