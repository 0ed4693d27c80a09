//! Per-client map from `ObjectId` to `XrceObject`, with the `CreationMode`
//! policy and cascade delete of spec §4.4.
//!
//! Entries live in a generational [`collections::slab::Slab`] (spec §9's
//! "arena with generational indices to avoid use-after-free during
//! cascade deletes"); `by_id` is the `ObjectId -> Key` index used to
//! resolve wire references into arena slots.

use collections::map::{self, Map};
use collections::slab::{Key, Slab};
use wire::error::{AgentError, StatusCode};
use wire::object::{ObjectId, ObjectKind};
use wire::submessage::CreationMode;

use crate::middleware::{Middleware, Representation};

pub struct XrceObject {
	pub object_id: ObjectId,
	pub parent: Option<ObjectId>,
	pub children: Vec<ObjectId>,
	pub representation: Representation,
}

pub struct ObjectTree {
	by_id: Map<ObjectId, Key>,
	arena: Slab<XrceObject>,
}

impl ObjectTree {
	pub fn new() -> Self {
		Self { by_id: map::new(), arena: Slab::new() }
	}

	pub fn len(&self) -> usize {
		self.arena.len()
	}

	pub fn is_empty(&self) -> bool {
		self.arena.is_empty()
	}

	pub fn contains(&self, id: ObjectId) -> bool {
		self.by_id.contains_key(&id)
	}

	pub fn get(&self, id: ObjectId) -> Option<&XrceObject> {
		let key = *self.by_id.get(&id)?;
		self.arena.get(key)
	}

	/// Apply a CREATE submessage under `mode` (spec §4.4's four-way policy
	/// table). Returns the status to report back to the client; `Ok` means
	/// a new entry now exists with `representation`, `OkMatched` means an
	/// existing entry was left untouched because it already matched.
	pub fn create(
		&mut self,
		middleware: &dyn Middleware,
		object_id: ObjectId,
		parent_or_domain_id: u16,
		mode: CreationMode,
		representation: Representation,
	) -> Result<StatusCode, AgentError> {
		let parent = self.resolve_parent(object_id.kind, parent_or_domain_id)?;
		let existing = self.by_id.get(&object_id).copied();

		match (mode.reuse, mode.replace, existing) {
			(false, false, None) => self.insert(middleware, object_id, parent, parent_or_domain_id, representation),
			(false, false, Some(_)) => Err(AgentError::AlreadyExists),

			(true, false, None) => Err(AgentError::UnknownReference),
			(true, false, Some(key)) => self.reuse_if_matching(key, &representation),

			(false, true, None) => self.insert(middleware, object_id, parent, parent_or_domain_id, representation),
			(false, true, Some(_)) => {
				self.delete(middleware, object_id)?;
				self.insert(middleware, object_id, parent, parent_or_domain_id, representation)
			}

			(true, true, None) => self.insert(middleware, object_id, parent, parent_or_domain_id, representation),
			(true, true, Some(key)) => match self.reuse_if_matching(key, &representation) {
				Ok(status) => Ok(status),
				Err(AgentError::Unmatched) => {
					self.delete(middleware, object_id)?;
					self.insert(middleware, object_id, parent, parent_or_domain_id, representation)
				}
				Err(other) => Err(other),
			},
		}
	}

	fn resolve_parent(&self, kind: ObjectKind, parent_or_domain_id: u16) -> Result<Option<ObjectId>, AgentError> {
		let allowed = kind.allowed_parents();
		if allowed.is_empty() {
			return Ok(None);
		}

		let parent_id = ObjectId::from_raw(parent_or_domain_id)?;
		if !allowed.contains(&parent_id.kind) || !self.by_id.contains_key(&parent_id) {
			return Err(AgentError::UnknownReference);
		}
		Ok(Some(parent_id))
	}

	fn reuse_if_matching(&self, key: Key, representation: &Representation) -> Result<StatusCode, AgentError> {
		let existing = self.arena.get(key).expect("by_id points at a live slot");
		if existing.representation.matches(representation) {
			Ok(StatusCode::OkMatched)
		} else {
			Err(AgentError::Unmatched)
		}
	}

	fn insert(
		&mut self,
		middleware: &dyn Middleware,
		object_id: ObjectId,
		parent: Option<ObjectId>,
		parent_or_domain_id: u16,
		representation: Representation,
	) -> Result<StatusCode, AgentError> {
		let raw_id = object_id.as_raw();
		let parent_raw = parent.map_or(0, |p| p.as_raw());

		let ok = match object_id.kind {
			ObjectKind::Participant => middleware.create_participant(raw_id, parent_or_domain_id, &representation),
			ObjectKind::Topic => middleware.create_topic(raw_id, parent_raw, &representation),
			ObjectKind::Publisher => middleware.create_publisher(raw_id, parent_raw, &representation),
			ObjectKind::Subscriber => middleware.create_subscriber(raw_id, parent_raw, &representation),
			ObjectKind::DataWriter => middleware.create_datawriter(raw_id, parent_raw, &representation),
			ObjectKind::DataReader => middleware.create_datareader(raw_id, parent_raw, &representation),
			ObjectKind::Requester => middleware.create_requester(raw_id, parent_raw, &representation),
			ObjectKind::Replier => middleware.create_replier(raw_id, parent_raw, &representation),
			ObjectKind::Type | ObjectKind::QosProfile | ObjectKind::Application => true,
		};

		if !ok {
			return Err(AgentError::InvalidData);
		}

		let key = self.arena.insert(XrceObject { object_id, parent, children: Vec::new(), representation });
		self.by_id.insert(object_id, key);

		if let Some(parent_id) = parent {
			if let Some(parent_key) = self.by_id.get(&parent_id).copied() {
				if let Some(parent_obj) = self.arena.get_mut(parent_key) {
					parent_obj.children.push(object_id);
				}
			}
		}

		Ok(StatusCode::Ok)
	}

	/// Delete `object_id` and cascade to every tied child (spec §4.4: "all
	/// tied ids are removed before the call returns").
	pub fn delete(&mut self, middleware: &dyn Middleware, object_id: ObjectId) -> Result<(), AgentError> {
		let key = self.by_id.get(&object_id).copied().ok_or(AgentError::UnknownReference)?;
		let parent = self.arena.get(key).and_then(|o| o.parent);
		self.delete_subtree(middleware, object_id, key);

		if let Some(parent_id) = parent {
			// parent already removed if it was part of this cascade; otherwise
			// detach the now-gone child from its sibling list.
			if let Some(parent_key) = self.by_id.get(&parent_id).copied() {
				if let Some(parent_obj) = self.arena.get_mut(parent_key) {
					parent_obj.children.retain(|c| *c != object_id);
				}
			}
		}

		Ok(())
	}

	fn delete_subtree(&mut self, middleware: &dyn Middleware, object_id: ObjectId, key: Key) {
		let children = self.arena.get(key).map(|o| o.children.clone()).unwrap_or_default();

		for child_id in children {
			if let Some(child_key) = self.by_id.get(&child_id).copied() {
				self.delete_subtree(middleware, child_id, child_key);
			}
		}

		middleware.delete(object_id.kind, object_id.as_raw());
		self.arena.remove(key);
		self.by_id.remove(&object_id);
	}
}

impl Default for ObjectTree {
	fn default() -> Self {
		Self::new()
	}
}
