//! Per-run working state.
//!
//! A [`RunArena`] is loaded once, before any phase writes, from a single
//! consistent read of the store. Phases resolve against it and mirror their
//! own writes into it, so later phases see earlier phases' results without
//! re-reading. It is dropped when the run ends; nothing in it is persisted
//! except through explicit store calls.

use std::collections::HashMap;

use regsync_core::{
  entity::{Entity, IndividualId, IndividualLink, OrganizationLink, RegistryId},
  hierarchy::CandidateIndex,
  identity::IndividualIndex,
  source::{EntityType, SourceRecord},
  store::TargetState,
};

#[derive(Debug, Default)]
pub struct RunArena {
  pub snapshot:           Vec<SourceRecord>,
  pub entities:           HashMap<RegistryId, Entity>,
  pub individuals:        IndividualIndex,
  pub individual_links:   HashMap<RegistryId, IndividualLink>,
  pub organization_links: HashMap<RegistryId, OrganizationLink>,
  /// Non-subpart organizations by normalized legal name, over the whole
  /// snapshot.
  pub candidates:         CandidateIndex,
}

impl RunArena {
  pub fn new(snapshot: Vec<SourceRecord>, target: TargetState) -> Self {
    let candidates = CandidateIndex::build(&snapshot);
    Self {
      snapshot,
      entities: target
        .entities
        .into_iter()
        .map(|e| (e.registry_id.clone(), e))
        .collect(),
      individuals: IndividualIndex::new(target.individuals),
      individual_links: target
        .individual_links
        .into_iter()
        .map(|l| (l.registry_id.clone(), l))
        .collect(),
      organization_links: target
        .organization_links
        .into_iter()
        .map(|l| (l.registry_id.clone(), l))
        .collect(),
      candidates,
    }
  }

  // Link mirrors keep the same exclusivity the store enforces.

  /// Record an upserted entity, dropping the link kind its type rules out.
  pub fn upsert_entity(&mut self, entity: Entity) {
    let id = &entity.registry_id;
    match entity.entity_type {
      EntityType::Individual => {
        self.organization_links.remove(id);
      }
      EntityType::Organization => {
        self.individual_links.remove(id);
      }
    }
    self.entities.insert(entity.registry_id.clone(), entity);
  }

  pub fn link_individual(&mut self, link: IndividualLink) {
    self.organization_links.remove(&link.registry_id);
    self.individual_links.insert(link.registry_id.clone(), link);
  }

  pub fn set_authorized_official(&mut self, id: &RegistryId, official: Option<IndividualId>) {
    self.individual_links.remove(id);
    self.organization_link_mut(id).authorized_official_id = official;
  }

  pub fn set_parent(&mut self, id: &RegistryId, parent: Option<RegistryId>) {
    self.individual_links.remove(id);
    self.organization_link_mut(id).parent_id = parent;
  }

  pub fn parent_of(&self, id: &RegistryId) -> Option<&RegistryId> {
    self
      .organization_links
      .get(id)
      .and_then(|l| l.parent_id.as_ref())
  }

  fn organization_link_mut(&mut self, id: &RegistryId) -> &mut OrganizationLink {
    self
      .organization_links
      .entry(id.clone())
      .or_insert_with(|| OrganizationLink {
        registry_id:            id.clone(),
        authorized_official_id: None,
        parent_id:              None,
      })
  }
}
