use crate::domain::{EntityId, Profile};
use std::collections::HashMap;

/// Read-only profile lookup keyed by user id
#[derive(Debug, Default)]
pub struct ProfileBook {
    profiles: HashMap<EntityId, Profile>,
}

impl ProfileBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Profile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn extend(&mut self, profiles: impl IntoIterator<Item = Profile>) {
        for profile in profiles {
            self.insert(profile);
        }
    }

    /// Ids from `ids` with no cached profile, de-duplicated, in input order
    pub fn missing<'a>(&self, ids: impl IntoIterator<Item = &'a EntityId>) -> Vec<EntityId> {
        let mut missing: Vec<EntityId> = Vec::new();
        for id in ids {
            if !self.contains(id) && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        missing
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
