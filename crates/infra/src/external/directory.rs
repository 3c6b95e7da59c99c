use std::collections::HashMap;
use std::sync::RwLock;

use workforce_absence::{Person, Stakeholder};
use workforce_core::{PersonId, UserId};

use crate::absence_store::RepositoryError;

/// Lookup of user accounts and person records.
pub trait StakeholderDirectory: Send + Sync {
    fn find_stakeholder(&self, id: UserId) -> Result<Option<Stakeholder>, RepositoryError>;
    fn find_person(&self, id: PersonId) -> Result<Option<Person>, RepositoryError>;
}

impl<D> StakeholderDirectory for std::sync::Arc<D>
where
    D: StakeholderDirectory + ?Sized,
{
    fn find_stakeholder(&self, id: UserId) -> Result<Option<Stakeholder>, RepositoryError> {
        (**self).find_stakeholder(id)
    }

    fn find_person(&self, id: PersonId) -> Result<Option<Person>, RepositoryError> {
        (**self).find_person(id)
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    stakeholders: RwLock<HashMap<UserId, Stakeholder>>,
    people: RwLock<HashMap<PersonId, Person>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stakeholder(&self, stakeholder: Stakeholder) {
        if let Ok(mut map) = self.stakeholders.write() {
            map.insert(stakeholder.id, stakeholder);
        }
    }

    pub fn add_person(&self, person: Person) {
        if let Ok(mut map) = self.people.write() {
            map.insert(person.id, person);
        }
    }
}

impl StakeholderDirectory for InMemoryDirectory {
    fn find_stakeholder(&self, id: UserId) -> Result<Option<Stakeholder>, RepositoryError> {
        let map = self.stakeholders.read().map_err(|_| RepositoryError::poisoned())?;
        Ok(map.get(&id).cloned())
    }

    fn find_person(&self, id: PersonId) -> Result<Option<Person>, RepositoryError> {
        let map = self.people.read().map_err(|_| RepositoryError::poisoned())?;
        Ok(map.get(&id).cloned())
    }
}
