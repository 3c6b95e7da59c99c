use serde::{Deserialize, Serialize};

use workforce_core::{PersonId, UserId};

/// A user account that can be notified about an absence request
/// (typically the approver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub id: UserId,
    pub email: Option<String>,
    pub person_id: Option<PersonId>,
}

/// Personal record attached to a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub first_name: String,
    pub last_name: String,
    pub locale: Option<String>,
}

impl Person {
    pub fn display_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            ("", last) => last.to_string(),
            (first, "") => first.to_string(),
            (first, last) => format!("{first} {last}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_skips_blank_parts() {
        let mut person = Person {
            id: PersonId::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            locale: None,
        };
        assert_eq!(person.display_name(), "Ada Lovelace");

        person.last_name = " ".to_string();
        assert_eq!(person.display_name(), "Ada");
    }
}
