//! Caller personas.
//!
//! A persona is the class of caller an identity service resolved for a
//! request. The set is closed: anything outside it can never be granted.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// A class of caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    /// Cloud-wide operator holding admin on the system scope.
    SystemAdmin,

    /// Admin role on the target project.
    ProjectAdmin,

    /// Member role on the target project.
    ProjectMember,

    /// Read-only role on the target project.
    ProjectReader,

    /// Restricted user created for a single stack's in-instance agents.
    StackUser,
}

impl Persona {
    /// Every persona, in declaration order.
    pub const ALL: [Persona; 5] = [
        Persona::SystemAdmin,
        Persona::ProjectAdmin,
        Persona::ProjectMember,
        Persona::ProjectReader,
        Persona::StackUser,
    ];

    /// Canonical label used in rule files and fixtures.
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::SystemAdmin => "system_admin",
            Persona::ProjectAdmin => "project_admin",
            Persona::ProjectMember => "project_member",
            Persona::ProjectReader => "project_reader",
            Persona::StackUser => "stack_user",
        }
    }

    /// Position on the project axis. Higher is more privileged.
    ///
    /// This is a naming convention for rule authors and is only consulted by
    /// the authoring lint; evaluation never infers privilege from it.
    pub fn project_rank(&self) -> Option<u8> {
        match self {
            Persona::ProjectAdmin => Some(3),
            Persona::ProjectMember => Some(2),
            Persona::ProjectReader => Some(1),
            Persona::SystemAdmin | Persona::StackUser => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a label outside the persona set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown persona: {0}")]
pub struct UnknownPersona(pub String);

impl FromStr for Persona {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Persona::ALL
            .iter()
            .copied()
            .find(|persona| persona.as_str() == s)
            .ok_or_else(|| UnknownPersona(s.to_string()))
    }
}

/// A set of personas held by one caller, or listed by one rule.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PersonaSet(u8);

impl PersonaSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every persona.
    pub fn all() -> Self {
        Persona::ALL.iter().copied().collect()
    }

    /// Build a set from raw role labels.
    ///
    /// Returns the recognized personas and the labels that matched nothing.
    pub fn from_labels<'a, I>(labels: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut set = Self::empty();
        let mut unknown = Vec::new();
        for label in labels {
            match label.trim().parse::<Persona>() {
                Ok(persona) => {
                    set.insert(persona);
                }
                Err(UnknownPersona(label)) => unknown.push(label),
            }
        }
        (set, unknown)
    }

    /// Add a persona. Returns true if it was not already present.
    pub fn insert(&mut self, persona: Persona) -> bool {
        let fresh = !self.contains(persona);
        self.0 |= persona.bit();
        fresh
    }

    /// Remove a persona. Returns true if it was present.
    pub fn remove(&mut self, persona: Persona) -> bool {
        let present = self.contains(persona);
        self.0 &= !persona.bit();
        present
    }

    pub fn contains(&self, persona: Persona) -> bool {
        self.0 & persona.bit() != 0
    }

    pub fn intersection(&self, other: &PersonaSet) -> PersonaSet {
        PersonaSet(self.0 & other.0)
    }

    pub fn union(&self, other: &PersonaSet) -> PersonaSet {
        PersonaSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Persona> + '_ {
        Persona::ALL
            .iter()
            .copied()
            .filter(move |persona| self.contains(*persona))
    }
}

impl FromIterator<Persona> for PersonaSet {
    fn from_iter<I: IntoIterator<Item = Persona>>(iter: I) -> Self {
        let mut set = PersonaSet::empty();
        for persona in iter {
            set.insert(persona);
        }
        set
    }
}

impl From<Persona> for PersonaSet {
    fn from(persona: Persona) -> Self {
        PersonaSet(persona.bit())
    }
}

impl fmt::Debug for PersonaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for PersonaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, persona) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", persona)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for PersonaSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for persona in self.iter() {
            seq.serialize_element(&persona)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for PersonaSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PersonaSetVisitor;

        impl<'de> Visitor<'de> for PersonaSetVisitor {
            type Value = PersonaSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of persona labels")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<PersonaSet, A::Error> {
                let mut set = PersonaSet::empty();
                while let Some(persona) = seq.next_element::<Persona>()? {
                    set.insert(persona);
                }
                Ok(set)
            }

            fn visit_unit<E: de::Error>(self) -> Result<PersonaSet, E> {
                Ok(PersonaSet::empty())
            }
        }

        deserializer.deserialize_any(PersonaSetVisitor)
    }
}
