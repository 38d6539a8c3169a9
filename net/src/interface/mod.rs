// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface names and name templates.

use std::fmt::{Display, Formatter};

/// The name of a network interface.
///
/// Names are validated the way the kernel validates them: 1 to [`InterfaceName::MAX_LEN`]
/// ASCII characters, not `.` or `..`, without `/`, `:` or whitespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct InterfaceName(String);

/// Reasons a string is not a legal [`InterfaceName`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IllegalInterfaceName {
    /// Interface names may not be empty.
    #[error("interface name is empty")]
    Empty,
    /// Interface names are limited to [`InterfaceName::MAX_LEN`] bytes.
    #[error("interface name {0} is longer than {MAX} bytes", MAX = InterfaceName::MAX_LEN)]
    TooLong(String),
    /// Interface names must be ASCII.
    #[error("interface name {0} is not ascii")]
    NotAscii(String),
    /// `.` and `..` are reserved.
    #[error("interface name {0} is reserved")]
    Reserved(String),
    /// `/`, `:` and whitespace are forbidden.
    #[error("interface name {0} contains illegal character {1:?}")]
    IllegalCharacter(String, char),
    /// A name template must contain exactly one `%d`.
    #[error("interface name template {0} must contain exactly one %d")]
    BadTemplate(String),
}

impl InterfaceName {
    /// The maximum legal length of an interface name (not counting the null terminator used by
    /// the kernel ABI).
    pub const MAX_LEN: usize = 15;

    fn validate(name: &str) -> Result<(), IllegalInterfaceName> {
        if name.is_empty() {
            return Err(IllegalInterfaceName::Empty);
        }
        if name.len() > Self::MAX_LEN {
            return Err(IllegalInterfaceName::TooLong(name.to_string()));
        }
        if !name.is_ascii() {
            return Err(IllegalInterfaceName::NotAscii(name.to_string()));
        }
        if name == "." || name == ".." {
            return Err(IllegalInterfaceName::Reserved(name.to_string()));
        }
        if let Some(c) = name
            .chars()
            .find(|c| *c == '/' || *c == ':' || c.is_ascii_whitespace())
        {
            return Err(IllegalInterfaceName::IllegalCharacter(name.to_string(), c));
        }
        Ok(())
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        InterfaceName::validate(value)?;
        Ok(InterfaceName(value.to_string()))
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceName::validate(&value)?;
        Ok(InterfaceName(value))
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The placeholder replaced by an index when a template is instantiated.
const TEMPLATE_MARKER: &str = "%d";

/// Either a concrete [`InterfaceName`] or a template such as `tun%d`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum NameRequest {
    /// An exact name.
    Exact(InterfaceName),
    /// A template with a single `%d`, to be replaced by the lowest free index.
    Template(String),
}

impl NameRequest {
    /// Parse a requested name.
    ///
    /// # Errors
    ///
    /// Returns an [`IllegalInterfaceName`] if the request is neither a legal name nor a legal
    /// template.
    pub fn parse(request: &str) -> Result<NameRequest, IllegalInterfaceName> {
        match request.matches(TEMPLATE_MARKER).count() {
            0 => Ok(NameRequest::Exact(InterfaceName::try_from(request)?)),
            1 => {
                // the widest instantiation still has to be a legal name
                InterfaceName::validate(&request.replace(TEMPLATE_MARKER, "0"))?;
                Ok(NameRequest::Template(request.to_string()))
            }
            _ => Err(IllegalInterfaceName::BadTemplate(request.to_string())),
        }
    }

    /// Replace the `%d` of a template with `index`.
    ///
    /// Exact names are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an [`IllegalInterfaceName`] if the instantiated name is too long.
    pub fn instantiate(&self, index: usize) -> Result<InterfaceName, IllegalInterfaceName> {
        match self {
            NameRequest::Exact(name) => Ok(name.clone()),
            NameRequest::Template(template) => {
                InterfaceName::try_from(template.replacen(TEMPLATE_MARKER, &index.to_string(), 1))
            }
        }
    }
}

impl TryFrom<String> for NameRequest {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NameRequest::parse(&value)
    }
}

impl From<NameRequest> for String {
    fn from(value: NameRequest) -> Self {
        match value {
            NameRequest::Exact(name) => name.into(),
            NameRequest::Template(template) => template,
        }
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::InterfaceName;
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for InterfaceName {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789-_";
            let len = driver.produce::<usize>()? % InterfaceName::MAX_LEN + 1;
            let mut name = String::with_capacity(len);
            for _ in 0..len {
                let idx = driver.produce::<usize>()? % ALPHABET.len();
                name.push(char::from(ALPHABET[idx]));
            }
            InterfaceName::try_from(name).ok()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_names_are_legal() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|name: InterfaceName| {
                assert!(!name.as_str().is_empty());
                assert!(name.as_str().len() <= InterfaceName::MAX_LEN);
                assert_eq!(InterfaceName::try_from(name.as_str()), Ok(name.clone()));
            });
    }

    #[test]
    fn illegal_names_are_rejected() {
        assert_eq!(InterfaceName::try_from(""), Err(IllegalInterfaceName::Empty));
        assert!(matches!(
            InterfaceName::try_from("a-very-long-interface"),
            Err(IllegalInterfaceName::TooLong(_))
        ));
        assert!(matches!(
            InterfaceName::try_from(".."),
            Err(IllegalInterfaceName::Reserved(_))
        ));
        assert!(matches!(
            InterfaceName::try_from("tap/0"),
            Err(IllegalInterfaceName::IllegalCharacter(_, '/'))
        ));
        assert!(matches!(
            InterfaceName::try_from("tap 0"),
            Err(IllegalInterfaceName::IllegalCharacter(_, ' '))
        ));
    }

    #[test]
    fn templates_instantiate() {
        let request = NameRequest::parse("tun%d").unwrap();
        assert_eq!(request.instantiate(3).unwrap().as_str(), "tun3");
        assert!(matches!(
            NameRequest::parse("tun%d%d"),
            Err(IllegalInterfaceName::BadTemplate(_))
        ));
        let exact = NameRequest::parse("tap7").unwrap();
        assert_eq!(exact.instantiate(99).unwrap().as_str(), "tap7");
    }
}
