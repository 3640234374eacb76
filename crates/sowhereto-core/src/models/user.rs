use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend user id. The API has sent both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

/// Identity snapshot cached alongside the access token.
///
/// Only the fields the client reasons about are typed. Anything else the
/// backend returns (phone, preferences, avatar...) is kept in `extra` and
/// written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Places the user never wants to be sent to
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            first_name: None,
            last_name: None,
            blacklist: Vec::new(),
            extra: Map::new(),
        }
    }

    /// "First Last", falling back to first name, then email, then empty
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.email.clone().unwrap_or_default(),
        }
    }

    /// Single uppercase initial for avatars
    pub fn initials(&self) -> Option<char> {
        self.first_name
            .as_deref()
            .or(self.email.as_deref())
            .and_then(|s| s.chars().next())
            .and_then(|c| c.to_uppercase().next())
    }

    /// Whether a country or region is on the user's blacklist
    pub fn is_blacklisted(&self, place: &str) -> bool {
        self.blacklist.iter().any(|b| b.eq_ignore_ascii_case(place))
    }

    /// Shallow-merge a JSON object into this user (profile update semantics).
    ///
    /// Keys in `patch` overwrite, keys not in `patch` are kept.
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<User, serde_json::Error> {
        let mut current = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(current))
    }
}
