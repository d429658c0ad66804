use std::collections::BTreeMap;
use std::str::FromStr;

use itertools::Itertools;

use crate::error::PolicyResolutionError;

/// Parsed policy identifier of the form `Name` or `Name[key=value,...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyParams {
    name: String,
    params: BTreeMap<String, String>,
}

impl PolicyParams {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns parameter value, `None` if it is absent or can't be parsed.
    pub fn get<T: FromStr, K: AsRef<str>>(&self, name: K) -> Option<T> {
        self.params.get(name.as_ref()).and_then(|s| s.parse().ok())
    }

    /// Returns parameter value, failing if it is present but can't be parsed.
    pub fn try_get<T: FromStr, K: AsRef<str>>(&self, name: K) -> Result<Option<T>, String> {
        match self.params.get(name.as_ref()) {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| format!("invalid value `{}` of parameter `{}`", s, name.as_ref())),
        }
    }

    pub fn contains<K: AsRef<str>>(&self, name: K) -> bool {
        self.params.contains_key(name.as_ref())
    }

    /// Returns names of parameters not present in `known`.
    pub fn unknown_keys<'a>(&'a self, known: &'a [&str]) -> impl Iterator<Item = &'a str> {
        self.params.keys().map(|k| k.as_str()).filter(move |k| !known.contains(k))
    }
}

impl FromStr for PolicyParams {
    type Err = PolicyResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || PolicyResolutionError::InvalidIdentifier(s.to_string());
        let Some(open) = s.find('[') else {
            if s.is_empty() || s.contains(']') {
                return Err(invalid());
            }
            return Ok(Self::new(s));
        };
        if open == 0 || !s.ends_with(']') {
            return Err(invalid());
        }

        let mut params = BTreeMap::new();
        let body = &s[open + 1..s.len() - 1];
        if !body.trim().is_empty() {
            for param in body.split(',') {
                let pos = param.find('=').ok_or_else(invalid)?;
                let key = param[..pos].trim();
                if key.is_empty() {
                    return Err(invalid());
                }
                params.insert(key.to_string(), param[pos + 1..].trim().to_string());
            }
        }

        Ok(Self {
            name: s[..open].trim().to_string(),
            params,
        })
    }
}

impl std::fmt::Display for PolicyParams {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(
                f,
                "{}[{}]",
                self.name,
                self.params.iter().map(|(k, v)| format!("{k}={v}")).join(",")
            )
        }
    }
}
