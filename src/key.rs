//! Composite keys.
//!
//! A key is a structured `(namespace, category)` pair compared by value, so two
//! distinct pairs can never collide the way a naive `"{ns}-{cat}"` join can
//! (`("a-b", "c")` vs `("a", "b-c")`). When a flat string form is needed (logs,
//! external caches), [`CompositeKey::encode`] produces an escaped encoding that
//! [`CompositeKey::decode`] reverses exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const SEPARATOR: char = '-';
const ESCAPE: char = '\\';

/// A key composed of a namespace component (e.g. a channel id) and a category
/// component (e.g. a game type).
///
/// # Examples
///
/// ```
/// use countdown_store::CompositeKey;
///
/// let a = CompositeKey::new("a-b".to_string(), "c".to_string());
/// let b = CompositeKey::new("a".to_string(), "b-c".to_string());
/// assert_ne!(a, b);
/// assert_ne!(a.encode(), b.encode());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey<N, C> {
    /// Namespace component.
    pub namespace: N,
    /// Category component.
    pub category: C,
}

impl<N, C> CompositeKey<N, C> {
    /// Creates a key from its two components.
    #[must_use]
    pub const fn new(namespace: N, category: C) -> Self {
        Self {
            namespace,
            category,
        }
    }

    /// Splits the key back into its components.
    #[must_use]
    pub fn into_parts(self) -> (N, C) {
        (self.namespace, self.category)
    }
}

impl<N: fmt::Display, C: fmt::Display> CompositeKey<N, C> {
    /// Encodes the key as `namespace-category`, escaping `-` and `\` inside
    /// either component with a leading `\`.
    #[must_use]
    pub fn encode(&self) -> String {
        let ns = self.namespace.to_string();
        let cat = self.category.to_string();
        let mut out = String::with_capacity(ns.len() + cat.len() + 1);
        push_escaped(&mut out, &ns);
        out.push(SEPARATOR);
        push_escaped(&mut out, &cat);
        out
    }
}

impl<N: FromStr, C: FromStr> CompositeKey<N, C> {
    /// Decodes a string produced by [`CompositeKey::encode`].
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidKeyEncoding` if the input has no
    /// unescaped separator, more than one, a dangling escape, or a component
    /// that fails to parse.
    pub fn decode(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidKeyEncoding {
            input: input.to_string(),
        };

        let mut parts: Vec<String> = vec![String::new()];
        let mut chars = input.chars();
        while let Some(ch) = chars.next() {
            match ch {
                ESCAPE => {
                    let escaped = chars.next().ok_or_else(invalid)?;
                    if escaped != ESCAPE && escaped != SEPARATOR {
                        return Err(invalid());
                    }
                    if let Some(last) = parts.last_mut() {
                        last.push(escaped);
                    }
                }
                SEPARATOR => parts.push(String::new()),
                other => {
                    if let Some(last) = parts.last_mut() {
                        last.push(other);
                    }
                }
            }
        }

        let [ns, cat]: [String; 2] = parts.try_into().map_err(|_| invalid())?;
        let namespace = ns.parse::<N>().map_err(|_| invalid())?;
        let category = cat.parse::<C>().map_err(|_| invalid())?;
        Ok(Self::new(namespace, category))
    }
}

impl<N: fmt::Display, C: fmt::Display> fmt::Display for CompositeKey<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl<N, C> From<(N, C)> for CompositeKey<N, C> {
    fn from((namespace, category): (N, C)) -> Self {
        Self::new(namespace, category)
    }
}

fn push_escaped(out: &mut String, component: &str) {
    for ch in component.chars() {
        if ch == SEPARATOR || ch == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
}
