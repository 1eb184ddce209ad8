//! HCL — Holochain Cell Locator
//!
//! A stable, human-meaningful address for a cell within a running hApp:
//!
//! ```text
//! cell:/<appId>/<baseRoleName>[/<cloneName>][/<cloneIndex>]
//! ```
//!
//! Examples:
//! - `cell:/where/profiles` — the provisioned cell of a role
//! - `cell:/chat/channel/2` — clone index 2 of the channel role
//! - `cell:/chat/channel/europe/2` — the same clone, carrying its label
//!
//! Equality considers `app_id`, `base_role_name` and `clone_index` only; the
//! clone name is an informational label. The string form round-trips through
//! [`Hcl::parse`] for every value whose segments are free of `/`.

use std::fmt;

use crate::error::{ProxyError, Result};

/// Fixed prefix of the canonical string form.
const HCL_PREFIX: &str = "cell:";

/// Separator inside a combined instance-role string (`"<base>.<index>"`).
const CLONE_ID_SEPARATOR: char = '.';

/// Build the conventional clone id string for a role and clone index.
pub fn create_clone_name(base_role_name: &str, clone_index: u32) -> String {
    format!("{base_role_name}{CLONE_ID_SEPARATOR}{clone_index}")
}

/// Split a combined `"<base>.<index>"` instance-role string.
///
/// Returns `None` when the input has no clone suffix (plain base role name).
pub fn destructure_clone_id(clone_id: &str) -> Option<(&str, u32)> {
    let (base, index) = clone_id.rsplit_once(CLONE_ID_SEPARATOR)?;
    let index = index.parse::<u32>().ok()?;
    if base.is_empty() {
        return None;
    }
    Some((base, index))
}

/// Locator for one cell of one hApp.
///
/// Constructors do not validate their inputs: the string form round-trips
/// through [`Hcl::parse`] only when `app_id`, `base_role_name` and
/// `clone_name` contain no `/`.
#[derive(Debug, Clone, Eq)]
pub struct Hcl {
    /// The installed app id this cell belongs to
    pub app_id: String,
    /// The role name as declared in the app manifest
    pub base_role_name: String,
    /// Clone index, present iff this locator refers to a clone
    pub clone_index: Option<u32>,
    /// Human label for a clone; never part of equality
    pub clone_name: Option<String>,
}

impl Hcl {
    /// Build a locator from an app id and a role string.
    ///
    /// The role string may be a plain base role name or a combined
    /// `"<base>.<index>"` instance-role string; the clone suffix is
    /// destructured transparently so callers needn't know which they hold.
    pub fn new(app_id: impl Into<String>, role: &str) -> Self {
        match destructure_clone_id(role) {
            Some((base, index)) => Self {
                app_id: app_id.into(),
                base_role_name: base.to_string(),
                clone_index: Some(index),
                clone_name: None,
            },
            None => Self {
                app_id: app_id.into(),
                base_role_name: role.to_string(),
                clone_index: None,
                clone_name: None,
            },
        }
    }

    /// Locator for a clone by index.
    pub fn with_clone(app_id: impl Into<String>, base_role_name: impl Into<String>, clone_index: u32) -> Self {
        Self {
            app_id: app_id.into(),
            base_role_name: base_role_name.into(),
            clone_index: Some(clone_index),
            clone_name: None,
        }
    }

    /// Locator for a clone carrying both its index and its label.
    pub fn with_named_clone(
        app_id: impl Into<String>,
        base_role_name: impl Into<String>,
        clone_index: u32,
        clone_name: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            base_role_name: base_role_name.into(),
            clone_index: Some(clone_index),
            clone_name: Some(clone_name.into()),
        }
    }

    /// Parse the canonical string form.
    ///
    /// Rejects strings without the `cell:` prefix and strings with fewer than
    /// 2 or more than 4 path segments. A single trailing segment is taken as
    /// the clone index when it parses as a number, as the clone name
    /// otherwise.
    pub fn parse(s: &str) -> Result<Self> {
        let mut subs = s.split('/');
        if subs.next() != Some(HCL_PREFIX) {
            return Err(ProxyError::MalformedLocator(s.to_string()));
        }
        let segments: Vec<&str> = subs.collect();
        if segments.len() < 2 || segments.len() > 4 || segments.iter().any(|seg| seg.is_empty()) {
            return Err(ProxyError::MalformedLocator(s.to_string()));
        }
        let app_id = segments[0].to_string();
        let base_role_name = segments[1].to_string();
        match segments.len() {
            2 => Ok(Self {
                app_id,
                base_role_name,
                clone_index: None,
                clone_name: None,
            }),
            3 => match segments[2].parse::<u32>() {
                Ok(index) => Ok(Self {
                    app_id,
                    base_role_name,
                    clone_index: Some(index),
                    clone_name: None,
                }),
                Err(_) => Ok(Self {
                    app_id,
                    base_role_name,
                    clone_index: None,
                    clone_name: Some(segments[2].to_string()),
                }),
            },
            4 => {
                let index = segments[3]
                    .parse::<u32>()
                    .map_err(|_| ProxyError::MalformedLocator(s.to_string()))?;
                Ok(Self {
                    app_id,
                    base_role_name,
                    clone_index: Some(index),
                    clone_name: Some(segments[2].to_string()),
                })
            }
            _ => unreachable!("segment count checked above"),
        }
    }

    /// True iff this locator refers to a clone.
    pub fn is_clone(&self) -> bool {
        self.clone_index.is_some()
    }

    /// The combined instance-role string (`"<base>.<index>"` for clones,
    /// the plain base role name otherwise).
    pub fn instance_role(&self) -> String {
        match self.clone_index {
            Some(index) => create_clone_name(&self.base_role_name, index),
            None => self.base_role_name.clone(),
        }
    }

    /// Loose match against another locator.
    ///
    /// Same app and role required. When `other` is a clone, `self` must carry
    /// an equal clone name; `self`'s own index is not consulted. This
    /// name-based asymmetry mirrors the long-standing behavior of the locator
    /// scheme and is pinned by test, not extended.
    pub fn matches(&self, other: &Hcl) -> bool {
        if self.app_id != other.app_id || self.base_role_name != other.base_role_name {
            return false;
        }
        if other.is_clone() {
            if !self.is_clone() {
                return false;
            }
            if other.clone_name != self.clone_name {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Hcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", HCL_PREFIX, self.app_id, self.base_role_name)?;
        if let Some(ref name) = self.clone_name {
            write!(f, "/{name}")?;
        }
        if let Some(index) = self.clone_index {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

impl PartialEq for Hcl {
    fn eq(&self, other: &Self) -> bool {
        self.app_id == other.app_id
            && self.base_role_name == other.base_role_name
            && self.clone_index == other.clone_index
    }
}

impl std::hash::Hash for Hcl {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.app_id.hash(state);
        self.base_role_name.hash(state);
        self.clone_index.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provisioned() {
        let hcl = Hcl::parse("cell:/where/profiles").unwrap();
        assert_eq!(hcl.app_id, "where");
        assert_eq!(hcl.base_role_name, "profiles");
        assert!(!hcl.is_clone());
    }

    #[test]
    fn test_parse_clone_index_and_name() {
        let by_index = Hcl::parse("cell:/chat/channel/2").unwrap();
        assert_eq!(by_index.clone_index, Some(2));
        assert_eq!(by_index.clone_name, None);

        let by_name = Hcl::parse("cell:/chat/channel/europe").unwrap();
        assert_eq!(by_name.clone_index, None);
        assert_eq!(by_name.clone_name.as_deref(), Some("europe"));

        let both = Hcl::parse("cell:/chat/channel/europe/2").unwrap();
        assert_eq!(both.clone_index, Some(2));
        assert_eq!(both.clone_name.as_deref(), Some("europe"));
    }

    #[test]
    fn test_parse_rejects_bad_strings() {
        for bad in [
            "chat/channel",
            "dna:/chat/channel",
            "cell:",
            "cell:/",
            "cell:/chat",
            "cell:/chat/channel/europe/2/extra",
            "cell:/chat/channel/europe/notanumber",
            "cell:/chat//2",
        ] {
            assert!(
                matches!(Hcl::parse(bad), Err(ProxyError::MalformedLocator(_))),
                "expected MalformedLocator for {bad:?}"
            );
        }
    }

    #[test]
    fn test_round_trip_law() {
        let values = [
            Hcl::new("app-1", "role-a"),
            Hcl::new("app-1", "role-a.3"),
            Hcl::with_clone("app-1", "role-a", 0),
            Hcl::with_named_clone("app-1", "role-a", 7, "europe"),
        ];
        for hcl in values {
            let reparsed = Hcl::parse(&hcl.to_string()).unwrap();
            // Equality compares app, role and index — not the label.
            assert_eq!(reparsed, hcl, "round trip failed for {hcl}");
        }
    }

    #[test]
    fn test_instance_role_destructuring() {
        let hcl = Hcl::new("chat", "channel.2");
        assert_eq!(hcl.base_role_name, "channel");
        assert_eq!(hcl.clone_index, Some(2));
        assert_eq!(hcl.instance_role(), "channel.2");
        assert_eq!(hcl.to_string(), "cell:/chat/channel/2");

        assert_eq!(destructure_clone_id("channel.2"), Some(("channel", 2)));
        assert_eq!(destructure_clone_id("channel"), None);
        assert_eq!(destructure_clone_id(".2"), None);
        assert_eq!(create_clone_name("channel", 2), "channel.2");
    }

    #[test]
    fn test_equality_ignores_clone_name() {
        let a = Hcl::with_clone("app", "role", 1);
        let b = Hcl::with_named_clone("app", "role", 1, "label");
        assert_eq!(a, b);
        let c = Hcl::with_clone("app", "role", 2);
        assert_ne!(a, c);
        let d = Hcl::new("app", "role");
        assert_ne!(a, d);
    }

    /// Pinned behavior: matching a clone candidate compares clone names only,
    /// never indices. Inherited from the locator scheme as-is.
    #[test]
    fn test_matches_clone_name_only_is_pinned_behavior() {
        let provisioned = Hcl::new("app", "role");
        let clone = Hcl::with_named_clone("app", "role", 0, "europe");

        // A non-clone never matches a clone candidate.
        assert!(!provisioned.matches(&clone));
        // Matching any clone candidate against a provisioned search succeeds.
        assert!(clone.matches(&provisioned));

        // Same name, different index: still a match.
        let other_index = Hcl::with_named_clone("app", "role", 5, "europe");
        assert!(other_index.matches(&clone));

        // Different name: no match.
        let other_name = Hcl::with_named_clone("app", "role", 0, "asia");
        assert!(!other_name.matches(&clone));
    }
}
