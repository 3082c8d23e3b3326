//! Resource queries.

use serde::{Deserialize, Serialize};

/// Criteria for [`ResourceDb::filter`](crate::ResourceDb::filter).
///
/// Unset criteria match everything; set criteria must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    /// Path equal to this, or below it.
    pub path_prefix: Option<String>,
    /// Type name the resource must be assignable to.
    pub type_name: Option<String>,
    /// Owning application.
    pub owner: Option<String>,
}

impl ResourceFilter {
    /// A filter matching every resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to the subtree at `prefix`.
    #[must_use]
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Restricts to resources assignable to `type_name`.
    #[must_use]
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Restricts to resources owned by `owner`.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub(crate) fn matches_path(&self, path: &str) -> bool {
        match &self.path_prefix {
            None => true,
            Some(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                path == prefix
                    || (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
            }
        }
    }

    pub(crate) fn matches_owner(&self, owner: Option<&str>) -> bool {
        self.owner.as_deref().map_or(true, |wanted| owner == Some(wanted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_whole_segments() {
        let filter = ResourceFilter::new().path_prefix("room");
        assert!(filter.matches_path("room"));
        assert!(filter.matches_path("room/temperature"));
        assert!(!filter.matches_path("roomba"));
        assert!(!filter.matches_path("kitchen/room"));
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let filter = ResourceFilter::new().path_prefix("room/");
        assert!(filter.matches_path("room/x"));
    }

    #[test]
    fn owner_must_match_exactly() {
        let filter = ResourceFilter::new().owner("app");
        assert!(filter.matches_owner(Some("app")));
        assert!(!filter.matches_owner(None));
        assert!(ResourceFilter::new().matches_owner(None));
    }
}
