//! Who may log in, and on behalf of which group and role.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::limits::MAX_IDENTITY_LEN;
use crate::model::Requester;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cannot read members file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed members file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("member {0:?} is listed twice")]
    Duplicate(String),
    #[error("member identity {0:?} is empty or too long")]
    BadIdentity(String),
}

/// Resolves a login identity to the requester it acts as.
pub trait Directory: Send + Sync {
    fn lookup(&self, identity: &str) -> Option<Requester>;
}

/// Members loaded once from a JSON array of requesters:
///
/// ```json
/// [{"identity": "kim", "name": "Kim Lee", "role": 2,
///   "group": {"id": "g7", "name": "Youth", "parish": "St. Mark"}}]
/// ```
#[derive(Debug, Default)]
pub struct MemberDirectory {
    members: HashMap<String, Requester>,
}

impl MemberDirectory {
    pub fn new(members: impl IntoIterator<Item = Requester>) -> Result<Self, DirectoryError> {
        let mut map = HashMap::new();
        for member in members {
            let identity = member.identity.clone();
            if identity.trim().is_empty() || identity.len() > MAX_IDENTITY_LEN {
                return Err(DirectoryError::BadIdentity(identity));
            }
            if map.insert(identity.clone(), member).is_some() {
                return Err(DirectoryError::Duplicate(identity));
            }
        }
        Ok(Self { members: map })
    }

    pub fn from_json(json: &str) -> Result<Self, DirectoryError> {
        let members: Vec<Requester> = serde_json::from_str(json)?;
        Self::new(members)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let json = std::fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Directory for MemberDirectory {
    fn lookup(&self, identity: &str) -> Option<Requester> {
        self.members.get(identity).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    const MEMBERS: &str = r#"[
        {"identity": "kim", "name": "Kim Lee", "role": 2,
         "group": {"id": "g7", "name": "Youth", "parish": "St. Mark"}},
        {"identity": "root", "name": "Office", "role": 0,
         "group": {"id": "office", "name": "Parish office"}}
    ]"#;

    #[test]
    fn loads_members_from_json() {
        let dir = MemberDirectory::from_json(MEMBERS).unwrap();
        assert_eq!(dir.len(), 2);
        let kim = dir.lookup("kim").unwrap();
        assert_eq!(kim.role, Role(2));
        assert_eq!(kim.group.display_name(), "St. Mark - Youth");
        assert_eq!(dir.lookup("root").unwrap().group.parish, None);
        assert!(dir.lookup("nobody").is_none());
    }

    #[test]
    fn rejects_duplicates_and_garbage() {
        let twice = r#"[
            {"identity": "kim", "name": "A", "role": 2, "group": {"id": "g", "name": "G"}},
            {"identity": "kim", "name": "B", "role": 3, "group": {"id": "g", "name": "G"}}
        ]"#;
        assert!(matches!(MemberDirectory::from_json(twice), Err(DirectoryError::Duplicate(_))));
        assert!(matches!(MemberDirectory::from_json("{"), Err(DirectoryError::Parse(_))));
        let blank = r#"[{"identity": " ", "name": "A", "role": 2, "group": {"id": "g", "name": "G"}}]"#;
        assert!(matches!(MemberDirectory::from_json(blank), Err(DirectoryError::BadIdentity(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = MemberDirectory::load(Path::new("/nonexistent/members.json")).unwrap_err();
        assert!(matches!(err, DirectoryError::Io { .. }));
    }
}
