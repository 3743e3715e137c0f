use crate::error::{HubError, Result};

use super::messages::{ParticipantInfo, Role};

/// Pure in-memory participant bookkeeping for one room.
///
/// Owned exclusively by the room's coordinator task, so no interior locking
/// is needed. Join order is preserved, which makes counterpart enumeration
/// deterministic.
pub struct RoomRegistry {
    room_id: String,
    participants: Vec<ParticipantInfo>,
}

impl RoomRegistry {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            participants: Vec::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Adds a participant. Re-join after a clean leave is allowed; a second
    /// join under a currently registered id is refused.
    pub fn join(&mut self, peer_id: &str, role: Role) -> Result<()> {
        if self.contains(peer_id) {
            return Err(HubError::DuplicateParticipant {
                room_id: self.room_id.clone(),
                peer_id: peer_id.to_string(),
            });
        }

        self.participants.push(ParticipantInfo {
            peer_id: peer_id.to_string(),
            role,
        });
        Ok(())
    }

    /// Removes a participant. Leaving while not a member is a benign no-op
    /// (late cleanup); returns whether anything was removed.
    pub fn leave(&mut self, peer_id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.peer_id != peer_id);
        self.participants.len() != before
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.participants.iter().any(|p| p.peer_id == peer_id)
    }

    pub fn role_of(&self, peer_id: &str) -> Option<Role> {
        self.participants
            .iter()
            .find(|p| p.peer_id == peer_id)
            .map(|p| p.role)
    }

    /// Participant ids in join order, optionally filtered by role.
    pub fn participants(&self, role: Option<Role>) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| role.map_or(true, |r| p.role == r))
            .map(|p| p.peer_id.clone())
            .collect()
    }

    pub fn participant_info(&self) -> Vec<ParticipantInfo> {
        self.participants.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_list_in_join_order() {
        let mut registry = RoomRegistry::new("r1");
        registry.join("e1", Role::Examiner).unwrap();
        registry.join("s1", Role::Student).unwrap();
        registry.join("s2", Role::Student).unwrap();

        assert_eq!(
            registry.participants(Some(Role::Student)),
            vec!["s1".to_string(), "s2".to_string()]
        );
        assert_eq!(
            registry.participants(None),
            vec!["e1".to_string(), "s1".to_string(), "s2".to_string()]
        );
    }

    #[test]
    fn test_duplicate_join_refused() {
        let mut registry = RoomRegistry::new("r1");
        registry.join("s1", Role::Student).unwrap();

        let err = registry.join("s1", Role::Student).unwrap_err();
        assert!(matches!(err, HubError::DuplicateParticipant { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejoin_after_clean_leave() {
        let mut registry = RoomRegistry::new("r1");
        registry.join("s1", Role::Student).unwrap();
        assert!(registry.leave("s1"));
        registry.join("s1", Role::Student).unwrap();
        assert!(registry.contains("s1"));
    }

    #[test]
    fn test_leave_non_member_is_noop() {
        let mut registry = RoomRegistry::new("r1");
        assert!(!registry.leave("ghost"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_role_lookup() {
        let mut registry = RoomRegistry::new("r1");
        registry.join("e1", Role::Examiner).unwrap();
        assert_eq!(registry.role_of("e1"), Some(Role::Examiner));
        assert_eq!(registry.role_of("nobody"), None);
    }
}
