//! The visibility predicate, shared in meaning with the SQL fragment the
//! store uses for listing and counting. A member's view of history is
//! bounded below by their hidden_until floor and above by the moment of
//! their removal, and soft-deleted messages are invisible to everyone.

use confab_db::models::{MembershipRow, MessageRow};

pub fn message_visible(message: &MessageRow, membership: &MembershipRow) -> bool {
    if message.deleted_at.is_some() {
        return false;
    }
    if let Some(floor) = &membership.hidden_until
        && message.created_at.as_str() <= floor.as_str()
    {
        return false;
    }
    if let Some(ceiling) = &membership.deleted_at
        && message.created_at.as_str() > ceiling.as_str()
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(created_at: &str, deleted_at: Option<&str>) -> MessageRow {
        MessageRow {
            id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "u1".into(),
            kind: "text".into(),
            content: "hi".into(),
            reply_to_id: None,
            is_forwarded: false,
            edited_at: None,
            deleted_at: deleted_at.map(Into::into),
            created_at: created_at.into(),
        }
    }

    fn membership(hidden_until: Option<&str>, deleted_at: Option<&str>) -> MembershipRow {
        MembershipRow {
            id: "mem1".into(),
            conversation_id: "c1".into(),
            user_id: "u2".into(),
            role: "member".into(),
            joined_at: "2026-01-01T00:00:00.000000Z".into(),
            last_read_message_id: None,
            muted_until: None,
            deleted_at: deleted_at.map(Into::into),
            hidden_until: hidden_until.map(Into::into),
            pinned: false,
            pinned_at: None,
            username: "bob".into(),
        }
    }

    const T1: &str = "2026-02-01T00:00:00.000000Z";
    const T2: &str = "2026-02-02T00:00:00.000000Z";
    const T3: &str = "2026-02-03T00:00:00.000000Z";

    #[test]
    fn plain_message_visible() {
        assert!(message_visible(&message(T2, None), &membership(None, None)));
    }

    #[test]
    fn deleted_message_invisible_to_all() {
        assert!(!message_visible(
            &message(T2, Some(T3)),
            &membership(None, None)
        ));
    }

    #[test]
    fn floor_hides_at_or_before() {
        let m = membership(Some(T2), None);
        assert!(!message_visible(&message(T1, None), &m));
        assert!(!message_visible(&message(T2, None), &m));
        assert!(message_visible(&message(T3, None), &m));
    }

    #[test]
    fn removal_bounds_above() {
        // removed at T2: can still see up to the removal moment, nothing after
        let m = membership(None, Some(T2));
        assert!(message_visible(&message(T1, None), &m));
        assert!(message_visible(&message(T2, None), &m));
        assert!(!message_visible(&message(T3, None), &m));
    }

    #[test]
    fn hide_sets_both_bounds() {
        // hide() sets floor == ceiling, leaving nothing visible
        let m = membership(Some(T2), Some(T2));
        assert!(!message_visible(&message(T1, None), &m));
        assert!(!message_visible(&message(T2, None), &m));
        assert!(!message_visible(&message(T3, None), &m));
    }
}
