//! Pure policy decisions. Policies arrive as raw strings from the store;
//! unrecognized values fall back to a per-operation default, so the two
//! functions deliberately do not share a helper: sending fails open to
//! all-members, adding falls back to admins-only.

use confab_types::models::Role;

/// May `role` post a message under `policy`? Disbanded conversations
/// never accept messages regardless of policy.
pub fn can_send(policy: &str, role: Role, disbanded: bool) -> bool {
    if disbanded {
        return false;
    }
    match policy {
        "admins_only" => matches!(role, Role::Admin | Role::Owner),
        "owner_only" => role == Role::Owner,
        // "all_members" and anything unrecognized
        _ => true,
    }
}

/// May `role` add members under `policy`?
pub fn can_add_member(policy: &str, role: Role) -> bool {
    match policy {
        "all_members" => true,
        "owner_only" => role == Role::Owner,
        // "admins_only" and anything unrecognized
        _ => matches!(role, Role::Admin | Role::Owner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_policy_matrix() {
        for role in [Role::Member, Role::Admin, Role::Owner] {
            assert!(can_send("all_members", role, false));
            assert!(!can_send("all_members", role, true));
        }
        assert!(!can_send("admins_only", Role::Member, false));
        assert!(can_send("admins_only", Role::Admin, false));
        assert!(can_send("admins_only", Role::Owner, false));
        assert!(!can_send("owner_only", Role::Admin, false));
        assert!(can_send("owner_only", Role::Owner, false));
    }

    #[test]
    fn add_member_policy_matrix() {
        assert!(can_add_member("all_members", Role::Member));
        assert!(!can_add_member("admins_only", Role::Member));
        assert!(can_add_member("admins_only", Role::Admin));
        assert!(!can_add_member("owner_only", Role::Admin));
        assert!(can_add_member("owner_only", Role::Owner));
    }

    #[test]
    fn unrecognized_policy_defaults_diverge() {
        // send fails open, add falls back to admins-only
        assert!(can_send("mystery_policy", Role::Member, false));
        assert!(!can_add_member("mystery_policy", Role::Member));
        assert!(can_add_member("mystery_policy", Role::Admin));
    }
}
