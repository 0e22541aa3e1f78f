use merrymaker_core::Role;

/// Maps the group list an identity provider hands back onto a `Role` (§4.8). Checks the
/// admin group first, then the user group, otherwise falls back to `guest`. Pure and
/// synchronous: the role mapper never talks to the network or the database.
#[derive(Debug, Clone)]
pub struct RoleMapper {
    admin_group: String,
    user_group: String,
}

impl RoleMapper {
    pub fn new(admin_group: impl Into<String>, user_group: impl Into<String>) -> Self {
        Self {
            admin_group: admin_group.into(),
            user_group: user_group.into(),
        }
    }

    pub fn map(&self, groups: &[String]) -> Role {
        if groups.iter().any(|g| g == &self.admin_group) {
            Role::Admin
        } else if groups.iter().any(|g| g == &self.user_group) {
            Role::User
        } else {
            Role::Guest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> RoleMapper {
        RoleMapper::new("merrymaker-admins", "merrymaker-users")
    }

    #[test]
    fn admin_group_wins_even_when_user_group_is_also_present() {
        let groups = vec!["merrymaker-users".to_string(), "merrymaker-admins".to_string()];
        assert_eq!(mapper().map(&groups), Role::Admin);
    }

    #[test]
    fn user_group_maps_to_user() {
        let groups = vec!["merrymaker-users".to_string()];
        assert_eq!(mapper().map(&groups), Role::User);
    }

    #[test]
    fn unrecognized_groups_fall_back_to_guest() {
        let groups = vec!["some-other-group".to_string()];
        assert_eq!(mapper().map(&groups), Role::Guest);
    }

    #[test]
    fn no_groups_falls_back_to_guest() {
        assert_eq!(mapper().map(&[]), Role::Guest);
    }
}
