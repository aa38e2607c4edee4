/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform roles. Stored as snake_case text in the `users.role` column
/// and carried in the `role` JWT claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Therapist,
    Admin,
    Support,
    PlatformAdmin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Client,
        Role::Therapist,
        Role::Admin,
        Role::Support,
        Role::PlatformAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Therapist => "therapist",
            Role::Admin => "admin",
            Role::Support => "support",
            Role::PlatformAdmin => "platform_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "therapist" => Ok(Role::Therapist),
            "admin" => Ok(Role::Admin),
            "support" | "support_agent" => Ok(Role::Support),
            "platform_admin" => Ok(Role::PlatformAdmin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_text_round_trips() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!("support_agent".parse::<Role>().unwrap(), Role::Support);
        assert!("root".parse::<Role>().is_err());
    }
}
