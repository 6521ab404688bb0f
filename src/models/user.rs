use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(UserStatus::Active),
            "INACTIVE" => Ok(UserStatus::Inactive),
            other => Err(format!("unknown user status: {}", other)),
        }
    }
}

/// Represents a user in the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// The unique identifier for the user.
    pub id: i64,
    /// The user's email address.
    pub email: String,
    /// The user's first name.
    pub first_name: String,
    /// The user's last name.
    pub last_name: Option<String>,
    /// Whether the account is active.
    pub status: UserStatus,
}

/// The fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub status: UserStatus,
}

/// An identity vouched for by the external verifier.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    /// The provider's stable subject id.
    pub subject: String,
}

impl ExternalIdentity {
    /// Profile for a first-time login. New accounts start inactive.
    pub fn to_new_user(&self) -> NewUser {
        NewUser {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            status: UserStatus::Inactive,
        }
    }
}

/// The user profile returned to the client after login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Serialized as a string; snowflake ids exceed JavaScript's safe integer range.
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub status: UserStatus,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.to_string(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            status: user.status,
        }
    }
}
