use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Technician,
    SalesAgent,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Technician => "technician",
            UserRole::SalesAgent => "sales_agent",
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "technician" => Ok(UserRole::Technician),
            "sales_agent" => Ok(UserRole::SalesAgent),
            _ => bail!("Unknown user role {}", s),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_string_roundtrip() {
        for role in [UserRole::Admin, UserRole::Technician, UserRole::SalesAgent] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("plumber".parse::<UserRole>().is_err());
    }

    #[test]
    fn role_serde_uses_snake_case() {
        let json = serde_json::to_string(&UserRole::SalesAgent).unwrap();
        assert_eq!(json, "\"sales_agent\"");
        let parsed: UserRole = serde_json::from_str("\"technician\"").unwrap();
        assert_eq!(parsed, UserRole::Technician);
    }
}
