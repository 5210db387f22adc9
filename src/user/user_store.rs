use super::auth::{AuthToken, AuthTokenValue, UsernamePasswordCredentials};
use super::user_models::{User, UserRole};
use anyhow::Result;

pub trait UserStore: Send + Sync {
    fn create_user(&self, username: &str, role: UserRole) -> Result<i64>;
    fn get_user(&self, user_id: i64) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn get_all_users(&self) -> Result<Vec<User>>;
    fn get_active_users_with_role(&self, role: UserRole) -> Result<Vec<User>>;
    fn set_user_role(&self, user_id: i64, role: UserRole) -> Result<()>;
    fn deactivate_user(&self, user_id: i64) -> Result<()>;

    fn get_password_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UsernamePasswordCredentials>>;
    fn set_password_credentials(&self, credentials: &UsernamePasswordCredentials) -> Result<()>;

    fn add_auth_token(&self, token: &AuthToken) -> Result<()>;
    fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>>;
    fn delete_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>>;
    fn touch_auth_token(&self, value: &AuthTokenValue) -> Result<()>;
}
