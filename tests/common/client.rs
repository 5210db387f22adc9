//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for the jobops-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client with cookie-based session management
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    /// Creates a new unauthenticated client
    ///
    /// Use this for testing authentication flows.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true) // Automatically handle session cookies
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn login_as(base_url: String, username: &str, password: &str) -> Self {
        let client = Self::new(base_url);

        let response = client.login(username, password).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Authentication as {} failed: {:?}",
            username,
            response.text().await
        );

        client
    }

    /// Creates a client pre-authenticated as the admin user
    pub async fn authenticated_admin(base_url: String) -> Self {
        Self::login_as(base_url, ADMIN_USER, ADMIN_PASS).await
    }

    /// Creates a client pre-authenticated as the technician user
    pub async fn authenticated_tech(base_url: String) -> Self {
        Self::login_as(base_url, TECH_USER, TECH_PASS).await
    }

    /// Creates a client pre-authenticated as the sales agent user
    pub async fn authenticated_sales(base_url: String) -> Self {
        Self::login_as(base_url, SALES_USER, SALES_PASS).await
    }

    // ========================================================================
    // Authentication Endpoints
    // ========================================================================

    /// POST /v1/auth/login
    pub async fn login(&self, username: &str, password: &str) -> Response {
        self.client
            .post(format!("{}/v1/auth/login", self.base_url))
            .json(&json!({
                "username": username,
                "password": password
            }))
            .send()
            .await
            .expect("Login request failed")
    }

    /// GET /v1/auth/logout
    pub async fn logout(&self) -> Response {
        self.client
            .get(format!("{}/v1/auth/logout", self.base_url))
            .send()
            .await
            .expect("Logout request failed")
    }

    // ========================================================================
    // User Endpoints
    // ========================================================================

    /// GET /v1/users
    pub async fn list_users(&self) -> Response {
        self.client
            .get(format!("{}/v1/users", self.base_url))
            .send()
            .await
            .expect("List users request failed")
    }

    /// GET /v1/users/me
    pub async fn me(&self) -> Response {
        self.client
            .get(format!("{}/v1/users/me", self.base_url))
            .send()
            .await
            .expect("Me request failed")
    }

    /// POST /v1/users
    pub async fn create_user(&self, username: &str, password: &str, role: &str) -> Response {
        self.client
            .post(format!("{}/v1/users", self.base_url))
            .json(&json!({
                "username": username,
                "password": password,
                "role": role
            }))
            .send()
            .await
            .expect("Create user request failed")
    }

    /// PUT /v1/users/{id}/role
    pub async fn set_user_role(&self, user_id: i64, role: &str) -> Response {
        self.client
            .put(format!("{}/v1/users/{}/role", self.base_url, user_id))
            .json(&json!({ "role": role }))
            .send()
            .await
            .expect("Set user role request failed")
    }

    /// DELETE /v1/users/{id}
    pub async fn deactivate_user(&self, user_id: i64) -> Response {
        self.client
            .delete(format!("{}/v1/users/{}", self.base_url, user_id))
            .send()
            .await
            .expect("Deactivate user request failed")
    }

    // ========================================================================
    // Equipment Endpoints
    // ========================================================================

    /// GET /v1/equipment
    pub async fn list_equipment(&self) -> Response {
        self.client
            .get(format!("{}/v1/equipment", self.base_url))
            .send()
            .await
            .expect("List equipment request failed")
    }

    /// POST /v1/equipment
    pub async fn create_equipment(&self, body: serde_json::Value) -> Response {
        self.client
            .post(format!("{}/v1/equipment", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Create equipment request failed")
    }

    /// GET /v1/equipment/{id}/usage
    pub async fn equipment_usage(&self, id: i64) -> Response {
        self.client
            .get(format!("{}/v1/equipment/{}/usage", self.base_url, id))
            .send()
            .await
            .expect("Equipment usage request failed")
    }

    /// PUT /v1/equipment/{id}
    pub async fn update_equipment(&self, id: i64, body: serde_json::Value) -> Response {
        self.client
            .put(format!("{}/v1/equipment/{}", self.base_url, id))
            .json(&body)
            .send()
            .await
            .expect("Update equipment request failed")
    }

    /// DELETE /v1/equipment/{id}
    pub async fn delete_equipment(&self, id: i64) -> Response {
        self.client
            .delete(format!("{}/v1/equipment/{}", self.base_url, id))
            .send()
            .await
            .expect("Delete equipment request failed")
    }

    // ========================================================================
    // Job Endpoints
    // ========================================================================

    /// GET /v1/jobs
    pub async fn list_jobs(&self) -> Response {
        self.client
            .get(format!("{}/v1/jobs", self.base_url))
            .send()
            .await
            .expect("List jobs request failed")
    }

    /// GET /v1/jobs with query string, e.g. "status=scheduled"
    pub async fn list_jobs_filtered(&self, query: &str) -> Response {
        self.client
            .get(format!("{}/v1/jobs?{}", self.base_url, query))
            .send()
            .await
            .expect("List jobs filtered request failed")
    }

    /// POST /v1/jobs
    pub async fn create_job(&self, body: serde_json::Value) -> Response {
        self.client
            .post(format!("{}/v1/jobs", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Create job request failed")
    }

    /// GET /v1/jobs/{id}
    pub async fn get_job(&self, id: i64) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}", self.base_url, id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// PUT /v1/jobs/{id}
    pub async fn update_job(&self, id: i64, body: serde_json::Value) -> Response {
        self.client
            .put(format!("{}/v1/jobs/{}", self.base_url, id))
            .json(&body)
            .send()
            .await
            .expect("Update job request failed")
    }

    /// POST /v1/jobs/{id}/complete
    pub async fn complete_job(&self, id: i64) -> Response {
        self.client
            .post(format!("{}/v1/jobs/{}/complete", self.base_url, id))
            .send()
            .await
            .expect("Complete job request failed")
    }

    /// POST /v1/jobs/{id}/cancel
    pub async fn cancel_job(&self, id: i64) -> Response {
        self.client
            .post(format!("{}/v1/jobs/{}/cancel", self.base_url, id))
            .send()
            .await
            .expect("Cancel job request failed")
    }

    /// GET /v1/jobs/{id}/change-logs
    pub async fn get_change_logs(&self, id: i64) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}/change-logs", self.base_url, id))
            .send()
            .await
            .expect("Get change logs request failed")
    }

    /// GET /v1/jobs/{id}/tasks
    pub async fn get_tasks(&self, id: i64) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}/tasks", self.base_url, id))
            .send()
            .await
            .expect("Get tasks request failed")
    }

    /// POST /v1/jobs/{id}/tasks
    pub async fn add_task(&self, id: i64, body: serde_json::Value) -> Response {
        self.client
            .post(format!("{}/v1/jobs/{}/tasks", self.base_url, id))
            .json(&body)
            .send()
            .await
            .expect("Add task request failed")
    }

    /// PUT /v1/tasks/{id}/status
    pub async fn set_task_status(&self, task_id: i64, status: &str) -> Response {
        self.client
            .put(format!("{}/v1/tasks/{}/status", self.base_url, task_id))
            .json(&json!({ "status": status }))
            .send()
            .await
            .expect("Set task status request failed")
    }

    // ========================================================================
    // Reporting Endpoints
    // ========================================================================

    /// GET /v1/dashboard
    pub async fn dashboard(&self, days: Option<i64>) -> Response {
        let mut url = format!("{}/v1/dashboard", self.base_url);
        if let Some(days) = days {
            url = format!("{}?days={}", url, days);
        }
        self.client
            .get(&url)
            .send()
            .await
            .expect("Dashboard request failed")
    }

    /// GET /v1/analytics
    pub async fn analytics(&self) -> Response {
        self.client
            .get(format!("{}/v1/analytics", self.base_url))
            .send()
            .await
            .expect("Analytics request failed")
    }
}
