//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases.

use super::constants::*;
use jobops_server::notifications::LogNotifier;
use jobops_server::ops::{OpsStore, SqliteOpsStore, WorkflowEngine};
use jobops_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use jobops_server::user::{
    SqliteUserStore, UserRole, UserStore, UsernamePasswordCredentials,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated databases
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// User store for direct database access in tests
    pub user_store: Arc<dyn UserStore>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

fn seed_user(
    user_store: &dyn UserStore,
    username: &str,
    password: &str,
    role: UserRole,
) -> i64 {
    let user_id = user_store
        .create_user(username, role)
        .expect("Failed to create test user");
    let credentials = UsernamePasswordCredentials::from_plain_password(user_id, password)
        .expect("Failed to hash test password");
    user_store
        .set_password_credentials(&credentials)
        .expect("Failed to store test credentials");
    user_id
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates temporary databases with one user per role
    /// 2. Binds to a random port (127.0.0.1:0)
    /// 3. Spawns the server in a background task
    /// 4. Waits for the server to be ready
    pub async fn spawn() -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp db dir");

        let user_store = Arc::new(
            SqliteUserStore::new(temp_db_dir.path().join("user.db"))
                .expect("Failed to open user store"),
        );
        let ops_store = Arc::new(
            SqliteOpsStore::new(temp_db_dir.path().join("ops.db"))
                .expect("Failed to open ops store"),
        );

        seed_user(user_store.as_ref(), ADMIN_USER, ADMIN_PASS, UserRole::Admin);
        seed_user(user_store.as_ref(), TECH_USER, TECH_PASS, UserRole::Technician);
        seed_user(user_store.as_ref(), SALES_USER, SALES_PASS, UserRole::SalesAgent);

        let workflow = Arc::new(WorkflowEngine::new(
            ops_store.clone() as Arc<dyn OpsStore>,
            user_store.clone() as Arc<dyn UserStore>,
            Arc::new(LogNotifier),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };

        let app = make_app(
            config,
            workflow,
            user_store.clone() as Arc<dyn UserStore>,
        );

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            user_store,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the root endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
