//! Integration tests for the MySQL table server
//!
//! Exercises boot, listing and export against a real database. Tests are skipped unless
//! TEST_MYSQL_HOST, TEST_MYSQL_USER and TEST_MYSQL_DB are set (TEST_MYSQL_PORT and
//! TEST_MYSQL_PASS are optional).

use mysql_table_server::config::DatabaseConfig;
use mysql_table_server::pool::ConnectionPool;
use mysql_table_server::server::{TableServer, CSV_CONTENT_TYPE};
use mysql_table_server::ServerError;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::env;
use warp::http::StatusCode;

/// Database settings taken from the environment
fn database_config(label: &str) -> Option<DatabaseConfig> {
    let host = env::var("TEST_MYSQL_HOST").ok()?;
    let user = env::var("TEST_MYSQL_USER").ok()?;
    let name = env::var("TEST_MYSQL_DB").ok()?;
    let port = env::var("TEST_MYSQL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3306);
    let pass = env::var("TEST_MYSQL_PASS").unwrap_or_default();

    Some(DatabaseConfig {
        label: label.to_string(),
        name,
        host,
        port,
        user,
        pass,
        max_connections: 2,
        connection_timeout: 10,
    })
}

/// Separate pool used to seed fixtures behind the server's back
async fn admin_pool(config: &DatabaseConfig) -> MySqlPool {
    MySqlPoolOptions::new()
        .max_connections(1)
        .connect_with(config.connect_options())
        .await
        .expect("Failed to connect to the test database")
}

async fn execute_all(pool: &MySqlPool, statements: &[&str]) {
    for sql in statements {
        sqlx::query(sql).execute(pool).await.unwrap_or_else(|e| panic!("{}: {}", sql, e));
    }
}

#[tokio::test]
async fn test_export_users_table() {
    let Some(config) = database_config("main") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let admin = admin_pool(&config).await;
    execute_all(&admin, &[
        "DROP TABLE IF EXISTS it_users",
        "CREATE TABLE it_users (id INT PRIMARY KEY, name VARCHAR(50))",
        "INSERT INTO it_users VALUES (1, 'Alice'), (2, 'Bob')",
    ]).await;

    let pool = ConnectionPool::build(&[config]).await.expect("boot should succeed");
    let server = TableServer::new(pool);
    let routes = server.routes();

    let response = warp::test::request().path("/main/it_users/").reply(&routes).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], CSV_CONTENT_TYPE);
    assert_eq!(response.body().as_ref(), b"id,name\n1,Alice\n2,Bob\n");

    let response = warp::test::request().path("/main/").reply(&routes).await;
    let tables: Vec<String> = serde_json::from_slice(response.body()).unwrap();
    assert!(tables.contains(&"it_users".to_string()));

    let response = warp::test::request().path("/").reply(&routes).await;
    let labels: Vec<String> = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(labels, vec!["main"]);

    server.shutdown().await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_users"]).await;
    admin.close().await;
}

#[tokio::test]
async fn test_empty_table_exports_header_only() {
    let Some(config) = database_config("main") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let admin = admin_pool(&config).await;
    execute_all(&admin, &[
        "DROP TABLE IF EXISTS it_empty",
        "CREATE TABLE it_empty (id INT PRIMARY KEY, note TEXT)",
    ]).await;

    let server = TableServer::new(ConnectionPool::build(&[config]).await.unwrap());
    let response = warp::test::request().path("/main/it_empty/").reply(&server.routes()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"id,note\n");

    server.shutdown().await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_empty"]).await;
    admin.close().await;
}

#[tokio::test]
async fn test_value_rendering() {
    let Some(config) = database_config("main") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let admin = admin_pool(&config).await;
    execute_all(&admin, &[
        "DROP TABLE IF EXISTS it_values",
        "CREATE TABLE it_values (
            id INT PRIMARY KEY,
            label VARCHAR(20),
            amount DECIMAL(8,2),
            flag TINYINT(1),
            payload VARBINARY(8),
            born DATE
        )",
        "INSERT INTO it_values VALUES
            (1, 'a,b', 12.50, 1, 'hi', '2024-01-31'),
            (2, NULL, NULL, NULL, NULL, NULL)",
    ]).await;

    let server = TableServer::new(ConnectionPool::build(&[config]).await.unwrap());
    let response = warp::test::request().path("/main/it_values/").reply(&server.routes()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        String::from_utf8_lossy(response.body()),
        "id,label,amount,flag,payload,born\n1,\"a,b\",12.50,1,aGk=,2024-01-31\n2,,,,,\n"
    );

    server.shutdown().await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_values"]).await;
    admin.close().await;
}

#[tokio::test]
async fn test_time_values_outside_a_day() {
    let Some(config) = database_config("main") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let admin = admin_pool(&config).await;
    execute_all(&admin, &[
        "DROP TABLE IF EXISTS it_times",
        "CREATE TABLE it_times (id INT PRIMARY KEY, span TIME, fine TIME(6))",
        "INSERT INTO it_times VALUES
            (1, '-01:30:00', '12:00:00.250000'),
            (2, '100:00:00', '00:00:00'),
            (3, NULL, NULL)",
    ]).await;

    let server = TableServer::new(ConnectionPool::build(&[config]).await.unwrap());
    let response = warp::test::request().path("/main/it_times/").reply(&server.routes()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        String::from_utf8_lossy(response.body()),
        "id,span,fine\n1,-01:30:00,12:00:00.250000\n2,100:00:00,00:00:00\n3,,\n"
    );

    server.shutdown().await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_times"]).await;
    admin.close().await;
}

#[tokio::test]
async fn test_row_count_matches_table() {
    let Some(config) = database_config("main") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let admin = admin_pool(&config).await;
    execute_all(&admin, &[
        "DROP TABLE IF EXISTS it_many",
        "CREATE TABLE it_many (id INT PRIMARY KEY)",
    ]).await;
    // spans several body chunks
    for start in (0..250).step_by(50) {
        let values: Vec<String> = (start..start + 50).map(|i| format!("({})", i)).collect();
        let sql = format!("INSERT INTO it_many VALUES {}", values.join(","));
        execute_all(&admin, &[sql.as_str()]).await;
    }

    let server = TableServer::new(ConnectionPool::build(&[config]).await.unwrap());
    let response = warp::test::request().path("/main/it_many/").reply(&server.routes()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM it_many")
        .fetch_one(&admin)
        .await
        .unwrap();
    let lines = String::from_utf8_lossy(response.body()).lines().count() as i64;
    assert_eq!(lines, count + 1);

    server.shutdown().await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_many"]).await;
    admin.close().await;
}

#[tokio::test]
async fn test_tables_created_after_boot_are_not_served() {
    let Some(config) = database_config("main") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let admin = admin_pool(&config).await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_late"]).await;

    let server = TableServer::new(ConnectionPool::build(&[config]).await.unwrap());
    execute_all(&admin, &["CREATE TABLE it_late (id INT PRIMARY KEY)"]).await;

    let routes = server.routes();
    let response = warp::test::request().path("/main/it_late/").reply(&routes).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.body().is_empty());

    let response = warp::test::request().path("/main/").reply(&routes).await;
    let tables: Vec<String> = serde_json::from_slice(response.body()).unwrap();
    assert!(!tables.contains(&"it_late".to_string()));

    server.shutdown().await;
    execute_all(&admin, &["DROP TABLE IF EXISTS it_late"]).await;
    admin.close().await;
}

#[tokio::test]
async fn test_boot_fails_when_any_database_is_unreachable() {
    let Some(good) = database_config("good") else {
        println!("Skipping integration test - TEST_MYSQL_* not set");
        return;
    };
    let mut bad = good.clone();
    bad.label = "bad".to_string();
    bad.host = "127.0.0.1".to_string();
    bad.port = 1;
    bad.connection_timeout = 2;

    match ConnectionPool::build(&[good, bad]).await {
        Err(ServerError::Startup { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "bad");
        }
        Err(other) => panic!("Expected startup error, got {}", other.detailed_message()),
        Ok(_) => panic!("Boot must fail when a database is unreachable"),
    }
}
