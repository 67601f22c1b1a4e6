use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotd::auth::Credentials;
use slotd::engine::Engine;
use slotd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(credentials: Credentials) -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("reservations.wal")).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            let credentials = credentials.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, credentials, None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect_as(addr: SocketAddr, user: &str, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotd")
        .user(user)
        .password(password);
    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn start() -> (Client, Arc<Engine>) {
    let (addr, engine) = start_test_server(Credentials::new(None, "slotd".into())).await;
    (connect_as(addr, "slotd", "slotd").await.unwrap(), engine)
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

fn insert(start: &str, end: &str) -> String {
    format!(
        "INSERT INTO reservations (space_id, space_name, date, start_time, end_time) \
         VALUES ('S1', 'Room 101', '2024-03-01', '{start}', '{end}') RETURNING *"
    )
}

fn availability(start: &str, end: &str) -> String {
    format!(
        "SELECT * FROM availability WHERE space_id = 'S1' AND \"date\" = '2024-03-01' \
         AND start_time = '{start}' AND end_time = '{end}'"
    )
}

// ── Booking scenarios over the wire ──────────────────────────

#[tokio::test]
async fn booking_scenarios_end_to_end() {
    let (client, _engine) = start().await;

    let created = rows(&client, &insert("09:00", "10:00")).await;
    assert_eq!(created.len(), 1);
    let first_id = created[0].get("id").unwrap().to_string();
    assert_eq!(created[0].get("start_time"), Some("09:00"));
    assert_eq!(created[0].get("end_time"), Some("10:00"));
    assert_eq!(created[0].get("space_name"), Some("Room 101"));

    assert_eq!(sqlstate(&client, &insert("09:30", "10:30")).await, "23P01");

    let adjacent = rows(&client, &insert("10:00", "11:00")).await;
    assert_eq!(adjacent.len(), 1);

    let busy = rows(&client, &availability("09:15", "09:45")).await;
    assert_eq!(busy[0].get("available"), Some("f"));

    assert_eq!(sqlstate(&client, &insert("11:00", "10:00")).await, "22023");

    client
        .simple_query(&format!("DELETE FROM reservations WHERE id = '{first_id}'"))
        .await
        .unwrap();
    assert_eq!(rows(&client, &insert("09:30", "10:00")).await.len(), 1);
}

#[tokio::test]
async fn insert_without_returning_reports_tag() {
    let (client, engine) = start().await;
    let msgs = client
        .simple_query(
            "INSERT INTO reservations (space_id, space_name, date, start_time, end_time) \
             VALUES ('S1', 'Room 101', '2024-03-01', '09:00', '10:00')",
        )
        .await
        .unwrap();
    assert!(msgs.iter().any(|m| matches!(m, SimpleQueryMessage::CommandComplete(1))));
    assert_eq!(engine.reservation_count(), 1);
}

#[tokio::test]
async fn error_classes_have_distinct_sqlstates() {
    let (client, _engine) = start().await;

    let missing = "INSERT INTO reservations (space_id, date) VALUES ('S1', '2024-03-01')";
    assert_eq!(sqlstate(&client, missing).await, "22023");

    let unknown = format!("DELETE FROM reservations WHERE id = '{}'", Ulid::new());
    assert_eq!(sqlstate(&client, &unknown).await, "P0002");
    let unknown = format!("SELECT * FROM reservations WHERE id = '{}'", Ulid::new());
    assert_eq!(sqlstate(&client, &unknown).await, "P0002");

    assert_eq!(sqlstate(&client, "SELEKT nonsense").await, "42601");
    assert_eq!(sqlstate(&client, "SELECT * FROM spaces").await, "42601");
    assert_eq!(
        sqlstate(&client, "DELETE FROM reservations WHERE id = 'not-a-ulid'").await,
        "22023"
    );

    let oversized = format!("SELECT * FROM reservations WHERE space_id = '{}'", "x".repeat(20_000));
    assert_eq!(sqlstate(&client, &oversized).await, "54000");
}

#[tokio::test]
async fn anonymous_rows_hide_identity() {
    let (client, _engine) = start().await;
    client
        .simple_query(
            "INSERT INTO reservations (space_id, space_name, date, start_time, end_time, is_anonymous, user_id, user_name) \
             VALUES ('S1', 'Room 101', '2024-03-01', '09:00', '10:00', true, 'u1', 'ada')",
        )
        .await
        .unwrap();
    client
        .simple_query(
            "INSERT INTO reservations (space_id, space_name, date, start_time, end_time, user_id, user_name) \
             VALUES ('S1', 'Room 101', '2024-03-01', '10:00', '11:00', 'u1', 'ada')",
        )
        .await
        .unwrap();

    let all = rows(&client, "SELECT * FROM reservations WHERE space_id = 'S1'").await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].get("is_anonymous"), Some("t"));
    assert_eq!(all[0].get("user_name"), None);
    assert_eq!(all[1].get("user_name"), Some("ada"));

    let mine = rows(&client, "SELECT * FROM reservations WHERE user_name = 'ada'").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("start_time"), Some("10:00"));
}

#[tokio::test]
async fn free_slots_and_date_lookup() {
    let (client, _engine) = start().await;
    rows(&client, &insert("09:00", "10:00")).await;
    rows(
        &client,
        "INSERT INTO reservations (space_id, space_name, date, start_time, end_time) \
         VALUES ('S2', 'Room 102', '2024-03-01', '08:00', '09:00') RETURNING *",
    )
    .await;

    let free = rows(
        &client,
        "SELECT * FROM free_slots WHERE space_id = 'S1' AND \"date\" = '2024-03-01'",
    )
    .await;
    let windows: Vec<(&str, &str)> = free
        .iter()
        .map(|r| (r.get("start_time").unwrap(), r.get("end_time").unwrap()))
        .collect();
    assert_eq!(windows, [("00:00", "09:00"), ("10:00", "23:59")]);

    let on_day = rows(&client, "SELECT * FROM reservations WHERE \"date\" = '2024-03-01'").await;
    let spaces: Vec<&str> = on_day.iter().map(|r| r.get("space_id").unwrap()).collect();
    assert_eq!(spaces, ["S2", "S1"]);
}

// ── Extended query protocol ──────────────────────────────────

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (client, _engine) = start().await;

    let affected = client
        .execute(
            "INSERT INTO reservations (space_id, space_name, date, start_time, end_time, user_id, user_name) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[&"S1", &"O'Brien Hall", &"2024-03-01", &"09:00", &"10:00", &"u1", &"ada"],
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let found = client
        .query("SELECT * FROM reservations WHERE space_id = $1", &[&"S1"])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, String>("space_name"), "O'Brien Hall");
    assert!(!found[0].get::<_, bool>("is_anonymous"));
    assert_eq!(found[0].get::<_, Option<String>>("user_id").as_deref(), Some("u1"));

    let avail = client
        .query(
            "SELECT * FROM availability WHERE space_id = $1 AND \"date\" = $2 AND start_time = $3 AND end_time = $4",
            &[&"S1", &"2024-03-01", &"10:00", &"11:00"],
        )
        .await
        .unwrap();
    assert!(avail[0].get::<_, bool>("available"));
}

#[tokio::test]
async fn bound_value_containing_placeholder_is_stored_verbatim() {
    let (client, _engine) = start().await;

    client
        .execute(
            "INSERT INTO reservations (space_id, space_name, date, start_time, end_time) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&"S1", &"Room $1 $3", &"2024-03-01", &"09:00", &"10:00"],
        )
        .await
        .unwrap();

    let found = client
        .query("SELECT * FROM reservations WHERE space_id = $1", &[&"S1"])
        .await
        .unwrap();
    assert_eq!(found[0].get::<_, String>("space_name"), "Room $1 $3");
}

// ── Auth ─────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_password_rejected() {
    let (addr, _engine) = start_test_server(Credentials::new(None, "slotd".into())).await;
    assert!(connect_as(addr, "slotd", "wrong").await.is_err());
}

#[tokio::test]
async fn restricted_user_enforced() {
    let (addr, _engine) =
        start_test_server(Credentials::new(Some("frontdesk".into()), "pw".into())).await;
    assert!(connect_as(addr, "guest", "pw").await.is_err());
    let client = connect_as(addr, "frontdesk", "pw").await.unwrap();
    assert!(rows(&client, "SELECT * FROM reservations").await.is_empty());
}
