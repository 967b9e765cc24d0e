//! Client loop against the in-memory connector, on paused time.

use std::time::Duration;

use tokio::time::timeout;
use tokio_test::assert_ok;
use worldlink_client::{
    ChatKind, ClientConfig, ClientError, ClientUpdate, ConnectionStatus, Direction, WorldClient,
};
use worldlink_core::GraphError;
use worldlink_transport::{
    CodecError, ConfigError, MemoryConnector, MemoryServer, ServerConnection, TransportConfig, TransportError,
};

const PATIENCE: Duration = Duration::from_secs(300);

const WORLD: &str = concat!(
    "{\"type\":\"init\",\"clientId\":\"c1\",\"playerId\":\"P1\"}\n",
    "{\"o\":\";W;world;World;1;0;0\"}\n",
    "{\"o\":\"W;P1;player;Hero;0.5;0.1;70\"}\n",
    "{\"o\":\"P1;I1;item;Sword;0.8;0.0;5\"}",
);

async fn step(client: &mut WorldClient) -> ClientUpdate {
    timeout(PATIENCE, client.next_update())
        .await
        .expect("timed out waiting for update")
        .expect("client finished")
}

async fn until(client: &mut WorldClient, wanted: impl Fn(&ClientUpdate) -> bool) -> ClientUpdate {
    loop {
        let update = step(client).await;
        if wanted(&update) {
            return update;
        }
    }
}

/// Next `n` updates that are not render signals.
async fn records(client: &mut WorldClient, n: usize) -> Vec<ClientUpdate> {
    let mut seen = Vec::with_capacity(n);
    while seen.len() < n {
        let update = step(client).await;
        if !matches!(update, ClientUpdate::Render { .. }) {
            seen.push(update);
        }
    }
    seen
}

async fn accept(server: &mut MemoryServer) -> ServerConnection {
    timeout(PATIENCE, server.accept())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

async fn next_frame(conn: &mut ServerConnection) -> String {
    timeout(PATIENCE, conn.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("client hung up")
}

async fn connected(
    config: ClientConfig,
    secret: Option<&str>,
) -> (WorldClient, MemoryServer, ServerConnection) {
    let (connector, mut server) = MemoryConnector::new();
    let mut client = WorldClient::connect(config, connector, secret.map(str::to_string)).unwrap();
    until(&mut client, |u| {
        matches!(u, ClientUpdate::Status(ConnectionStatus::Open))
    })
    .await;
    let mut conn = accept(&mut server).await;
    next_frame(&mut conn).await;
    (client, server, conn)
}

fn ids(client: &WorldClient, of: &str) -> Vec<String> {
    client.children_of(of).to_vec()
}

#[tokio::test(start_paused = true)]
async fn test_world_burst_renders_once_and_focuses_player() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));

    let mut updates = Vec::new();
    loop {
        let update = step(&mut client).await;
        let rendered = matches!(update, ClientUpdate::Render { .. });
        updates.push(update);
        if rendered {
            break;
        }
    }

    assert!(matches!(updates[0], ClientUpdate::Session(_)));
    let changed = updates
        .iter()
        .filter(|u| matches!(u, ClientUpdate::ObjectChanged(_)))
        .count();
    assert_eq!(changed, 3);
    assert!(matches!(updates.last(), Some(ClientUpdate::Render { generation: 1 })));
    assert_eq!(*client.subscribe().borrow(), 1);

    assert_eq!(client.client_id(), Some("c1"));
    assert_eq!(client.focus().map(|f| f.id.as_str()), Some("P1"));
    assert_eq!(client.siblings(), ["P1"]);
    assert_eq!(ids(&client, "P1"), ["I1"]);
    let crumbs: Vec<_> = client
        .breadcrumb()
        .iter()
        .map(|c| c.object().id.clone())
        .collect();
    assert_eq!(crumbs, ["W", "P1"]);
}

#[tokio::test(start_paused = true)]
async fn test_only_visible_changes_render() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    until(&mut client, |u| matches!(u, ClientUpdate::Render { .. })).await;

    assert_ok!(conn.send("{\"o\":\"X;Z;item;Far;0.1;0;1\"}"));
    assert!(matches!(step(&mut client).await, ClientUpdate::ObjectChanged(id) if id == "Z"));
    assert!(timeout(Duration::from_secs(1), client.next_update()).await.is_err());

    assert_ok!(conn.send("{\"o\":\"W;P2;player;Other;0.5;0;60\"}"));
    assert!(matches!(step(&mut client).await, ClientUpdate::ObjectChanged(id) if id == "P2"));
    assert!(matches!(step(&mut client).await, ClientUpdate::Render { generation: 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_navigation_follows_live_graph() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;
    assert_ok!(conn.send("{\"o\":\"W;P2;player;Other;0.5;0;60\"}"));
    records(&mut client, 1).await;

    assert!(client.move_focus(Direction::NextSibling));
    assert_eq!(client.focus().unwrap().id, "P2");
    assert!(!client.move_focus(Direction::NextSibling));
    assert!(client.move_focus(Direction::PrevSibling));
    assert!(client.move_focus(Direction::FirstChild));
    assert_eq!(client.focus().unwrap().name, "Sword");

    // In-place update is visible through the held focus id.
    assert_ok!(conn.send("{\"o\":\"P1;I1;item;Broken Sword;0.8;0.9;5\"}"));
    records(&mut client, 1).await;
    assert_eq!(client.focus().unwrap().name, "Broken Sword");
    assert!((client.focus().unwrap().damage - 0.9).abs() < f64::EPSILON);

    assert!(client.move_focus(Direction::Parent));
    assert!(!client.set_focus("nowhere"));
    assert_eq!(client.focus().unwrap().id, "P1");
}

#[tokio::test(start_paused = true)]
async fn test_root_boundary_from_config() {
    let config = ClientConfig {
        root_id: Some("P1".to_string()),
        ..ClientConfig::default()
    };
    let (mut client, _server, conn) = connected(config, None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;

    assert_eq!(client.focus().unwrap().id, "P1");
    assert!(!client.set_focus("W"));
    assert!(client.move_focus(Direction::FirstChild));
    assert!(client.move_focus(Direction::Parent));
    assert!(!client.move_focus(Direction::Parent));
    assert_eq!(client.focus().unwrap().id, "P1");
}

#[tokio::test(start_paused = true)]
async fn test_secret_rotation_is_written_back() {
    let (mut client, mut server, mut conn) = connected(ClientConfig::default(), Some("s0")).await;
    assert_eq!(client.secret().as_deref(), Some("s0"));

    assert_ok!(conn.send(r#"{"type":"init","clientId":"c1","clientSecret":"s1"}"#));
    assert!(matches!(step(&mut client).await, ClientUpdate::SecretRotated(s) if s == "s1"));
    assert!(matches!(step(&mut client).await, ClientUpdate::Session(_)));
    assert_eq!(client.secret().as_deref(), Some("s1"));

    drop(conn);
    until(&mut client, |u| {
        matches!(u, ClientUpdate::Status(ConnectionStatus::Closed { .. }))
    })
    .await;
    conn = accept(&mut server).await;
    assert_eq!(
        next_frame(&mut conn).await,
        r#"{"type":"init","clientSecret":"s1"}"#
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_resets_and_world_comes_back() {
    let (mut client, mut server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;
    assert_eq!(client.graph().len(), 3);

    drop(conn);
    let update = until(&mut client, |u| matches!(u, ClientUpdate::Status(_))).await;
    assert!(matches!(
        update,
        ClientUpdate::Status(ConnectionStatus::Closed { retry_in }) if retry_in == Duration::from_secs(1)
    ));
    assert_eq!(client.status(), ConnectionStatus::Closed { retry_in: Duration::from_secs(1) });
    assert!(client.graph().is_empty());
    assert!(client.focus().is_none());
    let line = client.chat_log().last().unwrap();
    assert_eq!(line.kind, ChatKind::System);
    assert_eq!(line.content, "disconnected, retrying in 1s");

    let conn = accept(&mut server).await;
    until(&mut client, |u| {
        matches!(u, ClientUpdate::Status(ConnectionStatus::Open))
    })
    .await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;
    assert_eq!(client.focus().unwrap().id, "P1");
    client.graph().check_consistency().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_keeps_world_when_configured() {
    let config = ClientConfig {
        reset_on_disconnect: false,
        ..ClientConfig::default()
    };
    let (mut client, _server, conn) = connected(config, None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;

    drop(conn);
    until(&mut client, |u| {
        matches!(u, ClientUpdate::Status(ConnectionStatus::Closed { .. }))
    })
    .await;
    assert_eq!(client.graph().len(), 3);
    assert_eq!(client.focus().unwrap().id, "P1");
}

#[tokio::test(start_paused = true)]
async fn test_offline_without_reset_reports_chat() {
    let config = ClientConfig {
        reset_on_disconnect: false,
        ..ClientConfig::default()
    };
    let (mut client, _server, conn) = connected(config, None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;

    assert_ok!(conn.send(r#"{"type":"offline","message":"Server restarting"}"#));
    assert!(matches!(
        step(&mut client).await,
        ClientUpdate::Chat(line) if line.kind == ChatKind::System && line.content == "Server restarting"
    ));
    assert_eq!(client.graph().len(), 3);
    assert_eq!(client.focus().unwrap().id, "P1");
}

#[tokio::test(start_paused = true)]
async fn test_offline_control() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;

    assert_ok!(conn.send(r#"{"type":"disconnected","id":"c9"}"#));
    assert!(matches!(
        step(&mut client).await,
        ClientUpdate::Chat(line) if line.content == "Client c9 disconnected"
    ));
    assert_eq!(client.graph().len(), 3);

    assert_ok!(conn.send(r#"{"type":"offline","message":"Server restarting"}"#));
    assert!(matches!(step(&mut client).await, ClientUpdate::Reset));
    assert!(client.graph().is_empty());
    assert_eq!(client.chat_log().last().unwrap().content, "Server restarting");
}

#[tokio::test(start_paused = true)]
async fn test_remove_picks_focus_successor() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(concat!(
        "{\"type\":\"init\",\"playerId\":\"B\"}\n",
        "{\"o\":\";W;world;World;1;0;0\"}\n",
        "{\"o\":\"W;A;room;A;1;0;0\"}\n",
        "{\"o\":\"W;B;room;B;1;0;0\"}\n",
        "{\"o\":\"W;C;room;C;1;0;0\"}\n",
        "{\"o\":\"B;b1;item;b1;1;0;0\"}",
    )));
    records(&mut client, 6).await;
    assert_eq!(client.focus().unwrap().id, "B");

    assert_ok!(conn.send(r#"{"type":"remove","id":"B"}"#));
    assert!(matches!(
        step(&mut client).await,
        ClientUpdate::ObjectsRemoved(ids) if ids == ["b1", "B"]
    ));
    assert_eq!(client.focus().unwrap().id, "C");

    assert_ok!(conn.send(r#"{"type":"delete","id":"C"}"#));
    records(&mut client, 1).await;
    assert_eq!(client.focus().unwrap().id, "A");

    assert_ok!(conn.send(r#"{"type":"remove","id":"A"}"#));
    records(&mut client, 1).await;
    assert_eq!(client.focus().unwrap().id, "W");

    assert_ok!(conn.send(r#"{"type":"remove","id":"W"}"#));
    records(&mut client, 1).await;
    assert!(client.focus().is_none());
    assert!(client.graph().is_empty());
    client.graph().check_consistency().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_remove_outside_focus_keeps_focus() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;

    assert_ok!(conn.send(r#"{"type":"remove","id":"I1"}"#));
    records(&mut client, 1).await;
    assert_eq!(client.focus().unwrap().id, "P1");
    assert!(client.children_of("P1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_chat_in_and_out() {
    let (mut client, _server, mut conn) = connected(ClientConfig::default(), None).await;

    assert_ok!(client.send_chat("wts sword", Some("trade")));
    let sent = client.chat_log().last().unwrap();
    assert_eq!(sent.kind, ChatKind::Sent);
    assert_eq!(sent.channel, "trade");
    assert_eq!(
        next_frame(&mut conn).await,
        r#"{"type":"chat","content":"wts sword","channel":"trade"}"#
    );

    assert_ok!(conn.send(r#"{"type":"chat","content":"hello"}"#));
    let update = step(&mut client).await;
    let ClientUpdate::Chat(line) = update else {
        panic!("expected chat, got {update:?}");
    };
    assert_eq!(line.kind, ChatKind::Received);
    assert_eq!(line.channel, "global");
    assert_eq!(client.chat_log().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_and_faults() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;

    assert_ok!(conn.send(concat!(
        "{\"type\":\"error\",\"message\":\"bad move\"}\n",
        "garbage\n",
        "{\"o\":\"I1;P1;player;Hero;0.5;0.1;70\"}\n",
        "{\"type\":\"alive\"}",
    )));
    let updates = records(&mut client, 4).await;

    assert!(matches!(
        &updates[0],
        ClientUpdate::Chat(line) if line.kind == ChatKind::System && line.content == "Error: bad move"
    ));
    assert!(matches!(&updates[1], ClientUpdate::Fault(fault) if fault.raw == "garbage"));
    assert!(matches!(&updates[2], ClientUpdate::DeltaRejected(GraphError::Cycle { .. })));
    assert!(matches!(&updates[3], ClientUpdate::Ping));
    assert_eq!(client.get("P1").unwrap().parent_id.as_deref(), Some("W"));
    client.graph().check_consistency().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_chat_with_reserved_delimiter_is_refused() {
    let config = ClientConfig {
        transport: TransportConfig {
            delimiter: ";".to_string(),
            ..TransportConfig::default()
        },
        ..ClientConfig::default()
    };
    let (mut client, _server, _conn) = connected(config, None).await;

    let result = client.send_chat("a;b", None);
    assert!(matches!(
        result,
        Err(ClientError::Transport(TransportError::Codec(CodecError::ReservedDelimiter { .. })))
    ));
    assert!(client.chat_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_delimiter_refused_at_connect() {
    let config = ClientConfig {
        transport: TransportConfig {
            delimiter: String::new(),
            ..TransportConfig::default()
        },
        ..ClientConfig::default()
    };
    let (connector, _server) = MemoryConnector::new();
    let result = WorldClient::connect(config, connector, None);
    assert!(matches!(
        result,
        Err(ClientError::Config(ConfigError::Codec(CodecError::EmptyDelimiter)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_bad_keepalive_factor_refused_at_connect() {
    let config = ClientConfig {
        transport: TransportConfig {
            keep_alive_factor: -0.5,
            ..TransportConfig::default()
        },
        ..ClientConfig::default()
    };
    let (connector, _server) = MemoryConnector::new();
    let result = WorldClient::connect(config, connector, None);
    assert!(matches!(
        result,
        Err(ClientError::Config(ConfigError::KeepAliveFactor(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_peer_connected_keeps_own_client_id() {
    let (mut client, _server, conn) = connected(ClientConfig::default(), None).await;
    assert_ok!(conn.send(WORLD));
    records(&mut client, 4).await;
    assert_eq!(client.client_id(), Some("c1"));

    assert_ok!(conn.send(r#"{"type":"connected","clientId":"c9"}"#));
    assert!(matches!(
        step(&mut client).await,
        ClientUpdate::Chat(line) if line.content == "Client c9 connected"
    ));
    assert_eq!(client.client_id(), Some("c1"));
    assert_eq!(client.focus().unwrap().id, "P1");

    assert_ok!(conn.send(r#"{"type":"connected","clientId":"c2","clientSecret":"s2"}"#));
    records(&mut client, 2).await;
    assert_eq!(client.client_id(), Some("c2"));
}

#[tokio::test(start_paused = true)]
async fn test_close_ends_updates() {
    let (client, _server, mut conn) = connected(ClientConfig::default(), None).await;
    client.close().await;
    assert!(conn.recv().await.is_none());
}
