//! End-to-end tests against an in-process WebSocket broker that records every
//! frame the client sends and injects frames on demand.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rosbridge_client::{
    BridgeConfig, BridgeConnection, BridgeError, ConnectionState, DisconnectOutcome, Topic,
};
use rosbridge_types::geometry_msgs::Twist;
use rosbridge_types::nav_msgs::Odometry;
use rosbridge_types::std_msgs::StringMsg;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

enum BrokerCommand {
    Send(String),
    Close,
}

struct MockBroker {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    commands: mpsc::UnboundedSender<BrokerCommand>,
}

impl MockBroker {
    /// Accept exactly one client on an ephemeral loopback port.
    fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (commands, mut command_rx) = mpsc::unbounded_channel();

        let log = Arc::clone(&received);
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let (tcp, _) = listener.accept().await.unwrap();
                let ws = accept_async(tcp).await.unwrap();
                let (mut sink, mut stream) = ws.split();
                loop {
                    tokio::select! {
                        Some(command) = command_rx.recv() => match command {
                            BrokerCommand::Send(text) => {
                                if sink.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            BrokerCommand::Close => {
                                let _ = sink.close().await;
                                break;
                            }
                        },
                        inbound = stream.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                log.lock().unwrap().push(text.as_str().to_string());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        },
                    }
                }
            });
        });

        Self {
            port,
            received,
            commands,
        }
    }

    fn config(&self) -> BridgeConfig {
        BridgeConfig::new("127.0.0.1", self.port)
            .with_connect_timeout(WAIT)
            .with_shutdown_timeout(WAIT)
    }

    fn send(&self, frame: Value) {
        self.commands
            .send(BrokerCommand::Send(frame.to_string()))
            .unwrap();
    }

    fn close(&self) {
        self.commands.send(BrokerCommand::Close).unwrap();
    }

    fn frames(&self) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    fn wait_for_frames(&self, count: usize) -> Vec<Value> {
        assert!(
            wait_for(|| self.received.lock().unwrap().len() >= count),
            "broker saw {:?}, wanted {count} frames",
            self.frames()
        );
        self.frames()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn robot_bridge(broker: &MockBroker) -> (BridgeConnection, std_mpsc::Receiver<String>) {
    let (tx, rx) = std_mpsc::channel();
    let mut bridge = BridgeConnection::new(broker.config());
    bridge
        .add_subscriber(&Topic::<Odometry>::new("/robot_gps_pose"), |_| {})
        .unwrap();
    bridge
        .add_subscriber(&Topic::<StringMsg>::new("/ultrasonic_data"), move |msg: StringMsg| {
            tx.send(msg.data).unwrap();
        })
        .unwrap();
    bridge.add_publisher(&Topic::<Twist>::new("/cmd_vel")).unwrap();
    (bridge, rx)
}

fn connected_bridge(broker: &MockBroker) -> (BridgeConnection, std_mpsc::Receiver<String>) {
    let (mut bridge, rx) = robot_bridge(broker);
    bridge.connect().unwrap();
    assert!(bridge.wait_until_connected(WAIT));
    broker.wait_for_frames(3);
    (bridge, rx)
}

#[test]
fn handshake_subscribes_then_advertises_and_teardown_mirrors_it() {
    let broker = MockBroker::start();
    let (mut bridge, _rx) = connected_bridge(&broker);
    assert_eq!(bridge.state(), ConnectionState::Connected);

    assert_eq!(
        broker.frames(),
        vec![
            json!({"op": "subscribe", "topic": "/robot_gps_pose", "type": "nav_msgs/Odometry"}),
            json!({"op": "subscribe", "topic": "/ultrasonic_data", "type": "std_msgs/String"}),
            json!({"op": "advertise", "topic": "/cmd_vel", "type": "geometry_msgs/Twist"}),
        ]
    );

    assert_eq!(bridge.disconnect(), DisconnectOutcome::Clean);
    assert_eq!(bridge.state(), ConnectionState::Disconnected);

    let frames = broker.wait_for_frames(6);
    assert_eq!(
        frames[3..],
        [
            json!({"op": "unsubscribe", "topic": "/robot_gps_pose"}),
            json!({"op": "unsubscribe", "topic": "/ultrasonic_data"}),
            json!({"op": "unadvertise", "topic": "/cmd_vel"}),
        ]
    );

    // A second disconnect has nothing to do.
    assert_eq!(bridge.disconnect(), DisconnectOutcome::Idle);
}

#[test]
fn publish_after_disconnect_writes_nothing() {
    let broker = MockBroker::start();
    let (mut bridge, _rx) = connected_bridge(&broker);
    let cmd_vel = Topic::<Twist>::new("/cmd_vel");

    assert_eq!(bridge.disconnect(), DisconnectOutcome::Clean);
    broker.wait_for_frames(6);

    assert_eq!(
        bridge.publish_to(&cmd_vel, &Twist::drive(1.0, 0.0)),
        Err(BridgeError::NotConnected)
    );
    assert_eq!(
        bridge.call_service("/arlobot/reset_motorBoard", json!({})),
        Err(BridgeError::NotConnected)
    );
    thread::sleep(Duration::from_millis(100));
    let frames = broker.frames();
    assert_eq!(frames.len(), 6, "unexpected frames after teardown: {frames:?}");
    assert!(frames.iter().all(|frame| frame["op"] != "publish"));
}

#[test]
fn inbound_publish_runs_callback_on_drain() {
    let broker = MockBroker::start();
    let (bridge, rx) = connected_bridge(&broker);

    broker.send(json!({"op": "publish", "topic": "/ultrasonic_data", "msg": {"data": "hello"}}));
    assert!(wait_for(|| bridge.pending_len() == 1));
    assert!(rx.try_recv().is_err(), "callback must wait for drain_one");

    assert!(bridge.drain_one());
    assert_eq!(rx.try_recv().unwrap(), "hello");
    assert!(!bridge.drain_one());
}

#[test]
fn burst_on_one_topic_delivers_only_latest() {
    let broker = MockBroker::start();
    let (bridge, rx) = connected_bridge(&broker);

    for n in 0..5 {
        let data = n.to_string();
        broker.send(json!({"op": "publish", "topic": "/ultrasonic_data", "msg": {"data": data}}));
    }
    broker.send(json!({"op": "publish", "topic": "/robot_gps_pose", "msg": {}}));
    assert!(wait_for(|| bridge.pending_len() == 2));

    assert!(bridge.drain_one());
    assert_eq!(rx.try_recv().unwrap(), "4");
    assert!(bridge.drain_one());
    assert!(!bridge.drain_one());
    assert!(rx.try_recv().is_err());
}

#[test]
fn unknown_topic_and_garbage_are_dropped() {
    let broker = MockBroker::start();
    let (bridge, rx) = connected_bridge(&broker);

    broker.send(json!({"op": "publish", "topic": "/nobody", "msg": {"data": "x"}}));
    broker.send(json!({"op": "status", "level": "info", "msg": "hi"}));
    broker
        .commands
        .send(BrokerCommand::Send("{not json".to_string()))
        .unwrap();
    broker.send(json!({"op": "publish", "topic": "/ultrasonic_data", "msg": {"data": "after"}}));

    assert!(wait_for(|| bridge.pending_len() == 1));
    assert!(bridge.drain_one());
    assert_eq!(rx.try_recv().unwrap(), "after");
    assert!(bridge.is_connected());
}

#[test]
fn outbound_publish_reaches_broker() {
    let broker = MockBroker::start();
    let (bridge, _rx) = connected_bridge(&broker);
    let cmd_vel = Topic::<Twist>::new("/cmd_vel");

    bridge.publish_to(&cmd_vel, &Twist::drive(0.5, -0.25)).unwrap();

    let frames = broker.wait_for_frames(4);
    let publish = &frames[3];
    assert_eq!(publish["op"], "publish");
    assert_eq!(publish["topic"], "/cmd_vel");
    assert_eq!(publish["msg"]["linear"]["x"], json!(0.5));
    assert_eq!(publish["msg"]["angular"]["z"], json!(-0.25));

    assert_eq!(
        bridge.publish("/not_advertised", &StringMsg::new("x")),
        Err(BridgeError::UnknownTopic("/not_advertised".to_string()))
    );
    assert!(matches!(
        bridge.publish("/cmd_vel", &StringMsg::new("x")),
        Err(BridgeError::TypeMismatch { .. })
    ));
}

#[test]
fn service_call_and_response() {
    let broker = MockBroker::start();
    let (bridge, _rx) = connected_bridge(&broker);

    let id = bridge
        .call_service("/arlobot/reset_motorBoard", json!({"data": true}))
        .unwrap();
    let frames = broker.wait_for_frames(4);
    assert_eq!(frames[3]["op"], "call_service");
    assert_eq!(frames[3]["service"], "/arlobot/reset_motorBoard");
    assert_eq!(frames[3]["args"], json!({"data": true}));
    assert_eq!(frames[3]["id"], id.as_str());

    broker.send(json!({
        "op": "service_response",
        "service": "/arlobot/reset_motorBoard",
        "values": {"success": true},
        "id": id.as_str(),
        "result": true,
    }));

    let mut response = None;
    assert!(wait_for(|| {
        response = bridge.take_service_response();
        response.is_some()
    }));
    let response = response.unwrap();
    assert!(response.answers(&id));
    assert_eq!(response.values, json!({"success": true}));
    assert_eq!(response.result, Some(true));
    assert!(bridge.take_service_response().is_none());
}

#[test]
fn server_close_drops_to_disconnected() {
    let broker = MockBroker::start();
    let (mut bridge, _rx) = connected_bridge(&broker);

    broker.close();
    assert!(wait_for(|| bridge.state() == ConnectionState::Disconnected));
    assert_eq!(
        bridge.publish_to(&Topic::<Twist>::new("/cmd_vel"), &Twist::stop()),
        Err(BridgeError::NotConnected)
    );
    assert_eq!(bridge.disconnect(), DisconnectOutcome::Idle);
}
