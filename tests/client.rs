use kospel_tools::session::SessionState;
use kospel_tools::{Config, ErrorKind, KospelClient, Mode, Protocol};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> Config {
    let mut config = Config::new(server.uri().parse().unwrap());
    config.device_id = Some(101);
    config.device_type = Some(18);
    config
}

fn ok(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn regs() -> serde_json::Value {
    json!({
        "status": 0,
        "regs": {
            "TEMP_ROOM": 0x0327,
            "TEMP_CO_SETPOINT": 215,
            "FLAG_CH_HEATING": 1,
            "FLAG_PUMP_CO": 0x0100,
            "OPERATING_MODE": 0,
            "POWER_CURRENT": 0xFFFF,
        }
    })
}

async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
    let requests = server.received_requests().await.unwrap_or_default();
    requests.iter().filter(|r| r.url.path() == endpoint).count()
}

/// A controller accepting `selectModule` and reporting session 101 bound.
async fn cooperative_controller(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/selectModule"))
        .and(body_string_contains("devType=18"))
        .respond_with(ok(json!({"status": 0})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessionDevice"))
        .respond_with(ok(json!({"sessionDevice": 101})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn reads_a_status_over_ekd() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .and(header("accept", "application/vnd.kospel.cmi-v1+json"))
        .respond_with(ok(regs()))
        .expect(2)
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let first = client.get_status().await.unwrap();
    assert_eq!(first.protocol, Protocol::Ekd);
    assert!(!first.degraded_session);
    assert_eq!(first.current_temperature, Some(82.3));
    assert_eq!(first.heater_running, Some(true));
    assert_eq!(first.pump_running, Some(false));
    assert_eq!(first.mode, Some(Mode::Auto));
    assert_eq!(first.power, None);
    assert_eq!(first.water_temperature, None);
    assert_eq!(client.session_state().await, SessionState::Established);

    let mut second = client.get_status().await.unwrap();
    second.retrieved_at = first.retrieved_at;
    assert_eq!(first, second);
    assert_eq!(requests_to(&server, "/api/selectModule").await, 1);
}

#[tokio::test]
async fn wrong_id_reestablishes_once_and_retries_once() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(json!({"status": -1, "status_msg": "WRONG_ID"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(regs()))
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let status = client.get_status().await.unwrap();
    assert_eq!(status.current_temperature, Some(82.3));
    assert_eq!(requests_to(&server, "/api/selectModule").await, 2);
    assert_eq!(requests_to(&server, "/api/ekd/read/101").await, 2);
}

#[tokio::test]
async fn persistent_session_failures_are_returned_after_one_retry() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let error = client.get_status().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Session);
    assert_eq!(requests_to(&server, "/api/ekd/read/101").await, 2);
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(json!({"status": 0})))
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let error = client.get_status().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Protocol);
    assert_eq!(requests_to(&server, "/api/ekd/read/101").await, 1);
}

#[tokio::test]
async fn ladder_falls_back_to_binding_the_id_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/selectModule"))
        .respond_with(ok(json!({"status": -2, "status_msg": "NOT_SUPPORTED"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sessionDevice"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!(101)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sessionDevice"))
        .and(header("content-type", "text/plain"))
        .and(body_string("101"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessionDevice"))
        .respond_with(ok(json!({"sessionDevice": "-1"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessionDevice"))
        .respond_with(ok(json!({"sessionDevice": "7"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/7"))
        .respond_with(ok(regs()))
        .expect(1)
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let status = client.get_status().await.unwrap();
    assert!(!status.degraded_session);
    assert_eq!(requests_to(&server, "/").await, 0);
}

#[tokio::test]
async fn degrades_to_the_device_id_when_no_handshake_works() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessionDevice"))
        .respond_with(ok(json!({"sessionDevice": -1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(regs()))
        .expect(2)
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let status = client.get_status().await.unwrap();
    assert!(status.degraded_session);
    assert_eq!(status.current_temperature, Some(82.3));
    assert_eq!(client.session_state().await, SessionState::Degraded);
    assert_eq!(requests_to(&server, "/").await, 1);

    // Degraded sessions are reused without running the ladder again.
    client.get_status().await.unwrap();
    assert_eq!(requests_to(&server, "/").await, 1);
    assert_eq!(requests_to(&server, "/api/selectModule").await, 1);
}

#[tokio::test]
async fn unreachable_controllers_fail_instead_of_degrading() {
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut config = Config::new(format!("http://127.0.0.1:{port}/").parse().unwrap());
    config.device_id = Some(101);
    config.device_type = Some(18);
    let client = KospelClient::new(config).unwrap();
    let error = client.get_status().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Connection);
    assert_eq!(client.session_state().await, SessionState::Establishing);
}

#[tokio::test]
async fn sessions_are_refreshed_after_their_ttl() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(regs()))
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    client.get_status().await.unwrap();
    assert_eq!(requests_to(&server, "/api/selectModule").await, 1);

    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(1499)).await;
    tokio::time::resume();
    client.get_status().await.unwrap();
    assert_eq!(requests_to(&server, "/api/selectModule").await, 1);

    tokio::time::pause();
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::time::resume();
    client.get_status().await.unwrap();
    assert_eq!(requests_to(&server, "/api/selectModule").await, 2);
}

#[tokio::test]
async fn reads_the_legacy_register_dump() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/dev/101"))
        .respond_with(ok(json!({
            "status": "0",
            "regs": {"0b30": "0100", "0b31": "0001", "0b33": "0300", "0c1c": "4a01", "0c1d": "e001"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.protocol = Protocol::Legacy;
    let client = KospelClient::new(config).unwrap();
    let status = client.get_status().await.unwrap();
    assert_eq!(status.protocol, Protocol::Legacy);
    assert_eq!(status.current_temperature, Some(33.0));
    assert_eq!(status.water_temperature, Some(48.0));
    assert_eq!(status.heater_running, Some(false));
    assert_eq!(status.pump_running, Some(true));
    assert_eq!(status.mode, Some(Mode::Eco));
    assert_eq!(client.session_state().await, SessionState::Uninitialized);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);
}

#[tokio::test]
async fn discovers_the_heater_from_either_listing_shape() {
    for devs in [
        json!({"65": {"id": 1}, "18": [{"id": "101"}]}),
        json!([{"type": 65, "id": 1}, {"devType": "18", "id": 101}]),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dev"))
            .respond_with(ok(json!({ "devs": devs })))
            .mount(&server)
            .await;
        cooperative_controller(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/ekd/read/101"))
            .respond_with(ok(regs()))
            .mount(&server)
            .await;

        let client = KospelClient::new(Config::new(server.uri().parse().unwrap())).unwrap();
        let devices = client.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!((devices[0].id, devices[0].device_type), (101, 18));
        assert!(client.test_connection().await);
        assert_eq!(client.get_status().await.unwrap().heater_running, Some(true));
    }
}

#[tokio::test]
async fn connection_test_fails_without_a_heater() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/dev"))
        .respond_with(ok(json!({"devs": {"65": {"id": 1}}})))
        .mount(&server)
        .await;

    let client = KospelClient::new(Config::new(server.uri().parse().unwrap())).unwrap();
    assert!(!client.test_connection().await);
    let error = client.get_status().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Discovery);
}

#[tokio::test]
async fn writes_are_clamped() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    for body in [
        json!({"TEMP_CO_SETPOINT": 350}),
        json!({"TEMP_CWU_SETPOINT": 200}),
        json!({"OPERATING_MODE": 4}),
    ] {
        Mock::given(method("POST"))
            .and(path("/api/ekd/write/101"))
            .and(body_json(body))
            .respond_with(ok(json!({"status": 0})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = KospelClient::new(config(&server)).unwrap();
    client.set_temperature(40.0).await.unwrap();
    client.set_water_temperature(10.0).await.unwrap();
    client.set_mode(Mode::Summer).await.unwrap();
    let error = client.set_mode(Mode::Eco).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Protocol);
    let error = client.set_mode(Mode::Unknown(42)).await.unwrap_err();
    assert!(matches!(error, kospel_tools::Error::UnwritableMode(Mode::Unknown(42))));
    assert_eq!(requests_to(&server, "/api/ekd/write/101").await, 3);
}

#[tokio::test]
async fn non_finite_setpoints_are_never_written() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/write/101"))
        .respond_with(ok(json!({"status": 0})))
        .expect(0)
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let error = client.set_temperature(f64::NAN).await.unwrap_err();
    assert!(matches!(error, kospel_tools::Error::InvalidTemperature(_)));
    assert_eq!(error.kind(), ErrorKind::Protocol);
    let error = client.set_water_temperature(f64::INFINITY).await.unwrap_err();
    assert!(matches!(error, kospel_tools::Error::InvalidTemperature(_)));
    assert_eq!(requests_to(&server, "/api/ekd/write/101").await, 0);
}

#[tokio::test]
async fn concurrent_polls_share_one_handshake() {
    let server = MockServer::start().await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(regs()))
        .expect(2)
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let (a, b) = tokio::join!(client.get_status(), client.get_status());
    assert_eq!(a.unwrap().current_temperature, Some(82.3));
    assert_eq!(b.unwrap().current_temperature, Some(82.3));
    assert_eq!(requests_to(&server, "/api/selectModule").await, 1);
}

#[tokio::test]
async fn abandoned_handshakes_do_not_establish_a_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/selectModule"))
        .respond_with(ok(json!({"status": 0})).set_delay(Duration::from_secs(3)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    cooperative_controller(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ekd/read/101"))
        .respond_with(ok(regs()))
        .expect(1)
        .mount(&server)
        .await;

    let client = KospelClient::new(config(&server)).unwrap();
    let abandoned = tokio::time::timeout(Duration::from_millis(500), client.get_status()).await;
    assert!(abandoned.is_err());
    assert_ne!(client.session_state().await, SessionState::Established);

    let status = client.get_status().await.unwrap();
    assert_eq!(status.current_temperature, Some(82.3));
    assert_eq!(client.session_state().await, SessionState::Established);
    assert_eq!(requests_to(&server, "/api/selectModule").await, 2);
}
