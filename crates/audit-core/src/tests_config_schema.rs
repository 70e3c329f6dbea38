#[test]
fn default_config_is_valid() {
    let config = super::AuditServerConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(
        config.listen_socket_addr().expect("default listen addr"),
        "127.0.0.1:8443".parse().expect("socket addr literal")
    );
}

#[test]
fn serde_round_trip_preserves_listener_settings() {
    let json = r#"
        {
          "listen_addr": "0.0.0.0",
          "listen_port": 18443,
          "drain_timeout_ms": 2500
        }
    "#;
    let parsed =
        serde_json::from_str::<super::AuditServerConfig>(json).expect("deserialize config");
    assert_eq!(parsed.listen_addr, "0.0.0.0");
    assert_eq!(parsed.listen_port, 18_443);
    assert_eq!(parsed.drain_timeout_ms, 2_500);
    assert_eq!(parsed.accept_error_backoff_ms, 10);
    assert!(parsed.validate().is_ok());

    let encoded = serde_json::to_string(&parsed).expect("serialize config");
    let reparsed =
        serde_json::from_str::<super::AuditServerConfig>(&encoded).expect("reparse config");
    assert_eq!(reparsed, parsed);
}

#[test]
fn serde_rejects_unknown_fields() {
    let json = r#"{ "session_ttl_ms": 1000 }"#;
    let err = serde_json::from_str::<super::AuditServerConfig>(json)
        .expect_err("unknown field must fail");
    let message = err.to_string();
    assert!(
        message.contains("unknown field"),
        "expected unknown field error, got: {message}"
    );
}

#[test]
fn validation_rejects_empty_listen_addr() {
    let config = super::AuditServerConfig {
        listen_addr: "  ".to_string(),
        ..super::AuditServerConfig::default()
    };
    let err = config.validate().expect_err("blank listen addr should fail");
    assert_eq!(err, super::AuditConfigError::EmptyListenAddr);
}

#[test]
fn validation_rejects_hostname_listen_addr() {
    let config = super::AuditServerConfig {
        listen_addr: "audit.example.test".to_string(),
        ..super::AuditServerConfig::default()
    };
    let err = config.validate().expect_err("hostname listen addr should fail");
    assert_eq!(
        err,
        super::AuditConfigError::InvalidListenAddr("audit.example.test".to_string())
    );
}

#[test]
fn bracketed_ipv6_listen_addr_is_accepted() {
    let config = super::AuditServerConfig {
        listen_addr: "[::1]".to_string(),
        listen_port: 9443,
        ..super::AuditServerConfig::default()
    };
    let addr = config.listen_socket_addr().expect("bracketed ipv6");
    assert_eq!(addr, "[::1]:9443".parse().expect("socket addr literal"));
}

#[test]
fn validation_rejects_zero_drain_timeout() {
    let config = super::AuditServerConfig {
        drain_timeout_ms: 0,
        ..super::AuditServerConfig::default()
    };
    let err = config.validate().expect_err("zero drain timeout should fail");
    assert_eq!(err, super::AuditConfigError::ZeroValue("drain_timeout_ms"));
}
