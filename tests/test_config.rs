use std::collections::HashMap;

use preforkd::config::{BindSource, Config, INHERITED_LISTEN_FD, Mode};

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_config_defaults() {
    let cfg = Config::from_env_with(env(&[])).unwrap();

    assert_eq!(cfg.listen_addr, "0.0.0.0:5000");
    assert_eq!(cfg.mode, Mode::Prefork);
    assert_eq!(
        cfg.workers,
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    );
    assert_eq!(cfg.backlog, 128);
    assert_eq!(cfg.inherited_fd, None);
    assert!(cfg.server_software.starts_with("preforkd/"));
}

#[test]
fn test_config_custom_address_from_env() {
    let cfg = Config::from_env_with(env(&[("LISTEN", "127.0.0.1:3000")])).unwrap();

    assert_eq!(cfg.listen_addr, "127.0.0.1:3000");
    assert_eq!(
        cfg.bind_source(),
        BindSource::Fresh {
            addr: "127.0.0.1:3000".to_string(),
            backlog: 128,
            reuse_port: false,
        }
    );
}

#[test]
fn test_config_listen_fds_selects_inherited_socket() {
    let cfg = Config::from_env_with(env(&[("LISTEN_FDS", "1"), ("LISTEN", "0.0.0.0:80")])).unwrap();

    assert_eq!(cfg.bind_source(), BindSource::Inherited(INHERITED_LISTEN_FD));
    assert_eq!(INHERITED_LISTEN_FD, 3);
}

#[test]
fn test_config_workers_and_mode_from_env() {
    let cfg = Config::from_env_with(env(&[("WORKERS", "3"), ("SERVER_MODE", "Reactor")])).unwrap();

    assert_eq!(cfg.workers, 3);
    assert_eq!(cfg.mode, Mode::Reactor);
}

#[test]
fn test_config_rejects_bad_values() {
    assert!(Config::from_env_with(env(&[("WORKERS", "many")])).is_err());
    assert!(Config::from_env_with(env(&[("WORKERS", "0")])).is_err());
    assert!(Config::from_env_with(env(&[("SERVER_MODE", "green")])).is_err());
    assert!(Config::from_env_with(env(&[("LOG_LEVEL", "loud")])).is_err());
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml_str(
        r#"
listen_addr: "127.0.0.1:8888"
mode: forking
workers: 2
reuse_port: true
read_buffer_size: 2048
write_timeout_ms: 250
server_name: bloggulus.com
"#,
    )
    .unwrap();

    assert_eq!(cfg.listen_addr, "127.0.0.1:8888");
    assert_eq!(cfg.mode, Mode::Forking);
    assert_eq!(cfg.workers, 2);
    assert!(cfg.reuse_port);
    assert_eq!(cfg.read_buffer_size, 2048);
    assert_eq!(cfg.write_timeout(), Some(std::time::Duration::from_millis(250)));
    assert_eq!(cfg.server_name.as_deref(), Some("bloggulus.com"));
    // Unset fields keep their defaults
    assert_eq!(cfg.backlog, 128);
    assert_eq!(cfg.poll_interval_ms, 500);
}

#[test]
fn test_config_yaml_rejects_unknown_mode() {
    assert!(Config::from_yaml_str("mode: green\n").is_err());
}

#[test]
fn test_config_validate() {
    let mut cfg = Config::default();
    assert!(cfg.validate().is_ok());

    cfg.read_buffer_size = 0;
    assert!(cfg.validate().is_err());

    cfg.read_buffer_size = 1024;
    cfg.write_timeout_ms = Some(0);
    assert!(cfg.validate().is_err());

    cfg.write_timeout_ms = None;
    cfg.poll_interval_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_threaded_and_async_modes() {
    let cfg = Config::from_env_with(env(&[("SERVER_MODE", "threaded")])).unwrap();
    assert_eq!(cfg.mode, Mode::Threaded);

    let cfg = Config::from_env_with(env(&[("SERVER_MODE", "async")])).unwrap();
    assert_eq!(cfg.mode, Mode::Reactor);

    assert_eq!(Config::from_yaml_str("mode: threaded\n").unwrap().mode, Mode::Threaded);
    assert_eq!(Config::from_yaml_str("mode: async\n").unwrap().mode, Mode::Reactor);
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1.listen_addr, cfg2.listen_addr);
    assert_eq!(cfg1.mode, cfg2.mode);
}
