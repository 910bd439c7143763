pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Logship moves log entries from the install database (and optionally the FÜV
# log database) into the normalized log store, then removes what it moved.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml
#
# Values may reference environment variables as $env{NAME}.
# Durations use humantime syntax: 500ms, 5s, 3m, 24h.

# Stable identity of this instance. Every claim and startup reset is scoped by
# it, so two running instances must never share one. Defaults to the host name.
# worker_id: logship-01

# move: delete upstream rows once written. copy: leave them in place.
transfer_mode: move

storage:
  install_path: ~/.local/share/logship/install.duckdb
  target_path: ~/.local/share/logship/target.duckdb
  # Required when range_source.enabled is true.
  # fuv_path: ~/.local/share/logship/fuv.duckdb

range_source:
  enabled: false

collector:
  max_rows_per_cycle: 100
  poll_delay: 5s

writer:
  poll_delay: 1s

remover:
  poll_delay: 5s
  max_batch: 1000

cleaner:
  interval: 1h
  retention_days: 30
  batch_size: 20000
  max_iterations: 60
  orphan_batch: 50000
  iteration_pause: 5ms

alerter:
  poll_interval: 3m
  run_timeout: 10m

# Retry delay after a failed cycle doubles from initial up to max.
backoff:
  initial: 5s
  max: 5m

notification:
  # Without an endpoint alert mail is written to the log only.
  # endpoint: https://install.example.com/api/mail/send
  install: ""
  timeout: 30s
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.cleaner.retention_days, 30);
        assert!(!config.range_source_enabled());
        assert!(config.notification.endpoint.is_none());
    }
}
