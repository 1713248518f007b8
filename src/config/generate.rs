pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SDC CONFIGURATION
# =============================================================================
# Incremental collection of security telemetry from a query API into a sink.
#
# Each run resumes from the stored checkpoint, cuts the time since then into
# fixed windows aligned to the epoch, and for every window submits a query,
# polls until it completes, fetches the results and writes them to the sink.
# The checkpoint only moves after the sink write succeeded, so a window is
# delivered at least once.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/sdc/config.yml
#   3. /etc/sdc/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# Which source feeds which sink: "<source> > <sink>"
# Sources: cortex_xdr, qradar
# Sinks:   local_file, hdfs
pipeline: "cortex_xdr > local_file"

# =============================================================================
# GENERAL SETTINGS
# =============================================================================

general:
  # Checkpoint file, shared by all pipelines on this host
  state_file_path: /var/lib/sdc/state.json
  # Where large result streams are spooled before the sink takes them
  # (defaults to the system temp directory)
  scratch_dir: /var/lib/sdc/scratch
  # Optional log file in addition to stderr
  # log_file_path: /var/log/sdc/sdc.log
  # trace, debug, info, warn, error (RUST_LOG overrides)
  log_level: info
  # Window length; windows are aligned to multiples of this since the epoch
  collection_window_minutes: 10
  # After a failed window: 'stop' ends the run, 'continue' keeps collecting
  # later windows but never moves the checkpoint past the failure
  on_window_error: stop

# =============================================================================
# SOURCES
# =============================================================================
# Only the source named in 'pipeline' needs to be configured.

sources:
  cortex_xdr:
    # API endpoint is https://api-<fqdn>; set base_url to override
    fqdn: tenant.xdr.eu.paloaltonetworks.com
    api_key_id: "1"
    api_key: $env{XDR_API_KEY}
    # 'standard' or 'advanced' (nonce + timestamp signed with sha256)
    auth: standard
    # Category tag used in output paths
    category: api_alerts
    # Must contain {start_time} and {end_time}
    query_template: "dataset = alerts | filter _time >= {start_time} and _time < {end_time}"
    # iso8601, epoch, epoch_ms or a strftime string
    time_format: epoch_ms
    # Where the first run starts when no checkpoint exists (default: epoch)
    initial_collection_timestamp: "2024-01-01T00:00:00Z"
    poll_interval: 5s
    max_wait: 10m
    fetch_retries: 2
    request_timeout: 60s

  # qradar:
  #   host: https://qradar.example.com
  #   token: $env{QRADAR_TOKEN}
  #   # api_events (Ariel search) or api_offenses
  #   input_type: api_events
  #   verify_tls: true
  #   api_version: "12.0"
  #   aql_query_template_events: "SELECT * FROM events START '{start_time}' STOP '{end_time}'"
  #   offense_filter_template: "start_time >= {start_time} and start_time < {end_time}"
  #   time_format: "%Y-%m-%d %H:%M:%S"
  #   initial_collection_timestamp: "2024-01-01 00:00:00"

# =============================================================================
# SINKS
# =============================================================================
# Only the sink named in 'pipeline' needs to be configured.

sinks:
  local_file:
    # Files land in <base_path>/<source>/<category>/<YYYYMMDD>/
    base_path: /var/lib/sdc/output
    # Results larger than either limit are split across several files
    max_records_per_file: 100000
    max_file_size_mb: 256

  # hdfs:
  #   namenode_url: http://namenode.example.com:9870
  #   user: sdc
  #   # Destination directory per "<source>/<category>"
  #   base_paths:
  #     cortex_xdr/api_alerts: /data/security/xdr/alerts
  #     qradar/api_events: /data/security/qradar/events
  #   kerberos:
  #     principal: sdc@EXAMPLE.COM
  #     keytab_path: /etc/security/keytabs/sdc.keytab
  #   request_timeout: 120s
  #   max_records_per_file: 100000
  #   max_file_size_mb: 256
"#
    .to_string()
}
