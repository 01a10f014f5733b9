pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Ships load-balancer access logs from an object store into a log-aggregation
# service, one log stream per time bucket.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# =============================================================================
# SOURCE
# =============================================================================
# Where the access logs live. Objects may be gzip-compressed or plain text.

source:
  # 's3' (credentials and region from the usual AWS_* environment) or 'local'
  store: s3
  # Bucket name for s3, root directory for local
  bucket: my-alb-logs
  # Only objects under this key prefix are shipped
  prefix: AWSLogs/123456789012/elasticloadbalancing/us-east-2/
  # region: us-east-2
  # endpoint: http://localhost:9000

# =============================================================================
# SINK
# =============================================================================

sink:
  # 'http' posts to a log intake endpoint, 'file' writes JSON lines locally
  type: http
  endpoint: http://localhost:4000
  # directory: ~/logship-out
  log_group: /aws/alb/my_alb
  # Streams are named <stream_prefix>-<bucket index>
  stream_prefix: log_stream

# =============================================================================
# BATCHING
# =============================================================================

batch:
  # Upper bound on the serialized size of one upload
  max_bytes: 1048576
  # Upper bound on events per upload
  max_count: 10000

# =============================================================================
# ROUTING
# =============================================================================

routing:
  # 'daily' or 'hourly' streams
  granularity: daily
  timestamp:
    # 'ingestion' stamps every line with the time it was shipped.
    # 'record' parses the time out of the line itself:
    #   source: record
    #   pattern: '^\S+ (?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+Z)'
    #   format: iso8601
    source: ingestion

# =============================================================================
# FAILURE HANDLING
# =============================================================================

retry:
  # Attempts per batch for throttling and transport failures
  max_attempts: 5
  initial_backoff: 200ms
  max_backoff: 10s

timeouts:
  list: 30s
  fetch: 60s
  upload: 30s

concurrency:
  # Objects processed at once. Uploads to one stream are always sequential.
  workers: 1
"#
    .to_string()
}
